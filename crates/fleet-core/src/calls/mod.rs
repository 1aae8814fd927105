//! Group-call coordination
//!
//! - [`channel`] turns operator input into a public channel handle
//! - [`policy`] is the bounded join retry with its text-command fallback
//! - [`active`] tracks which session is in which call
//! - [`coordinator`] fans join and leave out over the pool

pub mod active;
pub mod channel;
pub mod coordinator;
pub mod policy;

pub use active::{ActiveCall, ActiveCalls};
pub use channel::parse_channel_reference;
pub use coordinator::CallCoordinator;
pub(crate) use coordinator::leave_session;
pub use policy::{JoinPolicy, JoinSuccess, join_with_fallback};
