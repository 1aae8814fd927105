//! # voicefleet-core
//!
//! Orchestration core for a fleet of independently authenticated messaging
//! accounts that join the same group call together.
//!
//! The crate owns session lifecycle (create, persist, restore, delete), fans
//! bulk operations out over every session with per-session isolation of
//! failures, and tracks which session is in which call. The messaging
//! protocol and the real-time call layer themselves are external and are
//! reached through the traits in [`provider`].
//!
//! ## Layout
//!
//! - [`store`] - durable session credentials (SQLite)
//! - [`auth`] - multi-step login flows that mint new credentials
//! - [`pool`] - client handles and bulk start/stop
//! - [`calls`] - channel parsing, join policy and the call coordinator
//! - [`fleet`] - the orchestrator tying it all together
//! - [`sim`] - an in-process provider for tests and offline use
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voicefleet_core::{Fleet, FleetConfig};
//! use voicefleet_core::sim::SimProvider;
//!
//! # async fn example() -> voicefleet_core::FleetResult<()> {
//! let config = FleetConfig::from_env()?;
//! let fleet = Fleet::builder(config)
//!     .with_provider(Arc::new(SimProvider::new()))
//!     .build()
//!     .await?;
//!
//! fleet.load_sessions().await?;
//! let report = fleet.start_all().await?;
//! println!("{}", report);
//!
//! let report = fleet.join_all("https://t.me/somechannel?videochat").await?;
//! println!("{} sessions joined", report.successful());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod calls;
pub mod config;
pub mod error;
pub mod events;
pub mod fleet;
pub mod logging;
pub mod pool;
pub mod provider;
pub mod recovery;
pub mod sim;
pub mod store;

// Public API exports
pub use auth::{AuthFlows, AuthStage, CompletedSession, FlowStep, UserId};
pub use calls::{ActiveCall, CallCoordinator, JoinPolicy, parse_channel_reference};
pub use config::{CallSettings, DeploymentEnvironment, FleetConfig};
pub use error::{FleetError, FleetResult};
pub use events::{FleetEvent, TimedEvent};
pub use fleet::{CallSummary, Fleet, FleetBuilder, FleetOverview};
pub use pool::{BulkReport, ClientHandle, SessionOutcome, SessionPool, SessionStatus};
pub use provider::{
    CallControl, ChannelId, MediaSpec, MessagingConnection, ProviderError, ProviderFactory,
};
pub use store::{CredentialStore, SessionMetadata, SessionRecord, SqliteCredentialStore};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
