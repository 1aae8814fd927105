//! Session pool
//!
//! [`SessionPool`] owns the client handles of every known session and runs
//! the bulk lifecycle operations over them. Results come back as
//! [`BulkReport`]s with one [`SessionOutcome`] per session.

pub mod bulk;
pub mod handle;
pub mod manager;
pub mod report;

pub use bulk::{BulkGuard, BulkLock};
pub use handle::ClientHandle;
pub use manager::SessionPool;
pub use report::{BulkReport, SessionOutcome, SessionStatus};
