//! Error types and handling for the fleet core
//!
//! Every fallible operation in this crate returns [`FleetResult`]. Errors are
//! grouped into categories that drive how the caller should react:
//!
//! - **Validation** - malformed operator input; re-prompt, never fatal
//! - **Provider** - a distinguishable condition signalled by the messaging
//!   provider (invalid phone, invalid code, second factor required, ...)
//! - **Session** - the named session is unknown or already tracked
//! - **Storage** - the credential store failed; retried for single writes,
//!   fatal at startup
//! - **Resolution** - a channel reference could not be parsed; fails the whole
//!   join request
//! - **Authorization** / **Concurrency** / **Configuration** / **System**
//!
//! Bulk operations never surface per-session failures as an `Err`: those are
//! captured in the per-session outcomes of a
//! [`BulkReport`](crate::pool::BulkReport). An `Err` from a bulk operation
//! means the request as a whole was refused.
//!
//! # Example
//!
//! ```rust
//! use voicefleet_core::{FleetError, ProviderError};
//!
//! let err = FleetError::from(ProviderError::InvalidCode);
//! assert_eq!(err.category(), "provider");
//! assert!(!err.is_recoverable());
//!
//! let err = FleetError::storage("database is locked");
//! assert!(err.is_recoverable());
//! ```

use thiserror::Error;

use crate::provider::ProviderError;

/// Result type for fleet operations
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors that can occur while managing sessions, logins and calls
#[derive(Error, Debug, Clone)]
pub enum FleetError {
    /// Session name is empty or contains characters other than ASCII
    /// letters, digits and underscore
    #[error("Invalid session name '{name}': {reason}")]
    InvalidSessionName { name: String, reason: String },

    /// Phone number is not a `+`-prefixed digit string
    #[error("Invalid phone number '{input}': expected '+' followed by digits")]
    InvalidPhoneNumber { input: String },

    /// Login code does not have the expected shape
    #[error("Invalid login code: {reason}")]
    InvalidLoginCode { reason: String },

    /// A provider-signalled condition
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A session with this name is already stored or tracked
    #[error("Session already exists: {name}")]
    SessionExists { name: String },

    /// The stored credential could not be turned into a client
    #[error("Session '{name}' could not be instantiated: {reason}")]
    SessionUnusable { name: String, reason: String },

    /// Credential store failure
    #[error("Storage error: {reason}")]
    Storage { reason: String },

    /// Channel reference could not be resolved to an identifier
    #[error("Unresolvable channel reference: '{input}'")]
    UnresolvableChannel { input: String },

    /// The requesting user is not the configured operator
    #[error("User {user} is not authorized to operate this fleet")]
    NotAuthorized { user: i64 },

    /// A bulk operation is already running on the pool
    #[error("Cannot run {requested}: {running} is still in progress")]
    BulkOperationInProgress {
        running: &'static str,
        requested: &'static str,
    },

    /// No login flow is open for this user
    #[error("No login flow in progress for user {user}")]
    NoActiveFlow { user: i64 },

    /// The previous step of this user's login flow has not returned yet
    #[error("Previous login step for user {user} is still running")]
    FlowBusy { user: i64 },

    /// Invalid configuration
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FleetError {
    /// Create a storage error
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage { reason: reason.into() }
    }

    /// Create a session-exists error
    pub fn session_exists(name: impl Into<String>) -> Self {
        Self::SessionExists { name: name.into() }
    }

    /// Create a configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if retrying the same request may succeed
    ///
    /// Storage hiccups (locked database, busy file) and transient provider
    /// failures are recoverable. Validation, resolution and provider
    /// rejections are not: repeating the same input gives the same answer.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FleetError::Storage { .. } => true,
            FleetError::Provider(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Check if this error should be answered by re-prompting the operator
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            FleetError::InvalidSessionName { .. }
                | FleetError::InvalidPhoneNumber { .. }
                | FleetError::InvalidLoginCode { .. }
        )
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            FleetError::InvalidSessionName { .. }
            | FleetError::InvalidPhoneNumber { .. }
            | FleetError::InvalidLoginCode { .. } => "validation",

            FleetError::Provider(_) => "provider",

            FleetError::SessionExists { .. }
            | FleetError::SessionUnusable { .. } => "session",

            FleetError::Storage { .. } => "storage",

            FleetError::UnresolvableChannel { .. } => "resolution",

            FleetError::NotAuthorized { .. } => "authorization",

            FleetError::BulkOperationInProgress { .. }
            | FleetError::NoActiveFlow { .. }
            | FleetError::FlowBusy { .. } => "concurrency",

            FleetError::InvalidConfiguration { .. } => "configuration",

            FleetError::Internal { .. } => "system",
        }
    }
}

impl From<sqlx::Error> for FleetError {
    fn from(err: sqlx::Error) -> Self {
        FleetError::Storage {
            reason: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for FleetError {
    fn from(err: config::ConfigError) -> Self {
        FleetError::InvalidConfiguration {
            field: "environment".to_string(),
            reason: err.to_string(),
        }
    }
}
