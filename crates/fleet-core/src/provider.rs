//! Provider boundary
//!
//! The messaging protocol client and the real-time call layer are external
//! collaborators. This module defines the capabilities the fleet needs from
//! them and nothing more:
//!
//! - [`MessagingConnection`] - one authenticated (or authenticating)
//!   connection to the messaging platform
//! - [`CallControl`] - the call layer bound 1:1 to one connection
//! - [`ProviderFactory`] - creates both, holding the api identity and secret
//!
//! Provider failures are reported as [`ProviderError`] kinds instead of
//! provider-specific exception types, so the login flow can match them
//! exhaustively.
//!
//! ```text
//! ┌──────────────────────┐      open_session()      ┌──────────────────────┐
//! │   ProviderFactory    │ ───────────────────────▶ │ MessagingConnection  │
//! │ (api id + secret)    │      call_control()      ├──────────────────────┤
//! │                      │ ───────────────────────▶ │     CallControl      │
//! └──────────────────────┘                          └──────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Conditions a provider can signal
///
/// The first five variants are distinguishable protocol answers and each one
/// maps to a specific login-flow transition. `NotConnected` and `Other` cover
/// transport trouble and everything the provider does not classify.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("phone number rejected by provider")]
    InvalidPhone,

    #[error("login code is invalid")]
    InvalidCode,

    #[error("login code has expired")]
    CodeExpired,

    #[error("two-step verification password required")]
    PasswordRequired,

    #[error("two-step verification password is invalid")]
    InvalidPassword,

    #[error("connection is not established")]
    NotConnected,

    #[error("{reason}")]
    Other { reason: String },
}

impl ProviderError {
    /// Create an unclassified provider error
    pub fn other(reason: impl Into<String>) -> Self {
        Self::Other { reason: reason.into() }
    }

    /// Check if the failure may clear up on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::NotConnected | ProviderError::Other { .. })
    }
}

/// Numeric channel identifier as assigned by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A channel as seen by one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub id: ChannelId,
    pub title: String,
}

/// Profile of the account behind a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Profile {
    /// Name to show the operator, falling back to the session name
    pub fn display_name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.first_name.is_empty() {
            fallback
        } else {
            &self.first_name
        }
    }
}

/// Handle returned when a login code has been sent
///
/// The provider needs it back, together with the code, to verify the login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeVerification {
    pub phone_code_hash: String,
}

/// Audio quality profile of the placeholder stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioQuality {
    Medium,
    High,
}

/// Media piped into a call
///
/// The fleet does not mix or transcode anything; every session plays the
/// same fixed placeholder source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSpec {
    pub source: String,
    pub audio: AudioQuality,
}

impl MediaSpec {
    /// Placeholder clip used when nothing else is configured
    pub const DEFAULT_SOURCE: &'static str =
        "http://docs.evostream.com/sample_content/assets/sintel1m720p.mp4";

    /// Audio-only placeholder at high quality
    pub fn placeholder(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            audio: AudioQuality::High,
        }
    }
}

impl Default for MediaSpec {
    fn default() -> Self {
        Self::placeholder(Self::DEFAULT_SOURCE)
    }
}

/// One connection to the messaging platform
///
/// Implementations use interior mutability: every method takes `&self` so a
/// connection can be shared between the pool and its call layer.
#[async_trait]
pub trait MessagingConnection: Send + Sync {
    /// Establish the transport (and resume the stored login, if any)
    async fn connect(&self) -> ProviderResult<()>;

    /// Tear the transport down
    async fn disconnect(&self) -> ProviderResult<()>;

    /// Whether the transport is currently up
    fn is_connected(&self) -> bool;

    /// Profile of the logged-in account
    async fn self_profile(&self) -> ProviderResult<Profile>;

    /// Send a text message to a channel
    async fn send_message(&self, channel: ChannelId, text: &str) -> ProviderResult<()>;

    /// Resolve a public handle to a channel, as visible to this account
    async fn resolve_channel(&self, handle: &str) -> ProviderResult<ResolvedChannel>;

    /// Ask the platform to send a login code to `phone`
    async fn request_login_code(&self, phone: &str) -> ProviderResult<CodeVerification>;

    /// Verify a login code
    ///
    /// Signals [`ProviderError::InvalidCode`], [`ProviderError::CodeExpired`]
    /// or [`ProviderError::PasswordRequired`] as appropriate.
    async fn submit_login_code(
        &self,
        phone: &str,
        verification: &CodeVerification,
        code: &str,
    ) -> ProviderResult<()>;

    /// Complete a login that requires the two-step verification password
    async fn submit_password(&self, password: &str) -> ProviderResult<()>;

    /// Export a credential that restores this login without a new handshake
    async fn export_credential(&self) -> ProviderResult<String>;
}

/// Real-time call layer bound to one connection
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Start the call layer
    async fn start(&self) -> ProviderResult<()>;

    /// Stop the call layer
    async fn stop(&self) -> ProviderResult<()>;

    /// Whether the call layer is running
    fn is_connected(&self) -> bool;

    /// Join the live call of a channel
    async fn join_channel(
        &self,
        channel: ChannelId,
        media: &MediaSpec,
        auto_invite: bool,
    ) -> ProviderResult<()>;

    /// Leave the live call of a channel
    async fn leave_channel(&self, channel: ChannelId) -> ProviderResult<()>;

    /// Whether the channel currently hosts a live call
    async fn query_active_call(&self, channel: ChannelId) -> ProviderResult<bool>;
}

/// Creates provider objects; holds the api identity and secret
pub trait ProviderFactory: Send + Sync {
    /// Instantiate a connection without connecting it
    ///
    /// `credential` is `None` for a fresh, unauthenticated connection used by
    /// the login flow. A malformed credential fails here.
    fn open_session(
        &self,
        name: &str,
        credential: Option<&str>,
    ) -> ProviderResult<Arc<dyn MessagingConnection>>;

    /// Bind a call layer to an existing connection
    fn call_control(
        &self,
        connection: Arc<dyn MessagingConnection>,
    ) -> ProviderResult<Arc<dyn CallControl>>;
}
