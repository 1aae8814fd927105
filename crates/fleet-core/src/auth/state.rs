//! Login flow states

use std::fmt;
use std::sync::Arc;

use crate::provider::{CodeVerification, MessagingConnection, Profile};

/// Identity of the user driving a login flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally visible position of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    AwaitingName,
    AwaitingPhone,
    AwaitingCode,
    AwaitingPassword,
    /// A provider round-trip for this flow has not returned yet
    Working,
}

impl AuthStage {
    /// What the operator should enter next
    pub fn prompt(&self) -> &'static str {
        match self {
            AuthStage::AwaitingName => {
                "Enter a name for the new session (letters, digits and underscore)"
            }
            AuthStage::AwaitingPhone => {
                "Enter the phone number with country code, e.g. +989123456789"
            }
            AuthStage::AwaitingCode => "Enter the 5-digit login code",
            AuthStage::AwaitingPassword => "Enter the two-step verification password",
            AuthStage::Working => "Please wait for the previous step to finish",
        }
    }
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthStage::AwaitingName => "awaiting name",
            AuthStage::AwaitingPhone => "awaiting phone",
            AuthStage::AwaitingCode => "awaiting code",
            AuthStage::AwaitingPassword => "awaiting password",
            AuthStage::Working => "working",
        };
        f.write_str(name)
    }
}

/// Full flow state, with the data each step needs
pub(crate) enum FlowState {
    AwaitingName,
    AwaitingPhone {
        session_name: String,
    },
    AwaitingCode {
        session_name: String,
        phone_number: String,
        verification: CodeVerification,
        pending: Arc<dyn MessagingConnection>,
    },
    AwaitingPassword {
        session_name: String,
        phone_number: String,
        pending: Arc<dyn MessagingConnection>,
        attempts: u32,
    },
    /// Placeholder while a step is talking to the provider
    InFlight,
}

impl FlowState {
    pub(crate) fn stage(&self) -> AuthStage {
        match self {
            FlowState::AwaitingName => AuthStage::AwaitingName,
            FlowState::AwaitingPhone { .. } => AuthStage::AwaitingPhone,
            FlowState::AwaitingCode { .. } => AuthStage::AwaitingCode,
            FlowState::AwaitingPassword { .. } => AuthStage::AwaitingPassword,
            FlowState::InFlight => AuthStage::Working,
        }
    }

    /// Connection that has to be released when the flow goes away
    pub(crate) fn into_pending(self) -> Option<Arc<dyn MessagingConnection>> {
        match self {
            FlowState::AwaitingCode { pending, .. } | FlowState::AwaitingPassword { pending, .. } => {
                Some(pending)
            }
            _ => None,
        }
    }
}

/// A session minted by a completed flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSession {
    pub session_name: String,
    pub phone_number: String,
    pub profile: Profile,
}

/// Result of feeding one input into a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStep {
    /// Input accepted; the flow moved on to `0`
    Advanced(AuthStage),
    /// Input rejected; the flow stays where it was
    Retry { stage: AuthStage, reason: String },
    /// Session created and registered; the flow is gone
    Completed(CompletedSession),
    /// Unrecoverable failure; the flow is gone
    Failed { reason: String },
    /// The flow was cancelled or replaced while this step ran; its result
    /// was discarded
    Discarded,
}

impl FlowStep {
    /// Whether the flow is over after this step
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowStep::Completed(_) | FlowStep::Failed { .. } | FlowStep::Discarded
        )
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStep::Advanced(stage) => f.write_str(stage.prompt()),
            FlowStep::Retry { stage, reason } => write!(f, "{}. {}", reason, stage.prompt()),
            FlowStep::Completed(session) => write!(
                f,
                "Session '{}' created for {} ({})",
                session.session_name,
                session.profile.display_name_or(&session.session_name),
                session.phone_number
            ),
            FlowStep::Failed { reason } => write!(f, "Login failed: {}", reason),
            FlowStep::Discarded => f.write_str("Login flow was cancelled"),
        }
    }
}
