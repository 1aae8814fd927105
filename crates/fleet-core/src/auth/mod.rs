//! # Login flows
//!
//! Mints new session credentials through the platform's multi-step login:
//!
//! ```text
//! AwaitingName ──▶ AwaitingPhone ──▶ AwaitingCode ──┬──────────────────────▶ complete
//!                                                   └──▶ AwaitingPassword ──▶ complete
//! ```
//!
//! Every requesting user has at most one flow. Starting a new flow replaces
//! the old one, and cancelling removes it; in both cases any half-open
//! connection is disconnected.
//!
//! ## Steps and cancellation
//!
//! A step that talks to the provider first swaps the flow's state for an
//! in-flight marker, performs the round-trip without holding any lock, and
//! then puts the next state back only if the same flow is still registered.
//! A flow cancelled or replaced in the meantime therefore never resurrects:
//! the finished step discards its result and releases the connection it
//! holds. While a step is in flight, further input for that user is refused
//! with [`FleetError::FlowBusy`].
//!
//! Wrong two-step passwords are tolerated a bounded number of times; after
//! that the flow fails.

mod state;
pub mod validation;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FleetError, FleetResult};
use crate::events::FleetEvent;
use crate::pool::SessionPool;
use crate::provider::{MessagingConnection, ProviderError};
use crate::store::SessionMetadata;

pub(crate) use state::FlowState;
pub use state::{AuthStage, CompletedSession, FlowStep, UserId};
use validation::{validate_login_code, validate_phone_number, validate_session_name};

/// Default number of wrong passwords before a flow fails
pub const DEFAULT_MAX_PASSWORD_ATTEMPTS: u32 = 3;

struct FlowSlot {
    id: Uuid,
    state: FlowState,
}

/// What a step wants done with its flow
enum Transition {
    /// Keep the flow, in this state
    Continue(FlowState, FlowStep),
    /// Remove the flow
    Finish(FlowStep),
}

/// Registry of in-progress login flows, one per user
pub struct AuthFlows {
    flows: DashMap<UserId, FlowSlot>,
    pool: Arc<SessionPool>,
    max_password_attempts: u32,
}

impl AuthFlows {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self {
            flows: DashMap::new(),
            pool,
            max_password_attempts: DEFAULT_MAX_PASSWORD_ATTEMPTS,
        }
    }

    pub fn with_max_password_attempts(mut self, attempts: u32) -> Self {
        self.max_password_attempts = attempts.max(1);
        self
    }

    /// Start a flow for `user`, replacing any flow they already have
    pub async fn begin(&self, user: UserId) -> AuthStage {
        let slot = FlowSlot {
            id: Uuid::new_v4(),
            state: FlowState::AwaitingName,
        };

        if let Some(previous) = self.flows.insert(user, slot) {
            debug!(user = %user, "Replacing unfinished login flow");
            release(previous.state.into_pending()).await;
        }

        info!(user = %user, "Login flow started");
        AuthStage::AwaitingName
    }

    /// Current stage of `user`'s flow
    pub fn stage(&self, user: UserId) -> Option<AuthStage> {
        self.flows.get(&user).map(|slot| slot.state.stage())
    }

    pub fn is_active(&self, user: UserId) -> bool {
        self.flows.contains_key(&user)
    }

    /// Number of open flows
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Drop `user`'s flow and release its connection
    ///
    /// Returns `false` when there was no flow. A step that is still in flight
    /// finishes on its own and then discards its result.
    pub async fn cancel(&self, user: UserId) -> bool {
        let Some((_, slot)) = self.flows.remove(&user) else {
            return false;
        };

        release(slot.state.into_pending()).await;
        info!(user = %user, "Login flow cancelled");
        self.pool.events().emit(FleetEvent::AuthFlowFinished {
            user: user.0,
            session: None,
            success: false,
        });
        true
    }

    /// Feed one line of operator input into `user`'s flow
    pub async fn submit(&self, user: UserId, input: &str) -> FleetResult<FlowStep> {
        let (id, state) = {
            let mut slot = self
                .flows
                .get_mut(&user)
                .ok_or(FleetError::NoActiveFlow { user: user.0 })?;
            if matches!(slot.state, FlowState::InFlight) {
                return Err(FleetError::FlowBusy { user: user.0 });
            }
            (slot.id, std::mem::replace(&mut slot.state, FlowState::InFlight))
        };

        let transition = self.advance(user, id, state, input.trim()).await;
        Ok(self.commit(user, id, transition).await)
    }

    async fn commit(&self, user: UserId, id: Uuid, transition: Transition) -> FlowStep {
        match transition {
            Transition::Continue(state, step) => {
                let leftover = match self.flows.get_mut(&user) {
                    Some(mut slot) if slot.id == id => {
                        slot.state = state;
                        None
                    }
                    _ => Some(state),
                };

                match leftover {
                    None => step,
                    Some(state) => {
                        debug!(user = %user, "Login flow went away during step, discarding result");
                        release(state.into_pending()).await;
                        FlowStep::Discarded
                    }
                }
            }
            Transition::Finish(step) => {
                let removed = self.flows.remove_if(&user, |_, slot| slot.id == id).is_some();
                if !removed && !matches!(step, FlowStep::Completed(_)) {
                    return FlowStep::Discarded;
                }

                let (session, success) = match &step {
                    FlowStep::Completed(done) => (Some(done.session_name.clone()), true),
                    _ => (None, false),
                };
                self.pool.events().emit(FleetEvent::AuthFlowFinished {
                    user: user.0,
                    session,
                    success,
                });
                step
            }
        }
    }

    fn is_current(&self, user: UserId, id: Uuid) -> bool {
        self.flows.get(&user).is_some_and(|slot| slot.id == id)
    }

    async fn advance(&self, user: UserId, id: Uuid, state: FlowState, input: &str) -> Transition {
        match state {
            FlowState::AwaitingName => self.on_name(input).await,
            FlowState::AwaitingPhone { session_name } => self.on_phone(session_name, input).await,
            FlowState::AwaitingCode {
                session_name,
                phone_number,
                verification,
                pending,
            } => {
                let code = match validate_login_code(input) {
                    Ok(code) => code,
                    Err(e) => {
                        let state = FlowState::AwaitingCode {
                            session_name,
                            phone_number,
                            verification,
                            pending,
                        };
                        return retry(state, e);
                    }
                };

                match pending
                    .submit_login_code(&phone_number, &verification, code)
                    .await
                {
                    Ok(()) => self.complete(user, id, session_name, phone_number, pending).await,
                    Err(ProviderError::PasswordRequired) => {
                        debug!(user = %user, "Two-step verification required");
                        Transition::Continue(
                            FlowState::AwaitingPassword {
                                session_name,
                                phone_number,
                                pending,
                                attempts: 0,
                            },
                            FlowStep::Advanced(AuthStage::AwaitingPassword),
                        )
                    }
                    Err(ProviderError::InvalidCode) => {
                        let state = FlowState::AwaitingCode {
                            session_name,
                            phone_number,
                            verification,
                            pending,
                        };
                        retry(state, ProviderError::InvalidCode)
                    }
                    Err(e) => {
                        warn!(user = %user, error = %e, "Login code rejected, aborting flow");
                        release(Some(pending)).await;
                        failed(e)
                    }
                }
            }
            FlowState::AwaitingPassword {
                session_name,
                phone_number,
                pending,
                attempts,
            } => {
                if input.is_empty() {
                    let state = FlowState::AwaitingPassword {
                        session_name,
                        phone_number,
                        pending,
                        attempts,
                    };
                    return retry(state, "password is empty");
                }

                match pending.submit_password(input).await {
                    Ok(()) => self.complete(user, id, session_name, phone_number, pending).await,
                    Err(e) => {
                        let attempts = attempts + 1;
                        if attempts >= self.max_password_attempts {
                            warn!(user = %user, attempts, "Too many wrong passwords, aborting flow");
                            release(Some(pending)).await;
                            return failed(format!("{} after {} attempts", e, attempts));
                        }

                        let left = self.max_password_attempts - attempts;
                        let state = FlowState::AwaitingPassword {
                            session_name,
                            phone_number,
                            pending,
                            attempts,
                        };
                        retry(state, format!("{} ({} attempts left)", e, left))
                    }
                }
            }
            FlowState::InFlight => failed(FleetError::FlowBusy { user: user.0 }),
        }
    }

    async fn on_name(&self, input: &str) -> Transition {
        let name = match validate_session_name(input) {
            Ok(name) => name,
            Err(e) => return retry(FlowState::AwaitingName, e),
        };

        match self.pool.is_name_taken(name).await {
            Ok(false) => Transition::Continue(
                FlowState::AwaitingPhone {
                    session_name: name.to_string(),
                },
                FlowStep::Advanced(AuthStage::AwaitingPhone),
            ),
            Ok(true) => retry(FlowState::AwaitingName, FleetError::session_exists(name)),
            Err(e) => retry(FlowState::AwaitingName, e),
        }
    }

    async fn on_phone(&self, session_name: String, input: &str) -> Transition {
        let phone = match validate_phone_number(input) {
            Ok(phone) => phone,
            Err(e) => return retry(FlowState::AwaitingPhone { session_name }, e),
        };

        let connection = match self.pool.factory().open_session(&session_name, None) {
            Ok(connection) => connection,
            Err(e) => return failed(e),
        };
        if let Err(e) = connection.connect().await {
            warn!(session = %session_name, error = %e, "Could not open login connection");
            return failed(e);
        }

        match connection.request_login_code(phone).await {
            Ok(verification) => {
                debug!(session = %session_name, "Login code requested");
                Transition::Continue(
                    FlowState::AwaitingCode {
                        session_name,
                        phone_number: phone.to_string(),
                        verification,
                        pending: connection,
                    },
                    FlowStep::Advanced(AuthStage::AwaitingCode),
                )
            }
            Err(e) => {
                warn!(session = %session_name, error = %e, "Login code request rejected");
                release(Some(connection)).await;
                failed(e)
            }
        }
    }

    /// Export the credential of a logged-in connection and register it
    async fn complete(
        &self,
        user: UserId,
        id: Uuid,
        session_name: String,
        phone_number: String,
        pending: Arc<dyn MessagingConnection>,
    ) -> Transition {
        let exported = async {
            let profile = pending.self_profile().await?;
            let credential = pending.export_credential().await?;
            Ok::<_, ProviderError>((profile, credential))
        }
        .await;
        release(Some(pending)).await;

        let (profile, credential) = match exported {
            Ok(exported) => exported,
            Err(e) => {
                warn!(session = %session_name, error = %e, "Could not export credential");
                return failed(e);
            }
        };

        if !self.is_current(user, id) {
            return Transition::Finish(FlowStep::Discarded);
        }

        let metadata = SessionMetadata {
            phone_number: phone_number.clone(),
            display_name: profile.first_name.clone(),
            handle_name: profile.username.clone().unwrap_or_default(),
        };

        match self.pool.add_session(&session_name, &credential, metadata).await {
            Ok(_) => {
                info!(user = %user, session = %session_name, "Login flow completed");
                Transition::Finish(FlowStep::Completed(CompletedSession {
                    session_name,
                    phone_number,
                    profile,
                }))
            }
            Err(e) => {
                warn!(session = %session_name, error = %e, "Could not register new session");
                failed(e)
            }
        }
    }
}

fn retry(state: FlowState, reason: impl ToString) -> Transition {
    let stage = state.stage();
    Transition::Continue(
        state,
        FlowStep::Retry {
            stage,
            reason: reason.to_string(),
        },
    )
}

fn failed(reason: impl ToString) -> Transition {
    Transition::Finish(FlowStep::Failed {
        reason: reason.to_string(),
    })
}

async fn release(connection: Option<Arc<dyn MessagingConnection>>) {
    if let Some(connection) = connection {
        if let Err(e) = connection.disconnect().await {
            debug!(error = %e, "Failed to release login connection");
        }
    }
}
