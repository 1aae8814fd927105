//! Call coordinator
//!
//! Brings every session of the pool into the live call of one channel, and
//! out of it again. The channel reference is parsed once for the whole
//! request; resolution to a channel id happens per session, through that
//! session's own connection, so each account only reaches channels it can
//! actually see.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::calls::active::{ActiveCall, ActiveCalls};
use crate::calls::channel::parse_channel_reference;
use crate::calls::policy::{JoinPolicy, join_with_fallback};
use crate::config::CallSettings;
use crate::error::{FleetError, FleetResult};
use crate::events::{EventBus, FleetEvent};
use crate::pool::{BulkReport, ClientHandle, SessionOutcome, SessionPool};

/// Joins and leaves channel calls on behalf of the whole pool
pub struct CallCoordinator {
    pool: Arc<SessionPool>,
    settings: CallSettings,
    policy: JoinPolicy,
}

impl CallCoordinator {
    pub fn new(pool: Arc<SessionPool>, settings: CallSettings) -> Self {
        let policy = JoinPolicy::default()
            .with_fallback_delay(settings.fallback_delay)
            .with_start_notice(settings.start_notice.clone());
        Self {
            pool,
            settings,
            policy,
        }
    }

    pub fn settings(&self) -> &CallSettings {
        &self.settings
    }

    pub fn active_calls(&self) -> &Arc<ActiveCalls> {
        self.pool.active_calls()
    }

    /// Join the live call of `reference` with every session
    ///
    /// An unparsable reference fails the whole request before any session
    /// is touched. Otherwise every session gets exactly one outcome.
    pub async fn join_all(&self, reference: &str) -> FleetResult<BulkReport> {
        let channel_handle = parse_channel_reference(reference)?;
        let _guard = self.pool.begin_bulk("join_all")?;

        let handles = self.pool.handles();
        let mut report = BulkReport::new("join_all");
        info!(channel = %channel_handle, sessions = handles.len(), "Joining channel call");

        for (index, handle) in handles.iter().enumerate() {
            if index > 0 && !self.settings.join_stagger.is_zero() {
                sleep(self.settings.join_stagger).await;
            }
            let outcome = self.join_one(handle, &channel_handle).await;
            report.push(outcome);
        }

        info!(
            channel = %channel_handle,
            successful = report.successful(),
            failed = report.failed(),
            "join_all finished"
        );
        Ok(report)
    }

    async fn join_one(&self, handle: &ClientHandle, channel_handle: &str) -> SessionOutcome {
        let name = handle.name();

        // The handle list is a snapshot; skip sessions deleted since.
        if !self.pool.contains(name) {
            return SessionOutcome::failed(name, "session was deleted");
        }
        if let Some(call) = self.pool.active_calls().get(name) {
            return SessionOutcome::failed(
                name,
                format!("already in a call with {}", call.channel_title),
            );
        }

        let outcome = self.join_online(handle, channel_handle).await;

        // A delete that ran during the join already shut this handle down;
        // close whatever the join reopened.
        if !self.pool.contains(name) {
            handle.shutdown().await;
            if outcome.success {
                return SessionOutcome::failed(name, "session was deleted during join");
            }
        }
        outcome
    }

    async fn join_online(&self, handle: &ClientHandle, channel_handle: &str) -> SessionOutcome {
        let name = handle.name();
        let active_calls = self.pool.active_calls();
        let events = self.pool.events();

        match handle.bring_online().await {
            Ok(true) => events.emit(FleetEvent::SessionOnline {
                session: name.to_string(),
            }),
            Ok(false) => {}
            Err(e) => {
                warn!(session = %name, error = %e, "Session could not come online");
                return SessionOutcome::failed(name, e.to_string());
            }
        }

        let connection = handle.connection();
        let channel = match connection.resolve_channel(channel_handle).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(session = %name, channel = %channel_handle, error = %e, "Channel not resolvable");
                return SessionOutcome::failed(
                    name,
                    format!("cannot resolve {}: {}", channel_handle, e),
                );
            }
        };
        let id = channel.id;

        let calls = handle.call_control();
        match calls.query_active_call(id).await {
            Ok(true) => debug!(session = %name, channel = %id, "Channel has a live call"),
            Ok(false) => {
                debug!(session = %name, channel = %id, "No live call yet, announcing one");
                if let Err(e) = connection.send_message(id, &self.policy.start_notice).await {
                    debug!(session = %name, channel = %id, error = %e, "Start notice not sent");
                }
                self.policy.pause().await;
            }
            Err(e) => debug!(session = %name, channel = %id, error = %e, "Live call check failed"),
        }

        let media = &self.settings.media;
        let auto_invite = self.settings.auto_invite;

        let joined = join_with_fallback(
            &self.policy,
            move || calls.join_channel(id, media, auto_invite),
            move |message| async move { connection.send_message(id, &message).await },
        )
        .await;

        let joined = match joined {
            Ok(joined) => joined,
            Err(e) => {
                warn!(session = %name, channel = %id, error = %e, "Join failed");
                return SessionOutcome::failed(name, format!("could not join: {}", e));
            }
        };

        if !self.pool.contains(name) {
            if let Err(e) = calls.leave_channel(id).await {
                debug!(session = %name, error = %e, "Leaving call of deleted session failed");
            }
            return SessionOutcome::failed(name, "session was deleted during join");
        }

        if !active_calls.insert(ActiveCall::new(name, id, &channel.title)) {
            return SessionOutcome::failed(name, "already in a call");
        }

        info!(
            session = %name,
            channel = %id,
            attempts = joined.attempts,
            fallback = joined.used_fallback,
            "Joined channel call"
        );
        events.emit(FleetEvent::CallJoined {
            session: name.to_string(),
            channel: id,
            title: channel.title.clone(),
        });

        let detail = if joined.used_fallback {
            format!("joined {} after fallback", channel.title)
        } else {
            format!("joined {}", channel.title)
        };
        SessionOutcome::ok(name, detail)
    }

    /// Leave every active call
    pub async fn leave_all(&self) -> FleetResult<BulkReport> {
        let _guard = self.pool.begin_bulk("leave_all")?;
        let active_calls = self.pool.active_calls();
        let mut report = BulkReport::new("leave_all");

        for call in active_calls.snapshot() {
            let outcome = match self.pool.get(&call.session_name) {
                Some(handle) => {
                    leave_session(&handle, active_calls, self.pool.events(), false).await
                }
                None => {
                    active_calls.remove(&call.session_name);
                    SessionOutcome::failed(&call.session_name, "session no longer tracked")
                }
            };
            report.push(outcome);
        }

        info!(
            successful = report.successful(),
            failed = report.failed(),
            "leave_all finished"
        );
        Ok(report)
    }

    /// Leave the active call of one session
    pub async fn leave_one(&self, name: &str) -> FleetResult<SessionOutcome> {
        match self.pool.get(name) {
            Some(handle) => Ok(leave_session(
                &handle,
                self.pool.active_calls(),
                self.pool.events(),
                false,
            )
            .await),
            None => Ok(SessionOutcome::failed(name, "no such session")),
        }
    }
}

/// Leave the active call of `handle`, if it has one
///
/// With `force` the call entry is dropped even when the call layer is offline
/// or reports an error, which is what stopping or deleting a session needs.
/// Without it such a call is reported as failed and kept.
pub(crate) async fn leave_session(
    handle: &ClientHandle,
    active_calls: &ActiveCalls,
    events: &EventBus,
    force: bool,
) -> SessionOutcome {
    let name = handle.name();
    let Some(call) = active_calls.get(name) else {
        return SessionOutcome::failed(name, "not in a call");
    };

    let result: FleetResult<()> = if handle.call_control_connected() {
        handle
            .call_control()
            .leave_channel(call.channel_id)
            .await
            .map_err(FleetError::from)
    } else if force {
        Ok(())
    } else {
        warn!(session = %name, channel = %call.channel_id, "Call layer offline, call kept");
        return SessionOutcome::failed(name, "call layer offline");
    };

    match result {
        Ok(()) => {
            active_calls.remove(name);
            let duration = call.elapsed();
            info!(session = %name, channel = %call.channel_id, seconds = duration.as_secs(), "Left channel call");
            events.emit(FleetEvent::CallLeft {
                session: name.to_string(),
                channel: call.channel_id,
                duration,
            });
            SessionOutcome::ok(
                name,
                format!("left {} after {}s", call.channel_title, duration.as_secs()),
            )
        }
        Err(e) => {
            if force {
                active_calls.remove(name);
            }
            warn!(session = %name, channel = %call.channel_id, error = %e, forced = force, "Leaving call failed");
            SessionOutcome::failed(name, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::RetryConfig;
    use crate::sim::SimProvider;
    use crate::store::{SessionMetadata, SqliteCredentialStore};

    async fn coordinator(provider: SimProvider, names: &[&str]) -> CallCoordinator {
        let store = SqliteCredentialStore::in_memory().await.unwrap();
        let pool = SessionPool::new(Arc::new(store), Arc::new(provider), EventBus::new())
            .with_store_retry(RetryConfig::immediate(1));
        for name in names {
            pool.add_session(name, &SimProvider::credential(name), SessionMetadata::default())
                .await
                .unwrap();
        }
        CallCoordinator::new(Arc::new(pool), CallSettings::without_delays())
    }

    #[tokio::test]
    async fn test_unparsable_reference_touches_nothing() {
        let provider = SimProvider::new();
        let coordinator = coordinator(provider.clone(), &["a"]).await;

        let result = coordinator.join_all("t.me/+secret").await;
        assert!(matches!(result, Err(FleetError::UnresolvableChannel { .. })));
        assert_eq!(provider.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_join_uses_fallback_command() {
        let provider = SimProvider::new().with_channel("foo", 7, "Foo Chat");
        provider.fail_joins("a", 1);
        let coordinator = coordinator(provider.clone(), &["a"]).await;

        let report = coordinator.join_all("@foo").await.unwrap();
        assert_eq!(report.successful(), 1);
        assert!(report.outcome("a").unwrap().detail.contains("fallback"));

        let sent: Vec<_> = provider.sent_messages().into_iter().map(|m| m.text).collect();
        assert_eq!(sent, ["🎧 Starting voice chat...", "/join", "🎧"]);
        assert!(provider.sent_messages().iter().all(|m| m.channel.0 == 7));
    }

    #[tokio::test]
    async fn test_second_join_reports_already_in_call() {
        let provider = SimProvider::new().with_channel("foo", 7, "Foo Chat");
        let coordinator = coordinator(provider, &["a"]).await;

        coordinator.join_all("@foo").await.unwrap();
        let report = coordinator.join_all("@foo").await.unwrap();

        assert_eq!(report.successful(), 0);
        assert!(report.outcome("a").unwrap().detail.starts_with("already in a call"));
        assert_eq!(coordinator.active_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_leave_one_without_call() {
        let coordinator = coordinator(SimProvider::new(), &["a"]).await;

        let outcome = coordinator.leave_one("a").await.unwrap();
        assert!(!outcome.success);
        let outcome = coordinator.leave_one("ghost").await.unwrap();
        assert!(!outcome.success);
    }
}
