//! Fleet orchestrator
//!
//! [`Fleet`] ties the credential store, the session pool, the call
//! coordinator and the login flows together. It is the one object a front
//! end holds; nothing in the crate keeps global state.
//!
//! ```rust
//! use voicefleet_core::{Fleet, FleetConfig, UserId};
//! use voicefleet_core::sim::SimProvider;
//! use voicefleet_core::store::SqliteCredentialStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> voicefleet_core::FleetResult<()> {
//! let mut config = FleetConfig::default();
//! config.owner_id = 7;
//!
//! let fleet = Fleet::builder(config)
//!     .with_store(Arc::new(SqliteCredentialStore::in_memory().await?))
//!     .with_provider(Arc::new(SimProvider::new()))
//!     .build()
//!     .await?;
//!
//! fleet.authorize(UserId(7))?;
//! let report = fleet.start_all().await?;
//! assert!(report.is_empty());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::auth::{AuthFlows, AuthStage, FlowStep, UserId};
use crate::calls::CallCoordinator;
use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::events::{EventBus, TimedEvent};
use crate::pool::{BulkReport, SessionOutcome, SessionPool, SessionStatus};
use crate::provider::ProviderFactory;
use crate::recovery::RetryConfig;
use crate::store::{CredentialStore, SqliteCredentialStore};

/// Builder for [`Fleet`]
pub struct FleetBuilder {
    config: FleetConfig,
    store: Option<Arc<dyn CredentialStore>>,
    provider: Option<Arc<dyn ProviderFactory>>,
    store_retry: RetryConfig,
}

impl FleetBuilder {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            config,
            store: None,
            provider: None,
            store_retry: RetryConfig::quick(),
        }
    }

    /// Use this store instead of opening `config.database_url`
    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Protocol backend; required
    pub fn with_provider(mut self, provider: Arc<dyn ProviderFactory>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Retry policy for store writes
    pub fn with_store_retry(mut self, retry: RetryConfig) -> Self {
        self.store_retry = retry;
        self
    }

    /// Open the store and assemble the fleet
    ///
    /// Sessions are not loaded yet; call [`Fleet::load_sessions`].
    pub async fn build(self) -> FleetResult<Fleet> {
        let provider = self.provider.ok_or_else(|| {
            FleetError::invalid_configuration("provider", "no protocol backend configured")
        })?;

        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteCredentialStore::open(&self.config.database_url).await?),
        };

        let events = EventBus::new();
        let pool = Arc::new(
            SessionPool::new(store, provider, events.clone()).with_store_retry(self.store_retry),
        );
        let calls = CallCoordinator::new(Arc::clone(&pool), self.config.calls.clone());
        let auth = AuthFlows::new(Arc::clone(&pool))
            .with_max_password_attempts(self.config.max_password_attempts);

        Ok(Fleet {
            config: self.config,
            pool,
            calls,
            auth,
            events,
        })
    }
}

/// One active call as shown in the overview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    pub session: String,
    pub channel_title: String,
    pub duration: Duration,
}

/// Aggregate fleet state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetOverview {
    /// Handles in the pool
    pub loaded: usize,
    /// Records in the credential store
    pub stored: usize,
    pub online: usize,
    pub call_control_online: usize,
    pub in_call: usize,
    pub calls: Vec<CallSummary>,
}

impl fmt::Display for FleetOverview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sessions loaded:     {}", self.loaded)?;
        writeln!(f, "sessions stored:     {}", self.stored)?;
        writeln!(f, "connected:           {}", self.online)?;
        writeln!(f, "call layer running:  {}", self.call_control_online)?;
        write!(f, "in a call:           {}", self.in_call)?;
        for call in &self.calls {
            let secs = call.duration.as_secs();
            write!(
                f,
                "\n  {} in {} for {}m{:02}s",
                call.session,
                call.channel_title,
                secs / 60,
                secs % 60
            )?;
        }
        Ok(())
    }
}

/// The orchestrator
pub struct Fleet {
    config: FleetConfig,
    pool: Arc<SessionPool>,
    calls: CallCoordinator,
    auth: AuthFlows,
    events: EventBus,
}

impl Fleet {
    pub fn builder(config: FleetConfig) -> FleetBuilder {
        FleetBuilder::new(config)
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn calls(&self) -> &CallCoordinator {
        &self.calls
    }

    pub fn auth(&self) -> &AuthFlows {
        &self.auth
    }

    /// Receive lifecycle events from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<TimedEvent> {
        self.events.subscribe()
    }

    /// Only the configured operator may drive the fleet
    pub fn authorize(&self, user: UserId) -> FleetResult<()> {
        if user.0 == self.config.owner_id {
            Ok(())
        } else {
            warn!(user = %user, "Rejected request from unauthorized user");
            Err(FleetError::NotAuthorized { user: user.0 })
        }
    }

    /// Restore every stored session into the pool
    pub async fn load_sessions(&self) -> FleetResult<BulkReport> {
        self.pool.load_all().await
    }

    pub async fn start_all(&self) -> FleetResult<BulkReport> {
        self.pool.start_all().await
    }

    pub async fn stop_all(&self) -> FleetResult<BulkReport> {
        self.pool.stop_all().await
    }

    pub async fn join_all(&self, reference: &str) -> FleetResult<BulkReport> {
        self.calls.join_all(reference).await
    }

    pub async fn leave_all(&self) -> FleetResult<BulkReport> {
        self.calls.leave_all().await
    }

    pub async fn leave_one(&self, name: &str) -> FleetResult<SessionOutcome> {
        self.calls.leave_one(name).await
    }

    pub async fn delete_session(&self, name: &str) -> FleetResult<SessionOutcome> {
        self.pool.delete_session(name).await
    }

    pub async fn begin_login(&self, user: UserId) -> AuthStage {
        self.auth.begin(user).await
    }

    pub async fn submit_login(&self, user: UserId, input: &str) -> FleetResult<FlowStep> {
        self.auth.submit(user, input).await
    }

    pub async fn cancel_login(&self, user: UserId) -> bool {
        self.auth.cancel(user).await
    }

    pub fn session_names(&self) -> Vec<String> {
        self.pool.names()
    }

    pub fn status(&self) -> Vec<SessionStatus> {
        self.pool.status()
    }

    /// Counts and active calls across the whole fleet
    pub async fn overview(&self) -> FleetResult<FleetOverview> {
        let status = self.pool.status();
        let stored = self.pool.stored_count().await?;

        let calls: Vec<CallSummary> = self
            .pool
            .active_calls()
            .snapshot()
            .into_iter()
            .map(|call| CallSummary {
                duration: call.elapsed(),
                session: call.session_name,
                channel_title: call.channel_title,
            })
            .collect();

        Ok(FleetOverview {
            loaded: status.len(),
            stored,
            online: status.iter().filter(|s| s.connected).count(),
            call_control_online: status.iter().filter(|s| s.call_control_connected).count(),
            in_call: calls.len(),
            calls,
        })
    }

    /// Leave every call, close every connection and empty the pool
    pub async fn shutdown(&self) -> FleetResult<BulkReport> {
        let report = self.pool.shutdown().await?;
        info!(sessions = report.len(), "Fleet shut down");
        Ok(report)
    }
}
