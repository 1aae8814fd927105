//! Session pool manager
//!
//! Owns every [`ClientHandle`] and is the only component that opens or
//! closes their connections. Bulk operations walk the handles one after the
//! other and isolate failures per session.
//!
//! Locks here are synchronous and never held across an `.await`: the handle
//! map is snapshotted (cheap `Arc` clones) before any provider call, and
//! structural changes are made before or after a suspension point, never
//! across one.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::calls::{ActiveCalls, leave_session};
use crate::error::{FleetError, FleetResult};
use crate::events::{EventBus, FleetEvent};
use crate::pool::bulk::{BulkGuard, BulkLock};
use crate::pool::handle::ClientHandle;
use crate::pool::report::{BulkReport, SessionOutcome, SessionStatus};
use crate::provider::ProviderFactory;
use crate::recovery::{RetryConfig, retry_with_backoff};
use crate::store::{CredentialStore, SessionMetadata, SessionRecord};

/// Collection of client handles backed by a credential store
pub struct SessionPool {
    handles: RwLock<BTreeMap<String, Arc<ClientHandle>>>,
    store: Arc<dyn CredentialStore>,
    factory: Arc<dyn ProviderFactory>,
    active_calls: Arc<ActiveCalls>,
    bulk: BulkLock,
    store_retry: RetryConfig,
    events: EventBus,
}

impl SessionPool {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        factory: Arc<dyn ProviderFactory>,
        events: EventBus,
    ) -> Self {
        Self {
            handles: RwLock::new(BTreeMap::new()),
            store,
            factory,
            active_calls: Arc::new(ActiveCalls::new()),
            bulk: BulkLock::new(),
            store_retry: RetryConfig::quick(),
            events,
        }
    }

    /// Override the retry policy applied to store writes
    pub fn with_store_retry(mut self, retry: RetryConfig) -> Self {
        self.store_retry = retry;
        self
    }

    pub fn active_calls(&self) -> &Arc<ActiveCalls> {
        &self.active_calls
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn factory(&self) -> &Arc<dyn ProviderFactory> {
        &self.factory
    }

    /// Claim the pool for a bulk operation
    pub fn begin_bulk(&self, operation: &'static str) -> FleetResult<BulkGuard<'_>> {
        self.bulk.try_acquire(operation)
    }

    /// Bulk operation currently running, if any
    pub fn running_bulk_operation(&self) -> Option<&'static str> {
        self.bulk.running()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClientHandle>> {
        self.handles.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }

    /// Session names, sorted
    pub fn names(&self) -> Vec<String> {
        self.handles.read().keys().cloned().collect()
    }

    /// Snapshot of every handle, sorted by name
    pub fn handles(&self) -> Vec<Arc<ClientHandle>> {
        self.handles.read().values().cloned().collect()
    }

    /// Whether `name` is tracked in memory or persisted
    pub async fn is_name_taken(&self, name: &str) -> FleetResult<bool> {
        if self.contains(name) {
            return Ok(true);
        }
        Ok(self.store.get(name).await?.is_some())
    }

    /// Number of persisted sessions
    pub async fn stored_count(&self) -> FleetResult<usize> {
        Ok(self.store.load_all().await?.len())
    }

    /// Instantiate a handle for every stored session, without connecting
    ///
    /// Sessions already tracked are left alone. A record whose credential
    /// cannot be instantiated is skipped and reported. Failing to read the
    /// store at all is an error.
    pub async fn load_all(&self) -> FleetResult<BulkReport> {
        let records = self.store.load_all().await?;
        let mut report = BulkReport::new("load_all");

        for record in records {
            if self.contains(&record.name) {
                report.push(SessionOutcome::ok(&record.name, "already loaded"));
                continue;
            }

            match ClientHandle::instantiate(
                self.factory.as_ref(),
                &record.name,
                &record.credential,
                record.metadata(),
            ) {
                Ok(handle) => {
                    let detail = format!("loaded ({})", handle.display_name());
                    self.handles
                        .write()
                        .entry(record.name.clone())
                        .or_insert_with(|| Arc::new(handle));
                    debug!(session = %record.name, "Session loaded");
                    report.push(SessionOutcome::ok(&record.name, detail));
                }
                Err(e) => {
                    warn!(session = %record.name, error = %e, "Skipping unusable session");
                    report.push(SessionOutcome::failed(&record.name, e.to_string()));
                }
            }
        }

        info!(
            loaded = report.successful(),
            skipped = report.failed(),
            "Sessions loaded from store"
        );
        Ok(report)
    }

    /// Connect every handle and start its call layer
    pub async fn start_all(&self) -> FleetResult<BulkReport> {
        let _guard = self.begin_bulk("start_all")?;
        let mut report = BulkReport::new("start_all");

        for handle in self.handles() {
            let name = handle.name().to_string();
            match handle.bring_online().await {
                Ok(true) => {
                    info!(session = %name, "Session started");
                    self.events.emit(FleetEvent::SessionOnline {
                        session: name.clone(),
                    });
                    report.push(SessionOutcome::ok(name, "online"));
                }
                Ok(false) => report.push(SessionOutcome::ok(name, "already online")),
                Err(e) => {
                    warn!(session = %name, error = %e, "Session failed to start");
                    report.push(SessionOutcome::failed(name, e.to_string()));
                }
            }
        }

        info!(
            successful = report.successful(),
            failed = report.failed(),
            "start_all finished"
        );
        Ok(report)
    }

    /// Leave every call, then stop every call layer, then close every connection
    ///
    /// One outcome per handle; a session fails when any of its phases failed.
    pub async fn stop_all(&self) -> FleetResult<BulkReport> {
        let _guard = self.begin_bulk("stop_all")?;
        Ok(self.stop_handles().await)
    }

    async fn stop_handles(&self) -> BulkReport {
        let handles = self.handles();
        let mut problems: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for handle in &handles {
            if self.active_calls.contains(handle.name()) {
                let outcome =
                    leave_session(handle, &self.active_calls, &self.events, true).await;
                if !outcome.success {
                    problems
                        .entry(outcome.session)
                        .or_default()
                        .push(format!("leave: {}", outcome.detail));
                }
            }
        }

        for handle in &handles {
            if let Err(e) = handle.stop_calls().await {
                problems
                    .entry(handle.name().to_string())
                    .or_default()
                    .push(format!("call layer: {}", e));
            }
        }

        let mut report = BulkReport::new("stop_all");
        for handle in &handles {
            let name = handle.name().to_string();
            let was_connected = handle.is_connected();
            if let Err(e) = handle.disconnect().await {
                problems
                    .entry(name.clone())
                    .or_default()
                    .push(format!("disconnect: {}", e));
            }

            match problems.remove(&name) {
                Some(errors) => {
                    warn!(session = %name, errors = ?errors, "Session did not stop cleanly");
                    report.push(SessionOutcome::failed(name, errors.join("; ")));
                }
                None if was_connected => {
                    self.events.emit(FleetEvent::SessionOffline {
                        session: name.clone(),
                    });
                    report.push(SessionOutcome::ok(name, "stopped"));
                }
                None => report.push(SessionOutcome::ok(name, "already stopped")),
            }
        }

        info!(
            successful = report.successful(),
            failed = report.failed(),
            "stop_all finished"
        );
        report
    }

    /// Persist a new session, then register its handle
    ///
    /// The record is written before the handle becomes visible, so a failed
    /// write never leaves an unpersisted session in the pool.
    pub async fn add_session(
        &self,
        name: &str,
        credential: &str,
        metadata: SessionMetadata,
    ) -> FleetResult<Arc<ClientHandle>> {
        if self.contains(name) {
            return Err(FleetError::session_exists(name));
        }

        let handle = Arc::new(ClientHandle::instantiate(
            self.factory.as_ref(),
            name,
            credential,
            metadata.clone(),
        )?);

        let record = SessionRecord::new(name, credential).with_metadata(metadata);
        let (store, record) = (&self.store, &record);
        retry_with_backoff("save_session", self.store_retry.clone(), move || store.save(record))
            .await
            .inspect_err(|e| error!(session = %name, error = %e, "Failed to persist session"))?;

        {
            let mut handles = self.handles.write();
            if handles.contains_key(name) {
                return Err(FleetError::session_exists(name));
            }
            handles.insert(name.to_string(), Arc::clone(&handle));
        }

        info!(session = %name, "Session added");
        self.events.emit(FleetEvent::SessionAdded {
            session: name.to_string(),
        });
        Ok(handle)
    }

    /// Remove a session from the store and the pool
    ///
    /// A store failure aborts the deletion with nothing else touched. A
    /// record that never loaded is still removed and reported as such. A
    /// name known to neither side is an unsuccessful outcome, not an error.
    pub async fn delete_session(&self, name: &str) -> FleetResult<SessionOutcome> {
        let store = &self.store;
        let stored = retry_with_backoff("delete_session", self.store_retry.clone(), move || {
            store.get(name)
        })
        .await?
        .is_some();
        retry_with_backoff("delete_session", self.store_retry.clone(), move || store.delete(name))
            .await?;

        let Some(handle) = self.handles.write().remove(name) else {
            self.active_calls.remove(name);
            if stored {
                info!(session = %name, "Stored record of an unloaded session deleted");
                return Ok(SessionOutcome::ok(name, "stored record removed"));
            }
            debug!(session = %name, "Delete requested for unknown session");
            return Ok(SessionOutcome::failed(name, "no such session"));
        };

        if self.active_calls.contains(name) {
            leave_session(&handle, &self.active_calls, &self.events, true).await;
        }
        handle.shutdown().await;

        info!(session = %name, "Session deleted");
        self.events.emit(FleetEvent::SessionRemoved {
            session: name.to_string(),
        });
        Ok(SessionOutcome::ok(name, "deleted"))
    }

    /// Connectivity of every handle; never mutates anything
    pub fn status(&self) -> Vec<SessionStatus> {
        self.handles()
            .iter()
            .map(|handle| SessionStatus {
                name: handle.name().to_string(),
                display_name: handle.display_name().to_string(),
                phone_number: handle.metadata().phone_number.clone(),
                connected: handle.is_connected(),
                call_control_connected: handle.call_control_connected(),
                in_call: self
                    .active_calls
                    .get(handle.name())
                    .map(|call| (call.channel_title.clone(), call.elapsed())),
            })
            .collect()
    }

    /// Stop everything and drop every handle
    pub async fn shutdown(&self) -> FleetResult<BulkReport> {
        let _guard = self.begin_bulk("shutdown")?;
        let report = self.stop_handles().await;
        self.handles.write().clear();
        info!("Session pool shut down");
        Ok(report)
    }
}
