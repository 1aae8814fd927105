//! Session pool lifecycle: persistence, restore, start/stop and delete

mod common;

use std::sync::Arc;

use common::{add_sessions, fleet_with, memory_fleet, temp_database, test_config};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use voicefleet_core::recovery::RetryConfig;
use voicefleet_core::sim::SimProvider;
use voicefleet_core::store::CredentialStore;
use voicefleet_core::{
    FleetError, FleetEvent, SessionMetadata, SessionPool, SessionRecord, SqliteCredentialStore,
};

#[tokio::test]
async fn added_session_survives_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.database_url = temp_database(&dir);
    let provider = SimProvider::new();

    {
        let fleet = fleet_with(&provider, config.clone()).await;
        let metadata = SessionMetadata {
            phone_number: "+15550001".into(),
            display_name: "First".into(),
            handle_name: "first_handle".into(),
        };
        fleet
            .pool()
            .add_session("first", &SimProvider::credential("first"), metadata)
            .await
            .unwrap();
    }

    let fleet = fleet_with(&provider, config).await;
    assert!(fleet.session_names().is_empty());

    let report = fleet.load_sessions().await.unwrap();
    assert_eq!(report.successful(), 1);
    assert_eq!(fleet.session_names(), vec!["first".to_string()]);

    let handle = fleet.pool().get("first").unwrap();
    assert_eq!(handle.display_name(), "First");

    // The restored credential is good enough to come online.
    let report = fleet.start_all().await.unwrap();
    assert_eq!(report.successful(), 1);
}

#[tokio::test]
async fn duplicate_add_keeps_one_record_and_one_handle() {
    let provider = SimProvider::new();
    let fleet = memory_fleet(&provider).await;
    let credential = SimProvider::credential("dup");

    assert_ok!(
        fleet
            .pool()
            .add_session("dup", &credential, SessionMetadata::default())
            .await
    );
    let second = fleet
        .pool()
        .add_session("dup", &credential, SessionMetadata::default())
        .await;

    assert!(matches!(second, Err(FleetError::SessionExists { .. })));
    assert_eq!(fleet.pool().stored_count().await.unwrap(), 1);
    assert_eq!(fleet.session_names(), vec!["dup".to_string()]);
}

#[tokio::test]
async fn load_skips_malformed_credentials() {
    let store = Arc::new(SqliteCredentialStore::in_memory().await.unwrap());
    store
        .save(&SessionRecord::new("good", SimProvider::credential("good")))
        .await
        .unwrap();
    store
        .save(&SessionRecord::new("broken", "not-a-credential"))
        .await
        .unwrap();

    let pool = SessionPool::new(store, Arc::new(SimProvider::new()), Default::default());
    let report = pool.load_all().await.unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report.successful(), 1);
    assert!(!report.outcome("broken").unwrap().success);
    assert_eq!(pool.names(), vec!["good".to_string()]);

    // Loading again leaves existing handles alone.
    let report = pool.load_all().await.unwrap();
    assert_eq!(report.outcome("good").unwrap().detail, "already loaded");
    assert_eq!(pool.len(), 1);
}

#[tokio::test]
async fn start_all_isolates_a_failing_session() {
    let provider = SimProvider::new();
    let fleet = memory_fleet(&provider).await;
    add_sessions(&fleet, &["s1", "s2", "s3", "s4", "s5"]).await;
    provider.fail_connect("s3");

    let report = fleet.start_all().await.unwrap();

    assert_eq!(report.len(), 5);
    assert_eq!(report.successful(), 4);
    assert_eq!(report.failed(), 1);
    assert!(!report.outcome("s3").unwrap().success);

    let online: Vec<_> = fleet
        .status()
        .into_iter()
        .filter(|s| s.connected)
        .map(|s| s.name)
        .collect();
    assert_eq!(online, vec!["s1", "s2", "s4", "s5"]);
}

#[tokio::test]
async fn start_all_reports_failing_call_layer() {
    let provider = SimProvider::new();
    let fleet = memory_fleet(&provider).await;
    add_sessions(&fleet, &["a", "b"]).await;
    provider.fail_call_start("b");

    let report = fleet.start_all().await.unwrap();
    assert_eq!(report.successful(), 1);

    let status = fleet.status();
    let b = status.iter().find(|s| s.name == "b").unwrap();
    assert!(b.connected);
    assert!(!b.call_control_connected);
}

#[tokio::test]
async fn stop_all_takes_everything_down() {
    let provider = SimProvider::new().with_channel("room", 10, "Room");
    let fleet = memory_fleet(&provider).await;
    add_sessions(&fleet, &["a", "b"]).await;

    fleet.join_all("@room").await.unwrap();
    assert_eq!(fleet.pool().active_calls().len(), 2);

    let report = fleet.stop_all().await.unwrap();
    assert_eq!(report.len(), 2);
    assert_eq!(report.successful(), 2);
    assert!(fleet.pool().active_calls().is_empty());
    assert_eq!(provider.open_connections(), 0);
    assert!(provider.joined_channel("a").is_none());
}

#[tokio::test]
async fn delete_removes_handle_call_and_record() {
    let provider = SimProvider::new().with_channel("room", 10, "Room");
    let fleet = memory_fleet(&provider).await;
    add_sessions(&fleet, &["keep", "gone"]).await;
    fleet.join_all("t.me/room").await.unwrap();

    let outcome = fleet.delete_session("gone").await.unwrap();
    assert!(outcome.success);

    assert!(fleet.status().iter().all(|s| s.name != "gone"));
    assert!(fleet.pool().active_calls().get("gone").is_none());
    assert!(fleet.pool().active_calls().get("keep").is_some());
    assert_eq!(fleet.pool().stored_count().await.unwrap(), 1);
    assert!(provider.joined_channel("gone").is_none());

    // Deleting again is a reported no-op, not an error.
    let outcome = fleet.delete_session("gone").await.unwrap();
    assert!(!outcome.success);
}

#[tokio::test]
async fn delete_removes_record_that_never_loaded() {
    let store = Arc::new(SqliteCredentialStore::in_memory().await.unwrap());
    store
        .save(&SessionRecord::new("good", SimProvider::credential("good")))
        .await
        .unwrap();
    store
        .save(&SessionRecord::new("broken", "not-a-credential"))
        .await
        .unwrap();

    let pool = SessionPool::new(store.clone(), Arc::new(SimProvider::new()), Default::default());
    pool.load_all().await.unwrap();
    assert_eq!(pool.names(), vec!["good".to_string()]);

    let outcome = pool.delete_session("broken").await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.detail, "stored record removed");
    assert!(store.get("broken").await.unwrap().is_none());
    assert_eq!(pool.stored_count().await.unwrap(), 1);
    assert_eq!(pool.names(), vec!["good".to_string()]);

    let outcome = pool.delete_session("broken").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.detail, "no such session");
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let provider = SimProvider::new();
    let fleet = memory_fleet(&provider).await;
    let mut events = fleet.subscribe_events();

    add_sessions(&fleet, &["evt"]).await;
    fleet.start_all().await.unwrap();
    fleet.delete_session("evt").await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event.event);
    }

    assert_eq!(
        received,
        vec![
            FleetEvent::SessionAdded { session: "evt".into() },
            FleetEvent::SessionOnline { session: "evt".into() },
            FleetEvent::SessionRemoved { session: "evt".into() },
        ]
    );
}

/// Store that refuses every write
struct ReadOnlyStore;

#[async_trait::async_trait]
impl CredentialStore for ReadOnlyStore {
    async fn save(&self, _record: &SessionRecord) -> voicefleet_core::FleetResult<()> {
        Err(FleetError::storage("database is read-only"))
    }

    async fn load_all(&self) -> voicefleet_core::FleetResult<Vec<SessionRecord>> {
        Ok(Vec::new())
    }

    async fn get(&self, _name: &str) -> voicefleet_core::FleetResult<Option<SessionRecord>> {
        Ok(None)
    }

    async fn delete(&self, _name: &str) -> voicefleet_core::FleetResult<()> {
        Err(FleetError::storage("database is read-only"))
    }
}

#[tokio::test]
async fn failed_save_registers_nothing() {
    let pool = SessionPool::new(
        Arc::new(ReadOnlyStore),
        Arc::new(SimProvider::new()),
        Default::default(),
    )
    .with_store_retry(RetryConfig::immediate(3));

    let result = pool
        .add_session("ghost", &SimProvider::credential("ghost"), SessionMetadata::default())
        .await;

    assert!(matches!(result, Err(FleetError::Storage { .. })));
    assert!(pool.is_empty());
    assert_err!(pool.delete_session("ghost").await);
}
