//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use voicefleet_core::recovery::RetryConfig;
use voicefleet_core::sim::SimProvider;
use voicefleet_core::{CallSettings, Fleet, FleetConfig, SqliteCredentialStore, UserId};

pub const OPERATOR: UserId = UserId(1001);

/// Configuration with every delay turned off
pub fn test_config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.api.api_id = 12345;
    config.api.api_hash = "0123456789abcdef".to_string();
    config.owner_id = OPERATOR.0;
    config.calls = CallSettings::without_delays();
    config
}

/// Database url inside a temporary directory
pub fn temp_database(dir: &TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("sessions.db").display())
}

pub async fn fleet_with(provider: &SimProvider, config: FleetConfig) -> Fleet {
    let store = SqliteCredentialStore::open(&config.database_url).await.unwrap();
    Fleet::builder(config)
        .with_store(Arc::new(store))
        .with_provider(Arc::new(provider.clone()))
        .with_store_retry(RetryConfig::immediate(2))
        .build()
        .await
        .unwrap()
}

/// Fleet on a private in-memory database
pub async fn memory_fleet(provider: &SimProvider) -> Fleet {
    let mut config = test_config();
    config.database_url = "sqlite::memory:".to_string();
    fleet_with(provider, config).await
}

/// Register sessions directly, bypassing the login flow
pub async fn add_sessions(fleet: &Fleet, names: &[&str]) {
    for name in names {
        fleet
            .pool()
            .add_session(name, &SimProvider::credential(name), Default::default())
            .await
            .unwrap();
    }
}
