//! # Credential Store
//!
//! Durable mapping from session name to session credential. The store knows
//! nothing about connectivity; it only keeps [`SessionRecord`]s.
//!
//! The contract is deliberately small:
//!
//! - `save` upserts by name and is idempotent
//! - `load_all` returns every record, in no particular order
//! - `get` returns one record or `None`
//! - `delete` removes a record and is a no-op when it is absent
//!
//! [`SqliteCredentialStore`] implements it on top of `sqlx`. A single process
//! is assumed to own the database file.
//!
//! ```rust,no_run
//! use voicefleet_core::store::{CredentialStore, SessionRecord, SqliteCredentialStore};
//!
//! # async fn example() -> voicefleet_core::FleetResult<()> {
//! let store = SqliteCredentialStore::open("sqlite://sessions.db").await?;
//! store.save(&SessionRecord::new("account1", "opaque-credential")).await?;
//! assert!(store.get("account1").await?.is_some());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::error::FleetResult;

/// Persisted session
#[derive(sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Operator-chosen unique name
    pub name: String,
    /// Opaque credential that restores the login
    pub credential: String,
    pub phone_number: String,
    pub display_name: String,
    pub handle_name: String,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a record with empty informational fields
    pub fn new(name: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credential: credential.into(),
            phone_number: String::new(),
            display_name: String::new(),
            handle_name: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach account details
    pub fn with_metadata(mut self, metadata: SessionMetadata) -> Self {
        self.phone_number = metadata.phone_number;
        self.display_name = metadata.display_name;
        self.handle_name = metadata.handle_name;
        self
    }

    /// Informational fields of this record
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            phone_number: self.phone_number.clone(),
            display_name: self.display_name.clone(),
            handle_name: self.handle_name.clone(),
        }
    }
}

// The credential is a bearer secret and stays out of logs.
impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("name", &self.name)
            .field("credential", &"<redacted>")
            .field("phone_number", &self.phone_number)
            .field("display_name", &self.display_name)
            .field("handle_name", &self.handle_name)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Informational account details kept next to a credential
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub phone_number: String,
    pub display_name: String,
    pub handle_name: String,
}

/// Durable session storage
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace the record with the same name
    async fn save(&self, record: &SessionRecord) -> FleetResult<()>;

    /// Every stored record
    async fn load_all(&self) -> FleetResult<Vec<SessionRecord>>;

    /// One record by name
    async fn get(&self, name: &str) -> FleetResult<Option<SessionRecord>>;

    /// Remove a record; absent names are not an error
    async fn delete(&self, name: &str) -> FleetResult<()>;
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sessions (
    name TEXT PRIMARY KEY,
    credential TEXT NOT NULL,
    phone_number TEXT NOT NULL DEFAULT '',
    display_name TEXT NOT NULL DEFAULT '',
    handle_name TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
)";

/// SQLite-backed credential store
#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    /// Open (creating if missing) the database at `database_url`
    pub async fn open(database_url: &str) -> FleetResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = pool_options(database_url).connect_with(options).await?;

        sqlx::query(SCHEMA).execute(&pool).await?;

        info!(database = %database_url, "Credential store ready");
        Ok(Self { pool })
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> FleetResult<Self> {
        Self::open("sqlite::memory:").await
    }

    /// Number of stored records
    pub async fn count(&self) -> FleetResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

/// Every connection to an in-memory database sees its own empty database, so
/// those get one connection that is never retired.
fn pool_options(database_url: &str) -> SqlitePoolOptions {
    if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(4)
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn save(&self, record: &SessionRecord) -> FleetResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sessions
                (name, credential, phone_number, display_name, handle_name, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.name)
        .bind(&record.credential)
        .bind(&record.phone_number)
        .bind(&record.display_name)
        .bind(&record.handle_name)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        debug!(session = %record.name, "Session record saved");
        Ok(())
    }

    async fn load_all(&self) -> FleetResult<Vec<SessionRecord>> {
        let records = sqlx::query_as::<_, SessionRecord>(
            "SELECT name, credential, phone_number, display_name, handle_name, created_at
             FROM sessions
             ORDER BY created_at ASC, name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        debug!(count = records.len(), "Session records loaded");
        Ok(records)
    }

    async fn get(&self, name: &str) -> FleetResult<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT name, credential, phone_number, display_name, handle_name, created_at
             FROM sessions
             WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete(&self, name: &str) -> FleetResult<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        debug!(session = %name, removed = result.rows_affected(), "Session record deleted");
        Ok(())
    }
}
