//! Process configuration
//!
//! Read once at startup from the environment, every key with a fallback
//! default. There is no hot reload.
//!
//! | Variable                | Default                          |
//! |-------------------------|----------------------------------|
//! | `API_ID`                | `0` (must be set)                |
//! | `API_HASH`              | empty (must be set)              |
//! | `BOT_TOKEN`             | empty                            |
//! | `OWNER_ID`              | `0`                              |
//! | `DATABASE_URL`          | chosen by [`DeploymentEnvironment`] |
//! | `JOIN_STAGGER_MS`       | `2000`                           |
//! | `FALLBACK_DELAY_MS`     | `2000`                           |
//! | `PLACEHOLDER_STREAM`    | [`MediaSpec::DEFAULT_SOURCE`]    |
//! | `MAX_PASSWORD_ATTEMPTS` | `3`                              |
//! | `LOG_LEVEL`             | `info`                           |

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FleetError, FleetResult};
use crate::provider::MediaSpec;

/// Where the process runs, as far as storage durability is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEnvironment {
    /// Container platform whose only writable location is scratch space
    Ephemeral,
    /// Regular host with a durable working directory
    Durable,
}

impl DeploymentEnvironment {
    /// Markers set by hosting platforms that run us on an ephemeral filesystem
    const EPHEMERAL_MARKERS: &'static [&'static str] = &["RAILWAY_ENVIRONMENT"];

    /// Inspect the process environment
    pub fn detect() -> Self {
        if Self::EPHEMERAL_MARKERS
            .iter()
            .any(|marker| std::env::var_os(marker).is_some())
        {
            DeploymentEnvironment::Ephemeral
        } else {
            DeploymentEnvironment::Durable
        }
    }

    /// Database location appropriate for this environment
    pub fn default_database_url(&self) -> &'static str {
        match self {
            DeploymentEnvironment::Ephemeral => "sqlite:///tmp/sessions.db",
            DeploymentEnvironment::Durable => "sqlite://sessions.db",
        }
    }
}

/// Api identity handed to the provider factory
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub api_id: i64,
    pub api_hash: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .finish()
    }
}

/// Default text posted to a channel before starting its call
pub const DEFAULT_START_NOTICE: &str = "🎧 Starting voice chat...";

/// Timing and media settings of the call coordinator
#[derive(Debug, Clone)]
pub struct CallSettings {
    /// Pause between two sessions' join attempts
    pub join_stagger: Duration,
    /// Pause after the text-command fallback before the second join attempt
    pub fallback_delay: Duration,
    /// Stream piped into every call
    pub media: MediaSpec,
    /// Invite other participants when joining
    pub auto_invite: bool,
    /// Posted to a channel that has no live call before joining it
    pub start_notice: String,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            join_stagger: Duration::from_secs(2),
            fallback_delay: Duration::from_secs(2),
            media: MediaSpec::default(),
            auto_invite: true,
            start_notice: DEFAULT_START_NOTICE.to_string(),
        }
    }
}

impl CallSettings {
    /// No pauses at all; for tests and simulations
    pub fn without_delays() -> Self {
        Self {
            join_stagger: Duration::ZERO,
            fallback_delay: Duration::ZERO,
            ..Default::default()
        }
    }
}

/// Complete fleet configuration
#[derive(Clone)]
pub struct FleetConfig {
    pub api: ApiCredentials,
    pub bot_token: String,
    /// The single user allowed to operate the fleet
    pub owner_id: i64,
    pub database_url: String,
    pub calls: CallSettings,
    /// Wrong two-step passwords tolerated before a login flow fails
    pub max_password_attempts: u32,
    pub log_level: String,
}

impl fmt::Debug for FleetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetConfig")
            .field("api", &self.api)
            .field("bot_token", &"<redacted>")
            .field("owner_id", &self.owner_id)
            .field("database_url", &self.database_url)
            .field("calls", &self.calls)
            .field("max_password_attempts", &self.max_password_attempts)
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// Flat shape of the environment, before conversion
#[derive(Debug, Deserialize)]
struct RawConfig {
    api_id: i64,
    api_hash: String,
    bot_token: String,
    owner_id: i64,
    database_url: Option<String>,
    join_stagger_ms: u64,
    fallback_delay_ms: u64,
    placeholder_stream: String,
    start_notice: String,
    max_password_attempts: u32,
    log_level: String,
}

impl FleetConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> FleetResult<Self> {
        let source = config::Environment::default().try_parsing(true);
        Self::load(source, DeploymentEnvironment::detect())
    }

    fn load(
        source: config::Environment,
        deployment: DeploymentEnvironment,
    ) -> FleetResult<Self> {
        let raw: RawConfig = config::Config::builder()
            .set_default("api_id", 0)?
            .set_default("api_hash", "")?
            .set_default("bot_token", "")?
            .set_default("owner_id", 0)?
            .set_default("join_stagger_ms", 2000)?
            .set_default("fallback_delay_ms", 2000)?
            .set_default("placeholder_stream", MediaSpec::DEFAULT_SOURCE)?
            .set_default("start_notice", DEFAULT_START_NOTICE)?
            .set_default("max_password_attempts", 3)?
            .set_default("log_level", "info")?
            .add_source(source)
            .build()?
            .try_deserialize()?;

        Ok(Self::from_raw(raw, deployment))
    }

    fn from_raw(raw: RawConfig, deployment: DeploymentEnvironment) -> Self {
        Self {
            api: ApiCredentials {
                api_id: raw.api_id,
                api_hash: raw.api_hash,
            },
            bot_token: raw.bot_token,
            owner_id: raw.owner_id,
            database_url: raw
                .database_url
                .unwrap_or_else(|| deployment.default_database_url().to_string()),
            calls: CallSettings {
                join_stagger: Duration::from_millis(raw.join_stagger_ms),
                fallback_delay: Duration::from_millis(raw.fallback_delay_ms),
                media: MediaSpec::placeholder(raw.placeholder_stream),
                auto_invite: true,
                start_notice: raw.start_notice,
            },
            max_password_attempts: raw.max_password_attempts,
            log_level: raw.log_level,
        }
    }

    /// Reject settings the provider cannot work with
    pub fn validate(&self) -> FleetResult<()> {
        if self.api.api_id == 0 {
            return Err(FleetError::invalid_configuration("API_ID", "must be set"));
        }
        if self.api.api_hash.is_empty() {
            return Err(FleetError::invalid_configuration("API_HASH", "must be set"));
        }
        if self.max_password_attempts == 0 {
            return Err(FleetError::invalid_configuration(
                "MAX_PASSWORD_ATTEMPTS",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            api: ApiCredentials {
                api_id: 0,
                api_hash: String::new(),
            },
            bot_token: String::new(),
            owner_id: 0,
            database_url: DeploymentEnvironment::Durable
                .default_database_url()
                .to_string(),
            calls: CallSettings::default(),
            max_password_attempts: 3,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default()
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_defaults_apply() {
        let config = FleetConfig::load(env(&[]), DeploymentEnvironment::Durable).unwrap();
        assert_eq!(config.api.api_id, 0);
        assert_eq!(config.database_url, "sqlite://sessions.db");
        assert_eq!(config.calls.join_stagger, Duration::from_secs(2));
        assert_eq!(config.max_password_attempts, 3);
        assert_eq!(config.calls.start_notice, DEFAULT_START_NOTICE);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let config = FleetConfig::load(
            env(&[
                ("API_ID", "12345"),
                ("API_HASH", "abcdef"),
                ("OWNER_ID", "777"),
                ("JOIN_STAGGER_MS", "250"),
                ("MAX_PASSWORD_ATTEMPTS", "5"),
                ("START_NOTICE", "Call starting"),
            ]),
            DeploymentEnvironment::Durable,
        )
        .unwrap();

        assert_eq!(config.api.api_id, 12345);
        assert_eq!(config.owner_id, 777);
        assert_eq!(config.calls.join_stagger, Duration::from_millis(250));
        assert_eq!(config.max_password_attempts, 5);
        assert_eq!(config.calls.start_notice, "Call starting");
        config.validate().unwrap();
    }

    #[test]
    fn test_ephemeral_environment_uses_scratch_space() {
        let config = FleetConfig::load(env(&[]), DeploymentEnvironment::Ephemeral).unwrap();
        assert_eq!(config.database_url, "sqlite:///tmp/sessions.db");
    }

    #[test]
    #[serial_test::serial]
    fn test_detect_ephemeral_marker() {
        unsafe { std::env::set_var("RAILWAY_ENVIRONMENT", "production") };
        assert_eq!(DeploymentEnvironment::detect(), DeploymentEnvironment::Ephemeral);

        unsafe { std::env::remove_var("RAILWAY_ENVIRONMENT") };
        assert_eq!(DeploymentEnvironment::detect(), DeploymentEnvironment::Durable);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut config = FleetConfig::default();
        config.api.api_hash = "hash-value".into();
        config.bot_token = "bot-token-value".into();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hash-value"));
        assert!(!printed.contains("bot-token-value"));
    }
}
