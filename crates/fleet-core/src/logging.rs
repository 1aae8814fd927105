//! Logging setup
//!
//! Session names, channel ids and outcome kinds go out as structured fields.
//! Credentials, login codes and passwords never do.

use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};

/// Shape of the emitted log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, for log collectors
    Json,
}

/// Filter admitting `level` and above, plus whatever `RUST_LOG` adds
pub fn log_filter(level: &str) -> FleetResult<EnvFilter> {
    let level: Level = level.parse().map_err(|_| {
        FleetError::invalid_configuration("LOG_LEVEL", format!("unknown level '{}'", level))
    })?;
    Ok(EnvFilter::from_default_env().add_directive(level.into()))
}

/// Install the process-wide subscriber at `config.log_level`
///
/// Fails on an unknown level or when a subscriber is already installed.
pub fn init_logging(config: &FleetConfig, format: LogFormat) -> FleetResult<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(log_filter(&config.log_level)?);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| FleetError::internal(format!("failed to install logger: {}", e)))?;

    info!(
        version = crate::VERSION,
        level = %config.log_level,
        database = %config.database_url,
        "voicefleet starting"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_levels() {
        assert!(log_filter("debug").is_ok());
        assert!(log_filter("WARN").is_ok());
        assert!(matches!(
            log_filter("chatty"),
            Err(FleetError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_unknown_level_stops_init() {
        let mut config = FleetConfig::default();
        config.log_level = "loud".to_string();
        assert!(init_logging(&config, LogFormat::Text).is_err());
    }
}
