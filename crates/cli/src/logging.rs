//! Structured logging setup for the CLI
//!
//! Logs go to stderr so `migrate status --json` keeps stdout machine readable.

use std::env;
use std::io;

use quarry_migrate::{LogFormat, MigrationSettings};
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    pub format: LogFormat,
    /// Environment filter, takes precedence over `level`
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Read `LOG_LEVEL` and `LOG_FORMAT`, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: env::var("LOG_LEVEL").unwrap_or(defaults.level),
            format: env::var("LOG_FORMAT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.format),
            env_filter: None,
        }
    }

    pub fn from_settings(settings: &MigrationSettings) -> Self {
        Self {
            level: settings.log_level.clone(),
            format: settings.log_format,
            env_filter: None,
        }
    }

    /// Set environment filter
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }
}

/// Initialize structured logging
///
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = config.env_filter.as_deref().unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(env_filter))?;

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?,
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?,
    }

    tracing::debug!(
        target: "quarry::logging",
        "Structured logging initialized (level: {}, format: {:?})",
        config.level,
        config.format
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("LOG_LEVEL", "debug");
        env::set_var("LOG_FORMAT", "json");

        let config = LoggingConfig::from_env();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);

        env::set_var("LOG_FORMAT", "fancy");
        assert_eq!(LoggingConfig::from_env().format, LogFormat::Text);

        env::remove_var("LOG_LEVEL");
        env::remove_var("LOG_FORMAT");
        assert_eq!(LoggingConfig::from_env(), LoggingConfig::default());
    }

    #[test]
    fn test_env_filter_builder() {
        let config = LoggingConfig::default().with_env_filter("quarry_migrate=debug");
        assert_eq!(config.env_filter.as_deref(), Some("quarry_migrate=debug"));
    }
}
