//! TOML configuration file loading
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:7450"
//!
//! [logging]
//! level = "debug"
//!
//! [[queue]]
//! name = "orders"
//! max_receive_count = 5
//! redrive_target = "orders-dlq"
//!
//! [[queue]]
//! name = "orders-dlq"
//!
//! [[topic]]
//! name = "order-events"
//! subscriptions = ["orders"]
//! ```

use super::args::Args;
use crate::broker::BrokerConfig;
use crate::core::error_handling::ContextualError;
use crate::server::ServerSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOG_FORMATS: &[&str] = &["text", "ext", "json"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl ContextualError for ConfigError {
    fn is_user_actionable(&self) -> bool {
        true
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            ConfigError::Validation(message) => Some(message),
            ConfigError::Io { .. } => Some("configuration file could not be read"),
            ConfigError::Parse { .. } => Some("configuration file is not valid TOML"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub listen_addr: String,
    pub long_poll_interval_ms: u64,
    pub max_wait_seconds: u64,
    pub max_line_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        let settings = ServerSettings::default();
        Self {
            listen_addr: settings.listen_addr,
            long_poll_interval_ms: u64::try_from(settings.poll_interval.as_millis())
                .unwrap_or(u64::MAX),
            max_wait_seconds: settings.max_wait.as_secs(),
            max_line_bytes: settings.max_line_bytes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
}

/// Complete contents of `fanout.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub server: ServerSection,
    pub logging: LoggingSection,
    #[serde(flatten)]
    pub broker: BrokerConfig,
}

impl FanoutConfig {
    /// Default location: `<config dir>/Fanout/fanout.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("Fanout").join("fanout.toml"))
    }

    /// Load the configuration file
    ///
    /// An explicitly named file must exist. Without one the default location
    /// is tried, and built-in defaults apply when nothing is there.
    pub async fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match config_file {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    log::debug!("No configuration file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
        let config = Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply command-line overrides on top of the file values
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(listen) = &args.listen {
            self.server.listen_addr = listen.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = Some(level.clone());
        }
        if let Some(format) = &args.log_format {
            self.logging.format = Some(format.clone());
        }
        if let Some(file) = &args.log_file {
            self.logging.file = Some(file.clone());
        }
    }

    /// Check transport and logging values
    ///
    /// Queue and topic declarations are checked when they are provisioned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_addr.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.listen_addr cannot be empty".to_string(),
            ));
        }
        if self.server.long_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "server.long_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.server.max_line_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.max_line_bytes must be greater than 0".to_string(),
            ));
        }
        if let Some(format) = &self.logging.format {
            if !LOG_FORMATS.contains(&format.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "logging.format '{}' is not one of {}",
                    format,
                    LOG_FORMATS.join(", ")
                )));
            }
        }
        Ok(())
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            listen_addr: self.server.listen_addr.clone(),
            poll_interval: Duration::from_millis(self.server.long_poll_interval_ms),
            max_wait: Duration::from_secs(self.server.max_wait_seconds),
            max_line_bytes: self.server.max_line_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[server]
listen_addr = "0.0.0.0:9000"
max_wait_seconds = 5

[logging]
level = "debug"
format = "json"

[[queue]]
name = "orders"
visibility_timeout_seconds = 60
max_receive_count = 3
redrive_target = "orders-dlq"

[[queue]]
name = "orders-dlq"

[[topic]]
name = "order-events"
subscriptions = ["orders"]
"#;

    #[test]
    fn test_parse_full_file() {
        let config = FanoutConfig::parse(SAMPLE).unwrap();

        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.server.max_wait_seconds, 5);
        assert_eq!(config.server.long_poll_interval_ms, 100);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        assert_eq!(config.broker.queues.len(), 2);
        assert_eq!(config.broker.queues[0].visibility_timeout_seconds, 60);
        assert_eq!(config.broker.queues[1].visibility_timeout_seconds, 300);
        assert_eq!(config.broker.topics[0].subscriptions, vec!["orders"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = FanoutConfig::parse("").unwrap();
        assert_eq!(config, FanoutConfig::default());
        assert_eq!(config.server_settings(), ServerSettings::default());
    }

    #[test]
    fn test_unknown_server_key_rejected() {
        assert!(FanoutConfig::parse("[server]\nlisten = \"x\"\n").is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = FanoutConfig::default();
        config.server.long_poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = FanoutConfig::default();
        config.logging.format = Some("xml".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.is_user_actionable());
        assert!(err.to_string().contains("xml"));
    }

    #[test]
    fn test_args_override_file_values() {
        let mut config = FanoutConfig::parse(SAMPLE).unwrap();
        let args = Args::try_parse_from(["fanout", "--listen", "127.0.0.1:1", "--log-level", "warn"])
            .unwrap();

        config.apply_args(&args);

        assert_eq!(config.server.listen_addr, "127.0.0.1:1");
        assert_eq!(config.logging.level.as_deref(), Some("warn"));
        assert_eq!(config.logging.format.as_deref(), Some("json"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = FanoutConfig::load(Some(file.path())).await.unwrap();
        assert_eq!(config.broker.queues[0].name, "orders");
    }

    #[tokio::test]
    async fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        let err = FanoutConfig::load(Some(&missing)).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[tokio::test]
    async fn test_load_reports_parse_errors_with_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[[queue]]\nname = 5\n").unwrap();

        let err = FanoutConfig::load(Some(file.path())).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
