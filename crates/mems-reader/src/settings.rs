//! Reader settings
//!
//! Read-only flags taken from an optional settings file and `MEMS_*`
//! environment variables, layered over the defaults below.

use config::{Config, Environment, File};
use mems_pipeline::{DisplayMode, PipelineConfig};
use mems_protocol::SerialConfig;
use mems_scheduler::PollerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Settings loading errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    /// Serial device the ECU cable is attached to
    pub port: String,
    /// Talk to the built-in emulated ECU instead of `port`
    pub emulated: bool,
    pub logging_enabled: bool,
    pub log_folder: PathBuf,
    pub display: DisplayMode,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub send_timeout_ms: u64,
    /// Capacity of the polling loop to pipeline channel
    pub pipeline_channel_depth: usize,
    /// Capacity of the UI queue
    pub ui_channel_depth: usize,
    /// Emit JSON formatted tracing output
    pub json_logs: bool,
    pub verbose: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        let serial = SerialConfig::default();
        let poller = PollerConfig::default();
        let pipeline = PipelineConfig::default();
        Self {
            port: "/dev/ttyUSB0".to_string(),
            emulated: false,
            logging_enabled: pipeline.logging_enabled,
            log_folder: pipeline.log_folder,
            display: pipeline.display,
            poll_interval_ms: poller.poll_interval_ms,
            heartbeat_interval_ms: poller.heartbeat_interval_ms,
            read_timeout_ms: serial.read_timeout_ms,
            send_timeout_ms: poller.send_timeout_ms,
            pipeline_channel_depth: 32,
            ui_channel_depth: 16,
            json_logs: false,
            verbose: false,
        }
    }
}

impl ReaderSettings {
    /// Load from `path` (if given) and the `MEMS_*` environment
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with_env(path, Environment::with_prefix("MEMS"))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings: Self = builder
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.poll_interval_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "heartbeat_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.pipeline_channel_depth == 0 || self.ui_channel_depth == 0 {
            return Err(SettingsError::Invalid {
                field: "channel_depth",
                reason: "channels need room for at least one message".to_string(),
            });
        }
        if !self.emulated && self.port.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "port",
                reason: "no serial port given".to_string(),
            });
        }
        Ok(())
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            read_timeout_ms: self.read_timeout_ms,
            ..SerialConfig::default()
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval_ms: self.poll_interval_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            send_timeout_ms: self.send_timeout_ms,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            logging_enabled: self.logging_enabled,
            log_folder: self.log_folder.clone(),
            display: self.display,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Map;
    use std::fs;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("MEMS").source(Some(source))
    }

    #[test]
    fn test_defaults_without_sources() {
        let settings = ReaderSettings::load_with_env(None, env(&[])).unwrap();
        assert_eq!(settings, ReaderSettings::default());
        assert_eq!(settings.poller_config().poll_interval_ms, 1000);
        assert_eq!(settings.serial_config().baud_rate, 9600);
        assert!(settings.pipeline_config().logging_enabled);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memsfcr.toml");
        fs::write(
            &path,
            "port = \"/dev/ttyS1\"\nlogging_enabled = false\ndisplay = \"headless\"\npoll_interval_ms = 500\n",
        )
        .unwrap();

        let settings = ReaderSettings::load_with_env(Some(&path), env(&[])).unwrap();
        assert_eq!(settings.port, "/dev/ttyS1");
        assert!(!settings.logging_enabled);
        assert_eq!(settings.display, DisplayMode::Headless);
        assert_eq!(settings.poll_interval_ms, 500);
        assert_eq!(settings.heartbeat_interval_ms, 2000);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memsfcr.toml");
        fs::write(&path, "port = \"/dev/ttyS1\"\n").unwrap();

        let settings = ReaderSettings::load_with_env(
            Some(&path),
            env(&[("MEMS_PORT", "/dev/ttyUSB3"), ("MEMS_EMULATED", "true")]),
        )
        .unwrap();
        assert_eq!(settings.port, "/dev/ttyUSB3");
        assert!(settings.emulated);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let settings = ReaderSettings::load_with_env(Some(&path), env(&[])).unwrap();
        assert_eq!(settings.port, "/dev/ttyUSB0");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memsfcr.toml");
        fs::write(&path, "poll_interval_ms = 0\n").unwrap();

        let err = ReaderSettings::load_with_env(Some(&path), env(&[])).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                field: "poll_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_wrong_type_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memsfcr.toml");
        fs::write(&path, "ui_channel_depth = \"lots\"\n").unwrap();

        let err = ReaderSettings::load_with_env(Some(&path), env(&[])).unwrap_err();
        assert!(matches!(err, SettingsError::Load(_)));
    }
}
