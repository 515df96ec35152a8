use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io::error::LinkError;
use crate::io::serial::{LinkOptions, Parity, SerialConfig};
use crate::observer::DEFAULT_LOG_CAPACITY;
use crate::tlog;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64, // also bounds shutdown latency
    #[serde(default = "default_io_backoff_ms")]
    pub io_backoff_ms: u64,
    #[serde(default = "default_state_timeout_ms")]
    pub state_timeout_ms: u64,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}
fn default_baud_rate() -> u32 {
    115200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_io_backoff_ms() -> u64 {
    5000
}
fn default_state_timeout_ms() -> u64 {
    2000
}
fn default_max_line_length() -> usize {
    1024
}
fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            read_timeout_ms: default_read_timeout_ms(),
            io_backoff_ms: default_io_backoff_ms(),
            state_timeout_ms: default_state_timeout_ms(),
            max_line_length: default_max_line_length(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.baud_rate == 0 {
            return Err(SettingsError::Invalid("baud_rate must be non-zero".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "read_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(SettingsError::Invalid("log_capacity must be non-zero".to_string()));
        }
        if let Err(LinkError::Config(msg)) = self.serial_config().builder() {
            return Err(SettingsError::Invalid(msg));
        }
        Ok(())
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            options: LinkOptions {
                read_timeout: Duration::from_millis(self.read_timeout_ms),
                io_backoff: Duration::from_millis(self.io_backoff_ms),
                max_line_length: self.max_line_length,
            },
        }
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms)
    }
}

/// `<config_dir>/senselink/settings.toml`, if the platform has a config dir.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("senselink").join("settings.toml"))
}

/// Parse settings from TOML text. Missing keys take their defaults.
pub fn parse_settings(content: &str, path: &Path) -> Result<Settings, SettingsError> {
    let settings: Settings = toml::from_str(content).map_err(|e| SettingsError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from `path`, or from the default location when `None`.
///
/// An explicit path must exist. A missing default file yields defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let settings_path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_settings_path() {
            Some(p) if p.exists() => p,
            _ => return Ok(Settings::default()),
        },
    };

    let content = std::fs::read_to_string(&settings_path).map_err(|e| SettingsError::Read {
        path: settings_path.clone(),
        source: e,
    })?;

    let settings = parse_settings(&content, &settings_path)?;
    tlog!("[settings] Loaded {}", settings_path.display());
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Settings, SettingsError> {
        parse_settings(content, Path::new("test.toml"))
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        assert_eq!(parse("").unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_file() {
        let settings = parse(
            r#"
            port = "COM7"
            parity = "even"
            read_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(settings.port, "COM7");
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.log_capacity, 300);

        let config = settings.serial_config();
        assert_eq!(config.options.read_timeout, Duration::from_millis(250));
        assert_eq!(config.options.io_backoff, Duration::from_millis(5000));
        assert_eq!(config.parity, Parity::Even);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(parse("baud_rate = 0"), Err(SettingsError::Invalid(_))));
        assert!(matches!(parse("read_timeout_ms = 0"), Err(SettingsError::Invalid(_))));
        assert!(matches!(parse("log_capacity = 0"), Err(SettingsError::Invalid(_))));
        assert!(matches!(parse("data_bits = 9"), Err(SettingsError::Invalid(_))));
        assert!(matches!(parse("stop_bits = 3"), Err(SettingsError::Invalid(_))));
        assert!(parse("data_bits = 7\nstop_bits = 2").is_ok());
    }

    #[test]
    fn test_malformed_toml() {
        let err = parse("port = ").unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert!(err.to_string().contains("test.toml"));
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let err = load_settings(Some(Path::new("/nonexistent/senselink.toml"))).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("senselink-settings-{}.toml", std::process::id()));
        std::fs::write(&path, "baud_rate = 9600\nstate_timeout_ms = 500\n").unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.state_timeout(), Duration::from_millis(500));
    }
}
