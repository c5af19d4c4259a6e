//! Configuration using Figment
//!
//! Strongly-typed configuration for links, axes and logging. Loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `MDRIVE_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use mdrive_daq::config::MdriveConfig;
//!
//! let config = MdriveConfig::load_from("config/mdrive.toml")?;
//! for axis in &config.axes {
//!     println!("{} on {}", axis.id, axis.link);
//! }
//! # Ok::<(), mdrive_daq::config::ConfigError>(())
//! ```
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [[links]]
//! id = "bus0"
//! port = "/dev/ttySchneider"
//!
//! [[axes]]
//! id = "stage_x"
//! link = "bus0"
//! axis = "X"
//! conversion = -2.0
//! unit = "mm"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use mdrive_core::serial::SerialSettings;
use mdrive_driver_schneider::{AxisSettings, MovementUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/mdrive.toml";

/// Accepted log levels.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    /// Values are well-formed but inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MdriveConfig {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Serial links
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    /// Axes on those links
    #[serde(default)]
    pub axes: Vec<AxisConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// One serial link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Unique link identifier referenced by axes
    pub id: String,
    /// Serial port path
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Acknowledgment/reply timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

impl LinkConfig {
    /// Serial settings for this link.
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(&self.port, self.baud_rate)
            .with_read_timeout(Duration::from_secs_f64(self.timeout_secs))
    }
}

/// One axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Unique axis identifier
    pub id: String,
    /// Identifier of the link the axis is wired to
    pub link: String,
    /// Axis token prefixed to commands
    #[serde(default = "default_axis_token")]
    pub axis: String,
    /// Minimum seconds between two status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    /// Steps per user unit, applied after initialization
    #[serde(default)]
    pub conversion: Option<f64>,
    /// Display unit (steps, mm, inch, degree), applied after initialization
    #[serde(default)]
    pub unit: Option<MovementUnit>,
}

impl AxisConfig {
    /// Driver settings for this axis.
    pub fn axis_settings(&self) -> AxisSettings {
        AxisSettings::new(&self.axis)
            .with_poll_interval(Duration::from_secs_f64(self.poll_interval_secs))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> String {
    "/dev/ttySchneider".to_string()
}

fn default_baud_rate() -> u32 {
    mdrive_core::serial::DEFAULT_BAUD_RATE
}

fn default_timeout_secs() -> f64 {
    mdrive_core::serial::DEFAULT_READ_TIMEOUT.as_secs_f64()
}

fn default_axis_token() -> String {
    "X".to_string()
}

fn default_poll_interval_secs() -> f64 {
    mdrive_driver_schneider::DEFAULT_POLL_INTERVAL.as_secs_f64()
}

impl MdriveConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment, then validate.
    ///
    /// Environment variables override file values, e.g.
    /// `MDRIVE_LOGGING__LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MDRIVE_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new().merge(Toml::string(toml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-references and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        let mut link_ids = HashSet::new();
        for link in &self.links {
            if !link_ids.insert(link.id.as_str()) {
                return invalid(format!("Duplicate link ID: {}", link.id));
            }
            if link.baud_rate == 0 {
                return invalid(format!("Link '{}': baud_rate must be positive", link.id));
            }
            if !link.timeout_secs.is_finite() || link.timeout_secs <= 0.0 {
                return invalid(format!(
                    "Link '{}': timeout_secs must be a positive number, got {}",
                    link.id, link.timeout_secs
                ));
            }
        }

        let mut axis_ids = HashSet::new();
        let mut tokens = HashSet::new();
        for axis in &self.axes {
            if !axis_ids.insert(axis.id.as_str()) {
                return invalid(format!("Duplicate axis ID: {}", axis.id));
            }
            if !link_ids.contains(axis.link.as_str()) {
                return invalid(format!(
                    "Axis '{}' references unknown link '{}'",
                    axis.id, axis.link
                ));
            }
            if axis.axis.is_empty() {
                return invalid(format!("Axis '{}': axis token must not be empty", axis.id));
            }
            if !tokens.insert((axis.link.as_str(), axis.axis.as_str())) {
                return invalid(format!(
                    "Axis '{}': token '{}' already used on link '{}'",
                    axis.id, axis.axis, axis.link
                ));
            }
            if !axis.poll_interval_secs.is_finite() || axis.poll_interval_secs < 0.0 {
                return invalid(format!(
                    "Axis '{}': poll_interval_secs must be a non-negative number, got {}",
                    axis.id, axis.poll_interval_secs
                ));
            }
            if let Some(factor) = axis.conversion {
                if factor == 0.0 || !factor.is_finite() {
                    return invalid(format!(
                        "Axis '{}': conversion must be finite and non-zero, got {}",
                        axis.id, factor
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal() -> MdriveConfig {
        MdriveConfig::from_toml_str(
            r#"
            [[links]]
            id = "bus0"

            [[axes]]
            id = "stage_x"
            link = "bus0"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = minimal();
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);

        let link = &config.links[0];
        assert_eq!(link.port, "/dev/ttySchneider");
        assert_eq!(link.baud_rate, 9600);
        assert_eq!(link.timeout_secs, 3.0);

        let axis = &config.axes[0];
        assert_eq!(axis.axis, "X");
        assert_eq!(axis.poll_interval_secs, 0.5);
        assert_eq!(axis.conversion, None);
        assert_eq!(axis.unit, None);

        assert_eq!(
            axis.axis_settings().poll_interval,
            Duration::from_millis(500)
        );
        assert_eq!(
            link.serial_settings().read_timeout,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"
            json = true

            [[links]]
            id = "bus0"
            port = "/dev/ttyUSB3"
            baud_rate = 19200

            [[axes]]
            id = "stage_x"
            link = "bus0"
            axis = "Y"
            conversion = -2.0
            unit = "degree"
            "#
        )
        .unwrap();

        let config = MdriveConfig::load_from(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.links[0].baud_rate, 19200);
        assert_eq!(config.axes[0].conversion, Some(-2.0));
        assert_eq!(config.axes[0].unit, Some(MovementUnit::Degree));
    }

    #[test]
    fn test_missing_file_yields_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdriveConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert!(config.links.is_empty());
        assert!(config.axes.is_empty());
    }

    #[test]
    fn test_rejects_unknown_link() {
        let err = MdriveConfig::from_toml_str(
            r#"
            [[links]]
            id = "bus0"

            [[axes]]
            id = "stage_x"
            link = "bus1"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown link 'bus1'"));
    }

    #[test]
    fn test_rejects_shared_token_on_one_link() {
        let mut config = minimal();
        let mut twin = config.axes[0].clone();
        twin.id = "stage_x2".into();
        config.axes.push(twin);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("token 'X' already used"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = minimal();
        config.axes[0].conversion = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.links[0].baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.links[0].timeout_secs = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.links[0].timeout_secs = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_secs must be a positive number"));

        let mut config = minimal();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.links.push(config.links[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_unit() {
        let err = MdriveConfig::from_toml_str(
            r#"
            [[links]]
            id = "bus0"

            [[axes]]
            id = "stage_x"
            link = "bus0"
            unit = "furlong"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let mut config = minimal();
        config.axes[0].unit = Some(MovementUnit::Inch);
        let text = toml::to_string(&config).unwrap();
        assert_eq!(MdriveConfig::from_toml_str(&text).unwrap(), config);
    }
}
