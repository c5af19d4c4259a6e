//! Tracing Infrastructure
//!
//! Installs a `tracing-subscriber` fmt subscriber for applications that embed
//! the MDrive drivers. Output is compact text or JSON lines; filtering follows
//! `RUST_LOG` when set and the configured level otherwise.
//!
//! # Example
//! ```no_run
//! use mdrive_daq::{config::MdriveConfig, logging};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = MdriveConfig::load()?;
//! logging::init_tracing(&config.logging)?;
//! tracing::info!("drivers starting");
//! # Ok(())
//! # }
//! ```

use crate::config::{LoggingConfig, LOG_LEVELS};
use anyhow::{anyhow, bail, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Single-line human readable output
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl OutputFormat {
    /// Format selected by a logging configuration.
    pub fn from_config(config: &LoggingConfig) -> Self {
        if config.json {
            OutputFormat::Json
        } else {
            OutputFormat::Compact
        }
    }
}

/// Filter from `RUST_LOG`, falling back to `level`.
///
/// # Errors
/// Fails if `level` is not one of [`LOG_LEVELS`].
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    if !LOG_LEVELS.contains(&level) {
        bail!(
            "Invalid log level '{}'. Must be one of: {}",
            level,
            LOG_LEVELS.join(", ")
        );
    }
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
}

/// Initialize the global subscriber.
///
/// Idempotent: if a subscriber is already installed this returns `Ok(())`.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(&config.level)?;

    let layer = match OutputFormat::from_config(config) {
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(anyhow!("Failed to initialize tracing: {}", e))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_rejects_unknown_level() {
        assert!(build_filter("loud").is_err());
        assert!(build_filter("debug").is_ok());
    }

    #[test]
    fn test_output_format_from_config() {
        let mut config = LoggingConfig::default();
        assert_eq!(OutputFormat::from_config(&config), OutputFormat::Compact);
        config.json = true;
        assert_eq!(OutputFormat::from_config(&config), OutputFormat::Json);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_ok());
    }
}
