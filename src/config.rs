//! Engine configuration using Figment.
//!
//! Configuration is layered:
//! 1. built-in defaults,
//! 2. a TOML file (missing files are ignored),
//! 3. environment variables prefixed with `DAQ_TRACES_`.
//!
//! # Example
//! ```no_run
//! use daq_traces::config::EngineConfig;
//!
//! let config = EngineConfig::load_from("daq-traces.toml")?;
//! config.validate()?;
//! println!("Formula debounce: {} ms", config.math_update_interval_ms);
//! # Ok::<(), daq_traces::error::TraceError>(())
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::expression::DEFAULT_OPERATION_LIMIT;
use crate::trace::{DEFAULT_REFERENCE_IMPEDANCE, DEFAULT_VELOCITY_FACTOR};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "DAQ_TRACES_";

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "daq-traces.toml";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Minimum spacing between two evaluation passes of one formula trace
    #[serde(default = "default_math_update_interval")]
    pub math_update_interval_ms: u64,
    /// Velocity factor of newly created traces
    #[serde(default = "default_velocity_factor")]
    pub default_velocity_factor: f64,
    /// Reference impedance of newly created traces, in ohms
    #[serde(default = "default_reference_impedance")]
    pub default_reference_impedance: f64,
    /// Operation budget of a single expression evaluation
    #[serde(default = "default_operation_limit")]
    pub expression_operation_limit: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_math_update_interval() -> u64 {
    100
}

fn default_velocity_factor() -> f64 {
    DEFAULT_VELOCITY_FACTOR
}

fn default_reference_impedance() -> f64 {
    DEFAULT_REFERENCE_IMPEDANCE
}

fn default_operation_limit() -> u64 {
    DEFAULT_OPERATION_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            math_update_interval_ms: default_math_update_interval(),
            default_velocity_factor: default_velocity_factor(),
            default_reference_impedance: default_reference_impedance(),
            expression_operation_limit: default_operation_limit(),
        }
    }
}

impl EngineConfig {
    /// Load from [`DEFAULT_CONFIG_FILE`] and the environment.
    pub fn load() -> TraceResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file path and the environment.
    ///
    /// Environment variables override file values, for example
    /// `DAQ_TRACES_MATH_UPDATE_INTERVAL_MS=250`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> TraceResult<Self> {
        let config = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> TraceResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(TraceError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.expression_operation_limit == 0 {
            return Err(TraceError::Configuration(
                "expression_operation_limit must be positive".to_string(),
            ));
        }

        if !(self.default_velocity_factor > 0.0 && self.default_velocity_factor <= 1.0) {
            return Err(TraceError::Configuration(format!(
                "Invalid default_velocity_factor {}. Must be in (0, 1]",
                self.default_velocity_factor
            )));
        }

        if !(self.default_reference_impedance > 0.0) {
            return Err(TraceError::Configuration(format!(
                "Invalid default_reference_impedance {}. Must be positive",
                self.default_reference_impedance
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.math_update_interval_ms, 100);
        assert_eq!(config.default_velocity_factor, 0.66);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let config = EngineConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TraceError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_physics() {
        let config = EngineConfig {
            default_velocity_factor: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            default_reference_impedance: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            expression_operation_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
