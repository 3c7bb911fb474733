//! Controller configuration
//!
//! Static CS capabilities and controller tunables, loaded from YAML. Every
//! field has a default, so an empty document yields a usable controller.
//!
//! # Example
//!
//! ```rust,ignore
//! use lecs_common::config::load_and_validate_config;
//!
//! let config = load_and_validate_config("config/controller.yaml")?;
//! println!("antennas: {}", config.capabilities.num_antennas);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Capabilities, T_SW_US};
use crate::types::{ChannelMap, MAX_CONFIGS};

/// Default event parameter limit in octets
pub const DEFAULT_MAX_EVENT_PAYLOAD: usize = 251;

/// Default LL response timeout
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 40_000;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Configuration validation error
    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ConfigValidationError),
}

/// Errors that can occur during configuration validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// Antenna count outside 1..=4
    #[error("Invalid antenna count: {0}")]
    InvalidAntennas(u8),

    /// Antenna paths below the antenna count or above 4
    #[error("Invalid antenna path count {paths} for {antennas} antennas")]
    InvalidAntennaPaths {
        /// Configured paths
        paths: u8,
        /// Configured antennas
        antennas: u8,
    },

    /// Configuration count outside 1..=4
    #[error("Invalid configuration count: {0}")]
    InvalidConfigCount(u8),

    /// Antenna switch time not one of the allowed values
    #[error("Invalid antenna switch time: {0}us")]
    InvalidSwitchTime(u8),

    /// Neither initiator nor reflector supported
    #[error("No CS role supported")]
    NoRole,

    /// Default channel classification leaves too few channels
    #[error("Channel classification enables only {0} channels")]
    InsufficientChannels(usize),

    /// Event payload limit too small to carry one step
    #[error("Event payload limit too small: {0}")]
    InvalidPayloadLimit(usize),
}

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Local CS capabilities advertised to peers
    pub capabilities: Capabilities,
    /// Host channel classification applied to every configuration
    pub channel_classification: ChannelMap,
    /// Event parameter limit used when splitting subevent results
    pub max_event_payload: usize,
    /// Automatic retries of a collided procedure enable
    pub procedure_enable_retries: u8,
    /// LL response timeout in milliseconds
    pub response_timeout_ms: u64,
    /// Scheduler priority of CS subevents
    pub cs_priority: u8,
    /// Reference power level reported in subevent results, dBm
    pub reference_power_level: i8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::default(),
            channel_classification: ChannelMap::all_usable(),
            max_event_payload: DEFAULT_MAX_EVENT_PAYLOAD,
            procedure_enable_retries: 3,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            cs_priority: 4,
            reference_power_level: 0,
        }
    }
}

impl ControllerConfig {
    /// Validates ranges and cross-field consistency.
    ///
    /// # Validation Rules
    ///
    /// - 1 to 4 antennas
    /// - antenna paths no fewer than antennas and at most 4
    /// - 1 to 4 configurations
    /// - T_SW one of 0, 1, 2, 4 or 10 us
    /// - at least one CS role
    /// - channel classification keeps at least 15 channels
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let caps = &self.capabilities;
        if !(1..=4).contains(&caps.num_antennas) {
            return Err(ConfigValidationError::InvalidAntennas(caps.num_antennas));
        }
        if caps.max_antenna_paths < caps.num_antennas || caps.max_antenna_paths > 4 {
            return Err(ConfigValidationError::InvalidAntennaPaths {
                paths: caps.max_antenna_paths,
                antennas: caps.num_antennas,
            });
        }
        if caps.num_configs == 0 || usize::from(caps.num_configs) > MAX_CONFIGS {
            return Err(ConfigValidationError::InvalidConfigCount(caps.num_configs));
        }
        if !T_SW_US.contains(&caps.t_sw) {
            return Err(ConfigValidationError::InvalidSwitchTime(caps.t_sw));
        }
        if caps.roles & 0x03 == 0 {
            return Err(ConfigValidationError::NoRole);
        }
        let usable = ChannelMap::all_usable()
            .intersect(&self.channel_classification)
            .count();
        if usable < crate::types::MIN_CHANNELS {
            return Err(ConfigValidationError::InsufficientChannels(usable));
        }
        // Subevent result header (15) plus one step header (3)
        if self.max_event_payload < 18 || self.max_event_payload > 255 {
            return Err(ConfigValidationError::InvalidPayloadLimit(
                self.max_event_payload,
            ));
        }
        Ok(())
    }
}

/// Loads a controller configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ControllerConfig, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    load_config_from_str(&contents)
}

/// Loads a controller configuration from a YAML string.
///
/// An empty document yields the default configuration.
pub fn load_config_from_str(yaml: &str) -> Result<ControllerConfig, ConfigError> {
    if yaml.trim().is_empty() {
        return Ok(ControllerConfig::default());
    }
    let config: ControllerConfig =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    Ok(config)
}

/// Loads a controller configuration from a YAML file and validates it.
pub fn load_and_validate_config<P: AsRef<Path>>(
    path: P,
) -> Result<ControllerConfig, ConfigError> {
    let config = load_config(path)?;
    config.validate()?;
    Ok(config)
}
