//! Common types and utilities for the LE Channel Sounding controller
//!
//! This crate provides the shared value types, status codes, error type,
//! configuration and logging helpers used by every other lecs crate.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod time;
pub mod types;

pub use config::{
    load_and_validate_config, load_config, load_config_from_str, ConfigError,
    ConfigValidationError, ControllerConfig,
};
pub use error::Error;
pub use logging::{
    init_logging, init_logging_with_filter, log_hci, log_pdu, Direction, HexDump, LogLevel,
};
pub use model::{
    Capabilities, ConfigSpec, DefaultSettings, FaeTable, PreferredParams, ProcedureParams,
    TimingFamily,
};
pub use time::{ConnTiming, LlTime};
pub use types::*;
