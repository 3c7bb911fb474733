//! Error types for the Channel Sounding controller

use thiserror::Error;

use crate::types::HciStatus;

/// Failures shared by the controller crates.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected configuration or command parameters
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed or unexpected control PDU
    #[error("link-layer protocol: {0}")]
    Protocol(String),

    /// DRBG or block cipher failure
    #[error("DRBG failure: {0}")]
    Crypto(String),

    /// Operation not allowed in the current negotiation state
    #[error("not allowed now: {0}")]
    StateMachine(String),

    /// Failure carrying its own status code
    #[error("controller status {0}")]
    Status(HciStatus),

    /// Reading a configuration file failed
    #[error("config file: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid YAML
    #[error("config YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

impl Error {
    /// Status reported to the host for this failure
    pub fn status(&self) -> HciStatus {
        match self {
            Error::Status(status) => *status,
            Error::Config(_) => HciStatus::InvalidHciCommandParameters,
            Error::Protocol(_) => HciStatus::InvalidLlParameters,
            Error::StateMachine(_) => HciStatus::CommandDisallowed,
            Error::Crypto(_) | Error::Io(_) | Error::YamlParse(_) => HciStatus::UnspecifiedError,
        }
    }
}

impl From<HciStatus> for Error {
    fn from(status: HciStatus) -> Self {
        Error::Status(status)
    }
}
