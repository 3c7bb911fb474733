//! Error type for the CS procedure engine
//!
//! Every failure carries the controller status code the host or the peer
//! eventually sees, so callers never have to guess a mapping.

use lecs_common::HciStatus;
use lecs_crypto::CryptoError;
use lecs_pdu::PduError;
use lecs_sched::SchedError;
use thiserror::Error;

/// Errors raised by the CS engine.
#[derive(Debug, Error)]
pub enum CsError {
    /// Request refused with a specific status
    #[error("{status}: {reason}")]
    Status {
        /// Status reported upward or to the peer
        status: HciStatus,
        /// Short description for logs
        reason: &'static str,
    },

    /// DRBG failure
    #[error("DRBG error: {0}")]
    Crypto(#[from] CryptoError),

    /// Malformed PDU or HCI packet
    #[error("Codec error: {0}")]
    Pdu(#[from] PduError),

    /// No radio time available
    #[error("Scheduling error: {0}")]
    Sched(#[from] SchedError),

    /// Unknown connection handle
    #[error("Unknown connection {0:#06x}")]
    UnknownConnection(u16),
}

impl CsError {
    /// Error with an explicit status
    pub fn new(status: HciStatus, reason: &'static str) -> Self {
        CsError::Status { status, reason }
    }

    /// Out-of-range or inconsistent host parameters
    pub fn invalid(reason: &'static str) -> Self {
        Self::new(HciStatus::InvalidHciCommandParameters, reason)
    }

    /// Request not allowed in the current state
    pub fn disallowed(reason: &'static str) -> Self {
        Self::new(HciStatus::CommandDisallowed, reason)
    }

    /// Feature or value not supported by one of the controllers
    pub fn unsupported(reason: &'static str) -> Self {
        Self::new(HciStatus::UnsupportedFeature, reason)
    }

    /// Status code reported for this error
    pub fn status(&self) -> HciStatus {
        match self {
            CsError::Status { status, .. } => *status,
            CsError::Crypto(e) => e.status(),
            CsError::Pdu(e) => e.status(),
            CsError::Sched(_) => HciStatus::ControllerBusy,
            CsError::UnknownConnection(_) => HciStatus::UnknownConnectionId,
        }
    }
}

impl From<CsError> for lecs_common::Error {
    fn from(err: CsError) -> Self {
        lecs_common::Error::Status(err.status())
    }
}

/// Result type for CS engine operations
pub type Result<T> = std::result::Result<T, CsError>;
