//! Crypto error type

use lecs_common::HciStatus;
use thiserror::Error;

/// Errors raised by the block cipher and the DRBG.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The block cipher failed to encrypt
    #[error("block encryption failed: {0}")]
    Encrypt(String),

    /// Input length is not usable by the operation
    #[error("invalid input length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Required length or multiple
        expected: usize,
        /// Provided length
        actual: usize,
    },

    /// `rand_range` called with an empty range
    #[error("random range bound must be non-zero")]
    ZeroBound,
}

impl CryptoError {
    /// Controller status reported when a DRBG failure ends a procedure
    pub fn status(&self) -> HciStatus {
        HciStatus::UnspecifiedError
    }
}

impl From<CryptoError> for lecs_common::Error {
    fn from(err: CryptoError) -> Self {
        lecs_common::Error::Crypto(err.to_string())
    }
}

/// Result alias for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
