//! Cryptography for LE Channel Sounding
//!
//! - AES-128 block encryption in controller byte order
//! - The CS deterministic random bit generator and the draws built on it

pub mod aes;
pub mod drbg;
pub mod error;

pub use aes::{encrypt_block, Block, BlockCipher, SoftAes};
pub use drbg::{ChannelPool, DrbgContext, PoolShape, SoundingSequence, TransactionId};
pub use error::CryptoError;
