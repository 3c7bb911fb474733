//! Channel Sounding deterministic random bit generator
//!
//! Both peers instantiate the same context from the exchanged security
//! vectors and afterwards draw identical randomness without talking to each
//! other. Every draw is keyed by the cumulative step count and a transaction
//! id; each transaction keeps its own cache of unread bytes and bits.

mod derived;
mod primitives;

pub use derived::{ChannelPool, PoolShape, SoundingSequence};
pub use primitives::{chain, derive_seed, instantiate, update, SEED_INPUT_LEN, SEED_LEN};

use std::fmt;

use tracing::trace;
use zeroize::Zeroize;

use crate::aes::{encrypt_block, Block, BlockCipher, SoftAes, BLOCK_SIZE};
use crate::error::{CryptoError, Result};

/// Number of transaction ids
pub const NUM_TRANSACTIONS: usize = 10;

/// DRBG transaction identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionId {
    /// Hop channel for steps other than mode 0
    HopChannelNonMode0 = 0,
    /// Hop channel for mode-0 steps
    HopChannelMode0 = 1,
    /// Main-mode step count before the next sub-mode step
    SubeventSubmode = 2,
    /// Tone extension presence
    ToneExtensionPresence = 3,
    /// Antenna path permutation
    AntennaPathPermutation = 4,
    /// CS access addresses
    AccessAddress = 5,
    /// Sounding sequence marker positions
    MarkerPosition = 6,
    /// Sounding sequence marker orientation
    MarkerSignal = 7,
    /// Random RTT payload
    RandomSequence = 8,
    /// Backtracking resistance
    BacktrackingResistance = 9,
}

impl TransactionId {
    fn index(self) -> usize {
        self as usize
    }
}

/// Unread output of one transaction
#[derive(Clone, Default)]
struct TransactionCache {
    step: u16,
    counter: u8,
    bytes: Block,
    free_bytes: usize,
    bits: u8,
    free_bits: u8,
}

impl TransactionCache {
    fn reset(&mut self, step: u16) {
        self.bytes.zeroize();
        *self = TransactionCache {
            step,
            ..TransactionCache::default()
        };
    }
}

/// Per-connection DRBG state
pub struct DrbgContext<C: BlockCipher = SoftAes> {
    cipher: C,
    key: Block,
    nonce: Block,
    caches: [TransactionCache; NUM_TRANSACTIONS],
}

impl DrbgContext<SoftAes> {
    /// Instantiates a context with the software AES.
    pub fn new(iv: &[u8; 16], instantiation_nonce: &[u8; 8], pv: &[u8; 16]) -> Result<Self> {
        Self::with_cipher(SoftAes, iv, instantiation_nonce, pv)
    }
}

impl<C: BlockCipher> DrbgContext<C> {
    /// Instantiates a context on top of the given cipher.
    pub fn with_cipher(
        cipher: C,
        iv: &[u8; 16],
        instantiation_nonce: &[u8; 8],
        pv: &[u8; 16],
    ) -> Result<Self> {
        let (key, nonce) = instantiate(&cipher, iv, instantiation_nonce, pv)?;
        Ok(Self::from_state(cipher, key, nonce))
    }

    /// Builds a context from an already derived key and nonce.
    pub fn from_state(cipher: C, key: Block, nonce: Block) -> Self {
        Self {
            cipher,
            key,
            nonce,
            caches: Default::default(),
        }
    }

    /// Fills `out` with random bytes for the given step and transaction.
    ///
    /// Bytes are served from the top of the cached block downwards. A new
    /// step count discards whatever the transaction had cached.
    pub fn rand(&mut self, step: u16, tid: TransactionId, out: &mut [u8]) -> Result<()> {
        for byte in out.iter_mut() {
            *byte = self.next_byte(step, tid)?;
        }
        Ok(())
    }

    /// Draws one random byte.
    pub fn rand_byte(&mut self, step: u16, tid: TransactionId) -> Result<u8> {
        self.next_byte(step, tid)
    }

    fn next_byte(&mut self, step: u16, tid: TransactionId) -> Result<u8> {
        let idx = tid.index();
        if self.caches[idx].step != step {
            self.caches[idx].reset(step);
        }

        if self.caches[idx].free_bytes == 0 {
            let counter = self.caches[idx].counter;
            let mut v = self.nonce;
            v[0] = v[0].wrapping_add(counter);
            v[1] = v[1].wrapping_add(tid as u8);
            let s = u16::from_le_bytes([v[2], v[3]]).wrapping_add(step);
            v[2..4].copy_from_slice(&s.to_le_bytes());

            let block = encrypt_block(&self.cipher, &self.key, &v)?;
            let cache = &mut self.caches[idx];
            cache.bytes = block;
            cache.counter = counter.wrapping_add(1);
            cache.free_bytes = BLOCK_SIZE;
            trace!(step, tid = ?tid, counter, "DRBG block refill");
        }

        let cache = &mut self.caches[idx];
        cache.free_bytes -= 1;
        Ok(cache.bytes[cache.free_bytes])
    }

    /// Uniform integer in `[0, bound)` from one byte, redrawn once when the
    /// first draw falls in the biased region.
    pub fn rand_range(&mut self, step: u16, tid: TransactionId, bound: u8) -> Result<u8> {
        if bound == 0 {
            return Err(CryptoError::ZeroBound);
        }
        let bound = u16::from(bound);
        let mut t = bound * u16::from(self.next_byte(step, tid)?);
        let threshold = (256 - bound) % bound;
        if (t & 0xff) < threshold {
            t = bound * u16::from(self.next_byte(step, tid)?);
        }
        Ok((t >> 8) as u8)
    }

    /// Draws one bit, consuming cached bytes most-significant bit first.
    pub fn rand_bit(&mut self, step: u16, tid: TransactionId) -> Result<bool> {
        let idx = tid.index();
        if self.caches[idx].step != step {
            self.caches[idx].reset(step);
        }
        if self.caches[idx].free_bits == 0 {
            let byte = self.next_byte(step, tid)?;
            let cache = &mut self.caches[idx];
            cache.bits = byte;
            cache.free_bits = 8;
        }
        let cache = &mut self.caches[idx];
        let bit = cache.bits & 0x80 != 0;
        cache.bits <<= 1;
        cache.free_bits -= 1;
        Ok(bit)
    }

    /// Inside-out Fisher-Yates permutation of `input`.
    pub fn shuffle(&mut self, step: u16, tid: TransactionId, input: &[u8]) -> Result<Vec<u8>> {
        if input.len() > usize::from(u8::MAX) {
            return Err(CryptoError::InvalidLength {
                expected: usize::from(u8::MAX),
                actual: input.len(),
            });
        }
        let mut out = vec![0u8; input.len()];
        for (i, &value) in input.iter().enumerate() {
            let j = usize::from(self.rand_range(step, tid, (i + 1) as u8)?);
            if i != j {
                out[i] = out[j];
            }
            out[j] = value;
        }
        Ok(out)
    }

    /// Refreshes key and nonce without new seed material and drops every
    /// cached byte. Both peers call this at each procedure boundary.
    pub fn backtracking_resistance(&mut self) -> Result<()> {
        update(&self.cipher, None, &mut self.key, &mut self.nonce)?;
        for cache in self.caches.iter_mut() {
            cache.reset(0);
        }
        Ok(())
    }

    /// True if both contexts hold the same key and nonce.
    pub fn same_state(&self, other: &DrbgContext<C>) -> bool {
        self.key == other.key && self.nonce == other.nonce
    }
}

impl<C: BlockCipher> fmt::Debug for DrbgContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrbgContext")
            .field("key", &"<redacted>")
            .field("nonce", &"<redacted>")
            .finish()
    }
}

impl<C: BlockCipher> Drop for DrbgContext<C> {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
        for cache in self.caches.iter_mut() {
            cache.bytes.zeroize();
        }
    }
}
