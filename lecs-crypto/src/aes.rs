//! AES-128 in controller byte order
//!
//! The controller stores every 128-bit quantity least-significant octet
//! first, the order in which it travels over the air. AES works on the
//! most-significant octet first, so `encrypt_block` reverses key, input and
//! output around the primitive.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::error::Result;

/// Octets in one 128-bit block
pub const BLOCK_SIZE: usize = 16;

/// One 128-bit value
pub type Block = [u8; BLOCK_SIZE];

/// A 128-bit block cipher working most-significant octet first.
///
/// The DRBG only needs the encrypt direction. Hardware-backed
/// implementations may fail; the software one never does.
pub trait BlockCipher {
    /// Encrypts `data` under `key`
    fn encrypt(&self, key: &Block, data: &Block) -> Result<Block>;
}

/// RustCrypto software AES-128
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftAes;

impl BlockCipher for SoftAes {
    fn encrypt(&self, key: &Block, data: &Block) -> Result<Block> {
        let aes = Aes128::new(GenericArray::from_slice(key));
        let mut block = GenericArray::clone_from_slice(data);
        aes.encrypt_block(&mut block);
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(&block);
        Ok(out)
    }
}

/// Encrypts a least-significant-octet-first block under a
/// least-significant-octet-first key.
pub fn encrypt_block<C: BlockCipher + ?Sized>(cipher: &C, key: &Block, data: &Block) -> Result<Block> {
    let mut out = cipher.encrypt(&reversed(key), &reversed(data))?;
    out.reverse();
    Ok(out)
}

fn reversed(block: &Block) -> Block {
    let mut out = *block;
    out.reverse();
    out
}

/// `acc ^= other`, octet by octet
#[inline]
pub fn xor_block(acc: &mut Block, other: &Block) {
    acc.iter_mut().zip(other).for_each(|(a, b)| *a ^= b);
}
