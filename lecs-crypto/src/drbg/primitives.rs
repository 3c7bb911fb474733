//! DRBG building blocks: block chaining, seed derivation, update and
//! instantiation. All values are least-significant octet first.

use crate::aes::{encrypt_block, xor_block, Block, BlockCipher, BLOCK_SIZE};
use crate::error::{CryptoError, Result};

/// Length of the seed derivation input (IV || IN || PV, 320 bits)
pub const SEED_INPUT_LEN: usize = 40;

/// Length of a derived seed (256 bits)
pub const SEED_LEN: usize = 32;

/// Seed derivation padded buffer (640 bits)
const SEED_BUFFER_LEN: usize = 80;

/// Fixed key used by `derive_seed` (0x000102..0F, most-significant first)
const DERIVATION_KEY: Block = [
    0x0f, 0x0e, 0x0d, 0x0c, 0x0b, 0x0a, 0x09, 0x08,
    0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0x00,
];

/// XOR-then-encrypt chaining over a whole number of blocks.
///
/// Blocks are consumed from the most-significant end of `input` down to the
/// least-significant one.
pub fn chain<C: BlockCipher + ?Sized>(cipher: &C, key: &Block, input: &[u8]) -> Result<Block> {
    if input.is_empty() || input.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidLength {
            expected: BLOCK_SIZE,
            actual: input.len(),
        });
    }

    let mut acc = [0u8; BLOCK_SIZE];
    for chunk in input.chunks_exact(BLOCK_SIZE).rev() {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        xor_block(&mut acc, &block);
        acc = encrypt_block(cipher, key, &acc)?;
    }
    Ok(acc)
}

/// Derives 256 bits of seed material from a 320-bit input.
pub fn derive_seed<C: BlockCipher + ?Sized>(
    cipher: &C,
    input: &[u8; SEED_INPUT_LEN],
) -> Result<[u8; SEED_LEN]> {
    // Layout, least-significant octet first:
    //   [0..16)  zero block with the 0x80 pad marker in its top octet
    //   [16..56) input
    //   [56..60) output length (32), [60..64) input length (40)
    //   [64..80) block counter, 0 for the temporary key and 1 for the value
    let mut buf = [0u8; SEED_BUFFER_LEN];
    buf[15] = 0x80;
    buf[16..56].copy_from_slice(input);
    buf[56..60].copy_from_slice(&(SEED_LEN as u32).to_le_bytes());
    buf[60..64].copy_from_slice(&(SEED_INPUT_LEN as u32).to_le_bytes());

    let temp_key = chain(cipher, &DERIVATION_KEY, &buf)?;
    buf[76] = 0x01;
    let x = chain(cipher, &DERIVATION_KEY, &buf)?;

    let x1 = encrypt_block(cipher, &temp_key, &x)?;
    let x2 = encrypt_block(cipher, &temp_key, &x1)?;

    let mut seed = [0u8; SEED_LEN];
    seed[..BLOCK_SIZE].copy_from_slice(&x2);
    seed[BLOCK_SIZE..].copy_from_slice(&x1);
    Ok(seed)
}

/// Refreshes key and nonce, optionally mixing in seed material.
///
/// `update(None, ..)` is the backtracking-resistance step.
pub fn update<C: BlockCipher + ?Sized>(
    cipher: &C,
    seed: Option<&[u8; SEED_LEN]>,
    key: &mut Block,
    nonce: &mut Block,
) -> Result<()> {
    nonce[0] = nonce[0].wrapping_add(1);
    let t0 = encrypt_block(cipher, key, nonce)?;
    nonce[0] = nonce[0].wrapping_add(1);
    let t1 = encrypt_block(cipher, key, nonce)?;

    let mut x = [0u8; SEED_LEN];
    x[..BLOCK_SIZE].copy_from_slice(&t1);
    x[BLOCK_SIZE..].copy_from_slice(&t0);
    if let Some(seed) = seed {
        for (out, s) in x.iter_mut().zip(seed.iter()) {
            *out ^= s;
        }
    }

    key.copy_from_slice(&x[BLOCK_SIZE..]);
    nonce.copy_from_slice(&x[..BLOCK_SIZE]);
    Ok(())
}

/// One-time setup from the exchanged security vectors.
///
/// Returns `(key, nonce)`.
pub fn instantiate<C: BlockCipher + ?Sized>(
    cipher: &C,
    iv: &[u8; 16],
    instantiation_nonce: &[u8; 8],
    pv: &[u8; 16],
) -> Result<(Block, Block)> {
    let mut input = [0u8; SEED_INPUT_LEN];
    input[..16].copy_from_slice(pv);
    input[16..24].copy_from_slice(instantiation_nonce);
    input[24..].copy_from_slice(iv);

    let seed = derive_seed(cipher, &input)?;
    let mut key = [0u8; BLOCK_SIZE];
    let mut nonce = [0u8; BLOCK_SIZE];
    update(cipher, Some(&seed), &mut key, &mut nonce)?;
    Ok((key, nonce))
}
