//! Higher-level draws built on `rand`, `rand_range` and `shuffle`.

use lecs_common::RttType;

use super::{DrbgContext, TransactionId};
use crate::aes::BlockCipher;
use crate::error::{CryptoError, Result};

/// Length of a sounding-sequence marker in bits
const MARKER_BITS: usize = 4;

/// Highest start position of the second marker in a 96-bit sequence
const SECOND_MARKER_LIMIT: u8 = 92;

/// Autocorrelation imbalance of a 32-bit access address, summed over
/// shifts 1..=3. Lower is better.
pub(crate) fn autocorrelation_score(value: u32) -> u32 {
    let mut total = 0;
    for shift in 1..=3u32 {
        let mut balance: i32 = 0;
        for i in 0..(32 - shift) {
            if (value >> i) & 1 == (value >> (i + shift)) & 1 {
                balance += 1;
            } else {
                balance -= 1;
            }
        }
        total += balance.unsigned_abs();
    }
    total
}

/// A sounding sequence with its embedded markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundingSequence {
    /// Sequence bits, bit `i` at byte `i / 8` bit `i % 8`
    pub bits: Vec<u8>,
    /// Sequence length in bits
    pub len_bits: usize,
    /// Marker start positions and orientation (`true`: `1100`)
    pub markers: Vec<(u8, bool)>,
}

impl SoundingSequence {
    /// Value of bit `i`
    pub fn bit(&self, i: usize) -> bool {
        self.bits
            .get(i / 8)
            .map(|byte| byte & (1 << (i % 8)) != 0)
            .unwrap_or(false)
    }
}

impl<C: BlockCipher> DrbgContext<C> {
    /// Initiator and reflector access addresses for a step.
    ///
    /// Four candidates are drawn; each role keeps the better of its pair.
    pub fn access_addresses(&mut self, step: u16) -> Result<(u32, u32)> {
        let mut buf = [0u8; 16];
        self.rand(step, TransactionId::AccessAddress, &mut buf)?;

        let mut candidates = [0u32; 4];
        for (candidate, chunk) in candidates.iter_mut().zip(buf.chunks_exact(4)) {
            *candidate = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let pick = |a: u32, b: u32| {
            if autocorrelation_score(a) <= autocorrelation_score(b) {
                a
            } else {
                b
            }
        };
        Ok((pick(candidates[0], candidates[1]), pick(candidates[2], candidates[3])))
    }

    /// Marker start positions for a 32- or 96-bit sounding sequence.
    ///
    /// A 96-bit sequence carries a second marker unless it would start
    /// beyond bit 92.
    pub fn marker_positions(&mut self, step: u16, sequence_bits: u32) -> Result<(u8, Option<u8>)> {
        let tid = TransactionId::MarkerPosition;
        if sequence_bits == 32 {
            return Ok((self.rand_range(step, tid, 29)?, None));
        }
        let first = self.rand_range(step, tid, 64)?;
        let second = self.rand_range(step, tid, 75)? + 67;
        Ok((first, (second <= SECOND_MARKER_LIMIT).then_some(second)))
    }

    /// Marker orientation: `false` selects `0011`, `true` selects `1100`.
    pub fn marker_selection(&mut self, step: u16) -> Result<bool> {
        self.rand_bit(step, TransactionId::MarkerSignal)
    }

    /// Builds a sounding sequence for a sounding RTT type.
    pub fn sounding_sequence(&mut self, step: u16, rtt: RttType) -> Result<SoundingSequence> {
        let len_bits = rtt.sequence_bits() as usize;
        if !rtt.is_sounding() {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                actual: len_bits,
            });
        }

        // Alternating 0101... with bit 0 clear
        let mut bits = vec![0xAAu8; len_bits / 8];
        let (first, second) = self.marker_positions(step, rtt.sequence_bits())?;

        let mut markers = Vec::with_capacity(2);
        for pos in std::iter::once(first).chain(second) {
            let selection = self.marker_selection(step)?;
            let pattern: [bool; MARKER_BITS] = if selection {
                [true, true, false, false]
            } else {
                [false, false, true, true]
            };
            for (k, &value) in pattern.iter().enumerate() {
                let i = usize::from(pos) + k;
                if value {
                    bits[i / 8] |= 1 << (i % 8);
                } else {
                    bits[i / 8] &= !(1 << (i % 8));
                }
            }
            markers.push((pos, selection));
        }

        Ok(SoundingSequence {
            bits,
            len_bits,
            markers,
        })
    }

    /// Random RTT payload for a random-sequence RTT type.
    pub fn random_sequence(&mut self, step: u16, rtt: RttType) -> Result<Vec<u8>> {
        let mut out = vec![0u8; rtt.sequence_bits() as usize / 8];
        self.rand(step, TransactionId::RandomSequence, &mut out)?;
        Ok(out)
    }

    /// Tone extension presence for the initiator and the reflector.
    pub fn tone_extension_presence(&mut self, step: u16) -> Result<(bool, bool)> {
        let tid = TransactionId::ToneExtensionPresence;
        let initiator = self.rand_bit(step, tid)?;
        let reflector = self.rand_bit(step, tid)?;
        Ok((initiator, reflector))
    }

    /// Antenna path permutation index in `[0, n_ap!)`.
    pub fn antenna_permutation(&mut self, step: u16, antenna_paths: u8) -> Result<u8> {
        let permutations: u8 = match antenna_paths {
            0 | 1 => return Ok(0),
            2 => 2,
            3 => 6,
            _ => 24,
        };
        self.rand_range(step, TransactionId::AntennaPathPermutation, permutations)
    }

    /// Number of main-mode steps before the next sub-mode step.
    pub fn main_mode_steps(&mut self, step: u16, min: u8, max: u8) -> Result<u8> {
        let span = max.saturating_sub(min).saturating_add(1);
        Ok(min + self.rand_range(step, TransactionId::SubeventSubmode, span)?)
    }
}

/// How a channel pool is refilled once exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolShape {
    /// Channel selection #3b: one shuffle of the channel list, cycled
    /// `repetition` times
    Shuffled {
        /// Cycles per refill
        repetition: u8,
    },
    /// Channel selection #3c: interleaved groups in shuffled order
    Grouped {
        /// Number of groups
        jump: u8,
        /// Walk each group outside-in instead of as a hat
        x_shape: bool,
    },
}

/// A pool of hop channels, refilled from the DRBG when exhausted.
#[derive(Debug, Clone)]
pub struct ChannelPool {
    tid: TransactionId,
    channels: Vec<u8>,
    shape: PoolShape,
    order: Vec<u8>,
    next: usize,
}

impl ChannelPool {
    /// Creates an empty pool over `channels` (ascending)
    pub fn new(tid: TransactionId, channels: Vec<u8>, shape: PoolShape) -> Self {
        Self {
            tid,
            channels,
            shape,
            order: Vec::new(),
            next: 0,
        }
    }

    /// Channels not yet handed out before the next refill
    pub fn remaining(&self) -> usize {
        self.order.len().saturating_sub(self.next)
    }

    /// Forces a refill at the next draw
    pub fn reset(&mut self) {
        self.order.clear();
        self.next = 0;
    }

    /// Replaces the channel list; the pool refills at the next draw
    pub fn set_channels(&mut self, channels: Vec<u8>) {
        self.channels = channels;
        self.reset();
    }

    /// Next hop channel; `step` is the cumulative step count.
    pub fn next_channel<C: BlockCipher>(
        &mut self,
        drbg: &mut DrbgContext<C>,
        step: u16,
    ) -> Result<u8> {
        if self.next >= self.order.len() {
            self.refill(drbg, step)?;
        }
        let channel = self
            .order
            .get(self.next)
            .copied()
            .ok_or(CryptoError::InvalidLength {
                expected: 1,
                actual: 0,
            })?;
        self.next += 1;
        Ok(channel)
    }

    fn refill<C: BlockCipher>(&mut self, drbg: &mut DrbgContext<C>, step: u16) -> Result<()> {
        self.next = 0;
        self.order = match self.shape {
            PoolShape::Shuffled { repetition } => {
                let shuffled = drbg.shuffle(step, self.tid, &self.channels)?;
                shuffled.repeat(usize::from(repetition.max(1)))
            }
            PoolShape::Grouped { jump, x_shape } => {
                let jump = usize::from(jump.clamp(2, 8)).min(self.channels.len().max(1));
                let groups: Vec<u8> = (0..jump as u8).collect();
                let group_order = drbg.shuffle(step, self.tid, &groups)?;

                let mut order = Vec::with_capacity(self.channels.len());
                for (n, &g) in group_order.iter().enumerate() {
                    let group: Vec<u8> = self
                        .channels
                        .iter()
                        .skip(usize::from(g))
                        .step_by(jump)
                        .copied()
                        .collect();
                    if x_shape {
                        walk_outside_in(&group, &mut order);
                    } else if n % 2 == 0 {
                        order.extend(group.iter());
                    } else {
                        order.extend(group.iter().rev());
                    }
                }
                order
            }
        };
        Ok(())
    }
}

fn walk_outside_in(group: &[u8], out: &mut Vec<u8>) {
    let (mut lo, mut hi) = (0usize, group.len());
    while lo < hi {
        out.push(group[lo]);
        lo += 1;
        if lo < hi {
            hi -= 1;
            out.push(group[hi]);
        }
    }
}
