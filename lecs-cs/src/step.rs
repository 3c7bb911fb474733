//! Steps and their transmission slots
//!
//! Every step is a short walk over transmission slots whose order is fixed
//! by the step mode:
//!
//! | Mode | Slots |
//! |------|-------|
//! | 0 | sync(I) → sync(R) → tone(R) |
//! | 1 | sync(I) → sync(R) |
//! | 2 | tone(I) → tone(R) |
//! | 3 | sync(I) → tone(I) → sync(R) → tone(R) |
//!
//! Slot lengths come from the negotiated timing values and are computed
//! once per procedure series; the gap between two slots depends only on the
//! pair of slot kinds.

use std::fmt;

use lecs_common::model::TimingFamily;
use lecs_common::{ConfigSpec, CsRole, Phy, StepMode};
use lecs_crypto::SoundingSequence;

use crate::error::{CsError, Result};

/// Guard time between a sync packet and the following tone, microseconds
pub const T_GD_US: u32 = 10;

/// Ramp-down time, microseconds
pub const T_RD_US: u32 = 5;

/// Frequency measurement window of mode-0 steps, microseconds
pub const T_FM_US: u32 = 80;

/// CS_SYNC packet length without RTT sequence on LE 1M
pub const SYNC_1M_US: u32 = 44;

/// CS_SYNC packet length without RTT sequence on LE 2M
pub const SYNC_2M_US: u32 = 26;

/// One transmission slot of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Initiator sends CS_SYNC
    SyncInitiator,
    /// Initiator sends tones
    ToneInitiator,
    /// Reflector sends CS_SYNC
    SyncReflector,
    /// Reflector sends tones
    ToneReflector,
}

impl SlotKind {
    /// First slot of a step
    pub fn first(mode: StepMode) -> SlotKind {
        match mode {
            StepMode::Mode2 => SlotKind::ToneInitiator,
            _ => SlotKind::SyncInitiator,
        }
    }

    /// Slot following `self` in a step of the given mode
    pub fn next(self, mode: StepMode) -> Option<SlotKind> {
        use SlotKind::*;
        match (mode, self) {
            (StepMode::Mode0, SyncInitiator) => Some(SyncReflector),
            (StepMode::Mode0, SyncReflector) => Some(ToneReflector),
            (StepMode::Mode1, SyncInitiator) => Some(SyncReflector),
            (StepMode::Mode2, ToneInitiator) => Some(ToneReflector),
            (StepMode::Mode3, SyncInitiator) => Some(ToneInitiator),
            (StepMode::Mode3, ToneInitiator) => Some(SyncReflector),
            (StepMode::Mode3, SyncReflector) => Some(ToneReflector),
            _ => None,
        }
    }

    /// Role that transmits in this slot
    pub fn transmitter(self) -> CsRole {
        match self {
            SlotKind::SyncInitiator | SlotKind::ToneInitiator => CsRole::Initiator,
            SlotKind::SyncReflector | SlotKind::ToneReflector => CsRole::Reflector,
        }
    }

    /// True for CS_SYNC slots
    pub fn is_sync(self) -> bool {
        matches!(self, SlotKind::SyncInitiator | SlotKind::SyncReflector)
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::SyncInitiator => write!(f, "sync-i"),
            SlotKind::ToneInitiator => write!(f, "tone-i"),
            SlotKind::SyncReflector => write!(f, "sync-r"),
            SlotKind::ToneReflector => write!(f, "tone-r"),
        }
    }
}

/// Slot lengths and step durations for one procedure series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTiming {
    t_fcs: u32,
    t_ip1: u32,
    t_ip2: u32,
    sync_plain: u32,
    sync_rtt: u32,
    tone: u32,
    durations: [u32; 4],
}

impl StepTiming {
    /// Derives the timing from a configuration.
    ///
    /// * `t_sw` - antenna switch time in microseconds
    /// * `antenna_paths` - N_AP of the negotiated ACI
    pub fn new(spec: &ConfigSpec, t_sw: u8, antenna_paths: u8) -> Result<Self> {
        let phy = spec.phy().ok_or(CsError::invalid("sync phy"))?;
        let rtt = spec.rtt().ok_or(CsError::invalid("rtt type"))?;
        let timing = |family| {
            spec.timing_us(family)
                .map(u32::from)
                .ok_or(CsError::invalid("timing index"))
        };
        let t_pm = timing(TimingFamily::Pm)?;

        let sync_plain = match phy {
            Phy::Le1M => SYNC_1M_US,
            Phy::Le2M | Phy::Le2M2Bt => SYNC_2M_US,
        };
        let mut out = Self {
            t_fcs: timing(TimingFamily::Fcs)?,
            t_ip1: timing(TimingFamily::Ip1)?,
            t_ip2: timing(TimingFamily::Ip2)?,
            sync_plain,
            sync_rtt: sync_plain + rtt.sequence_bits() / phy.bits_per_us(),
            tone: (u32::from(t_sw) + t_pm) * (u32::from(antenna_paths) + 1),
            durations: [0; 4],
        };
        for mode in [StepMode::Mode0, StepMode::Mode1, StepMode::Mode2, StepMode::Mode3] {
            out.durations[usize::from(mode.as_u8())] = out.walk(mode);
        }
        Ok(out)
    }

    fn walk(&self, mode: StepMode) -> u32 {
        let mut total = self.t_fcs;
        let mut slot = SlotKind::first(mode);
        loop {
            total += self.slot_us(mode, slot);
            match slot.next(mode) {
                Some(next) => {
                    total += self.gap_us(slot, next);
                    slot = next;
                }
                None => return total,
            }
        }
    }

    /// Length of one slot
    pub fn slot_us(&self, mode: StepMode, slot: SlotKind) -> u32 {
        match (mode, slot) {
            (StepMode::Mode0, SlotKind::SyncInitiator) => self.sync_plain + T_RD_US,
            (StepMode::Mode0, SlotKind::SyncReflector) => self.sync_plain,
            (StepMode::Mode0, _) => T_FM_US + T_RD_US,
            (StepMode::Mode1, _) => self.sync_rtt + T_RD_US,
            (StepMode::Mode3, SlotKind::SyncInitiator | SlotKind::SyncReflector) => self.sync_rtt,
            (_, _) => self.tone + T_RD_US,
        }
    }

    /// Gap between two consecutive slots
    pub fn gap_us(&self, from: SlotKind, to: SlotKind) -> u32 {
        use SlotKind::*;
        match (from, to) {
            (SyncInitiator, SyncReflector) => self.t_ip1,
            (ToneInitiator, ToneReflector) | (ToneInitiator, SyncReflector) => self.t_ip2,
            (SyncInitiator, ToneInitiator) | (SyncReflector, ToneReflector) => T_GD_US,
            _ => 0,
        }
    }

    /// Frequency change time preceding every step
    pub fn t_fcs_us(&self) -> u32 {
        self.t_fcs
    }

    /// Total length of a step, frequency change included
    pub fn step_us(&self, mode: StepMode) -> u32 {
        self.durations[usize::from(mode.as_u8())]
    }

    /// Slots of a step as (kind, offset from step start, length)
    pub fn slots(&self, mode: StepMode) -> Vec<(SlotKind, u32, u32)> {
        let mut out = Vec::with_capacity(4);
        let mut offset = self.t_fcs;
        let mut slot = Some(SlotKind::first(mode));
        while let Some(kind) = slot {
            let len = self.slot_us(mode, kind);
            out.push((kind, offset, len));
            offset += len;
            slot = kind.next(mode);
            if let Some(next) = slot {
                offset += self.gap_us(kind, next);
            }
        }
        out
    }
}

/// Round-trip timing payload sent after the access address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RttPayload {
    /// Sounding sequence with markers
    Sounding(SoundingSequence),
    /// Random bit sequence
    Random(Vec<u8>),
}

/// A fully resolved step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Cumulative DRBG step counter of this step
    pub counter: u16,
    /// Step mode
    pub mode: StepMode,
    /// Channel index
    pub channel: u8,
    /// True if the channel was replayed from the previous subevent
    pub repeated: bool,
    /// Initiator and reflector access addresses
    pub access_addresses: Option<(u32, u32)>,
    /// Initiator and reflector tone extension presence
    pub tone_extension: Option<(bool, bool)>,
    /// Antenna permutation index
    pub antenna_permutation: u8,
    /// Initiator and reflector RTT payloads
    pub rtt: Option<(RttPayload, RttPayload)>,
    /// Step length, frequency change included
    pub duration_us: u32,
}
