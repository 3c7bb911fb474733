//! Radio boundary
//!
//! The engine never touches hardware. For every transmission slot of a step
//! it hands a [`SlotRequest`] to a [`CsRadio`] and gets back either the
//! slot's measurements or a loss of synchronization.

use lecs_common::{ConnHandle, CsRole, LlTime};

use crate::step::{SlotKind, Step};

/// Tone quality value used when no tone was measured
pub const TONE_QUALITY_UNAVAILABLE: u8 = 3;

/// One slot the radio has to run
#[derive(Debug, Clone, Copy)]
pub struct SlotRequest<'a> {
    /// Connection the CS procedure runs on
    pub handle: ConnHandle,
    /// Local CS role
    pub role: CsRole,
    /// Step the slot belongs to
    pub step: &'a Step,
    /// Slot kind
    pub slot: SlotKind,
    /// Slot start
    pub start: LlTime,
    /// Slot length
    pub duration_us: u32,
}

impl SlotRequest<'_> {
    /// True if the local side transmits in this slot
    pub fn is_transmit(&self) -> bool {
        self.slot.transmitter() == self.role
    }
}

/// Phase measurement of one tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToneSample {
    /// Phase correction term, 12-bit I in the low bits and 12-bit Q above
    pub pct: u32,
    /// Tone quality indicator
    pub quality: u8,
}

/// Measurements of one received slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotReport {
    /// Packet quality of a received CS_SYNC
    pub packet_quality: u8,
    /// Packet RSSI in dBm
    pub rssi: i8,
    /// Normalized attack detector metric
    pub nadm: u8,
    /// Time of arrival minus time of departure, 0.5 ns units
    pub toa_tod: i16,
    /// Measured frequency offset
    pub freq_offset: i16,
    /// Antenna used
    pub antenna: u8,
    /// Tones measured in a tone slot
    pub tones: Vec<ToneSample>,
}

/// Result of running one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Slot ran; the report is empty for transmit slots
    Completed(SlotReport),
    /// The expected CS_SYNC was not received
    SyncLost,
}

/// Radio driver used by the engine.
///
/// Calls happen in slot order and must not block.
pub trait CsRadio {
    /// Runs one transmission slot
    fn run_slot(&mut self, request: &SlotRequest<'_>) -> SlotOutcome;
}

impl<R: CsRadio + ?Sized> CsRadio for Box<R> {
    fn run_slot(&mut self, request: &SlotRequest<'_>) -> SlotOutcome {
        (**self).run_slot(request)
    }
}
