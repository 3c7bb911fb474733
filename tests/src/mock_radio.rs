//! Mock radio driver
//!
//! Completes every slot with fixed measurements and records what it was
//! asked to run. Loss of CS_SYNC can be injected on received sync slots.

use lecs_common::{CsRole, LlTime};
use lecs_cs::{CsRadio, SlotKind, SlotOutcome, SlotReport, SlotRequest, ToneSample};

/// One slot handed to the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLog {
    pub start: LlTime,
    pub step_counter: u16,
    pub channel: u8,
    pub slot: SlotKind,
    pub transmit: bool,
}

#[derive(Debug, Default)]
pub struct MockRadio {
    log: Vec<SlotLog>,
    lose_sync: usize,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` received CS_SYNC slots
    pub fn lose_sync(&mut self, count: usize) {
        self.lose_sync = count;
    }

    pub fn slots(&self) -> &[SlotLog] {
        &self.log
    }

    /// (step counter, channel) of every step the radio started
    pub fn steps(&self) -> Vec<(u16, u8)> {
        let mut steps: Vec<(u16, u8)> = Vec::new();
        for slot in &self.log {
            if steps.last().map(|(counter, _)| *counter != slot.step_counter).unwrap_or(true) {
                steps.push((slot.step_counter, slot.channel));
            }
        }
        steps
    }

    pub fn clear(&mut self) {
        self.log.clear();
    }
}

impl CsRadio for MockRadio {
    fn run_slot(&mut self, request: &SlotRequest<'_>) -> SlotOutcome {
        let transmit = request.is_transmit();
        self.log.push(SlotLog {
            start: request.start,
            step_counter: request.step.counter,
            channel: request.step.channel,
            slot: request.slot,
            transmit,
        });
        if transmit {
            return SlotOutcome::Completed(SlotReport::default());
        }
        if request.slot.is_sync() {
            if self.lose_sync > 0 {
                self.lose_sync -= 1;
                return SlotOutcome::SyncLost;
            }
            return SlotOutcome::Completed(SlotReport {
                packet_quality: 0,
                rssi: -58,
                toa_tod: match request.role {
                    CsRole::Initiator => 120,
                    CsRole::Reflector => 0,
                },
                ..SlotReport::default()
            });
        }
        SlotOutcome::Completed(SlotReport {
            tones: vec![
                ToneSample {
                    pct: 0x0040_0200,
                    quality: 0,
                };
                2
            ],
            ..SlotReport::default()
        })
    }
}
