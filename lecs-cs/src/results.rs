//! Step results and their delivery to the host
//!
//! Radio reports are packed into the per-mode step data layout, and the
//! steps of one subevent are split across a subevent result event and as
//! many continue events as the event payload limit requires.

use bytes::BufMut;

use lecs_common::{ConnHandle, CsRole, StepMode};
use lecs_pdu::hci::event::{SUBEVENT_CONTINUE_HEADER_LEN, SUBEVENT_RESULT_HEADER_LEN};
use lecs_pdu::hci::{
    AbortReasons, DoneStatus, HciEvent, StepResult, SubeventResult, SubeventResultContinue,
};

use crate::radio::{SlotReport, ToneSample, TONE_QUALITY_UNAVAILABLE};

/// Frequency compensation value reported when none is available
pub const FREQ_COMPENSATION_UNAVAILABLE: i16 = -0x4000;

fn put_sync_fields(data: &mut Vec<u8>, report: &SlotReport) {
    data.put_u8(report.packet_quality);
    data.put_u8(report.nadm);
    data.put_i8(report.rssi);
    data.put_i16_le(report.toa_tod);
    data.put_u8(report.antenna);
}

fn put_tone_fields(data: &mut Vec<u8>, permutation: u8, tones: &[ToneSample], antenna_paths: u8) {
    data.put_u8(permutation);
    for i in 0..=usize::from(antenna_paths) {
        let tone = tones.get(i).copied().unwrap_or(ToneSample {
            pct: 0,
            quality: TONE_QUALITY_UNAVAILABLE,
        });
        let pct = tone.pct & 0x00FF_FFFF;
        data.put_u16_le(pct as u16);
        data.put_u8((pct >> 16) as u8);
        data.put_u8(tone.quality);
    }
}

/// Packs the data of one step.
///
/// * `role` - local CS role
/// * `sync` - report of the received CS_SYNC, if the mode has one
/// * `tones` - tones measured in the received tone slot
pub fn pack_step(
    mode: StepMode,
    role: CsRole,
    sync: &SlotReport,
    tones: &[ToneSample],
    antenna_permutation: u8,
    antenna_paths: u8,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + 4 * (usize::from(antenna_paths) + 1));
    match mode {
        StepMode::Mode0 => {
            data.put_u8(sync.packet_quality);
            data.put_i8(sync.rssi);
            data.put_u8(sync.antenna);
            if role == CsRole::Initiator {
                data.put_i16_le(sync.freq_offset);
            }
        }
        StepMode::Mode1 => put_sync_fields(&mut data, sync),
        StepMode::Mode2 => put_tone_fields(&mut data, antenna_permutation, tones, antenna_paths),
        StepMode::Mode3 => {
            put_sync_fields(&mut data, sync);
            put_tone_fields(&mut data, antenna_permutation, tones, antenna_paths);
        }
    }
    data
}

/// Header fields shared by every event of one subevent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultHeader {
    /// Connection
    pub handle: ConnHandle,
    /// Configuration
    pub config_id: u8,
    /// ACL connection event the CS event is anchored to
    pub start_acl_conn_event: u16,
    /// Procedure counter
    pub procedure_counter: u16,
    /// Frequency compensation
    pub frequency_compensation: i16,
    /// Reference power level
    pub reference_power_level: i8,
    /// Antenna paths
    pub num_antenna_paths: u8,
}

/// Splits a subevent's results into events that fit `max_payload`.
///
/// Every event but the last reports both done statuses as partial; the
/// last one carries the real statuses and abort reasons. A step that does
/// not fit even an empty event is sent alone.
pub fn batch_subevent(
    header: &ResultHeader,
    steps: Vec<StepResult>,
    procedure_done: DoneStatus,
    subevent_done: DoneStatus,
    abort: AbortReasons,
    max_payload: usize,
) -> Vec<HciEvent> {
    let first_cap = max_payload.saturating_sub(1 + SUBEVENT_RESULT_HEADER_LEN);
    let next_cap = max_payload.saturating_sub(1 + SUBEVENT_CONTINUE_HEADER_LEN);

    let mut chunks: Vec<Vec<StepResult>> = vec![Vec::new()];
    let mut used = 0usize;
    for step in steps {
        let cap = if chunks.len() == 1 { first_cap } else { next_cap };
        let len = step.encoded_len();
        let current_empty = chunks.last().map(Vec::is_empty).unwrap_or(true);
        if !current_empty && used + len > cap {
            chunks.push(Vec::new());
            used = 0;
        }
        used += len;
        if let Some(chunk) = chunks.last_mut() {
            chunk.push(step);
        }
    }

    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, steps)| {
            let (procedure_done, subevent_done, abort) = if i == last {
                (procedure_done, subevent_done, abort)
            } else {
                (DoneStatus::Partial, DoneStatus::Partial, AbortReasons::default())
            };
            if i == 0 {
                HciEvent::SubeventResult(SubeventResult {
                    handle: header.handle,
                    config_id: header.config_id,
                    start_acl_conn_event: header.start_acl_conn_event,
                    procedure_counter: header.procedure_counter,
                    frequency_compensation: header.frequency_compensation,
                    reference_power_level: header.reference_power_level,
                    procedure_done,
                    subevent_done,
                    abort,
                    num_antenna_paths: header.num_antenna_paths,
                    steps,
                })
            } else {
                HciEvent::SubeventResultContinue(SubeventResultContinue {
                    handle: header.handle,
                    config_id: header.config_id,
                    procedure_done,
                    subevent_done,
                    abort,
                    num_antenna_paths: header.num_antenna_paths,
                    steps,
                })
            }
        })
        .collect()
}
