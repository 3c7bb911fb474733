//! HCI command/event boundary for Channel Sounding
//!
//! Commands arrive from the host as `opcode (2) || length (1) || parameters`.
//! Events leave as `event code (1) || length (1) || parameters`; CS events
//! are LE meta events whose first parameter octet is the subevent code.

pub mod command;
pub mod event;

pub use command::{
    decode_command, encode_command, CreateConfig, HciCommand, ProcedureEnable,
    SetProcedureParameters,
};
pub use event::{
    decode_event, encode_event, AbortReasons, ConfigComplete, DoneStatus, HciEvent,
    ProcedureAbortReason, ProcedureEnableComplete, ReturnParams, StepResult,
    SubeventAbortReason, SubeventResult, SubeventResultContinue,
};

use bytes::{Buf, BufMut};

use lecs_common::Capabilities;

use crate::fields;

/// Length of the capabilities block in HCI commands and events
pub const HCI_CAPABILITIES_LEN: usize = 28;

/// HCI subfeature bit: zero frequency actuation error
const HCI_SUBFEATURE_NO_FAE: u16 = 1 << 1;
/// HCI subfeature bit: channel selection #3c
const HCI_SUBFEATURE_CH3C: u16 = 1 << 2;
/// HCI subfeature bit: phase-based ranging from RTT sounding sequence
const HCI_SUBFEATURE_PBR_RTT: u16 = 1 << 3;

pub(crate) fn put_capabilities<B: BufMut>(caps: &Capabilities, buf: &mut B) {
    buf.put_u8(caps.num_configs);
    buf.put_u16_le(caps.max_procedures);
    buf.put_u8(caps.num_antennas);
    buf.put_u8(caps.max_antenna_paths);
    buf.put_u8(caps.roles);
    buf.put_u8(caps.mode_types);
    buf.put_u8(caps.rtt_capability);
    buf.put_u8(caps.rtt_aa_only_n);
    buf.put_u8(caps.rtt_sounding_n);
    buf.put_u8(caps.rtt_random_payload_n);
    buf.put_u16_le(caps.nadm_sounding_capability);
    buf.put_u16_le(caps.nadm_random_capability);
    buf.put_u8(caps.cs_sync_phys);
    let mut subfeatures = 0u16;
    if caps.no_fae {
        subfeatures |= HCI_SUBFEATURE_NO_FAE;
    }
    if caps.channel_selection_3c {
        subfeatures |= HCI_SUBFEATURE_CH3C;
    }
    if caps.pbr_from_rtt_sounding {
        subfeatures |= HCI_SUBFEATURE_PBR_RTT;
    }
    buf.put_u16_le(subfeatures);
    buf.put_u16_le(caps.t_ip1);
    buf.put_u16_le(caps.t_ip2);
    buf.put_u16_le(caps.t_fcs);
    buf.put_u16_le(caps.t_pm);
    buf.put_u8(caps.t_sw);
    buf.put_u8(caps.tx_snr_capability);
}

pub(crate) fn get_capabilities<B: Buf>(buf: &mut B) -> Capabilities {
    let num_configs = buf.get_u8();
    let max_procedures = buf.get_u16_le();
    let num_antennas = buf.get_u8();
    let max_antenna_paths = buf.get_u8();
    let roles = fields::roles(buf.get_u8());
    let mode_types = buf.get_u8();
    let rtt_capability = buf.get_u8();
    let rtt_aa_only_n = buf.get_u8();
    let rtt_sounding_n = buf.get_u8();
    let rtt_random_payload_n = buf.get_u8();
    let nadm_sounding_capability = buf.get_u16_le();
    let nadm_random_capability = buf.get_u16_le();
    let cs_sync_phys = buf.get_u8();
    let subfeatures = buf.get_u16_le();
    Capabilities {
        mode_types,
        rtt_capability,
        rtt_aa_only_n,
        rtt_sounding_n,
        rtt_random_payload_n,
        nadm_sounding_capability,
        nadm_random_capability,
        cs_sync_phys,
        num_antennas,
        max_antenna_paths,
        roles,
        no_fae: subfeatures & HCI_SUBFEATURE_NO_FAE != 0,
        channel_selection_3c: subfeatures & HCI_SUBFEATURE_CH3C != 0,
        pbr_from_rtt_sounding: subfeatures & HCI_SUBFEATURE_PBR_RTT != 0,
        num_configs,
        max_procedures,
        t_ip1: buf.get_u16_le(),
        t_ip2: buf.get_u16_le(),
        t_fcs: buf.get_u16_le(),
        t_pm: buf.get_u16_le(),
        t_sw: buf.get_u8(),
        tx_snr_capability: buf.get_u8(),
    }
}
