//! HCI events produced by the CS controller
//!
//! Command complete/status events acknowledge host commands; the CS
//! completions and measurement results are LE meta events.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use lecs_common::{
    Capabilities, ChannelMap, ConfigSpec, ConnHandle, CsRole, FaeTable, HciStatus, TimingFamily,
};

use super::{get_capabilities, put_capabilities};
use crate::codec::{get_array, PduError, Result};
use crate::fields::{self, get_u24_le, put_u24_le};
use crate::protocol::ConfigAction;

/// HCI_Command_Complete event code
pub const EVT_COMMAND_COMPLETE: u8 = 0x0E;
/// HCI_Command_Status event code
pub const EVT_COMMAND_STATUS: u8 = 0x0F;
/// HCI_LE_Meta event code
pub const EVT_LE_META: u8 = 0x3E;

/// LE meta subevent codes
pub const SUBEVT_REMOTE_CAPS_COMPLETE: u8 = 0x2C;
/// See [`SUBEVT_REMOTE_CAPS_COMPLETE`]
pub const SUBEVT_REMOTE_FAE_COMPLETE: u8 = 0x2D;
/// See [`SUBEVT_REMOTE_CAPS_COMPLETE`]
pub const SUBEVT_SECURITY_ENABLE_COMPLETE: u8 = 0x2E;
/// See [`SUBEVT_REMOTE_CAPS_COMPLETE`]
pub const SUBEVT_CONFIG_COMPLETE: u8 = 0x2F;
/// See [`SUBEVT_REMOTE_CAPS_COMPLETE`]
pub const SUBEVT_PROCEDURE_ENABLE_COMPLETE: u8 = 0x30;
/// See [`SUBEVT_REMOTE_CAPS_COMPLETE`]
pub const SUBEVT_SUBEVENT_RESULT: u8 = 0x31;
/// See [`SUBEVT_REMOTE_CAPS_COMPLETE`]
pub const SUBEVT_SUBEVENT_RESULT_CONTINUE: u8 = 0x32;

/// Fixed part of a subevent result after the subevent code
pub const SUBEVENT_RESULT_HEADER_LEN: usize = 15;
/// Fixed part of a subevent result continue after the subevent code
pub const SUBEVENT_CONTINUE_HEADER_LEN: usize = 8;
/// Mode, channel and data length octets preceding each step's data
pub const STEP_HEADER_LEN: usize = 3;

/// Procedure or subevent done status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneStatus {
    /// All results reported
    Complete = 0x0,
    /// More results follow
    Partial = 0x1,
    /// Aborted
    Aborted = 0xF,
}

impl DoneStatus {
    /// Creates a DoneStatus from a u8 value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Complete),
            0x1 => Some(Self::Partial),
            0xF => Some(Self::Aborted),
            _ => None,
        }
    }
}

/// Why a procedure was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcedureAbortReason {
    /// Not aborted
    #[default]
    None = 0x0,
    /// Local or remote host request
    HostRequest = 0x1,
    /// Filtered channel map has fewer than 15 channels
    InsufficientChannels = 0x2,
    /// Channel map update instant has passed
    InstantPassed = 0x3,
    /// Unspecified
    Unspecified = 0xF,
}

impl ProcedureAbortReason {
    /// Creates a reason from a nibble, mapping unknown values to `Unspecified`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x0 => Self::None,
            0x1 => Self::HostRequest,
            0x2 => Self::InsufficientChannels,
            0x3 => Self::InstantPassed,
            _ => Self::Unspecified,
        }
    }
}

/// Why a subevent was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubeventAbortReason {
    /// Not aborted
    #[default]
    None = 0x0,
    /// Local or remote host request
    HostRequest = 0x1,
    /// No CS_SYNC received from the initiator
    NoCsSync = 0x2,
    /// Scheduling conflict or limited resources
    SchedulingConflict = 0x3,
    /// Unspecified
    Unspecified = 0xF,
}

impl SubeventAbortReason {
    /// Creates a reason from a nibble, mapping unknown values to `Unspecified`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x0 => Self::None,
            0x1 => Self::HostRequest,
            0x2 => Self::NoCsSync,
            0x3 => Self::SchedulingConflict,
            _ => Self::Unspecified,
        }
    }
}

/// Abort reasons sharing one octet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbortReasons {
    /// Procedure reason, low nibble
    pub procedure: ProcedureAbortReason,
    /// Subevent reason, high nibble
    pub subevent: SubeventAbortReason,
}

impl AbortReasons {
    fn to_u8(self) -> u8 {
        fields::pack_abort_reasons(self.procedure as u8, self.subevent as u8)
    }

    fn from_u8(octet: u8) -> Self {
        Self {
            procedure: ProcedureAbortReason::from_u8(fields::low_nibble(octet)),
            subevent: SubeventAbortReason::from_u8(fields::high_nibble(octet)),
        }
    }
}

/// One step's measurement as reported to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Step mode
    pub mode: u8,
    /// Channel index
    pub channel: u8,
    /// Mode-specific data
    pub data: Vec<u8>,
}

impl StepResult {
    /// Octets this step occupies in an event
    pub fn encoded_len(&self) -> usize {
        STEP_HEADER_LEN + self.data.len()
    }
}

/// Return parameters carried by a command complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnParams {
    /// Status only
    Empty,
    /// Status and connection handle
    Handle(ConnHandle),
    /// Status and local capabilities
    LocalCapabilities(Capabilities),
}

/// LE CS Config Complete content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigComplete {
    /// Outcome
    pub status: HciStatus,
    /// Connection
    pub handle: ConnHandle,
    /// Created or removed
    pub action: ConfigAction,
    /// Configuration with negotiated timing indices
    pub spec: ConfigSpec,
}

/// LE CS Procedure Enable Complete content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcedureEnableComplete {
    /// Outcome
    pub status: HciStatus,
    /// Connection
    pub handle: ConnHandle,
    /// Configuration
    pub config_id: u8,
    /// Procedures enabled (1) or disabled (0)
    pub state: u8,
    /// Tone antenna configuration
    pub aci: u8,
    /// Transmit power in dBm
    pub selected_tx_power: i8,
    /// Subevent length, microseconds
    pub subevent_len: u32,
    /// Subevents per CS event
    pub subevents_per_event: u8,
    /// Subevent interval in 0.625 ms units
    pub subevent_interval: u16,
    /// CS event interval in ACL events
    pub event_interval: u16,
    /// Procedure interval in ACL events
    pub procedure_interval: u16,
    /// Procedure count
    pub procedure_count: u16,
    /// Maximum procedure length in 0.625 ms units
    pub max_procedure_len: u16,
}

/// LE CS Subevent Result content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubeventResult {
    /// Connection
    pub handle: ConnHandle,
    /// Configuration
    pub config_id: u8,
    /// ACL event counter at the start of the CS event
    pub start_acl_conn_event: u16,
    /// Procedure counter within the series
    pub procedure_counter: u16,
    /// Frequency compensation in 0.01 ppm units (0xC000: unavailable)
    pub frequency_compensation: i16,
    /// Reference power level in dBm
    pub reference_power_level: i8,
    /// Procedure done status
    pub procedure_done: DoneStatus,
    /// Subevent done status
    pub subevent_done: DoneStatus,
    /// Abort reasons
    pub abort: AbortReasons,
    /// Antenna paths in tone steps
    pub num_antenna_paths: u8,
    /// Step results
    pub steps: Vec<StepResult>,
}

/// LE CS Subevent Result Continue content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubeventResultContinue {
    /// Connection
    pub handle: ConnHandle,
    /// Configuration
    pub config_id: u8,
    /// Procedure done status
    pub procedure_done: DoneStatus,
    /// Subevent done status
    pub subevent_done: DoneStatus,
    /// Abort reasons
    pub abort: AbortReasons,
    /// Antenna paths in tone steps
    pub num_antenna_paths: u8,
    /// Step results
    pub steps: Vec<StepResult>,
}

/// An event sent to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciEvent {
    /// Synchronous command finished
    CommandComplete {
        /// Command opcode
        opcode: u16,
        /// Outcome
        status: HciStatus,
        /// Return parameters
        params: ReturnParams,
    },
    /// Asynchronous command accepted or refused
    CommandStatus {
        /// Outcome
        status: HciStatus,
        /// Command opcode
        opcode: u16,
    },
    /// Remote capabilities read
    RemoteCapabilitiesComplete {
        /// Outcome
        status: HciStatus,
        /// Connection
        handle: ConnHandle,
        /// Remote capabilities, as clamped by the controller
        caps: Capabilities,
    },
    /// Remote FAE table read
    RemoteFaeTableComplete {
        /// Outcome
        status: HciStatus,
        /// Connection
        handle: ConnHandle,
        /// Remote table
        table: FaeTable,
    },
    /// Security started
    SecurityEnableComplete {
        /// Outcome
        status: HciStatus,
        /// Connection
        handle: ConnHandle,
    },
    /// Configuration created or removed
    ConfigComplete(ConfigComplete),
    /// Procedures enabled or disabled
    ProcedureEnableComplete(ProcedureEnableComplete),
    /// First part of a subevent's results
    SubeventResult(SubeventResult),
    /// Further results of a subevent
    SubeventResultContinue(SubeventResultContinue),
}

impl HciEvent {
    /// Event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommandComplete { .. } => "Command_Complete",
            Self::CommandStatus { .. } => "Command_Status",
            Self::RemoteCapabilitiesComplete { .. } => {
                "LE_CS_Read_Remote_Supported_Capabilities_Complete"
            }
            Self::RemoteFaeTableComplete { .. } => "LE_CS_Read_Remote_FAE_Table_Complete",
            Self::SecurityEnableComplete { .. } => "LE_CS_Security_Enable_Complete",
            Self::ConfigComplete(_) => "LE_CS_Config_Complete",
            Self::ProcedureEnableComplete(_) => "LE_CS_Procedure_Enable_Complete",
            Self::SubeventResult(_) => "LE_CS_Subevent_Result",
            Self::SubeventResultContinue(_) => "LE_CS_Subevent_Result_Continue",
        }
    }

    /// Status carried by the event, if it has one
    pub fn status(&self) -> Option<HciStatus> {
        match self {
            Self::CommandComplete { status, .. }
            | Self::CommandStatus { status, .. }
            | Self::RemoteCapabilitiesComplete { status, .. }
            | Self::RemoteFaeTableComplete { status, .. }
            | Self::SecurityEnableComplete { status, .. } => Some(*status),
            Self::ConfigComplete(c) => Some(c.status),
            Self::ProcedureEnableComplete(p) => Some(p.status),
            Self::SubeventResult(_) | Self::SubeventResultContinue(_) => None,
        }
    }

    /// Parameter length: everything after the event code and length octets
    pub fn param_len(&self) -> usize {
        match self {
            Self::CommandComplete { params, .. } => {
                4 + match params {
                    ReturnParams::Empty => 0,
                    ReturnParams::Handle(_) => 2,
                    ReturnParams::LocalCapabilities(_) => super::HCI_CAPABILITIES_LEN,
                }
            }
            Self::CommandStatus { .. } => 4,
            Self::RemoteCapabilitiesComplete { .. } => 4 + super::HCI_CAPABILITIES_LEN,
            Self::RemoteFaeTableComplete { .. } => 4 + lecs_common::model::FAE_TABLE_LEN,
            Self::SecurityEnableComplete { .. } => 4,
            Self::ConfigComplete(_) => 34,
            Self::ProcedureEnableComplete(_) => 22,
            Self::SubeventResult(r) => {
                1 + SUBEVENT_RESULT_HEADER_LEN
                    + r.steps.iter().map(StepResult::encoded_len).sum::<usize>()
            }
            Self::SubeventResultContinue(r) => {
                1 + SUBEVENT_CONTINUE_HEADER_LEN
                    + r.steps.iter().map(StepResult::encoded_len).sum::<usize>()
            }
        }
    }
}

/// Encodes an event packet
pub fn encode_event(event: &HciEvent) -> Bytes {
    let mut params = BytesMut::with_capacity(event.param_len());
    let code = match event {
        HciEvent::CommandComplete {
            opcode,
            status,
            params: ret,
        } => {
            params.put_u8(1);
            params.put_u16_le(*opcode);
            params.put_u8(status.as_u8());
            match ret {
                ReturnParams::Empty => {}
                ReturnParams::Handle(handle) => params.put_u16_le(handle.0),
                ReturnParams::LocalCapabilities(caps) => put_capabilities(caps, &mut params),
            }
            EVT_COMMAND_COMPLETE
        }
        HciEvent::CommandStatus { status, opcode } => {
            params.put_u8(status.as_u8());
            params.put_u8(1);
            params.put_u16_le(*opcode);
            EVT_COMMAND_STATUS
        }
        HciEvent::RemoteCapabilitiesComplete {
            status,
            handle,
            caps,
        } => {
            params.put_u8(SUBEVT_REMOTE_CAPS_COMPLETE);
            params.put_u8(status.as_u8());
            params.put_u16_le(handle.0);
            put_capabilities(caps, &mut params);
            EVT_LE_META
        }
        HciEvent::RemoteFaeTableComplete {
            status,
            handle,
            table,
        } => {
            params.put_u8(SUBEVT_REMOTE_FAE_COMPLETE);
            params.put_u8(status.as_u8());
            params.put_u16_le(handle.0);
            for entry in table.0.iter() {
                params.put_i8(*entry);
            }
            EVT_LE_META
        }
        HciEvent::SecurityEnableComplete { status, handle } => {
            params.put_u8(SUBEVT_SECURITY_ENABLE_COMPLETE);
            params.put_u8(status.as_u8());
            params.put_u16_le(handle.0);
            EVT_LE_META
        }
        HciEvent::ConfigComplete(c) => {
            put_config_complete(c, &mut params);
            EVT_LE_META
        }
        HciEvent::ProcedureEnableComplete(p) => {
            params.put_u8(SUBEVT_PROCEDURE_ENABLE_COMPLETE);
            params.put_u8(p.status.as_u8());
            params.put_u16_le(p.handle.0);
            params.put_u8(p.config_id);
            params.put_u8(p.state);
            params.put_u8(p.aci);
            params.put_i8(p.selected_tx_power);
            put_u24_le(&mut params, p.subevent_len);
            params.put_u8(p.subevents_per_event);
            params.put_u16_le(p.subevent_interval);
            params.put_u16_le(p.event_interval);
            params.put_u16_le(p.procedure_interval);
            params.put_u16_le(p.procedure_count);
            params.put_u16_le(p.max_procedure_len);
            EVT_LE_META
        }
        HciEvent::SubeventResult(r) => {
            params.put_u8(SUBEVT_SUBEVENT_RESULT);
            params.put_u16_le(r.handle.0);
            params.put_u8(r.config_id);
            params.put_u16_le(r.start_acl_conn_event);
            params.put_u16_le(r.procedure_counter);
            params.put_i16_le(r.frequency_compensation);
            params.put_i8(r.reference_power_level);
            params.put_u8(r.procedure_done as u8);
            params.put_u8(r.subevent_done as u8);
            params.put_u8(r.abort.to_u8());
            params.put_u8(r.num_antenna_paths);
            put_steps(&r.steps, &mut params);
            EVT_LE_META
        }
        HciEvent::SubeventResultContinue(r) => {
            params.put_u8(SUBEVT_SUBEVENT_RESULT_CONTINUE);
            params.put_u16_le(r.handle.0);
            params.put_u8(r.config_id);
            params.put_u8(r.procedure_done as u8);
            params.put_u8(r.subevent_done as u8);
            params.put_u8(r.abort.to_u8());
            params.put_u8(r.num_antenna_paths);
            put_steps(&r.steps, &mut params);
            EVT_LE_META
        }
    };

    let mut buf = BytesMut::with_capacity(2 + params.len());
    buf.put_u8(code);
    buf.put_u8(params.len() as u8);
    buf.extend_from_slice(&params);
    buf.freeze()
}

fn put_config_complete(c: &ConfigComplete, buf: &mut BytesMut) {
    let s = &c.spec;
    buf.put_u8(SUBEVT_CONFIG_COMPLETE);
    buf.put_u8(c.status.as_u8());
    buf.put_u16_le(c.handle.0);
    buf.put_u8(s.config_id);
    buf.put_u8(c.action as u8);
    buf.put_u8(s.main_mode);
    buf.put_u8(s.sub_mode);
    buf.put_u8(s.main_min_steps);
    buf.put_u8(s.main_max_steps);
    buf.put_u8(s.main_repetition);
    buf.put_u8(s.mode0_steps);
    buf.put_u8(s.role.as_u8());
    buf.put_u8(s.rtt_type);
    buf.put_u8(s.sync_phy);
    buf.extend_from_slice(s.channel_map.as_bytes());
    buf.put_u8(s.chm_repetition);
    buf.put_u8(s.channel_selection);
    buf.put_u8(s.ch3c_shape);
    buf.put_u8(s.ch3c_jump);
    buf.put_u8(0);
    for family in TimingFamily::ALL {
        let us = s.timing_us(family).unwrap_or(0);
        buf.put_u8(u8::try_from(us).unwrap_or(u8::MAX));
    }
}

fn put_steps(steps: &[StepResult], buf: &mut BytesMut) {
    buf.put_u8(steps.len() as u8);
    for step in steps {
        buf.put_u8(step.mode);
        buf.put_u8(step.channel);
        buf.put_u8(step.data.len() as u8);
        buf.extend_from_slice(&step.data);
    }
}

fn get_steps<B: Buf>(buf: &mut B) -> Result<Vec<StepResult>> {
    let count = buf.get_u8();
    let mut steps = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        ensure(buf.remaining(), STEP_HEADER_LEN)?;
        let mode = buf.get_u8();
        let channel = buf.get_u8();
        let len = usize::from(buf.get_u8());
        ensure(buf.remaining(), len)?;
        let mut data = vec![0u8; len];
        buf.copy_to_slice(&mut data);
        steps.push(StepResult {
            mode,
            channel,
            data,
        });
    }
    Ok(steps)
}

fn ensure(available: usize, needed: usize) -> Result<()> {
    if available < needed {
        return Err(PduError::BufferTooShort { needed, available });
    }
    Ok(())
}

fn done_status(value: u8, field: &'static str) -> Result<DoneStatus> {
    DoneStatus::from_u8(value).ok_or(PduError::InvalidValue {
        field,
        value: u32::from(value),
    })
}

fn timing_index(family: TimingFamily, us: u8) -> Result<u8> {
    family
        .values()
        .iter()
        .position(|v| *v == u16::from(us))
        .map(|idx| idx as u8)
        .ok_or(PduError::InvalidValue {
            field: "timing",
            value: u32::from(us),
        })
}

/// Decodes an event packet
pub fn decode_event(data: &[u8]) -> Result<HciEvent> {
    let mut buf = data;

    ensure(buf.len(), 2)?;
    let code = buf.get_u8();
    let declared = usize::from(buf.get_u8());
    if buf.len() != declared {
        return Err(PduError::BadLength {
            opcode: u16::from(code),
            expected: declared,
            actual: buf.len(),
        });
    }

    let event = match code {
        EVT_COMMAND_COMPLETE => {
            ensure(buf.len(), 4)?;
            buf.advance(1);
            let opcode = buf.get_u16_le();
            let status = HciStatus::from_u8_lossy(buf.get_u8());
            let params = match buf.remaining() {
                0 => ReturnParams::Empty,
                2 => ReturnParams::Handle(ConnHandle(buf.get_u16_le())),
                super::HCI_CAPABILITIES_LEN => {
                    ReturnParams::LocalCapabilities(get_capabilities(&mut buf))
                }
                other => {
                    return Err(PduError::BadLength {
                        opcode,
                        expected: super::HCI_CAPABILITIES_LEN,
                        actual: other,
                    })
                }
            };
            HciEvent::CommandComplete {
                opcode,
                status,
                params,
            }
        }
        EVT_COMMAND_STATUS => {
            ensure(buf.len(), 4)?;
            let status = HciStatus::from_u8_lossy(buf.get_u8());
            buf.advance(1);
            HciEvent::CommandStatus {
                status,
                opcode: buf.get_u16_le(),
            }
        }
        EVT_LE_META => decode_le_meta(&mut buf)?,
        other => return Err(PduError::UnknownOpcode(u16::from(other))),
    };

    Ok(event)
}

fn decode_le_meta(buf: &mut &[u8]) -> Result<HciEvent> {
    ensure(buf.len(), 1)?;
    let subevent = buf.get_u8();
    let fixed = match subevent {
        SUBEVT_REMOTE_CAPS_COMPLETE => 3 + super::HCI_CAPABILITIES_LEN,
        SUBEVT_REMOTE_FAE_COMPLETE => 3 + lecs_common::model::FAE_TABLE_LEN,
        SUBEVT_SECURITY_ENABLE_COMPLETE => 3,
        SUBEVT_CONFIG_COMPLETE => 33,
        SUBEVT_PROCEDURE_ENABLE_COMPLETE => 21,
        SUBEVT_SUBEVENT_RESULT => SUBEVENT_RESULT_HEADER_LEN,
        SUBEVT_SUBEVENT_RESULT_CONTINUE => SUBEVENT_CONTINUE_HEADER_LEN,
        other => return Err(PduError::UnknownOpcode(u16::from(other))),
    };
    ensure(buf.len(), fixed)?;

    let event = match subevent {
        SUBEVT_REMOTE_CAPS_COMPLETE => HciEvent::RemoteCapabilitiesComplete {
            status: HciStatus::from_u8_lossy(buf.get_u8()),
            handle: ConnHandle(buf.get_u16_le()),
            caps: get_capabilities(buf),
        },
        SUBEVT_REMOTE_FAE_COMPLETE => {
            let status = HciStatus::from_u8_lossy(buf.get_u8());
            let handle = ConnHandle(buf.get_u16_le());
            let mut table = FaeTable::default();
            for entry in table.0.iter_mut() {
                *entry = buf.get_i8();
            }
            HciEvent::RemoteFaeTableComplete {
                status,
                handle,
                table,
            }
        }
        SUBEVT_SECURITY_ENABLE_COMPLETE => HciEvent::SecurityEnableComplete {
            status: HciStatus::from_u8_lossy(buf.get_u8()),
            handle: ConnHandle(buf.get_u16_le()),
        },
        SUBEVT_CONFIG_COMPLETE => HciEvent::ConfigComplete(get_config_complete(buf)?),
        SUBEVT_PROCEDURE_ENABLE_COMPLETE => {
            HciEvent::ProcedureEnableComplete(ProcedureEnableComplete {
                status: HciStatus::from_u8_lossy(buf.get_u8()),
                handle: ConnHandle(buf.get_u16_le()),
                config_id: buf.get_u8(),
                state: buf.get_u8(),
                aci: buf.get_u8(),
                selected_tx_power: buf.get_i8(),
                subevent_len: get_u24_le(buf),
                subevents_per_event: buf.get_u8(),
                subevent_interval: buf.get_u16_le(),
                event_interval: buf.get_u16_le(),
                procedure_interval: buf.get_u16_le(),
                procedure_count: buf.get_u16_le(),
                max_procedure_len: buf.get_u16_le(),
            })
        }
        SUBEVT_SUBEVENT_RESULT => {
            let handle = ConnHandle(buf.get_u16_le());
            let config_id = buf.get_u8();
            let start_acl_conn_event = buf.get_u16_le();
            let procedure_counter = buf.get_u16_le();
            let frequency_compensation = buf.get_i16_le();
            let reference_power_level = buf.get_i8();
            let procedure_done = done_status(buf.get_u8(), "procedure_done")?;
            let subevent_done = done_status(buf.get_u8(), "subevent_done")?;
            let abort = AbortReasons::from_u8(buf.get_u8());
            let num_antenna_paths = buf.get_u8();
            HciEvent::SubeventResult(SubeventResult {
                handle,
                config_id,
                start_acl_conn_event,
                procedure_counter,
                frequency_compensation,
                reference_power_level,
                procedure_done,
                subevent_done,
                abort,
                num_antenna_paths,
                steps: get_steps(buf)?,
            })
        }
        _ => {
            let handle = ConnHandle(buf.get_u16_le());
            let config_id = buf.get_u8();
            let procedure_done = done_status(buf.get_u8(), "procedure_done")?;
            let subevent_done = done_status(buf.get_u8(), "subevent_done")?;
            let abort = AbortReasons::from_u8(buf.get_u8());
            let num_antenna_paths = buf.get_u8();
            HciEvent::SubeventResultContinue(SubeventResultContinue {
                handle,
                config_id,
                procedure_done,
                subevent_done,
                abort,
                num_antenna_paths,
                steps: get_steps(buf)?,
            })
        }
    };

    Ok(event)
}

fn get_config_complete(buf: &mut &[u8]) -> Result<ConfigComplete> {
    let status = HciStatus::from_u8_lossy(buf.get_u8());
    let handle = ConnHandle(buf.get_u16_le());
    let config_id = buf.get_u8();
    let raw_action = buf.get_u8();
    let action = ConfigAction::from_u8(raw_action).ok_or(PduError::InvalidValue {
        field: "action",
        value: u32::from(raw_action),
    })?;
    let main_mode = buf.get_u8();
    let sub_mode = buf.get_u8();
    let main_min_steps = buf.get_u8();
    let main_max_steps = buf.get_u8();
    let main_repetition = buf.get_u8();
    let mode0_steps = buf.get_u8();
    let raw_role = buf.get_u8();
    let role = CsRole::from_u8(raw_role).ok_or(PduError::InvalidValue {
        field: "role",
        value: u32::from(raw_role),
    })?;
    let rtt_type = buf.get_u8();
    let sync_phy = buf.get_u8();
    let channel_map = ChannelMap::new(get_array(buf));
    let chm_repetition = buf.get_u8();
    let channel_selection = buf.get_u8();
    let ch3c_shape = buf.get_u8();
    let ch3c_jump = buf.get_u8();
    buf.advance(1);
    let mut spec = ConfigSpec {
        config_id,
        role,
        main_mode,
        sub_mode,
        main_min_steps,
        main_max_steps,
        main_repetition,
        mode0_steps,
        rtt_type,
        sync_phy,
        channel_map,
        chm_repetition,
        channel_selection,
        ch3c_shape,
        ch3c_jump,
        ..ConfigSpec::default()
    };
    for family in TimingFamily::ALL {
        let us = buf.get_u8();
        // A removed config reports zeroed timing
        if us != 0 || action == ConfigAction::Create {
            spec.set_timing_index(family, timing_index(family, us)?);
        }
    }
    Ok(ConfigComplete {
        status,
        handle,
        action,
        spec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(steps: Vec<StepResult>) -> SubeventResult {
        SubeventResult {
            handle: ConnHandle(1),
            config_id: 0,
            start_acl_conn_event: 100,
            procedure_counter: 2,
            frequency_compensation: -0x4000,
            reference_power_level: -10,
            procedure_done: DoneStatus::Partial,
            subevent_done: DoneStatus::Complete,
            abort: AbortReasons::default(),
            num_antenna_paths: 1,
            steps,
        }
    }

    #[test]
    fn test_command_status_packet() {
        let event = HciEvent::CommandStatus {
            status: HciStatus::Success,
            opcode: 0x2094,
        };
        let bytes = encode_event(&event);
        assert_eq!(&bytes[..], &[0x0F, 0x04, 0x00, 0x01, 0x94, 0x20]);
        assert_eq!(decode_event(&bytes), Ok(event));
    }

    #[test]
    fn test_command_complete_with_caps() {
        let event = HciEvent::CommandComplete {
            opcode: 0x2089,
            status: HciStatus::Success,
            params: ReturnParams::LocalCapabilities(Capabilities::default()),
        };
        let bytes = encode_event(&event);
        assert_eq!(bytes.len(), 2 + event.param_len());
        assert_eq!(decode_event(&bytes), Ok(event));
    }

    #[test]
    fn test_subevent_result_layout() {
        let steps = vec![
            StepResult {
                mode: 0,
                channel: 40,
                data: vec![0x01, 0xB0, 0x00],
            },
            StepResult {
                mode: 2,
                channel: 12,
                data: vec![0; 5],
            },
        ];
        let event = HciEvent::SubeventResult(sample_result(steps));
        let bytes = encode_event(&event);
        assert_eq!(bytes[0], EVT_LE_META);
        assert_eq!(usize::from(bytes[1]), 1 + 15 + 6 + 8);
        assert_eq!(bytes[2], SUBEVT_SUBEVENT_RESULT);
        // procedure done, subevent done
        assert_eq!(&bytes[13..15], &[0x01, 0x00]);
        assert_eq!(bytes[17], 2);
        assert_eq!(&bytes[18..21], &[0, 40, 3]);
        assert_eq!(decode_event(&bytes), Ok(event));
    }

    #[test]
    fn test_subevent_continue_abort_nibbles() {
        let event = HciEvent::SubeventResultContinue(SubeventResultContinue {
            handle: ConnHandle(2),
            config_id: 1,
            procedure_done: DoneStatus::Aborted,
            subevent_done: DoneStatus::Aborted,
            abort: AbortReasons {
                procedure: ProcedureAbortReason::HostRequest,
                subevent: SubeventAbortReason::NoCsSync,
            },
            num_antenna_paths: 1,
            steps: Vec::new(),
        });
        let bytes = encode_event(&event);
        assert_eq!(
            &bytes[..],
            &[0x3E, 0x09, 0x32, 0x02, 0x00, 0x01, 0x0F, 0x0F, 0x21, 0x01, 0x00]
        );
        assert_eq!(decode_event(&bytes), Ok(event));
    }

    #[test]
    fn test_config_complete_reports_timing_in_microseconds() {
        let spec = ConfigSpec {
            config_id: 1,
            t_ip1_idx: 3,
            t_ip2_idx: 0,
            t_fcs_idx: 9,
            t_pm_idx: 1,
            ..Default::default()
        };
        let event = HciEvent::ConfigComplete(ConfigComplete {
            status: HciStatus::Success,
            handle: ConnHandle(1),
            action: ConfigAction::Create,
            spec,
        });
        let bytes = encode_event(&event);
        assert_eq!(bytes.len(), 2 + event.param_len());
        assert_eq!(&bytes[bytes.len() - 4..], &[40, 10, 150, 20]);
        assert_eq!(decode_event(&bytes), Ok(event));
    }

    #[test]
    fn test_procedure_enable_complete() {
        let event = HciEvent::ProcedureEnableComplete(ProcedureEnableComplete {
            status: HciStatus::Success,
            handle: ConnHandle(1),
            config_id: 0,
            state: 1,
            subevent_len: 5_000,
            subevents_per_event: 1,
            procedure_count: 3,
            max_procedure_len: 16,
            ..Default::default()
        });
        let bytes = encode_event(&event);
        assert_eq!(bytes.len(), 2 + event.param_len());
        assert_eq!(decode_event(&bytes), Ok(event));
    }

    #[test]
    fn test_decode_truncated_steps() {
        let event = HciEvent::SubeventResult(sample_result(vec![StepResult {
            mode: 1,
            channel: 3,
            data: vec![1, 2, 3, 4],
        }]));
        let mut bytes = encode_event(&event).to_vec();
        bytes.pop();
        bytes[1] -= 1;
        assert!(matches!(
            decode_event(&bytes),
            Err(PduError::BufferTooShort { .. })
        ));
    }
}
