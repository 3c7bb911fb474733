//! Channel Sounding link-layer control PDUs
//!
//! Typed forms of the LL control PDUs exchanged between two controllers
//! during CS negotiation. Byte layouts live in [`crate::codec`].

use std::fmt;

use lecs_common::{Capabilities, ChannelMap, ConfigSpec, FaeTable, HciStatus, ProcedureParams};

/// LL control opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// LL_REJECT_EXT_IND
    RejectExtInd = 0x11,
    /// LL_CS_SEC_REQ
    CsSecReq = 0x20,
    /// LL_CS_SEC_RSP
    CsSecRsp = 0x21,
    /// LL_CS_CAPABILITIES_REQ
    CsCapabilitiesReq = 0x22,
    /// LL_CS_CAPABILITIES_RSP
    CsCapabilitiesRsp = 0x23,
    /// LL_CS_CONFIG_REQ
    CsConfigReq = 0x24,
    /// LL_CS_CONFIG_RSP
    CsConfigRsp = 0x25,
    /// LL_CS_REQ
    CsReq = 0x26,
    /// LL_CS_RSP
    CsRsp = 0x27,
    /// LL_CS_IND
    CsInd = 0x28,
    /// LL_CS_TERMINATE_REQ
    CsTerminateReq = 0x29,
    /// LL_CS_FAE_REQ
    CsFaeReq = 0x2A,
    /// LL_CS_FAE_RSP
    CsFaeRsp = 0x2B,
    /// LL_CS_CHANNEL_MAP_IND
    CsChannelMapInd = 0x2C,
    /// LL_CS_TERMINATE_RSP
    CsTerminateRsp = 0x2D,
}

impl Opcode {
    /// Creates an Opcode from a u8 value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x11 => Some(Self::RejectExtInd),
            0x20 => Some(Self::CsSecReq),
            0x21 => Some(Self::CsSecRsp),
            0x22 => Some(Self::CsCapabilitiesReq),
            0x23 => Some(Self::CsCapabilitiesRsp),
            0x24 => Some(Self::CsConfigReq),
            0x25 => Some(Self::CsConfigRsp),
            0x26 => Some(Self::CsReq),
            0x27 => Some(Self::CsRsp),
            0x28 => Some(Self::CsInd),
            0x29 => Some(Self::CsTerminateReq),
            0x2A => Some(Self::CsFaeReq),
            0x2B => Some(Self::CsFaeRsp),
            0x2C => Some(Self::CsChannelMapInd),
            0x2D => Some(Self::CsTerminateRsp),
            _ => None,
        }
    }

    /// Payload length that follows the opcode
    pub fn payload_len(&self) -> usize {
        match self {
            Self::RejectExtInd => 2,
            Self::CsSecReq | Self::CsSecRsp => 20,
            Self::CsCapabilitiesReq | Self::CsCapabilitiesRsp => 25,
            Self::CsConfigReq => 27,
            Self::CsConfigRsp => 1,
            Self::CsReq => 28,
            Self::CsRsp => 21,
            Self::CsInd => 18,
            Self::CsTerminateReq | Self::CsTerminateRsp => 4,
            Self::CsFaeReq => 0,
            Self::CsFaeRsp => 72,
            Self::CsChannelMapInd => 12,
        }
    }

    /// Core-standard name of the PDU, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::RejectExtInd => "LL_REJECT_EXT_IND",
            Self::CsSecReq => "LL_CS_SEC_REQ",
            Self::CsSecRsp => "LL_CS_SEC_RSP",
            Self::CsCapabilitiesReq => "LL_CS_CAPABILITIES_REQ",
            Self::CsCapabilitiesRsp => "LL_CS_CAPABILITIES_RSP",
            Self::CsConfigReq => "LL_CS_CONFIG_REQ",
            Self::CsConfigRsp => "LL_CS_CONFIG_RSP",
            Self::CsReq => "LL_CS_REQ",
            Self::CsRsp => "LL_CS_RSP",
            Self::CsInd => "LL_CS_IND",
            Self::CsTerminateReq => "LL_CS_TERMINATE_REQ",
            Self::CsFaeReq => "LL_CS_FAE_REQ",
            Self::CsFaeRsp => "LL_CS_FAE_RSP",
            Self::CsChannelMapInd => "LL_CS_CHANNEL_MAP_IND",
            Self::CsTerminateRsp => "LL_CS_TERMINATE_RSP",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Security vector halves contributed by one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityVectors {
    /// Half of the initialization vector
    pub iv: [u8; 8],
    /// Half of the instantiation nonce
    pub instantiation_nonce: [u8; 4],
    /// Half of the personalization vector
    pub pv: [u8; 8],
}

impl SecurityVectors {
    /// Combines central and peripheral halves into (IV, IN, PV).
    ///
    /// The central's half is the least-significant one.
    pub fn combine(central: &Self, peripheral: &Self) -> ([u8; 16], [u8; 8], [u8; 16]) {
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&central.iv);
        iv[8..].copy_from_slice(&peripheral.iv);
        let mut instantiation_nonce = [0u8; 8];
        instantiation_nonce[..4].copy_from_slice(&central.instantiation_nonce);
        instantiation_nonce[4..].copy_from_slice(&peripheral.instantiation_nonce);
        let mut pv = [0u8; 16];
        pv[..8].copy_from_slice(&central.pv);
        pv[8..].copy_from_slice(&peripheral.pv);
        (iv, instantiation_nonce, pv)
    }
}

/// Configuration action carried in LL_CS_CONFIG_REQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Remove the configuration
    Remove = 0,
    /// Create or update the configuration
    Create = 1,
}

impl ConfigAction {
    /// Creates a ConfigAction from a u8 value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Remove),
            1 => Some(Self::Create),
            _ => None,
        }
    }
}

/// LL_CS_CONFIG_REQ content. The role is the sender's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigReq {
    /// Create or remove
    pub action: ConfigAction,
    /// Configuration content
    pub spec: ConfigSpec,
}

/// LL_CS_RSP content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CsRsp {
    /// Configuration id
    pub config_id: u8,
    /// Anchor ACL connection event
    pub conn_event_counter: u16,
    /// Narrowed offset lower bound, microseconds
    pub offset_min: u32,
    /// Narrowed offset upper bound, microseconds
    pub offset_max: u32,
    /// CS event interval in ACL events
    pub event_interval: u16,
    /// Subevents per CS event
    pub subevents_per_event: u8,
    /// Subevent interval in 0.625 ms units
    pub subevent_interval: u16,
    /// Subevent length, microseconds
    pub subevent_len: u32,
    /// Tone antenna configuration index
    pub aci: u8,
    /// CS_SYNC PHY
    pub phy: u8,
    /// Transmit power delta
    pub pwr_delta: i8,
}

/// LL_CS_IND content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CsInd {
    /// Configuration id
    pub config_id: u8,
    /// Anchor ACL connection event
    pub conn_event_counter: u16,
    /// Final offset from the ACL anchor, microseconds
    pub offset: u32,
    /// CS event interval in ACL events
    pub event_interval: u16,
    /// Subevents per CS event
    pub subevents_per_event: u8,
    /// Subevent interval in 0.625 ms units
    pub subevent_interval: u16,
    /// Subevent length, microseconds
    pub subevent_len: u32,
    /// Tone antenna configuration index
    pub aci: u8,
    /// CS_SYNC PHY
    pub phy: u8,
    /// Transmit power delta
    pub pwr_delta: i8,
}

/// LL_CS_TERMINATE_REQ / LL_CS_TERMINATE_RSP content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminate {
    /// Configuration id
    pub config_id: u8,
    /// Steps run so far in the current procedure series
    pub step_count: u16,
    /// Reason for terminating
    pub error: HciStatus,
}

/// LL_CS_CHANNEL_MAP_IND content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMapInd {
    /// New channel map
    pub map: ChannelMap,
    /// ACL event counter at which the map takes effect
    pub instant: u16,
}

/// LL_REJECT_EXT_IND content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectExt {
    /// Opcode of the rejected PDU
    pub opcode: u8,
    /// Reason
    pub error: HciStatus,
}

/// A CS link-layer control PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPdu {
    /// Rejects a request
    RejectExtInd(RejectExt),
    /// Central's security vector halves
    CsSecReq(SecurityVectors),
    /// Peripheral's security vector halves
    CsSecRsp(SecurityVectors),
    /// Sender's capabilities, requesting the peer's
    CsCapabilitiesReq(Capabilities),
    /// Responder's capabilities
    CsCapabilitiesRsp(Capabilities),
    /// Create or remove a configuration
    CsConfigReq(ConfigReq),
    /// Accepts a configuration request
    CsConfigRsp {
        /// Configuration id
        config_id: u8,
    },
    /// Proposes procedure parameters
    CsReq(ProcedureParams),
    /// Peripheral answer to a central's LL_CS_REQ
    CsRsp(CsRsp),
    /// Central's final procedure parameters
    CsInd(CsInd),
    /// Requests early termination
    CsTerminateReq(Terminate),
    /// Requests the peer's FAE table
    CsFaeReq,
    /// Responder's FAE table
    CsFaeRsp(FaeTable),
    /// Channel map update
    CsChannelMapInd(ChannelMapInd),
    /// Confirms early termination
    CsTerminateRsp(Terminate),
}

impl ControlPdu {
    /// Opcode of this PDU
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::RejectExtInd(_) => Opcode::RejectExtInd,
            Self::CsSecReq(_) => Opcode::CsSecReq,
            Self::CsSecRsp(_) => Opcode::CsSecRsp,
            Self::CsCapabilitiesReq(_) => Opcode::CsCapabilitiesReq,
            Self::CsCapabilitiesRsp(_) => Opcode::CsCapabilitiesRsp,
            Self::CsConfigReq(_) => Opcode::CsConfigReq,
            Self::CsConfigRsp { .. } => Opcode::CsConfigRsp,
            Self::CsReq(_) => Opcode::CsReq,
            Self::CsRsp(_) => Opcode::CsRsp,
            Self::CsInd(_) => Opcode::CsInd,
            Self::CsTerminateReq(_) => Opcode::CsTerminateReq,
            Self::CsFaeReq => Opcode::CsFaeReq,
            Self::CsFaeRsp(_) => Opcode::CsFaeRsp,
            Self::CsChannelMapInd(_) => Opcode::CsChannelMapInd,
            Self::CsTerminateRsp(_) => Opcode::CsTerminateRsp,
        }
    }

    /// Core-standard name of the PDU, used in logs
    pub fn name(&self) -> &'static str {
        self.opcode().name()
    }

    /// Shorthand for a reject of `opcode`
    pub fn reject(opcode: Opcode, error: HciStatus) -> Self {
        Self::RejectExtInd(RejectExt {
            opcode: opcode as u8,
            error,
        })
    }
}
