//! HCI LE Channel Sounding commands

use bytes::{Buf, BufMut, Bytes, BytesMut};

use lecs_common::{
    Capabilities, ChannelMap, ConfigSpec, ConnHandle, CsRole, DefaultSettings, FaeTable,
    PreferredParams,
};

use super::{get_capabilities, put_capabilities, HCI_CAPABILITIES_LEN};
use crate::codec::{get_array, PduError, Result};
use crate::fields::{get_u24_le, put_u24_le};

/// HCI_LE_CS_Read_Local_Supported_Capabilities
pub const OP_READ_LOCAL_CAPS: u16 = 0x2089;
/// HCI_LE_CS_Read_Remote_Supported_Capabilities
pub const OP_READ_REMOTE_CAPS: u16 = 0x208A;
/// HCI_LE_CS_Write_Cached_Remote_Supported_Capabilities
pub const OP_WRITE_CACHED_REMOTE_CAPS: u16 = 0x208B;
/// HCI_LE_CS_Security_Enable
pub const OP_SECURITY_ENABLE: u16 = 0x208C;
/// HCI_LE_CS_Set_Default_Settings
pub const OP_SET_DEFAULT_SETTINGS: u16 = 0x208D;
/// HCI_LE_CS_Read_Remote_FAE_Table
pub const OP_READ_REMOTE_FAE: u16 = 0x208E;
/// HCI_LE_CS_Write_Cached_Remote_FAE_Table
pub const OP_WRITE_CACHED_REMOTE_FAE: u16 = 0x208F;
/// HCI_LE_CS_Create_Config
pub const OP_CREATE_CONFIG: u16 = 0x2090;
/// HCI_LE_CS_Remove_Config
pub const OP_REMOVE_CONFIG: u16 = 0x2091;
/// HCI_LE_CS_Set_Channel_Classification
pub const OP_SET_CHANNEL_CLASSIFICATION: u16 = 0x2092;
/// HCI_LE_CS_Set_Procedure_Parameters
pub const OP_SET_PROCEDURE_PARAMETERS: u16 = 0x2093;
/// HCI_LE_CS_Procedure_Enable
pub const OP_PROCEDURE_ENABLE: u16 = 0x2094;

/// HCI_LE_CS_Create_Config parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateConfig {
    /// Connection
    pub handle: ConnHandle,
    /// Create the configuration on both controllers (1) or locally only (0)
    pub create_context: u8,
    /// Requested configuration. Timing indices are chosen by the controller.
    pub spec: ConfigSpec,
}

/// HCI_LE_CS_Set_Procedure_Parameters parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetProcedureParameters {
    /// Connection
    pub handle: ConnHandle,
    /// Configuration the parameters apply to
    pub config_id: u8,
    /// Host preferences
    pub params: PreferredParams,
}

/// HCI_LE_CS_Procedure_Enable parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureEnable {
    /// Connection
    pub handle: ConnHandle,
    /// Configuration to run
    pub config_id: u8,
    /// Start (true) or stop (false)
    pub enable: bool,
}

/// A CS HCI command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciCommand {
    /// Read local capabilities
    ReadLocalSupportedCapabilities,
    /// Exchange capabilities with the peer
    ReadRemoteSupportedCapabilities {
        /// Connection
        handle: ConnHandle,
    },
    /// Store remote capabilities learned out of band
    WriteCachedRemoteSupportedCapabilities {
        /// Connection
        handle: ConnHandle,
        /// Remote capabilities
        caps: Capabilities,
    },
    /// Start the security exchange
    SecurityEnable {
        /// Connection
        handle: ConnHandle,
    },
    /// Set role enable and antenna defaults
    SetDefaultSettings {
        /// Connection
        handle: ConnHandle,
        /// New defaults
        settings: DefaultSettings,
    },
    /// Read the peer's FAE table
    ReadRemoteFaeTable {
        /// Connection
        handle: ConnHandle,
    },
    /// Store the peer's FAE table learned out of band
    WriteCachedRemoteFaeTable {
        /// Connection
        handle: ConnHandle,
        /// Remote table
        table: FaeTable,
    },
    /// Create or update a configuration
    CreateConfig(CreateConfig),
    /// Remove a configuration
    RemoveConfig {
        /// Connection
        handle: ConnHandle,
        /// Configuration slot
        config_id: u8,
    },
    /// Host channel classification for all connections
    SetChannelClassification {
        /// Channels the host allows
        map: ChannelMap,
    },
    /// Set preferred procedure parameters
    SetProcedureParameters(SetProcedureParameters),
    /// Start or stop procedures
    ProcedureEnable(ProcedureEnable),
}

impl HciCommand {
    /// HCI opcode
    pub fn opcode(&self) -> u16 {
        match self {
            Self::ReadLocalSupportedCapabilities => OP_READ_LOCAL_CAPS,
            Self::ReadRemoteSupportedCapabilities { .. } => OP_READ_REMOTE_CAPS,
            Self::WriteCachedRemoteSupportedCapabilities { .. } => OP_WRITE_CACHED_REMOTE_CAPS,
            Self::SecurityEnable { .. } => OP_SECURITY_ENABLE,
            Self::SetDefaultSettings { .. } => OP_SET_DEFAULT_SETTINGS,
            Self::ReadRemoteFaeTable { .. } => OP_READ_REMOTE_FAE,
            Self::WriteCachedRemoteFaeTable { .. } => OP_WRITE_CACHED_REMOTE_FAE,
            Self::CreateConfig(_) => OP_CREATE_CONFIG,
            Self::RemoveConfig { .. } => OP_REMOVE_CONFIG,
            Self::SetChannelClassification { .. } => OP_SET_CHANNEL_CLASSIFICATION,
            Self::SetProcedureParameters(_) => OP_SET_PROCEDURE_PARAMETERS,
            Self::ProcedureEnable(_) => OP_PROCEDURE_ENABLE,
        }
    }

    /// Command name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadLocalSupportedCapabilities => "LE_CS_Read_Local_Supported_Capabilities",
            Self::ReadRemoteSupportedCapabilities { .. } => {
                "LE_CS_Read_Remote_Supported_Capabilities"
            }
            Self::WriteCachedRemoteSupportedCapabilities { .. } => {
                "LE_CS_Write_Cached_Remote_Supported_Capabilities"
            }
            Self::SecurityEnable { .. } => "LE_CS_Security_Enable",
            Self::SetDefaultSettings { .. } => "LE_CS_Set_Default_Settings",
            Self::ReadRemoteFaeTable { .. } => "LE_CS_Read_Remote_FAE_Table",
            Self::WriteCachedRemoteFaeTable { .. } => "LE_CS_Write_Cached_Remote_FAE_Table",
            Self::CreateConfig(_) => "LE_CS_Create_Config",
            Self::RemoveConfig { .. } => "LE_CS_Remove_Config",
            Self::SetChannelClassification { .. } => "LE_CS_Set_Channel_Classification",
            Self::SetProcedureParameters(_) => "LE_CS_Set_Procedure_Parameters",
            Self::ProcedureEnable(_) => "LE_CS_Procedure_Enable",
        }
    }

    /// Connection the command targets, if any
    pub fn handle(&self) -> Option<ConnHandle> {
        match self {
            Self::ReadLocalSupportedCapabilities | Self::SetChannelClassification { .. } => None,
            Self::ReadRemoteSupportedCapabilities { handle }
            | Self::WriteCachedRemoteSupportedCapabilities { handle, .. }
            | Self::SecurityEnable { handle }
            | Self::SetDefaultSettings { handle, .. }
            | Self::ReadRemoteFaeTable { handle }
            | Self::WriteCachedRemoteFaeTable { handle, .. }
            | Self::RemoveConfig { handle, .. } => Some(*handle),
            Self::CreateConfig(c) => Some(c.handle),
            Self::SetProcedureParameters(p) => Some(p.handle),
            Self::ProcedureEnable(p) => Some(p.handle),
        }
    }

    /// True if the command completes later through an LE meta event
    /// and is acknowledged with a command status
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Self::ReadRemoteSupportedCapabilities { .. }
                | Self::SecurityEnable { .. }
                | Self::ReadRemoteFaeTable { .. }
                | Self::CreateConfig(_)
                | Self::RemoveConfig { .. }
                | Self::ProcedureEnable(_)
        )
    }
}

fn param_len(opcode: u16) -> Option<usize> {
    let len = match opcode {
        OP_READ_LOCAL_CAPS => 0,
        OP_READ_REMOTE_CAPS | OP_SECURITY_ENABLE | OP_READ_REMOTE_FAE => 2,
        OP_WRITE_CACHED_REMOTE_CAPS => 2 + HCI_CAPABILITIES_LEN,
        OP_SET_DEFAULT_SETTINGS => 5,
        OP_WRITE_CACHED_REMOTE_FAE => 2 + lecs_common::model::FAE_TABLE_LEN,
        OP_CREATE_CONFIG => 28,
        OP_REMOVE_CONFIG => 3,
        OP_SET_CHANNEL_CLASSIFICATION => 10,
        OP_SET_PROCEDURE_PARAMETERS => 23,
        OP_PROCEDURE_ENABLE => 4,
        _ => return None,
    };
    Some(len)
}

/// Encodes a command packet
pub fn encode_command(cmd: &HciCommand) -> Bytes {
    let mut params = BytesMut::with_capacity(64);
    match cmd {
        HciCommand::ReadLocalSupportedCapabilities => {}
        HciCommand::ReadRemoteSupportedCapabilities { handle }
        | HciCommand::SecurityEnable { handle }
        | HciCommand::ReadRemoteFaeTable { handle } => params.put_u16_le(handle.0),
        HciCommand::WriteCachedRemoteSupportedCapabilities { handle, caps } => {
            params.put_u16_le(handle.0);
            put_capabilities(caps, &mut params);
        }
        HciCommand::SetDefaultSettings { handle, settings } => {
            params.put_u16_le(handle.0);
            params.put_u8(settings.role_enable);
            params.put_u8(settings.sync_antenna_selection);
            params.put_i8(settings.max_tx_power);
        }
        HciCommand::WriteCachedRemoteFaeTable { handle, table } => {
            params.put_u16_le(handle.0);
            for entry in table.0.iter() {
                params.put_i8(*entry);
            }
        }
        HciCommand::CreateConfig(c) => {
            let s = &c.spec;
            params.put_u16_le(c.handle.0);
            params.put_u8(s.config_id);
            params.put_u8(c.create_context);
            params.put_u8(s.main_mode);
            params.put_u8(s.sub_mode);
            params.put_u8(s.main_min_steps);
            params.put_u8(s.main_max_steps);
            params.put_u8(s.main_repetition);
            params.put_u8(s.mode0_steps);
            params.put_u8(s.role.as_u8());
            params.put_u8(s.rtt_type);
            params.put_u8(s.sync_phy);
            params.extend_from_slice(s.channel_map.as_bytes());
            params.put_u8(s.chm_repetition);
            params.put_u8(s.channel_selection);
            params.put_u8(s.ch3c_shape);
            params.put_u8(s.ch3c_jump);
            params.put_u8(0);
        }
        HciCommand::RemoveConfig { handle, config_id } => {
            params.put_u16_le(handle.0);
            params.put_u8(*config_id);
        }
        HciCommand::SetChannelClassification { map } => {
            params.extend_from_slice(map.as_bytes());
        }
        HciCommand::SetProcedureParameters(s) => {
            let p = &s.params;
            params.put_u16_le(s.handle.0);
            params.put_u8(s.config_id);
            params.put_u16_le(p.max_procedure_len);
            params.put_u16_le(p.min_procedure_interval);
            params.put_u16_le(p.max_procedure_interval);
            params.put_u16_le(p.max_procedure_count);
            put_u24_le(&mut params, p.min_subevent_len);
            put_u24_le(&mut params, p.max_subevent_len);
            params.put_u8(p.aci);
            params.put_u8(p.phy);
            params.put_i8(p.tx_pwr_delta);
            params.put_u8(p.preferred_peer_antenna);
            params.put_u8(p.snr_control_initiator);
            params.put_u8(p.snr_control_reflector);
        }
        HciCommand::ProcedureEnable(p) => {
            params.put_u16_le(p.handle.0);
            params.put_u8(p.config_id);
            params.put_u8(u8::from(p.enable));
        }
    }

    let mut buf = BytesMut::with_capacity(3 + params.len());
    buf.put_u16_le(cmd.opcode());
    buf.put_u8(params.len() as u8);
    buf.extend_from_slice(&params);
    buf.freeze()
}

/// Decodes a command packet
pub fn decode_command(data: &[u8]) -> Result<HciCommand> {
    let mut buf = data;

    if buf.len() < 3 {
        return Err(PduError::BufferTooShort {
            needed: 3,
            available: buf.len(),
        });
    }

    let opcode = buf.get_u16_le();
    let declared = usize::from(buf.get_u8());
    let expected = param_len(opcode).ok_or(PduError::UnknownOpcode(opcode))?;
    if declared != expected || buf.len() != expected {
        return Err(PduError::BadLength {
            opcode,
            expected,
            actual: buf.len(),
        });
    }

    let cmd = match opcode {
        OP_READ_LOCAL_CAPS => HciCommand::ReadLocalSupportedCapabilities,
        OP_READ_REMOTE_CAPS => HciCommand::ReadRemoteSupportedCapabilities {
            handle: ConnHandle(buf.get_u16_le()),
        },
        OP_WRITE_CACHED_REMOTE_CAPS => HciCommand::WriteCachedRemoteSupportedCapabilities {
            handle: ConnHandle(buf.get_u16_le()),
            caps: get_capabilities(&mut buf),
        },
        OP_SECURITY_ENABLE => HciCommand::SecurityEnable {
            handle: ConnHandle(buf.get_u16_le()),
        },
        OP_SET_DEFAULT_SETTINGS => HciCommand::SetDefaultSettings {
            handle: ConnHandle(buf.get_u16_le()),
            settings: DefaultSettings {
                role_enable: buf.get_u8(),
                sync_antenna_selection: buf.get_u8(),
                max_tx_power: buf.get_i8(),
            },
        },
        OP_READ_REMOTE_FAE => HciCommand::ReadRemoteFaeTable {
            handle: ConnHandle(buf.get_u16_le()),
        },
        OP_WRITE_CACHED_REMOTE_FAE => {
            let handle = ConnHandle(buf.get_u16_le());
            let mut table = FaeTable::default();
            for entry in table.0.iter_mut() {
                *entry = buf.get_i8();
            }
            HciCommand::WriteCachedRemoteFaeTable { handle, table }
        }
        OP_CREATE_CONFIG => HciCommand::CreateConfig(get_create_config(&mut buf)?),
        OP_REMOVE_CONFIG => HciCommand::RemoveConfig {
            handle: ConnHandle(buf.get_u16_le()),
            config_id: buf.get_u8(),
        },
        OP_SET_CHANNEL_CLASSIFICATION => HciCommand::SetChannelClassification {
            map: ChannelMap::new(get_array(&mut buf)),
        },
        OP_SET_PROCEDURE_PARAMETERS => {
            let handle = ConnHandle(buf.get_u16_le());
            let config_id = buf.get_u8();
            let params = PreferredParams {
                max_procedure_len: buf.get_u16_le(),
                min_procedure_interval: buf.get_u16_le(),
                max_procedure_interval: buf.get_u16_le(),
                max_procedure_count: buf.get_u16_le(),
                min_subevent_len: get_u24_le(&mut buf),
                max_subevent_len: get_u24_le(&mut buf),
                aci: buf.get_u8(),
                phy: buf.get_u8(),
                tx_pwr_delta: buf.get_i8(),
                preferred_peer_antenna: buf.get_u8(),
                snr_control_initiator: buf.get_u8(),
                snr_control_reflector: buf.get_u8(),
            };
            HciCommand::SetProcedureParameters(SetProcedureParameters {
                handle,
                config_id,
                params,
            })
        }
        OP_PROCEDURE_ENABLE => {
            let handle = ConnHandle(buf.get_u16_le());
            let config_id = buf.get_u8();
            let enable = match buf.get_u8() {
                0 => false,
                1 => true,
                other => {
                    return Err(PduError::InvalidValue {
                        field: "enable",
                        value: u32::from(other),
                    })
                }
            };
            HciCommand::ProcedureEnable(ProcedureEnable {
                handle,
                config_id,
                enable,
            })
        }
        _ => return Err(PduError::UnknownOpcode(opcode)),
    };

    Ok(cmd)
}

fn get_create_config<B: Buf>(buf: &mut B) -> Result<CreateConfig> {
    let handle = ConnHandle(buf.get_u16_le());
    let config_id = buf.get_u8();
    let create_context = buf.get_u8();
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
    let spec = ConfigSpec {
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
        chm_repetition: buf.get_u8(),
        channel_selection: buf.get_u8(),
        ch3c_shape: buf.get_u8(),
        ch3c_jump: buf.get_u8(),
        ..ConfigSpec::default()
    };
    buf.advance(1);
    Ok(CreateConfig {
        handle,
        create_context,
        spec,
    })
}
