//! CS link-layer control PDU encoding/decoding
//!
//! A PDU on the wire is the opcode octet followed by a fixed-length payload.
//! Multi-octet fields are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use lecs_common::{
    Capabilities, ChannelMap, ConfigSpec, CsRole, FaeTable, HciStatus, ProcedureParams,
};

use crate::fields::{self, get_u24_le, put_u24_le};
use crate::protocol::{
    ChannelMapInd, ConfigAction, ConfigReq, ControlPdu, CsInd, CsRsp, Opcode, RejectExt,
    SecurityVectors, Terminate,
};

/// Errors that can occur during PDU or HCI encoding/decoding
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PduError {
    /// Buffer too short
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort {
        /// Number of bytes needed
        needed: usize,
        /// Number of bytes available
        available: usize,
    },

    /// Unknown opcode
    #[error("unknown opcode: 0x{0:04x}")]
    UnknownOpcode(u16),

    /// Payload length does not match the opcode
    #[error("bad length for 0x{opcode:04x}: expected {expected}, got {actual}")]
    BadLength {
        /// Opcode of the PDU or command
        opcode: u16,
        /// Expected payload length
        expected: usize,
        /// Actual payload length
        actual: usize,
    },

    /// A field carries a reserved or out-of-range value
    #[error("invalid value {value} for field {field}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Offending value
        value: u32,
    },
}

impl PduError {
    /// Status reported for a malformed incoming PDU
    pub fn status(&self) -> HciStatus {
        match self {
            PduError::UnknownOpcode(_) => HciStatus::UnsupportedRemoteFeature,
            PduError::InvalidValue { .. } => HciStatus::UnsupportedLlParameterValue,
            _ => HciStatus::InvalidLlParameters,
        }
    }
}

impl From<PduError> for lecs_common::Error {
    fn from(err: PduError) -> Self {
        lecs_common::Error::Protocol(err.to_string())
    }
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, PduError>;

/// Encodes a control PDU
pub fn encode(pdu: &ControlPdu) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + pdu.opcode().payload_len());
    encode_into(pdu, &mut buf);
    buf.freeze()
}

/// Encodes a control PDU into an existing buffer
pub fn encode_into(pdu: &ControlPdu, buf: &mut BytesMut) {
    buf.put_u8(pdu.opcode() as u8);

    match pdu {
        ControlPdu::RejectExtInd(r) => {
            buf.put_u8(r.opcode);
            buf.put_u8(r.error.as_u8());
        }
        ControlPdu::CsSecReq(v) | ControlPdu::CsSecRsp(v) => {
            buf.extend_from_slice(&v.iv);
            buf.extend_from_slice(&v.instantiation_nonce);
            buf.extend_from_slice(&v.pv);
        }
        ControlPdu::CsCapabilitiesReq(caps) | ControlPdu::CsCapabilitiesRsp(caps) => {
            put_capabilities(caps, buf);
        }
        ControlPdu::CsConfigReq(req) => put_config_req(req, buf),
        ControlPdu::CsConfigRsp { config_id } => buf.put_u8(*config_id),
        ControlPdu::CsReq(p) => {
            buf.put_u8(p.config_id);
            buf.put_u16_le(p.conn_event_counter);
            put_u24_le(buf, p.offset_min);
            put_u24_le(buf, p.offset_max);
            buf.put_u16_le(p.max_procedure_len);
            buf.put_u16_le(p.event_interval);
            buf.put_u8(p.subevents_per_event);
            buf.put_u16_le(p.subevent_interval);
            put_u24_le(buf, p.subevent_len);
            buf.put_u16_le(p.procedure_interval);
            buf.put_u16_le(p.procedure_count);
            buf.put_u8(p.aci);
            buf.put_u8(p.preferred_peer_antenna);
            buf.put_u8(p.phy);
            buf.put_i8(p.pwr_delta);
            buf.put_u8(fields::pack_nibbles(
                p.snr_control_initiator,
                p.snr_control_reflector,
            ));
        }
        ControlPdu::CsRsp(r) => {
            buf.put_u8(r.config_id);
            buf.put_u16_le(r.conn_event_counter);
            put_u24_le(buf, r.offset_min);
            put_u24_le(buf, r.offset_max);
            buf.put_u16_le(r.event_interval);
            buf.put_u8(r.subevents_per_event);
            buf.put_u16_le(r.subevent_interval);
            put_u24_le(buf, r.subevent_len);
            buf.put_u8(r.aci);
            buf.put_u8(r.phy);
            buf.put_i8(r.pwr_delta);
            buf.put_u8(0);
        }
        ControlPdu::CsInd(i) => {
            buf.put_u8(i.config_id);
            buf.put_u16_le(i.conn_event_counter);
            put_u24_le(buf, i.offset);
            buf.put_u16_le(i.event_interval);
            buf.put_u8(i.subevents_per_event);
            buf.put_u16_le(i.subevent_interval);
            put_u24_le(buf, i.subevent_len);
            buf.put_u8(i.aci);
            buf.put_u8(i.phy);
            buf.put_i8(i.pwr_delta);
            buf.put_u8(0);
        }
        ControlPdu::CsTerminateReq(t) | ControlPdu::CsTerminateRsp(t) => {
            buf.put_u8(t.config_id);
            buf.put_u16_le(t.step_count);
            buf.put_u8(t.error.as_u8());
        }
        ControlPdu::CsFaeReq => {}
        ControlPdu::CsFaeRsp(table) => {
            for entry in table.0.iter() {
                buf.put_i8(*entry);
            }
        }
        ControlPdu::CsChannelMapInd(m) => {
            buf.extend_from_slice(m.map.as_bytes());
            buf.put_u16_le(m.instant);
        }
    }
}

fn put_capabilities<B: BufMut>(caps: &Capabilities, buf: &mut B) {
    buf.put_u8(caps.mode_types);
    buf.put_u8(caps.rtt_capability);
    buf.put_u8(caps.rtt_aa_only_n);
    buf.put_u8(caps.rtt_sounding_n);
    buf.put_u8(caps.rtt_random_payload_n);
    buf.put_u16_le(caps.nadm_sounding_capability);
    buf.put_u16_le(caps.nadm_random_capability);
    buf.put_u8(caps.cs_sync_phys);
    buf.put_u8(fields::pack_nibbles(
        caps.num_antennas,
        caps.max_antenna_paths,
    ));
    buf.put_u8(roles_octet(caps));
    buf.put_u8(caps.num_configs);
    buf.put_u16_le(caps.max_procedures);
    buf.put_u8(caps.t_sw);
    buf.put_u16_le(caps.t_ip1);
    buf.put_u16_le(caps.t_ip2);
    buf.put_u16_le(caps.t_fcs);
    buf.put_u16_le(caps.t_pm);
    buf.put_u8(caps.tx_snr_capability);
}

/// Roles bitmap and subfeature bits as carried in one octet
pub(crate) fn roles_octet(caps: &Capabilities) -> u8 {
    let mut octet = caps.roles & 0x03;
    if caps.no_fae {
        octet |= fields::SUBFEATURE_NO_FAE;
    }
    if caps.channel_selection_3c {
        octet |= fields::SUBFEATURE_CH3C;
    }
    if caps.pbr_from_rtt_sounding {
        octet |= fields::SUBFEATURE_PBR_RTT;
    }
    octet
}

fn get_capabilities<B: Buf>(buf: &mut B) -> Capabilities {
    let mode_types = buf.get_u8();
    let rtt_capability = buf.get_u8();
    let rtt_aa_only_n = buf.get_u8();
    let rtt_sounding_n = buf.get_u8();
    let rtt_random_payload_n = buf.get_u8();
    let nadm_sounding_capability = buf.get_u16_le();
    let nadm_random_capability = buf.get_u16_le();
    let cs_sync_phys = buf.get_u8();
    let antennas = buf.get_u8();
    let roles = buf.get_u8();
    Capabilities {
        mode_types,
        rtt_capability,
        rtt_aa_only_n,
        rtt_sounding_n,
        rtt_random_payload_n,
        nadm_sounding_capability,
        nadm_random_capability,
        cs_sync_phys,
        num_antennas: fields::num_antennas(antennas),
        max_antenna_paths: fields::max_antenna_paths(antennas),
        roles: fields::roles(roles),
        no_fae: roles & fields::SUBFEATURE_NO_FAE != 0,
        channel_selection_3c: roles & fields::SUBFEATURE_CH3C != 0,
        pbr_from_rtt_sounding: roles & fields::SUBFEATURE_PBR_RTT != 0,
        num_configs: buf.get_u8(),
        max_procedures: buf.get_u16_le(),
        t_sw: buf.get_u8(),
        t_ip1: buf.get_u16_le(),
        t_ip2: buf.get_u16_le(),
        t_fcs: buf.get_u16_le(),
        t_pm: buf.get_u16_le(),
        tx_snr_capability: buf.get_u8(),
    }
}

fn put_config_req(req: &ConfigReq, buf: &mut BytesMut) {
    let spec = &req.spec;
    buf.put_u8(fields::pack_config_id_action(
        spec.config_id,
        req.action as u8,
    ));
    buf.extend_from_slice(spec.channel_map.as_bytes());
    buf.put_u8(spec.chm_repetition);
    buf.put_u8(spec.main_mode);
    buf.put_u8(spec.sub_mode);
    buf.put_u8(spec.main_min_steps);
    buf.put_u8(spec.main_max_steps);
    buf.put_u8(spec.main_repetition);
    buf.put_u8(spec.mode0_steps);
    buf.put_u8(spec.sync_phy);
    buf.put_u8(fields::pack_nibbles(spec.rtt_type, spec.role.as_u8()));
    buf.put_u8(spec.channel_selection);
    buf.put_u8(fields::pack_nibbles(spec.ch3c_shape, spec.ch3c_jump));
    buf.put_u8(spec.t_ip1_idx);
    buf.put_u8(spec.t_ip2_idx);
    buf.put_u8(spec.t_fcs_idx);
    buf.put_u8(spec.t_pm_idx);
    buf.put_u8(0);
}

fn get_config_req<B: Buf>(buf: &mut B) -> Result<ConfigReq> {
    let first = buf.get_u8();
    let action = ConfigAction::from_u8(fields::config_action(first)).ok_or(
        PduError::InvalidValue {
            field: "action",
            value: u32::from(fields::config_action(first)),
        },
    )?;
    let channel_map = ChannelMap::new(get_array(buf));
    let chm_repetition = buf.get_u8();
    let main_mode = buf.get_u8();
    let sub_mode = buf.get_u8();
    let main_min_steps = buf.get_u8();
    let main_max_steps = buf.get_u8();
    let main_repetition = buf.get_u8();
    let mode0_steps = buf.get_u8();
    let sync_phy = buf.get_u8();
    let rtt_role = buf.get_u8();
    let role = CsRole::from_u8(fields::role(rtt_role)).ok_or(PduError::InvalidValue {
        field: "role",
        value: u32::from(fields::role(rtt_role)),
    })?;
    let channel_selection = buf.get_u8();
    let shape_jump = buf.get_u8();
    let spec = ConfigSpec {
        config_id: fields::config_id(first),
        role,
        main_mode,
        sub_mode,
        main_min_steps,
        main_max_steps,
        main_repetition,
        mode0_steps,
        rtt_type: fields::rtt_type(rtt_role),
        sync_phy,
        channel_map,
        chm_repetition,
        channel_selection,
        ch3c_shape: fields::ch3c_shape(shape_jump),
        ch3c_jump: fields::ch3c_jump(shape_jump),
        t_ip1_idx: buf.get_u8(),
        t_ip2_idx: buf.get_u8(),
        t_fcs_idx: buf.get_u8(),
        t_pm_idx: buf.get_u8(),
    };
    buf.advance(1);
    Ok(ConfigReq { action, spec })
}

pub(crate) fn get_array<B: Buf, const N: usize>(buf: &mut B) -> [u8; N] {
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    out
}

/// Decodes a control PDU
pub fn decode(data: &[u8]) -> Result<ControlPdu> {
    let mut buf = data;

    if buf.is_empty() {
        return Err(PduError::BufferTooShort {
            needed: 1,
            available: 0,
        });
    }

    let raw = buf.get_u8();
    let opcode = Opcode::from_u8(raw).ok_or(PduError::UnknownOpcode(u16::from(raw)))?;
    let expected = opcode.payload_len();
    if buf.len() != expected {
        return Err(PduError::BadLength {
            opcode: u16::from(raw),
            expected,
            actual: buf.len(),
        });
    }

    let pdu = match opcode {
        Opcode::RejectExtInd => ControlPdu::RejectExtInd(RejectExt {
            opcode: buf.get_u8(),
            error: HciStatus::from_u8_lossy(buf.get_u8()),
        }),
        Opcode::CsSecReq | Opcode::CsSecRsp => {
            let vectors = SecurityVectors {
                iv: get_array(&mut buf),
                instantiation_nonce: get_array(&mut buf),
                pv: get_array(&mut buf),
            };
            if opcode == Opcode::CsSecReq {
                ControlPdu::CsSecReq(vectors)
            } else {
                ControlPdu::CsSecRsp(vectors)
            }
        }
        Opcode::CsCapabilitiesReq => ControlPdu::CsCapabilitiesReq(get_capabilities(&mut buf)),
        Opcode::CsCapabilitiesRsp => ControlPdu::CsCapabilitiesRsp(get_capabilities(&mut buf)),
        Opcode::CsConfigReq => ControlPdu::CsConfigReq(get_config_req(&mut buf)?),
        Opcode::CsConfigRsp => ControlPdu::CsConfigRsp {
            config_id: fields::config_id(buf.get_u8()),
        },
        Opcode::CsReq => {
            let mut p = ProcedureParams {
                config_id: buf.get_u8(),
                conn_event_counter: buf.get_u16_le(),
                offset_min: get_u24_le(&mut buf),
                offset_max: get_u24_le(&mut buf),
                max_procedure_len: buf.get_u16_le(),
                event_interval: buf.get_u16_le(),
                subevents_per_event: buf.get_u8(),
                subevent_interval: buf.get_u16_le(),
                subevent_len: get_u24_le(&mut buf),
                procedure_interval: buf.get_u16_le(),
                procedure_count: buf.get_u16_le(),
                aci: buf.get_u8(),
                preferred_peer_antenna: buf.get_u8(),
                phy: buf.get_u8(),
                pwr_delta: buf.get_i8(),
                ..Default::default()
            };
            let snr = buf.get_u8();
            p.snr_control_initiator = fields::low_nibble(snr);
            p.snr_control_reflector = fields::high_nibble(snr);
            ControlPdu::CsReq(p)
        }
        Opcode::CsRsp => {
            let rsp = CsRsp {
                config_id: buf.get_u8(),
                conn_event_counter: buf.get_u16_le(),
                offset_min: get_u24_le(&mut buf),
                offset_max: get_u24_le(&mut buf),
                event_interval: buf.get_u16_le(),
                subevents_per_event: buf.get_u8(),
                subevent_interval: buf.get_u16_le(),
                subevent_len: get_u24_le(&mut buf),
                aci: buf.get_u8(),
                phy: buf.get_u8(),
                pwr_delta: buf.get_i8(),
            };
            ControlPdu::CsRsp(rsp)
        }
        Opcode::CsInd => {
            let ind = CsInd {
                config_id: buf.get_u8(),
                conn_event_counter: buf.get_u16_le(),
                offset: get_u24_le(&mut buf),
                event_interval: buf.get_u16_le(),
                subevents_per_event: buf.get_u8(),
                subevent_interval: buf.get_u16_le(),
                subevent_len: get_u24_le(&mut buf),
                aci: buf.get_u8(),
                phy: buf.get_u8(),
                pwr_delta: buf.get_i8(),
            };
            ControlPdu::CsInd(ind)
        }
        Opcode::CsTerminateReq | Opcode::CsTerminateRsp => {
            let t = Terminate {
                config_id: buf.get_u8(),
                step_count: buf.get_u16_le(),
                error: HciStatus::from_u8_lossy(buf.get_u8()),
            };
            if opcode == Opcode::CsTerminateReq {
                ControlPdu::CsTerminateReq(t)
            } else {
                ControlPdu::CsTerminateRsp(t)
            }
        }
        Opcode::CsFaeReq => ControlPdu::CsFaeReq,
        Opcode::CsFaeRsp => {
            let mut table = FaeTable::default();
            for entry in table.0.iter_mut() {
                *entry = buf.get_i8();
            }
            ControlPdu::CsFaeRsp(table)
        }
        Opcode::CsChannelMapInd => ControlPdu::CsChannelMapInd(ChannelMapInd {
            map: ChannelMap::new(get_array(&mut buf)),
            instant: buf.get_u16_le(),
        }),
    };

    Ok(pdu)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> ProcedureParams {
        ProcedureParams {
            config_id: 2,
            conn_event_counter: 0x1234,
            offset_min: 500,
            offset_max: 0x01_0000,
            max_procedure_len: 200,
            event_interval: 2,
            subevents_per_event: 4,
            subevent_interval: 8,
            subevent_len: 5_000,
            procedure_interval: 10,
            procedure_count: 3,
            aci: 0,
            preferred_peer_antenna: 1,
            phy: 1,
            pwr_delta: -3,
            snr_control_initiator: 0xF,
            snr_control_reflector: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_payload_lengths_match_opcode() {
        let pdus = vec![
            ControlPdu::reject(Opcode::CsReq, HciStatus::LlProcedureCollision),
            ControlPdu::CsSecReq(SecurityVectors::default()),
            ControlPdu::CsCapabilitiesReq(Capabilities::default()),
            ControlPdu::CsConfigReq(ConfigReq {
                action: ConfigAction::Create,
                spec: ConfigSpec::default(),
            }),
            ControlPdu::CsConfigRsp { config_id: 1 },
            ControlPdu::CsReq(sample_params()),
            ControlPdu::CsRsp(CsRsp::default()),
            ControlPdu::CsInd(CsInd::default()),
            ControlPdu::CsTerminateReq(Terminate {
                config_id: 0,
                step_count: 0,
                error: HciStatus::Success,
            }),
            ControlPdu::CsFaeReq,
            ControlPdu::CsFaeRsp(FaeTable::default()),
            ControlPdu::CsChannelMapInd(ChannelMapInd {
                map: ChannelMap::all_usable(),
                instant: 7,
            }),
        ];
        for pdu in pdus {
            let bytes = encode(&pdu);
            assert_eq!(bytes.len(), 1 + pdu.opcode().payload_len(), "{}", pdu.name());
            assert_eq!(bytes[0], pdu.opcode() as u8);
        }
    }

    #[test]
    fn test_cs_req_layout() {
        let bytes = encode(&ControlPdu::CsReq(sample_params()));
        assert_eq!(bytes[0], 0x26);
        assert_eq!(bytes[1], 2);
        assert_eq!(&bytes[2..4], &[0x34, 0x12]);
        assert_eq!(&bytes[4..7], &[0xF4, 0x01, 0x00]);
        assert_eq!(&bytes[7..10], &[0x00, 0x00, 0x01]);
        assert_eq!(bytes[27], 0xFD);
        assert_eq!(bytes[28], 0x2F);
        assert_eq!(decode(&bytes), Ok(ControlPdu::CsReq(sample_params())));
    }

    #[test]
    fn test_capabilities_layout() {
        let caps = Capabilities {
            num_antennas: 2,
            max_antenna_paths: 4,
            pbr_from_rtt_sounding: true,
            ..Default::default()
        };
        let bytes = encode(&ControlPdu::CsCapabilitiesRsp(caps));
        assert_eq!(bytes[11], 0x42);
        assert_eq!(bytes[12], 0x03 | 0x08 | 0x10 | 0x20);
        assert_eq!(bytes[13], 4);
        assert_eq!(decode(&bytes), Ok(ControlPdu::CsCapabilitiesRsp(caps)));
    }

    #[test]
    fn test_config_req_packs_role_and_action() {
        let spec = ConfigSpec {
            config_id: 3,
            role: CsRole::Reflector,
            rtt_type: 2,
            channel_selection: 1,
            ch3c_shape: 1,
            ch3c_jump: 5,
            ..Default::default()
        };
        let pdu = ControlPdu::CsConfigReq(ConfigReq {
            action: ConfigAction::Create,
            spec,
        });
        let bytes = encode(&pdu);
        assert_eq!(bytes[1], 0x43);
        assert_eq!(bytes[20], 0x12);
        assert_eq!(bytes[22], 0x51);
        assert_eq!(bytes[27], 0);
        assert_eq!(decode(&bytes), Ok(pdu));
    }

    #[test]
    fn test_config_req_reserved_action() {
        let mut bytes = encode(&ControlPdu::CsConfigReq(ConfigReq {
            action: ConfigAction::Remove,
            spec: ConfigSpec::default(),
        }))
        .to_vec();
        bytes[1] |= 0x80;
        assert!(matches!(
            decode(&bytes),
            Err(PduError::InvalidValue { field: "action", value: 2 })
        ));
    }

    #[test]
    fn test_security_vectors_layout() {
        let v = SecurityVectors {
            iv: [0x11; 8],
            instantiation_nonce: [0x22; 4],
            pv: [0x33; 8],
        };
        let bytes = encode(&ControlPdu::CsSecRsp(v));
        let expected = format!("21{}{}{}", "11".repeat(8), "22".repeat(4), "33".repeat(8));
        assert_eq!(hex::encode(&bytes[..]), expected);
        assert_eq!(decode(&bytes), Ok(ControlPdu::CsSecRsp(v)));
    }

    #[test]
    fn test_terminate_and_reject() {
        let t = Terminate {
            config_id: 1,
            step_count: 300,
            error: HciStatus::LocalHostTerminated,
        };
        let bytes = encode(&ControlPdu::CsTerminateRsp(t));
        assert_eq!(&bytes[..], &[0x2D, 1, 0x2C, 0x01, 0x16]);
        assert_eq!(decode(&bytes), Ok(ControlPdu::CsTerminateRsp(t)));

        let bytes = [0x11, 0x24, 0x1E];
        match decode(&bytes) {
            Ok(ControlPdu::RejectExtInd(r)) => {
                assert_eq!(r.opcode, 0x24);
                assert_eq!(r.error, HciStatus::InvalidLlParameters);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ind_and_rsp_decode() {
        let ind = CsInd {
            config_id: 1,
            conn_event_counter: 40,
            offset: 2_500,
            event_interval: 1,
            subevents_per_event: 2,
            subevent_interval: 16,
            subevent_len: 4_000_000,
            aci: 3,
            phy: 2,
            pwr_delta: 0x7F,
        };
        let bytes = encode(&ControlPdu::CsInd(ind));
        assert_eq!(decode(&bytes), Ok(ControlPdu::CsInd(ind)));

        let rsp = CsRsp {
            offset_min: 100,
            offset_max: 300,
            ..Default::default()
        };
        let bytes = encode(&ControlPdu::CsRsp(rsp));
        assert_eq!(decode(&bytes), Ok(ControlPdu::CsRsp(rsp)));
    }

    #[test]
    fn test_fae_table() {
        let mut table = FaeTable::default();
        table.0[0] = -5;
        table.0[71] = 9;
        let bytes = encode(&ControlPdu::CsFaeRsp(table));
        assert_eq!(bytes[1], 0xFB);
        assert_eq!(decode(&bytes), Ok(ControlPdu::CsFaeRsp(table)));
        assert_eq!(decode(&[0x2A]), Ok(ControlPdu::CsFaeReq));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode(&[]),
            Err(PduError::BufferTooShort {
                needed: 1,
                available: 0
            })
        );
        assert_eq!(decode(&[0x7F]), Err(PduError::UnknownOpcode(0x7F)));
        assert_eq!(
            decode(&[0x25, 0, 0]),
            Err(PduError::BadLength {
                opcode: 0x25,
                expected: 1,
                actual: 2
            })
        );
        assert_eq!(
            PduError::UnknownOpcode(0x7F).status(),
            HciStatus::UnsupportedRemoteFeature
        );
    }
}
