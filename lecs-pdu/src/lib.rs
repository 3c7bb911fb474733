//! Wire formats for LE Channel Sounding
//!
//! This crate provides:
//! - the link-layer control PDUs exchanged between two CS controllers
//! - the HCI commands and events exchanged with the host
//! - named accessors for the packed sub-octet fields both use

pub mod codec;
pub mod fields;
pub mod hci;
pub mod protocol;

pub use codec::{decode, encode, encode_into, PduError, Result};
pub use protocol::{
    ChannelMapInd, ConfigAction, ConfigReq, ControlPdu, CsInd, CsRsp, Opcode, RejectExt,
    SecurityVectors, Terminate,
};
