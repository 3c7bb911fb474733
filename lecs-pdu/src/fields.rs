//! Packed sub-octet fields
//!
//! Several CS PDU and HCI octets carry two values. These accessors are the
//! only place that knows the bit positions.

use bytes::{Buf, BufMut};

/// Config id occupies the low 6 bits of the first CS_CONFIG_REQ octet
pub fn config_id(octet: u8) -> u8 {
    octet & 0x3F
}

/// Config action occupies the top 2 bits of the first CS_CONFIG_REQ octet
pub fn config_action(octet: u8) -> u8 {
    octet >> 6
}

/// Packs config id and action
pub fn pack_config_id_action(config_id: u8, action: u8) -> u8 {
    (config_id & 0x3F) | ((action & 0x03) << 6)
}

/// Low nibble
pub fn low_nibble(octet: u8) -> u8 {
    octet & 0x0F
}

/// High nibble
pub fn high_nibble(octet: u8) -> u8 {
    octet >> 4
}

/// Packs two nibbles
pub fn pack_nibbles(low: u8, high: u8) -> u8 {
    (low & 0x0F) | ((high & 0x0F) << 4)
}

/// RTT type and role share one octet: RTT type low, role high
pub fn rtt_type(octet: u8) -> u8 {
    low_nibble(octet)
}

/// See [`rtt_type`]
pub fn role(octet: u8) -> u8 {
    high_nibble(octet)
}

/// #3c shape and jump share one octet: shape low, jump high
pub fn ch3c_shape(octet: u8) -> u8 {
    low_nibble(octet)
}

/// See [`ch3c_shape`]
pub fn ch3c_jump(octet: u8) -> u8 {
    high_nibble(octet)
}

/// Antenna count low nibble, max antenna paths high nibble
pub fn num_antennas(octet: u8) -> u8 {
    low_nibble(octet)
}

/// See [`num_antennas`]
pub fn max_antenna_paths(octet: u8) -> u8 {
    high_nibble(octet)
}

/// Roles bitmap in the low two bits of the roles/subfeatures octet
pub fn roles(octet: u8) -> u8 {
    octet & 0x03
}

/// No-FAE subfeature bit
pub const SUBFEATURE_NO_FAE: u8 = 1 << 3;
/// Channel selection #3c subfeature bit
pub const SUBFEATURE_CH3C: u8 = 1 << 4;
/// Phase-based ranging from RTT sounding sequence subfeature bit
pub const SUBFEATURE_PBR_RTT: u8 = 1 << 5;

/// Procedure abort reason in the low nibble, subevent abort reason in the high nibble
pub fn pack_abort_reasons(procedure: u8, subevent: u8) -> u8 {
    pack_nibbles(procedure, subevent)
}

/// Reads a 24-bit little-endian value
pub fn get_u24_le<B: Buf>(buf: &mut B) -> u32 {
    let lo = u32::from(buf.get_u16_le());
    let hi = u32::from(buf.get_u8());
    lo | (hi << 16)
}

/// Writes a 24-bit little-endian value; bits above 24 are dropped
pub fn put_u24_le<B: BufMut>(buf: &mut B, value: u32) {
    buf.put_u16_le((value & 0xFFFF) as u16);
    buf.put_u8(((value >> 16) & 0xFF) as u8);
}
