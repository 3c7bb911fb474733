//! Capability handling
//!
//! Remote capabilities arrive over the air and are clamped to what this
//! implementation can represent before anything else looks at them. Timing
//! values for a configuration are picked as the fastest value both sides
//! support.

use lecs_common::model::{TimingFamily, T_SW_US};
use lecs_common::types::MAX_CONFIGS;
use lecs_common::{Capabilities, ConfigSpec};

/// Maximum antennas and antenna paths
pub const MAX_ANTENNAS: u8 = 4;

/// Clamps capabilities received from the peer.
///
/// - antenna count capped at 4 (and at least 1)
/// - antenna paths capped at 4 and not below the antenna count
/// - configuration count capped at 4
/// - T_SW rounded up to the next allowed value; anything slower than the
///   largest allowed value disables antenna switching
pub fn clamp_remote(caps: &Capabilities) -> Capabilities {
    let mut out = *caps;
    out.num_antennas = caps.num_antennas.clamp(1, MAX_ANTENNAS);
    out.max_antenna_paths = caps.max_antenna_paths.clamp(out.num_antennas, MAX_ANTENNAS);
    out.num_configs = caps.num_configs.min(MAX_CONFIGS as u8);

    match T_SW_US.iter().find(|&&allowed| allowed >= caps.t_sw) {
        Some(&t_sw) => out.t_sw = t_sw,
        None => {
            tracing::debug!(t_sw = caps.t_sw, "Remote T_SW out of range, switching disabled");
            out.t_sw = 0;
            out.num_antennas = 1;
            out.max_antenna_paths = 1;
        }
    }
    out
}

/// First index, scanning from the fastest value, that both bitmaps support.
///
/// The slowest value is mandatory, so a common index always exists.
pub fn select_timing(local: &Capabilities, remote: &Capabilities, family: TimingFamily) -> u8 {
    let common = local.timing_bitmap(family) & remote.timing_bitmap(family);
    (0..family.len())
        .find(|&idx| common & (1 << idx) != 0)
        .unwrap_or(family.len() - 1)
}

/// Writes the negotiated timing indices of every family into `spec`.
pub fn apply_timing(spec: &mut ConfigSpec, local: &Capabilities, remote: &Capabilities) {
    for family in TimingFamily::ALL {
        spec.set_timing_index(family, select_timing(local, remote, family));
    }
}

/// True if the index is advertised in the local bitmap
pub fn supports_timing(caps: &Capabilities, family: TimingFamily, index: u8) -> bool {
    index < family.len() && caps.timing_bitmap(family) & (1 << index) != 0
}

/// Antenna switch time used for tone steps: the slower of both sides
pub fn switch_time_us(local: &Capabilities, remote: &Capabilities) -> u8 {
    local.t_sw.max(remote.t_sw)
}
