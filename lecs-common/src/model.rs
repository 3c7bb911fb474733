//! Channel Sounding data model shared by the wire codecs and the engine
//!
//! These are plain value types: the wire layouts live in `lecs-pdu`, and the
//! validation and negotiation rules live in `lecs-cs`.

use serde::{Deserialize, Serialize};

use crate::types::{ChannelMap, CsRole, Phy, RttType, StepMode};

/// Timing family values in microseconds, indexed by capability bit position.
/// The last entry of each family is mandatory.
pub const T_IP1_US: [u16; 8] = [10, 20, 30, 40, 50, 60, 80, 145];
/// Interlude period between tone exchanges
pub const T_IP2_US: [u16; 8] = [10, 20, 30, 40, 50, 60, 80, 145];
/// Frequency change period
pub const T_FCS_US: [u16; 10] = [15, 20, 30, 40, 50, 60, 80, 100, 120, 150];
/// Phase measurement period
pub const T_PM_US: [u16; 3] = [10, 20, 40];
/// Allowed antenna switch times
pub const T_SW_US: [u8; 5] = [0, 1, 2, 4, 10];

/// Number of antenna paths for each tone antenna configuration index
pub const ACI_ANTENNA_PATHS: [u8; 8] = [1, 2, 3, 4, 2, 3, 4, 4];

/// Sub-mode value meaning "no sub-mode"
pub const SUB_MODE_NONE: u8 = 0xFF;

/// Size of a frequency actuation error table
pub const FAE_TABLE_LEN: usize = 72;

/// One of the four negotiated timing families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimingFamily {
    /// T_IP1
    Ip1,
    /// T_IP2
    Ip2,
    /// T_FCS
    Fcs,
    /// T_PM
    Pm,
}

impl TimingFamily {
    /// All families in negotiation order
    pub const ALL: [TimingFamily; 4] = [
        TimingFamily::Ip1,
        TimingFamily::Ip2,
        TimingFamily::Fcs,
        TimingFamily::Pm,
    ];

    /// Allowed values of the family, fastest first
    pub fn values(&self) -> &'static [u16] {
        match self {
            TimingFamily::Ip1 => &T_IP1_US,
            TimingFamily::Ip2 => &T_IP2_US,
            TimingFamily::Fcs => &T_FCS_US,
            TimingFamily::Pm => &T_PM_US,
        }
    }

    /// Value for an index, if the index is within the family
    pub fn value(&self, index: u8) -> Option<u16> {
        self.values().get(usize::from(index)).copied()
    }

    /// Number of values in the family
    pub fn len(&self) -> u8 {
        self.values().len() as u8
    }
}

/// CS capabilities of one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Optional modes (bit 0: mode 3)
    pub mode_types: u8,
    /// RTT precision bitmap (bit 0 AA-only, bit 1 sounding, bit 2 random payload)
    pub rtt_capability: u8,
    /// Steps needed for AA-only RTT accuracy
    pub rtt_aa_only_n: u8,
    /// Steps needed for sounding-sequence RTT accuracy (0: unsupported)
    pub rtt_sounding_n: u8,
    /// Steps needed for random-payload RTT accuracy (0: unsupported)
    pub rtt_random_payload_n: u8,
    /// NADM capability for sounding sequences
    pub nadm_sounding_capability: u16,
    /// NADM capability for random sequences
    pub nadm_random_capability: u16,
    /// Optional sync PHYs (bit 1: 2M, bit 2: 2M 2BT)
    pub cs_sync_phys: u8,
    /// Number of antennas (1..=4)
    pub num_antennas: u8,
    /// Maximum antenna paths (1..=4)
    pub max_antenna_paths: u8,
    /// Supported roles (bit 0 initiator, bit 1 reflector)
    pub roles: u8,
    /// Frequency actuation error is zero, so no FAE table is needed
    pub no_fae: bool,
    /// Channel selection algorithm #3c supported
    pub channel_selection_3c: bool,
    /// Phase-based ranging from the RTT sounding sequence supported
    pub pbr_from_rtt_sounding: bool,
    /// Number of configurations (1..=4)
    pub num_configs: u8,
    /// Maximum number of procedures supported at once
    pub max_procedures: u16,
    /// Antenna switch time in microseconds
    pub t_sw: u8,
    /// Optional T_IP1 values (bit per index)
    pub t_ip1: u16,
    /// Optional T_IP2 values (bit per index)
    pub t_ip2: u16,
    /// Optional T_FCS values (bit per index)
    pub t_fcs: u16,
    /// Optional T_PM values (bit per index)
    pub t_pm: u16,
    /// TX SNR capability bitmap
    pub tx_snr_capability: u8,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            mode_types: 0x01,
            rtt_capability: 0x05,
            rtt_aa_only_n: 1,
            rtt_sounding_n: 1,
            rtt_random_payload_n: 1,
            nadm_sounding_capability: 0x0001,
            nadm_random_capability: 0x0001,
            cs_sync_phys: 0x02,
            num_antennas: 1,
            max_antenna_paths: 1,
            roles: 0x03,
            no_fae: true,
            channel_selection_3c: true,
            pbr_from_rtt_sounding: false,
            num_configs: 4,
            max_procedures: 1,
            t_sw: 10,
            t_ip1: 0x00FF,
            t_ip2: 0x00FF,
            t_fcs: 0x03FF,
            t_pm: 0x0007,
            tx_snr_capability: 0,
        }
    }
}

impl Capabilities {
    /// True if the device can act in the given role
    pub fn supports_role(&self, role: CsRole) -> bool {
        let bit = match role {
            CsRole::Initiator => 0x01,
            CsRole::Reflector => 0x02,
        };
        self.roles & bit != 0
    }

    /// True if the device can run steps of the given mode
    pub fn supports_mode(&self, mode: StepMode) -> bool {
        match mode {
            StepMode::Mode3 => self.mode_types & 0x01 != 0,
            _ => true,
        }
    }

    /// True if the device can send the given RTT payload
    pub fn supports_rtt(&self, rtt: RttType) -> bool {
        if rtt.is_sounding() {
            self.rtt_sounding_n != 0
        } else if rtt.is_random() {
            self.rtt_random_payload_n != 0
        } else {
            true
        }
    }

    /// True if the device can use the PHY for CS_SYNC
    pub fn supports_phy(&self, phy: Phy) -> bool {
        phy == Phy::Le1M || self.cs_sync_phys & phy.capability_bit() != 0
    }

    /// Bitmap of supported values for a timing family, mandatory value included
    pub fn timing_bitmap(&self, family: TimingFamily) -> u16 {
        let raw = match family {
            TimingFamily::Ip1 => self.t_ip1,
            TimingFamily::Ip2 => self.t_ip2,
            TimingFamily::Fcs => self.t_fcs,
            TimingFamily::Pm => self.t_pm,
        };
        let len = family.len();
        let mask = (1u16 << len) - 1;
        (raw & mask) | (1 << (len - 1))
    }
}

/// Configuration content as created by the host or carried in CS_CONFIG_REQ.
///
/// Numeric fields stay raw so that a rejected request can be reported with
/// the exact offending value; typed accessors decode them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSpec {
    /// Configuration slot (0..=3)
    pub config_id: u8,
    /// Local role in this configuration
    pub role: CsRole,
    /// Main mode
    pub main_mode: u8,
    /// Sub mode or `SUB_MODE_NONE`
    pub sub_mode: u8,
    /// Minimum main-mode steps between sub-mode steps
    pub main_min_steps: u8,
    /// Maximum main-mode steps between sub-mode steps
    pub main_max_steps: u8,
    /// Main-mode steps repeated from the previous subevent
    pub main_repetition: u8,
    /// Mode-0 steps at the start of each subevent
    pub mode0_steps: u8,
    /// RTT payload type
    pub rtt_type: u8,
    /// CS_SYNC PHY
    pub sync_phy: u8,
    /// Enabled channels
    pub channel_map: ChannelMap,
    /// Channel map cycles per procedure for non-mode-0 steps
    pub chm_repetition: u8,
    /// Channel selection algorithm (0: #3b, 1: #3c)
    pub channel_selection: u8,
    /// #3c shape (0: hat, 1: X)
    pub ch3c_shape: u8,
    /// #3c channel jump
    pub ch3c_jump: u8,
    /// Negotiated T_IP1 index
    pub t_ip1_idx: u8,
    /// Negotiated T_IP2 index
    pub t_ip2_idx: u8,
    /// Negotiated T_FCS index
    pub t_fcs_idx: u8,
    /// Negotiated T_PM index
    pub t_pm_idx: u8,
}

impl ConfigSpec {
    /// Decoded main mode
    pub fn main_mode(&self) -> Option<StepMode> {
        StepMode::from_u8(self.main_mode)
    }

    /// Decoded sub mode; `None` both for "no sub-mode" and for invalid values
    pub fn sub_mode(&self) -> Option<StepMode> {
        StepMode::from_u8(self.sub_mode)
    }

    /// True if a sub mode is configured
    pub fn has_sub_mode(&self) -> bool {
        self.sub_mode != SUB_MODE_NONE
    }

    /// Decoded RTT type
    pub fn rtt(&self) -> Option<RttType> {
        RttType::from_u8(self.rtt_type)
    }

    /// Decoded sync PHY
    pub fn phy(&self) -> Option<Phy> {
        Phy::from_u8(self.sync_phy)
    }

    /// Timing index for a family
    pub fn timing_index(&self, family: TimingFamily) -> u8 {
        match family {
            TimingFamily::Ip1 => self.t_ip1_idx,
            TimingFamily::Ip2 => self.t_ip2_idx,
            TimingFamily::Fcs => self.t_fcs_idx,
            TimingFamily::Pm => self.t_pm_idx,
        }
    }

    /// Sets the timing index for a family
    pub fn set_timing_index(&mut self, family: TimingFamily, index: u8) {
        match family {
            TimingFamily::Ip1 => self.t_ip1_idx = index,
            TimingFamily::Ip2 => self.t_ip2_idx = index,
            TimingFamily::Fcs => self.t_fcs_idx = index,
            TimingFamily::Pm => self.t_pm_idx = index,
        }
    }

    /// Timing value in microseconds for a family, if the index is valid
    pub fn timing_us(&self, family: TimingFamily) -> Option<u16> {
        family.value(self.timing_index(family))
    }

    /// Same content with the role swapped, as seen by the peer
    pub fn for_peer(&self) -> Self {
        Self {
            role: self.role.peer(),
            ..*self
        }
    }
}

impl Default for ConfigSpec {
    fn default() -> Self {
        Self {
            config_id: 0,
            role: CsRole::Initiator,
            main_mode: 2,
            sub_mode: SUB_MODE_NONE,
            main_min_steps: 0,
            main_max_steps: 0,
            main_repetition: 0,
            mode0_steps: 1,
            rtt_type: 0,
            sync_phy: 1,
            channel_map: ChannelMap::all_usable(),
            chm_repetition: 1,
            channel_selection: 0,
            ch3c_shape: 0,
            ch3c_jump: 2,
            t_ip1_idx: 7,
            t_ip2_idx: 7,
            t_fcs_idx: 9,
            t_pm_idx: 2,
        }
    }
}

/// Procedure parameters preferred by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredParams {
    /// Maximum procedure length in 0.625 ms units
    pub max_procedure_len: u16,
    /// Minimum procedure interval in connection events
    pub min_procedure_interval: u16,
    /// Maximum procedure interval in connection events
    pub max_procedure_interval: u16,
    /// Number of procedures to run (0: until disabled)
    pub max_procedure_count: u16,
    /// Minimum subevent length in microseconds
    pub min_subevent_len: u32,
    /// Maximum subevent length in microseconds
    pub max_subevent_len: u32,
    /// Tone antenna configuration index
    pub aci: u8,
    /// PHY for CS_SYNC exchanges
    pub phy: u8,
    /// Transmit power delta in dB (0x80: no preference)
    pub tx_pwr_delta: i8,
    /// Preferred peer antenna bitmap
    pub preferred_peer_antenna: u8,
    /// SNR control adjustment for the initiator (0xFF: not applied)
    pub snr_control_initiator: u8,
    /// SNR control adjustment for the reflector (0xFF: not applied)
    pub snr_control_reflector: u8,
}

impl Default for PreferredParams {
    fn default() -> Self {
        Self {
            max_procedure_len: 16,
            min_procedure_interval: 1,
            max_procedure_interval: 10,
            max_procedure_count: 1,
            min_subevent_len: 5_000,
            max_subevent_len: 10_000,
            aci: 0,
            phy: 1,
            tx_pwr_delta: 0,
            preferred_peer_antenna: 1,
            snr_control_initiator: 0xFF,
            snr_control_reflector: 0xFF,
        }
    }
}

/// Procedure parameters agreed by both controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcedureParams {
    /// Configuration the procedures run against
    pub config_id: u8,
    /// ACL connection event anchoring the first procedure
    pub conn_event_counter: u16,
    /// Lower bound of the offset from the ACL anchor, microseconds
    pub offset_min: u32,
    /// Upper bound of the offset from the ACL anchor, microseconds
    pub offset_max: u32,
    /// Final offset from the ACL anchor, microseconds
    pub offset: u32,
    /// Maximum procedure length in 0.625 ms units
    pub max_procedure_len: u16,
    /// CS events are this many ACL events apart
    pub event_interval: u16,
    /// Subevents in each CS event
    pub subevents_per_event: u8,
    /// Subevent spacing in 0.625 ms units
    pub subevent_interval: u16,
    /// Subevent length in microseconds
    pub subevent_len: u32,
    /// Procedures are this many ACL events apart
    pub procedure_interval: u16,
    /// Procedures to run (0: until disabled)
    pub procedure_count: u16,
    /// Tone antenna configuration index
    pub aci: u8,
    /// Preferred peer antenna bitmap
    pub preferred_peer_antenna: u8,
    /// CS_SYNC PHY
    pub phy: u8,
    /// Transmit power delta
    pub pwr_delta: i8,
    /// Initiator SNR control index (0..=4, 0xF: none)
    pub snr_control_initiator: u8,
    /// Reflector SNR control index (0..=4, 0xF: none)
    pub snr_control_reflector: u8,
}

impl ProcedureParams {
    /// Antenna paths for the negotiated ACI
    pub fn antenna_paths(&self) -> u8 {
        ACI_ANTENNA_PATHS
            .get(usize::from(self.aci))
            .copied()
            .unwrap_or(1)
    }
}

/// Host default settings for CS on one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultSettings {
    /// Role enable bitmap (bit 0 initiator, bit 1 reflector)
    pub role_enable: u8,
    /// Antenna used for CS_SYNC (0xFE: rotate, 0xFF: no preference)
    pub sync_antenna_selection: u8,
    /// Maximum transmit power in dBm
    pub max_tx_power: i8,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            role_enable: 0x03,
            sync_antenna_selection: 0xFF,
            max_tx_power: 20,
        }
    }
}

impl DefaultSettings {
    /// True if the host allows the given role
    pub fn role_enabled(&self, role: CsRole) -> bool {
        match role {
            CsRole::Initiator => self.role_enable & 0x01 != 0,
            CsRole::Reflector => self.role_enable & 0x02 != 0,
        }
    }
}

/// Frequency actuation error table, one signed entry per usable channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaeTable(pub [i8; FAE_TABLE_LEN]);

impl Default for FaeTable {
    fn default() -> Self {
        Self([0; FAE_TABLE_LEN])
    }
}
