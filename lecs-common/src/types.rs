//! Core types shared by every layer of the Channel Sounding controller

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of CS configurations per connection.
pub const MAX_CONFIGS: usize = 4;

/// Number of CS channel indices (0..=78).
pub const NUM_CHANNELS: u8 = 79;

/// Channel indices that are never usable for channel sounding.
pub const RESERVED_CHANNELS: [u8; 8] = [0, 1, 23, 24, 25, 77, 78, 79];

/// Minimum number of enabled channels in a CS channel map.
pub const MIN_CHANNELS: usize = 15;

/// ACL connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ConnHandle(pub u16);

impl ConnHandle {
    /// Largest valid connection handle
    pub const MAX: u16 = 0x0EFF;

    /// Returns the raw handle value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Returns true if the handle is in the assignable range
    pub fn is_valid(&self) -> bool {
        self.0 <= Self::MAX
    }
}

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Link-layer role on the parent connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Connection central (authoritative side)
    Central,
    /// Connection peripheral
    Peripheral,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Central => write!(f, "central"),
            Role::Peripheral => write!(f, "peripheral"),
        }
    }
}

/// Role of a device within a CS configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CsRole {
    /// Transmits first in every step
    Initiator,
    /// Answers the initiator
    Reflector,
}

impl CsRole {
    /// Decodes the wire value (0 initiator, 1 reflector)
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CsRole::Initiator),
            1 => Some(CsRole::Reflector),
            _ => None,
        }
    }

    /// Returns the wire value
    pub fn as_u8(&self) -> u8 {
        match self {
            CsRole::Initiator => 0,
            CsRole::Reflector => 1,
        }
    }

    /// Role of the peer device
    pub fn peer(&self) -> Self {
        match self {
            CsRole::Initiator => CsRole::Reflector,
            CsRole::Reflector => CsRole::Initiator,
        }
    }
}

impl fmt::Display for CsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsRole::Initiator => write!(f, "initiator"),
            CsRole::Reflector => write!(f, "reflector"),
        }
    }
}

/// PHY used for CS_SYNC packets and procedure control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phy {
    /// LE 1M
    Le1M = 1,
    /// LE 2M
    Le2M = 2,
    /// LE 2M with BT = 2.0
    Le2M2Bt = 3,
}

impl Phy {
    /// Decodes the wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Phy::Le1M),
            2 => Some(Phy::Le2M),
            3 => Some(Phy::Le2M2Bt),
            _ => None,
        }
    }

    /// Bits per microsecond on air
    pub fn bits_per_us(&self) -> u32 {
        match self {
            Phy::Le1M => 1,
            Phy::Le2M | Phy::Le2M2Bt => 2,
        }
    }

    /// Bit of this PHY in a capability sync-PHY bitmap (zero for LE 1M, which is mandatory)
    pub fn capability_bit(&self) -> u8 {
        match self {
            Phy::Le1M => 0,
            Phy::Le2M => 1 << 1,
            Phy::Le2M2Bt => 1 << 2,
        }
    }
}

/// Step mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StepMode {
    /// Frequency offset only
    Mode0 = 0,
    /// Round-trip time
    Mode1 = 1,
    /// Tone phase only
    Mode2 = 2,
    /// Round-trip time and tone phase
    Mode3 = 3,
}

impl StepMode {
    /// Decodes the wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StepMode::Mode0),
            1 => Some(StepMode::Mode1),
            2 => Some(StepMode::Mode2),
            3 => Some(StepMode::Mode3),
            _ => None,
        }
    }

    /// Returns the wire value
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// True if the mode carries a CS_SYNC packet exchange
    pub fn has_sync(&self) -> bool {
        matches!(self, StepMode::Mode0 | StepMode::Mode1 | StepMode::Mode3)
    }

    /// True if the mode carries tone exchanges
    pub fn has_tones(&self) -> bool {
        matches!(self, StepMode::Mode2 | StepMode::Mode3)
    }

    /// True if the mode measures round-trip time
    pub fn has_rtt(&self) -> bool {
        matches!(self, StepMode::Mode1 | StepMode::Mode3)
    }
}

impl fmt::Display for StepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode-{}", self.as_u8())
    }
}

/// Round-trip-time payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RttType {
    /// Access address only
    AaOnly = 0,
    /// 32-bit sounding sequence
    Sounding32 = 1,
    /// 96-bit sounding sequence
    Sounding96 = 2,
    /// 32-bit random sequence
    Random32 = 3,
    /// 64-bit random sequence
    Random64 = 4,
    /// 96-bit random sequence
    Random96 = 5,
    /// 128-bit random sequence
    Random128 = 6,
}

impl RttType {
    /// Decodes the wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RttType::AaOnly),
            1 => Some(RttType::Sounding32),
            2 => Some(RttType::Sounding96),
            3 => Some(RttType::Random32),
            4 => Some(RttType::Random64),
            5 => Some(RttType::Random96),
            6 => Some(RttType::Random128),
            _ => None,
        }
    }

    /// Length of the sequence appended to CS_SYNC, in bits
    pub fn sequence_bits(&self) -> u32 {
        match self {
            RttType::AaOnly => 0,
            RttType::Sounding32 | RttType::Random32 => 32,
            RttType::Random64 => 64,
            RttType::Sounding96 | RttType::Random96 => 96,
            RttType::Random128 => 128,
        }
    }

    /// True for the fractional-timing sounding sequence types
    pub fn is_sounding(&self) -> bool {
        matches!(self, RttType::Sounding32 | RttType::Sounding96)
    }

    /// True for the random payload types
    pub fn is_random(&self) -> bool {
        matches!(
            self,
            RttType::Random32 | RttType::Random64 | RttType::Random96 | RttType::Random128
        )
    }
}

/// Controller status codes reported to the host and carried in reject PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum HciStatus {
    /// Success
    #[default]
    Success = 0x00,
    /// Unknown connection identifier
    UnknownConnectionId = 0x02,
    /// Memory capacity exceeded
    MemoryCapacityExceeded = 0x07,
    /// Command disallowed
    CommandDisallowed = 0x0C,
    /// Unsupported feature or parameter value
    UnsupportedFeature = 0x11,
    /// Invalid HCI command parameters
    InvalidHciCommandParameters = 0x12,
    /// Remote user terminated connection
    RemoteUserTerminated = 0x13,
    /// Connection terminated by local host
    LocalHostTerminated = 0x16,
    /// Unsupported remote feature
    UnsupportedRemoteFeature = 0x1A,
    /// Invalid LL parameters
    InvalidLlParameters = 0x1E,
    /// Unspecified error
    UnspecifiedError = 0x1F,
    /// Unsupported LL parameter value
    UnsupportedLlParameterValue = 0x20,
    /// LL response timeout
    LlResponseTimeout = 0x22,
    /// LL procedure collision
    LlProcedureCollision = 0x23,
    /// Instant passed
    InstantPassed = 0x28,
    /// Different transaction collision
    DifferentTransactionCollision = 0x2A,
    /// Controller busy
    ControllerBusy = 0x3A,
    /// Limit reached
    LimitReached = 0x43,
    /// Insufficient channels
    InsufficientChannels = 0x48,
}

impl HciStatus {
    /// Decodes a status octet
    pub fn from_u8(value: u8) -> Option<Self> {
        let status = match value {
            0x00 => HciStatus::Success,
            0x02 => HciStatus::UnknownConnectionId,
            0x07 => HciStatus::MemoryCapacityExceeded,
            0x0C => HciStatus::CommandDisallowed,
            0x11 => HciStatus::UnsupportedFeature,
            0x12 => HciStatus::InvalidHciCommandParameters,
            0x13 => HciStatus::RemoteUserTerminated,
            0x16 => HciStatus::LocalHostTerminated,
            0x1A => HciStatus::UnsupportedRemoteFeature,
            0x1E => HciStatus::InvalidLlParameters,
            0x1F => HciStatus::UnspecifiedError,
            0x20 => HciStatus::UnsupportedLlParameterValue,
            0x22 => HciStatus::LlResponseTimeout,
            0x23 => HciStatus::LlProcedureCollision,
            0x28 => HciStatus::InstantPassed,
            0x2A => HciStatus::DifferentTransactionCollision,
            0x3A => HciStatus::ControllerBusy,
            0x43 => HciStatus::LimitReached,
            0x48 => HciStatus::InsufficientChannels,
            _ => return None,
        };
        Some(status)
    }

    /// Decodes a status octet, mapping unknown codes to `UnspecifiedError`
    pub fn from_u8_lossy(value: u8) -> Self {
        Self::from_u8(value).unwrap_or(HciStatus::UnspecifiedError)
    }

    /// Returns the status octet
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// True for `Success`
    pub fn is_success(&self) -> bool {
        *self == HciStatus::Success
    }
}

impl fmt::Display for HciStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, self.as_u8())
    }
}

/// CS channel map: bit `n` (byte `n / 8`, bit `n % 8`) enables channel index `n`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelMap(pub [u8; 10]);

impl ChannelMap {
    /// Map with no channel enabled
    pub const EMPTY: ChannelMap = ChannelMap([0; 10]);

    /// Creates a map from its wire bytes
    pub fn new(bytes: [u8; 10]) -> Self {
        Self(bytes)
    }

    /// Map with all 72 usable channels enabled
    pub fn all_usable() -> Self {
        let mut map = Self::EMPTY;
        for ch in 0..NUM_CHANNELS {
            if !RESERVED_CHANNELS.contains(&ch) {
                map.set(ch, true);
            }
        }
        map
    }

    /// Builds a map from a list of channel indices
    pub fn from_channels(channels: &[u8]) -> Self {
        let mut map = Self::EMPTY;
        for &ch in channels {
            map.set(ch, true);
        }
        map
    }

    /// Returns the wire bytes
    pub fn as_bytes(&self) -> &[u8; 10] {
        &self.0
    }

    /// True if channel index `ch` is enabled
    pub fn is_set(&self, ch: u8) -> bool {
        let idx = usize::from(ch / 8);
        idx < self.0.len() && self.0[idx] & (1 << (ch % 8)) != 0
    }

    /// Enables or disables channel index `ch`
    pub fn set(&mut self, ch: u8, enabled: bool) {
        let idx = usize::from(ch / 8);
        if idx >= self.0.len() {
            return;
        }
        if enabled {
            self.0[idx] |= 1 << (ch % 8);
        } else {
            self.0[idx] &= !(1 << (ch % 8));
        }
    }

    /// Enabled channel indices in ascending order
    pub fn channels(&self) -> impl Iterator<Item = u8> + '_ {
        (0..80u8).filter(move |&ch| self.is_set(ch))
    }

    /// Number of enabled channels
    pub fn count(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// True if any reserved channel bit is set
    pub fn has_reserved_bits(&self) -> bool {
        RESERVED_CHANNELS.iter().any(|&ch| self.is_set(ch))
    }

    /// Reserved bits clear and at least 15 channels enabled
    pub fn is_valid(&self) -> bool {
        !self.has_reserved_bits() && self.count() >= MIN_CHANNELS
    }

    /// Channels enabled in both maps
    pub fn intersect(&self, other: &ChannelMap) -> ChannelMap {
        let mut out = [0u8; 10];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] & other.0[i];
        }
        ChannelMap(out)
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::all_usable()
    }
}

impl fmt::Debug for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelMap({} ch, ", self.count())?;
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}
