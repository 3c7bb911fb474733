//! CS configurations
//!
//! A configuration is validated against a fixed rule table before it is
//! stored. Up to four configurations live per connection; each one is
//! stored once the peer acknowledges it and is locked while procedures run
//! against it.

use std::fmt;

use lecs_common::model::TimingFamily;
use lecs_common::types::{MAX_CONFIGS, MIN_CHANNELS};
use lecs_common::{Capabilities, ConfigSpec, CsRole, DefaultSettings, HciStatus, PreferredParams, StepMode};

use crate::capabilities::supports_timing;
use crate::error::{CsError, Result};

/// Reason a configuration failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Field out of range or inconsistent with another field
    Invalid(&'static str),
    /// Valid content that one of the controllers cannot run
    Unsupported(&'static str),
    /// Channel map leaves fewer than 15 channels
    InsufficientChannels,
}

impl Violation {
    /// Status reported to the local host
    pub fn local_status(&self) -> HciStatus {
        match self {
            Violation::Invalid(_) => HciStatus::InvalidHciCommandParameters,
            Violation::Unsupported(_) => HciStatus::UnsupportedFeature,
            Violation::InsufficientChannels => HciStatus::InsufficientChannels,
        }
    }

    /// Status carried in the reject sent to the peer
    pub fn remote_status(&self) -> HciStatus {
        match self {
            Violation::Invalid(_) => HciStatus::InvalidLlParameters,
            Violation::Unsupported(_) | Violation::InsufficientChannels => {
                HciStatus::UnsupportedLlParameterValue
            }
        }
    }

    /// Short description
    pub fn reason(&self) -> &'static str {
        match self {
            Violation::Invalid(r) | Violation::Unsupported(r) => r,
            Violation::InsufficientChannels => "too few channels",
        }
    }

    /// Error for the local host
    pub fn into_local_error(self) -> CsError {
        CsError::new(self.local_status(), self.reason())
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Checks the rule table and returns the normalized configuration.
///
/// A configuration without a sub-mode has its main-mode step bounds forced
/// to zero.
pub fn validate_rules(spec: &ConfigSpec) -> std::result::Result<ConfigSpec, Violation> {
    let mut spec = *spec;

    if usize::from(spec.config_id) >= MAX_CONFIGS {
        return Err(Violation::Invalid("config id"));
    }
    if spec.channel_map.has_reserved_bits() {
        return Err(Violation::Invalid("reserved channel bits set"));
    }
    if spec.channel_map.count() < MIN_CHANNELS {
        return Err(Violation::InsufficientChannels);
    }

    let legal_pair = matches!(
        (spec.main_mode, spec.sub_mode()),
        (1, None) | (2, Some(StepMode::Mode1 | StepMode::Mode3) | None) | (3, Some(StepMode::Mode2) | None)
    );
    if !legal_pair || spec.main_mode().is_none() {
        return Err(Violation::Invalid("main/sub mode pair"));
    }
    if spec.has_sub_mode() {
        if spec.sub_mode().is_none() {
            return Err(Violation::Invalid("sub mode"));
        }
        if spec.main_min_steps < 2 || spec.main_max_steps < spec.main_min_steps {
            return Err(Violation::Invalid("main mode step bounds"));
        }
    } else {
        spec.main_min_steps = 0;
        spec.main_max_steps = 0;
    }

    if spec.main_repetition > 3 {
        return Err(Violation::Invalid("main mode repetition"));
    }
    if !(1..=3).contains(&spec.mode0_steps) {
        return Err(Violation::Invalid("mode-0 steps"));
    }
    if spec.rtt().is_none() {
        return Err(Violation::Invalid("rtt type"));
    }
    if spec.phy().is_none() {
        return Err(Violation::Invalid("sync phy"));
    }
    if !(1..=3).contains(&spec.chm_repetition) {
        return Err(Violation::Invalid("channel map repetition"));
    }
    match spec.channel_selection {
        0 => {}
        1 => {
            if spec.ch3c_shape > 1 {
                return Err(Violation::Invalid("#3c shape"));
            }
            if !(2..=8).contains(&spec.ch3c_jump) {
                return Err(Violation::Invalid("#3c jump"));
            }
        }
        _ => return Err(Violation::Invalid("channel selection")),
    }
    for family in TimingFamily::ALL {
        if spec.timing_index(family) >= family.len() {
            return Err(Violation::Invalid("timing index"));
        }
    }
    Ok(spec)
}

/// Checks that both controllers can run the configuration.
///
/// `spec.role` is the local role.
pub fn check_support(
    spec: &ConfigSpec,
    local: &Capabilities,
    remote: &Capabilities,
    settings: &DefaultSettings,
) -> std::result::Result<(), Violation> {
    if !local.supports_role(spec.role) || !settings.role_enabled(spec.role) {
        return Err(Violation::Unsupported("local role"));
    }
    if !remote.supports_role(spec.role.peer()) {
        return Err(Violation::Unsupported("remote role"));
    }
    let modes = [spec.main_mode(), spec.sub_mode()];
    for mode in modes.into_iter().flatten() {
        if !local.supports_mode(mode) || !remote.supports_mode(mode) {
            return Err(Violation::Unsupported(unsupported_mode(mode)));
        }
    }
    if let Some(rtt) = spec.rtt() {
        let uses_rtt = modes.into_iter().flatten().any(|m| m.has_rtt());
        if uses_rtt && (!local.supports_rtt(rtt) || !remote.supports_rtt(rtt)) {
            return Err(Violation::Unsupported("rtt type"));
        }
    }
    if let Some(phy) = spec.phy() {
        if !local.supports_phy(phy) || !remote.supports_phy(phy) {
            return Err(Violation::Unsupported("sync phy"));
        }
    }
    if spec.channel_selection == 1 && !(local.channel_selection_3c && remote.channel_selection_3c) {
        return Err(Violation::Unsupported("channel selection #3c"));
    }
    for family in TimingFamily::ALL {
        if !supports_timing(local, family, spec.timing_index(family)) {
            return Err(Violation::Unsupported("timing value"));
        }
    }
    Ok(())
}

fn unsupported_mode(mode: StepMode) -> &'static str {
    match mode {
        StepMode::Mode0 => "mode 0",
        StepMode::Mode1 => "mode 1",
        StepMode::Mode2 => "mode 2",
        StepMode::Mode3 => "mode 3",
    }
}

/// One configuration slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSlot {
    /// Content as seen locally (role is the local role)
    pub spec: ConfigSpec,
    /// Procedures are running against this configuration
    pub in_use: bool,
    /// Host procedure parameters, once set
    pub preferred: Option<PreferredParams>,
    /// DRBG step count the next procedure series starts from
    pub step_count: u16,
}

impl ConfigSlot {
    fn new(spec: ConfigSpec) -> Self {
        Self {
            spec,
            in_use: false,
            preferred: None,
            step_count: 0,
        }
    }

    /// Local CS role in this configuration
    pub fn role(&self) -> CsRole {
        self.spec.role
    }
}

/// Configuration slots of one connection
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    slots: [Option<ConfigSlot>; MAX_CONFIGS],
}

impl ConfigStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for a configuration id
    pub fn get(&self, id: u8) -> Option<&ConfigSlot> {
        self.slots.get(usize::from(id)).and_then(Option::as_ref)
    }

    /// Mutable slot for a configuration id
    pub fn get_mut(&mut self, id: u8) -> Option<&mut ConfigSlot> {
        self.slots.get_mut(usize::from(id)).and_then(Option::as_mut)
    }

    /// Number of stored configurations
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// True if no configuration is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any configuration is locked by running procedures
    pub fn any_in_use(&self) -> bool {
        self.slots.iter().flatten().any(|slot| slot.in_use)
    }

    /// Iterates over stored configurations
    pub fn iter(&self) -> impl Iterator<Item = &ConfigSlot> {
        self.slots.iter().flatten()
    }

    /// Checks that `id` can take a configuration.
    ///
    /// Replacing an existing configuration is allowed unless it is in use.
    /// A new id fails with `LimitReached` once `limit` configurations exist.
    pub fn check_room(&self, id: u8, limit: u8) -> Result<()> {
        let idx = usize::from(id);
        if idx >= MAX_CONFIGS {
            return Err(CsError::invalid("config id"));
        }
        match &self.slots[idx] {
            Some(existing) if existing.in_use => Err(CsError::disallowed("configuration in use")),
            Some(_) => Ok(()),
            None if self.len() >= usize::from(limit) => {
                Err(CsError::new(HciStatus::LimitReached, "no free configuration"))
            }
            None => Ok(()),
        }
    }

    /// Stores an agreed configuration, replacing any slot with the same id
    pub fn store(&mut self, spec: ConfigSpec, limit: u8) -> Result<()> {
        self.check_room(spec.config_id, limit)?;
        self.slots[usize::from(spec.config_id)] = Some(ConfigSlot::new(spec));
        Ok(())
    }

    /// Removes a configuration that is not in use
    pub fn remove(&mut self, id: u8) -> Result<ConfigSlot> {
        match self.get(id) {
            None => Err(CsError::invalid("unknown config id")),
            Some(slot) if slot.in_use => Err(CsError::disallowed("configuration in use")),
            Some(_) => self.slots[usize::from(id)]
                .take()
                .ok_or(CsError::invalid("unknown config id")),
        }
    }

    /// True if a configuration with identical content exists
    pub fn is_duplicate(&self, spec: &ConfigSpec) -> bool {
        self.get(spec.config_id)
            .map(|slot| slot.spec == *spec)
            .unwrap_or(false)
    }
}
