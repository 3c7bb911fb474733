//! Procedure parameters
//!
//! Host preferences are checked when set, turned into a CS_REQ proposal when
//! the procedure is enabled, and the receiving side resolves the proposal:
//! hard errors reject, out-of-range values are clamped into their legal
//! range and flagged as a resuggestion.

use lecs_common::model::ACI_ANTENNA_PATHS;
use lecs_common::{Capabilities, CsRole, HciStatus, Phy, PreferredParams, ProcedureParams};

use crate::error::{CsError, Result};

/// Connection events between the proposal and the first procedure
pub const START_LEAD_EVENTS: u16 = 8;

/// Shortest subevent
pub const MIN_SUBEVENT_LEN_US: u32 = 1_250;

/// Longest subevent
pub const MAX_SUBEVENT_LEN_US: u32 = 4_000_000;

/// Subevents in one CS event
pub const MAX_SUBEVENTS_PER_EVENT: u8 = 32;

/// Smallest offset of a CS event from its ACL anchor
pub const MIN_OFFSET_US: u32 = 500;

/// Largest transmit power delta other than the special values
pub const MAX_PWR_DELTA: i8 = 20;

/// Power delta meaning "no preference"
pub const PWR_DELTA_NO_PREFERENCE: i8 = -128;

/// Power delta meaning "use minimum power"
pub const PWR_DELTA_MIN_POWER: i8 = 127;

/// SNR control index meaning "not applied" on the air
pub const SNR_CONTROL_NONE: u8 = 0x0F;

/// SNR control index meaning "not applied" at the HCI
pub const HCI_SNR_CONTROL_NONE: u8 = 0xFF;

/// (initiator, reflector) antenna count for each ACI
const ACI_ANTENNAS: [(u8, u8); 8] = [
    (1, 1),
    (2, 1),
    (3, 1),
    (4, 1),
    (1, 2),
    (1, 3),
    (1, 4),
    (2, 2),
];

/// Antennas each role needs for an ACI
pub fn aci_antennas(aci: u8) -> Option<(u8, u8)> {
    ACI_ANTENNAS.get(usize::from(aci)).copied()
}

/// Number of antenna paths for an ACI
pub fn aci_paths(aci: u8) -> Option<u8> {
    ACI_ANTENNA_PATHS.get(usize::from(aci)).copied()
}

/// True if both controllers have the antennas the ACI needs.
///
/// `local_role` is the local CS role.
pub fn aci_fits(aci: u8, local_role: CsRole, local: &Capabilities, remote: &Capabilities) -> bool {
    let Some((initiator, reflector)) = aci_antennas(aci) else {
        return false;
    };
    let (local_needed, remote_needed) = match local_role {
        CsRole::Initiator => (initiator, reflector),
        CsRole::Reflector => (reflector, initiator),
    };
    local_needed <= local.num_antennas && remote_needed <= remote.num_antennas
}

fn pwr_delta_valid(delta: i8) -> bool {
    delta <= MAX_PWR_DELTA || delta == PWR_DELTA_MIN_POWER
}

fn snr_valid(value: u8, none: u8) -> bool {
    value <= 4 || value == none
}

fn phy_supported(phy: u8, local: &Capabilities, remote: &Capabilities) -> bool {
    Phy::from_u8(phy)
        .map(|p| local.supports_phy(p) && remote.supports_phy(p))
        .unwrap_or(false)
}

/// Checks host procedure parameters.
///
/// `local_role` is the role of the target configuration; `remote` is the
/// peer's clamped capability set.
pub fn validate_preferred(
    params: &PreferredParams,
    local_role: CsRole,
    local: &Capabilities,
    remote: &Capabilities,
) -> Result<()> {
    if params.max_procedure_len == 0 {
        return Err(CsError::invalid("max procedure length"));
    }
    if params.min_procedure_interval == 0
        || params.min_procedure_interval > params.max_procedure_interval
    {
        return Err(CsError::invalid("procedure interval bounds"));
    }
    let len_range = MIN_SUBEVENT_LEN_US..=MAX_SUBEVENT_LEN_US;
    if !len_range.contains(&params.min_subevent_len)
        || !len_range.contains(&params.max_subevent_len)
        || params.min_subevent_len > params.max_subevent_len
    {
        return Err(CsError::invalid("subevent length bounds"));
    }
    if params.preferred_peer_antenna == 0 || params.preferred_peer_antenna > 0x0F {
        return Err(CsError::invalid("preferred peer antenna"));
    }
    if !pwr_delta_valid(params.tx_pwr_delta) {
        return Err(CsError::invalid("tx power delta"));
    }
    if !snr_valid(params.snr_control_initiator, HCI_SNR_CONTROL_NONE)
        || !snr_valid(params.snr_control_reflector, HCI_SNR_CONTROL_NONE)
    {
        return Err(CsError::invalid("snr control"));
    }
    if aci_antennas(params.aci).is_none() {
        return Err(CsError::invalid("aci"));
    }
    if !aci_fits(params.aci, local_role, local, remote) {
        return Err(CsError::unsupported("aci needs more antennas"));
    }
    if Phy::from_u8(params.phy).is_none() {
        return Err(CsError::invalid("phy"));
    }
    if !phy_supported(params.phy, local, remote) {
        return Err(CsError::unsupported("phy"));
    }
    Ok(())
}

fn snr_to_air(value: u8) -> u8 {
    if value == HCI_SNR_CONTROL_NONE {
        SNR_CONTROL_NONE
    } else {
        value
    }
}

/// Builds the CS_REQ proposal from host preferences.
///
/// The first procedure is anchored `START_LEAD_EVENTS` after
/// `current_counter`; the procedure interval is widened to cover the
/// longest procedure when the host bounds allow it.
pub fn propose(
    preferred: &PreferredParams,
    config_id: u8,
    current_counter: u16,
    conn_interval_us: u32,
) -> ProcedureParams {
    let max_len_us = u64::from(preferred.max_procedure_len) * 625;
    let interval = u64::from(conn_interval_us.max(1));
    let needed = max_len_us.div_ceil(interval).max(1);
    let procedure_interval = needed.clamp(
        u64::from(preferred.min_procedure_interval),
        u64::from(preferred.max_procedure_interval.max(preferred.min_procedure_interval)),
    ) as u16;

    ProcedureParams {
        config_id,
        conn_event_counter: current_counter.wrapping_add(START_LEAD_EVENTS),
        offset_min: MIN_OFFSET_US,
        offset_max: conn_interval_us
            .saturating_sub(MIN_OFFSET_US)
            .max(MIN_OFFSET_US),
        offset: MIN_OFFSET_US,
        max_procedure_len: preferred.max_procedure_len,
        event_interval: 1,
        subevents_per_event: 1,
        subevent_interval: 0,
        subevent_len: preferred.max_subevent_len,
        procedure_interval,
        procedure_count: preferred.max_procedure_count,
        aci: preferred.aci,
        preferred_peer_antenna: preferred.preferred_peer_antenna,
        phy: preferred.phy,
        pwr_delta: preferred.tx_pwr_delta,
        snr_control_initiator: snr_to_air(preferred.snr_control_initiator),
        snr_control_reflector: snr_to_air(preferred.snr_control_reflector),
    }
}

/// Outcome of resolving a peer's proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Every value is within range
    Accepted(ProcedureParams),
    /// Some values were clamped
    Resuggested(ProcedureParams),
    /// The proposal cannot be run
    Rejected(HciStatus),
}

impl Resolution {
    /// Final parameters, if not rejected
    pub fn params(&self) -> Option<&ProcedureParams> {
        match self {
            Resolution::Accepted(p) | Resolution::Resuggested(p) => Some(p),
            Resolution::Rejected(_) => None,
        }
    }
}

fn clamp_field<T: PartialEq + Copy>(field: &mut T, value: T, changed: &mut bool) {
    if *field != value {
        *field = value;
        *changed = true;
    }
}

/// Resolves a CS_REQ received from the peer.
///
/// `local_role` is the local CS role in the target configuration. The
/// preferred antenna and SNR controls are never resuggested.
pub fn resolve(
    req: &ProcedureParams,
    local_role: CsRole,
    local: &Capabilities,
    remote: &Capabilities,
) -> Resolution {
    if req.preferred_peer_antenna == 0
        || !snr_valid(req.snr_control_initiator, SNR_CONTROL_NONE)
        || !snr_valid(req.snr_control_reflector, SNR_CONTROL_NONE)
    {
        return Resolution::Rejected(HciStatus::UnsupportedLlParameterValue);
    }
    if req.max_procedure_len == 0 || req.procedure_interval == 0 {
        return Resolution::Rejected(HciStatus::InvalidLlParameters);
    }

    let mut out = *req;
    let mut changed = false;

    let offset_min = req.offset_min.max(MIN_OFFSET_US);
    if offset_min > req.offset_max {
        return Resolution::Rejected(HciStatus::InvalidLlParameters);
    }
    clamp_field(&mut out.offset_min, offset_min, &mut changed);

    clamp_field(&mut out.event_interval, req.event_interval.max(1), &mut changed);
    clamp_field(
        &mut out.subevents_per_event,
        req.subevents_per_event.clamp(1, MAX_SUBEVENTS_PER_EVENT),
        &mut changed,
    );
    clamp_field(
        &mut out.subevent_len,
        req.subevent_len.clamp(MIN_SUBEVENT_LEN_US, MAX_SUBEVENT_LEN_US),
        &mut changed,
    );
    if out.subevents_per_event > 1 {
        let min_interval = out.subevent_len.div_ceil(625);
        let interval = u32::from(out.subevent_interval).max(min_interval);
        let interval = u16::try_from(interval).unwrap_or(u16::MAX);
        clamp_field(&mut out.subevent_interval, interval, &mut changed);
    }
    if !aci_fits(req.aci, local_role, local, remote) {
        clamp_field(&mut out.aci, 0, &mut changed);
    }
    if !phy_supported(req.phy, local, remote) {
        clamp_field(&mut out.phy, Phy::Le1M as u8, &mut changed);
    }
    if !pwr_delta_valid(req.pwr_delta) {
        clamp_field(&mut out.pwr_delta, MAX_PWR_DELTA, &mut changed);
    }

    if changed {
        tracing::debug!(config_id = req.config_id, "Procedure parameters resuggested");
        Resolution::Resuggested(out)
    } else {
        Resolution::Accepted(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(antennas: u8) -> Capabilities {
        Capabilities {
            num_antennas: antennas,
            max_antenna_paths: antennas,
            ..Capabilities::default()
        }
    }

    fn request() -> ProcedureParams {
        propose(&PreferredParams::default(), 0, 10, 30_000)
    }

    #[test]
    fn test_aci_fits() {
        let one = caps(1);
        let two = caps(2);
        assert!(aci_fits(0, CsRole::Initiator, &one, &one));
        assert!(aci_fits(1, CsRole::Initiator, &two, &one));
        assert!(!aci_fits(1, CsRole::Reflector, &two, &one));
        assert!(aci_fits(7, CsRole::Reflector, &two, &two));
        assert!(!aci_fits(8, CsRole::Initiator, &two, &two));
        assert_eq!(aci_paths(7), Some(4));
    }

    #[test]
    fn test_validate_preferred() {
        let c = caps(1);
        let ok = PreferredParams::default();
        assert!(validate_preferred(&ok, CsRole::Initiator, &c, &c).is_ok());

        let bad = [
            PreferredParams { max_procedure_len: 0, ..ok },
            PreferredParams { min_procedure_interval: 11, ..ok },
            PreferredParams { min_subevent_len: 1_000, ..ok },
            PreferredParams { max_subevent_len: 4_000_001, ..ok },
            PreferredParams { preferred_peer_antenna: 0, ..ok },
            PreferredParams { tx_pwr_delta: 21, ..ok },
            PreferredParams { snr_control_initiator: 5, ..ok },
            PreferredParams { phy: 4, ..ok },
        ];
        for params in bad {
            assert_eq!(
                validate_preferred(&params, CsRole::Initiator, &c, &c)
                    .unwrap_err()
                    .status(),
                HciStatus::InvalidHciCommandParameters,
                "{params:?}"
            );
        }

        let two_antennas = PreferredParams { aci: 1, ..ok };
        assert_eq!(
            validate_preferred(&two_antennas, CsRole::Initiator, &c, &c)
                .unwrap_err()
                .status(),
            HciStatus::UnsupportedFeature
        );
        let special = PreferredParams { tx_pwr_delta: 127, ..ok };
        assert!(validate_preferred(&special, CsRole::Initiator, &c, &c).is_ok());
    }

    #[test]
    fn test_propose() {
        let pref = PreferredParams {
            max_procedure_len: 160,
            min_procedure_interval: 2,
            max_procedure_interval: 20,
            snr_control_reflector: 3,
            ..PreferredParams::default()
        };
        let req = propose(&pref, 2, 100, 30_000);
        assert_eq!(req.config_id, 2);
        assert_eq!(req.conn_event_counter, 108);
        assert_eq!(req.offset_min, 500);
        assert_eq!(req.offset_max, 29_500);
        // 160 * 625 us spans four 30 ms connection events
        assert_eq!(req.procedure_interval, 4);
        assert_eq!(req.subevent_len, pref.max_subevent_len);
        assert_eq!(req.snr_control_initiator, SNR_CONTROL_NONE);
        assert_eq!(req.snr_control_reflector, 3);

        let wrapped = propose(&pref, 0, u16::MAX - 2, 30_000);
        assert_eq!(wrapped.conn_event_counter, 5);
    }

    #[test]
    fn test_resolve_accepts_proposal() {
        let c = caps(1);
        let req = request();
        assert_eq!(
            resolve(&req, CsRole::Reflector, &c, &c),
            Resolution::Accepted(req)
        );
    }

    #[test]
    fn test_resolve_hard_rejects() {
        let c = caps(1);
        let no_antenna = ProcedureParams { preferred_peer_antenna: 0, ..request() };
        assert_eq!(
            resolve(&no_antenna, CsRole::Reflector, &c, &c),
            Resolution::Rejected(HciStatus::UnsupportedLlParameterValue)
        );
        let bad_snr = ProcedureParams { snr_control_initiator: 7, ..request() };
        assert!(matches!(
            resolve(&bad_snr, CsRole::Reflector, &c, &c),
            Resolution::Rejected(_)
        ));
        let inverted = ProcedureParams { offset_min: 9_000, offset_max: 800, ..request() };
        assert_eq!(
            resolve(&inverted, CsRole::Reflector, &c, &c),
            Resolution::Rejected(HciStatus::InvalidLlParameters)
        );
    }

    #[test]
    fn test_resolve_clamps() {
        let c = caps(1);
        let req = ProcedureParams {
            event_interval: 0,
            subevents_per_event: 40,
            subevent_len: 100,
            aci: 3,
            phy: 3,
            pwr_delta: 50,
            ..request()
        };
        let Resolution::Resuggested(out) = resolve(&req, CsRole::Reflector, &c, &c) else {
            panic!("expected resuggestion");
        };
        assert_eq!(out.event_interval, 1);
        assert_eq!(out.subevents_per_event, 32);
        assert_eq!(out.subevent_len, 1_250);
        assert_eq!(out.subevent_interval, 2);
        assert_eq!(out.aci, 0);
        assert_eq!(out.phy, 1);
        assert_eq!(out.pwr_delta, 20);
        assert_eq!(out.preferred_peer_antenna, req.preferred_peer_antenna);
    }

    #[test]
    fn test_resolve_raises_small_offset() {
        let c = caps(1);
        let req = ProcedureParams { offset_min: 100, ..request() };
        let res = resolve(&req, CsRole::Initiator, &c, &c);
        assert!(matches!(res, Resolution::Resuggested(_)));
        assert_eq!(res.params().map(|p| p.offset_min), Some(500));
    }
}
