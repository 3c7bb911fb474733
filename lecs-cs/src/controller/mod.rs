//! CS controller
//!
//! [`CsController`] is the sans-IO link-layer engine for every connection of
//! one controller. The embedding stack drives it and drains its outputs:
//!
//! | Input | Entry point |
//! |-------|-------------|
//! | host command | [`CsController::host_command`], [`CsController::host_packet`] |
//! | control PDU from the peer | [`CsController::on_pdu`] |
//! | ACL connection event | [`CsController::conn_event`] |
//! | time | [`CsController::on_tick`] |
//!
//! | Output | Drained with |
//! |--------|--------------|
//! | HCI events | [`CsController::poll_event`], [`CsController::poll_event_packet`] |
//! | control PDUs | [`CsController::poll_pdu`] |
//!
//! Connections live in an arena; the arena index is the owner key of every
//! CS reservation in the scheduler.

mod host;
mod link;
mod peer;
mod series;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info, warn};

use lecs_common::logging::{log_hci, Direction};
use lecs_common::{
    Capabilities, ChannelMap, ConnHandle, ConnTiming, ControllerConfig, LlTime, Role,
};
use lecs_crypto::DrbgContext;
use lecs_pdu::hci::{encode_event, HciEvent};
use lecs_sched::{Insertion, ItemKind, PreemptPolicy, SchedItem, Scheduler};

use crate::config::ConfigSlot;
use crate::error::{CsError, Result};
use crate::negotiation::CsState;
use crate::radio::CsRadio;

use link::{Link, Outputs};

/// ACL events between a channel map update and its instant
pub const MAP_UPDATE_LEAD_EVENTS: u16 = 6;

/// Borrowed controller state handed to per-link handlers next to the link
pub(crate) struct Env<'a, G> {
    pub config: &'a ControllerConfig,
    pub rng: &'a mut G,
    pub sched: &'a mut Scheduler,
    pub out: &'a mut Outputs,
    pub classification: &'a mut ChannelMap,
}

/// Channel Sounding link-layer controller
pub struct CsController<R: CsRadio, G: RngCore = StdRng> {
    config: ControllerConfig,
    radio: R,
    rng: G,
    links: Vec<Option<Link>>,
    sched: Scheduler,
    out: Outputs,
    classification: ChannelMap,
}

impl<R: CsRadio> CsController<R, StdRng> {
    /// Creates a controller drawing security vectors from OS entropy
    pub fn new(config: ControllerConfig, radio: R) -> Self {
        Self::with_rng(config, radio, StdRng::from_entropy())
    }
}

impl<R: CsRadio, G: RngCore> CsController<R, G> {
    /// Creates a controller with an explicit random source
    pub fn with_rng(config: ControllerConfig, radio: R, rng: G) -> Self {
        let classification = config.channel_classification;
        info!(
            antennas = config.capabilities.num_antennas,
            configs = config.capabilities.num_configs,
            roles = config.capabilities.roles,
            "CS controller created"
        );
        Self {
            config,
            radio,
            rng,
            links: Vec::new(),
            sched: Scheduler::new(),
            out: Outputs::default(),
            classification,
        }
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Registers a new ACL connection.
    ///
    /// `timing` is the connection's interval and a reference anchor.
    pub fn connection_created(&mut self, handle: ConnHandle, role: Role, timing: ConnTiming) -> Result<()> {
        if self.index_of(handle).is_some() {
            return Err(CsError::disallowed("connection already known"));
        }
        let mut link = Link::new(handle, role, timing);
        if role == Role::Central && self.classification != ChannelMap::all_usable() {
            link.announce_map = true;
        }
        match self.links.iter().position(Option::is_none) {
            Some(idx) => self.links[idx] = Some(link),
            None => self.links.push(Some(link)),
        }
        info!(handle = handle.0, %role, interval_us = timing.interval_us, "Connection added");
        Ok(())
    }

    /// Drops all CS state of a connection
    pub fn connection_closed(&mut self, handle: ConnHandle) {
        let Some(idx) = self.index_of(handle) else {
            return;
        };
        self.sched.remove_owned(ItemKind::ChannelSounding, idx as u32);
        self.links[idx] = None;
        info!(handle = handle.0, "Connection removed");
    }

    /// Reports an ACL connection event.
    ///
    /// Refreshes the anchor reference, sends a pending channel map
    /// announcement, applies a due map update when no procedure runs and
    /// retries a collided procedure enable.
    pub fn conn_event(&mut self, handle: ConnHandle, counter: u16, anchor: LlTime) -> Result<()> {
        let (_, link, env) = self.parts(handle)?;
        link.timing.observe(counter, anchor);
        link.counter = counter;

        if link.announce_map {
            link.announce_map = false;
            host::announce_map(link, env.out, *env.classification);
        }
        if link.series.is_none() {
            link.apply_map_if_due(env.out, env.sched, counter, env.config.reference_power_level);
        }
        if let Some((config_id, retries_left)) = link.retry_start.take() {
            debug!(handle = handle.0, config_id, retries_left, "Retrying procedure enable");
            if let Err(e) = host::begin_enable(link, env.out, config_id, retries_left, anchor) {
                env.out.event(link::enable_complete(handle, e.status(), config_id, 0, None, 0));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// Next queued HCI event
    pub fn poll_event(&mut self) -> Option<HciEvent> {
        self.out.events.pop_front()
    }

    /// Next queued HCI event, encoded
    pub fn poll_event_packet(&mut self) -> Option<Bytes> {
        let event = self.out.events.pop_front()?;
        let bytes = encode_event(&event);
        log_hci(Direction::Tx, event.name(), &bytes);
        Some(bytes)
    }

    /// Next control PDU to send, with its connection
    pub fn poll_pdu(&mut self) -> Option<(ConnHandle, Bytes)> {
        self.out.pdus.pop_front()
    }

    /// Earliest time [`CsController::on_tick`] has work to do
    pub fn next_wakeup(&self) -> Option<LlTime> {
        let timeout_us = self.config.response_timeout_ms * 1_000;
        let links = self.links.iter().flatten();
        let conflicted = links
            .clone()
            .filter_map(|l| l.scheduled.filter(|s| s.item.is_none()).map(|s| s.start));
        let timeouts = links.filter_map(|l| l.pending.as_ref().map(|p| p.sent_at.advanced_by(timeout_us)));
        self.sched
            .next_wakeup()
            .into_iter()
            .chain(conflicted)
            .chain(timeouts)
            .min()
    }

    // ========================================================================
    // Scheduler sharing
    // ========================================================================

    /// Reserves radio time for another link-layer activity.
    ///
    /// CS subevents evicted by the reservation still run their generator at
    /// their start time but skip the radio and report a scheduling conflict.
    pub fn reserve_external(
        &mut self,
        item: SchedItem,
        max_delay_us: u64,
        policy: PreemptPolicy,
    ) -> Result<Insertion> {
        let insertion = self.sched.insert(item, max_delay_us, policy)?;
        for (id, victim) in &insertion.preempted {
            if victim.kind != ItemKind::ChannelSounding {
                continue;
            }
            let link = self
                .links
                .get_mut(victim.owner as usize)
                .and_then(Option::as_mut);
            if let Some(scheduled) = link.and_then(|l| l.scheduled.as_mut()) {
                if scheduled.item == Some(*id) {
                    warn!(owner = victim.owner, start = %victim.start, by = %item.kind, "CS subevent preempted");
                    scheduled.item = None;
                }
            }
        }
        Ok(insertion)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Negotiation state of a connection
    pub fn state(&self, handle: ConnHandle) -> Option<CsState> {
        self.link(handle).map(Link::state)
    }

    /// Clamped remote capabilities, once known
    pub fn remote_capabilities(&self, handle: ConnHandle) -> Option<Capabilities> {
        self.link(handle).and_then(|l| l.remote_caps)
    }

    /// Stored configuration
    pub fn config_slot(&self, handle: ConnHandle, config_id: u8) -> Option<&ConfigSlot> {
        self.link(handle).and_then(|l| l.configs.get(config_id))
    }

    /// DRBG of a connection, once security is enabled
    pub fn drbg(&self, handle: ConnHandle) -> Option<&DrbgContext> {
        self.link(handle).and_then(|l| l.drbg.as_ref())
    }

    /// DRBG step counter of a configuration: the running series' counter,
    /// or the count the next series starts from
    pub fn step_counter(&self, handle: ConnHandle, config_id: u8) -> Option<u16> {
        let link = self.link(handle)?;
        match &link.series {
            Some(series) if series.config_id == config_id => Some(series.generator.step_counter()),
            _ => link.configs.get(config_id).map(|slot| slot.step_count),
        }
    }

    /// Controller configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Host channel classification
    pub fn channel_classification(&self) -> &ChannelMap {
        &self.classification
    }

    /// Radio driver
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Mutable radio driver
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Scheduler shared with other activities
    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn index_of(&self, handle: ConnHandle) -> Option<usize> {
        self.links
            .iter()
            .position(|l| l.as_ref().map(|l| l.handle == handle).unwrap_or(false))
    }

    fn link(&self, handle: ConnHandle) -> Option<&Link> {
        self.links.iter().flatten().find(|l| l.handle == handle)
    }

    /// Splits the controller into one link and the shared state
    fn parts(&mut self, handle: ConnHandle) -> Result<(u32, &mut Link, Env<'_, G>)> {
        let idx = self
            .index_of(handle)
            .ok_or(CsError::UnknownConnection(handle.0))?;
        let Self {
            config,
            rng,
            links,
            sched,
            out,
            classification,
            ..
        } = self;
        let link = links
            .get_mut(idx)
            .and_then(Option::as_mut)
            .ok_or(CsError::UnknownConnection(handle.0))?;
        let env = Env {
            config,
            rng,
            sched,
            out,
            classification,
        };
        Ok((idx as u32, link, env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{SlotOutcome, SlotRequest};
    use rand::rngs::mock::StepRng;

    struct NullRadio;

    impl CsRadio for NullRadio {
        fn run_slot(&mut self, _request: &SlotRequest<'_>) -> SlotOutcome {
            SlotOutcome::Completed(Default::default())
        }
    }

    fn controller() -> CsController<NullRadio, StepRng> {
        CsController::with_rng(ControllerConfig::default(), NullRadio, StepRng::new(1, 1))
    }

    fn timing() -> ConnTiming {
        ConnTiming::from_units(24, 0, LlTime::ZERO)
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut c = controller();
        c.connection_created(ConnHandle(1), Role::Central, timing()).unwrap();
        assert!(c.connection_created(ConnHandle(1), Role::Central, timing()).is_err());
        assert_eq!(c.state(ConnHandle(1)), Some(CsState::Idle));

        c.connection_closed(ConnHandle(1));
        assert_eq!(c.state(ConnHandle(1)), None);
        // Slot is reused
        c.connection_created(ConnHandle(2), Role::Peripheral, timing()).unwrap();
        assert_eq!(c.links.len(), 1);
    }

    #[test]
    fn test_unknown_connection() {
        let mut c = controller();
        let err = c.conn_event(ConnHandle(9), 0, LlTime::ZERO).unwrap_err();
        assert_eq!(err.status(), lecs_common::HciStatus::UnknownConnectionId);
        assert!(c.on_pdu(ConnHandle(9), &[0x2C], LlTime::ZERO).is_err());
    }

    #[test]
    fn test_central_announces_initial_classification() {
        let mut config = ControllerConfig::default();
        config.channel_classification.set(40, false);
        let mut c = CsController::with_rng(config, NullRadio, StepRng::new(1, 1));
        c.connection_created(ConnHandle(1), Role::Central, timing()).unwrap();
        assert!(c.poll_pdu().is_none());

        c.conn_event(ConnHandle(1), 3, LlTime::from_millis(90)).unwrap();
        let (handle, pdu) = c.poll_pdu().unwrap();
        assert_eq!(handle, ConnHandle(1));
        let lecs_pdu::ControlPdu::CsChannelMapInd(ind) = lecs_pdu::decode(&pdu).unwrap() else {
            panic!("expected channel map indication");
        };
        assert_eq!(ind.instant, 3 + MAP_UPDATE_LEAD_EVENTS);
        assert!(!ind.map.is_set(40));
        assert!(c.poll_pdu().is_none());
    }

    #[test]
    fn test_next_wakeup_tracks_pending_timeout() {
        let mut c = controller();
        c.connection_created(ConnHandle(1), Role::Central, timing()).unwrap();
        assert_eq!(c.next_wakeup(), None);
        let cmd = lecs_pdu::hci::HciCommand::ReadRemoteFaeTable { handle: ConnHandle(1) };
        c.host_command(&cmd, LlTime::from_millis(5));
        assert_eq!(c.next_wakeup(), Some(LlTime::from_millis(40_005)));
    }
}
