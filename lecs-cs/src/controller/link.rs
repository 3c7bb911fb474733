//! Per-connection CS record
//!
//! One [`Link`] per ACL connection, stored in the controller's arena. The
//! scheduler only ever sees the arena index as an item owner.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, info, warn};

use lecs_common::logging::{log_pdu, Direction};
use lecs_common::{
    Capabilities, ChannelMap, ConnHandle, ConnTiming, ControllerConfig, DefaultSettings, FaeTable,
    HciStatus, LlTime, ProcedureParams, Role,
};
use lecs_crypto::DrbgContext;
use lecs_pdu::hci::{
    AbortReasons, ConfigComplete, DoneStatus, HciEvent, ProcedureAbortReason,
    ProcedureEnableComplete, SubeventAbortReason, SubeventResult,
};
use lecs_pdu::{ChannelMapInd, ControlPdu, Opcode};
use lecs_sched::{ItemId, ItemKind, PreemptPolicy, SchedItem, Scheduler};

use crate::capabilities::switch_time_us;
use crate::config::ConfigStore;
use crate::error::{CsError, Result};
use crate::generator::{Generator, Layout};
use crate::negotiation::{is_retryable, CsState, Pending, PendingKind};
use crate::procedure::Series;
use crate::results::FREQ_COMPENSATION_UNAVAILABLE;
use crate::step::StepTiming;

/// Queued output towards the host and the peer
#[derive(Debug, Default)]
pub(crate) struct Outputs {
    pub events: VecDeque<HciEvent>,
    pub pdus: VecDeque<(ConnHandle, Bytes)>,
}

impl Outputs {
    pub fn send(&mut self, handle: ConnHandle, pdu: ControlPdu) {
        let bytes = lecs_pdu::encode(&pdu);
        log_pdu(Direction::Tx, pdu.name(), &bytes);
        self.pdus.push_back((handle, bytes));
    }

    pub fn event(&mut self, event: HciEvent) {
        debug!(event = event.name(), status = ?event.status(), "Queued HCI event");
        self.events.push_back(event);
    }
}

/// Builds a procedure enable complete event
pub(crate) fn enable_complete(
    handle: ConnHandle,
    status: HciStatus,
    config_id: u8,
    state: u8,
    params: Option<&ProcedureParams>,
    tx_power: i8,
) -> HciEvent {
    let mut event = ProcedureEnableComplete {
        status,
        handle,
        config_id,
        state,
        ..ProcedureEnableComplete::default()
    };
    if let Some(p) = params {
        event.aci = p.aci;
        event.selected_tx_power = tx_power;
        event.subevent_len = p.subevent_len;
        event.subevents_per_event = p.subevents_per_event;
        event.subevent_interval = p.subevent_interval;
        event.event_interval = p.event_interval;
        event.procedure_interval = p.procedure_interval;
        event.procedure_count = p.procedure_count;
        event.max_procedure_len = p.max_procedure_len;
    }
    HciEvent::ProcedureEnableComplete(event)
}

/// Next subevent of the running series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Scheduled {
    /// Subevent start
    pub start: LlTime,
    /// ACL event the CS event is anchored to
    pub acl_counter: u16,
    /// Scheduler reservation; `None` when no radio time could be reserved
    pub item: Option<ItemId>,
}

/// True once `counter` has reached `instant`
pub(crate) fn instant_reached(counter: u16, instant: u16) -> bool {
    (counter.wrapping_sub(instant) as i16) >= 0
}

#[derive(Debug)]
pub(crate) struct Link {
    pub handle: ConnHandle,
    pub role: Role,
    pub timing: ConnTiming,
    pub counter: u16,
    pub remote_caps: Option<Capabilities>,
    pub remote_fae: Option<FaeTable>,
    pub settings: DefaultSettings,
    pub drbg: Option<DrbgContext>,
    pub configs: ConfigStore,
    pub pending: Option<Pending>,
    /// Request dropped in a collision; the peer's reject of it is expected
    pub yielded: Option<Opcode>,
    pub series: Option<Series>,
    pub scheduled: Option<Scheduled>,
    /// Local termination requested; no further subevents are scheduled
    pub terminating: bool,
    /// Procedure enable to retry at the next connection event: (config, retries left)
    pub retry_start: Option<(u8, u8)>,
    pub classification: ChannelMap,
    pub map_update: Option<ChannelMapInd>,
    /// Central only: host classification not yet announced to the peer
    pub announce_map: bool,
}

impl Link {
    pub fn new(handle: ConnHandle, role: Role, timing: ConnTiming) -> Self {
        Self {
            handle,
            role,
            timing,
            counter: timing.ref_counter,
            remote_caps: None,
            remote_fae: None,
            settings: DefaultSettings::default(),
            drbg: None,
            configs: ConfigStore::new(),
            pending: None,
            yielded: None,
            series: None,
            scheduled: None,
            terminating: false,
            retry_start: None,
            classification: ChannelMap::all_usable(),
            map_update: None,
            announce_map: false,
        }
    }

    pub fn state(&self) -> CsState {
        match (&self.pending, &self.series) {
            (Some(p), _) if matches!(p.kind, PendingKind::Terminate { .. }) => CsState::TerminatePending,
            (_, Some(_)) => CsState::ActiveMeasurement,
            (Some(p), None) => p.kind.state(),
            (None, None) if self.configs.iter().any(|s| s.preferred.is_some()) => {
                CsState::ProcedureParamsPending
            }
            (None, None) => CsState::Idle,
        }
    }

    pub fn send(&self, out: &mut Outputs, pdu: ControlPdu) {
        out.send(self.handle, pdu);
    }

    /// Sends a request and records it as pending
    pub fn request(&mut self, out: &mut Outputs, pdu: ControlPdu, kind: PendingKind, now: LlTime) {
        debug!(handle = self.handle.0, from = %self.state(), request = pdu.name(), "Request sent");
        self.send(out, pdu);
        self.pending = Some(Pending::new(kind, now));
    }

    /// Takes the pending request if `opcode` answers it
    pub fn take_pending_for(&mut self, response: Opcode) -> Option<Pending> {
        let matches = self
            .pending
            .as_ref()
            .map(|p| p.kind.response_opcode(self.role) == response)
            .unwrap_or(false);
        if matches {
            self.pending.take()
        } else {
            None
        }
    }

    /// Reports the failure of a pending request.
    ///
    /// A rejected procedure enable is retried at the next connection event
    /// while retries remain and the status allows it.
    pub fn fail_pending(&mut self, out: &mut Outputs, pending: Pending, status: HciStatus, allow_retry: bool) {
        warn!(
            handle = self.handle.0,
            request = %pending.kind.request_opcode(),
            %status,
            "Request failed"
        );
        let handle = self.handle;
        match pending.kind {
            PendingKind::Capabilities { host } => {
                if host {
                    out.event(HciEvent::RemoteCapabilitiesComplete {
                        status,
                        handle,
                        caps: Capabilities::default(),
                    });
                }
            }
            PendingKind::FaeTable => out.event(HciEvent::RemoteFaeTableComplete {
                status,
                handle,
                table: FaeTable::default(),
            }),
            PendingKind::Security { .. } => {
                out.event(HciEvent::SecurityEnableComplete { status, handle })
            }
            PendingKind::Config { spec, action } => {
                out.event(HciEvent::ConfigComplete(ConfigComplete {
                    status,
                    handle,
                    action,
                    spec,
                }));
            }
            PendingKind::Start { params, retries_left } => {
                if allow_retry && retries_left > 0 && is_retryable(status) {
                    debug!(handle = handle.0, retries_left, "Procedure enable will be retried");
                    self.retry_start = Some((params.config_id, retries_left - 1));
                } else {
                    out.event(enable_complete(handle, status, params.config_id, 0, None, 0));
                }
            }
            PendingKind::Terminate { config_id, .. } => {
                out.event(enable_complete(handle, status, config_id, 0, None, 0));
            }
        }
    }

    /// Starts the procedure series for negotiated parameters and reports
    /// the enable completion.
    pub fn activate(
        &mut self,
        out: &mut Outputs,
        sched: &mut Scheduler,
        config: &ControllerConfig,
        params: ProcedureParams,
        owner: u32,
    ) -> Result<()> {
        let remote = self
            .remote_caps
            .ok_or(CsError::disallowed("remote capabilities unknown"))?;
        if self.drbg.is_none() {
            return Err(CsError::disallowed("security not enabled"));
        }
        let slot = self
            .configs
            .get(params.config_id)
            .ok_or(CsError::disallowed("configuration not enabled"))?;
        let spec = slot.spec;
        let first_step = slot.step_count;

        let antenna_paths = params.antenna_paths();
        let t_sw = switch_time_us(&config.capabilities, &remote);
        let timing = StepTiming::new(&spec, t_sw, antenna_paths)?;
        let layout = Layout::from_params(&params, self.timing.interval_us);
        let generator = Generator::new(
            &spec,
            layout,
            timing,
            antenna_paths,
            &self.classification,
            first_step,
        )?;

        if let Some(slot) = self.configs.get_mut(params.config_id) {
            slot.in_use = true;
        }
        self.series = Some(Series::new(params.config_id, spec.role, params, generator));
        self.terminating = false;
        self.schedule_next(sched, config.cs_priority, owner, LlTime::ZERO);

        info!(
            handle = self.handle.0,
            config_id = params.config_id,
            role = ?spec.role,
            first_event = params.conn_event_counter,
            "Procedures enabled"
        );
        out.event(enable_complete(
            self.handle,
            HciStatus::Success,
            params.config_id,
            1,
            Some(&params),
            self.settings.max_tx_power,
        ));
        Ok(())
    }

    /// Reserves radio time for the subevent the generator produces next
    pub fn schedule_next(&mut self, sched: &mut Scheduler, priority: u8, owner: u32, not_before: LlTime) {
        let Some(series) = self.series.as_mut() else {
            return;
        };
        let (start, acl_counter) = series.next_start(&self.timing, not_before);
        let len = u64::from(series.generator.layout().subevent_len_us);
        let item = SchedItem::new(ItemKind::ChannelSounding, start, len)
            .with_priority(priority)
            .with_owner(owner);
        let id = match sched.insert(item, 0, PreemptPolicy::Never) {
            Ok(insertion) => Some(insertion.id),
            Err(e) => {
                debug!(handle = self.handle.0, %start, "Subevent not scheduled: {e}");
                None
            }
        };
        self.scheduled = Some(Scheduled {
            start,
            acl_counter,
            item: id,
        });
    }

    /// Drops the scheduled subevent, if any
    pub fn unschedule(&mut self, sched: &mut Scheduler) {
        if let Some(Scheduled { item: Some(id), .. }) = self.scheduled.take() {
            sched.remove(id);
        }
    }

    /// Ends the series and stores the reconciled step count.
    ///
    /// Returns the configuration the series ran.
    pub fn finish_series(&mut self, sched: &mut Scheduler, step_count: u16) -> Option<u8> {
        let series = self.series.take()?;
        self.unschedule(sched);
        self.terminating = false;
        if let Some(slot) = self.configs.get_mut(series.config_id) {
            slot.in_use = false;
            slot.step_count = step_count;
        }
        if let Some(drbg) = self.drbg.as_mut() {
            if let Err(e) = drbg.backtracking_resistance() {
                warn!(handle = self.handle.0, "Backtracking resistance failed: {e}");
            }
        }
        debug!(handle = self.handle.0, config_id = series.config_id, step_count, "Series ended");
        Some(series.config_id)
    }

    /// Step counter of the running series
    pub fn series_steps(&self) -> Option<u16> {
        self.series.as_ref().map(|s| s.generator.step_counter())
    }

    /// Stops the series on a local error and tells the host why
    pub fn abort_series(
        &mut self,
        out: &mut Outputs,
        sched: &mut Scheduler,
        reason: ProcedureAbortReason,
        status: HciStatus,
        reference_power_level: i8,
    ) {
        let Some(series) = self.series.as_ref() else {
            return;
        };
        let acl_counter = self.scheduled.map(|s| s.acl_counter).unwrap_or(self.counter);
        out.event(HciEvent::SubeventResult(SubeventResult {
            handle: self.handle,
            config_id: series.config_id,
            start_acl_conn_event: acl_counter,
            procedure_counter: series.generator.procedure_counter(),
            frequency_compensation: FREQ_COMPENSATION_UNAVAILABLE,
            reference_power_level,
            procedure_done: DoneStatus::Aborted,
            subevent_done: DoneStatus::Aborted,
            abort: AbortReasons {
                procedure: reason,
                subevent: SubeventAbortReason::None,
            },
            num_antenna_paths: series.params.antenna_paths(),
            steps: Vec::new(),
        }));
        warn!(handle = self.handle.0, ?reason, "Procedure series aborted");
        let steps = series.generator.step_counter();
        if let Some(config_id) = self.finish_series(sched, steps) {
            out.event(enable_complete(self.handle, status, config_id, 0, None, 0));
        }
    }

    /// Applies a channel map update once the ACL counter reaches its instant
    pub fn apply_map_if_due(
        &mut self,
        out: &mut Outputs,
        sched: &mut Scheduler,
        counter: u16,
        reference_power_level: i8,
    ) {
        let Some(update) = self.map_update else {
            return;
        };
        if !instant_reached(counter, update.instant) {
            return;
        }
        self.map_update = None;
        self.classification = update.map;
        debug!(handle = self.handle.0, instant = update.instant, channels = update.map.count(), "Channel map applied");
        let failed = match self.series.as_mut() {
            Some(series) => series.generator.set_classification(&update.map).is_err(),
            None => false,
        };
        if failed {
            self.abort_series(
                out,
                sched,
                ProcedureAbortReason::InsufficientChannels,
                HciStatus::InsufficientChannels,
                reference_power_level,
            );
        }
    }
}
