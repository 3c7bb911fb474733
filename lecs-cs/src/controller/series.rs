//! Procedure execution
//!
//! Each running series keeps exactly one subevent reserved in the
//! scheduler. When the reservation comes due the generator produces the
//! subevent, the radio runs it, the results go to the host and the next
//! subevent is reserved. A subevent that lost its reservation still
//! consumes its generator output so both DRBGs stay aligned, and is
//! reported as a scheduling conflict.

use rand::RngCore;
use tracing::{debug, info, warn};

use lecs_common::{CsRole, HciStatus, LlTime};
use lecs_pdu::hci::{AbortReasons, DoneStatus, ProcedureAbortReason, SubeventAbortReason};
use lecs_sched::{ItemKind, ItemOutcome};

use super::CsController;
use crate::error::CsError;
use crate::generator::Boundary;
use crate::negotiation::PendingKind;
use crate::procedure::{run_subevent, SubeventRun};
use crate::radio::CsRadio;
use crate::results::{batch_subevent, ResultHeader, FREQ_COMPENSATION_UNAVAILABLE};

/// Done statuses and abort reasons reported for one subevent
fn completion(boundary: Boundary, abort: Option<SubeventAbortReason>) -> (DoneStatus, DoneStatus, AbortReasons) {
    let sync_lost = abort == Some(SubeventAbortReason::NoCsSync);
    let procedure_done = if sync_lost {
        DoneStatus::Aborted
    } else if boundary.ends_procedure() {
        DoneStatus::Complete
    } else {
        DoneStatus::Partial
    };
    let subevent_done = if abort.is_some() {
        DoneStatus::Aborted
    } else {
        DoneStatus::Complete
    };
    let reasons = AbortReasons {
        procedure: if sync_lost {
            ProcedureAbortReason::Unspecified
        } else {
            ProcedureAbortReason::None
        },
        subevent: abort.unwrap_or_default(),
    };
    (procedure_done, subevent_done, reasons)
}

impl<R: CsRadio, G: RngCore> CsController<R, G> {
    /// Advances the controller to `now`.
    ///
    /// Fails requests whose response timed out, then runs every subevent
    /// due by `now` in start order.
    pub fn on_tick(&mut self, now: LlTime) {
        self.check_timeouts(now);

        loop {
            let mut due = None;
            self.sched.dispatch(now, |id, item| {
                if due.is_none() && item.kind == ItemKind::ChannelSounding {
                    due = Some((id, item.owner));
                    ItemOutcome::Running
                } else {
                    ItemOutcome::Done
                }
            });
            self.sched.finish_running();

            if let Some((id, owner)) = due {
                let idx = owner as usize;
                let current = self
                    .links
                    .get(idx)
                    .and_then(Option::as_ref)
                    .and_then(|l| l.scheduled)
                    .map(|s| s.item == Some(id))
                    .unwrap_or(false);
                if current {
                    self.run_due(idx, false, now);
                } else {
                    debug!(owner, "Stale CS reservation dropped");
                }
                continue;
            }

            let conflicted = self.links.iter().position(|l| {
                l.as_ref()
                    .and_then(|l| l.scheduled)
                    .map(|s| s.item.is_none() && s.start <= now)
                    .unwrap_or(false)
            });
            match conflicted {
                Some(idx) => self.run_due(idx, true, now),
                None => break,
            }
        }
    }

    fn check_timeouts(&mut self, now: LlTime) {
        let timeout_us = self.config.response_timeout_ms * 1_000;
        for link in self.links.iter_mut().flatten() {
            let expired = link
                .pending
                .as_ref()
                .map(|p| p.timed_out(now, timeout_us))
                .unwrap_or(false);
            if !expired {
                continue;
            }
            let Some(pending) = link.pending.take() else {
                continue;
            };
            if let PendingKind::Terminate { step_count, .. } = pending.kind {
                let steps = link.series_steps().unwrap_or(step_count);
                link.finish_series(&mut self.sched, steps);
            }
            link.fail_pending(&mut self.out, pending, HciStatus::LlResponseTimeout, false);
        }
    }

    /// Runs the scheduled subevent of one link and reserves the next one
    fn run_due(&mut self, idx: usize, conflicted: bool, now: LlTime) {
        let Self {
            config,
            radio,
            links,
            sched,
            out,
            ..
        } = self;
        let Some(link) = links.get_mut(idx).and_then(Option::as_mut) else {
            return;
        };
        let Some(scheduled) = link.scheduled.take() else {
            return;
        };
        let ref_power = config.reference_power_level;
        link.apply_map_if_due(out, sched, scheduled.acl_counter, ref_power);

        let plan = match (link.series.as_mut(), link.drbg.as_mut()) {
            (None, _) => return,
            (Some(series), Some(drbg)) => series.generator.next_subevent(drbg),
            (Some(_), None) => Err(CsError::disallowed("security not enabled")),
        };
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                warn!(handle = link.handle.0, "Subevent generation failed: {e}");
                link.abort_series(out, sched, ProcedureAbortReason::Unspecified, e.status(), ref_power);
                return;
            }
        };
        let Some(series) = link.series.as_ref() else {
            return;
        };
        let antenna_paths = series.params.antenna_paths();

        let run = if conflicted {
            debug!(handle = link.handle.0, start = %scheduled.start, "Subevent skipped, no radio time");
            SubeventRun {
                results: Vec::new(),
                abort: Some(SubeventAbortReason::SchedulingConflict),
                slots: 0,
                end: scheduled.start,
            }
        } else {
            run_subevent(
                radio,
                link.handle,
                series.role,
                &plan.steps,
                series.generator.timing(),
                antenna_paths,
                scheduled.start,
            )
        };

        let header = ResultHeader {
            handle: link.handle,
            config_id: series.config_id,
            start_acl_conn_event: scheduled.acl_counter,
            procedure_counter: plan.procedure_counter,
            frequency_compensation: match series.role {
                CsRole::Initiator => 0,
                CsRole::Reflector => FREQ_COMPENSATION_UNAVAILABLE,
            },
            reference_power_level: ref_power,
            num_antenna_paths: antenna_paths,
        };
        let (procedure_done, subevent_done, abort) = completion(plan.boundary, run.abort);
        let events = batch_subevent(
            &header,
            run.results,
            procedure_done,
            subevent_done,
            abort,
            config.max_event_payload,
        );
        for event in events {
            out.event(event);
        }

        let sync_lost = run.abort == Some(SubeventAbortReason::NoCsSync);
        let mut boundary = plan.boundary;
        if sync_lost && !boundary.ends_procedure() {
            let skipped = match (link.series.as_mut(), link.drbg.as_mut()) {
                (Some(series), Some(drbg)) => series.generator.skip_procedure(drbg),
                _ => Err(CsError::disallowed("security not enabled")),
            };
            match skipped {
                Ok(b) => boundary = b,
                Err(e) => {
                    warn!(handle = link.handle.0, "Procedure skip failed: {e}");
                    link.abort_series(out, sched, ProcedureAbortReason::Unspecified, e.status(), ref_power);
                    return;
                }
            }
        }

        if boundary == Boundary::SeriesComplete {
            let steps = link.series_steps().unwrap_or_default();
            if let Some(config_id) = link.finish_series(sched, steps) {
                info!(handle = link.handle.0, config_id, steps, "All procedures complete");
            }
            return;
        }
        if !link.terminating {
            let not_before = if sync_lost { now.max(run.end) } else { run.end };
            link.schedule_next(sched, config.cs_priority, idx as u32, not_before);
        }
    }
}
