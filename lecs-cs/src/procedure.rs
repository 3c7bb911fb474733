//! Procedure execution
//!
//! A subevent runs as a trampoline: the [`SlotWalker`] yields one slot
//! request at a time and is resumed with the slot's outcome until every
//! step has been walked or synchronization is lost.
//!
//! [`Series`] places the generated subevents on the ACL event grid.

use lecs_common::{ConnHandle, ConnTiming, CsRole, LlTime, ProcedureParams};
use lecs_pdu::hci::{StepResult, SubeventAbortReason};

use crate::generator::Generator;
use crate::radio::{CsRadio, SlotOutcome, SlotReport, SlotRequest, ToneSample};
use crate::results::pack_step;
use crate::step::{SlotKind, Step, StepTiming};

/// What the walker does after a slot completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    /// Another slot follows
    Continue,
    /// Every step of the subevent ran
    Finished,
    /// The subevent stopped early
    Aborted(SubeventAbortReason),
}

/// Slot-by-slot walk over the steps of one subevent
#[derive(Debug)]
pub struct SlotWalker<'a> {
    handle: ConnHandle,
    role: CsRole,
    steps: &'a [Step],
    timing: &'a StepTiming,
    antenna_paths: u8,
    step_idx: usize,
    step_start: LlTime,
    slot: SlotKind,
    slot_offset: u32,
    sync: Option<SlotReport>,
    tones: Vec<ToneSample>,
    results: Vec<StepResult>,
    done: bool,
}

impl<'a> SlotWalker<'a> {
    /// Creates a walker positioned at the first slot of the first step
    pub fn new(
        handle: ConnHandle,
        role: CsRole,
        steps: &'a [Step],
        timing: &'a StepTiming,
        antenna_paths: u8,
        start: LlTime,
    ) -> Self {
        let slot = steps
            .first()
            .map(|s| SlotKind::first(s.mode))
            .unwrap_or(SlotKind::SyncInitiator);
        Self {
            handle,
            role,
            steps,
            timing,
            antenna_paths,
            step_idx: 0,
            step_start: start,
            slot,
            slot_offset: timing.t_fcs_us(),
            sync: None,
            tones: Vec::new(),
            results: Vec::with_capacity(steps.len()),
            done: steps.is_empty(),
        }
    }

    /// Slot the radio has to run next, `None` once the walk is over
    pub fn current(&self) -> Option<SlotRequest<'a>> {
        if self.done {
            return None;
        }
        let step = self.steps.get(self.step_idx)?;
        Some(SlotRequest {
            handle: self.handle,
            role: self.role,
            step,
            slot: self.slot,
            start: self.step_start.advanced_by(u64::from(self.slot_offset)),
            duration_us: self.timing.slot_us(step.mode, self.slot),
        })
    }

    /// Resumes the walk with the outcome of the current slot
    pub fn on_slot_complete(&mut self, outcome: SlotOutcome) -> WalkStatus {
        let Some(step) = self.steps.get(self.step_idx) else {
            return WalkStatus::Finished;
        };
        if self.done {
            return WalkStatus::Finished;
        }

        let receiving = self.slot.transmitter() != self.role;
        match outcome {
            SlotOutcome::SyncLost => {
                self.done = true;
                return WalkStatus::Aborted(SubeventAbortReason::NoCsSync);
            }
            SlotOutcome::Completed(report) if receiving => {
                if self.slot.is_sync() {
                    if self.sync.is_none() {
                        self.sync = Some(report);
                    }
                } else {
                    self.tones.extend(report.tones);
                }
            }
            SlotOutcome::Completed(_) => {}
        }

        if let Some(next) = self.slot.next(step.mode) {
            self.slot_offset +=
                self.timing.slot_us(step.mode, self.slot) + self.timing.gap_us(self.slot, next);
            self.slot = next;
            return WalkStatus::Continue;
        }

        let sync = self.sync.take().unwrap_or_default();
        let data = pack_step(
            step.mode,
            self.role,
            &sync,
            &self.tones,
            step.antenna_permutation,
            self.antenna_paths,
        );
        self.tones.clear();
        self.results.push(StepResult {
            mode: step.mode.as_u8(),
            channel: step.channel,
            data,
        });

        self.step_start.advance(u64::from(step.duration_us));
        self.step_idx += 1;
        match self.steps.get(self.step_idx) {
            Some(next) => {
                self.slot = SlotKind::first(next.mode);
                self.slot_offset = self.timing.t_fcs_us();
                WalkStatus::Continue
            }
            None => {
                self.done = true;
                WalkStatus::Finished
            }
        }
    }

    /// Results of the steps completed so far
    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    /// Start of the current step, or end of the last one once finished
    pub fn position(&self) -> LlTime {
        self.step_start
    }

    /// Consumes the walker and returns the completed step results
    pub fn into_results(self) -> Vec<StepResult> {
        self.results
    }
}

/// Outcome of one subevent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubeventRun {
    /// Results of the steps that completed
    pub results: Vec<StepResult>,
    /// Abort reason if the subevent stopped early
    pub abort: Option<SubeventAbortReason>,
    /// Slots handed to the radio
    pub slots: usize,
    /// When the last completed step ended
    pub end: LlTime,
}

/// Runs the steps of one subevent on the radio
pub fn run_subevent<R: CsRadio + ?Sized>(
    radio: &mut R,
    handle: ConnHandle,
    role: CsRole,
    steps: &[Step],
    timing: &StepTiming,
    antenna_paths: u8,
    start: LlTime,
) -> SubeventRun {
    let mut walker = SlotWalker::new(handle, role, steps, timing, antenna_paths, start);
    let mut slots = 0;
    let mut abort = None;
    while let Some(request) = walker.current() {
        let outcome = radio.run_slot(&request);
        slots += 1;
        match walker.on_slot_complete(outcome) {
            WalkStatus::Continue => {}
            WalkStatus::Finished => break,
            WalkStatus::Aborted(reason) => {
                tracing::debug!(
                    handle = handle.0,
                    slot = %request.slot,
                    step = request.step.counter,
                    "Subevent aborted: {:?}",
                    reason
                );
                abort = Some(reason);
                break;
            }
        }
    }
    let end = walker.position();
    SubeventRun {
        results: walker.into_results(),
        abort,
        slots,
        end,
    }
}

/// Running procedure series of one connection
#[derive(Debug, Clone)]
pub struct Series {
    /// Configuration the series runs
    pub config_id: u8,
    /// Local CS role
    pub role: CsRole,
    /// Negotiated procedure parameters
    pub params: ProcedureParams,
    /// Step generator
    pub generator: Generator,
    /// Procedure slot on the procedure grid the current procedure uses
    grid_index: u32,
    /// Generator procedure counter the grid index belongs to
    anchored_procedure: u16,
}

impl Series {
    /// Creates a series whose first procedure starts at the parameters'
    /// connection event
    pub fn new(config_id: u8, role: CsRole, params: ProcedureParams, generator: Generator) -> Self {
        Self {
            config_id,
            role,
            params,
            generator,
            grid_index: 0,
            anchored_procedure: 0,
        }
    }

    fn procedure_event(&self, grid_index: u32) -> u16 {
        let spacing = u32::from(self.params.procedure_interval.max(1));
        self.params
            .conn_event_counter
            .wrapping_add((grid_index.wrapping_mul(spacing)) as u16)
    }

    fn procedure_anchor(&self, timing: &ConnTiming, grid_index: u32) -> LlTime {
        timing
            .anchor_of(self.procedure_event(grid_index))
            .advanced_by(u64::from(self.params.offset))
    }

    /// Start time and ACL event counter of the subevent the generator
    /// produces next.
    ///
    /// A new procedure takes the first procedure slot whose anchor is not
    /// before `not_before`.
    pub fn next_start(&mut self, timing: &ConnTiming, not_before: LlTime) -> (LlTime, u16) {
        let (procedure, event, subevent) = self.generator.next_position();
        if procedure != self.anchored_procedure {
            self.anchored_procedure = procedure;
            self.grid_index = self.grid_index.wrapping_add(1);
            let anchor = self.procedure_anchor(timing, self.grid_index);
            if anchor < not_before {
                let spacing = u64::from(self.params.procedure_interval.max(1))
                    * u64::from(timing.interval_us.max(1));
                let skip = not_before.since(anchor).div_ceil(spacing);
                self.grid_index = self.grid_index.wrapping_add(skip as u32);
            }
        }
        let anchor = self.procedure_anchor(timing, self.grid_index);
        let layout = self.generator.layout();
        let start = anchor.advanced_by(layout.subevent_offset_us(event, subevent));
        let acl_counter = self
            .procedure_event(self.grid_index)
            .wrapping_add(event.wrapping_mul(layout.event_interval));
        (start, acl_counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lecs_common::{ChannelMap, ConfigSpec, StepMode};
    use lecs_crypto::DrbgContext;

    use crate::generator::Layout;

    struct Recorder {
        seen: Vec<(SlotKind, LlTime, bool)>,
        lose_after: Option<usize>,
    }

    impl CsRadio for Recorder {
        fn run_slot(&mut self, request: &SlotRequest<'_>) -> SlotOutcome {
            if self.lose_after == Some(self.seen.len()) {
                return SlotOutcome::SyncLost;
            }
            self.seen.push((request.slot, request.start, request.is_transmit()));
            SlotOutcome::Completed(SlotReport {
                packet_quality: 0,
                rssi: -30,
                tones: vec![ToneSample { pct: 7, quality: 0 }; 2],
                ..SlotReport::default()
            })
        }
    }

    fn plan(spec: &ConfigSpec) -> (StepTiming, Vec<Step>) {
        let timing = StepTiming::new(spec, 10, 1).unwrap();
        let layout = Layout {
            conn_interval_us: 10_000,
            event_interval: 1,
            subevents_per_event: 1,
            subevent_interval_us: 0,
            subevent_len_us: 2_000,
            max_procedure_len_us: 10_000,
            procedure_count: 1,
        };
        let mut gen =
            Generator::new(spec, layout, timing, 1, &ChannelMap::all_usable(), 0).unwrap();
        let mut drbg = DrbgContext::new(&[1; 16], &[2; 8], &[3; 16]).unwrap();
        (timing, gen.next_subevent(&mut drbg).unwrap().steps)
    }

    #[test]
    fn test_walk_visits_every_slot() {
        let spec = ConfigSpec::default();
        let (timing, steps) = plan(&spec);
        let mut radio = Recorder {
            seen: Vec::new(),
            lose_after: None,
        };
        let start = LlTime::from_millis(1);
        let run = run_subevent(&mut radio, ConnHandle(1), CsRole::Initiator, &steps, &timing, 1, start);

        assert_eq!(run.abort, None);
        assert_eq!(run.results.len(), steps.len());
        // Mode-0 has three slots, mode-2 two
        let expected: usize = steps
            .iter()
            .map(|s| if s.mode == StepMode::Mode0 { 3 } else { 2 })
            .sum();
        assert_eq!(run.slots, expected);
        assert_eq!(radio.seen[0], (SlotKind::SyncInitiator, start.advanced_by(150), true));
        assert_eq!(radio.seen[1].0, SlotKind::SyncReflector);
        assert!(!radio.seen[1].2);
        let total: u64 = steps.iter().map(|s| u64::from(s.duration_us)).sum();
        assert_eq!(run.end, start.advanced_by(total));
    }

    #[test]
    fn test_slot_starts_match_timing() {
        let spec = ConfigSpec {
            main_mode: 3,
            ..ConfigSpec::default()
        };
        let (timing, steps) = plan(&spec);
        let mut radio = Recorder {
            seen: Vec::new(),
            lose_after: None,
        };
        run_subevent(&mut radio, ConnHandle(1), CsRole::Reflector, &steps, &timing, 1, LlTime::ZERO);
        let step0 = u64::from(steps[0].duration_us);
        let slots = timing.slots(StepMode::Mode3);
        for (i, (kind, offset, _)) in slots.iter().enumerate() {
            let (seen_kind, seen_start, _) = radio.seen[3 + i];
            assert_eq!(seen_kind, *kind);
            assert_eq!(seen_start, LlTime::from_micros(step0 + u64::from(*offset)));
        }
    }

    #[test]
    fn test_results_carry_received_reports() {
        let spec = ConfigSpec::default();
        let (timing, steps) = plan(&spec);
        let mut radio = Recorder {
            seen: Vec::new(),
            lose_after: None,
        };
        let run = run_subevent(&mut radio, ConnHandle(1), CsRole::Initiator, &steps, &timing, 1, LlTime::ZERO);
        // Mode-0 initiator: quality, rssi, antenna, frequency offset
        assert_eq!(run.results[0].data, vec![0, 0xE2, 0, 0, 0]);
        // Mode-2: permutation and two received tones
        let mode2 = &run.results[1];
        assert_eq!(mode2.mode, 2);
        assert_eq!(mode2.data.len(), 1 + 2 * 4);
        assert_eq!(&mode2.data[1..5], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_sync_loss_aborts() {
        let spec = ConfigSpec::default();
        let (timing, steps) = plan(&spec);
        let mut radio = Recorder {
            seen: Vec::new(),
            lose_after: Some(4),
        };
        let run = run_subevent(&mut radio, ConnHandle(1), CsRole::Reflector, &steps, &timing, 1, LlTime::ZERO);
        assert_eq!(run.abort, Some(SubeventAbortReason::NoCsSync));
        // The mode-0 step completed, the second one did not
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.slots, 5);
    }

    #[test]
    fn test_empty_walk() {
        let spec = ConfigSpec::default();
        let timing = StepTiming::new(&spec, 10, 1).unwrap();
        let walker = SlotWalker::new(ConnHandle(1), CsRole::Initiator, &[], &timing, 1, LlTime::ZERO);
        assert!(walker.current().is_none());
    }

    #[test]
    fn test_series_grid() {
        let spec = ConfigSpec::default();
        let timing = StepTiming::new(&spec, 10, 1).unwrap();
        let params = ProcedureParams {
            conn_event_counter: 20,
            offset: 1_000,
            max_procedure_len: 32,
            event_interval: 1,
            subevents_per_event: 1,
            subevent_len: 5_000,
            procedure_interval: 4,
            procedure_count: 0,
            ..ProcedureParams::default()
        };
        let layout = Layout::from_params(&params, 10_000);
        let gen = Generator::new(&spec, layout, timing, 1, &ChannelMap::all_usable(), 0).unwrap();
        let mut drbg = DrbgContext::new(&[1; 16], &[2; 8], &[3; 16]).unwrap();
        let mut series = Series::new(0, CsRole::Initiator, params, gen);
        let conn = ConnTiming {
            interval_us: 10_000,
            ref_counter: 0,
            ref_anchor: LlTime::ZERO,
        };

        assert_eq!(series.next_start(&conn, LlTime::ZERO), (LlTime::from_micros(201_000), 20));
        let first = series.generator.next_subevent(&mut drbg).unwrap();
        assert!(!first.boundary.ends_procedure());
        assert_eq!(series.next_start(&conn, LlTime::ZERO), (LlTime::from_micros(211_000), 21));
        series.generator.skip_procedure(&mut drbg).unwrap();

        // Next procedure slot is 4 events later unless it has already passed
        assert_eq!(series.next_start(&conn, LlTime::ZERO).1, 24);
        series.generator.skip_procedure(&mut drbg).unwrap();
        let (start, counter) = series.next_start(&conn, LlTime::from_millis(300));
        assert_eq!(counter, 32);
        assert_eq!(start, LlTime::from_micros(321_000));
    }
}
