//! Step and subevent generator
//!
//! Expands a configuration into the step sequence of each subevent. Both
//! controllers run the same generator over the same DRBG state, so every
//! decision here has to be a pure function of the configuration, the
//! negotiated layout and the DRBG.
//!
//! Four budgets bound the output at all times:
//!
//! - 160 steps per subevent
//! - 256 steps per procedure
//! - the subevent length
//! - the procedure length, measured from the procedure anchor
//!
//! Steps of a subevent are picked in priority order: mode-0 steps, channels
//! replayed from the previous subevent, a pending sub-mode step, then
//! main-mode steps.

use std::collections::VecDeque;

use lecs_common::{ChannelMap, ConfigSpec, HciStatus, ProcedureParams, RttType, StepMode};
use lecs_crypto::{BlockCipher, ChannelPool, DrbgContext, PoolShape, TransactionId};

use crate::error::{CsError, Result};
use crate::step::{RttPayload, Step, StepTiming};

/// Steps in one subevent
pub const MAX_STEPS_PER_SUBEVENT: usize = 160;

/// Steps in one procedure
pub const MAX_STEPS_PER_PROCEDURE: u16 = 256;

/// Where the series goes after a subevent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Next subevent of the same CS event
    NextSubevent,
    /// First subevent of the next CS event
    NextEvent,
    /// First subevent of the next procedure
    NextProcedure,
    /// No more procedures
    SeriesComplete,
}

impl Boundary {
    /// True if the subevent closed its procedure
    pub fn ends_procedure(&self) -> bool {
        matches!(self, Boundary::NextProcedure | Boundary::SeriesComplete)
    }
}

/// Time layout of the procedures of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// ACL connection interval
    pub conn_interval_us: u32,
    /// CS events are this many ACL events apart
    pub event_interval: u16,
    /// Subevents in each CS event
    pub subevents_per_event: u8,
    /// Spacing of subevents within a CS event
    pub subevent_interval_us: u32,
    /// Subevent length
    pub subevent_len_us: u32,
    /// Procedure length budget
    pub max_procedure_len_us: u64,
    /// Procedures in the series (0: unbounded)
    pub procedure_count: u16,
}

impl Layout {
    /// Layout of negotiated procedure parameters
    pub fn from_params(params: &ProcedureParams, conn_interval_us: u32) -> Self {
        Self {
            conn_interval_us,
            event_interval: params.event_interval.max(1),
            subevents_per_event: params.subevents_per_event.max(1),
            subevent_interval_us: u32::from(params.subevent_interval) * 625,
            subevent_len_us: params.subevent_len,
            max_procedure_len_us: u64::from(params.max_procedure_len) * 625,
            procedure_count: params.procedure_count,
        }
    }

    /// Offset of a subevent from its procedure anchor
    pub fn subevent_offset_us(&self, event: u16, subevent: u8) -> u64 {
        u64::from(event) * u64::from(self.event_interval) * u64::from(self.conn_interval_us)
            + u64::from(subevent) * u64::from(self.subevent_interval_us)
    }
}

/// Steps of one subevent and what follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubeventPlan {
    /// Procedure counter within the series
    pub procedure_counter: u16,
    /// CS event index within the procedure
    pub event_index: u16,
    /// Subevent index within the CS event
    pub subevent_index: u8,
    /// Offset of the subevent from the procedure anchor
    pub offset_us: u64,
    /// Steps in transmission order
    pub steps: Vec<Step>,
    /// What follows this subevent
    pub boundary: Boundary,
}

impl SubeventPlan {
    /// Airtime of all steps
    pub fn duration_us(&self) -> u64 {
        self.steps.iter().map(|s| u64::from(s.duration_us)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    Mode0,
    Repeated(u8),
    Sub,
    Main,
}

/// Deterministic generator for one procedure series
#[derive(Debug, Clone)]
pub struct Generator {
    spec: ConfigSpec,
    layout: Layout,
    timing: StepTiming,
    antenna_paths: u8,
    mode0_pool: ChannelPool,
    main_pool: ChannelPool,
    step_counter: u16,
    procedure_counter: u16,
    event_index: u16,
    subevent_index: u8,
    procedure_steps: u16,
    procedure_pending: bool,
    countdown: Option<u8>,
    sub_pending: bool,
    repeat_cache: Vec<u8>,
    finished: bool,
}

fn filtered_channels(spec: &ConfigSpec, classification: &ChannelMap) -> Result<Vec<u8>> {
    let map = spec.channel_map.intersect(classification);
    if map.count() < lecs_common::types::MIN_CHANNELS {
        return Err(CsError::new(HciStatus::InsufficientChannels, "too few channels"));
    }
    Ok(map.channels().collect())
}

impl Generator {
    /// Creates a generator positioned at the first subevent of the first
    /// procedure.
    ///
    /// * `classification` - channel map filter applied on top of the
    ///   configuration's own map
    /// * `step_counter` - DRBG step counter the series starts from
    pub fn new(
        spec: &ConfigSpec,
        layout: Layout,
        timing: StepTiming,
        antenna_paths: u8,
        classification: &ChannelMap,
        step_counter: u16,
    ) -> Result<Self> {
        let mode0 = u64::from(timing.step_us(StepMode::Mode0));
        if mode0 > u64::from(layout.subevent_len_us) || mode0 > layout.max_procedure_len_us {
            return Err(CsError::new(
                HciStatus::UnsupportedLlParameterValue,
                "subevent cannot hold a mode-0 step",
            ));
        }
        spec.main_mode().ok_or(CsError::invalid("main mode"))?;

        let channels = filtered_channels(spec, classification)?;
        let main_shape = if spec.channel_selection == 1 {
            PoolShape::Grouped {
                jump: spec.ch3c_jump,
                x_shape: spec.ch3c_shape == 1,
            }
        } else {
            PoolShape::Shuffled {
                repetition: spec.chm_repetition,
            }
        };

        Ok(Self {
            spec: *spec,
            layout,
            timing,
            antenna_paths: antenna_paths.max(1),
            mode0_pool: ChannelPool::new(
                TransactionId::HopChannelMode0,
                channels.clone(),
                PoolShape::Shuffled { repetition: 1 },
            ),
            main_pool: ChannelPool::new(TransactionId::HopChannelNonMode0, channels, main_shape),
            step_counter,
            procedure_counter: 0,
            event_index: 0,
            subevent_index: 0,
            procedure_steps: 0,
            procedure_pending: false,
            countdown: None,
            sub_pending: false,
            repeat_cache: Vec::new(),
            finished: false,
        })
    }

    /// Cumulative DRBG step counter
    pub fn step_counter(&self) -> u16 {
        self.step_counter
    }

    /// Counter of the current procedure
    pub fn procedure_counter(&self) -> u16 {
        self.procedure_counter
    }

    /// Procedure counter, CS event index and subevent index of the subevent
    /// the next call to [`Generator::next_subevent`] produces
    pub fn next_position(&self) -> (u16, u16, u8) {
        if self.procedure_pending {
            (self.procedure_counter.wrapping_add(1), 0, 0)
        } else {
            (self.procedure_counter, self.event_index, self.subevent_index)
        }
    }

    /// True once the last procedure has closed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Step timing of the series
    pub fn timing(&self) -> &StepTiming {
        &self.timing
    }

    /// Layout of the series
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Replaces the channel classification; both pools refill at their next
    /// draw.
    pub fn set_classification(&mut self, classification: &ChannelMap) -> Result<()> {
        let channels = filtered_channels(&self.spec, classification)?;
        self.mode0_pool.set_channels(channels.clone());
        self.main_pool.set_channels(channels);
        Ok(())
    }

    /// Generates the next subevent.
    pub fn next_subevent<C: BlockCipher>(
        &mut self,
        drbg: &mut DrbgContext<C>,
    ) -> Result<SubeventPlan> {
        if self.finished {
            return Err(CsError::disallowed("procedure series complete"));
        }
        if self.procedure_pending {
            self.start_procedure(drbg)?;
        }

        let mut steps = self.fill_subevent(drbg)?;
        if steps.is_empty() {
            if self.procedure_steps == 0 {
                return Err(CsError::new(
                    HciStatus::UnsupportedLlParameterValue,
                    "no step fits a fresh procedure",
                ));
            }
            tracing::debug!(
                procedure = self.procedure_counter,
                "Procedure closed early, no step fits"
            );
            self.start_procedure(drbg)?;
            steps = self.fill_subevent(drbg)?;
            if steps.is_empty() {
                return Err(CsError::new(
                    HciStatus::UnsupportedLlParameterValue,
                    "no step fits a fresh procedure",
                ));
            }
        }

        let plan = SubeventPlan {
            procedure_counter: self.procedure_counter,
            event_index: self.event_index,
            subevent_index: self.subevent_index,
            offset_us: self.layout.subevent_offset_us(self.event_index, self.subevent_index),
            steps,
            boundary: self.advance(),
        };
        tracing::trace!(
            procedure = plan.procedure_counter,
            event = plan.event_index,
            subevent = plan.subevent_index,
            steps = plan.steps.len(),
            boundary = ?plan.boundary,
            "Subevent generated"
        );
        Ok(plan)
    }

    /// Generates and discards the rest of the current procedure.
    ///
    /// Keeps the DRBG and the channel pools aligned with a peer that runs
    /// the procedure to its end.
    pub fn skip_procedure<C: BlockCipher>(
        &mut self,
        drbg: &mut DrbgContext<C>,
    ) -> Result<Boundary> {
        loop {
            let plan = self.next_subevent(drbg)?;
            if plan.boundary.ends_procedure() {
                return Ok(plan.boundary);
            }
        }
    }

    fn start_procedure<C: BlockCipher>(&mut self, drbg: &mut DrbgContext<C>) -> Result<()> {
        drbg.backtracking_resistance()?;
        self.procedure_counter = self.procedure_counter.wrapping_add(1);
        self.event_index = 0;
        self.subevent_index = 0;
        self.procedure_steps = 0;
        self.procedure_pending = false;
        self.repeat_cache.clear();
        Ok(())
    }

    fn advance(&mut self) -> Boundary {
        let (event, subevent) = if self.subevent_index + 1 < self.layout.subevents_per_event {
            (self.event_index, self.subevent_index + 1)
        } else {
            (self.event_index.saturating_add(1), 0)
        };
        let next_offset = self.layout.subevent_offset_us(event, subevent);
        let mode0 = u64::from(self.timing.step_us(StepMode::Mode0));
        let fits = self.procedure_steps < MAX_STEPS_PER_PROCEDURE
            && next_offset + mode0 <= self.layout.max_procedure_len_us;

        if fits {
            self.event_index = event;
            self.subevent_index = subevent;
            return if subevent == 0 {
                Boundary::NextEvent
            } else {
                Boundary::NextSubevent
            };
        }

        let count = self.layout.procedure_count;
        if count != 0 && self.procedure_counter.saturating_add(1) >= count {
            self.finished = true;
            Boundary::SeriesComplete
        } else {
            self.procedure_pending = true;
            Boundary::NextProcedure
        }
    }

    fn peek_kind<C: BlockCipher>(
        &mut self,
        drbg: &mut DrbgContext<C>,
        mode0_left: u8,
        repeat: &VecDeque<u8>,
    ) -> Result<StepKind> {
        if mode0_left > 0 {
            return Ok(StepKind::Mode0);
        }
        if let Some(&channel) = repeat.front() {
            return Ok(StepKind::Repeated(channel));
        }
        if !self.spec.has_sub_mode() {
            return Ok(StepKind::Main);
        }
        if self.sub_pending {
            return Ok(StepKind::Sub);
        }
        if self.countdown.is_none() {
            let n = drbg.main_mode_steps(
                self.step_counter,
                self.spec.main_min_steps,
                self.spec.main_max_steps,
            )?;
            self.countdown = Some(n.max(1));
        }
        Ok(StepKind::Main)
    }

    fn mode_of(&self, kind: StepKind) -> Result<StepMode> {
        let mode = match kind {
            StepKind::Mode0 => Some(StepMode::Mode0),
            StepKind::Repeated(_) | StepKind::Main => self.spec.main_mode(),
            StepKind::Sub => self.spec.sub_mode(),
        };
        mode.ok_or(CsError::invalid("step mode"))
    }

    fn fill_subevent<C: BlockCipher>(&mut self, drbg: &mut DrbgContext<C>) -> Result<Vec<Step>> {
        let offset = self.layout.subevent_offset_us(self.event_index, self.subevent_index);
        let mut used: u64 = 0;
        let mut steps = Vec::new();
        let mut mode0_left = self.spec.mode0_steps;
        let mut repeat: VecDeque<u8> = std::mem::take(&mut self.repeat_cache).into();
        let mut main_channels = Vec::new();

        while steps.len() < MAX_STEPS_PER_SUBEVENT && self.procedure_steps < MAX_STEPS_PER_PROCEDURE {
            let kind = self.peek_kind(drbg, mode0_left, &repeat)?;
            let mode = self.mode_of(kind)?;
            let duration = u64::from(self.timing.step_us(mode));
            if used + duration > u64::from(self.layout.subevent_len_us)
                || offset + used + duration > self.layout.max_procedure_len_us
            {
                break;
            }

            let counter = self.step_counter;
            let (channel, repeated) = match kind {
                StepKind::Mode0 => (self.mode0_pool.next_channel(drbg, counter)?, false),
                StepKind::Repeated(channel) => (channel, true),
                StepKind::Main | StepKind::Sub => (self.main_pool.next_channel(drbg, counter)?, false),
            };
            steps.push(self.build_step(drbg, counter, mode, channel, repeated)?);

            used += duration;
            self.step_counter = self.step_counter.wrapping_add(1);
            self.procedure_steps += 1;

            match kind {
                StepKind::Mode0 => mode0_left -= 1,
                StepKind::Repeated(_) => {
                    repeat.pop_front();
                }
                StepKind::Sub => {
                    self.sub_pending = false;
                    self.countdown = None;
                }
                StepKind::Main => {
                    main_channels.push(channel);
                    if let Some(n) = self.countdown {
                        if n <= 1 {
                            self.countdown = None;
                            self.sub_pending = true;
                        } else {
                            self.countdown = Some(n - 1);
                        }
                    }
                }
            }
        }

        let keep = usize::from(self.spec.main_repetition).min(main_channels.len());
        self.repeat_cache = main_channels.split_off(main_channels.len() - keep);
        Ok(steps)
    }

    fn build_step<C: BlockCipher>(
        &self,
        drbg: &mut DrbgContext<C>,
        counter: u16,
        mode: StepMode,
        channel: u8,
        repeated: bool,
    ) -> Result<Step> {
        let access_addresses = if mode.has_sync() {
            Some(drbg.access_addresses(counter)?)
        } else {
            None
        };
        let (tone_extension, antenna_permutation) = if mode.has_tones() {
            let ext = drbg.tone_extension_presence(counter)?;
            let perm = if self.antenna_paths > 1 {
                drbg.antenna_permutation(counter, self.antenna_paths)?
            } else {
                0
            };
            (Some(ext), perm)
        } else {
            (None, 0)
        };
        let rtt = match self.spec.rtt() {
            Some(rtt) if mode.has_rtt() && rtt != RttType::AaOnly => {
                let mut payload = || -> Result<RttPayload> {
                    if rtt.is_sounding() {
                        Ok(RttPayload::Sounding(drbg.sounding_sequence(counter, rtt)?))
                    } else {
                        Ok(RttPayload::Random(drbg.random_sequence(counter, rtt)?))
                    }
                };
                let initiator = payload()?;
                let reflector = payload()?;
                Some((initiator, reflector))
            }
            _ => None,
        };

        Ok(Step {
            counter,
            mode,
            channel,
            repeated,
            access_addresses,
            tone_extension,
            antenna_permutation,
            rtt,
            duration_us: self.timing.step_us(mode),
        })
    }
}
