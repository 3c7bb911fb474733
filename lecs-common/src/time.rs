//! Link-layer clock and connection event grid
//!
//! All controller timing is expressed in microseconds of link-layer time.
//! The connection machinery itself lives outside this workspace; CS only
//! needs to know where the parent connection's events fall.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Microseconds per connection-interval unit (1.25 ms).
pub const CONN_INTERVAL_UNIT_US: u32 = 1250;

/// Microseconds per procedure-length / subevent-interval unit (0.625 ms).
pub const SLOT_UNIT_US: u32 = 625;

/// Link-layer time in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LlTime(u64);

impl LlTime {
    /// Time zero
    pub const ZERO: LlTime = LlTime(0);

    /// Creates a time from a microsecond value
    pub fn from_micros(us: u64) -> Self {
        Self(us)
    }

    /// Creates a time from a millisecond value
    pub fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1000))
    }

    /// Returns the time in microseconds
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Advances by N microseconds
    pub fn advance(&mut self, us: u64) {
        self.0 = self.0.saturating_add(us);
    }

    /// Returns a time advanced by N microseconds without mutating
    pub fn advanced_by(&self, us: u64) -> Self {
        Self(self.0.saturating_add(us))
    }

    /// Returns a time moved back by N microseconds, clamped at zero
    pub fn saturating_sub(&self, us: u64) -> Self {
        Self(self.0.saturating_sub(us))
    }

    /// Absolute distance between two times in microseconds
    pub fn diff(&self, other: &LlTime) -> u64 {
        self.0.abs_diff(other.0)
    }

    /// Microseconds elapsed since `earlier`, or zero if `earlier` is later
    pub fn since(&self, earlier: LlTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::fmt::Display for LlTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.0)
    }
}

impl From<u64> for LlTime {
    fn from(us: u64) -> Self {
        Self::from_micros(us)
    }
}

impl From<LlTime> for u64 {
    fn from(time: LlTime) -> u64 {
        time.0
    }
}

impl From<Duration> for LlTime {
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }
}

/// Event grid of the parent ACL connection.
///
/// Anchors of future and past connection events are extrapolated from one
/// reference event. Event counters are 16-bit and wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnTiming {
    /// Connection interval in microseconds
    pub interval_us: u32,
    /// Counter of the reference connection event
    pub ref_counter: u16,
    /// Anchor of the reference connection event
    pub ref_anchor: LlTime,
}

impl ConnTiming {
    /// Creates a grid from an interval in 1.25 ms units
    pub fn from_units(interval_units: u16, ref_counter: u16, ref_anchor: LlTime) -> Self {
        Self {
            interval_us: u32::from(interval_units) * CONN_INTERVAL_UNIT_US,
            ref_counter,
            ref_anchor,
        }
    }

    /// Records a newly observed connection event
    pub fn observe(&mut self, counter: u16, anchor: LlTime) {
        self.ref_counter = counter;
        self.ref_anchor = anchor;
    }

    /// Signed distance in events from the reference to `counter`
    pub fn events_from_ref(&self, counter: u16) -> i32 {
        i32::from(counter.wrapping_sub(self.ref_counter) as i16)
    }

    /// Anchor time of the connection event with the given counter
    pub fn anchor_of(&self, counter: u16) -> LlTime {
        let events = self.events_from_ref(counter);
        let span = u64::from(events.unsigned_abs()) * u64::from(self.interval_us);
        if events >= 0 {
            self.ref_anchor.advanced_by(span)
        } else {
            self.ref_anchor.saturating_sub(span)
        }
    }

    /// Counter of the first connection event anchored at or after `time`
    pub fn counter_at_or_after(&self, time: LlTime) -> u16 {
        if self.interval_us == 0 || time <= self.ref_anchor {
            return self.ref_counter;
        }
        let interval = u64::from(self.interval_us);
        let events = time.since(self.ref_anchor).div_ceil(interval);
        self.ref_counter.wrapping_add(events as u16)
    }
}
