//! Link-layer radio time scheduler
//!
//! A single ordered collection of non-overlapping time reservations shared
//! by every radio activity (connections, advertising, scanning, sync and
//! channel sounding). Callers choose a preemption policy per insert;
//! evicted items are handed back to the caller rather than notified.

pub mod item;
pub mod policy;
pub mod scheduler;

pub use item::{ItemId, ItemKind, SchedItem};
pub use policy::PreemptPolicy;
pub use scheduler::{
    Insertion, ItemOutcome, Result, SchedError, SchedStats, Scheduler, SCHED_OFFSET_US,
};
