//! Preemption policies chosen per call site

use crate::item::SchedItem;

/// Decides whether a new reservation may evict an overlapping one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreemptPolicy {
    /// Never evict; slide the candidate instead
    #[default]
    Never,
    /// Evict anything in the way
    Always,
    /// Evict other kinds, and the same kind only at lower priority
    ExceptSameKindAtOrAbove,
}

impl PreemptPolicy {
    /// True if `candidate` may evict `existing`
    pub fn allows(&self, candidate: &SchedItem, existing: &SchedItem) -> bool {
        match self {
            PreemptPolicy::Never => false,
            PreemptPolicy::Always => true,
            PreemptPolicy::ExceptSameKindAtOrAbove => {
                existing.kind != candidate.kind || existing.priority < candidate.priority
            }
        }
    }
}
