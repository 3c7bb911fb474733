//! Ordered radio time reservations
//!
//! Items are kept sorted by start time and never overlap, except that an
//! item handed out by [`Scheduler::dispatch`] stays "running" until its owner
//! reports it finished and blocks its window in the meantime.

use thiserror::Error;
use tracing::{debug, trace};

use lecs_common::LlTime;

use crate::item::{ItemId, ItemKind, SchedItem};
use crate::policy::PreemptPolicy;

/// Lead time between dispatching an item and its radio start, microseconds
pub const SCHED_OFFSET_US: u64 = 40;

/// Errors returned by the scheduler
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedError {
    /// No free window within the allowed delay
    #[error("no slot for {kind} at {requested} within {max_delay_us}us")]
    NoSlot {
        /// Kind of the rejected item
        kind: ItemKind,
        /// Requested start
        requested: LlTime,
        /// Allowed delay
        max_delay_us: u64,
    },

    /// The item's window is empty or reversed
    #[error("empty window {start}..{end}")]
    EmptyWindow {
        /// Window start
        start: LlTime,
        /// Window end
        end: LlTime,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedError>;

/// Outcome of a successful insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    /// Handle of the new item
    pub id: ItemId,
    /// Start the item was placed at (later than requested if it slid)
    pub start: LlTime,
    /// Items evicted to make room; their owners decide what to do next
    pub preempted: Vec<(ItemId, SchedItem)>,
}

/// What a dispatched item's owner reports back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Still using the radio; call [`Scheduler::finish_running`] later
    Running,
    /// Finished
    Done,
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedStats {
    /// Items accepted
    pub inserted: u64,
    /// Items evicted by a preempting insert
    pub preempted: u64,
    /// Inserts that found no window
    pub failed: u64,
    /// Items handed to their owners
    pub dispatched: u64,
}

/// The link-layer scheduler
#[derive(Debug, Default)]
pub struct Scheduler {
    items: Vec<(ItemId, SchedItem)>,
    running: Option<(ItemId, SchedItem)>,
    next_id: u64,
    stats: SchedStats,
}

impl Scheduler {
    /// Creates an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `item`, sliding it up to `max_delay_us` later when it collides
    /// with something `policy` does not allow it to evict.
    pub fn insert(
        &mut self,
        mut item: SchedItem,
        max_delay_us: u64,
        policy: PreemptPolicy,
    ) -> Result<Insertion> {
        if item.end <= item.start {
            return Err(SchedError::EmptyWindow {
                start: item.start,
                end: item.end,
            });
        }

        let requested = item.start;
        let latest = requested.advanced_by(max_delay_us);
        let kind = item.kind;
        let fail = move |stats: &mut SchedStats| {
            stats.failed += 1;
            debug!(%kind, %requested, max_delay_us, "No slot");
            SchedError::NoSlot {
                kind,
                requested,
                max_delay_us,
            }
        };

        if let Some((_, running)) = &self.running {
            if item.overlaps(running) {
                if max_delay_us == 0 || running.end > latest {
                    return Err(fail(&mut self.stats));
                }
                item.move_to(running.end);
            }
        }

        let (pos, victims) = loop {
            let mut victims: Vec<usize> = Vec::new();
            let mut pos = self.items.len();
            let mut slid = false;

            for (idx, (_, existing)) in self.items.iter().enumerate() {
                if item.end <= existing.start {
                    pos = idx;
                    break;
                }
                if !item.overlaps(existing) {
                    continue;
                }
                if policy.allows(&item, existing) {
                    victims.push(idx);
                    continue;
                }
                if max_delay_us == 0 || existing.end > latest {
                    return Err(fail(&mut self.stats));
                }
                trace!(kind = %item.kind, from = %item.start, to = %existing.end, "Sliding");
                item.move_to(existing.end);
                slid = true;
                break;
            }

            if !slid {
                break (pos, victims);
            }
        };

        let mut preempted = Vec::with_capacity(victims.len());
        for idx in victims.iter().rev() {
            let (id, victim) = self.items.remove(*idx);
            debug!(id = %id, kind = %victim.kind, by = %item.kind, "Preempted");
            preempted.push((id, victim));
        }
        preempted.reverse();
        let pos = pos - victims.len();

        let id = ItemId::new(self.next_id);
        self.next_id += 1;
        self.items.insert(pos, (id, item));
        self.stats.inserted += 1;
        self.stats.preempted += preempted.len() as u64;
        debug!(id = %id, kind = %item.kind, start = %item.start, end = %item.end, "Scheduled");

        Ok(Insertion {
            id,
            start: item.start,
            preempted,
        })
    }

    /// Removes a pending item
    pub fn remove(&mut self, id: ItemId) -> Option<SchedItem> {
        let idx = self.items.iter().position(|(i, _)| *i == id)?;
        let (_, item) = self.items.remove(idx);
        if idx == 0 {
            trace!(next = ?self.next_wakeup(), "Head changed");
        }
        Some(item)
    }

    /// Removes every pending item of one kind
    pub fn remove_all_of_kind(&mut self, kind: ItemKind) -> Vec<(ItemId, SchedItem)> {
        self.remove_where(|item| item.kind == kind)
    }

    /// Removes every pending item of one kind belonging to `owner`
    pub fn remove_owned(&mut self, kind: ItemKind, owner: u32) -> Vec<(ItemId, SchedItem)> {
        self.remove_where(|item| item.kind == kind && item.owner == owner)
    }

    fn remove_where<F: Fn(&SchedItem) -> bool>(&mut self, pred: F) -> Vec<(ItemId, SchedItem)> {
        let mut removed = Vec::new();
        self.items.retain(|(id, item)| {
            if pred(item) {
                removed.push((*id, *item));
                false
            } else {
                true
            }
        });
        removed
    }

    /// Pops every item whose dispatch time has arrived and hands it to
    /// `handler`, in start order. Returns how many were dispatched.
    ///
    /// An item reported as [`ItemOutcome::Running`] keeps its window
    /// blocked until [`Scheduler::finish_running`]; nothing else is
    /// dispatched while it runs.
    pub fn dispatch<F>(&mut self, now: LlTime, mut handler: F) -> usize
    where
        F: FnMut(ItemId, &SchedItem) -> ItemOutcome,
    {
        let mut count = 0;
        while self.running.is_none() {
            let due = match self.items.first() {
                Some((_, head)) => head.start.saturating_sub(SCHED_OFFSET_US) <= now,
                None => false,
            };
            if !due {
                break;
            }
            let (id, item) = self.items.remove(0);
            self.stats.dispatched += 1;
            count += 1;
            trace!(id = %id, kind = %item.kind, %now, "Dispatch");
            if handler(id, &item) == ItemOutcome::Running {
                self.running = Some((id, item));
            }
        }
        count
    }

    /// Clears the running item
    pub fn finish_running(&mut self) -> Option<(ItemId, SchedItem)> {
        self.running.take()
    }

    /// The item currently holding the radio
    pub fn running(&self) -> Option<&(ItemId, SchedItem)> {
        self.running.as_ref()
    }

    /// When the dispatch loop next needs to run
    pub fn next_wakeup(&self) -> Option<LlTime> {
        self.items
            .first()
            .map(|(_, head)| head.start.saturating_sub(SCHED_OFFSET_US))
    }

    /// Looks up a pending item
    pub fn get(&self, id: ItemId) -> Option<&SchedItem> {
        self.items.iter().find(|(i, _)| *i == id).map(|(_, item)| item)
    }

    /// Pending items in start order
    pub fn iter(&self) -> impl Iterator<Item = &(ItemId, SchedItem)> {
        self.items.iter()
    }

    /// Number of pending items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Counters
    pub fn stats(&self) -> SchedStats {
        self.stats
    }
}
