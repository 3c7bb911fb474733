//! Scheduled item records

use std::fmt;

use lecs_common::LlTime;

/// Handle returned for every accepted reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

impl ItemId {
    /// Creates an id from a raw value
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Activity that owns a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// ACL connection event
    Connection,
    /// Advertising event
    Advertising,
    /// Scan window
    Scan,
    /// Periodic advertising sync
    Sync,
    /// Channel sounding subevent
    ChannelSounding,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemKind::Connection => "conn",
            ItemKind::Advertising => "adv",
            ItemKind::Scan => "scan",
            ItemKind::Sync => "sync",
            ItemKind::ChannelSounding => "cs",
        };
        f.write_str(name)
    }
}

/// A radio time reservation over the half-open window `[start, end)`.
///
/// `owner` is an opaque key the creating activity uses to find its own
/// state again (a connection arena index for CS); the scheduler never
/// interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedItem {
    /// First microsecond of the window
    pub start: LlTime,
    /// First microsecond after the window
    pub end: LlTime,
    /// Owning activity
    pub kind: ItemKind,
    /// Higher wins when preemption is allowed
    pub priority: u8,
    /// Owner lookup key
    pub owner: u32,
}

impl SchedItem {
    /// Creates an item of `duration_us` starting at `start`
    pub fn new(kind: ItemKind, start: LlTime, duration_us: u64) -> Self {
        Self {
            start,
            end: start.advanced_by(duration_us),
            kind,
            priority: 0,
            owner: 0,
        }
    }

    /// Sets the priority
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the owner key
    pub fn with_owner(mut self, owner: u32) -> Self {
        self.owner = owner;
        self
    }

    /// Window length in microseconds
    pub fn duration_us(&self) -> u64 {
        self.end.since(self.start)
    }

    /// Two windows overlap unless one ends at or before the other starts
    pub fn overlaps(&self, other: &SchedItem) -> bool {
        !(self.end <= other.start || other.end <= self.start)
    }

    /// Moves the window so it starts at `start`, keeping its length
    pub fn move_to(&mut self, start: LlTime) {
        let duration = self.duration_us();
        self.start = start;
        self.end = start.advanced_by(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(start: u64, len: u64) -> SchedItem {
        SchedItem::new(ItemKind::Connection, LlTime::from_micros(start), len)
    }

    #[test]
    fn test_overlap_is_half_open() {
        assert!(!at(0, 100).overlaps(&at(100, 50)));
        assert!(!at(100, 50).overlaps(&at(0, 100)));
        assert!(at(0, 101).overlaps(&at(100, 50)));
        assert!(at(10, 10).overlaps(&at(0, 100)));
    }

    #[test]
    fn test_move_keeps_length() {
        let mut item = at(1_000, 250).with_priority(3).with_owner(7);
        item.move_to(LlTime::from_micros(5_000));
        assert_eq!(item.start.as_micros(), 5_000);
        assert_eq!(item.end.as_micros(), 5_250);
        assert_eq!(item.duration_us(), 250);
        assert_eq!(item.priority, 3);
        assert_eq!(item.owner, 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(ItemId::new(4).to_string(), "#4");
        assert_eq!(ItemKind::ChannelSounding.to_string(), "cs");
    }
}
