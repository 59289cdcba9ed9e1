//! Monotonic `modifiedAt` source.

use crate::models::now_millis;

/// Issues strictly increasing millisecond timestamps
///
/// Each value is `max(now, last + 1)`, so repeated calls within the same
/// millisecond, or after the wall clock steps backwards, still move
/// forward. Sync conflict resolution depends on this.
#[derive(Debug, Clone, Default)]
pub struct ModifiedAtClock {
    last: i64,
}

impl ModifiedAtClock {
    /// Start after `last`, the highest value already in use
    pub fn starting_after(last: i64) -> Self {
        Self { last }
    }

    pub fn next(&mut self) -> i64 {
        self.next_at(now_millis())
    }

    pub fn next_at(&mut self, now: i64) -> i64 {
        self.last = now.max(self.last + 1);
        self.last
    }

    /// Account for a value issued elsewhere
    pub fn observe(&mut self, value: i64) {
        self.last = self.last.max(value);
    }

    /// The most recently issued (or observed) value
    pub fn last_issued(&self) -> i64 {
        self.last
    }
}
