//! Lamport clock for ordering operations across replicas.
//!
//! The clock ticks on every local event and observes every remote
//! timestamp, so a locally issued operation always carries a timestamp
//! greater than anything the replica has already seen. The RGA placement
//! rule depends on that.
//!
//! Complexity:
//! - tick: O(1)
//! - observe: O(1)

use std::cmp::Ordering;

/// A Lamport clock for partial ordering of events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LamportClock {
    time: u64,
}

impl LamportClock {
    /// Create a new clock starting at 0.
    pub fn new() -> LamportClock {
        return LamportClock { time: 0 };
    }

    /// Create a clock with a specific starting time.
    pub fn with_time(time: u64) -> LamportClock {
        return LamportClock { time };
    }

    /// Get the current time.
    #[inline]
    pub fn time(&self) -> u64 {
        return self.time;
    }

    /// Increment the clock for a local event.
    /// Returns the new time.
    #[inline]
    pub fn tick(&mut self) -> u64 {
        self.time += 1;
        return self.time;
    }

    /// Record a remote timestamp without issuing an event.
    /// The next `tick` is guaranteed to exceed `remote_time`.
    #[inline]
    pub fn observe(&mut self, remote_time: u64) {
        self.time = self.time.max(remote_time);
    }
}

impl PartialOrd for LamportClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl Ord for LamportClock {
    fn cmp(&self, other: &Self) -> Ordering {
        return self.time.cmp(&other.time);
    }
}
