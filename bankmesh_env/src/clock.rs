//! Logical clock owned by each actor.

use crate::types::Timestamp;

/// Lamport clock: a local, monotonically non-decreasing event counter.
///
/// - local event or send: `time += 1`
/// - receive stamped `remote`: `time = max(time, remote) + 1`
#[derive(Debug, Clone, Default)]
pub struct LamportClock {
    time: Timestamp,
}

impl LamportClock {
    /// Creates a clock at time 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current time without advancing.
    pub fn now(&self) -> Timestamp {
        self.time
    }

    /// Advances for a local event (including a send) and returns the new time.
    pub fn tick(&mut self) -> Timestamp {
        self.time = self.time.saturating_add(1);
        self.time
    }

    /// Merges a timestamp observed on an incoming frame.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.time = self.time.max(remote).saturating_add(1);
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_monotonic() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn test_observe_jumps_past_remote() {
        let mut clock = LamportClock::new();
        clock.tick();
        assert_eq!(clock.observe(10), 11);
        // An older remote stamp still advances by one.
        assert_eq!(clock.observe(3), 12);
    }
}
