//! Logical timestamps used to order messages for a single entity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// An ordering token carried by every sync message.
///
/// Stored as microseconds since the UNIX epoch. The value is only ever
/// compared against other timestamps of the same entity; it carries no
/// business meaning.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The earliest representable stamp.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Creates a timestamp from microseconds since the UNIX epoch.
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Returns the raw microsecond value.
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Reads the current wall clock.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(micros)
    }

    /// Returns true if this stamp is strictly newer than `other`.
    pub fn is_newer_than(&self, other: Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the stamp one microsecond later.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(micros: i64) -> Self {
        Self(micros)
    }
}

/// Issues strictly increasing timestamps.
///
/// Follows the wall clock, but never returns a stamp lower than or equal to
/// one it already issued, so a publisher's messages for the same entity keep
/// their emission order even if the system clock steps backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    /// Creates a new clock.
    pub fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Creates a clock whose next stamp is greater than `floor`.
    pub fn starting_after(floor: Timestamp) -> Self {
        Self {
            last: AtomicI64::new(floor.as_micros()),
        }
    }

    /// Returns the next stamp.
    pub fn now(&self) -> Timestamp {
        let wall = Timestamp::now().as_micros();
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = wall.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Timestamp(candidate),
                Err(observed) => last = observed,
            }
        }
    }

    /// Returns the last stamp issued.
    pub fn last_issued(&self) -> Timestamp {
        Timestamp(self.last.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ordering() {
        let t1 = Timestamp::from_micros(10);
        let t2 = Timestamp::from_micros(20);
        assert!(t1 < t2);
        assert!(t2.is_newer_than(t1));
        assert!(!t1.is_newer_than(t1));
        assert_eq!(t1.next(), Timestamp::from_micros(11));
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&Timestamp::from_micros(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn clock_ignores_wall_clock_behind_floor() {
        // A floor far in the future simulates the wall clock going backwards.
        let floor = Timestamp::from_micros(i64::MAX / 2);
        let clock = MonotonicClock::starting_after(floor);
        assert_eq!(clock.now(), floor.next());
        assert_eq!(clock.now(), floor.next().next());
    }

    #[test]
    fn clock_unique_across_threads() {
        let clock = Arc::new(MonotonicClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..250).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Timestamp> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
