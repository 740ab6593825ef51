//! Wall-clock time of trace events
//!
//! Timestamps are informational: the order of trace events is defined by
//! their sequence number, never by their timestamp. Detector rules must not
//! read them.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Unix epoch, the floor of every trace
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Current wall-clock time, epoch if the clock is before it
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    /// Current time, clamped so it never precedes `previous`
    ///
    /// The collector stamps each event with this so timestamps within one
    /// trace are non-decreasing even if the wall clock steps back.
    pub fn monotonic_after(previous: Timestamp) -> Self {
        Self::now().max(previous)
    }

    /// Timestamp from microseconds since epoch
    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// Microseconds since epoch
    pub const fn as_micros(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_after_never_goes_back() {
        let future = Timestamp::from_micros(u64::MAX - 1);
        assert_eq!(Timestamp::monotonic_after(future), future);
        assert!(Timestamp::monotonic_after(Timestamp::EPOCH) > Timestamp::EPOCH);
    }

    #[test]
    fn test_serializes_as_plain_micros() {
        let ts = Timestamp::from_micros(1_234_567);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1234567");
    }
}
