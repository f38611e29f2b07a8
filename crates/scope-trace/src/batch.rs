//! When finished frames are handed to the callback

use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Typed view of the batch period
///
/// The period is stored as nanoseconds of thread CPU time, where 0 and 1
/// are sentinels:
///
/// | period | policy                                          |
/// |--------|-------------------------------------------------|
/// | 0      | deliver everything once, at thread stop         |
/// | 1      | deliver after every finished frame              |
/// | N      | deliver once CPU time since the last flush > N  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BatchPolicy {
    /// Period 0
    #[default]
    AtThreadStop,
    /// Period 1
    EveryFrame,
    /// Any longer period
    Every(Duration),
}

impl BatchPolicy {
    /// Decode a period in nanoseconds
    pub fn from_period_ns(ns: u64) -> Self {
        match ns {
            0 => BatchPolicy::AtThreadStop,
            1 => BatchPolicy::EveryFrame,
            n => BatchPolicy::Every(Duration::from_nanos(n)),
        }
    }

    /// Decode a period given as a duration
    pub fn from_period(period: Duration) -> Self {
        Self::from_period_ns(crate::clock::as_nanos(period))
    }

    /// Encode back to nanoseconds
    pub fn period_ns(&self) -> u64 {
        match self {
            BatchPolicy::AtThreadStop => 0,
            BatchPolicy::EveryFrame => 1,
            BatchPolicy::Every(period) => crate::clock::as_nanos(*period).max(2),
        }
    }

    /// Encode back to a duration
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns())
    }

    /// Check whether a frame finishing at CPU time `now` triggers a flush
    #[inline]
    pub fn is_due(&self, last_flush: Duration, now: Duration) -> bool {
        match self {
            BatchPolicy::AtThreadStop => false,
            BatchPolicy::EveryFrame => true,
            BatchPolicy::Every(period) => now > last_flush.saturating_add(*period),
        }
    }
}

impl fmt::Display for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchPolicy::AtThreadStop => f.write_str("at thread stop"),
            BatchPolicy::EveryFrame => f.write_str("every frame"),
            BatchPolicy::Every(period) => write!(f, "every {period:?} of CPU time"),
        }
    }
}
