//! Fenced clock reads
//!
//! Every read is bracketed by sequentially consistent fences so neither the
//! compiler nor the CPU moves timed work across the measurement boundary.

use core::sync::atomic::{Ordering, compiler_fence, fence as atomic_fence};
use core::time::Duration;

use crate::platform;

/// Wall-clock and CPU-time reading taken under one pair of fences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    /// Monotonic wall clock
    pub wall: Duration,
    /// CPU time consumed by the calling thread
    pub cpu: Duration,
}

/// Full sequentially consistent fence, for both compiler and hardware
#[inline]
pub fn fence() {
    compiler_fence(Ordering::SeqCst);
    atomic_fence(Ordering::SeqCst);
}

/// Monotonic wall clock, fenced
#[inline]
pub fn wall_now() -> Duration {
    fence();
    let now = platform::monotonic_now();
    fence();
    now
}

/// CPU time consumed by the calling thread, fenced
#[inline]
pub fn cpu_now() -> Duration {
    fence();
    let now = platform::thread_cpu_now();
    fence();
    now
}

/// Read both clocks between a single pair of fences
#[inline]
pub fn stamp() -> Timestamp {
    fence();
    let wall = platform::monotonic_now();
    let cpu = platform::thread_cpu_now();
    fence();
    Timestamp { wall, cpu }
}

/// Nanoseconds in `d`, saturating at `u64::MAX`
#[inline]
pub fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
