//! Portable clocks for platforms without `clock_gettime`
//!
//! CPU time is approximated by wall time, and thread identities come from
//! a process-local counter, so independently linked copies of the crate
//! do not agree on them.

use core::time::Duration;
use std::cell::Cell;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();
static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

pub(super) fn monotonic_now() -> Duration {
    // Offset by 1ns so a live reading is never the zero "unset" value.
    EPOCH
        .get_or_init(Instant::now)
        .elapsed()
        .saturating_add(Duration::from_nanos(1))
}

pub(super) fn thread_cpu_now() -> Duration {
    monotonic_now()
}

pub(super) fn os_thread_id() -> u64 {
    THREAD_ID
        .try_with(|id| {
            if id.get() == 0 {
                id.set(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
            }
            id.get()
        })
        .unwrap_or(u64::MAX)
}

pub(super) fn native_thread_handle() -> u64 {
    os_thread_id()
}

pub(super) fn process_uniquifier() -> u64 {
    0
}

pub(super) fn register_at_exit(_hook: extern "C" fn()) -> bool {
    false
}
