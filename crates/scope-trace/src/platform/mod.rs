//! OS clocks and thread/process identities
//!
//! - **Unix**: `clock_gettime` for monotonic wall time and per-thread CPU
//!   time, `gettid` (Linux) / `pthread_self` for thread identity
//! - **Other platforms**: `Instant`-based fallback where CPU time is
//!   approximated by wall time

use core::fmt;
use core::time::Duration;
use std::cell::Cell;

#[cfg(unix)]
mod unix;

#[cfg(not(unix))]
mod fallback;

#[cfg(unix)]
use unix as imp;

#[cfg(not(unix))]
use fallback as imp;

/// Operating-system identity of a thread
///
/// This is the kernel thread id where one exists, so two independently
/// linked copies of this crate agree on it for the same thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadIdentity(u64);

impl ThreadIdentity {
    /// Wrap a raw OS thread id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw OS thread id
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Identity of the calling thread
    #[inline]
    pub fn current() -> Self {
        current_thread_identity()
    }
}

impl fmt::Display for ThreadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

thread_local! {
    static CURRENT_IDENTITY: Cell<u64> = const { Cell::new(0) };
}

/// Identity of the calling thread, cached after the first lookup
#[inline]
pub fn current_thread_identity() -> ThreadIdentity {
    let cached = CURRENT_IDENTITY.try_with(Cell::get).unwrap_or(0);
    if cached != 0 {
        return ThreadIdentity(cached);
    }
    let raw = imp::os_thread_id();
    CURRENT_IDENTITY.try_with(|c| c.set(raw)).ok();
    ThreadIdentity(raw)
}

/// Native handle of the calling thread (`pthread_t` on unix)
pub fn native_thread_handle() -> u64 {
    imp::native_thread_handle()
}

/// Human-readable name of the calling thread
pub fn current_thread_name() -> String {
    match std::thread::current().name() {
        Some(name) => name.to_owned(),
        None => format!("thread-{}", current_thread_identity()),
    }
}

/// Id of the running process
pub fn process_id() -> u32 {
    std::process::id()
}

/// Value distinguishing this process from an earlier one that held the same pid
///
/// On Linux this is the process start time in clock ticks since boot;
/// elsewhere it is 0 and the pid alone keys the rendezvous.
pub fn process_uniquifier() -> u64 {
    imp::process_uniquifier()
}

/// Raw monotonic wall clock
pub(crate) fn monotonic_now() -> Duration {
    imp::monotonic_now()
}

/// Raw CPU time consumed by the calling thread
pub(crate) fn thread_cpu_now() -> Duration {
    imp::thread_cpu_now()
}

/// Run `hook` when the process exits normally
///
/// Returns false when the platform offers no exit hook.
pub(crate) fn register_at_exit(hook: extern "C" fn()) -> bool {
    imp::register_at_exit(hook)
}
