//! Unix clocks and identities

use core::time::Duration;

fn read_clock(clock: libc::clockid_t) -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, exclusively borrowed timespec for the call.
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    debug_assert_eq!(rc, 0, "clock_gettime({clock}) failed");
    Duration::new(
        u64::try_from(ts.tv_sec).unwrap_or(0),
        u32::try_from(ts.tv_nsec).unwrap_or(0),
    )
}

pub(super) fn monotonic_now() -> Duration {
    read_clock(libc::CLOCK_MONOTONIC)
}

pub(super) fn thread_cpu_now() -> Duration {
    read_clock(libc::CLOCK_THREAD_CPUTIME_ID)
}

#[cfg(target_os = "linux")]
pub(super) fn os_thread_id() -> u64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    u64::try_from(tid).unwrap_or(u64::MAX)
}

#[cfg(not(target_os = "linux"))]
pub(super) fn os_thread_id() -> u64 {
    native_thread_handle()
}

pub(super) fn native_thread_handle() -> u64 {
    // SAFETY: pthread_self has no preconditions.
    let handle = unsafe { libc::pthread_self() };
    handle as usize as u64
}

#[cfg(target_os = "linux")]
pub(super) fn process_uniquifier() -> u64 {
    std::fs::read_to_string("/proc/self/stat")
        .ok()
        .and_then(|stat| parse_start_time(&stat))
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
pub(super) fn process_uniquifier() -> u64 {
    0
}

/// Extract `starttime` (field 22) from a `/proc/<pid>/stat` line
///
/// The command name (field 2) is parenthesised and may itself contain
/// spaces or parentheses, so fields are counted from the last `)`.
#[cfg(target_os = "linux")]
fn parse_start_time(stat: &str) -> Option<u64> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(19)?.parse().ok()
}

pub(super) fn register_at_exit(hook: extern "C" fn()) -> bool {
    // SAFETY: `hook` is a plain `extern "C" fn()` with no captured state.
    let rc = unsafe { libc::atexit(hook) };
    rc == 0
}
