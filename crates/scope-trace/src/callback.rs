//! Consumers of finished frames
//!
//! All three hooks run on the thread that owns the context, never
//! concurrently with that thread's own scope entry or exit. A hook that
//! blocks or panics stalls or unwinds the instrumented thread.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::frame::Frame;
use crate::platform::ThreadIdentity;
use crate::thread::ThreadContext;

/// Receives one thread's frames in batches
///
/// Frames stay in the context's finished buffer until a hook calls
/// [`ThreadContext::drain_finished`]. Anything still there after
/// [`thread_stop`](ScopeCallback::thread_stop) returns is discarded.
pub trait ScopeCallback: Send + Sync {
    /// Called once when a context is created, after its root frame started
    fn thread_start(&self, thread: &ThreadContext) {
        let _ = thread;
    }

    /// Called whenever the batch policy triggers while the thread runs
    fn thread_in_situ(&self, thread: &ThreadContext) {
        let _ = thread;
    }

    /// Called once at teardown, after the root frame closed and the
    /// final in-situ flush (if due) ran
    fn thread_stop(&self, thread: &ThreadContext) {
        let _ = thread;
    }
}

/// Callback that ignores every hook
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

impl ScopeCallback for NoopCallback {}

/// Everything delivered for one thread
#[derive(Debug, Clone, Default)]
pub struct ThreadRecord {
    /// Thread name reported by the context
    pub name: String,
    /// Number of `thread_start` calls
    pub starts: usize,
    /// Number of `thread_stop` calls
    pub stops: usize,
    /// One entry per `thread_in_situ` call, in order
    pub in_situ: Vec<Vec<Frame>>,
    /// Frames drained at `thread_stop`
    pub at_stop: Vec<Frame>,
}

impl ThreadRecord {
    /// Every delivered frame, in delivery order
    pub fn frames(&self) -> Vec<Frame> {
        self.in_situ
            .iter()
            .flatten()
            .chain(self.at_stop.iter())
            .cloned()
            .collect()
    }

    /// Number of non-empty deliveries
    pub fn deliveries(&self) -> usize {
        let in_situ = self.in_situ.iter().filter(|b| !b.is_empty()).count();
        in_situ + usize::from(!self.at_stop.is_empty())
    }
}

/// Callback that keeps every delivered frame in memory
///
/// Drains the finished buffer on both `thread_in_situ` and `thread_stop`.
#[derive(Debug, Default)]
pub struct CollectingCallback {
    threads: Mutex<HashMap<ThreadIdentity, ThreadRecord>>,
}

impl CollectingCallback {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Threads seen so far
    pub fn threads(&self) -> Vec<ThreadIdentity> {
        let mut ids: Vec<_> = self.threads.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of one thread's record
    pub fn record(&self, thread: ThreadIdentity) -> Option<ThreadRecord> {
        self.threads.lock().get(&thread).cloned()
    }

    /// Every frame delivered for `thread`, in delivery order
    pub fn all_frames(&self, thread: ThreadIdentity) -> Vec<Frame> {
        self.record(thread)
            .map(|r| r.frames())
            .unwrap_or_default()
    }

    /// Total `thread_start` calls across threads
    pub fn start_count(&self) -> usize {
        self.threads.lock().values().map(|r| r.starts).sum()
    }

    /// Total `thread_stop` calls across threads
    pub fn stop_count(&self) -> usize {
        self.threads.lock().values().map(|r| r.stops).sum()
    }

    /// Total `thread_in_situ` calls across threads
    pub fn in_situ_count(&self) -> usize {
        self.threads.lock().values().map(|r| r.in_situ.len()).sum()
    }

    /// Forget everything collected so far
    pub fn clear(&self) {
        self.threads.lock().clear();
    }

    fn with_record(&self, thread: &ThreadContext, f: impl FnOnce(&mut ThreadRecord)) {
        let mut threads = self.threads.lock();
        let record = threads
            .entry(thread.identity())
            .or_insert_with(|| ThreadRecord {
                name: thread.name().to_owned(),
                ..ThreadRecord::default()
            });
        f(record);
    }
}

impl ScopeCallback for CollectingCallback {
    fn thread_start(&self, thread: &ThreadContext) {
        self.with_record(thread, |r| r.starts += 1);
    }

    fn thread_in_situ(&self, thread: &ThreadContext) {
        let batch = thread.drain_finished();
        self.with_record(thread, |r| r.in_situ.push(batch));
    }

    fn thread_stop(&self, thread: &ThreadContext) {
        let batch = thread.drain_finished();
        self.with_record(thread, |r| {
            r.stops += 1;
            r.at_stop.extend(batch);
        });
    }
}
