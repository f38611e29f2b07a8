//! Per-thread call stacks
//!
//! A [`ThreadContext`] holds two pieces of state with different owners:
//!
//! - the active stack and the index counter, touched only by the thread
//!   the context describes, so scope entry and exit take no lock
//! - the finished buffer, shared with whoever drains it and guarded by a
//!   mutex that is never held while a callback runs

use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::batch::BatchPolicy;
use crate::clock;
use crate::frame::Frame;
use crate::payload::Payload;
use crate::platform::ThreadIdentity;
use crate::registry::Settings;
use crate::source_loc::SourceLoc;

struct OwnerState {
    stack: Vec<Frame>,
    next_index: usize,
}

struct Finished {
    frames: Vec<Frame>,
    last_flush_cpu: Duration,
}

/// One thread's active stack and finished buffer
pub struct ThreadContext {
    identity: ThreadIdentity,
    native_handle: u64,
    name: String,
    settings: Arc<Settings>,
    owner: UnsafeCell<OwnerState>,
    owner_busy: Cell<bool>,
    finished: Mutex<Finished>,
    closed: AtomicBool,
}

// SAFETY: `owner` and `owner_busy` are only reached through `with_owner`,
// which asserts that the caller is the thread this context describes and
// that no other borrow of the owner state is live. All remaining fields
// are `Sync` on their own.
unsafe impl Sync for ThreadContext {}

impl ThreadContext {
    /// Build a context for the calling thread and open its root frame
    pub(crate) fn new(
        identity: ThreadIdentity,
        native_handle: u64,
        name: String,
        settings: Arc<Settings>,
    ) -> Self {
        let mut context = Self {
            identity,
            native_handle,
            name,
            settings,
            owner: UnsafeCell::new(OwnerState {
                stack: Vec::new(),
                next_index: 0,
            }),
            owner_busy: Cell::new(false),
            finished: Mutex::new(Finished {
                frames: Vec::new(),
                last_flush_cpu: Duration::ZERO,
            }),
            closed: AtomicBool::new(false),
        };
        context.enter("", SourceLoc::default(), None);
        let root_cpu = context.with_owner(|owner| {
            owner
                .stack
                .first()
                .map(Frame::start_cpu)
                .unwrap_or_default()
        });
        context.finished.get_mut().last_flush_cpu = root_cpu;
        context
    }

    fn with_owner<R>(&self, f: impl FnOnce(&mut OwnerState) -> R) -> R {
        let caller = ThreadIdentity::current();
        assert_eq!(
            caller, self.identity,
            "thread context {} touched from thread {caller}",
            self.identity
        );
        assert!(
            !self.owner_busy.replace(true),
            "re-entrant access to the stack of thread context {}",
            self.identity
        );
        // SAFETY: only the owning thread gets here (checked above) and
        // `owner_busy` rules out a second live borrow on that thread.
        let owner = unsafe { &mut *self.owner.get() };
        let result = f(owner);
        self.owner_busy.set(false);
        result
    }

    /// Open a frame as the youngest child of the current top of stack
    ///
    /// Must be called on the owning thread. Timestamps are taken last.
    ///
    /// # Panics
    ///
    /// Panics when called from another thread or after the context closed.
    pub fn enter(&self, name: &'static str, source_loc: SourceLoc, payload: Option<Payload>) {
        assert!(
            !self.is_closed(),
            "scope entered on closed thread context {}",
            self.identity
        );
        let process_start = self.settings.start();
        self.with_owner(|owner| {
            let mut frame = Frame::new(owner.next_index, name, source_loc, payload, process_start);
            owner.next_index += 1;
            if let Some(parent) = owner.stack.last_mut() {
                parent.adopt(&mut frame);
            }
            owner.stack.push(frame);
            if let Some(top) = owner.stack.last_mut() {
                top.start_at(clock::stamp());
            }
        });
    }

    /// Close the innermost frame and run the batch policy
    ///
    /// Timestamps are taken first. A flush that comes due invokes
    /// [`ScopeCallback::thread_in_situ`](crate::ScopeCallback::thread_in_situ)
    /// before this returns.
    ///
    /// # Panics
    ///
    /// Panics when no user frame is open, or when called from another thread.
    pub fn exit(&self) {
        let now = clock::stamp();
        let closing = self.is_closed();
        let frame = self.with_owner(|owner| {
            // The root frame only closes with the context.
            let popped = if owner.stack.len() > 1 || closing {
                owner.stack.pop()
            } else {
                None
            };
            let Some(mut frame) = popped else {
                panic!("scope exit without matching enter on thread {}", self.identity);
            };
            frame.stop_at(now);
            frame
        });

        let stop_cpu = frame.stop_cpu();
        let policy = self.settings.batch_policy();
        let due = {
            let mut finished = self.finished.lock();
            finished.frames.push(frame);
            let due = policy.is_due(finished.last_flush_cpu, stop_cpu);
            if due {
                finished.last_flush_cpu = stop_cpu;
            }
            due
        };

        if due {
            self.settings.counters().record_in_situ_flush();
            self.settings.callback().thread_in_situ(self);
        }
    }

    /// Take every finished frame, leaving the buffer empty
    ///
    /// Callable from any thread, including from inside a callback hook.
    pub fn drain_finished(&self) -> Vec<Frame> {
        let batch = core::mem::take(&mut self.finished.lock().frames);
        self.settings
            .counters()
            .record_drained(u64::try_from(batch.len()).unwrap_or(u64::MAX));
        batch
    }

    /// Close the root frame, run the final flush and call `thread_stop`
    ///
    /// Idempotent; must run on the owning thread.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let depth = self.with_owner(|owner| owner.stack.len());
        assert_eq!(
            depth, 1,
            "thread context {} closed with {} scopes still open",
            self.identity,
            depth.saturating_sub(1)
        );

        self.exit();

        let recorded = self.with_owner(|owner| owner.next_index);
        self.settings.callback().thread_stop(self);
        self.settings
            .counters()
            .record_thread_stopped(u64::try_from(recorded).unwrap_or(u64::MAX));
        debug!(
            thread = %self.identity,
            name = %self.name,
            frames = recorded,
            "thread context stopped"
        );
    }

    /// OS identity of the owning thread
    pub fn identity(&self) -> ThreadIdentity {
        self.identity
    }

    /// Native handle of the owning thread
    pub fn native_handle(&self) -> u64 {
        self.native_handle
    }

    /// Human-readable thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once `thread_stop` has been issued
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enabled flag of the owning registry
    pub fn is_enabled(&self) -> bool {
        self.settings.is_enabled()
    }

    /// Batch policy currently configured on the owning registry
    pub fn batch_policy(&self) -> BatchPolicy {
        self.settings.batch_policy()
    }

    /// Monotonic wall-clock reading taken when the registry was created
    pub fn process_start(&self) -> Duration {
        self.settings.start()
    }

    /// Open frames, the root included; owning thread only
    pub fn depth(&self) -> usize {
        self.with_owner(|owner| owner.stack.len())
    }

    /// Frames opened so far, the root included; owning thread only
    pub fn frames_started(&self) -> usize {
        self.with_owner(|owner| owner.next_index)
    }

    /// Finished frames waiting to be drained
    pub fn pending(&self) -> usize {
        self.finished.lock().frames.len()
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("identity", &self.identity)
            .field("native_handle", &self.native_handle)
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        if !*self.closed.get_mut() {
            debug!(thread = %self.identity, "thread context dropped without being closed");
        }
        let undelivered = self.finished.get_mut().frames.len();
        if undelivered > 0 {
            warn!(
                thread = %self.identity,
                frames = undelivered,
                "discarding frames that were never drained"
            );
            self.settings
                .counters()
                .record_discarded(u64::try_from(undelivered).unwrap_or(u64::MAX));
        }
    }
}
