//! RAII scope guards

use core::fmt;
use core::marker::PhantomData;
use std::sync::Arc;

use crate::global;
use crate::payload::Payload;
use crate::source_loc::SourceLoc;
use crate::thread::ThreadContext;

/// What a [`ScopeGuard`] records
///
/// Every field is optional: the name defaults to empty, the payload to
/// none, and the thread to the calling thread's context in the process
/// registry.
#[derive(Debug, Clone)]
pub struct ScopeArgs {
    name: &'static str,
    source_loc: SourceLoc,
    payload: Option<Payload>,
    thread: Option<Arc<ThreadContext>>,
}

impl ScopeArgs {
    /// Arguments for a scope opened at `source_loc`
    pub fn new(source_loc: SourceLoc) -> Self {
        Self {
            name: "",
            source_loc,
            payload: None,
            thread: None,
        }
    }

    /// Arguments for a scope opened at the caller's file and line
    #[track_caller]
    pub fn here() -> Self {
        Self::new(SourceLoc::caller())
    }

    /// Name the scope
    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Attach a payload
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Override the source location
    #[must_use]
    pub fn source_loc(mut self, source_loc: SourceLoc) -> Self {
        self.source_loc = source_loc;
        self
    }

    /// Record into an explicit context instead of the process registry's
    ///
    /// The context must belong to the calling thread.
    #[must_use]
    pub fn thread(mut self, thread: Arc<ThreadContext>) -> Self {
        self.thread = Some(thread);
        self
    }

    /// Open the scope
    pub fn enter(self) -> ScopeGuard {
        ScopeGuard::new(self)
    }
}

impl Default for ScopeArgs {
    #[track_caller]
    fn default() -> Self {
        Self::here()
    }
}

/// Records the enclosing scope into its thread's call tree
///
/// Whether the scope is recorded is decided once, at construction, from
/// the registry's enabled flag; toggling the flag afterwards does not
/// affect a live guard. The guard is neither `Clone` nor `Send`, so the
/// frame it opened is closed exactly once, on the thread that opened it,
/// including when the scope unwinds.
#[must_use = "the scope closes as soon as the guard is dropped"]
pub struct ScopeGuard {
    thread: Option<Arc<ThreadContext>>,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    /// Enter a frame if the target registry is enabled
    pub fn new(args: ScopeArgs) -> Self {
        let ScopeArgs {
            name,
            source_loc,
            payload,
            thread,
        } = args;

        let thread = match thread {
            Some(thread) => thread.is_enabled().then_some(thread),
            None if global::process().is_enabled() => global::current_thread().ok(),
            None => None,
        };

        if let Some(thread) = &thread {
            thread.enter(name, source_loc, payload);
        }
        Self {
            thread,
            _not_send: PhantomData,
        }
    }

    /// A guard that records nothing
    pub fn disabled() -> Self {
        Self {
            thread: None,
            _not_send: PhantomData,
        }
    }

    /// True when this guard opened a frame
    pub fn is_recording(&self) -> bool {
        self.thread.is_some()
    }

    /// Context the frame was opened in
    pub fn thread(&self) -> Option<&Arc<ThreadContext>> {
        self.thread.as_ref()
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.exit();
        }
    }
}
