//! Process-wide configuration and the table of live thread contexts

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::batch::BatchPolicy;
use crate::callback::{NoopCallback, ScopeCallback};
use crate::clock;
use crate::config::TraceConfig;
use crate::metrics::{TraceCounters, TraceMetrics};
use crate::platform::{self, ThreadIdentity};
use crate::thread::ThreadContext;

/// Configuration shared by a registry and every context it created
///
/// Readers never wait on writers: a scope that already started keeps the
/// enabled flag it saw, and the others pick up whatever value they load.
pub(crate) struct Settings {
    enabled: AtomicBool,
    batch_period_ns: AtomicU64,
    callback: RwLock<Arc<dyn ScopeCallback>>,
    start: Duration,
    counters: TraceCounters,
}

impl Settings {
    pub(crate) fn new(config: &TraceConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            batch_period_ns: AtomicU64::new(config.batch_period_ns),
            callback: RwLock::new(Arc::new(NoopCallback)),
            start: clock::wall_now(),
            counters: TraceCounters::default(),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy::from_period_ns(self.batch_period_ns.load(Ordering::Relaxed))
    }

    pub(crate) fn set_batch_policy(&self, policy: BatchPolicy) {
        self.batch_period_ns
            .store(policy.period_ns(), Ordering::Relaxed);
    }

    pub(crate) fn callback(&self) -> Arc<dyn ScopeCallback> {
        Arc::clone(&self.callback.read())
    }

    pub(crate) fn set_callback(&self, callback: Arc<dyn ScopeCallback>) {
        *self.callback.write() = callback;
    }

    pub(crate) fn start(&self) -> Duration {
        self.start
    }

    pub(crate) fn counters(&self) -> &TraceCounters {
        &self.counters
    }
}

struct ThreadEntry {
    context: Arc<ThreadContext>,
    use_count: usize,
}

/// Process-wide tracing state
///
/// Holds the enabled flag, the batch period, the callback and a
/// use-counted map from OS thread identity to [`ThreadContext`]. Several
/// independently linked copies of the instrumentation can share one
/// registry through [`RegistryLocator`](crate::RegistryLocator); each of
/// them registers the threads it sees, and a context is closed only when
/// the last of them releases it.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use scope_trace::{CollectingCallback, Registry, ScopeArgs, ScopeGuard, SourceLoc};
///
/// let registry = Arc::new(Registry::new());
/// let collector = Arc::new(CollectingCallback::new());
/// registry.set_callback(collector.clone());
/// registry.set_enabled(true);
///
/// let registration = registry.register_current_thread();
/// {
///     let _guard = ScopeGuard::new(
///         ScopeArgs::new(SourceLoc::caller())
///             .name("work")
///             .thread(registration.context().clone()),
///     );
/// }
/// let identity = registration.context().identity();
/// drop(registration);
///
/// assert_eq!(collector.all_frames(identity).len(), 2);
/// ```
pub struct Registry {
    settings: Arc<Settings>,
    threads: Mutex<HashMap<ThreadIdentity, ThreadEntry>>,
}

impl Registry {
    /// Create a disabled registry that delivers at thread stop
    pub fn new() -> Self {
        Self::with_config(&TraceConfig::default())
    }

    /// Create a registry from a configuration
    pub fn with_config(config: &TraceConfig) -> Self {
        let registry = Self {
            settings: Arc::new(Settings::new(config)),
            threads: Mutex::new(HashMap::new()),
        };
        debug!(
            enabled = config.enabled,
            batch_period_ns = config.batch_period_ns,
            "scope trace registry created"
        );
        registry
    }

    /// Apply the enabled flag and batch period of `config`
    pub fn apply_config(&self, config: &TraceConfig) {
        self.set_enabled(config.enabled);
        self.set_batch_policy(BatchPolicy::from_period_ns(config.batch_period_ns));
    }

    /// Enable or disable scopes that start from now on
    pub fn set_enabled(&self, enabled: bool) {
        self.settings.set_enabled(enabled);
    }

    /// Check if new scopes are recorded
    pub fn is_enabled(&self) -> bool {
        self.settings.is_enabled()
    }

    /// Set the batch period in thread CPU time; 0 and 1ns are sentinels
    pub fn set_batch_period(&self, period: Duration) {
        self.set_batch_policy(BatchPolicy::from_period(period));
    }

    /// Set the batch policy
    pub fn set_batch_policy(&self, policy: BatchPolicy) {
        self.settings.set_batch_policy(policy);
    }

    /// Current batch period
    pub fn batch_period(&self) -> Duration {
        self.batch_policy().period()
    }

    /// Current batch policy
    pub fn batch_policy(&self) -> BatchPolicy {
        self.settings.batch_policy()
    }

    /// Deliver after every finished frame
    pub fn flush_every_frame(&self) {
        self.set_batch_policy(BatchPolicy::EveryFrame);
    }

    /// Deliver everything once, when each thread stops
    pub fn flush_at_thread_stop(&self) {
        self.set_batch_policy(BatchPolicy::AtThreadStop);
    }

    /// Install the consumer of finished frames
    pub fn set_callback(&self, callback: Arc<dyn ScopeCallback>) {
        self.settings.set_callback(callback);
    }

    /// Currently installed consumer
    pub fn callback(&self) -> Arc<dyn ScopeCallback> {
        self.settings.callback()
    }

    /// Monotonic wall-clock reading taken at creation
    pub fn start(&self) -> Duration {
        self.settings.start()
    }

    /// Snapshot of the registry counters
    pub fn metrics(&self) -> TraceMetrics {
        self.settings.counters().snapshot()
    }

    /// Return the context for `identity`, creating it on first use
    ///
    /// Every call must be balanced by one [`release`](Self::release).
    /// `thread_start` fires only when the context is new.
    ///
    /// # Panics
    ///
    /// Panics unless called on the thread `identity` names.
    pub fn create_or_get(
        &self,
        identity: ThreadIdentity,
        native_handle: u64,
        name: &str,
    ) -> Arc<ThreadContext> {
        assert_eq!(
            identity,
            ThreadIdentity::current(),
            "thread contexts must be created on their own thread"
        );
        let created = {
            let mut threads = self.threads.lock();
            match threads.entry(identity) {
                Entry::Occupied(mut entry) => {
                    let entry = entry.get_mut();
                    entry.use_count = entry.use_count.saturating_add(1);
                    return Arc::clone(&entry.context);
                }
                Entry::Vacant(slot) => {
                    let context = Arc::new(ThreadContext::new(
                        identity,
                        native_handle,
                        name.to_owned(),
                        Arc::clone(&self.settings),
                    ));
                    slot.insert(ThreadEntry {
                        context: Arc::clone(&context),
                        use_count: 1,
                    });
                    context
                }
            }
        };

        self.settings.counters().record_thread_started();
        debug!(thread = %identity, name, "thread context started");
        self.settings.callback().thread_start(&created);
        created
    }

    /// Drop one use of `identity`'s context, closing it at zero
    ///
    /// Closing runs the final flush and `thread_stop` on the calling
    /// thread. Returns true when the context was closed.
    pub fn release(&self, identity: ThreadIdentity) -> bool {
        let closing = {
            let mut threads = self.threads.lock();
            let Some(entry) = threads.get_mut(&identity) else {
                warn!(thread = %identity, "release of an unregistered thread");
                return false;
            };
            entry.use_count = entry.use_count.saturating_sub(1);
            if entry.use_count > 0 {
                return false;
            }
            threads.remove(&identity).map(|entry| entry.context)
        };

        match closing {
            Some(context) => {
                context.close();
                true
            }
            None => false,
        }
    }

    /// Register the calling thread, released when the handle drops
    pub fn register_current_thread(self: &Arc<Self>) -> ThreadRegistration {
        let identity = ThreadIdentity::current();
        let context = self.create_or_get(
            identity,
            platform::native_thread_handle(),
            &platform::current_thread_name(),
        );
        ThreadRegistration {
            registry: Arc::clone(self),
            context,
            _not_send: PhantomData,
        }
    }

    /// Live context for `identity`, if registered
    pub fn thread(&self, identity: ThreadIdentity) -> Option<Arc<ThreadContext>> {
        self.threads
            .lock()
            .get(&identity)
            .map(|entry| Arc::clone(&entry.context))
    }

    /// Number of registered threads
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Outstanding uses of `identity`'s context, 0 when unregistered
    pub fn use_count(&self, identity: ThreadIdentity) -> usize {
        self.threads
            .lock()
            .get(&identity)
            .map_or(0, |entry| entry.use_count)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("enabled", &self.is_enabled())
            .field("batch_policy", &self.batch_policy())
            .field("threads", &self.thread_count())
            .finish_non_exhaustive()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        for (identity, entry) in self.threads.get_mut().drain() {
            warn!(
                thread = %identity,
                name = entry.context.name(),
                use_count = entry.use_count,
                "thread context still registered when the registry was dropped"
            );
        }
    }
}

/// One use of the calling thread's context
///
/// Dropping it releases the use; the last release closes the context.
/// Tied to the thread it was created on.
pub struct ThreadRegistration {
    registry: Arc<Registry>,
    context: Arc<ThreadContext>,
    _not_send: PhantomData<*const ()>,
}

impl ThreadRegistration {
    /// The registered context
    pub fn context(&self) -> &Arc<ThreadContext> {
        &self.context
    }

    /// The registry the context belongs to
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl fmt::Debug for ThreadRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRegistration")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Drop for ThreadRegistration {
    fn drop(&mut self) {
        self.registry.release(self.context.identity());
    }
}
