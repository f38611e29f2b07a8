//! Registry discovery across independently linked modules
//!
//! Statics are not shared between copies of this crate that were linked
//! into different objects of one process. The first copy to initialize
//! creates a [`Registry`] and publishes its address in a record keyed by
//! `(pid, uniquifier)`; later copies find the record and adopt the same
//! registry.
//!
//! A record owns one strong reference to the registry it names, so a
//! published registry cannot be freed while any module can still find it.
//! Adoption and removal both run inside the store's exclusive section: a
//! module either adopts before the record goes away or does not see it.
//! The record is removed by [`RegistryLocator::retire`], or when the last
//! locator holding the registry drops with no other handle left.
//!
//! Discovery is best effort and single-process only. A record that cannot
//! be read, was written by another build, or belongs to an earlier process
//! that had the same pid is treated as absent and overwritten.

use core::fmt;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::TraceConfig;
use crate::error::ScopeTraceError;
use crate::platform;
use crate::registry::Registry;

const RECORD_MAGIC: &str = "scope-trace";
const RECORD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identity of one running process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RendezvousKey {
    /// OS process id
    pub pid: u32,
    /// Distinguishes processes that reused the same pid
    pub uniquifier: u64,
}

impl RendezvousKey {
    /// Create a key from its parts
    pub const fn new(pid: u32, uniquifier: u64) -> Self {
        Self { pid, uniquifier }
    }

    /// Key of the running process
    pub fn current() -> Self {
        Self::new(platform::process_id(), platform::process_uniquifier())
    }

    /// File name of the record in a [`TempDirStore`]
    pub fn file_name(&self) -> String {
        format!("scope_trace_{}_{}", self.pid, self.uniquifier)
    }

    fn encode(&self, address: usize) -> String {
        format!(
            "{RECORD_MAGIC} {RECORD_VERSION} {} {} {address:#x}\n",
            self.pid, self.uniquifier
        )
    }

    fn decode(&self, record: &str) -> Result<usize, ScopeTraceError> {
        let mut fields = record.split_whitespace();
        let mut next = |what: &str| {
            fields
                .next()
                .ok_or_else(|| ScopeTraceError::stale(format!("record is missing {what}")))
        };

        let magic = next("magic")?;
        if magic != RECORD_MAGIC {
            return Err(ScopeTraceError::stale(format!("unknown magic {magic:?}")));
        }
        let version = next("version")?;
        if version != RECORD_VERSION {
            return Err(ScopeTraceError::stale(format!(
                "written by version {version}, this is {RECORD_VERSION}"
            )));
        }
        let pid = next("pid")?;
        let uniquifier = next("uniquifier")?;
        if pid != self.pid.to_string() || uniquifier != self.uniquifier.to_string() {
            return Err(ScopeTraceError::stale(format!(
                "record belongs to process {pid}/{uniquifier}"
            )));
        }
        let address = next("address")?;
        let digits = address.strip_prefix("0x").unwrap_or(address);
        match usize::from_str_radix(digits, 16) {
            Ok(0) | Err(_) => Err(ScopeTraceError::stale(format!("bad address {address:?}"))),
            Ok(address) => Ok(address),
        }
    }
}

impl fmt::Display for RendezvousKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pid, self.uniquifier)
    }
}

/// Key-value store holding rendezvous records
///
/// # Safety
///
/// [`RegistryLocator`] turns the addresses this store returns back into
/// `Arc<Registry>` handles, so an implementation must guarantee:
///
/// - `lookup` returns only an address that `publish` stored under the same
///   key and that `remove` has not cleared since. Anything else, including
///   records that fail [`RendezvousKey`] validation, is reported as absent
///   or stale.
/// - `exclusive` runs `section` while holding off every other `exclusive`
///   call for the same key, from every copy of this crate in the process.
///
/// Records written outside this crate break the first rule. [`TempDirStore`]
/// only accepts files owned by the effective uid, so its directory must not
/// be writable by processes the traced program does not trust.
pub unsafe trait RendezvousStore: Send + Sync {
    /// Address published under `key`
    ///
    /// `Ok(None)` when there is no record; [`ScopeTraceError::StaleRecord`]
    /// when the record exists but does not describe this process.
    fn lookup(&self, key: &RendezvousKey) -> Result<Option<usize>, ScopeTraceError>;

    /// Publish `address` under `key`, replacing any existing record
    fn publish(&self, key: &RendezvousKey, address: usize) -> Result<(), ScopeTraceError>;

    /// Remove the record under `key` if it still names `address`
    fn remove(&self, key: &RendezvousKey, address: usize) -> Result<(), ScopeTraceError>;

    /// Run `section` with every other `exclusive` call for `key` held off
    fn exclusive(
        &self,
        key: &RendezvousKey,
        section: &mut dyn FnMut(),
    ) -> Result<(), ScopeTraceError>;
}

/// Records stored as small files in a directory, by default the OS temp dir
#[derive(Debug, Clone)]
pub struct TempDirStore {
    dir: PathBuf,
}

impl TempDirStore {
    /// Store records in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store records in the OS temp dir
    pub fn system() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `key`
    pub fn path_for(&self, key: &RendezvousKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    fn read(&self, key: &RendezvousKey) -> Result<Option<String>, ScopeTraceError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(record) => {
                check_owner(&path)?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn check_owner(path: &Path) -> Result<(), ScopeTraceError> {
    use std::os::unix::fs::MetadataExt;

    let owner = fs::metadata(path)?.uid();
    // SAFETY: geteuid has no preconditions and cannot fail.
    let me = unsafe { libc::geteuid() };
    if owner == me {
        Ok(())
    } else {
        Err(ScopeTraceError::stale(format!("record owned by uid {owner}")))
    }
}

#[cfg(not(unix))]
fn check_owner(_path: &Path) -> Result<(), ScopeTraceError> {
    Ok(())
}

/// Hold an exclusive `flock` on `dir` while `section` runs
///
/// Every copy of the crate opens its own descriptor, and `flock` locks
/// conflict between descriptors even within one process.
#[cfg(unix)]
fn lock_dir(dir: &Path, section: &mut dyn FnMut()) -> Result<(), ScopeTraceError> {
    use std::os::fd::AsRawFd;

    let handle = fs::File::open(dir)?;
    // SAFETY: the descriptor stays open for as long as `handle` lives.
    if unsafe { libc::flock(handle.as_raw_fd(), libc::LOCK_EX) } != 0 {
        return Err(ScopeTraceError::rendezvous_failed(format!(
            "locking {}: {}",
            dir.display(),
            io::Error::last_os_error()
        )));
    }
    section();
    // Closing the descriptor releases the lock, on unwind too.
    drop(handle);
    Ok(())
}

#[cfg(not(unix))]
fn lock_dir(_dir: &Path, section: &mut dyn FnMut()) -> Result<(), ScopeTraceError> {
    static SECTION: Mutex<()> = parking_lot::const_mutex(());

    let _held = SECTION.lock();
    section();
    Ok(())
}

// SAFETY: `lookup` returns only addresses that decode from a record of this
// crate's version for this process, in a file owned by the effective uid.
// `exclusive` serializes through `flock` on the record directory.
unsafe impl RendezvousStore for TempDirStore {
    fn lookup(&self, key: &RendezvousKey) -> Result<Option<usize>, ScopeTraceError> {
        match self.read(key)? {
            Some(record) => key.decode(&record).map(Some),
            None => Ok(None),
        }
    }

    fn publish(&self, key: &RendezvousKey, address: usize) -> Result<(), ScopeTraceError> {
        fs::create_dir_all(&self.dir)?;
        let staging = self.dir.join(format!(
            ".{}.{}.tmp",
            key.file_name(),
            platform::current_thread_identity()
        ));
        fs::write(&staging, key.encode(address))?;
        if let Err(e) = fs::rename(&staging, self.path_for(key)) {
            if let Err(cleanup) = fs::remove_file(&staging) {
                debug!(path = %staging.display(), error = %cleanup, "staging file left behind");
            }
            return Err(ScopeTraceError::rendezvous_failed(format!(
                "publishing {}: {e}",
                self.path_for(key).display()
            )));
        }
        Ok(())
    }

    fn remove(&self, key: &RendezvousKey, address: usize) -> Result<(), ScopeTraceError> {
        let Some(record) = self.read(key)? else {
            return Ok(());
        };
        if key.decode(&record).ok() != Some(address) {
            return Ok(());
        }
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exclusive(
        &self,
        _key: &RendezvousKey,
        section: &mut dyn FnMut(),
    ) -> Result<(), ScopeTraceError> {
        fs::create_dir_all(&self.dir)?;
        lock_dir(&self.dir, section)
    }
}

/// In-memory store for tests and single-binary hosts
///
/// Its exclusive section is a mutex inside the store, so every module that
/// shares it must share the same instance.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RendezvousKey, String>>,
    section: Mutex<()>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Place raw record text under `key`
    #[cfg(test)]
    pub(crate) fn insert_record(&self, key: RendezvousKey, record: impl Into<String>) {
        self.records.lock().insert(key, record.into());
    }

    /// True when a record exists under `key`
    pub fn contains(&self, key: &RendezvousKey) -> bool {
        self.records.lock().contains_key(key)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when no record exists
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

// SAFETY: records enter the map only through `publish`, and `lookup` decodes
// them against the key. `exclusive` holds the store's own section mutex.
unsafe impl RendezvousStore for MemoryStore {
    fn lookup(&self, key: &RendezvousKey) -> Result<Option<usize>, ScopeTraceError> {
        match self.records.lock().get(key) {
            Some(record) => key.decode(record).map(Some),
            None => Ok(None),
        }
    }

    fn publish(&self, key: &RendezvousKey, address: usize) -> Result<(), ScopeTraceError> {
        self.records.lock().insert(*key, key.encode(address));
        Ok(())
    }

    fn remove(&self, key: &RendezvousKey, address: usize) -> Result<(), ScopeTraceError> {
        let mut records = self.records.lock();
        if records.get(key).and_then(|r| key.decode(r).ok()) == Some(address) {
            records.remove(key);
        }
        Ok(())
    }

    fn exclusive(
        &self,
        _key: &RendezvousKey,
        section: &mut dyn FnMut(),
    ) -> Result<(), ScopeTraceError> {
        let _held = self.section.lock();
        section();
        Ok(())
    }
}

// SAFETY: forwards to `S`, which upholds the contract.
unsafe impl<S: RendezvousStore + ?Sized> RendezvousStore for Arc<S> {
    fn lookup(&self, key: &RendezvousKey) -> Result<Option<usize>, ScopeTraceError> {
        (**self).lookup(key)
    }

    fn publish(&self, key: &RendezvousKey, address: usize) -> Result<(), ScopeTraceError> {
        (**self).publish(key, address)
    }

    fn remove(&self, key: &RendezvousKey, address: usize) -> Result<(), ScopeTraceError> {
        (**self).remove(key, address)
    }

    fn exclusive(
        &self,
        key: &RendezvousKey,
        section: &mut dyn FnMut(),
    ) -> Result<(), ScopeTraceError> {
        (**self).exclusive(key, section)
    }
}

fn address_of(registry: &Arc<Registry>) -> usize {
    Arc::as_ptr(registry).expose_provenance()
}

/// Adopt the registry published at `address`
///
/// # Safety
///
/// `address` must have come from `Arc::into_raw` of a `Registry` whose
/// record still holds that reference, read inside the store's exclusive
/// section that is still held.
unsafe fn adopt(address: usize) -> Arc<Registry> {
    let ptr = core::ptr::with_exposed_provenance::<Registry>(address);
    // SAFETY: the record's reference keeps the allocation alive, and it is
    // only released inside an exclusive section, which the caller holds.
    unsafe { Arc::increment_strong_count(ptr) };
    // SAFETY: the increment above is the strong reference this `Arc` owns.
    unsafe { Arc::from_raw(ptr) }
}

/// Finds or creates the registry shared by every module of this process
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use scope_trace::{MemoryStore, RegistryLocator, RendezvousKey};
///
/// let store = Arc::new(MemoryStore::new());
/// let key = RendezvousKey::new(1, 2);
/// let module_a = RegistryLocator::with_key(store.clone(), key);
/// let module_b = RegistryLocator::with_key(store.clone(), key);
///
/// let a = module_a.locate();
/// let b = module_b.lookup().expect("published by module A");
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub struct RegistryLocator<S: RendezvousStore + 'static> {
    store: Arc<S>,
    key: RendezvousKey,
    config: TraceConfig,
    registry: OnceLock<Arc<Registry>>,
}

impl<S: RendezvousStore + 'static> RegistryLocator<S> {
    /// Locator for the running process
    pub fn new(store: S) -> Self {
        Self::with_key(Arc::new(store), RendezvousKey::current())
    }

    /// Locator for an explicit key over a shared store
    pub fn with_key(store: Arc<S>, key: RendezvousKey) -> Self {
        Self {
            store,
            key,
            config: TraceConfig::default(),
            registry: OnceLock::new(),
        }
    }

    /// Configuration applied if this locator ends up creating the registry
    #[must_use]
    pub fn with_config(mut self, config: TraceConfig) -> Self {
        self.config = config;
        self
    }

    /// Return the shared registry, adopting a published one or creating
    /// and publishing a new one
    ///
    /// Never fails: discovery problems fall back to a local registry.
    pub fn locate(&self) -> Arc<Registry> {
        Arc::clone(self.registry.get_or_init(|| self.create_or_adopt()))
    }

    /// Return the shared registry only if one was already published
    pub fn lookup(&self) -> Result<Arc<Registry>, ScopeTraceError> {
        if let Some(registry) = self.registry.get() {
            return Ok(Arc::clone(registry));
        }
        let mut adopted = Err(ScopeTraceError::NotInitialized);
        self.store.exclusive(&self.key, &mut || {
            adopted = match self.store.lookup(&self.key) {
                // SAFETY: the store contract makes `address` a published
                // registry, and this runs inside the exclusive section.
                Ok(Some(address)) => Ok(unsafe { adopt(address) }),
                Ok(None) => Err(ScopeTraceError::NotInitialized),
                Err(e) => Err(e),
            };
        })?;
        let adopted = adopted?;
        debug!(key = %self.key, "adopted published scope trace registry");
        Ok(Arc::clone(self.registry.get_or_init(|| adopted)))
    }

    /// Remove the record naming this locator's registry and release the
    /// reference it held
    ///
    /// Modules that already adopted the registry keep using it; later
    /// lookups find nothing. A no-op when the record names another registry
    /// or is already gone.
    pub fn retire(&self) -> Result<(), ScopeTraceError> {
        match self.registry.get() {
            Some(registry) => self.release_record(registry, false).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Registry found so far, without touching the store
    pub fn registry(&self) -> Option<&Arc<Registry>> {
        self.registry.get()
    }

    /// Key this locator publishes under
    pub fn key(&self) -> RendezvousKey {
        self.key
    }

    /// Backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    fn create_or_adopt(&self) -> Arc<Registry> {
        let mut found = None;
        let entered = self.store.exclusive(&self.key, &mut || {
            found = Some(self.adopt_or_publish());
        });
        if let Err(e) = entered {
            warn!(
                key = %self.key,
                error = %e,
                "rendezvous unavailable, registry stays local to this module"
            );
        }
        found.unwrap_or_else(|| Arc::new(Registry::with_config(&self.config)))
    }

    /// Runs inside the exclusive section
    fn adopt_or_publish(&self) -> Arc<Registry> {
        match self.store.lookup(&self.key) {
            Ok(Some(address)) => {
                debug!(key = %self.key, "adopted published scope trace registry");
                // SAFETY: the store contract makes `address` a published
                // registry, and the caller holds the exclusive section.
                return unsafe { adopt(address) };
            }
            Ok(None) => {}
            Err(e) => warn!(key = %self.key, error = %e, "replacing unusable rendezvous record"),
        }

        let registry = Arc::new(Registry::with_config(&self.config));
        let owned_by_record = Arc::into_raw(Arc::clone(&registry));
        match self.store.publish(&self.key, owned_by_record.expose_provenance()) {
            Ok(()) => debug!(key = %self.key, "published scope trace registry"),
            Err(e) => {
                warn!(
                    key = %self.key,
                    error = %e,
                    "rendezvous publish failed, registry stays local to this module"
                );
                // SAFETY: nothing was published, so the reference from
                // `into_raw` above is still exclusively ours.
                drop(unsafe { Arc::from_raw(owned_by_record) });
            }
        }
        registry
    }

    /// Remove the record if it names `registry`, then drop its reference
    ///
    /// With `only_if_sole`, the record stays unless this locator and the
    /// record hold the only two references. Adoption happens only inside
    /// the exclusive section, so no new handle can appear meanwhile.
    fn release_record(
        &self,
        registry: &Arc<Registry>,
        only_if_sole: bool,
    ) -> Result<bool, ScopeTraceError> {
        let address = address_of(registry);
        let mut released = Ok(false);
        self.store.exclusive(&self.key, &mut || {
            released = match self.store.lookup(&self.key) {
                Ok(Some(published)) if published == address => {
                    if only_if_sole && Arc::strong_count(registry) > 2 {
                        Ok(false)
                    } else {
                        self.store.remove(&self.key, address).map(|()| {
                            // SAFETY: the record named this registry, so it
                            // held the `into_raw` reference from publishing.
                            // It is gone now, and `registry` keeps the count
                            // above zero.
                            unsafe { Arc::decrement_strong_count(Arc::as_ptr(registry)) };
                            true
                        })
                    }
                }
                Ok(_) | Err(ScopeTraceError::StaleRecord(_)) => Ok(false),
                Err(e) => Err(e),
            };
        })?;
        released
    }
}

impl<S: RendezvousStore + 'static> Drop for RegistryLocator<S> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.get() else {
            return;
        };
        match self.release_record(registry, true) {
            Ok(true) => debug!(key = %self.key, "rendezvous record removed"),
            Ok(false) => {}
            Err(e) => warn!(key = %self.key, error = %e, "failed to remove rendezvous record"),
        }
    }
}

impl<S: RendezvousStore + 'static> fmt::Debug for RegistryLocator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryLocator")
            .field("key", &self.key)
            .field("registry", &self.registry.get())
            .finish_non_exhaustive()
    }
}
