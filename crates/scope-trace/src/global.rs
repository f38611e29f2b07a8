//! Process-wide registry and the calling thread's registration
//!
//! The process registry is found through a [`TempDirStore`] keyed by the
//! running process, so every copy of this crate linked into the process
//! shares it. Its configuration is read from the environment on first
//! use (see [`TraceConfig::from_env`]).

use std::cell::RefCell;
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::config::TraceConfig;
use crate::error::ScopeTraceError;
use crate::platform;
use crate::registry::{Registry, ThreadRegistration};
use crate::rendezvous::{RegistryLocator, RendezvousStore, TempDirStore};
use crate::thread::ThreadContext;

static PROCESS: OnceLock<RegistryLocator<TempDirStore>> = OnceLock::new();

thread_local! {
    static CURRENT: RefCell<Option<ThreadRegistration>> = const { RefCell::new(None) };
}

extern "C" fn retire_at_exit() {
    if let Some(locator) = PROCESS.get() {
        retire_or_warn(locator);
    }
}

/// Retire `locator`, logging a failure instead of returning it
fn retire_or_warn<S: RendezvousStore + 'static>(locator: &RegistryLocator<S>) -> bool {
    match locator.retire() {
        Ok(()) => true,
        Err(e) => {
            warn!(
                key = %locator.key(),
                error = %e,
                "failed to remove rendezvous record at exit"
            );
            false
        }
    }
}

fn locator() -> &'static RegistryLocator<TempDirStore> {
    PROCESS.get_or_init(|| {
        let config = TraceConfig::from_env().unwrap_or_else(|e| {
            warn!(error = %e, "ignoring scope trace environment");
            TraceConfig::default()
        });
        let store = TempDirStore::new(config.rendezvous_dir_or_temp());
        if !platform::register_at_exit(retire_at_exit) {
            debug!("no exit hook; rendezvous record outlives the process");
        }
        RegistryLocator::new(store).with_config(config)
    })
}

/// The registry shared by every module of this process
///
/// Adopts a published registry or creates and publishes one. Call it on
/// the main thread before spawning instrumented threads so all of them
/// agree on the configuration.
pub fn process() -> Arc<Registry> {
    locator().locate()
}

/// The shared registry, only if some module already created it
pub fn try_process() -> Result<Arc<Registry>, ScopeTraceError> {
    locator().lookup()
}

/// Context of the calling thread in the process registry
///
/// Registers the thread on first use; the registration is released when
/// the thread exits or on [`finish_current_thread`]. Fails with
/// [`ScopeTraceError::ThreadUnavailable`] while thread-local storage is
/// being torn down or while the thread is being registered (for example
/// from inside a `thread_start` hook).
pub fn current_thread() -> Result<Arc<ThreadContext>, ScopeTraceError> {
    CURRENT
        .try_with(|slot| {
            if let Ok(slot) = slot.try_borrow() {
                if let Some(registration) = slot.as_ref() {
                    return Ok(Arc::clone(registration.context()));
                }
            }
            let mut slot = slot
                .try_borrow_mut()
                .map_err(|_| ScopeTraceError::ThreadUnavailable)?;
            let registration = slot.insert(process().register_current_thread());
            Ok(Arc::clone(registration.context()))
        })
        .map_err(|_| ScopeTraceError::ThreadUnavailable)?
}

/// Close the calling thread's context now
///
/// Needed for threads whose thread-local destructors never run, such as
/// the main thread. A later scope on this thread registers it afresh.
pub fn finish_current_thread() -> Result<(), ScopeTraceError> {
    let registration = CURRENT
        .try_with(|slot| {
            slot.try_borrow_mut()
                .map(|mut slot| slot.take())
                .map_err(|_| ScopeTraceError::ThreadUnavailable)
        })
        .map_err(|_| ScopeTraceError::ThreadUnavailable)??;
    drop(registration);
    Ok(())
}
