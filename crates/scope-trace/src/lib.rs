//! Opt-in scope timers with per-thread call trees
//!
//! A [`ScopeGuard`] bound to a block records the block's wall-clock and
//! thread CPU time as a [`Frame`] and links it into its thread's call
//! tree. Finished frames are buffered per thread and handed to a
//! [`ScopeCallback`] in batches, as configured by [`BatchPolicy`].
//!
//! - **Hot path**: entering and leaving a scope touches only the calling
//!   thread's own stack; clock reads are bracketed by full fences
//! - **Tree encoding**: frames link to parent and siblings by pre-order
//!   index, so they can be moved between buffers and serialized as-is
//! - **One registry per process**: copies of this crate linked into
//!   different objects find each other through a [`RegistryLocator`]
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use scope_trace::{CollectingCallback, FrameTree, ThreadIdentity, trace_scope};
//!
//! let collector = Arc::new(CollectingCallback::new());
//! let registry = scope_trace::process();
//! registry.set_callback(collector.clone());
//! registry.set_enabled(true);
//!
//! {
//!     trace_scope!("outer");
//!     {
//!         trace_scope!("inner");
//!     }
//! }
//! scope_trace::finish_current_thread()?;
//!
//! let frames = collector.all_frames(ThreadIdentity::current());
//! let tree = FrameTree::new(&frames)?;
//! tree.validate()?;
//! assert_eq!(tree.len(), 3);
//! # Ok::<(), scope_trace::ScopeTraceError>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod batch;
pub mod callback;
pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod global;
pub mod guard;
pub mod macros;
pub mod metrics;
pub mod payload;
pub mod platform;
pub mod prelude;
pub mod registry;
pub mod rendezvous;
pub mod source_loc;
pub mod thread;
pub mod tree;

pub use batch::BatchPolicy;
pub use callback::{CollectingCallback, NoopCallback, ScopeCallback, ThreadRecord};
pub use config::TraceConfig;
pub use error::ScopeTraceError;
pub use frame::Frame;
pub use global::{current_thread, finish_current_thread, process, try_process};
pub use guard::{ScopeArgs, ScopeGuard};
pub use metrics::{TraceCounters, TraceMetrics};
pub use payload::Payload;
pub use platform::ThreadIdentity;
pub use registry::{Registry, ThreadRegistration};
pub use rendezvous::{MemoryStore, RegistryLocator, RendezvousKey, RendezvousStore, TempDirStore};
pub use source_loc::SourceLoc;
pub use thread::ThreadContext;
pub use tree::FrameTree;
