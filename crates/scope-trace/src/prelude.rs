//! Prelude for scope-trace
//!
//! This module re-exports the most commonly used types and macros.
//!
//! # Example
//!
//! ```rust
//! use scope_trace::prelude::*;
//!
//! fn parse(input: &str) -> usize {
//!     trace_function!();
//!     input.len()
//! }
//! # assert_eq!(parse("abc"), 3);
//! ```

pub use crate::{
    BatchPolicy, Frame, FrameTree, Payload, Registry, ScopeArgs, ScopeCallback, ScopeGuard,
    ScopeTraceError, SourceLoc, ThreadContext, ThreadIdentity, TraceConfig, current_thread,
    finish_current_thread, function_name, process, source_loc, trace_function, trace_scope,
};
