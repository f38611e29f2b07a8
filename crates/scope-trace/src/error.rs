//! Scope tracing error types

use core::fmt;

/// Errors surfaced by the scope tracing engine
///
/// Instrumentation contract violations (exit without enter, double start,
/// payload extracted as the wrong type) are not represented here: those
/// are bugs in the host program and panic at the offending call.
#[derive(Debug, thiserror::Error)]
pub enum ScopeTraceError {
    /// No registry has been published for this process yet
    #[error("scope trace registry not initialized: create it on the main thread before first use")]
    NotInitialized,

    /// A rendezvous record exists but does not describe a live registry
    #[error("stale rendezvous record: {0}")]
    StaleRecord(String),

    /// Rendezvous publication or removal failed
    #[error("rendezvous failed: {0}")]
    RendezvousFailed(String),

    /// Filesystem error while touching the rendezvous record
    #[error("rendezvous I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid scope trace configuration: {0}")]
    InvalidConfiguration(String),

    /// A batch of frames that cannot be viewed as one thread's call tree
    #[error("invalid frame tree: {0}")]
    InvalidTree(String),

    /// Thread-local state is being built or has already been destroyed
    #[error("thread context unavailable on this thread")]
    ThreadUnavailable,
}

impl ScopeTraceError {
    /// Check if the caller can carry on after this error
    ///
    /// Discovery anomalies fall back to a local registry; configuration
    /// and tree errors mean the input itself is wrong.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ScopeTraceError::NotInitialized => false,
            ScopeTraceError::StaleRecord(_) => true,
            ScopeTraceError::RendezvousFailed(_) => true,
            ScopeTraceError::Io(_) => true,
            ScopeTraceError::InvalidConfiguration(_) => false,
            ScopeTraceError::InvalidTree(_) => false,
            ScopeTraceError::ThreadUnavailable => true,
        }
    }

    /// Create a stale-record error with context
    pub fn stale(context: impl fmt::Display) -> Self {
        ScopeTraceError::StaleRecord(context.to_string())
    }

    /// Create a rendezvous error with context
    pub fn rendezvous_failed(context: impl fmt::Display) -> Self {
        ScopeTraceError::RendezvousFailed(context.to_string())
    }

    /// Create a configuration error with context
    pub fn invalid_config(context: impl fmt::Display) -> Self {
        ScopeTraceError::InvalidConfiguration(context.to_string())
    }

    /// Create a tree error with context
    pub fn invalid_tree(context: impl fmt::Display) -> Self {
        ScopeTraceError::InvalidTree(context.to_string())
    }
}
