//! CSV output for scope-trace
//!
//! [`CsvSink`] is a [`ScopeCallback`](scope_trace::ScopeCallback) that
//! drains each delivered batch and writes one line per frame:
//!
//! ```text
//! thread_id,frame_id,parent_id,start_cpu_ns,cpu_ns,start_wall_ns,wall_ns,name,comment
//! ```
//!
//! `parent_id` is the caller's frame index within the same thread, so the
//! call tree can be rebuilt from the file alone. The comment column comes
//! from the frame's payload through a pluggable formatter. Quoting follows
//! the `csv` crate's writer.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod error;
pub mod record;
pub mod sink;

pub use error::{CsvResult, CsvSinkError};
pub use record::{
    COLUMNS, default_comment, encode_frames, format_record, frame_record, header, write_frames,
};
pub use sink::CsvSink;
