//! Callback that writes delivered frames as CSV

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use scope_trace::{Frame, ScopeCallback, ThreadContext};
use tracing::{debug, error};

use crate::error::{CsvResult, CsvSinkError};
use crate::record::{default_comment, encode_frames, header};

type CommentFn = dyn Fn(&Frame) -> String + Send + Sync;

/// Writes every batch a registry delivers to one writer
///
/// Drains the thread's finished frames on both `thread_in_situ` and
/// `thread_stop`, so each frame is written exactly once. A batch is
/// encoded with the `csv` crate before the writer is locked and then
/// written in one piece. Write failures are logged and counted; the
/// frames of a failed batch are lost.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use scope_trace::{Registry, ScopeArgs};
/// use scope_trace_csv::CsvSink;
///
/// let sink = Arc::new(CsvSink::new(Vec::new()).with_header()?);
/// let registry = Arc::new(Registry::new());
/// registry.set_callback(sink.clone());
/// registry.set_enabled(true);
///
/// let registration = registry.register_current_thread();
/// drop(ScopeArgs::here().name("work").thread(registration.context().clone()).enter());
/// drop(registration);
///
/// let csv = sink.with_writer(|out| String::from_utf8_lossy(out).into_owned());
/// assert_eq!(csv.lines().count(), 3);
/// # Ok::<(), scope_trace_csv::CsvSinkError>(())
/// ```
pub struct CsvSink<W: Write + Send> {
    writer: Mutex<W>,
    comment: Box<CommentFn>,
    records_written: AtomicU64,
    write_errors: AtomicU64,
}

impl CsvSink<BufWriter<File>> {
    /// Create (or truncate) `path` and write the header line
    pub fn create(path: impl AsRef<Path>) -> CsvResult<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| CsvSinkError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "CSV trace output created");
        Self::new(BufWriter::new(file)).with_header()
    }
}

impl<W: Write + Send> CsvSink<W> {
    /// Sink over `writer`, without a header line
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            comment: Box::new(default_comment),
            records_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        }
    }

    /// Write the header line now
    pub fn with_header(self) -> CsvResult<Self> {
        self.writer.lock().write_all(&header()?)?;
        Ok(self)
    }

    /// Replace the comment column formatter
    #[must_use]
    pub fn with_comment<F>(mut self, comment: F) -> Self
    where
        F: Fn(&Frame) -> String + Send + Sync + 'static,
    {
        self.comment = Box::new(comment);
        self
    }

    /// Write one thread's frames
    pub fn write_batch(&self, thread: &ThreadContext, frames: &[Frame]) -> CsvResult<usize> {
        let encoded = encode_frames(thread.identity(), frames, &self.comment)?;
        self.writer.lock().write_all(&encoded)?;
        self.records_written
            .fetch_add(u64::try_from(frames.len()).unwrap_or(u64::MAX), Ordering::Relaxed);
        Ok(frames.len())
    }

    /// Flush the underlying writer
    pub fn flush(&self) -> CsvResult<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    /// Run `f` with the writer locked
    pub fn with_writer<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.writer.lock())
    }

    /// Flush and return the writer
    pub fn into_inner(self) -> CsvResult<W> {
        let mut writer = self.writer.into_inner();
        writer.flush()?;
        Ok(writer)
    }

    /// Records written so far
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    /// Batches that failed to write
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    fn drain_and_write(&self, thread: &ThreadContext) {
        let frames = thread.drain_finished();
        if frames.is_empty() {
            return;
        }
        if let Err(e) = self.write_batch(thread, &frames) {
            self.write_errors.fetch_add(1, Ordering::Relaxed);
            error!(
                thread = %thread.identity(),
                frames = frames.len(),
                error = %e,
                "failed to write scope trace batch"
            );
        }
    }
}

impl<W: Write + Send> ScopeCallback for CsvSink<W> {
    fn thread_in_situ(&self, thread: &ThreadContext) {
        self.drain_and_write(thread);
    }

    fn thread_stop(&self, thread: &ThreadContext) {
        self.drain_and_write(thread);
        if let Err(e) = self.flush() {
            self.write_errors.fetch_add(1, Ordering::Relaxed);
            error!(thread = %thread.identity(), error = %e, "failed to flush scope trace output");
        }
    }
}

impl<W: Write + Send> fmt::Debug for CsvSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvSink")
            .field("records_written", &self.records_written())
            .field("write_errors", &self.write_errors())
            .finish_non_exhaustive()
    }
}
