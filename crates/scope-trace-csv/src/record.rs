//! One CSV record per frame
//!
//! Times are nanoseconds. CPU start is thread CPU time; wall start is
//! measured from the registry's process start. Durations rather than stop
//! times keep the numbers short and comparable between runs.

use std::io;

use csv::{StringRecord, Writer};
use scope_trace::clock::as_nanos;
use scope_trace::{Frame, ThreadIdentity};

/// Column names, in record order
pub const COLUMNS: [&str; 9] = [
    "thread_id",
    "frame_id",
    "parent_id",
    "start_cpu_ns",
    "cpu_ns",
    "start_wall_ns",
    "wall_ns",
    "name",
    "comment",
];

/// Comment text for frames whose payload is a `String` or `&'static str`
pub fn default_comment(frame: &Frame) -> String {
    let Some(payload) = frame.payload() else {
        return String::new();
    };
    if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_owned()
    } else {
        String::new()
    }
}

/// Fields of one frame, in [`COLUMNS`] order
pub fn frame_record(thread: ThreadIdentity, frame: &Frame, comment: &str) -> StringRecord {
    let mut record = StringRecord::with_capacity(96, COLUMNS.len());
    record.push_field(&thread.to_string());
    record.push_field(&frame.index().to_string());
    record.push_field(&frame.caller_index().to_string());
    record.push_field(&as_nanos(frame.start_cpu()).to_string());
    record.push_field(&as_nanos(frame.cpu_elapsed()).to_string());
    record.push_field(&as_nanos(frame.start_wall()).to_string());
    record.push_field(&as_nanos(frame.wall_elapsed()).to_string());
    record.push_field(frame.display_name());
    record.push_field(comment);
    record
}

/// Write every frame of one thread's batch, returning the record count
pub fn write_frames<W, C>(
    writer: &mut Writer<W>,
    thread: ThreadIdentity,
    frames: &[Frame],
    comment: C,
) -> csv::Result<usize>
where
    W: io::Write,
    C: Fn(&Frame) -> String,
{
    for frame in frames {
        writer.write_record(&frame_record(thread, frame, &comment(frame)))?;
    }
    Ok(frames.len())
}

fn encode<F>(fill: F) -> csv::Result<Vec<u8>>
where
    F: FnOnce(&mut Writer<Vec<u8>>) -> csv::Result<()>,
{
    let mut writer = Writer::from_writer(Vec::new());
    fill(&mut writer)?;
    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

/// Header line, newline-terminated
pub fn header() -> csv::Result<Vec<u8>> {
    encode(|writer| writer.write_record(COLUMNS))
}

/// Encode a whole batch in memory, so it reaches the output in one write
pub fn encode_frames<C>(
    thread: ThreadIdentity,
    frames: &[Frame],
    comment: C,
) -> csv::Result<Vec<u8>>
where
    C: Fn(&Frame) -> String,
{
    encode(|writer| write_frames(writer, thread, frames, comment).map(drop))
}

/// Render one frame as a newline-terminated record
pub fn format_record(
    thread: ThreadIdentity,
    frame: &Frame,
    comment: &str,
) -> csv::Result<String> {
    let bytes = encode(|writer| writer.write_record(&frame_record(thread, frame, comment)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
