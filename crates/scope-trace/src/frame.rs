//! One scope's timing and call-tree linkage
//!
//! Frames refer to each other by pre-order index rather than by address,
//! so a frame keeps its place in the tree while it moves from the active
//! stack to the finished buffer and on into a delivered batch.
//!
//! | field                  | meaning                                        |
//! |------------------------|------------------------------------------------|
//! | `index`                | pre-order sequence number within the thread    |
//! | `caller_index`         | parent; the root points at itself (0)          |
//! | `prev_index`           | next-elder sibling, 0 for the eldest child     |
//! | `youngest_child_index` | most recently started child, 0 for none        |

use core::any::Any;
use core::fmt;
use core::time::Duration;

use crate::clock::Timestamp;
use crate::payload::Payload;
use crate::source_loc::SourceLoc;

/// Index of the synthetic root frame of every thread
pub const ROOT_INDEX: usize = 0;

/// A timed scope
#[derive(Debug, Clone)]
pub struct Frame {
    name: &'static str,
    source_loc: SourceLoc,
    payload: Option<Payload>,
    index: usize,
    caller_index: usize,
    prev_index: usize,
    youngest_child_index: usize,
    process_start: Duration,
    start: Timestamp,
    stop: Timestamp,
}

impl Frame {
    pub(crate) fn new(
        index: usize,
        name: &'static str,
        source_loc: SourceLoc,
        payload: Option<Payload>,
        process_start: Duration,
    ) -> Self {
        Self {
            name,
            source_loc,
            payload,
            index,
            caller_index: ROOT_INDEX,
            prev_index: 0,
            youngest_child_index: 0,
            process_start,
            start: Timestamp::default(),
            stop: Timestamp::default(),
        }
    }

    /// Link `child` as the youngest child of `self`
    pub(crate) fn adopt(&mut self, child: &mut Frame) {
        child.caller_index = self.index;
        child.prev_index = self.youngest_child_index;
        self.youngest_child_index = child.index;
    }

    pub(crate) fn start_at(&mut self, at: Timestamp) {
        assert!(!self.is_started(), "frame {} started twice", self.index);
        self.start = at;
    }

    pub(crate) fn stop_at(&mut self, at: Timestamp) {
        assert!(self.is_started(), "frame {} stopped before start", self.index);
        assert!(!self.is_stopped(), "frame {} stopped twice", self.index);
        self.stop = at;
    }

    /// Scope name; empty for the synthetic root and unnamed scopes
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Where the scope was opened
    pub fn source_loc(&self) -> &SourceLoc {
        &self.source_loc
    }

    /// Name, falling back to the enclosing function when empty
    pub fn display_name(&self) -> &'static str {
        if self.name.is_empty() {
            self.source_loc.function()
        } else {
            self.name
        }
    }

    /// Attached payload, if any
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Borrow the payload as `T`
    ///
    /// # Panics
    ///
    /// Panics when the frame has no payload or holds another type.
    #[track_caller]
    pub fn payload_as<T: Any>(&self) -> &T {
        match &self.payload {
            Some(payload) => payload.extract::<T>(),
            None => panic!("frame {} carries no payload", self.index),
        }
    }

    /// Pre-order index within the thread
    pub fn index(&self) -> usize {
        self.index
    }

    /// Index of the parent frame
    pub fn caller_index(&self) -> usize {
        self.caller_index
    }

    /// Index of the next-elder sibling, 0 when this is the eldest child
    pub fn prev_index(&self) -> usize {
        self.prev_index
    }

    /// Index of the most recently started child, 0 when childless
    pub fn youngest_child_index(&self) -> usize {
        self.youngest_child_index
    }

    /// True for the synthetic root frame
    pub fn is_root(&self) -> bool {
        self.index == ROOT_INDEX
    }

    /// True once the start timestamp is set
    pub fn is_started(&self) -> bool {
        self.start.wall != Duration::ZERO
    }

    /// True once the stop timestamp is set
    pub fn is_stopped(&self) -> bool {
        self.stop.wall != Duration::ZERO
    }

    /// Wall-clock start, relative to process start
    pub fn start_wall(&self) -> Duration {
        self.start.wall.saturating_sub(self.process_start)
    }

    /// Wall-clock stop, relative to process start
    pub fn stop_wall(&self) -> Duration {
        self.stop.wall.saturating_sub(self.process_start)
    }

    /// Thread CPU time at start
    pub fn start_cpu(&self) -> Duration {
        self.start.cpu
    }

    /// Thread CPU time at stop
    pub fn stop_cpu(&self) -> Duration {
        self.stop.cpu
    }

    /// Wall-clock duration, zero until stopped
    pub fn wall_elapsed(&self) -> Duration {
        if self.is_stopped() {
            self.stop.wall.saturating_sub(self.start.wall)
        } else {
            Duration::ZERO
        }
    }

    /// CPU duration, zero until stopped
    pub fn cpu_elapsed(&self) -> Duration {
        if self.is_stopped() {
            self.stop.cpu.saturating_sub(self.start.cpu)
        } else {
            Duration::ZERO
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame[{}] = {} {} called by frame[{}]",
            self.index, self.name, self.source_loc, self.caller_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(ns: u64) -> Timestamp {
        Timestamp {
            wall: Duration::from_nanos(ns),
            cpu: Duration::from_nanos(ns / 2),
        }
    }

    fn frame(index: usize, name: &'static str) -> Frame {
        Frame::new(
            index,
            name,
            SourceLoc::new("app::work", "src/app.rs", 10),
            None,
            Duration::from_nanos(1_000),
        )
    }

    #[test]
    fn test_adopt_builds_sibling_list() {
        let mut parent = frame(0, "");
        let mut first = frame(1, "first");
        let mut second = frame(2, "second");

        parent.adopt(&mut first);
        assert_eq!(parent.youngest_child_index(), 1);
        assert_eq!(first.prev_index(), 0);

        parent.adopt(&mut second);
        assert_eq!(parent.youngest_child_index(), 2);
        assert_eq!(second.prev_index(), 1);
        assert_eq!(second.caller_index(), 0);
    }

    #[test]
    fn test_times_are_relative_to_process_start() {
        let mut f = frame(3, "timed");
        assert_eq!(f.start_wall(), Duration::ZERO);
        assert_eq!(f.wall_elapsed(), Duration::ZERO);

        f.start_at(stamp(1_500));
        f.stop_at(stamp(4_000));

        assert_eq!(f.start_wall(), Duration::from_nanos(500));
        assert_eq!(f.stop_wall(), Duration::from_nanos(3_000));
        assert_eq!(f.wall_elapsed(), Duration::from_nanos(2_500));
        assert_eq!(f.cpu_elapsed(), Duration::from_nanos(1_250));
    }

    #[test]
    #[should_panic(expected = "started twice")]
    fn test_double_start_panics() {
        let mut f = frame(1, "x");
        f.start_at(stamp(10));
        f.start_at(stamp(20));
    }

    #[test]
    #[should_panic(expected = "stopped before start")]
    fn test_stop_before_start_panics() {
        let mut f = frame(1, "x");
        f.stop_at(stamp(10));
    }

    #[test]
    #[should_panic(expected = "stopped twice")]
    fn test_double_stop_panics() {
        let mut f = frame(1, "x");
        f.start_at(stamp(10));
        f.stop_at(stamp(20));
        f.stop_at(stamp(30));
    }

    #[test]
    fn test_payload_as() {
        let f = Frame::new(
            1,
            "with payload",
            SourceLoc::default(),
            Some(Payload::new(42u16)),
            Duration::ZERO,
        );
        assert_eq!(*f.payload_as::<u16>(), 42);
    }

    #[test]
    fn test_display_name_falls_back_to_function() {
        assert_eq!(frame(1, "").display_name(), "app::work");
        assert_eq!(frame(1, "named").display_name(), "named");
    }

    #[test]
    fn test_display() {
        let mut f = frame(4, "leaf");
        let mut parent = frame(2, "mid");
        parent.adopt(&mut f);
        assert_eq!(
            f.to_string(),
            "frame[4] = leaf src/app.rs:10:app::work called by frame[2]"
        );
    }
}
