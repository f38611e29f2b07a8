//! Tree view over one thread's frames

use crate::error::ScopeTraceError;
use crate::frame::{Frame, ROOT_INDEX};

/// Call tree reconstructed from a complete batch of one thread's frames
///
/// The batch may arrive in any order (delivery order is completion order)
/// but must hold every index in `0..n` exactly once.
#[derive(Debug, Clone)]
pub struct FrameTree<'a> {
    slots: Vec<&'a Frame>,
}

impl<'a> FrameTree<'a> {
    /// Index a batch by frame index
    pub fn new(frames: &'a [Frame]) -> Result<Self, ScopeTraceError> {
        if frames.is_empty() {
            return Err(ScopeTraceError::invalid_tree("no frames"));
        }
        let mut slots: Vec<Option<&'a Frame>> = vec![None; frames.len()];
        for frame in frames {
            let slot = slots.get_mut(frame.index()).ok_or_else(|| {
                ScopeTraceError::invalid_tree(format!(
                    "index {} out of range for {} frames",
                    frame.index(),
                    frames.len()
                ))
            })?;
            if slot.replace(frame).is_some() {
                return Err(ScopeTraceError::invalid_tree(format!(
                    "index {} appears twice",
                    frame.index()
                )));
            }
        }
        // n frames with n distinct indices below n fill every slot.
        let slots = slots.into_iter().flatten().collect();
        Ok(Self { slots })
    }

    /// Number of frames, the root included
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false: a tree holds at least its root
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The synthetic root
    pub fn root(&self) -> &'a Frame {
        self.slots[ROOT_INDEX]
    }

    /// Frame with pre-order `index`
    pub fn get(&self, index: usize) -> Option<&'a Frame> {
        self.slots.get(index).copied()
    }

    /// Children of `index`, youngest first
    pub fn children(&self, index: usize) -> impl Iterator<Item = &'a Frame> + '_ {
        let youngest = self
            .get(index)
            .map(Frame::youngest_child_index)
            .filter(|&child| child > index)
            .and_then(|child| self.get(child));
        core::iter::successors(youngest, move |frame| {
            let prev = frame.prev_index();
            if prev > index && prev < frame.index() {
                self.get(prev)
            } else {
                None
            }
        })
    }

    /// Ancestors of `index`, parent first, ending at the root
    pub fn ancestors(&self, index: usize) -> impl Iterator<Item = &'a Frame> + '_ {
        let parent = self
            .get(index)
            .filter(|frame| !frame.is_root())
            .and_then(|frame| self.get(frame.caller_index()));
        core::iter::successors(parent, move |frame| {
            if frame.is_root() {
                None
            } else {
                self.get(frame.caller_index())
                    .filter(|caller| caller.index() < frame.index())
            }
        })
    }

    /// Number of ancestors of `index`; the root has depth 0
    pub fn depth(&self, index: usize) -> usize {
        self.ancestors(index).count()
    }

    /// Frames in start order
    pub fn preorder(&self) -> impl Iterator<Item = &'a Frame> + '_ {
        self.slots.iter().copied()
    }

    /// Frames in completion order: every child before its parent,
    /// elder siblings before younger ones
    pub fn postorder(&self) -> Vec<&'a Frame> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack = vec![(ROOT_INDEX, false)];
        while let Some((index, expanded)) = stack.pop() {
            if expanded {
                if let Some(frame) = self.get(index) {
                    out.push(frame);
                }
                continue;
            }
            stack.push((index, true));
            // Youngest-first children pushed in order pop eldest first.
            for child in self.children(index) {
                stack.push((child.index(), false));
            }
        }
        out
    }

    /// Check the structural laws of a delivered batch
    ///
    /// - the root is its own caller
    /// - every other frame's caller precedes it
    /// - every non-root frame appears exactly once in its parent's children
    /// - every frame is started and stopped, stop not before start
    pub fn validate(&self) -> Result<(), ScopeTraceError> {
        let root = self.root();
        if root.caller_index() != ROOT_INDEX {
            return Err(ScopeTraceError::invalid_tree(format!(
                "root points at caller {}",
                root.caller_index()
            )));
        }

        for frame in self.preorder() {
            if !frame.is_started() || !frame.is_stopped() {
                return Err(ScopeTraceError::invalid_tree(format!(
                    "frame {} was not both started and stopped",
                    frame.index()
                )));
            }
            if frame.stop_cpu() < frame.start_cpu() || frame.stop_wall() < frame.start_wall() {
                return Err(ScopeTraceError::invalid_tree(format!(
                    "frame {} stops before it starts",
                    frame.index()
                )));
            }
            if frame.is_root() {
                continue;
            }
            if frame.caller_index() >= frame.index() {
                return Err(ScopeTraceError::invalid_tree(format!(
                    "frame {} has caller {} that does not precede it",
                    frame.index(),
                    frame.caller_index()
                )));
            }
            let seen = self
                .children(frame.caller_index())
                .filter(|sibling| sibling.index() == frame.index())
                .count();
            if seen != 1 {
                return Err(ScopeTraceError::invalid_tree(format!(
                    "frame {} listed {seen} times among the children of {}",
                    frame.index(),
                    frame.caller_index()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::source_loc::SourceLoc;
    use core::time::Duration;

    /// Build a stopped tree from (name, parent) pairs in pre-order.
    fn build(shape: &[(&'static str, usize)]) -> Vec<Frame> {
        let mut frames: Vec<Frame> = Vec::new();
        for (index, (name, parent)) in shape.iter().enumerate() {
            let mut frame = Frame::new(index, name, SourceLoc::default(), None, Duration::ZERO);
            if index != ROOT_INDEX {
                frames[*parent].adopt(&mut frame);
            }
            let t = Duration::from_nanos(u64::try_from(index).unwrap_or(0) + 1);
            frame.start_at(Timestamp { wall: t, cpu: t });
            frames.push(frame);
        }
        let end = Duration::from_secs(1);
        for frame in frames.iter_mut() {
            frame.stop_at(Timestamp { wall: end, cpu: end });
        }
        frames
    }

    fn names<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> Vec<&'static str> {
        frames.into_iter().map(Frame::name).collect()
    }

    #[test]
    fn test_children_and_ancestors() {
        let frames = build(&[("", 0), ("f", 0), ("g", 1), ("h1", 2), ("h2", 2)]);
        let tree = FrameTree::new(&frames).expect("valid batch");

        assert_eq!(names(tree.children(2)), ["h2", "h1"]);
        assert_eq!(names(tree.children(0)), ["f"]);
        assert_eq!(tree.children(3).count(), 0);
        assert_eq!(names(tree.ancestors(4)), ["g", "f", ""]);
        assert_eq!(tree.depth(4), 3);
        assert_eq!(tree.depth(0), 0);
        tree.validate().expect("valid tree");
    }

    #[test]
    fn test_postorder() {
        let frames = build(&[("", 0), ("a", 0), ("a1", 1), ("b", 0), ("b1", 3), ("b2", 3)]);
        let tree = FrameTree::new(&frames).expect("valid batch");
        assert_eq!(names(tree.postorder()), ["a1", "a", "b1", "b2", "b", ""]);
    }

    #[test]
    fn test_accepts_any_order() {
        let mut frames = build(&[("", 0), ("a", 0), ("b", 0)]);
        frames.reverse();
        let tree = FrameTree::new(&frames).expect("valid batch");
        assert_eq!(names(tree.preorder()), ["", "a", "b"]);
    }

    #[test]
    fn test_rejects_gaps_and_duplicates() {
        let frames = build(&[("", 0), ("a", 0), ("b", 0)]);

        let gap = vec![frames[0].clone(), frames[2].clone()];
        assert!(matches!(
            FrameTree::new(&gap),
            Err(ScopeTraceError::InvalidTree(_))
        ));

        let dup = vec![frames[0].clone(), frames[1].clone(), frames[1].clone()];
        assert!(matches!(
            FrameTree::new(&dup),
            Err(ScopeTraceError::InvalidTree(_))
        ));

        assert!(FrameTree::new(&[]).is_err());
    }

    #[test]
    fn test_validate_rejects_unstopped_frame() {
        let mut frames = build(&[("", 0)]);
        let mut open = Frame::new(1, "open", SourceLoc::default(), None, Duration::ZERO);
        frames[0].adopt(&mut open);
        open.start_at(Timestamp {
            wall: Duration::from_nanos(5),
            cpu: Duration::from_nanos(5),
        });
        frames.push(open);

        let tree = FrameTree::new(&frames).expect("dense batch");
        let err = tree.validate().expect_err("open frame");
        assert!(err.to_string().contains("not both started and stopped"));
    }
}
