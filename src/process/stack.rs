//! The per-stack unwind state: frames, try frames, and the thrown/caught
//! value slots the dispatch loop checks between instructions.

use std::collections::BTreeMap;

use crate::error::{PanicReason, RuntimeError};
use crate::process::frame::{Frame, PendingFrame};
use crate::value::Value;

/// Maximum call depth before `frame`/`call` raises a stack-overflow
/// exception.
pub const MAX_STACK_DEPTH: usize = 2048;

/// An unwind-protection record: which (tag → catcher block) pairs this
/// try frame handles, and where control resumes if none of them are
/// exercised.
#[derive(Debug, Default)]
pub struct TryFrame {
    pub catchers: BTreeMap<String, String>,
    /// Index into `Stack::frames` of the normal frame this try frame
    /// protects; a frame cannot pop while any try frame naming it is live.
    pub frame_index: usize,
}

impl TryFrame {
    pub fn new(frame_index: usize) -> Self {
        Self {
            catchers: BTreeMap::new(),
            frame_index,
        }
    }
}

/// One execution stack: the main stack, or a watchdog's private stack.
#[derive(Debug, Default)]
pub struct Stack {
    pub frames: Vec<Frame>,
    pub try_frames: Vec<TryFrame>,
    pub pending_frame: Option<PendingFrame>,
    pub thrown: Option<Value>,
    pub caught: Option<Value>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Push `frame`, enforcing the maximum call depth.
    pub fn push_frame(&mut self, frame: Frame) -> Result<(), RuntimeError> {
        if self.frames.len() >= MAX_STACK_DEPTH {
            return Err(PanicReason::StackOverflow.into());
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the current frame, rejecting it while a try frame still
    /// protects it.
    pub fn pop_frame(&mut self) -> Result<Frame, RuntimeError> {
        let index = self.frames.len().checked_sub(1).ok_or(PanicReason::StackUnderflow)?;
        if self.try_frames.iter().any(|tf| tf.frame_index == index) {
            return Err(PanicReason::TryFramePending.into());
        }
        Ok(self.frames.pop().unwrap())
    }

    /// Begin building a pending frame; fails if one is already pending.
    pub fn open_pending_frame(&mut self, argument_count: usize) -> Result<(), RuntimeError> {
        if self.pending_frame.is_some() {
            return Err(PanicReason::FramePending.into());
        }
        self.pending_frame = Some(PendingFrame::new(argument_count));
        Ok(())
    }

    pub fn pending_frame_mut(&mut self) -> Result<&mut PendingFrame, RuntimeError> {
        self.pending_frame.as_mut().ok_or_else(|| PanicReason::FramePending.into())
    }

    pub fn take_pending_frame(&mut self) -> Result<PendingFrame, RuntimeError> {
        self.pending_frame.take().ok_or_else(|| PanicReason::FramePending.into())
    }

    /// Create a new pending try frame, protecting the current frame.
    pub fn open_try_frame(&mut self) -> Result<(), RuntimeError> {
        let index = self.frames.len().checked_sub(1).ok_or(PanicReason::StackUnderflow)?;
        if self.try_frames.last().is_some_and(|tf| tf.frame_index == index && tf.catchers.is_empty()) {
            return Err(PanicReason::TryFramePending.into());
        }
        self.try_frames.push(TryFrame::new(index));
        Ok(())
    }

    pub fn current_try_frame_mut(&mut self) -> Result<&mut TryFrame, RuntimeError> {
        self.try_frames.last_mut().ok_or_else(|| PanicReason::UnmatchedLeaveOrCatch.into())
    }

    /// Pop the innermost try frame (`leave`).
    pub fn pop_try_frame(&mut self) -> Result<TryFrame, RuntimeError> {
        self.try_frames.pop().ok_or_else(|| PanicReason::UnmatchedLeaveOrCatch.into())
    }

    /// Search every live try frame, innermost first, for a catcher whose
    /// tag matches `tag`. On a match the try frame is removed and the
    /// (frame_index, catcher block name) pair returned so the dispatch
    /// loop can unwind frames down to `frame_index` and jump into the
    /// block.
    pub fn find_catcher(&mut self, tag: &str) -> Option<(usize, String)> {
        for i in (0..self.try_frames.len()).rev() {
            if let Some(block) = self.try_frames[i].catchers.get(tag).cloned() {
                let frame_index = self.try_frames[i].frame_index;
                self.try_frames.truncate(i);
                return Some((frame_index, block));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_frame_rejects_while_try_frame_pending() {
        let mut stack = Stack::new();
        stack.push_frame(Frame::new("f", 0, 0, None)).unwrap();
        stack.open_try_frame().unwrap();
        assert!(stack.pop_frame().is_err());
        stack.pop_try_frame().unwrap();
        assert!(stack.pop_frame().is_ok());
    }

    #[test]
    fn find_catcher_matches_innermost_first() {
        let mut stack = Stack::new();
        stack.push_frame(Frame::new("f", 0, 0, None)).unwrap();
        stack.open_try_frame().unwrap();
        stack.current_try_frame_mut().unwrap().catchers.insert("E".to_owned(), "handler".to_owned());
        let found = stack.find_catcher("E").unwrap();
        assert_eq!(found.1, "handler");
        assert!(stack.try_frames.is_empty());
    }

    #[test]
    fn find_catcher_misses_unrelated_tag() {
        let mut stack = Stack::new();
        stack.push_frame(Frame::new("f", 0, 0, None)).unwrap();
        stack.open_try_frame().unwrap();
        stack.current_try_frame_mut().unwrap().catchers.insert("E".to_owned(), "handler".to_owned());
        assert!(stack.find_catcher("Other").is_none());
    }
}
