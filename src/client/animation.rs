// Per-context queue of cancelable frame callbacks

use std::collections::BTreeMap;

use crate::models::MetricKind;

/// Identifies one requested frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameHandle(u64);

/// What a frame callback animates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTarget {
    Lane(MetricKind),
}

/// Single-threaded stand-in for a display's animation-frame scheduler: callbacks requested now
/// run at the next frame, in request order, unless canceled first.
#[derive(Debug, Default)]
pub struct FrameQueue {
    next: u64,
    pending: BTreeMap<FrameHandle, FrameTarget>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, target: FrameTarget) -> FrameHandle {
        self.next += 1;
        let handle = FrameHandle(self.next);
        self.pending.insert(handle, target);
        handle
    }

    /// Returns whether the callback was still pending.
    pub fn cancel(&mut self, handle: FrameHandle) -> bool {
        self.pending.remove(&handle).is_some()
    }

    /// Removes and returns every callback due at this frame. Callbacks requested while these run
    /// wait for the next frame.
    pub fn take_due(&mut self) -> Vec<(FrameHandle, FrameTarget)> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
