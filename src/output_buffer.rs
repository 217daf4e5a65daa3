//! Per-stream output queue gated by flow control.

use std::collections::VecDeque;

use crate::queued_frame::QueuedFrame;

/// Frames waiting to be sent on one stream in one direction, plus that
/// stream's send window.
///
/// Not synchronized; the owning relay guards it with its flow-control lock.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    /// How much DATA the receiver will currently accept. Goes negative when a
    /// SETTINGS change shrinks the initial window below what was already sent.
    window_size: i64,
    queue: VecDeque<QueuedFrame>,
}

impl OutputBuffer {
    pub fn new(window_size: i64) -> Self {
        Self {
            window_size,
            queue: VecDeque::new(),
        }
    }

    pub fn window_size(&self) -> i64 {
        self.window_size
    }

    /// Add `delta` (possibly negative) to the stream window.
    pub fn adjust_window(&mut self, delta: i64) {
        self.window_size += delta;
    }

    pub fn enqueue(&mut self, frame: QueuedFrame) {
        self.queue.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pop frames from the head while they fit under both this stream's
    /// window and `connection_window`, debiting both.
    ///
    /// Stops at the first frame that does not fit, so later frames never
    /// overtake it.
    pub fn emit_eligible_frames(&mut self, connection_window: &mut i64) -> Vec<QueuedFrame> {
        let mut eligible = Vec::new();
        while let Some(front) = self.queue.front() {
            let cost = front.flow_control_size();
            if cost > *connection_window || cost > self.window_size {
                break;
            }
            *connection_window -= cost;
            self.window_size -= cost;
            if let Some(frame) = self.queue.pop_front() {
                eligible.push(frame);
            }
        }
        eligible
    }
}
