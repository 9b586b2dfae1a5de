//! Bounded FIFO frame queues.
//!
//! Every queue is owned by exactly one device, protocol or socket. On top of
//! the hard slot bound the queue tracks a byte total with a configurable
//! per-frame overhead charge, which socket queues use for buffer-budget
//! accounting (e.g. transport framing overhead).

use heapless::Deque;

use crate::frame::Frame;

/// Hard bound on the number of frames a queue can hold.
pub const FRAME_QUEUE_DEPTH: usize = 32;

/// An ordered holding area for frames.
pub struct Queue {
    frames: Deque<Frame, FRAME_QUEUE_DEPTH>,
    /// Bytes currently held, including the per-frame overhead charge.
    size: usize,
    /// Soft byte budget; zero means no byte limit.
    max_size: usize,
    /// Bytes charged per frame on top of its buffer capacity.
    overhead: usize,
}

impl Queue {
    pub const fn new() -> Self {
        Self {
            frames: Deque::new(),
            size: 0,
            max_size: 0,
            overhead: 0,
        }
    }

    /// A queue with a soft byte budget and a per-frame overhead charge.
    pub const fn with_limits(max_size: usize, overhead: usize) -> Self {
        Self {
            frames: Deque::new(),
            size: 0,
            max_size,
            overhead,
        }
    }

    /// Appends a frame and reports the new frame count.
    ///
    /// A full queue hands the frame back to the caller unchanged; enqueueing
    /// never frees a frame. The caller stays responsible for discarding it.
    pub fn enqueue(&mut self, frame: Frame) -> core::result::Result<usize, Frame> {
        let cost = self.overhead + frame.buffer_len();
        if self.max_size != 0 && self.size + cost > self.max_size {
            return Err(frame);
        }
        self.frames.push_back(frame)?;
        self.size += cost;
        Ok(self.frames.len())
    }

    /// Removes and returns the oldest frame, if any.
    pub fn dequeue(&mut self) -> Option<Frame> {
        let frame = self.frames.pop_front()?;
        self.size -= self.overhead + frame.buffer_len();
        Some(frame)
    }

    /// Number of frames currently held.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bytes currently held, including per-frame overhead.
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}
