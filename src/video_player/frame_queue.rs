// SPDX-License-Identifier: MPL-2.0
//! Fixed-capacity ring of decoded frames.
//!
//! One decode thread writes, one presentation thread reads. The read side
//! keeps the most recently shown frame in the ring so pacing code can compare
//! it with the next candidate:
//!
//! ```text
//!   rindex        rindex + 1      ...       windex
//!  [last shown] [head = peek()] [peek_next()] [free]
//! ```
//!
//! The writer is allowed at most `capacity - 1` unread frames at once, so a
//! full ring still holds the shown frame and a writer never overwrites data
//! the reader has not seen.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::config::MIN_FRAME_QUEUE_SIZE;

/// Frames that remember where in the source they were read from.
pub trait SourcePosition {
    /// Byte offset of the unit this frame was decoded from.
    fn source_position(&self) -> Option<u64>;
}

impl SourcePosition for super::frame::VideoFrame {
    fn source_position(&self) -> Option<u64> {
        self.pos
    }
}

impl SourcePosition for super::frame::AudioFrame {
    fn source_position(&self) -> Option<u64> {
        self.pos
    }
}

#[derive(Debug)]
struct Ring<F> {
    slots: Vec<Option<Arc<F>>>,
    rindex: usize,
    windex: usize,
    /// Occupied slots, including the shown one.
    size: usize,
    /// Whether the slot at `rindex` has already been shown.
    rindex_shown: bool,
    stopped: bool,
}

impl<F> Ring<F> {
    fn unread(&self) -> usize {
        self.size - usize::from(self.rindex_shown)
    }

    fn slot(&self, offset: usize) -> Option<Arc<F>> {
        let index = (self.rindex + offset) % self.slots.len();
        self.slots[index].clone()
    }
}

#[derive(Debug)]
pub struct FrameQueue<F> {
    ring: Mutex<Ring<F>>,
    /// Signalled on every push, pop and stop.
    changed: Condvar,
    capacity: usize,
}

/// Exclusive right to fill the next free slot.
///
/// Obtained from [`FrameQueue::peek_writable`]; consuming it with
/// [`push`](WritableSlot::push) makes the frame readable.
#[must_use = "a writable slot does nothing until a frame is pushed"]
pub struct WritableSlot<'a, F> {
    queue: &'a FrameQueue<F>,
}

impl<F> WritableSlot<'_, F> {
    /// Stores `frame` and advances the write cursor.
    pub fn push(self, frame: F) {
        let mut ring = self.queue.ring.lock();
        let windex = ring.windex;
        ring.slots[windex] = Some(Arc::new(frame));
        ring.windex = (windex + 1) % self.queue.capacity;
        ring.size += 1;
        self.queue.changed.notify_all();
    }
}

impl<F> FrameQueue<F> {
    /// Creates a queue holding up to `capacity` frames.
    ///
    /// Capacities below two are raised to two.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_FRAME_QUEUE_SIZE);
        Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: false,
                stopped: false,
            }),
            changed: Condvar::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for a free slot.
    ///
    /// Returns `None` if the queue is stopped before or while waiting.
    pub fn peek_writable(&self) -> Option<WritableSlot<'_, F>> {
        let mut ring = self.ring.lock();
        while ring.unread() >= self.capacity - 1 && !ring.stopped {
            self.changed.wait(&mut ring);
        }
        if ring.stopped {
            return None;
        }
        Some(WritableSlot { queue: self })
    }

    /// Waits for a free slot and stores `frame` in it.
    ///
    /// Returns `false` (dropping the frame) if the queue was stopped.
    pub fn push_frame(&self, frame: F) -> bool {
        match self.peek_writable() {
            Some(slot) => {
                slot.push(frame);
                true
            }
            None => false,
        }
    }

    /// The oldest unread frame.
    #[must_use]
    pub fn peek(&self) -> Option<Arc<F>> {
        let ring = self.ring.lock();
        if ring.unread() == 0 {
            return None;
        }
        ring.slot(usize::from(ring.rindex_shown))
    }

    /// The frame after the head, once two unread frames exist.
    #[must_use]
    pub fn peek_next(&self) -> Option<Arc<F>> {
        let ring = self.ring.lock();
        if ring.unread() < 2 {
            return None;
        }
        ring.slot(usize::from(ring.rindex_shown) + 1)
    }

    /// The most recently shown frame, or the head if nothing was shown yet.
    #[must_use]
    pub fn peek_last(&self) -> Option<Arc<F>> {
        self.ring.lock().slot(0)
    }

    /// Marks the head as shown, releasing the previously shown frame.
    pub fn pop(&self) {
        let mut ring = self.ring.lock();
        if ring.unread() == 0 {
            return;
        }
        if ring.rindex_shown {
            let rindex = ring.rindex;
            ring.slots[rindex] = None;
            ring.rindex = (rindex + 1) % self.capacity;
            ring.size -= 1;
        } else {
            ring.rindex_shown = true;
        }
        self.changed.notify_all();
    }

    /// Number of frames not yet shown.
    #[must_use]
    pub fn nb_remaining(&self) -> usize {
        self.ring.lock().unread()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nb_remaining() == 0
    }

    /// Whether a frame has been shown since the queue was created.
    #[must_use]
    pub fn rindex_shown(&self) -> bool {
        self.ring.lock().rindex_shown
    }

    /// Unblocks a waiting writer; later `peek_writable` calls fail.
    pub fn stop(&self) {
        let mut ring = self.ring.lock();
        ring.stopped = true;
        self.changed.notify_all();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.ring.lock().stopped
    }
}

impl<F: SourcePosition> FrameQueue<F> {
    /// Source byte position of the frame shown last.
    #[must_use]
    pub fn last_pos(&self) -> Option<u64> {
        let ring = self.ring.lock();
        if !ring.rindex_shown {
            return None;
        }
        ring.slot(0).and_then(|frame| frame.source_position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct TestFrame {
        id: u32,
        pos: Option<u64>,
    }

    impl SourcePosition for TestFrame {
        fn source_position(&self) -> Option<u64> {
            self.pos
        }
    }

    fn frame(id: u32) -> TestFrame {
        TestFrame {
            id,
            pos: Some(u64::from(id) * 100),
        }
    }

    fn id_of(frame: Option<Arc<TestFrame>>) -> Option<u32> {
        frame.map(|f| f.id)
    }

    #[test]
    fn empty_queue_has_nothing_to_read() {
        let queue: FrameQueue<TestFrame> = FrameQueue::new(3);
        assert!(queue.is_empty());
        assert!(queue.peek().is_none());
        assert!(queue.peek_next().is_none());
        assert!(queue.peek_last().is_none());
    }

    #[test]
    fn peek_next_needs_two_unread_frames() {
        let queue = FrameQueue::new(3);
        assert!(queue.push_frame(frame(1)));
        assert_eq!(id_of(queue.peek()), Some(1));
        assert!(queue.peek_next().is_none());

        assert!(queue.push_frame(frame(2)));
        assert_eq!(id_of(queue.peek_next()), Some(2));
    }

    #[test]
    fn pop_keeps_last_shown_frame_readable() {
        let queue = FrameQueue::new(3);
        queue.push_frame(frame(1));
        queue.push_frame(frame(2));

        queue.pop();
        assert!(queue.rindex_shown());
        assert_eq!(id_of(queue.peek_last()), Some(1));
        assert_eq!(id_of(queue.peek()), Some(2));
        assert_eq!(queue.nb_remaining(), 1);

        queue.pop();
        assert_eq!(id_of(queue.peek_last()), Some(2));
        assert!(queue.peek().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_on_empty_queue_is_a_no_op() {
        let queue: FrameQueue<TestFrame> = FrameQueue::new(3);
        queue.pop();
        assert!(!queue.rindex_shown());
    }

    #[test]
    fn writer_blocks_after_capacity_minus_one_unread_frames() {
        let queue = Arc::new(FrameQueue::new(3));
        queue.push_frame(frame(1));
        queue.push_frame(frame(2));

        let pushed = Arc::new(AtomicBool::new(false));
        let writer = {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            thread::spawn(move || {
                let ok = queue.push_frame(frame(3));
                pushed.store(true, Ordering::SeqCst);
                ok
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst), "writer must wait for the reader");
        assert_eq!(id_of(queue.peek()), Some(1));

        queue.pop();
        assert!(writer.join().expect("writer panicked"));
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(id_of(queue.peek()), Some(2));
        assert_eq!(id_of(queue.peek_next()), Some(3));
    }

    #[test]
    fn stop_unblocks_waiting_writer() {
        let queue = Arc::new(FrameQueue::new(2));
        queue.push_frame(frame(1));

        let writer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push_frame(frame(2)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.stop();

        assert!(!writer.join().expect("writer panicked"));
        assert!(queue.peek_writable().is_none());
        assert_eq!(id_of(queue.peek()), Some(1));
    }

    #[test]
    fn ring_wraps_around_many_times() {
        let queue = FrameQueue::new(3);
        for id in 0..20 {
            queue.push_frame(frame(id));
            assert_eq!(id_of(queue.peek()), Some(id));
            queue.pop();
            assert_eq!(id_of(queue.peek_last()), Some(id));
        }
    }

    #[test]
    fn last_pos_follows_shown_frame() {
        let queue = FrameQueue::new(3);
        queue.push_frame(frame(4));
        assert_eq!(queue.last_pos(), None);

        queue.pop();
        assert_eq!(queue.last_pos(), Some(400));
    }

    #[test]
    fn tiny_capacity_is_raised() {
        let queue: FrameQueue<TestFrame> = FrameQueue::new(0);
        assert_eq!(queue.capacity(), MIN_FRAME_QUEUE_SIZE);
    }
}
