// SPDX-License-Identifier: MPL-2.0
//! Thread-safe FIFO of compressed units for one elementary stream.
//!
//! The read thread is the only producer and the stream's decode thread the
//! only consumer. A queue starts out aborted and accepts data once
//! [`PacketQueue::start`] arms it; after [`PacketQueue::abort`] every `get`
//! fails immediately until the queue is started again.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use super::packet::Packet;

#[derive(Debug)]
struct QueueState {
    packets: VecDeque<Packet>,
    /// Total payload bytes.
    size: usize,
    /// Total packet duration in seconds.
    duration: f64,
    aborted: bool,
}

#[derive(Debug)]
pub struct PacketQueue {
    state: Mutex<QueueState>,
    packet_available: Condvar,
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketQueue {
    /// Creates an empty, not yet started queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                size: 0,
                duration: 0.0,
                aborted: true,
            }),
            packet_available: Condvar::new(),
        }
    }

    /// Arms the queue so `put` and `get` operate normally.
    pub fn start(&self) {
        self.state.lock().aborted = false;
    }

    /// Appends a unit and wakes the consumer.
    ///
    /// Returns `false` (dropping the unit) when the queue is aborted.
    pub fn put(&self, packet: Packet) -> bool {
        let mut state = self.state.lock();
        if state.aborted {
            return false;
        }
        state.size += packet.size();
        state.duration += packet.duration;
        state.packets.push_back(packet);
        self.packet_available.notify_one();
        true
    }

    /// Appends a discontinuity marker.
    pub fn put_flush_marker(&self, stream_index: usize) -> bool {
        self.put(Packet::flush_marker(stream_index))
    }

    /// Appends an end-of-stream drain marker.
    pub fn put_end_of_stream(&self, stream_index: usize) -> bool {
        self.put(Packet::end_of_stream(stream_index))
    }

    /// Takes the oldest unit, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is aborted.
    pub fn get(&self) -> Option<Packet> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return None;
            }
            if let Some(packet) = state.packets.pop_front() {
                state.size -= packet.size();
                state.duration -= packet.duration;
                if state.packets.is_empty() {
                    state.duration = 0.0;
                }
                return Some(packet);
            }
            self.packet_available.wait(&mut state);
        }
    }

    /// Marks the queue dead and wakes every waiter. Idempotent.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.packet_available.notify_all();
    }

    /// Discards every queued unit. Idempotent.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.packets.clear();
        state.size = 0;
        state.duration = 0.0;
    }

    /// Total payload bytes queued.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    #[must_use]
    pub fn nb_packets(&self) -> usize {
        self.state.lock().packets.len()
    }

    /// Total queued duration in seconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }
}
