//! Bounded retention of recent audio
//!
//! Raw frames and compressed packets are kept in byte-capped FIFOs. Both
//! queues live behind one lock so the encode worker can drain one and fill
//! the other while a consumer pops packets concurrently.

use crate::audio_buffer::AudioSample;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Retained raw frame
pub type Frame = Vec<AudioSample>;

/// Size charged against a retention ceiling
pub trait ByteSize {
    fn byte_size(&self) -> usize;
}

impl ByteSize for Frame {
    fn byte_size(&self) -> usize {
        self.len() * std::mem::size_of::<AudioSample>()
    }
}

impl ByteSize for Bytes {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

/// FIFO that evicts its oldest entries once a byte ceiling would be exceeded
#[derive(Debug)]
pub struct RetentionQueue<T> {
    items: VecDeque<T>,
    total_bytes: usize,
    ceiling: usize,
    evicted: u64,
}

impl<T: ByteSize> RetentionQueue<T> {
    pub fn new(ceiling: usize) -> Self {
        Self {
            items: VecDeque::new(),
            total_bytes: 0,
            ceiling,
            evicted: 0,
        }
    }

    /// Append `item`, first evicting the fewest oldest entries needed for it
    /// to fit. An item larger than the ceiling on its own is still kept.
    /// Returns the number of entries evicted.
    pub fn append(&mut self, item: T) -> usize {
        let size = item.byte_size();
        let mut evicted = 0;

        while self.total_bytes + size > self.ceiling {
            let Some(oldest) = self.items.pop_front() else {
                break;
            };
            self.total_bytes -= oldest.byte_size();
            evicted += 1;
        }

        self.total_bytes += size;
        self.items.push_back(item);
        self.evicted += evicted as u64;
        evicted
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        self.total_bytes -= item.byte_size();
        Some(item)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.total_bytes = 0;
    }

    /// Remove every entry, oldest first
    pub fn take_all(&mut self) -> VecDeque<T> {
        self.total_bytes = 0;
        std::mem::take(&mut self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Entries evicted since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

struct Retained {
    frames: RetentionQueue<Frame>,
    packets: RetentionQueue<Bytes>,
}

/// Point-in-time view of both queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionSnapshot {
    pub frames: usize,
    pub frame_bytes: usize,
    pub frames_evicted: u64,
    pub packets: usize,
    pub packet_bytes: usize,
    pub packets_evicted: u64,
}

/// Raw and compressed retention queues sharing one lock. Packet consumers
/// block on a condition signalled on every packet push.
pub struct RetentionStore {
    state: Mutex<Retained>,
    packet_ready: Condvar,
}

impl RetentionStore {
    pub fn new(frame_ceiling: usize, packet_ceiling: usize) -> Self {
        Self {
            state: Mutex::new(Retained {
                frames: RetentionQueue::new(frame_ceiling),
                packets: RetentionQueue::new(packet_ceiling),
            }),
            packet_ready: Condvar::new(),
        }
    }

    pub fn retain_frame(&self, frame: Frame) {
        let mut state = self.state.lock();
        let evicted = state.frames.append(frame);
        if evicted > 0 {
            debug!(
                "Evicted {} raw frame(s), retaining {} bytes",
                evicted,
                state.frames.total_bytes()
            );
        }
    }

    /// Atomically remove every retained frame, oldest first
    pub fn take_frames(&self) -> VecDeque<Frame> {
        self.state.lock().frames.take_all()
    }

    /// Queue a packet and wake blocked consumers. An empty packet marks the
    /// end of an encode pass.
    pub fn push_packet(&self, packet: Bytes) {
        let mut state = self.state.lock();
        let evicted = state.packets.append(packet);
        if evicted > 0 {
            debug!("Evicted {} packet(s) under retention ceiling", evicted);
        }
        drop(state);
        self.packet_ready.notify_all();
    }

    pub fn clear_packets(&self) {
        self.state.lock().packets.clear();
    }

    /// Block until a packet is queued, then pop the oldest
    pub fn wait_packet(&self) -> Bytes {
        let mut state = self.state.lock();
        loop {
            if let Some(packet) = state.packets.pop_front() {
                return packet;
            }
            self.packet_ready.wait(&mut state);
        }
    }

    /// Like `wait_packet`, giving up after `timeout`
    pub fn wait_packet_timeout(&self, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(packet) = state.packets.pop_front() {
                return Some(packet);
            }
            if self.packet_ready.wait_until(&mut state, deadline).timed_out() {
                return state.packets.pop_front();
            }
        }
    }

    pub fn snapshot(&self) -> RetentionSnapshot {
        let state = self.state.lock();
        RetentionSnapshot {
            frames: state.frames.len(),
            frame_bytes: state.frames.total_bytes(),
            frames_evicted: state.frames.evicted(),
            packets: state.packets.len(),
            packet_bytes: state.packets.total_bytes(),
            packets_evicted: state.packets.evicted(),
        }
    }
}
