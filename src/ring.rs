//! Bounded single-producer/single-consumer frame ring.
//!
//! The ring decouples the capture rate from the consumption rate: `push`
//! never blocks and never fails, and when the consumer has not drained a
//! slot before the producer wraps back around to it, the oldest undrained
//! frames are silently overwritten. Staleness is bounded by capacity;
//! memory use is fixed at construction.
//!
//! Cursors are unbounded `u64` counters over a power-of-two slot array.
//! The producer owns the write cursor and only ever writes the slot it is
//! about to claim; the consumer owns the read cursor and validates after
//! copying a slot that the producer has not lapped it mid-read (in which
//! case the copy is discarded and the cursor skips forward to the oldest
//! still-valid frame). The release store on the write cursor publishes the
//! slot contents, so the consumer never observes a partially written frame.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Frame;

struct Shared {
    slots: Box<[UnsafeCell<Frame>]>,
    mask: u64,
    capacity: u64,
    /// Count of completed pushes; slot for push `n` is `n & mask`.
    write: AtomicU64,
    /// Count of completed pops, only ever advanced by the consumer.
    read: AtomicU64,
}

// Slot access follows the SPSC discipline described above; `Frame` is plain
// old data, so a racing copy that fails validation is discarded unharmed.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

/// Producer half of the frame ring. Held by the capture loop.
pub struct RingProducer {
    shared: Arc<Shared>,
}

/// Consumer half of the frame ring. Held by the embedding reader.
pub struct RingConsumer {
    shared: Arc<Shared>,
}

/// Create a ring with `capacity` slots, rounded up to a power of two.
pub fn frame_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let capacity = capacity.max(1).next_power_of_two() as u64;
    let slots = (0..capacity).map(|_| UnsafeCell::new(Frame::default())).collect();
    let shared = Arc::new(Shared {
        slots,
        mask: capacity - 1,
        capacity,
        write: AtomicU64::new(0),
        read: AtomicU64::new(0),
    });
    (RingProducer { shared: Arc::clone(&shared) }, RingConsumer { shared })
}

impl RingProducer {
    /// Append a frame, overwriting the oldest unread slot if the ring is
    /// full. Never blocks, never fails.
    pub fn push(&mut self, frame: Frame) {
        let shared = &*self.shared;
        let w = shared.write.load(Ordering::Relaxed);
        unsafe {
            *shared.slots[(w & shared.mask) as usize].get() = frame;
        }
        shared.write.store(w + 1, Ordering::Release);
    }

    /// Total frames pushed since construction.
    pub fn pushed(&self) -> u64 {
        self.shared.write.load(Ordering::Relaxed)
    }
}

impl RingConsumer {
    /// Remove and return the oldest unread frame, or `None` when the read
    /// cursor has caught up with the write cursor.
    pub fn pop(&mut self) -> Option<Frame> {
        let shared = &*self.shared;
        loop {
            let w = shared.write.load(Ordering::Acquire);
            let mut r = shared.read.load(Ordering::Relaxed);
            if r == w {
                return None;
            }
            if w - r > shared.capacity {
                // producer lapped us; oldest surviving frame is w - capacity
                r = w - shared.capacity;
            }
            let frame = unsafe { *shared.slots[(r & shared.mask) as usize].get() };
            let w_after = shared.write.load(Ordering::Acquire);
            if w_after - r > shared.capacity {
                // slot r was overwritten while we copied it; try again
                continue;
            }
            shared.read.store(r + 1, Ordering::Release);
            return Some(frame);
        }
    }

    /// Number of frames currently readable (capped at capacity).
    pub fn len(&self) -> usize {
        let shared = &*self.shared;
        let w = shared.write.load(Ordering::Acquire);
        let r = shared.read.load(Ordering::Relaxed);
        (w - r).min(shared.capacity) as usize
    }

    /// Whether the ring currently holds no readable frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot capacity of the ring.
    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }
}

impl std::fmt::Debug for RingProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingProducer").field("pushed", &self.pushed()).finish()
    }
}

impl std::fmt::Debug for RingConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingConsumer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32) -> Frame {
        Frame::from_wire(id, &id.to_le_bytes()[..4], id as f64)
    }

    #[test]
    fn empty_ring_pops_nothing() {
        let (_tx, mut rx) = frame_ring(8);
        assert!(rx.pop().is_none());
        assert!(rx.is_empty());
    }

    #[test]
    fn push_pop_in_order() {
        let (mut tx, mut rx) = frame_ring(8);
        for id in 1..=5 {
            tx.push(frame(id));
        }
        assert_eq!(rx.len(), 5);
        for id in 1..=5 {
            assert_eq!(rx.pop().unwrap().id, id);
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn overflow_keeps_most_recent_capacity_frames() {
        let (mut tx, mut rx) = frame_ring(8);
        for id in 1..=20 {
            tx.push(frame(id));
        }
        assert_eq!(rx.len(), 8);
        // frames 13..=20 survive, in push order
        for id in 13..=20 {
            assert_eq!(rx.pop().unwrap().id, id);
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn interleaved_overflow_resumes_at_oldest_survivor() {
        let (mut tx, mut rx) = frame_ring(4);
        tx.push(frame(1));
        tx.push(frame(2));
        assert_eq!(rx.pop().unwrap().id, 1);
        // 6 more pushes lap the ring past the read cursor
        for id in 3..=8 {
            tx.push(frame(id));
        }
        assert_eq!(rx.pop().unwrap().id, 5);
        assert_eq!(rx.pop().unwrap().id, 6);
        assert_eq!(rx.pop().unwrap().id, 7);
        assert_eq!(rx.pop().unwrap().id, 8);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let (_tx, rx) = frame_ring(100);
        assert_eq!(rx.capacity(), 128);
        let (_tx, rx) = frame_ring(0);
        assert_eq!(rx.capacity(), 1);
    }

    #[test]
    fn payload_survives_the_trip() {
        let (mut tx, mut rx) = frame_ring(2);
        tx.push(Frame::from_wire(0x42, &[0xDE, 0xAD, 0xBE, 0xEF], 12.5));
        let out = rx.pop().unwrap();
        assert_eq!(out.payload(), &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(out.timestamp, 12.5);
    }
}
