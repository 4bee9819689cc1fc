//! TIME_WAIT expiry queue (spec §4.3.3).
//!
//! Grounded on `examples/original_source/lib/sessionmanager.c`'s
//! `time_wait_queue`: a bounded ring of `(flow, enqueue_second)` pairs,
//! swept from the bottom for expiry, with a linear-scan "null the slot"
//! early-release path for a 5-tuple that gets reused before its 60 s
//! grace period elapses. Reuses [`RingQueue`] per spec §9's "ring queue
//! reuse" note; fixed capacity rather than the source's growable array,
//! since spec §4.3.3 states the queue is bounded.

use crate::flow::FlowId;
use crate::ring::RingQueue;

/// One TIME_WAIT slot. `None` once [`TimeWaitQueue::free_early`] has
/// released it ahead of its natural expiry.
type Slot = (Option<FlowId>, u32);

pub struct TimeWaitQueue {
    ring: RingQueue<Slot>,
}

impl TimeWaitQueue {
    pub fn new(capacity: usize) -> TimeWaitQueue {
        TimeWaitQueue {
            ring: RingQueue::fixed(capacity),
        }
    }

    /// Enqueues `id`, entering TIME_WAIT at `now`. Returns `false` if the
    /// queue is at capacity — callers are expected to log this (spec §7
    /// "Recoverable structural": overflow is logged, not silently
    /// corrupted).
    pub fn add(&mut self, id: FlowId, now: u32) -> bool {
        self.ring.push_back((Some(id), now)).is_ok()
    }

    /// Pops every slot whose enqueue time is more than `duration` seconds
    /// before `now`, returning the flows that are still live (not already
    /// released by [`TimeWaitQueue::free_early`]) for the caller to
    /// destroy.
    pub fn free_expired(&mut self, now: u32, duration: u32) -> Vec<FlowId> {
        self.ring
            .pop_front_while(|&(_, enqueued)| now.saturating_sub(enqueued) > duration)
            .filter_map(|(id, _)| id)
            .collect()
    }

    /// Finds the slot matching `id` and nulls it, so a new SYN on the
    /// same 5-tuple does not have to wait for natural expiry. Returns
    /// `true` if a matching live slot was found (the caller should then
    /// destroy the flow immediately).
    pub fn free_early(&mut self, id: &FlowId) -> bool {
        for slot in self.ring.iter_mut() {
            if slot.0 == Some(*id) {
                slot.0 = None;
                return true;
            }
        }
        false
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
