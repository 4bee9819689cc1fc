//! Packet Records and the per-direction sender record store (spec §3,
//! §4.5).
//!
//! Grounded line-for-line on `examples/original_source/lib/reordering.c`'s
//! `packet_record_t`/`sender_record_t` and their `sender_record_add/
//! ack/find` operations. The array-backed queue with a `lower_idx`/
//! `length` pair becomes a [`RingQueue`](crate::ring::RingQueue) (spec §9
//! "ring queue reuse"); the `missing_link` singly-linked chain becomes
//! `Option<Box<PacketRecord>>`, with Rust's ownership doing the freeing
//! the C version leaves to `packet_record_free_missing_links`.

use crate::ring::RingQueue;

/// One packet's position in a direction's sequence-number timeline
/// (spec §3 "Packet Record").
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub seq: u32,
    pub time: f64,
    pub ip_id: u16,
    pub num_acks: u8,
    /// `true` if this record is a placeholder synthesized for a gap, not
    /// an observed packet.
    pub is_missing: bool,
    /// `true` once a later observation disagreed about how this gap is
    /// segmented. Computed but not consulted by the decision tree — spec
    /// §9 leaves whether any analyzer reports it to the implementer.
    pub is_misaligned: bool,
    /// Ordered sub-chain further subdividing a gap this record stands in
    /// for, as more packets reveal the gap's true segmentation.
    pub missing_link: Option<Box<PacketRecord>>,
}

impl PacketRecord {
    fn real(seq: u32, time: f64, ip_id: u16) -> PacketRecord {
        PacketRecord {
            seq,
            time,
            ip_id,
            num_acks: 0,
            is_missing: false,
            is_misaligned: false,
            missing_link: None,
        }
    }

    fn missing(seq: u32, time: f64) -> PacketRecord {
        PacketRecord {
            seq,
            time,
            ip_id: 0,
            num_acks: 0,
            is_missing: true,
            is_misaligned: false,
            missing_link: None,
        }
    }

    /// Builds a standalone placeholder node for splicing into a
    /// missing-link chain (spec §4.5, placeholder branch).
    pub fn missing_at(seq: u32, time: f64) -> PacketRecord {
        PacketRecord::missing(seq, time)
    }

    /// Inserts `new_link` as this record's immediate missing-link
    /// successor, reattaching whatever this record's chain previously
    /// pointed to below the new node.
    pub fn splice_missing_link(&mut self, mut new_link: PacketRecord) {
        new_link.missing_link = self.missing_link.take();
        self.missing_link = Some(Box::new(new_link));
    }
}

/// One direction's outstanding Packet Records plus the bookkeeping the
/// decision tree and ack path need (spec §4.5 "Per direction holds a
/// ring-expandable array of Packet Records... and `expected_seq`, plus an
/// `in_recovery` flag").
pub struct SenderRecord {
    queue: RingQueue<PacketRecord>,
    pub expected_seq: u32,
    pub in_recovery: bool,
}

impl Default for SenderRecord {
    fn default() -> Self {
        SenderRecord {
            queue: RingQueue::growable(),
            expected_seq: 0,
            in_recovery: false,
        }
    }
}

impl SenderRecord {
    pub fn new() -> SenderRecord {
        SenderRecord::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Appends a real (observed) record. Callers must add in ascending
    /// `seq` order (spec §3 invariant).
    pub fn add_real(&mut self, seq: u32, time: f64, ip_id: u16) {
        let _ = self.queue.push_back(PacketRecord::real(seq, time, ip_id));
    }

    /// Appends a placeholder record for a not-yet-observed gap.
    pub fn add_missing(&mut self, seq: u32, time: f64) {
        let _ = self.queue.push_back(PacketRecord::missing(seq, time));
    }

    /// Finds the greatest record with `seq <= target`, scanning the
    /// contiguous array then down that record's missing-link chain
    /// (spec §4.5).
    pub fn find(&self, target: u32) -> Option<&PacketRecord> {
        let mut found: Option<&PacketRecord> = None;
        for rec in self.queue.iter() {
            if rec.seq > target {
                break;
            }
            found = Some(rec);
        }
        let mut current = found?;
        while let Some(link) = &current.missing_link {
            if link.seq > target {
                break;
            }
            current = link;
        }
        Some(current)
    }

    /// Mutable counterpart of [`SenderRecord::find`], used to splice a new
    /// missing-link node in or flag misalignment on an existing one.
    pub fn find_mut(&mut self, target: u32) -> Option<&mut PacketRecord> {
        let mut idx = None;
        for (i, rec) in self.queue.iter().enumerate() {
            if rec.seq > target {
                break;
            }
            idx = Some(i);
        }
        let mut current = self.queue.get_mut(idx?)?;
        loop {
            let descend = matches!(&current.missing_link, Some(link) if link.seq <= target);
            if !descend {
                break;
            }
            current = current.missing_link.as_mut().expect("checked Some above");
        }
        Some(current)
    }

    /// Acknowledges records up to `ack` (spec §4.5 "Ack processing"):
    /// advances past fully-acked array entries (keeping one sentinel at
    /// the new bottom), then descends the new bottom's missing-link chain
    /// by the same rule, incrementing `num_acks` on the final record. Any
    /// bypassed record — array-level or a missing-link node — is dropped.
    pub fn ack(&mut self, ack: u32) {
        if self.queue.is_empty() {
            return;
        }
        if ack <= self.queue.peek_bottom().expect("checked non-empty").seq {
            return;
        }

        while self.queue.len() > 1 {
            let next_seq = self.queue.get(1).expect("len > 1").seq;
            if ack <= next_seq {
                break;
            }
            self.queue.pop_front();
        }

        let bottom = self.queue.get_mut(0).expect("checked non-empty");

        // Count how many chain hops this ack reaches past: the node `ack`
        // finally lands on is the last one for which `ack` clears the
        // *next* node's seq, mirroring the array-level rule above one
        // level down. Bypassed nodes strictly between `bottom` and the
        // landing node are freed; the landing node itself is kept.
        let mut depth = 0usize;
        let mut cur = &bottom.missing_link;
        while let Some(node) = cur {
            if ack > node.seq {
                depth += 1;
                cur = &node.missing_link;
            } else {
                break;
            }
        }

        for _ in 0..depth.saturating_sub(1) {
            let bypassed = bottom.missing_link.take().expect("depth computed above");
            bottom.missing_link = bypassed.missing_link;
        }

        if depth == 0 {
            bottom.num_acks += 1;
        } else {
            let landing = bottom.missing_link.as_mut().expect("depth >= 1 computed above");
            landing.num_acks += 1;
        }
    }
}
