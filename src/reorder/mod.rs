//! Reordering Classifier (spec §4.5).
//!
//! Grounded on `examples/original_source/lib/reordering.c`'s
//! `reordering_update` decision tree, generalized over any
//! [`RttEstimator`](crate::rtt::RttEstimator) per spec §9's "RTT
//! dependency injection" note rather than the source's file-scope
//! `rtt_module` pointer.
//!
//! Two deliberate divergences from the literal source, both because
//! spec §4.5 is prescriptive where the source is not:
//! - `min_rtt` tracks the true running minimum of observed
//!   `inside + outside` sums. The source's guard
//!   (`min_rtt < rtt || min_rtt < 0.0`) actually lets `min_rtt` climb
//!   rather than fall, which contradicts both its name and the spec's "0.9
//!   · min_rtt_seen_so_far" text.
//! - Ack processing frees every bypassed missing-link node, not just
//!   array-evicted ones (see [`crate::reorder::record`]).

pub mod record;

use std::any::Any;

use crate::analyzer::{Analyzer, PacketContext};
use crate::rtt::RttEstimator;

use record::SenderRecord;

const RTT_FACTOR: f64 = 0.9;
const RTO_FACTOR: f64 = 2.0;

/// The fixed 12-entry message table (spec §6), exposed verbatim.
pub const MESSAGES: [&str; 12] = [
    "packet in order",
    "sequence number higher than expected",
    "unneeded retransmission (packet record not found)",
    "unneeded retransmission (already acked)",
    "retransmission (cannot find dup acks)",
    "retransmission (IP ID different)",
    "retransmission (time_lag > rto)",
    "retransmission (duplicate acks >= 3)",
    "retransmission (in recovery)",
    "network duplicate",
    "unknown",
    "network reordering",
];

/// Coarse classification of the most recently processed packet (spec
/// §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderingType {
    Inorder,
    High,
    Retransmission,
    NetworkDuplicate,
    NetworkReordering,
    Unknown,
}

/// Snapshot of the scalar fields of a found [`record::PacketRecord`],
/// copied out so later mutations (setting `is_misaligned`, splicing a
/// missing link) don't need to hold a borrow across the lookups that
/// decide whether to perform them.
#[derive(Clone, Copy)]
struct RecordSnapshot {
    seq: u32,
    time: f64,
    ip_id: u16,
    num_acks: u8,
    is_missing: bool,
}

fn snapshot(rec: &record::PacketRecord) -> RecordSnapshot {
    RecordSnapshot {
        seq: rec.seq,
        time: rec.time,
        ip_id: rec.ip_id,
        num_acks: rec.num_acks,
        is_missing: rec.is_missing,
    }
}

/// Per-flow reordering classifier, parameterized over the RTT estimator
/// it is constructed with (spec §4.5, §9).
pub struct ReorderingClassifier<E> {
    rtt: E,
    record: [SenderRecord; 2],
    min_rtt: Option<f64>,
    last_type: ReorderingType,
    last_message: usize,
    last_time_lag: f64,
}

impl<E: RttEstimator + Default> Default for ReorderingClassifier<E> {
    fn default() -> Self {
        ReorderingClassifier {
            rtt: E::default(),
            record: [SenderRecord::new(), SenderRecord::new()],
            min_rtt: None,
            last_type: ReorderingType::Inorder,
            last_message: 0,
            last_time_lag: 0.0,
        }
    }
}

impl<E: RttEstimator> ReorderingClassifier<E> {
    pub fn new(rtt: E) -> ReorderingClassifier<E> {
        ReorderingClassifier {
            rtt,
            record: [SenderRecord::new(), SenderRecord::new()],
            min_rtt: None,
            last_type: ReorderingType::Inorder,
            last_message: 0,
            last_time_lag: 0.0,
        }
    }

    /// The embedded RTT estimator, for analyzer wrappers to feed packets
    /// into ahead of [`ReorderingClassifier::on_packet`].
    pub fn rtt_mut(&mut self) -> &mut E {
        &mut self.rtt
    }

    pub fn get_type(&self) -> ReorderingType {
        self.last_type
    }

    pub fn get_message(&self) -> &'static str {
        MESSAGES[self.last_message]
    }

    pub fn get_time_lag(&self) -> f64 {
        self.last_time_lag
    }

    fn rtt_and_rto(&mut self) -> (Option<f64>, Option<f64>) {
        let (inside, outside) = (self.rtt.inside_rtt(), self.rtt.outside_rtt());
        let (Some(inside), Some(outside)) = (inside, outside) else {
            return (None, None);
        };
        let sum = inside + outside;
        let rto = RTO_FACTOR * sum;
        self.min_rtt = Some(match self.min_rtt {
            Some(m) => m.min(sum),
            None => sum,
        });
        let rtt = RTT_FACTOR * self.min_rtt.expect("just set above");
        (Some(rtt), Some(rto))
    }

    /// Feeds one packet into the classifier (spec §4.5).
    ///
    /// `direction`/`seq`/`payload`/`ip_id`/`time`/`ack` mirror the fields
    /// the spec's decision tree reads directly off the packet; callers
    /// (an [`Analyzer`] wrapper) are responsible for calling
    /// [`ReorderingClassifier::rtt_mut`]'s estimator first.
    #[allow(clippy::too_many_arguments)]
    pub fn on_packet(
        &mut self,
        direction: usize,
        syn: bool,
        seq: u32,
        payload: u32,
        ip_id: u16,
        time: f64,
        ack: u32,
    ) {
        let (rtt, rto) = self.rtt_and_rto();

        self.last_type = ReorderingType::Inorder;
        self.last_message = 0;
        self.last_time_lag = 0.0;

        if syn {
            self.record[direction].expected_seq = seq.wrapping_add(1);
            return;
        }

        if payload > 0 {
            self.classify_data(direction, seq, payload, ip_id, time, rtt, rto);
        }

        let reverse = 1 - direction;
        self.record[reverse].ack(ack);
    }

    #[allow(clippy::too_many_arguments)]
    fn classify_data(
        &mut self,
        direction: usize,
        seq: u32,
        payload: u32,
        ip_id: u16,
        time: f64,
        rtt: Option<f64>,
        rto: Option<f64>,
    ) {
        let expected = self.record[direction].expected_seq;

        if seq > expected {
            self.record[direction].add_missing(expected, time);
            self.record[direction].add_real(seq, time, ip_id);
            self.record[direction].expected_seq = seq.wrapping_add(payload);
            self.record[direction].in_recovery = false;
            self.last_type = ReorderingType::High;
            self.last_message = 1;
            return;
        }

        if seq == expected {
            self.record[direction].add_real(seq, time, ip_id);
            self.record[direction].expected_seq = expected.wrapping_add(payload);
            self.record[direction].in_recovery = false;
            self.last_type = ReorderingType::Inorder;
            self.last_message = 0;
            return;
        }

        self.classify_past(direction, seq, payload, ip_id, time, rtt, rto);
    }

    #[allow(clippy::too_many_arguments)]
    fn classify_past(
        &mut self,
        direction: usize,
        seq: u32,
        payload: u32,
        ip_id: u16,
        time: f64,
        rtt: Option<f64>,
        rto: Option<f64>,
    ) {
        let Some(found) = self.record[direction].find(seq).map(snapshot) else {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 2;
            return;
        };

        let time_lag = time - found.time;
        self.last_time_lag = time_lag;

        if found.num_acks > 0 && found.seq == seq {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 3;
            return;
        }

        let Some(prev) = self.record[direction].find(seq.wrapping_sub(1)).map(snapshot) else {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 4;
            return;
        };
        let dup_acks = prev.num_acks;

        if !found.is_missing {
            self.classify_real(direction, seq, payload, ip_id, time_lag, dup_acks, rtt, rto, found);
        } else {
            self.classify_placeholder(direction, seq, payload, time, time_lag, dup_acks, rtt, rto, found);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn classify_real(
        &mut self,
        direction: usize,
        seq: u32,
        payload: u32,
        ip_id: u16,
        time_lag: f64,
        dup_acks: u8,
        rtt: Option<f64>,
        rto: Option<f64>,
        found: RecordSnapshot,
    ) {
        if let Some(next) = self.record[direction].find(seq.wrapping_add(payload)).map(snapshot) {
            if found.seq != seq || next.seq != seq.wrapping_add(payload) {
                if let Some(rec) = self.record[direction].find_mut(seq) {
                    rec.is_misaligned = true;
                }
                if let Some(rec) = self.record[direction].find_mut(seq.wrapping_add(payload)) {
                    rec.is_misaligned = true;
                }
            }
        }

        if ip_id != found.ip_id {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 5;
            self.record[direction].in_recovery = true;
        } else if rto.is_some_and(|rto| time_lag > rto) {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 6;
            self.record[direction].in_recovery = true;
        } else if dup_acks >= 3 {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 7;
            self.record[direction].in_recovery = true;
        } else if self.record[direction].in_recovery {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 8;
        } else if rtt.is_some_and(|rtt| time_lag < rtt) {
            self.last_type = ReorderingType::NetworkDuplicate;
            self.last_message = 9;
        } else {
            self.last_type = ReorderingType::Unknown;
            self.last_message = 10;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn classify_placeholder(
        &mut self,
        direction: usize,
        seq: u32,
        payload: u32,
        time: f64,
        time_lag: f64,
        dup_acks: u8,
        rtt: Option<f64>,
        rto: Option<f64>,
        found: RecordSnapshot,
    ) {
        let next_seq = seq.wrapping_add(payload);
        let gap_not_yet_subdivided = self.record[direction]
            .find(next_seq)
            .map(|r| r.seq == found.seq)
            .unwrap_or(false);

        if gap_not_yet_subdivided {
            if let Some(rec) = self.record[direction].find_mut(seq) {
                let new_link = record::PacketRecord::missing_at(next_seq, found.time);
                rec.splice_missing_link(new_link);
            }
        }
        let _ = time;

        if dup_acks >= 3 {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 7;
            self.record[direction].in_recovery = true;
        } else if rto.is_some_and(|rto| time_lag > rto) {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 6;
            self.record[direction].in_recovery = true;
        } else if self.record[direction].in_recovery {
            self.last_type = ReorderingType::Retransmission;
            self.last_message = 8;
        } else if rtt.is_some_and(|rtt| time_lag < rtt) {
            self.last_type = ReorderingType::NetworkReordering;
            self.last_message = 11;
        } else {
            self.last_type = ReorderingType::Unknown;
            self.last_message = 10;
        }
    }
}

/// [`Analyzer`] wrapper generic over the embedded RTT estimator type.
pub struct ReorderingAnalyzer<E> {
    _marker: std::marker::PhantomData<E>,
}

impl<E> ReorderingAnalyzer<E> {
    pub fn new() -> ReorderingAnalyzer<E> {
        ReorderingAnalyzer { _marker: std::marker::PhantomData }
    }
}

impl<E> Default for ReorderingAnalyzer<E> {
    fn default() -> Self {
        ReorderingAnalyzer::new()
    }
}

impl<E: RttEstimator + Default + 'static> Analyzer for ReorderingAnalyzer<E> {
    fn create(&self) -> Box<dyn Any> {
        Box::new(ReorderingClassifier::<E>::default())
    }

    fn on_packet(&self, state: &mut dyn Any, ctx: &PacketContext) {
        let Some(classifier) = state.downcast_mut::<ReorderingClassifier<E>>() else {
            return;
        };
        classifier.rtt_mut().update(ctx);
        classifier.on_packet(
            ctx.direction.as_index(),
            ctx.tcp.syn(),
            ctx.tcp.seq_no,
            ctx.payload_len,
            ctx.ip.id,
            ctx.seconds,
            ctx.tcp.ack_no,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtt::HandshakeRtt;

    fn classifier() -> ReorderingClassifier<HandshakeRtt> {
        ReorderingClassifier::new(HandshakeRtt::new())
    }

    #[test]
    fn syn_sets_expected_seq_and_returns_early() {
        let mut c = classifier();
        c.on_packet(0, true, 1000, 0, 0, 0.0, 0);
        assert_eq!(c.record[0].expected_seq, 1001);
        assert_eq!(c.get_type(), ReorderingType::Inorder);
    }

    #[test]
    fn inorder_segment_advances_expected_seq() {
        let mut c = classifier();
        c.on_packet(0, true, 1000, 0, 0, 0.0, 0);
        c.on_packet(0, false, 1001, 100, 7, 0.30, 0);
        assert_eq!(c.get_type(), ReorderingType::Inorder);
        assert_eq!(c.record[0].expected_seq, 1101);
    }

    #[test]
    fn gap_ahead_creates_placeholder_and_reports_high() {
        let mut c = classifier();
        c.on_packet(0, true, 1000, 0, 0, 0.0, 0);
        c.on_packet(0, false, 1201, 100, 1, 0.30, 0);
        assert_eq!(c.get_type(), ReorderingType::High);
        assert_eq!(c.record[0].expected_seq, 1301);
        assert!(c.record[0].find(1001).unwrap().is_missing);
    }

    #[test]
    fn retransmission_of_already_acked_segment_is_message_three() {
        let mut c = classifier();
        c.on_packet(0, true, 1000, 0, 0, 0.0, 0);
        c.on_packet(0, false, 1001, 100, 1, 0.30, 0);
        // B acks the segment back on the reverse direction.
        c.on_packet(1, false, 1, 0, 0, 0.31, 1101);
        // A resends the same bytes.
        c.on_packet(0, false, 1001, 100, 1, 0.40, 0);
        assert_eq!(c.get_message(), "unneeded retransmission (already acked)");
    }

    #[test]
    fn retransmission_not_found_is_message_two() {
        let mut c = classifier();
        c.on_packet(0, true, 1000, 0, 0, 0.0, 0);
        // Nothing recorded yet below expected_seq=1001.
        c.on_packet(0, false, 500, 50, 1, 0.30, 0);
        assert_eq!(c.get_message(), "unneeded retransmission (packet record not found)");
    }

    #[test]
    fn three_dup_acks_trigger_recovery_retransmission() {
        // Spec §8 scenario 2: four segments, then B acks 1, 101, 101, 101,
        // 101 — the predecessor of the retransmitted segment (seq=1)
        // accumulates the dup-acks, not the retransmitted segment itself.
        let mut c = classifier();
        c.on_packet(0, true, 0, 0, 0, 0.0, 0);
        c.on_packet(0, false, 1, 100, 1, 0.00, 0);
        c.on_packet(0, false, 101, 100, 1, 0.01, 0);
        c.on_packet(0, false, 201, 100, 1, 0.02, 0);
        c.on_packet(0, false, 301, 100, 1, 0.03, 0);
        c.on_packet(1, false, 1, 0, 0, 0.005, 1);
        c.on_packet(1, false, 1, 0, 0, 0.015, 101);
        c.on_packet(1, false, 1, 0, 0, 0.025, 101);
        c.on_packet(1, false, 1, 0, 0, 0.035, 101);
        c.on_packet(1, false, 1, 0, 0, 0.038, 101);
        // A retransmits seq=101 before RTO.
        c.on_packet(0, false, 101, 100, 1, 0.04, 0);
        assert_eq!(c.get_message(), "retransmission (duplicate acks >= 3)");
        assert!(c.record[0].in_recovery);
    }

    #[test]
    fn ack_advances_reverse_direction_record() {
        let mut c = classifier();
        c.on_packet(0, true, 1000, 0, 0, 0.0, 0);
        c.on_packet(0, false, 1001, 100, 1, 0.00, 0);
        c.on_packet(1, false, 1, 0, 0, 0.01, 1101);
        assert_eq!(c.record[0].find(1001).unwrap().num_acks, 1);
    }

    /// Spec §8 scenario 3: an identical copy of a segment that has not yet
    /// been acked arrives within RTT. `classify_real`'s branch order means
    /// this lands on message 9 only while `num_acks == 0` — once the
    /// segment is acked (`num_acks > 0`) an exact-seq repeat hits message 3
    /// first, covered by `retransmission_of_already_acked_segment_is_message_three`.
    #[test]
    fn network_duplicate_detected_for_unacked_repeat() {
        let mut c = classifier();
        c.rtt_mut().on_packet(0, true, false, 0.00);
        c.rtt_mut().on_packet(1, true, true, 0.05);
        c.rtt_mut().on_packet(0, false, true, 0.10);

        c.on_packet(0, true, 1000, 0, 0, 0.0, 0);
        c.on_packet(0, false, 1001, 100, 5, 0.30, 0);
        c.on_packet(0, false, 1101, 100, 5, 0.31, 0);
        // The second segment's bytes arrive again, unacked, well inside RTT.
        c.on_packet(0, false, 1101, 100, 5, 0.32, 0);
        assert_eq!(c.get_type(), ReorderingType::NetworkDuplicate);
        assert_eq!(c.get_message(), "network duplicate");
    }

    /// Spec §8: a segment that fills a previously-recorded gap, arriving
    /// within RTT, is `NETWORK_REORDERING` (message 11) rather than a
    /// retransmission — the placeholder branch of `classify_past`.
    #[test]
    fn network_reordering_fills_gap_within_rtt() {
        let mut c = classifier();
        c.rtt_mut().on_packet(0, true, false, 0.00);
        c.rtt_mut().on_packet(1, true, true, 0.05);
        c.rtt_mut().on_packet(0, false, true, 0.10);

        c.on_packet(0, true, 999, 0, 0, 0.0, 0); // expected_seq = 1000
        c.on_packet(0, false, 1000, 1, 9, 0.10, 0); // contiguous, expected_seq = 1001
        // Segment 1101 arrives ahead of the still-missing 1001..1101 gap.
        c.on_packet(0, false, 1101, 100, 5, 0.30, 0);
        assert_eq!(c.get_type(), ReorderingType::High);
        // The missing segment finally arrives, reordered, well inside RTT.
        c.on_packet(0, false, 1001, 100, 7, 0.31, 0);
        assert_eq!(c.get_type(), ReorderingType::NetworkReordering);
        assert_eq!(c.get_message(), "network reordering");
    }
}
