//! Sequence-based RTT estimator (spec §4.4.2).
//!
//! Grounded line-for-line on `examples/original_source/lib/rttnsequence.c`:
//! a per-direction FIFO of `(expected_ack, time_sent)` pairs, smoothing
//! constants `SMOOTH = 0.875` / `VARSMOOTH = 0.75`, and a 20-second sample
//! ceiling. Queue storage reuses [`RingQueue`](crate::ring::RingQueue) per
//! spec §9's "ring queue reuse" note.

use std::any::Any;

use crate::analyzer::{Analyzer, PacketContext};
use crate::ring::RingQueue;

use super::RttEstimator;

const SMOOTH: f64 = 0.875;
const VARSMOOTH: f64 = 0.75;
const MAX_RTT: f64 = 20.0;

#[derive(Default)]
struct DirState {
    rtt: Option<f64>,
    rtt_var: Option<f64>,
    total: f64,
    count: u32,
}

/// Per-flow state for the sequence-based estimator.
pub struct SequenceRtt {
    queue: [RingQueue<(u32, f64)>; 2],
    dir: [DirState; 2],
    last_rtt: Option<f64>,
}

impl Default for SequenceRtt {
    fn default() -> Self {
        SequenceRtt {
            queue: [RingQueue::growable(), RingQueue::growable()],
            dir: [DirState::default(), DirState::default()],
            last_rtt: None,
        }
    }
}

impl SequenceRtt {
    pub fn new() -> SequenceRtt {
        SequenceRtt::default()
    }

    /// The RTT sample produced by the most recent `on_packet` call, if any.
    /// Reset at the top of every call.
    pub fn last_rtt(&self) -> Option<f64> {
        self.last_rtt
    }

    /// Feeds one packet into the estimator.
    pub fn on_packet(&mut self, direction: usize, seq: u32, ack: u32, payload: u32, time: f64) {
        self.last_rtt = None;

        if payload > 0 {
            let expected = seq.wrapping_add(payload);
            let reverse = 1 - direction;
            let is_retransmit = match self.queue[reverse].peek_top() {
                Some(&(top, _)) => expected <= top,
                None => false,
            };
            if is_retransmit {
                self.queue[reverse].clear();
            } else {
                let _ = self.queue[reverse].push_back((expected, time));
            }
        }

        let mut sample = None;
        for (_, sent) in self.queue[direction].pop_front_while(|&(expected_ack, _)| ack >= expected_ack) {
            sample = Some(time - sent);
        }

        let Some(sample) = sample else { return };
        if !(sample > 0.0 && sample <= MAX_RTT) {
            return;
        }

        self.last_rtt = Some(sample);
        let d = &mut self.dir[direction];
        d.total += sample;
        d.count += 1;
        match d.rtt {
            None => {
                d.rtt = Some(sample);
                d.rtt_var = Some(sample / 2.0);
            }
            Some(prior) => {
                let new_rtt = SMOOTH * prior + (1.0 - SMOOTH) * sample;
                d.rtt = Some(new_rtt);
                d.rtt_var = Some(VARSMOOTH * new_rtt + (1.0 - VARSMOOTH) * (new_rtt - sample).abs());
            }
        }
    }

    /// Average RTT across both directions over the life of the flow.
    pub fn average(&self) -> Option<f64> {
        if self.dir[0].count > 0 && self.dir[1].count > 0 {
            Some(self.dir[0].total / self.dir[0].count as f64 + self.dir[1].total / self.dir[1].count as f64)
        } else {
            None
        }
    }
}

impl RttEstimator for SequenceRtt {
    fn update(&mut self, ctx: &PacketContext) {
        self.on_packet(
            ctx.direction.as_index(),
            ctx.tcp.seq_no,
            ctx.tcp.ack_no,
            ctx.payload_len,
            ctx.seconds,
        );
    }

    fn inside_rtt(&self) -> Option<f64> {
        self.dir[0].rtt
    }

    fn outside_rtt(&self) -> Option<f64> {
        self.dir[1].rtt
    }
}

/// [`Analyzer`] wrapper so the sequence estimator can be registered
/// standalone with the Session Manager.
pub struct SequenceRttAnalyzer;

impl Analyzer for SequenceRttAnalyzer {
    fn create(&self) -> Box<dyn Any> {
        Box::new(SequenceRtt::new())
    }

    fn on_packet(&self, state: &mut dyn Any, ctx: &PacketContext) {
        if let Some(rtt) = state.downcast_mut::<SequenceRtt>() {
            rtt.on_packet(
                ctx.direction.as_index(),
                ctx.tcp.seq_no,
                ctx.tcp.ack_no,
                ctx.payload_len,
                ctx.seconds,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_round_trip_seeds_rtt_and_variance() {
        let mut rtt = SequenceRtt::new();
        rtt.on_packet(0, 1000, 0, 100, 0.00); // A->B data
        rtt.on_packet(1, 0, 1100, 0, 0.05); // B->A ack
        assert!((rtt.outside_rtt().unwrap() - 0.05).abs() < 1e-9);
        assert_eq!(rtt.last_rtt(), Some(0.05));
    }

    #[test]
    fn retransmit_clears_queue_with_no_sample_until_next_segment() {
        let mut rtt = SequenceRtt::new();
        rtt.on_packet(0, 1000, 0, 100, 0.00);
        rtt.on_packet(0, 1000, 0, 100, 0.02); // retransmit before any ack
        // An ack at this point has nothing to match: the retransmit only
        // cleared the queue, it did not re-seed it.
        rtt.on_packet(1, 0, 1100, 0, 0.12);
        assert!(rtt.outside_rtt().is_none());

        // Only once a new segment is sent does measurement resume.
        rtt.on_packet(0, 1100, 0, 50, 0.20);
        rtt.on_packet(1, 0, 1150, 0, 0.30);
        assert!((rtt.outside_rtt().unwrap() - 0.10).abs() < 1e-9);
    }

    #[test]
    fn sample_over_twenty_seconds_is_discarded() {
        let mut rtt = SequenceRtt::new();
        rtt.on_packet(0, 1000, 0, 100, 0.0);
        rtt.on_packet(1, 0, 1100, 0, 25.0);
        assert!(rtt.outside_rtt().is_none());
    }
}
