//! Handshake-based RTT estimator (spec §4.4.1).
//!
//! Grounded on `examples/original_source/lib/rtthandshake.c`'s two
//! signed-accumulator doubles, rendered as an explicit `Pending`/`Done`
//! state per direction instead of sign-encoding "not yet measured" into a
//! negative double. The source's sign trick breaks at `t = 0.0` (`-0.0 <
//! 0.0` is false in IEEE 754, so a handshake starting at the very first
//! captured second never completes its first half) — an `Option`-shaped
//! state sidesteps that rather than inheriting it.

use std::any::Any;

use crate::analyzer::{Analyzer, PacketContext};

use super::RttEstimator;

#[derive(Debug, Clone, Copy)]
enum HalfRtt {
    Absent,
    /// A SYN (or SYN+ACK acting as one for the reverse leg) was seen at
    /// this send time; still waiting for the matching reply.
    Pending(f64),
    /// The reply arrived; this is the completed RTT for the leg.
    Done(f64),
}

impl HalfRtt {
    fn sample(self) -> Option<f64> {
        match self {
            HalfRtt::Done(v) if v > 0.0 => Some(v),
            _ => None,
        }
    }
}

/// Per-flow state for the handshake estimator. `slots[0]` tracks the
/// direction-0 (outbound) leg, `slots[1]` the direction-1 (inbound) leg.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeRtt {
    slots: [HalfRtt; 2],
    established: bool,
}

impl Default for HandshakeRtt {
    fn default() -> Self {
        HandshakeRtt {
            slots: [HalfRtt::Absent, HalfRtt::Absent],
            established: false,
        }
    }
}

impl HandshakeRtt {
    pub fn new() -> HandshakeRtt {
        HandshakeRtt::default()
    }

    /// Feeds one packet's SYN/ACK flags, direction, and capture time into
    /// the estimator. A no-op once `established`.
    pub fn on_packet(&mut self, direction: usize, syn: bool, ack: bool, time: f64) {
        if self.established {
            return;
        }
        if syn && ack {
            // Completes the leg the original bare SYN opened, unless a
            // retransmitted SYN+ACK already completed it.
            let origin = 1 - direction;
            if let HalfRtt::Pending(send_time) = self.slots[origin] {
                self.slots[origin] = HalfRtt::Done(time - send_time);
            }
            // Opens the reverse leg, which the final ACK will complete.
            self.slots[direction] = HalfRtt::Pending(time);
        } else if syn {
            self.slots[direction] = HalfRtt::Pending(time);
        } else if ack {
            let origin = 1 - direction;
            if let HalfRtt::Pending(send_time) = self.slots[origin] {
                self.slots[origin] = HalfRtt::Done(time - send_time);
            }
            self.established = true;
        }
    }

    pub fn established(&self) -> bool {
        self.established
    }
}

impl RttEstimator for HandshakeRtt {
    fn update(&mut self, ctx: &PacketContext) {
        self.on_packet(ctx.direction.as_index(), ctx.tcp.syn(), ctx.tcp.ack(), ctx.seconds);
    }

    fn inside_rtt(&self) -> Option<f64> {
        self.slots[0].sample()
    }

    fn outside_rtt(&self) -> Option<f64> {
        self.slots[1].sample()
    }
}

/// [`Analyzer`] wrapper so the handshake estimator can be registered
/// standalone with the Session Manager (spec §4.4: "usable standalone and
/// as a dependency of the Reordering Classifier").
pub struct HandshakeRttAnalyzer;

impl Analyzer for HandshakeRttAnalyzer {
    fn create(&self) -> Box<dyn Any> {
        Box::new(HandshakeRtt::new())
    }

    fn on_packet(&self, state: &mut dyn Any, ctx: &PacketContext) {
        if let Some(rtt) = state.downcast_mut::<HandshakeRtt>() {
            rtt.on_packet(ctx.direction.as_index(), ctx.tcp.syn(), ctx.tcp.ack(), ctx.seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_handshake_yields_symmetric_rtt_even_starting_at_zero() {
        let mut rtt = HandshakeRtt::new();
        rtt.on_packet(0, true, false, 0.00); // A->B SYN
        rtt.on_packet(1, true, true, 0.10); // B->A SYN+ACK
        rtt.on_packet(0, false, true, 0.20); // A->B ACK

        assert!(rtt.established());
        assert!((rtt.inside_rtt().unwrap() - 0.10).abs() < 1e-9);
        assert!((rtt.outside_rtt().unwrap() - 0.10).abs() < 1e-9);
    }

    #[test]
    fn retransmitted_synack_does_not_contaminate_completed_half() {
        let mut rtt = HandshakeRtt::new();
        rtt.on_packet(0, true, false, 0.00);
        rtt.on_packet(1, true, true, 0.10);
        rtt.on_packet(1, true, true, 0.50); // retransmitted SYN+ACK, much later
        rtt.on_packet(0, false, true, 0.20);
        assert!((rtt.inside_rtt().unwrap() - 0.10).abs() < 1e-9);
    }

    #[test]
    fn frozen_after_established() {
        let mut rtt = HandshakeRtt::new();
        rtt.on_packet(0, true, false, 0.00);
        rtt.on_packet(1, true, true, 0.10);
        rtt.on_packet(0, false, true, 0.20);
        rtt.on_packet(0, true, false, 100.0); // new SYN after established: ignored
        assert!((rtt.inside_rtt().unwrap() - 0.10).abs() < 1e-9);
    }
}
