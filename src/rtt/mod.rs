//! Round-trip-time estimators (spec §4.4).
//!
//! Grounded on `examples/original_source/lib/rtthandshake.c`,
//! `rttnsequence.c`, and `rtttimestamp.c` for the exact arithmetic
//! (smoothing constants, sample ceilings, spike-reject multiplier), and on
//! spec §9's "RTT dependency injection" note — "model as an interface
//! `provides inside_rtt, outside_rtt`... let the classifier be constructed
//! with any implementation" — the same shape `retina-core`'s
//! `subscription::Trackable` uses to let a tracked type be supplied
//! independent of the tracker: a plain trait the
//! [`Reordering Classifier`](crate::reorder) depends on rather than one
//! specific estimator struct.

pub mod handshake;
pub mod sequence;
pub mod timestamp;

use crate::analyzer::PacketContext;

/// Uniform directional-RTT interface every estimator variant exposes
/// (spec §4.4). `None` means "no sample yet", not zero.
///
/// `update` lets the Reordering Classifier (spec §4.5, "using the embedded
/// RTT estimator") drive whichever concrete estimator it was constructed
/// with from one `PacketContext`, without needing to know that
/// estimator's own `on_packet` signature — each variant takes different
/// fields from the packet.
pub trait RttEstimator {
    /// Feeds one packet into the estimator.
    fn update(&mut self, ctx: &PacketContext);

    /// RTT observed for direction 0 (outbound).
    fn inside_rtt(&self) -> Option<f64>;

    /// RTT observed for direction 1 (inbound).
    fn outside_rtt(&self) -> Option<f64>;
}

pub use handshake::{HandshakeRtt, HandshakeRttAnalyzer};
pub use sequence::{SequenceRtt, SequenceRttAnalyzer};
pub use timestamp::{TimestampRtt, TimestampRttAnalyzer};
