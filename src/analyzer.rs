//! Analyzer descriptors and the per-flow analyzer registry (spec §9
//! "Analyzer polymorphism").
//!
//! The C reference models an analyzer as a `{create, destroy, on_packet}`
//! function-pointer triple producing an opaque `void *` per flow. Spec §9
//! explicitly asks for a trait/interface in a systems rewrite instead, the
//! same shape `retina-core`'s `subscription::Trackable` uses for per-
//! connection state: one trait object per registered analyzer, dispatched
//! in registration order, each owning a `Box<dyn Any>` slot in the flow's
//! analyzer-state array rather than a raw pointer.

use std::any::Any;

use crate::packet::{Direction, IpHeader, TcpHeader};

/// Everything an [`Analyzer`] needs about the current packet. Built fresh
/// by the Session Manager for each call to `update` and handed to every
/// registered analyzer in turn.
pub struct PacketContext<'a> {
    pub direction: Direction,
    pub ip: &'a IpHeader,
    pub tcp: &'a TcpHeader,
    pub payload_len: u32,
    pub seconds: f64,
    pub whole_seconds: u32,
}

/// A pluggable per-flow analyzer.
///
/// Implementors produce one opaque state value per flow (`create`), update
/// it on every packet delivered to that flow (`on_packet`), and release it
/// when the flow is destroyed (`destroy`). Analyzers never see errors
/// across this boundary (spec §7): an analyzer that cannot process a
/// packet updates its own state to reflect "no sample" and returns.
pub trait Analyzer {
    /// Creates a fresh per-flow state value.
    fn create(&self) -> Box<dyn Any>;

    /// Releases a per-flow state value. Default is a no-op drop.
    fn destroy(&self, _state: Box<dyn Any>) {}

    /// Delivers one packet to a flow's state for this analyzer.
    fn on_packet(&self, state: &mut dyn Any, ctx: &PacketContext);
}

/// Ordered collection of registered analyzers (spec §4.3 "Analyzer
/// Registry"). Registration order is user-visible and stable: it is both
/// the dispatch order on every packet and the index into each flow's
/// `analyzer_states` array.
#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> AnalyzerRegistry {
        AnalyzerRegistry { analyzers: Vec::new() }
    }

    /// Registers `analyzer`, returning its stable slot index.
    pub fn register(&mut self, analyzer: Box<dyn Analyzer>) -> usize {
        self.analyzers.push(analyzer);
        self.analyzers.len() - 1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Creates one state slot per registered analyzer, in registration
    /// order.
    pub fn create_states(&self) -> Vec<Box<dyn Any>> {
        self.analyzers.iter().map(|a| a.create()).collect()
    }

    /// Destroys every per-flow state slot, in registration order.
    pub fn destroy_states(&self, states: Vec<Box<dyn Any>>) {
        for (analyzer, state) in self.analyzers.iter().zip(states) {
            analyzer.destroy(state);
        }
    }

    /// Delivers `ctx` to every registered analyzer's state, in
    /// registration order.
    pub fn dispatch(&self, states: &mut [Box<dyn Any>], ctx: &PacketContext) {
        for (analyzer, state) in self.analyzers.iter().zip(states.iter_mut()) {
            analyzer.on_packet(state.as_mut(), ctx);
        }
    }
}
