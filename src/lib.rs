//! Passive TCP flow analysis over a pluggable per-flow analyzer registry.
//!
//! A [`session::SessionManager`] ingests packets through an external
//! [`packet::PacketAccessor`] boundary, tracks TCP connection state per
//! canonical 5-tuple, and dispatches each packet to every registered
//! [`analyzer::Analyzer`] in turn. Three RTT estimators and a reordering
//! classifier are provided as analyzers built on the same
//! [`rtt::RttEstimator`] interface.
//!
//! ```rust
//! use flowtrace_core::config::default_config;
//! use flowtrace_core::rtt::HandshakeRttAnalyzer;
//! use flowtrace_core::session::SessionManager;
//!
//! let mut manager = SessionManager::new(default_config());
//! manager.register_analyzer(Box::new(HandshakeRttAnalyzer));
//! // manager.update(&packet) for each captured packet, in capture order.
//! ```
//!
//! [`HandshakeRttAnalyzer`]: crate::rtt::HandshakeRttAnalyzer

pub mod analyzer;
pub mod config;
pub mod error;
pub mod flow;
pub mod packet;
pub mod reorder;
pub mod ring;
pub mod rtt;
pub mod session;

pub use analyzer::{Analyzer, AnalyzerRegistry, PacketContext};
pub use error::ConfigError;
pub use session::SessionManager;
