//! Flow identity and per-flow state (spec §3).
//!
//! Grounded on `conntrack/conn_id.rs`'s `ConnId`: a direction-independent
//! identifier built with `cmp::min`/`cmp::max` over the two endpoints, so
//! both directions of a connection hash to the same bucket. This module
//! narrows that idea to the spec's exact canonicalization rule (smaller
//! IPv4 address first, ties broken by port) and adds the connection state
//! machine and per-flow analyzer-state array that `ConnId` alone doesn't
//! carry.

use std::any::Any;
use std::net::Ipv4Addr;

pub mod index;

/// Direction-independent 5-tuple (spec §3). `(ip_a, port_a)` is always the
/// endpoint with the numerically smaller IPv4 address, ties broken by the
/// lower port number, so `FlowId::new(a, b) == FlowId::new(b, a)`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct FlowId {
    pub ip_a: Ipv4Addr,
    pub port_a: u16,
    pub ip_b: Ipv4Addr,
    pub port_b: u16,
}

impl FlowId {
    /// Canonicalizes the 5-tuple `(ip1, port1) <-> (ip2, port2)`.
    pub fn new(ip1: Ipv4Addr, port1: u16, ip2: Ipv4Addr, port2: u16) -> FlowId {
        if (ip1, port1) <= (ip2, port2) {
            FlowId {
                ip_a: ip1,
                port_a: port1,
                ip_b: ip2,
                port_b: port2,
            }
        } else {
            FlowId {
                ip_a: ip2,
                port_a: port2,
                ip_b: ip1,
                port_b: port1,
            }
        }
    }
}

/// TCP connection state (spec §3). `SYN_SENT`/`SYN_RCVD` are the two
/// possible initial states; `CLOSED`, `RESET`, and an expired `TIME_WAIT`
/// are terminal.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnState {
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
    Closed,
    Reset,
}

impl ConnState {
    /// `true` for the two half-open states the handshake sweep (§4.3.4)
    /// targets.
    pub fn is_half_open(self) -> bool {
        matches!(self, ConnState::SynSent | ConnState::SynRcvd)
    }

    /// `true` for the two states a flow is destroyed from immediately
    /// (spec §3 "Lifecycles"), modulo the one-packet closed-session grace.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnState::Closed | ConnState::Reset)
    }
}

/// A tracked TCP connection (spec §3 "Flow Record").
///
/// Owns its canonical ID, TCP state, and one opaque state slot per
/// registered analyzer (indexed by registration order, same shape as
/// `retina-core`'s per-connection `Trackable` state but heterogeneous
/// across analyzers via `Box<dyn Any>` rather than one fixed type).
pub struct FlowRecord {
    pub id: FlowId,
    pub state: ConnState,
    /// Sequence number a pending ACK must reach or exceed to advance the
    /// state machine.
    pub expected_ack: u32,
    /// Set while the record is queued in the TIME_WAIT ring.
    pub waiting: bool,
    /// Wall-clock seconds modulo 256, refreshed on every packet; read by
    /// the handshake sweep.
    pub last_access: u8,
    /// Per-analyzer opaque state, one slot per registered analyzer.
    pub analyzer_states: Vec<Box<dyn Any>>,
}

impl FlowRecord {
    pub fn new(id: FlowId, state: ConnState, expected_ack: u32, last_access: u8) -> FlowRecord {
        FlowRecord {
            id,
            state,
            expected_ack,
            waiting: false,
            last_access,
            analyzer_states: Vec::new(),
        }
    }
}
