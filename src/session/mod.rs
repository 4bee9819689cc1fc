//! Session Manager (spec §4.3): the per-packet entry point tying the Flow
//! Index, TIME_WAIT queue, handshake sweep, and analyzer registry
//! together.
//!
//! Grounded on `examples/original_source/lib/sessionmanager.c`'s
//! `session_manager_update`, generalized over the crate's
//! [`PacketAccessor`] boundary and [`AnalyzerRegistry`] in place of the
//! source's single hardcoded analyzer and raw `libtrace_packet_t`.

pub mod handshake_sweep;
pub mod timewait;

use log::warn;

use crate::analyzer::{AnalyzerRegistry, PacketContext};
use crate::config::SessionManagerConfig;
use crate::flow::index::FlowIndex;
use crate::flow::{ConnState, FlowId, FlowRecord};
use crate::packet::{payload_len, Direction, PacketAccessor, TcpHeader};

use timewait::TimeWaitQueue;

/// Owns every live flow and drives the state machine, TIME_WAIT expiry,
/// and handshake sweep (spec §4.3).
pub struct SessionManager {
    config: SessionManagerConfig,
    index: FlowIndex,
    registry: AnalyzerRegistry,
    time_wait: TimeWaitQueue,
    closed_session: Option<FlowId>,
    last_whole_second: Option<u32>,
    last_handshake_sweep_second: Option<u32>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> SessionManager {
        let time_wait = TimeWaitQueue::new(config.time_wait.capacity);
        let index = FlowIndex::new(config.flow_index.bucket_count);
        SessionManager {
            config,
            index,
            registry: AnalyzerRegistry::new(),
            time_wait,
            closed_session: None,
            last_whole_second: None,
            last_handshake_sweep_second: None,
        }
    }

    /// Registers an analyzer before any packets flow (spec §4.3
    /// "Contract"). Returns its stable slot index.
    pub fn register_analyzer(&mut self, analyzer: Box<dyn crate::analyzer::Analyzer>) -> usize {
        self.registry.register(analyzer)
    }

    pub fn live_flow_count(&self) -> usize {
        self.index.len()
    }

    /// Ingests one packet, returning the flow it belongs to (spec §4.3
    /// "Contract"). Must be called exactly once per packet in capture
    /// order.
    pub fn update(&mut self, packet: &dyn PacketAccessor) -> Option<&FlowRecord> {
        let whole_second = packet.whole_seconds();

        if self.last_whole_second != Some(whole_second) {
            self.run_time_wait_sweep(whole_second);
        }
        self.free_deferred_closed_session();
        self.last_whole_second = Some(whole_second);

        let timeout = self.config.handshake_timeout_secs as u32;
        let sweep_due = match self.last_handshake_sweep_second {
            None => true,
            Some(last) => whole_second.saturating_sub(last) > timeout,
        };
        if sweep_due {
            self.run_handshake_sweep(whole_second);
            self.last_handshake_sweep_second = Some(whole_second);
        }

        let ip = packet.ip_header()?;
        let tcp = packet.tcp_header()?;
        let direction = packet.direction()?;
        let seconds = packet.seconds();
        let payload = payload_len(&ip, &tcp);
        let id = FlowId::new(ip.src, tcp.src_port, ip.dst, tcp.dst_port);

        loop {
            match self.index.retrieve(&id).map(|f| f.state) {
                None => {
                    if tcp.syn() && !tcp.ack() {
                        self.create_flow(id, direction, &tcp, payload, whole_second);
                    }
                    break;
                }
                Some(ConnState::TimeWait) if tcp.syn() => {
                    // `free_early` only nulls the ring slot if one is
                    // still live there; the flow itself lives in the
                    // index regardless, and must be destroyed either way
                    // or this SYN would loop forever re-matching the same
                    // unchanged TimeWait state (e.g. after a TIME_WAIT
                    // queue overflow left this flow with no ring slot).
                    self.time_wait.free_early(&id);
                    self.destroy_flow(&id);
                    continue;
                }
                Some(state) => {
                    self.apply_transition(&id, state, direction, &tcp, payload, whole_second);
                    break;
                }
            }
        }

        if let Some(flow) = self.index.retrieve_mut(&id) {
            flow.last_access = (whole_second & 0xFF) as u8;
        }

        let ctx = PacketContext {
            direction,
            ip: &ip,
            tcp: &tcp,
            payload_len: payload,
            seconds,
            whole_seconds: whole_second,
        };
        if let Some(flow) = self.index.retrieve_mut(&id) {
            self.registry.dispatch(&mut flow.analyzer_states, &ctx);
        }

        self.index.retrieve(&id)
    }

    /// Tears down every live flow, in arbitrary iteration order (spec
    /// §4.3 "Contract").
    pub fn destroy(&mut self) {
        for flow in self.index.drain_all() {
            self.registry.destroy_states(flow.analyzer_states);
        }
    }

    fn create_flow(&mut self, id: FlowId, direction: Direction, tcp: &TcpHeader, payload: u32, now: u32) {
        let (state, expected_ack) = match direction {
            Direction::Outbound => (ConnState::SynSent, tcp.seq_no.wrapping_add(payload)),
            Direction::Inbound => (ConnState::SynRcvd, 0xFFFF_FFFF),
        };
        let mut record = FlowRecord::new(id, state, expected_ack, (now & 0xFF) as u8);
        record.analyzer_states = self.registry.create_states();
        self.index.insert(record);
    }

    fn apply_transition(
        &mut self,
        id: &FlowId,
        state: ConnState,
        direction: Direction,
        tcp: &TcpHeader,
        payload: u32,
        now: u32,
    ) {
        if tcp.rst() {
            self.set_state(id, ConnState::Reset);
            self.closed_session = Some(*id);
            return;
        }

        let d = direction.as_index();
        let ack = tcp.ack_no;
        let seq = tcp.seq_no;
        let syn = tcp.syn();
        let fin = tcp.fin();
        let ackf = tcp.ack();
        let expected_ack = self.index.retrieve(id).map(|f| f.expected_ack).unwrap_or(0);

        match state {
            ConnState::SynRcvd if d == 0 && syn && ackf => {
                self.set_expected_ack(id, seq.wrapping_add(payload));
            }
            ConnState::SynRcvd if d == 1 && ackf && !syn && ack >= expected_ack => {
                self.set_state(id, ConnState::Established);
            }
            ConnState::SynSent if d == 1 && syn && ackf && ack >= expected_ack => {
                self.set_state(id, ConnState::Established);
            }
            ConnState::SynSent if d == 1 && syn && ackf && ack < expected_ack => {}
            ConnState::SynSent if d == 1 && syn && !ackf => {
                self.set_state(id, ConnState::SynRcvd);
            }
            ConnState::Established if d == 0 && fin => {
                self.set_expected_ack(id, seq.wrapping_add(payload));
                self.set_state(id, ConnState::FinWait1);
            }
            ConnState::Established if d == 1 && fin => {
                self.set_state(id, ConnState::CloseWait);
            }
            ConnState::FinWait1 if d == 1 && ackf && ack >= expected_ack && fin => {
                self.enqueue_time_wait(id, now);
            }
            ConnState::FinWait1 if d == 1 && ackf && ack >= expected_ack && !fin => {
                self.set_state(id, ConnState::FinWait2);
            }
            ConnState::FinWait1 if d == 1 && fin && !ackf => {
                self.set_state(id, ConnState::Closing);
            }
            ConnState::FinWait2 if d == 1 && fin => {
                self.enqueue_time_wait(id, now);
            }
            ConnState::Closing if d == 1 && ackf && ack >= expected_ack => {
                self.enqueue_time_wait(id, now);
            }
            ConnState::CloseWait if d == 0 && fin => {
                self.set_expected_ack(id, seq.wrapping_add(payload));
                self.set_state(id, ConnState::LastAck);
            }
            ConnState::LastAck if d == 1 && ackf && ack >= expected_ack => {
                self.set_state(id, ConnState::Closed);
                self.closed_session = Some(*id);
            }
            _ => {}
        }
    }

    fn set_state(&mut self, id: &FlowId, state: ConnState) {
        if let Some(flow) = self.index.retrieve_mut(id) {
            flow.state = state;
        }
    }

    fn set_expected_ack(&mut self, id: &FlowId, expected_ack: u32) {
        if let Some(flow) = self.index.retrieve_mut(id) {
            flow.expected_ack = expected_ack;
        }
    }

    fn enqueue_time_wait(&mut self, id: &FlowId, now: u32) {
        self.set_state(id, ConnState::TimeWait);
        if let Some(flow) = self.index.retrieve_mut(id) {
            flow.waiting = true;
        }
        if !self.time_wait.add(*id, now) {
            warn!("TIME_WAIT queue full (capacity {}); dropping expiry entry for a TIME_WAIT flow", self.config.time_wait.capacity);
        }
    }

    fn free_deferred_closed_session(&mut self) {
        let Some(id) = self.closed_session.take() else {
            return;
        };
        let still_waiting = self.index.retrieve(&id).map(|f| f.waiting).unwrap_or(false);
        if !still_waiting {
            self.destroy_flow(&id);
        }
    }

    fn run_time_wait_sweep(&mut self, now: u32) {
        let expired = self.time_wait.free_expired(now, self.config.time_wait.duration_secs);
        for id in expired {
            self.destroy_flow(&id);
        }
    }

    fn run_handshake_sweep(&mut self, now: u32) {
        let timeout = self.config.handshake_timeout_secs;
        let now_mod = (now & 0xFF) as u8;
        let expired = self.index.extract_if(|_, flow| {
            flow.state.is_half_open() && handshake_sweep::is_expired(now_mod, flow.last_access, timeout)
        });
        for flow in expired {
            self.registry.destroy_states(flow.analyzer_states);
        }
    }

    fn destroy_flow(&mut self, id: &FlowId) {
        if let Some(flow) = self.index.remove(id) {
            self.registry.destroy_states(flow.analyzer_states);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::config::default_config;
    use crate::packet::{IpHeader, TcpHeader, FIN, SYN};
    use std::any::Any;
    use std::net::Ipv4Addr;

    struct CountingAnalyzer;
    impl Analyzer for CountingAnalyzer {
        fn create(&self) -> Box<dyn Any> {
            Box::new(0u32)
        }
        fn on_packet(&self, state: &mut dyn Any, _ctx: &PacketContext) {
            if let Some(c) = state.downcast_mut::<u32>() {
                *c += 1;
            }
        }
    }

    struct FakePacket {
        ip: Option<IpHeader>,
        tcp: Option<TcpHeader>,
        direction: Option<Direction>,
        seconds: f64,
    }

    impl PacketAccessor for FakePacket {
        fn ip_header(&self) -> Option<IpHeader> {
            self.ip
        }
        fn tcp_header(&self) -> Option<TcpHeader> {
            self.tcp.clone()
        }
        fn direction(&self) -> Option<Direction> {
            self.direction
        }
        fn seconds(&self) -> f64 {
            self.seconds
        }
        fn erf_timestamp(&self) -> u64 {
            (self.seconds as u64) << 32
        }
    }

    /// `a_port`/`b_port` are always relative to the same logical endpoints
    /// A and B, regardless of `direction` — both legs of one connection
    /// pass the same two values, and this helper swaps IP and port roles
    /// together so both directions canonicalize to the same `FlowId`.
    #[allow(clippy::too_many_arguments)]
    fn packet(
        direction: Direction,
        flags: u8,
        seq: u32,
        ack: u32,
        total_len: u16,
        seconds: f64,
        a_last_octet: u8,
        a_port: u16,
        b_port: u16,
    ) -> FakePacket {
        let (src, dst, src_port, dst_port) = match direction {
            Direction::Outbound => (
                Ipv4Addr::new(10, 0, 0, a_last_octet),
                Ipv4Addr::new(10, 0, 1, 1),
                a_port,
                b_port,
            ),
            Direction::Inbound => (
                Ipv4Addr::new(10, 0, 1, 1),
                Ipv4Addr::new(10, 0, 0, a_last_octet),
                b_port,
                a_port,
            ),
        };
        FakePacket {
            ip: Some(IpHeader {
                src,
                dst,
                total_len,
                header_len: 5,
                id: 1,
            }),
            tcp: Some(TcpHeader {
                src_port,
                dst_port,
                seq_no: seq,
                ack_no: ack,
                flags,
                data_offset: 5,
                options: vec![],
            }),
            direction: Some(direction),
            seconds,
        }
    }

    #[test]
    fn bare_syn_creates_flow_in_syn_sent() {
        let mut mgr = SessionManager::new(default_config());
        mgr.register_analyzer(Box::new(CountingAnalyzer));
        let p = packet(Direction::Outbound, SYN, 1000, 0, 40, 0.0, 5, 1000, 80);
        let flow = mgr.update(&p).unwrap();
        assert_eq!(flow.state, ConnState::SynSent);
        assert_eq!(mgr.live_flow_count(), 1);
    }

    #[test]
    fn full_handshake_reaches_established() {
        let mut mgr = SessionManager::new(default_config());
        let syn = packet(Direction::Outbound, SYN, 1000, 0, 40, 0.0, 5, 1000, 80);
        mgr.update(&syn);
        let synack = packet(Direction::Inbound, SYN | crate::packet::ACK, 5000, 1001, 40, 0.1, 5, 1000, 80);
        mgr.update(&synack);
        let ack = packet(Direction::Outbound, crate::packet::ACK, 1001, 5001, 40, 0.2, 5, 1000, 80);
        let flow = mgr.update(&ack).unwrap();
        assert_eq!(flow.state, ConnState::Established);
    }

    #[test]
    fn non_syn_packet_on_unknown_flow_is_ignored() {
        let mut mgr = SessionManager::new(default_config());
        let p = packet(Direction::Outbound, crate::packet::ACK, 1000, 0, 40, 0.0, 5, 1000, 80);
        assert!(mgr.update(&p).is_none());
        assert_eq!(mgr.live_flow_count(), 0);
    }

    #[test]
    fn graceful_close_enqueues_time_wait_then_expires() {
        let mut mgr = SessionManager::new(default_config());
        let syn = packet(Direction::Outbound, SYN, 1000, 0, 40, 0.0, 5, 1000, 80);
        mgr.update(&syn);
        let synack = packet(Direction::Inbound, SYN | crate::packet::ACK, 5000, 1001, 40, 0.1, 5, 1000, 80);
        mgr.update(&synack);
        let ack = packet(Direction::Outbound, crate::packet::ACK, 1001, 5001, 40, 0.2, 5, 1000, 80);
        mgr.update(&ack);
        let fin = packet(Direction::Outbound, FIN, 1001, 5001, 40, 0.5, 5, 1000, 80);
        mgr.update(&fin);
        let finack = packet(Direction::Inbound, FIN | crate::packet::ACK, 5001, 1102, 40, 0.6, 5, 1000, 80);
        let flow = mgr.update(&finack).unwrap();
        assert_eq!(flow.state, ConnState::TimeWait);
        assert_eq!(mgr.live_flow_count(), 1);

        // An unrelated ACK 61 s later: the TIME_WAIT sweep runs as part of
        // this update and frees the expired flow; the ACK itself matches no
        // flow and isn't a SYN, so it is ignored rather than creating one.
        let later = packet(Direction::Outbound, crate::packet::ACK, 1102, 5002, 40, 61.0, 9, 2000, 81);
        assert!(mgr.update(&later).is_none());
        assert_eq!(mgr.live_flow_count(), 0);
    }

    /// A SYN reusing a TIME_WAIT 5-tuple must terminate even when the
    /// TIME_WAIT ring overflowed and the flow was never actually enqueued
    /// there (`enqueue_time_wait` still sets state+`waiting` regardless of
    /// whether `add` succeeded). Without unconditionally destroying the
    /// flow in the `TimeWait`+SYN branch, `free_early` finds no matching
    /// slot, the state never changes, and `update` loops forever on this
    /// one packet.
    #[test]
    fn time_wait_reuse_terminates_even_after_queue_overflow() {
        let mut config = default_config();
        config.time_wait.capacity = 0;
        let mut mgr = SessionManager::new(config);
        let syn = packet(Direction::Outbound, SYN, 1000, 0, 40, 0.0, 5, 1000, 80);
        mgr.update(&syn);
        let synack = packet(Direction::Inbound, SYN | crate::packet::ACK, 5000, 1001, 40, 0.1, 5, 1000, 80);
        mgr.update(&synack);
        let ack = packet(Direction::Outbound, crate::packet::ACK, 1001, 5001, 40, 0.2, 5, 1000, 80);
        mgr.update(&ack);
        let fin = packet(Direction::Outbound, FIN, 1001, 5001, 40, 0.5, 5, 1000, 80);
        mgr.update(&fin);
        let finack = packet(Direction::Inbound, FIN | crate::packet::ACK, 5001, 1102, 40, 0.6, 5, 1000, 80);
        let flow = mgr.update(&finack).unwrap();
        assert_eq!(flow.state, ConnState::TimeWait);

        // A fresh SYN on the same 5-tuple must replace the flow, not hang.
        let reuse_syn = packet(Direction::Outbound, SYN, 9000, 0, 40, 0.7, 5, 1000, 80);
        let flow = mgr.update(&reuse_syn).unwrap();
        assert_eq!(flow.state, ConnState::SynSent);
        assert_eq!(mgr.live_flow_count(), 1);
    }

    #[test]
    fn handshake_sweep_removes_stale_half_open_flows() {
        let mut mgr = SessionManager::new(default_config());
        for i in 0..10u8 {
            let p = packet(Direction::Outbound, SYN, 1000, 0, 40, 0.0, i, 1000 + i as u16, 80);
            mgr.update(&p);
        }
        assert_eq!(mgr.live_flow_count(), 10);
        let trigger = packet(Direction::Outbound, SYN, 2000, 0, 40, 61.0, 200, 9999, 80);
        mgr.update(&trigger);
        assert_eq!(mgr.live_flow_count(), 1);
    }

    #[test]
    fn time_wait_reuse_frees_old_flow_immediately() {
        let mut mgr = SessionManager::new(default_config());
        let syn = packet(Direction::Outbound, SYN, 1000, 0, 40, 0.0, 5, 1000, 80);
        mgr.update(&syn);
        let synack = packet(Direction::Inbound, SYN | crate::packet::ACK, 5000, 1001, 40, 0.1, 5, 1000, 80);
        mgr.update(&synack);
        let ack = packet(Direction::Outbound, crate::packet::ACK, 1001, 5001, 40, 0.2, 5, 1000, 80);
        mgr.update(&ack);
        let fin = packet(Direction::Outbound, FIN, 1001, 5001, 40, 0.5, 5, 1000, 80);
        mgr.update(&fin);
        let finack = packet(Direction::Inbound, FIN | crate::packet::ACK, 5001, 1102, 40, 0.6, 5, 1000, 80);
        mgr.update(&finack);
        assert_eq!(mgr.live_flow_count(), 1);

        let new_syn = packet(Direction::Outbound, SYN, 9000, 0, 40, 0.7, 5, 1000, 80);
        let flow = mgr.update(&new_syn).unwrap();
        assert_eq!(flow.state, ConnState::SynSent);
        assert_eq!(mgr.live_flow_count(), 1);
    }
}
