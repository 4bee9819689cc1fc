//! The external Packet Accessor surface.
//!
//! The packet-capture substrate itself is out of scope for this crate (see
//! spec §1): something upstream (a `pcap`/DPDK-style capture library) reads
//! packets off the wire and hands them to [`SessionManager::update`] through
//! an implementation of [`PacketAccessor`]. This module only defines that
//! boundary and the plain value types the core consumes from it.
//!
//! Field names and accessor shapes are deliberately close to
//! `retina-core`'s `protocols::packet::{ipv4, tcp}` modules, adapted from
//! zero-copy mbuf-backed structs to plain owned values, since here the
//! packet buffer itself lives entirely on the capture side of the boundary.

use std::net::Ipv4Addr;

/// TCP flag bits, matching the wire layout of the TCP header's flags byte.
pub const FIN: u8 = 0b0000_0001;
pub const SYN: u8 = 0b0000_0010;
pub const RST: u8 = 0b0000_0100;
pub const ACK: u8 = 0b0001_0000;

/// TCP option kind for the timestamp option (RFC 1323).
pub const TCP_OPTION_TIMESTAMP: u8 = 8;

/// The IPv4 header fields the core needs, already converted to host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Total length of the IP datagram, in bytes.
    pub total_len: u16,
    /// Header length, in 32-bit words (the IHL field).
    pub header_len: u8,
    /// IP identification field.
    pub id: u16,
}

/// The TCP header fields the core needs, already converted to host order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_no: u32,
    pub ack_no: u32,
    pub flags: u8,
    /// Data offset, in 32-bit words.
    pub data_offset: u8,
    /// Raw TCP option bytes (everything after the fixed 20-byte header, up
    /// to `data_offset * 4` bytes), used by [`TcpHeader::options`].
    pub options: Vec<u8>,
}

impl TcpHeader {
    #[inline]
    pub fn fin(&self) -> bool {
        self.flags & FIN != 0
    }

    #[inline]
    pub fn syn(&self) -> bool {
        self.flags & SYN != 0
    }

    #[inline]
    pub fn rst(&self) -> bool {
        self.flags & RST != 0
    }

    #[inline]
    pub fn ack(&self) -> bool {
        self.flags & ACK != 0
    }

    /// Iterates the TCP options, yielding `(kind, length, data)` triples.
    ///
    /// Mirrors spec §6's `iterate_tcp_options`. Malformed trailing option
    /// bytes (a kind byte with no room for its declared length) end
    /// iteration early rather than panicking.
    pub fn options(&self) -> TcpOptionsIter<'_> {
        TcpOptionsIter {
            buf: &self.options,
            pos: 0,
        }
    }
}

/// Iterator over a TCP header's option TLVs.
pub struct TcpOptionsIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for TcpOptionsIter<'a> {
    type Item = (u8, u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let kind = *self.buf.get(self.pos)?;
            match kind {
                0 => return None, // end of options list
                1 => {
                    self.pos += 1; // NOP, no length/data
                    continue;
                }
                _ => {
                    let len = *self.buf.get(self.pos + 1)? as usize;
                    if len < 2 || self.pos + len > self.buf.len() {
                        return None;
                    }
                    let data = &self.buf[self.pos + 2..self.pos + len];
                    self.pos += len;
                    return Some((kind, len as u8, data));
                }
            }
        }
    }
}

/// Packet directionality relative to the observation point (spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Direction 0: outbound.
    Outbound,
    /// Direction 1: inbound.
    Inbound,
}

impl Direction {
    #[inline]
    pub fn as_index(self) -> usize {
        match self {
            Direction::Outbound => 0,
            Direction::Inbound => 1,
        }
    }

    #[inline]
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Outbound => Direction::Inbound,
            Direction::Inbound => Direction::Outbound,
        }
    }

    #[inline]
    pub fn from_index(idx: i32) -> Option<Direction> {
        match idx {
            0 => Some(Direction::Outbound),
            1 => Some(Direction::Inbound),
            _ => None,
        }
    }
}

/// The operations the core requires on an opaque captured packet (spec §6).
///
/// Implemented by whatever packet-capture substrate is feeding the
/// [`SessionManager`](crate::session::SessionManager); not implemented by
/// this crate itself.
pub trait PacketAccessor {
    /// Returns the packet's IPv4 header, or `None` if the packet is not
    /// IPv4.
    fn ip_header(&self) -> Option<IpHeader>;

    /// Returns the packet's TCP header, or `None` if the packet is not TCP.
    fn tcp_header(&self) -> Option<TcpHeader>;

    /// Returns the packet's direction relative to the observation point, or
    /// `None` if the capture substrate could not determine one.
    fn direction(&self) -> Option<Direction>;

    /// Returns the packet's capture timestamp in fractional seconds.
    fn seconds(&self) -> f64;

    /// Returns the packet's capture timestamp as an ERF 64-bit fixed-point
    /// value, seconds in the high 32 bits.
    fn erf_timestamp(&self) -> u64;

    /// Returns the whole-second part of the capture timestamp.
    #[inline]
    fn whole_seconds(&self) -> u32 {
        (self.erf_timestamp() >> 32) as u32
    }
}

/// Computes a data segment's payload length from its IP and TCP headers.
#[inline]
pub fn payload_len(ip: &IpHeader, tcp: &TcpHeader) -> u32 {
    let header_bytes = (ip.header_len as u32 + tcp.data_offset as u32) * 4;
    (ip.total_len as u32).saturating_sub(header_bytes)
}
