//! # Transport Demultiplexer
//!
//! Dispatches on the IPv4 protocol number and reads the transport header
//! fields the classifier needs. A transport header that does not fit in
//! the frame yields no transport data; the network-layer fields are still
//! reported by the caller.

use crate::cursor::{ByteReader, DecodeError};
use crate::protocols::link::NetworkLayer;
use crate::protocols::tcp::{TcpFlags, TcpHeader};

/// IP protocol numbers.
pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// UDP header length in bytes.
pub const UDP_HEADER_LEN: usize = 8;

/// Decoded transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader {
    Tcp(TcpHeader),
    Udp { src_port: u16, dst_port: u16 },
    Icmp,
    Other(u8),
}

impl TransportHeader {
    /// `(src_port, dst_port)` for TCP and UDP.
    pub fn ports(&self) -> Option<(u16, u16)> {
        match self {
            TransportHeader::Tcp(tcp) => Some((tcp.src_port, tcp.dst_port)),
            TransportHeader::Udp { src_port, dst_port } => Some((*src_port, *dst_port)),
            TransportHeader::Icmp | TransportHeader::Other(_) => None,
        }
    }

    pub fn tcp_flags(&self) -> Option<TcpFlags> {
        match self {
            TransportHeader::Tcp(tcp) => Some(tcp.flags),
            _ => None,
        }
    }

    /// True if either port equals `port`.
    pub fn involves_port(&self, port: u16) -> bool {
        self.ports()
            .map(|(src, dst)| src == port || dst == port)
            .unwrap_or(false)
    }
}

/// Read the transport header that follows `net`.
pub fn demux(frame: &ByteReader<'_>, net: &NetworkLayer) -> Result<TransportHeader, DecodeError> {
    let offset = net.transport_offset;
    match net.header.protocol {
        PROTO_TCP => TcpHeader::parse(frame, offset).map(TransportHeader::Tcp),
        PROTO_UDP => {
            frame.check(offset, UDP_HEADER_LEN)?;
            Ok(TransportHeader::Udp {
                src_port: frame.u16_at(offset)?,
                dst_port: frame.u16_at(offset + 2)?,
            })
        }
        PROTO_ICMP => Ok(TransportHeader::Icmp),
        other => Ok(TransportHeader::Other(other)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
