//! # Link & Network Layer Decoder
//!
//! Strips the link-layer header announced by the capture source and parses
//! the IPv4 header behind it. Anything that is not IPv4 is rejected here
//! and never reaches the transport decoders.
//!
//! ## Wire Format Reference
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version|  IHL  |Type of Service|          Total Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Identification        |Flags|      Fragment Offset    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Time to Live |    Protocol   |         Header Checksum       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Source Address                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Destination Address                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::cursor::{ByteReader, DecodeError};

/// Minimum IPv4 header length in bytes (IHL = 5).
pub const IPV4_MIN_HEADER_LEN: usize = 20;

// ---------------------------------------------------------------------------
// Link type
// ---------------------------------------------------------------------------

/// Link-layer framing reported by the capture source when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Ethernet II, 14-byte header.
    Ethernet,
    /// BSD loopback: 4-byte address family word.
    Null,
    /// Linux cooked capture v1 (`any` device), 16-byte header.
    LinuxSll,
    /// Linux cooked capture v2, 20-byte header.
    LinuxSll2,
    /// No link-layer header; the frame starts at the IP header.
    Raw,
}

impl LinkType {
    /// Length of the link-layer header to skip.
    pub fn header_len(self) -> usize {
        match self {
            LinkType::Ethernet => 14,
            LinkType::Null => 4,
            LinkType::LinuxSll => 16,
            LinkType::LinuxSll2 => 20,
            LinkType::Raw => 0,
        }
    }

    /// Map a libpcap DLT number. Unknown values are treated as unframed.
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            1 => LinkType::Ethernet,
            0 | 108 => LinkType::Null,
            113 => LinkType::LinuxSll,
            276 => LinkType::LinuxSll2,
            _ => LinkType::Raw,
        }
    }

    pub fn has_ethernet_framing(self) -> bool {
        self == LinkType::Ethernet
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkType::Ethernet => "ETHERNET",
            LinkType::Null => "NULL",
            LinkType::LinuxSll => "LINUX_SLL",
            LinkType::LinuxSll2 => "LINUX_SLL2",
            LinkType::Raw => "RAW",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// IPv4 header
// ---------------------------------------------------------------------------

/// The IPv4 fields the classifier consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Always 4.
    pub version: u8,
    /// Header length in bytes, 20..=60.
    pub header_len: usize,
    /// IP protocol number (6=TCP, 17=UDP, 1=ICMP, ...).
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// Result of the network-layer decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkLayer {
    pub header: Ipv4Header,
    /// Offset of the IP header within the frame.
    pub ip_offset: usize,
    /// Offset of the transport header within the frame.
    pub transport_offset: usize,
}

/// Decode the link and IPv4 headers of a frame.
///
/// Returns [`DecodeError::UnsupportedVersion`] for anything but IPv4 (the
/// caller drops such frames) and [`DecodeError::InvalidHeaderLength`] for
/// an IHL below 5.
pub fn decode_network(frame: &ByteReader<'_>, link: LinkType) -> Result<NetworkLayer, DecodeError> {
    let ip = link.header_len();

    let first = frame.u8_at(ip)?;
    let version = first >> 4;
    if version != 4 {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let header_len = (first & 0x0F) as usize * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(DecodeError::InvalidHeaderLength(header_len));
    }

    let protocol = frame.u8_at(ip + 9)?;
    let src = Ipv4Addr::from(frame.u32_at(ip + 12)?);
    let dst = Ipv4Addr::from(frame.u32_at(ip + 16)?);

    Ok(NetworkLayer {
        header: Ipv4Header {
            version,
            header_len,
            protocol,
            src,
            dst,
        },
        ip_offset: ip,
        transport_offset: ip + header_len,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
