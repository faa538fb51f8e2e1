//! # TCP Header Decoding
//!
//! Extracts ports, the flag byte and the data offset from a TCP header and
//! renders the flag set the way the classifier's state table expects it.
//!
//! The rendering order is fixed: `SYN,ACK,FIN,RST,PSH,URG`. A SYN+ACK
//! segment is always `"SYN,ACK"`, never `"ACK,SYN"`.

use std::fmt;

use crate::cursor::{ByteReader, DecodeError};

// ---------------------------------------------------------------------------
// TCP flags
// ---------------------------------------------------------------------------

/// TCP flag bit positions.
pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const RST: u8 = 0x04;
pub const PSH: u8 = 0x08;
pub const ACK: u8 = 0x10;
pub const URG: u8 = 0x20;

/// Minimum TCP header length in bytes.
pub const TCP_MIN_HEADER_LEN: usize = 20;

/// Offset of the flag byte within the TCP header.
const FLAGS_OFFSET: usize = 13;

/// Offset of the data-offset nibble within the TCP header.
const DATA_OFFSET_OFFSET: usize = 12;

/// Rendering order of the flag list.
const RENDER_ORDER: [(u8, &str); 6] = [
    (SYN, "SYN"),
    (ACK, "ACK"),
    (FIN, "FIN"),
    (RST, "RST"),
    (PSH, "PSH"),
    (URG, "URG"),
];

/// Flag combinations that mark connection setup or teardown.
const HANDSHAKE_COMBINATIONS: [u8; 5] = [SYN, SYN | ACK, FIN, FIN | ACK, RST];

/// The flag byte of a TCP segment (ECE/CWR are ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & (FIN | SYN | RST | PSH | ACK | URG))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True for SYN, SYN+ACK, FIN, FIN+ACK and RST: the segments worth
    /// reporting when nothing else is known about the packet. PSH/URG do
    /// not count against a match.
    pub fn is_handshake_or_teardown(self) -> bool {
        let core = self.0 & (FIN | SYN | RST | ACK);
        HANDSHAKE_COMBINATIONS.contains(&core) && self.0 & (PSH | URG) == 0
    }

    /// Parse a comma-joined flag list such as `"SYN,ACK"`.
    ///
    /// Order does not matter; an unknown name or an empty list yields `None`.
    pub fn from_names(list: &str) -> Option<Self> {
        let mut bits = 0u8;
        for name in list.split(',').map(str::trim) {
            let (bit, _) = RENDER_ORDER.iter().find(|(_, n)| *n == name)?;
            bits |= bit;
        }
        Some(Self(bits))
    }

    /// Comma-joined flag names in the fixed rendering order.
    pub fn render(self) -> String {
        RENDER_ORDER
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// ---------------------------------------------------------------------------
// TCP header
// ---------------------------------------------------------------------------

/// Decoded TCP header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: TcpFlags,
    /// Header length in bytes (data offset nibble * 4).
    pub header_len: usize,
}

impl TcpHeader {
    /// Parse the TCP header starting at `offset`.
    ///
    /// Requires the full 20-byte fixed header to be inside the frame.
    pub fn parse(frame: &ByteReader<'_>, offset: usize) -> Result<Self, DecodeError> {
        frame.check(offset, TCP_MIN_HEADER_LEN)?;
        let src_port = frame.u16_at(offset)?;
        let dst_port = frame.u16_at(offset + 2)?;
        let header_len = ((frame.u8_at(offset + DATA_OFFSET_OFFSET)? >> 4) & 0x0F) as usize * 4;
        let flags = TcpFlags::from_bits(frame.u8_at(offset + FLAGS_OFFSET)?);

        Ok(Self {
            src_port,
            dst_port,
            flags,
            header_len,
        })
    }

    /// Offset of the segment payload within the frame.
    ///
    /// Fails when the data offset is below the 20-byte minimum, since the
    /// payload would then start inside the header.
    pub fn payload_offset(&self, tcp_offset: usize) -> Result<usize, DecodeError> {
        if self.header_len < TCP_MIN_HEADER_LEN {
            return Err(DecodeError::InvalidHeaderLength(self.header_len));
        }
        Ok(tcp_offset + self.header_len)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
