//! # DNS Decoder
//!
//! Extracts the question name from DNS queries and responses, and the A
//! records from responses so the classifier can attribute later HTTPS
//! connections to the name that resolved to their address.
//!
//! Names are decoded with label decompression. The walk is bounded: at
//! most [`MAX_COMPRESSION_JUMPS`] pointer jumps and [`MAX_LABELS`] labels,
//! so a self-referencing pointer or an absurdly long name terminates with a
//! partial name or an error instead of looping.
//!
//! ## Wire Format Reference
//!
//! ```text
//!  0                   1
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Transaction ID        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Flags                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         QDCOUNT               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         ANCOUNT               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         NSCOUNT               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         ARCOUNT               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Compression pointer offsets are relative to the start of the DNS
//! message (the first byte of the transaction ID).

use std::net::Ipv4Addr;

use crate::cursor::{ByteReader, DecodeError};

/// DNS server port.
pub const DNS_PORT: u16 = 53;

/// DNS header length in bytes.
pub const DNS_HEADER_LEN: usize = 12;

/// Upper bound on compression pointer jumps while decoding one name.
pub const MAX_COMPRESSION_JUMPS: usize = 5;

/// Upper bound on labels in one name.
pub const MAX_LABELS: usize = 20;

/// Longest legal label.
pub const MAX_LABEL_LEN: u8 = 63;

/// Record type: IPv4 host address.
const TYPE_A: u16 = 1;

// ---------------------------------------------------------------------------
// Query type mapping
// ---------------------------------------------------------------------------

/// Map a DNS query type number to its mnemonic name.
pub fn qtype_to_name(qtype: u16) -> &'static str {
    match qtype {
        1 => "A",
        2 => "NS",
        5 => "CNAME",
        6 => "SOA",
        12 => "PTR",
        15 => "MX",
        16 => "TXT",
        28 => "AAAA",
        33 => "SRV",
        65 => "HTTPS",
        255 => "ANY",
        _ => "UNKNOWN",
    }
}

// ---------------------------------------------------------------------------
// Name decoding
// ---------------------------------------------------------------------------

/// A decoded domain name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainName {
    /// Labels joined with `.`; empty for the root name.
    pub name: String,
    /// Offset just past the name in the original (uncompressed) position.
    /// Only meaningful when `complete` is true.
    pub end: usize,
    /// False when decoding stopped early (bound hit or malformed label)
    /// and `name` holds the labels read so far.
    pub complete: bool,
}

/// Decode a (possibly compressed) name starting at `start`.
///
/// If decoding stops early after at least one label, the labels read so far
/// are returned with `complete == false`. If it stops before any label was
/// read, the error is returned.
pub fn parse_dns_name(msg: &ByteReader<'_>, start: usize) -> Result<DomainName, DecodeError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut jumps = 0usize;
    let mut return_offset: Option<usize> = None;

    let partial = |labels: Vec<String>, pos: usize, err: DecodeError| {
        if labels.is_empty() {
            Err(err)
        } else {
            Ok(DomainName {
                name: labels.join("."),
                end: pos,
                complete: false,
            })
        }
    };

    loop {
        let len_byte = match msg.u8_at(pos) {
            Ok(b) => b,
            Err(e) => return partial(labels, pos, e),
        };

        if len_byte == 0 {
            return Ok(DomainName {
                name: labels.join("."),
                end: return_offset.unwrap_or(pos + 1),
                complete: true,
            });
        }

        // Compression pointer (top 2 bits set)
        if len_byte & 0xC0 == 0xC0 {
            let low = match msg.u8_at(pos + 1) {
                Ok(b) => b,
                Err(e) => return partial(labels, pos, e),
            };
            if jumps == MAX_COMPRESSION_JUMPS {
                return partial(labels, pos, DecodeError::TooManyJumps(MAX_COMPRESSION_JUMPS));
            }
            jumps += 1;
            if return_offset.is_none() {
                return_offset = Some(pos + 2);
            }
            pos = ((len_byte as usize & 0x3F) << 8) | low as usize;
            continue;
        }

        if len_byte > MAX_LABEL_LEN {
            return partial(labels, pos, DecodeError::LabelTooLong(len_byte));
        }
        if labels.len() == MAX_LABELS {
            return partial(labels, pos, DecodeError::TooManyLabels(MAX_LABELS));
        }

        let label = match msg.str_at(pos + 1, len_byte as usize) {
            Ok(s) => s,
            Err(e) => return partial(labels, pos, e),
        };
        labels.push(label);
        pos += 1 + len_byte as usize;
    }
}

/// Skip a name, failing unless it decodes completely.
fn skip_name(msg: &ByteReader<'_>, start: usize) -> Result<usize, DecodeError> {
    let name = parse_dns_name(msg, start)?;
    if name.complete {
        Ok(name.end)
    } else {
        Err(DecodeError::OutOfBounds {
            offset: name.end,
            width: 1,
            bound: msg.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Message decoding
// ---------------------------------------------------------------------------

/// The parts of a DNS message the classifier uses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DnsMessage {
    pub trans_id: u16,
    pub question_count: u16,
    pub answer_count: u16,
    /// First question name, if any label could be decoded.
    pub query: Option<String>,
    /// Query type of the first question.
    pub qtype: Option<u16>,
    /// A-record addresses from the answer section, in wire order.
    pub answers: Vec<Ipv4Addr>,
}

impl DnsMessage {
    /// The first A-record address, reported as the resolved answer.
    pub fn first_answer(&self) -> Option<Ipv4Addr> {
        self.answers.first().copied()
    }
}

/// Parse a DNS message.
///
/// `msg` must start at the DNS header (the UDP payload). The answer
/// section is only walked when `with_answers` is set; a malformed answer
/// stops the walk but keeps the addresses collected before it.
pub fn parse_message(msg: &ByteReader<'_>, with_answers: bool) -> Result<DnsMessage, DecodeError> {
    msg.check(0, DNS_HEADER_LEN)?;

    let mut message = DnsMessage {
        trans_id: msg.u16_at(0)?,
        question_count: msg.u16_at(4)?,
        answer_count: msg.u16_at(6)?,
        ..DnsMessage::default()
    };

    if message.question_count == 0 {
        return Ok(message);
    }

    let first = parse_dns_name(msg, DNS_HEADER_LEN)?;
    if !first.name.is_empty() {
        message.query = Some(first.name.clone());
    }
    if !first.complete {
        return Ok(message);
    }
    message.qtype = msg.u16_at(first.end).ok();

    if with_answers && message.answer_count > 0 {
        if let Err(e) = walk_answers(msg, first.end + 4, &mut message) {
            tracing::trace!(error = %e, "DNS answer walk stopped early");
        }
    }

    Ok(message)
}

/// Skip the remaining questions, then collect A records from the answers.
fn walk_answers(
    msg: &ByteReader<'_>,
    after_first_question: usize,
    message: &mut DnsMessage,
) -> Result<(), DecodeError> {
    let mut offset = after_first_question;
    for _ in 1..message.question_count {
        offset = skip_name(msg, offset)? + 4; // QTYPE + QCLASS
    }

    for _ in 0..message.answer_count {
        offset = skip_name(msg, offset)?;
        let rtype = msg.u16_at(offset)?;
        // CLASS(2) + TTL(4)
        let rdlength = msg.u16_at(offset + 8)? as usize;
        let rdata = offset + 10;
        msg.check(rdata, rdlength)?;

        if rtype == TYPE_A && rdlength == 4 {
            message.answers.push(Ipv4Addr::from(msg.u32_at(rdata)?));
        }
        offset = rdata + rdlength;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_name(name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out
    }

    fn header(qd: u16, an: u16, response: bool) -> Vec<u8> {
        let mut h = vec![0u8; 12];
        h[0..2].copy_from_slice(&0x1234u16.to_be_bytes());
        if response {
            h[2] = 0x81;
            h[3] = 0x80;
        }
        h[4..6].copy_from_slice(&qd.to_be_bytes());
        h[6..8].copy_from_slice(&an.to_be_bytes());
        h
    }

    fn response(name: &str, answers: &[(u16, &[u8])]) -> Vec<u8> {
        let mut msg = header(1, answers.len() as u16, true);
        msg.extend(encode_name(name));
        msg.extend([0, 1, 0, 1]);
        for (rtype, rdata) in answers {
            msg.extend([0xC0, 0x0C]); // pointer to the question name
            msg.extend(rtype.to_be_bytes());
            msg.extend([0, 1, 0, 0, 0x0E, 0x10]);
            msg.extend((rdata.len() as u16).to_be_bytes());
            msg.extend_from_slice(rdata);
        }
        msg
    }

    #[test]
    fn test_qtype_to_name() {
        assert_eq!(qtype_to_name(1), "A");
        assert_eq!(qtype_to_name(28), "AAAA");
        assert_eq!(qtype_to_name(65), "HTTPS");
        assert_eq!(qtype_to_name(9999), "UNKNOWN");
    }

    #[test]
    fn test_parse_dns_name_simple() {
        let buf = b"\x07example\x03com\x00";
        let name = parse_dns_name(&ByteReader::over(buf), 0).unwrap();
        assert_eq!(name.name, "example.com");
        assert_eq!(name.end, buf.len());
        assert!(name.complete);
    }

    #[test]
    fn test_parse_dns_name_root() {
        let name = parse_dns_name(&ByteReader::over(b"\x00"), 0).unwrap();
        assert_eq!(name.name, "");
        assert!(name.complete);
    }

    #[test]
    fn test_parse_dns_name_compressed_suffix() {
        // "example.com" at 0, then "www" + pointer to 0 at 13
        let mut buf = encode_name("example.com");
        buf.extend(b"\x03www\xC0\x00");
        let name = parse_dns_name(&ByteReader::over(&buf), 13).unwrap();
        assert_eq!(name.name, "www.example.com");
        assert_eq!(name.end, buf.len());
    }

    #[test]
    fn test_self_referential_pointer_terminates() {
        let buf = [0xC0u8, 0x00];
        let err = parse_dns_name(&ByteReader::over(&buf), 0).unwrap_err();
        assert_eq!(err, DecodeError::TooManyJumps(MAX_COMPRESSION_JUMPS));
    }

    #[test]
    fn test_pointer_loop_after_label_is_partial() {
        // "abc" followed by a pointer back to itself
        let buf = b"\x03abc\xC0\x00";
        let name = parse_dns_name(&ByteReader::over(buf), 0).unwrap();
        assert!(!name.complete);
        assert!(name.name.starts_with("abc"));
        assert!(name.name.split('.').count() <= MAX_LABELS);
    }

    #[test]
    fn test_label_cap() {
        let long = vec!["a"; 30].join(".");
        let buf = encode_name(&long);
        let name = parse_dns_name(&ByteReader::over(&buf), 0).unwrap();
        assert!(!name.complete);
        assert_eq!(name.name.split('.').count(), MAX_LABELS);
    }

    #[test]
    fn test_label_too_long() {
        let buf = [0x40u8, b'a'];
        assert_eq!(
            parse_dns_name(&ByteReader::over(&buf), 0).unwrap_err(),
            DecodeError::LabelTooLong(0x40)
        );
    }

    #[test]
    fn test_label_past_bound() {
        let buf = b"\x03www\x07exam";
        let name = parse_dns_name(&ByteReader::over(buf), 0).unwrap();
        assert_eq!(name.name, "www");
        assert!(!name.complete);
    }

    #[test]
    fn test_parse_query() {
        let mut msg = header(1, 0, false);
        msg.extend(encode_name("www.example.com"));
        msg.extend([0, 1, 0, 1]);
        let parsed = parse_message(&ByteReader::over(&msg), false).unwrap();
        assert_eq!(parsed.trans_id, 0x1234);
        assert_eq!(parsed.query.as_deref(), Some("www.example.com"));
        assert_eq!(parsed.qtype, Some(1));
        assert!(parsed.answers.is_empty());
    }

    #[test]
    fn test_parse_response_a_record() {
        let msg = response("example.com", &[(1, &[93, 184, 216, 34])]);
        let parsed = parse_message(&ByteReader::over(&msg), true).unwrap();
        assert_eq!(parsed.query.as_deref(), Some("example.com"));
        assert_eq!(parsed.first_answer(), Some(Ipv4Addr::new(93, 184, 216, 34)));
    }

    #[test]
    fn test_parse_response_skips_cname_and_aaaa() {
        let cname = encode_name("edge.example.net");
        let aaaa = [0u8; 16];
        let msg = response(
            "example.com",
            &[(5, &cname), (28, &aaaa), (1, &[10, 0, 0, 1]), (1, &[10, 0, 0, 2])],
        );
        let parsed = parse_message(&ByteReader::over(&msg), true).unwrap();
        assert_eq!(
            parsed.answers,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
    }

    #[test]
    fn test_truncated_answer_keeps_earlier_records() {
        let mut msg = response("example.com", &[(1, &[10, 0, 0, 1]), (1, &[10, 0, 0, 2])]);
        msg.truncate(msg.len() - 2);
        let parsed = parse_message(&ByteReader::over(&msg), true).unwrap();
        assert_eq!(parsed.answers, vec![Ipv4Addr::new(10, 0, 0, 1)]);
    }

    #[test]
    fn test_answers_ignored_without_flag() {
        let msg = response("example.com", &[(1, &[10, 0, 0, 1])]);
        let parsed = parse_message(&ByteReader::over(&msg), false).unwrap();
        assert!(parsed.answers.is_empty());
    }

    #[test]
    fn test_zero_questions() {
        let msg = header(0, 0, false);
        let parsed = parse_message(&ByteReader::over(&msg), true).unwrap();
        assert!(parsed.query.is_none());
    }

    #[test]
    fn test_parser_too_short() {
        assert!(parse_message(&ByteReader::over(b"short"), false).is_err());
    }
}
