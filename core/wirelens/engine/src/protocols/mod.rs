//! # Protocol Decoders
//!
//! Layered decoders for the frames handed over by a capture source. Each
//! layer reads through [`crate::cursor::ByteReader`] and reports a bounds
//! failure as a [`crate::cursor::DecodeError`]; the classifier decides how
//! much of the packet survives a failed layer.
//!
//! ## Supported Protocols
//!
//! | Module      | Layer                       | Scope                    |
//! |-------------|-----------------------------|--------------------------|
//! | `link`      | Link framing + IPv4         | every frame              |
//! | `transport` | TCP / UDP / ICMP demux      | every IPv4 packet        |
//! | `tcp`       | TCP header and flag render  | IP protocol 6            |
//! | `dns`       | DNS question + A answers    | 53/udp                   |
//! | `tls`       | TLS record phase + SNI      | 443/tcp                  |

pub mod dns;
pub mod link;
pub mod tcp;
pub mod tls;
pub mod transport;

use crate::cursor::ByteReader;
use crate::protocols::dns::{DnsMessage, DNS_PORT};
use crate::protocols::link::NetworkLayer;
use crate::protocols::tls::{TlsPhase, HTTPS_PORT};
use crate::protocols::transport::{TransportHeader, UDP_HEADER_LEN};

// ---------------------------------------------------------------------------
// Application layer
// ---------------------------------------------------------------------------

/// Result of the application-layer dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationLayer {
    /// A recognised TLS record on a port-443 segment.
    Tls {
        phase: TlsPhase,
        /// SNI host name, only for a complete Client Hello.
        sni: Option<String>,
    },
    /// A datagram to or from port 53.
    Dns {
        /// Source port was 53.
        response: bool,
        /// `None` when the message could not be decoded at all.
        message: Option<DnsMessage>,
    },
}

/// Run the application-layer decoder selected by the transport ports.
///
/// Returns `None` when no decoder applies or the TLS peek fails. A DNS
/// datagram always yields [`ApplicationLayer::Dns`], even when its body is
/// malformed.
pub fn dispatch(
    frame: &ByteReader<'_>,
    net: &NetworkLayer,
    transport: &TransportHeader,
) -> Option<ApplicationLayer> {
    match transport {
        TransportHeader::Tcp(tcp) if transport.involves_port(HTTPS_PORT) => {
            let record = match tcp.payload_offset(net.transport_offset) {
                Ok(record) => record,
                Err(e) => {
                    tracing::trace!(error = %e, "TCP data offset too short");
                    return None;
                }
            };
            let phase = match tls::classify_record(frame, record) {
                Ok(Some(phase)) => phase,
                Ok(None) => return None,
                Err(e) => {
                    tracing::trace!(error = %e, "no TLS record");
                    return None;
                }
            };

            let sni = if phase == TlsPhase::ClientHello {
                tls::extract_sni(frame, record).unwrap_or_else(|e| {
                    tracing::trace!(error = %e, "SNI walk failed");
                    None
                })
            } else {
                None
            };

            Some(ApplicationLayer::Tls { phase, sni })
        }
        TransportHeader::Udp { src_port, .. } if transport.involves_port(DNS_PORT) => {
            let response = *src_port == DNS_PORT;
            let message = frame
                .tail(net.transport_offset + UDP_HEADER_LEN)
                .and_then(|msg| dns::parse_message(&msg, response))
                .map_err(|e| tracing::trace!(error = %e, "DNS decode failed"))
                .ok();
            Some(ApplicationLayer::Dns { response, message })
        }
        _ => None,
    }
}
