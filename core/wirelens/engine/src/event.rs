//! # Classified Packet Events
//!
//! [`ClassifiedPacket`] is the one record that leaves the engine. Its JSON
//! shape uses the camelCase field names the display layer consumes:
//!
//! ```json
//! {"id":1,"timestamp":"2024-05-01T12:00:00.123Z","protocol":"TCP",
//!  "sourceIP":"192.168.1.10","destIP":"93.184.216.34",
//!  "sourcePort":50000,"destPort":443,"length":583,
//!  "info":"192.168.1.10:50000 → 93.184.216.34:443",
//!  "domainName":"example.com","packetState":"Client Hello"}
//! ```
//!
//! Optional fields are omitted when absent.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::protocols::tcp::TcpFlags;
use crate::protocols::tls::TlsPhase;
use crate::protocols::transport::{PROTO_ICMP, PROTO_TCP, PROTO_UDP};

// ---------------------------------------------------------------------------
// Protocol label
// ---------------------------------------------------------------------------

/// Transport protocol label of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    /// Any other IP protocol number, rendered `Protocol N`.
    Other(u8),
}

impl Protocol {
    pub fn from_ip_proto(proto: u8) -> Self {
        match proto {
            PROTO_TCP => Protocol::Tcp,
            PROTO_UDP => Protocol::Udp,
            PROTO_ICMP => Protocol::Icmp,
            n => Protocol::Other(n),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Other(n) => write!(f, "Protocol {n}"),
        }
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.to_string()
    }
}

impl TryFrom<String> for Protocol {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "ICMP" => Ok(Protocol::Icmp),
            other => other
                .strip_prefix("Protocol ")
                .and_then(|n| n.parse().ok())
                .map(Protocol::Other)
                .ok_or_else(|| format!("unknown protocol label: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Packet state
// ---------------------------------------------------------------------------

/// Label for the first Application Data record of a connection.
pub const DATA_TRANSFER_LABEL: &str = "HTTP(S) Data Transfer";
pub const DNS_QUERY_LABEL: &str = "DNS Query";
pub const DNS_RESPONSE_LABEL: &str = "DNS Response";

/// What the classifier learned about a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PacketState {
    /// TCP flag combination (no TLS signal).
    Tcp(TcpFlags),
    /// Recognised TLS record phase other than Application Data.
    Tls(TlsPhase),
    /// First Application Data record of a connection.
    DataTransfer,
    DnsQuery,
    DnsResponse,
}

impl PacketState {
    /// The label carried in the event.
    pub fn label(&self) -> String {
        match self {
            PacketState::Tcp(flags) => flags.render(),
            PacketState::Tls(phase) => phase.label().to_string(),
            PacketState::DataTransfer => DATA_TRANSFER_LABEL.to_string(),
            PacketState::DnsQuery => DNS_QUERY_LABEL.to_string(),
            PacketState::DnsResponse => DNS_RESPONSE_LABEL.to_string(),
        }
    }

    /// True for states that alone make a packet worth emitting.
    pub fn is_significant(&self) -> bool {
        match self {
            PacketState::Tcp(flags) => flags.is_handshake_or_teardown(),
            _ => true,
        }
    }

    /// Human-readable explanation of the state.
    ///
    /// Flag combinations without their own entry are explained flag by
    /// flag.
    pub fn description(&self) -> String {
        let label = self.label();
        if let Some(text) = describe_label(&label) {
            return text.to_string();
        }
        label
            .split(',')
            .filter_map(describe_label)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn describe_label(label: &str) -> Option<&'static str> {
    let text = match label {
        "SYN" => "SYN (Synchronize): requests a new TCP connection.",
        "ACK" => "ACK (Acknowledgment): confirms receipt of data from the peer.",
        "FIN" => "FIN (Finish): the sender has no more data and asks to close the connection.",
        "RST" => "RST (Reset): aborts the connection immediately.",
        "PSH" => {
            "PSH (Push): asks the receiver to hand the data to the application without buffering."
        }
        "URG" => "URG (Urgent): the segment carries urgent data.",
        "SYN,ACK" => {
            "SYN+ACK: second step of the three-way handshake; the server accepts the connection."
        }
        "ACK,FIN" => "FIN+ACK: part of an orderly connection close.",
        "ACK,PSH" => {
            "PSH+ACK: pushes data while acknowledging earlier data, as in request/response traffic."
        }
        "Client Hello" => {
            "TLS Client Hello: the client opens a TLS session and offers its cipher suites."
        }
        "Server Hello" => {
            "TLS Server Hello: the server picks the cipher suite and protocol version."
        }
        "Certificate" => {
            "TLS Certificate: the server presents its certificate chain to prove its identity."
        }
        "Client Key Exchange" => {
            "TLS Client Key Exchange: the client sends key material for the session keys."
        }
        "Change Cipher Spec" => "TLS Change Cipher Spec: subsequent records are encrypted.",
        "Finished" => "TLS Finished: the handshake is complete and encrypted traffic begins.",
        "Alert" => "TLS Alert: a warning or error, often the end of the connection.",
        "Application Data" => "TLS Application Data: encrypted application payload.",
        DATA_TRANSFER_LABEL => {
            "HTTP(S) Data Transfer: encrypted data is flowing on this connection. \
             Only the first Application Data record is shown."
        }
        DNS_QUERY_LABEL => "DNS Query: asks a resolver for the address of a domain name.",
        DNS_RESPONSE_LABEL => {
            "DNS Response: the resolver's answer; its addresses are remembered to name \
             later HTTPS connections."
        }
        _ => return None,
    };
    Some(text)
}

impl fmt::Display for PacketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl From<PacketState> for String {
    fn from(s: PacketState) -> Self {
        s.label()
    }
}

impl TryFrom<String> for PacketState {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        const PHASES: [TlsPhase; 7] = [
            TlsPhase::ClientHello,
            TlsPhase::ServerHello,
            TlsPhase::Certificate,
            TlsPhase::ClientKeyExchange,
            TlsPhase::Finished,
            TlsPhase::ChangeCipherSpec,
            TlsPhase::Alert,
        ];

        match s.as_str() {
            DATA_TRANSFER_LABEL => return Ok(PacketState::DataTransfer),
            DNS_QUERY_LABEL => return Ok(PacketState::DnsQuery),
            DNS_RESPONSE_LABEL => return Ok(PacketState::DnsResponse),
            _ => {}
        }
        if let Some(phase) = PHASES.iter().find(|p| p.label() == s) {
            return Ok(PacketState::Tls(*phase));
        }
        TcpFlags::from_names(&s)
            .map(PacketState::Tcp)
            .ok_or_else(|| format!("unknown packet state: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Classified packet
// ---------------------------------------------------------------------------

/// One emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedPacket {
    /// Sequence number, starting at 1 for each capture session.
    pub id: u64,
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub timestamp: String,
    pub protocol: Protocol,
    #[serde(rename = "sourceIP")]
    pub source_ip: Ipv4Addr,
    #[serde(rename = "destIP")]
    pub dest_ip: Ipv4Addr,
    #[serde(rename = "sourcePort", skip_serializing_if = "Option::is_none", default)]
    pub source_port: Option<u16>,
    #[serde(rename = "destPort", skip_serializing_if = "Option::is_none", default)]
    pub dest_port: Option<u16>,
    /// Wire length of the frame in bytes.
    pub length: u32,
    pub info: String,
    #[serde(rename = "domainName", skip_serializing_if = "Option::is_none", default)]
    pub domain_name: Option<String>,
    #[serde(rename = "packetState", skip_serializing_if = "Option::is_none", default)]
    pub packet_state: Option<PacketState>,
}

impl ClassifiedPacket {
    /// Serialize to the JSON wire shape.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Service guess for the destination port.
    pub fn service_hint(&self) -> ServiceHint {
        ServiceHint::from_packet(self)
    }
}

/// The one-line summary: `src:sport → dst:dport`, or `src → dst` without
/// ports.
pub fn summary(src: Ipv4Addr, dst: Ipv4Addr, ports: Option<(u16, u16)>) -> String {
    match ports {
        Some((sport, dport)) => format!("{src}:{sport} → {dst}:{dport}"),
        None => format!("{src} → {dst}"),
    }
}

// ---------------------------------------------------------------------------
// Service hint
// ---------------------------------------------------------------------------

/// Well-known service guessed from the protocol and destination port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHint {
    pub service: String,
    pub purpose: &'static str,
    /// True when traffic on this service is normally encrypted.
    pub encrypted: bool,
}

impl ServiceHint {
    fn known(service: &str, purpose: &'static str, encrypted: bool) -> Self {
        Self {
            service: service.to_string(),
            purpose,
            encrypted,
        }
    }

    /// Heuristic guess; the payload is not inspected.
    pub fn from_packet(packet: &ClassifiedPacket) -> Self {
        let port = packet.dest_port.unwrap_or(0);
        match (packet.protocol, port) {
            (Protocol::Tcp, 443) => Self::known("HTTPS", "Encrypted web traffic", true),
            (Protocol::Tcp, 80) => Self::known("HTTP", "Unencrypted web traffic", false),
            (Protocol::Tcp, 143) => Self::known("IMAP", "Mail retrieval", false),
            (Protocol::Tcp, 993) => Self::known("IMAPS", "Encrypted mail retrieval", true),
            (Protocol::Tcp, 22) => Self::known("SSH", "Remote shell", true),
            (Protocol::Tcp, 3389) => Self::known("RDP", "Remote desktop", false),
            (Protocol::Tcp, p) => Self::known(&format!("TCP port {p}"), "Unknown", false),
            (Protocol::Udp, 443) => Self::known("QUIC", "HTTP/3 web traffic", true),
            (Protocol::Udp, 53) => Self::known("DNS", "Domain name resolution", false),
            (Protocol::Udp, 5353) => Self::known("mDNS", "Local device discovery", false),
            (Protocol::Udp, 137) => {
                Self::known("NetBIOS", "Windows file and printer sharing", false)
            }
            (Protocol::Udp, p) => Self::known(&format!("UDP port {p}"), "Unknown", false),
            (Protocol::Icmp, _) => {
                Self::known("ICMP", "Network diagnostics (ping, traceroute)", false)
            }
            (Protocol::Other(_), _) => Self::known("Unknown", "Unknown", false),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
