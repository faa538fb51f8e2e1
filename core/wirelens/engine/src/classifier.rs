//! # Flow Classifier
//!
//! Turns one captured frame into at most one [`ClassifiedPacket`].
//!
//! ## Per-frame pipeline
//!
//! 1. Link + IPv4 decode. Anything but IPv4 is dropped here.
//! 2. Transport demux. A truncated TCP/UDP header leaves the packet without
//!    ports or flags; the network-layer fields are still used.
//! 3. Application dispatch:
//!    - TCP to or from 443: TLS record phase, SNI for a Client Hello. The
//!      first Application Data record of a connection is reported as
//!      `HTTP(S) Data Transfer`; later ones report no state at all. A TLS
//!      state without an SNI borrows the domain from the DNS answer cache,
//!      keyed by the server side of the connection.
//!    - UDP to or from 53: `DNS Query` / `DNS Response` with the question
//!      name; the A records of a response are cached.
//! 4. Filter ([`FilterMode`]) and id assignment.

use std::net::Ipv4Addr;

use chrono::{SecondsFormat, Utc};

use crate::capture::RawFrame;
use crate::config::{ClassifierConfig, FilterMode};
use crate::conntrack::{AppDataTracker, ConnectionKey, DnsAnswerCache};
use crate::cursor::{ByteReader, DecodeError};
use crate::event::{summary, ClassifiedPacket, PacketState, Protocol};
use crate::protocols::link::decode_network;
use crate::protocols::tls::{TlsPhase, HTTPS_PORT};
use crate::protocols::transport::{demux, TransportHeader};
use crate::protocols::{dispatch, ApplicationLayer};

/// Frames per session logged at `debug` level.
const DEBUG_FRAME_COUNT: u64 = 10;

/// Outcome of classifying one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Not an IPv4 packet, or the IPv4 header is unreadable.
    Unsupported(DecodeError),
    /// Decoded, but not worth emitting under the current filter mode.
    Filtered,
    /// Emit this event.
    Emit(ClassifiedPacket),
}

impl Verdict {
    pub fn into_packet(self) -> Option<ClassifiedPacket> {
        match self {
            Verdict::Emit(packet) => Some(packet),
            _ => None,
        }
    }
}

/// The decode-classify stage of a capture session.
///
/// Owns the DNS answer cache and the Application Data tracker. Both survive
/// [`FlowClassifier::begin_session`]; only the id sequence restarts.
pub struct FlowClassifier {
    mode: FilterMode,
    dns_cache: DnsAnswerCache,
    app_data: AppDataTracker,
    last_id: u64,
    frames_seen: u64,
    answers_cached: u64,
}

impl FlowClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            mode: config.mode,
            dns_cache: DnsAnswerCache::new(config.dns_cache_capacity),
            app_data: AppDataTracker::new(config.app_data_capacity),
            last_id: 0,
            frames_seen: 0,
            answers_cached: 0,
        }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: FilterMode) {
        self.mode = mode;
    }

    /// Restart the id sequence at 1 and the per-session counters at 0.
    pub fn begin_session(&mut self) {
        self.last_id = 0;
        self.frames_seen = 0;
        self.answers_cached = 0;
    }

    /// Id of the last emitted event (0 before the first).
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// DNS answers cached since the session began.
    pub fn answers_cached(&self) -> u64 {
        self.answers_cached
    }

    pub fn dns_cache(&self) -> &DnsAnswerCache {
        &self.dns_cache
    }

    pub fn app_data(&self) -> &AppDataTracker {
        &self.app_data
    }

    /// Classify a frame, returning the event only when it is emitted.
    pub fn classify(&mut self, frame: &RawFrame<'_>) -> Option<ClassifiedPacket> {
        self.process(frame).into_packet()
    }

    /// Classify a frame.
    pub fn process(&mut self, frame: &RawFrame<'_>) -> Verdict {
        self.frames_seen += 1;
        let verbose = self.frames_seen <= DEBUG_FRAME_COUNT;

        let reader = ByteReader::over(frame.data);
        let net = match decode_network(&reader, frame.link_type) {
            Ok(net) => net,
            Err(e) => {
                if verbose {
                    tracing::debug!(
                        link = %frame.link_type,
                        bytes = frame.byte_count,
                        error = %e,
                        "frame dropped"
                    );
                }
                return Verdict::Unsupported(e);
            }
        };
        let ip = net.header;

        let transport = demux(&reader, &net)
            .map_err(|e| {
                tracing::trace!(
                    src = %ip.src,
                    dst = %ip.dst,
                    error = %e,
                    "transport header unreadable"
                )
            })
            .ok();
        let protocol = Protocol::from_ip_proto(ip.protocol);
        let ports = transport.as_ref().and_then(TransportHeader::ports);

        let mut state = transport
            .as_ref()
            .and_then(TransportHeader::tcp_flags)
            .filter(|flags| !flags.is_empty())
            .map(PacketState::Tcp);
        let mut domain: Option<String> = None;

        let app = transport
            .as_ref()
            .and_then(|t| dispatch(&reader, &net, t));

        match app {
            Some(ApplicationLayer::Tls { phase, sni }) => {
                let (src_port, dst_port) = ports.unwrap_or_default();
                state = if phase == TlsPhase::ApplicationData {
                    let key = ConnectionKey::new(ip.src, src_port, ip.dst, dst_port);
                    if self.app_data.first_sighting(key) {
                        Some(PacketState::DataTransfer)
                    } else {
                        None
                    }
                } else {
                    Some(PacketState::Tls(phase))
                };

                if state.is_some() {
                    domain = sni.filter(|name| !name.is_empty()).or_else(|| {
                        let server = if dst_port == HTTPS_PORT { ip.dst } else { ip.src };
                        self.dns_cache.lookup(server)
                    });
                }
            }
            Some(ApplicationLayer::Dns { response, message }) => {
                state = Some(if response {
                    PacketState::DnsResponse
                } else {
                    PacketState::DnsQuery
                });
                if let Some(message) = message {
                    if let (true, Some(name)) = (response, message.query.as_deref()) {
                        self.cache_answers(name, &message.answers);
                    }
                    domain = message.query;
                }
            }
            None => {}
        }

        let domain = domain.filter(|d| !d.is_empty());

        let keep = match self.mode {
            FilterMode::Significant => {
                state.as_ref().is_some_and(PacketState::is_significant)
                    || domain.is_some()
                    || protocol == Protocol::Udp
            }
            FilterMode::Unfiltered => {
                matches!(protocol, Protocol::Tcp | Protocol::Udp | Protocol::Icmp)
            }
        };

        if !keep {
            if verbose {
                tracing::debug!(%protocol, src = %ip.src, dst = %ip.dst, "frame filtered");
            }
            return Verdict::Filtered;
        }

        self.last_id += 1;
        let packet = ClassifiedPacket {
            id: self.last_id,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            protocol,
            source_ip: ip.src,
            dest_ip: ip.dst,
            source_port: ports.map(|(src, _)| src),
            dest_port: ports.map(|(_, dst)| dst),
            length: frame.byte_count,
            info: summary(ip.src, ip.dst, ports),
            domain_name: domain,
            packet_state: state,
        };

        if verbose {
            let state = packet.packet_state.map(|s| s.label()).unwrap_or_default();
            tracing::debug!(
                id = packet.id,
                protocol = %packet.protocol,
                info = %packet.info,
                domain = packet.domain_name.as_deref().unwrap_or("-"),
                state = %state,
                "frame classified"
            );
        }

        Verdict::Emit(packet)
    }

    fn cache_answers(&mut self, name: &str, answers: &[Ipv4Addr]) {
        for addr in answers {
            self.dns_cache.insert(*addr, name);
            self.answers_cached += 1;
            tracing::debug!(%addr, domain = name, "DNS answer cached");
        }
    }
}

impl Default for FlowClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
