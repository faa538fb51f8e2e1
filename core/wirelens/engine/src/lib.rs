//! # Wirelens Engine
//!
//! Live traffic decoding and flow classification for a desktop traffic
//! inspector. Each captured frame is decoded (link, IPv4, TCP/UDP/ICMP,
//! DNS, TLS record) and classified into at most one [`ClassifiedPacket`]
//! carrying a protocol label, TCP flag or TLS phase state, and the domain
//! name the traffic belongs to when one can be determined.
//!
//! ## Architecture
//!
//! - **cursor**: Bounds-checked byte reader every decoder is written against
//! - **protocols**: Link/IPv4, transport, DNS and TLS decoders
//! - **conntrack**: DNS answer cache and per-connection Application Data tracking
//! - **classifier**: Combines decoder output into events and filters them
//! - **capture**: Capture-source capability trait and device naming
//! - **session**: Capture session lifecycle, event sinks, statistics
//! - **config**: JSON configuration
//!
//! ## Features
//!
//! - `pcap`: libpcap-backed [`pcap_source::PcapSource`] and the `wirelens` CLI
//! - `python`: PyO3 bindings exposed as the `wirelens_engine` module

pub mod capture;
pub mod classifier;
pub mod config;
pub mod conntrack;
pub mod cursor;
pub mod event;
pub mod protocols;
pub mod session;

#[cfg(feature = "pcap")]
pub mod pcap_source;

#[cfg(feature = "python")]
mod python;

pub use capture::{
    CaptureDevice, CaptureError, CaptureSource, DeviceDescriptor, FrameHandler, Platform, RawFrame,
};
pub use classifier::{FlowClassifier, Verdict};
pub use config::{ConfigError, EngineConfig, FilterMode};
pub use cursor::DecodeError;
pub use event::{ClassifiedPacket, PacketState, Protocol, ServiceHint};
pub use protocols::link::LinkType;
pub use session::{
    CallbackSink, CaptureSession, ChannelSink, EventSink, PairDedupSink, SinkError, StartOutcome,
    StatsSnapshot,
};
