//! # Frame Replay Integration Tests
//!
//! Drives a scripted capture source through [`CaptureSession`] and checks
//! the events that reach the sink, in order.

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use crossbeam_channel::Receiver;
use wirelens_engine::protocols::tcp::{ACK, FIN, PSH, RST, SYN};
use wirelens_engine::{
    CallbackSink, CaptureSession, ChannelSink, ClassifiedPacket, EngineConfig, FilterMode,
    PacketState, Protocol, SinkError, StartOutcome,
};

type Harness = (
    CaptureSession<ScriptedSource>,
    FeedHandle,
    Receiver<ClassifiedPacket>,
);

fn session_with(config: &EngineConfig) -> Harness {
    let (source, feed) = ScriptedSource::with_default_devices();
    let (sink, rx) = ChannelSink::unbounded();
    (CaptureSession::new(source, config, Arc::new(sink)), feed, rx)
}

fn session() -> Harness {
    session_with(&EngineConfig::default())
}

fn states(events: &[ClassifiedPacket]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.packet_state.map(|s| s.label()).unwrap_or_default())
        .collect()
}

/// A browser resolving a name, then opening and using an HTTPS connection.
fn https_visit() -> Vec<Vec<u8>> {
    vec![
        udp(CLIENT, 53533, RESOLVER, 53, &dns_query("example.com")),
        udp(RESOLVER, 53, CLIENT, 53533, &dns_response("example.com", &[SERVER])),
        tcp(CLIENT, 50000, SERVER, 443, SYN, &[]),
        tcp(SERVER, 443, CLIENT, 50000, SYN | ACK, &[]),
        tcp(CLIENT, 50000, SERVER, 443, ACK, &[]),
        tcp(CLIENT, 50000, SERVER, 443, PSH | ACK, &client_hello("example.com")),
        tcp(SERVER, 443, CLIENT, 50000, PSH | ACK, &[0x16, 0x03, 0x03, 0x00, 0x04, 0x02, 0, 0, 0]),
        tcp(CLIENT, 50000, SERVER, 443, PSH | ACK, &[0x17, 0x03, 0x03, 0x00, 0x04, 1, 2, 3, 4]),
        tcp(CLIENT, 50000, SERVER, 443, PSH | ACK, &[0x17, 0x03, 0x03, 0x00, 0x04, 5, 6, 7, 8]),
        tcp(SERVER, 443, CLIENT, 50000, PSH | ACK, &[0x17, 0x03, 0x03, 0x00, 0x04, 9, 9, 9, 9]),
        tcp(CLIENT, 50000, SERVER, 443, FIN | ACK, &[]),
        tcp(SERVER, 443, CLIENT, 50000, RST | ACK, &[]),
    ]
}

#[test]
fn test_https_visit_emits_expected_sequence() {
    let (mut s, feed, rx) = session();
    s.start(None).unwrap();
    feed.feed_all(&https_visit());
    s.stop().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        states(&events),
        vec![
            "DNS Query",
            "DNS Response",
            "SYN",
            "SYN,ACK",
            "Client Hello",
            "Server Hello",
            "HTTP(S) Data Transfer",
            "HTTP(S) Data Transfer",
            "ACK,FIN",
        ]
    );

    let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, (1..=events.len() as u64).collect::<Vec<_>>());

    // The SNI and the cached DNS answer both name the server.
    assert_eq!(events[4].domain_name.as_deref(), Some("example.com"));
    assert_eq!(events[5].domain_name.as_deref(), Some("example.com"));
    assert_eq!(events[6].domain_name.as_deref(), Some("example.com"));

    // Plain TCP control packets carry no domain.
    assert_eq!(events[2].domain_name, None);

    let stats = s.stats();
    assert_eq!(stats.frames_received, 12);
    assert_eq!(stats.events_emitted, 9);
    assert_eq!(stats.events_filtered, 3);
    assert_eq!(stats.udp_events, 2);
    assert_eq!(stats.tcp_events, 7);
    assert_eq!(stats.dns_answers_cached, 1);
}

#[test]
fn test_ids_restart_but_dns_cache_survives_restart() {
    let (mut s, feed, rx) = session();
    s.start(None).unwrap();
    feed.feed(&udp(RESOLVER, 53, CLIENT, 53533, &dns_response("example.com", &[SERVER])));
    feed.feed(&tcp(CLIENT, 50000, SERVER, 80, SYN, &[]));
    s.stop().unwrap();
    assert_eq!(rx.try_iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);

    s.start(None).unwrap();
    feed.feed(&tcp(SERVER, 443, CLIENT, 50001, PSH | ACK, &[0x14, 0x03, 0x03, 0x00, 0x01, 0x01]));
    s.stop().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, 1);
    assert_eq!(events[0].domain_name.as_deref(), Some("example.com"));
    assert_eq!(
        events[0].packet_state.map(|s| s.label()).as_deref(),
        Some("Change Cipher Spec")
    );
}

#[test]
fn test_every_answer_is_cached_under_the_question_name() {
    let other = [93, 184, 216, 35];
    let (mut s, feed, rx) = session();
    s.start(None).unwrap();
    let response = dns_response("cdn.example.org", &[SERVER, other]);
    let alert = [0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28];
    feed.feed(&udp(RESOLVER, 53, CLIENT, 53533, &response));
    feed.feed(&tcp(other, 443, CLIENT, 50002, PSH | ACK, &alert));
    s.stop().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].domain_name.as_deref(), Some("cdn.example.org"));
    assert_eq!(events[1].domain_name.as_deref(), Some("cdn.example.org"));
    assert_eq!(s.stats().dns_answers_cached, 2);
}

#[test]
fn test_application_data_is_tracked_per_direction() {
    let (mut s, feed, rx) = session();
    s.start(None).unwrap();
    let record = [0x17, 0x03, 0x03, 0x00, 0x02, 0xAB, 0xCD];
    for _ in 0..3 {
        feed.feed(&tcp(CLIENT, 50000, SERVER, 443, PSH | ACK, &record));
        feed.feed(&tcp(SERVER, 443, CLIENT, 50000, PSH | ACK, &record));
    }
    s.stop().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.packet_state == Some(PacketState::DataTransfer)));
    assert_eq!(events[0].source_port, Some(50000));
    assert_eq!(events[1].source_port, Some(443));
}

#[test]
fn test_significance_filter_and_unfiltered_mode() {
    let frames = vec![
        tcp(CLIENT, 50000, SERVER, 80, ACK, &[]),
        tcp(CLIENT, 50000, SERVER, 80, PSH | ACK, b"GET / HTTP/1.1\r\n"),
        tcp(CLIENT, 50000, SERVER, 80, SYN, &[]),
        tcp(CLIENT, 50000, SERVER, 80, RST, &[]),
        udp(CLIENT, 5353, [224, 0, 0, 251], 5353, b"mdns"),
        ipv4(1, CLIENT, SERVER, &[8, 0, 0, 0, 0, 1, 0, 1]),
        ipv4(47, CLIENT, SERVER, &[0; 8]),
    ];

    let (mut s, feed, rx) = session();
    s.start(None).unwrap();
    feed.feed_all(&frames);
    s.stop().unwrap();
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(states(&events), vec!["SYN", "RST", ""]);
    assert_eq!(events[2].protocol, Protocol::Udp);

    let mut config = EngineConfig::default();
    config.classifier.mode = FilterMode::Unfiltered;
    let (mut s, feed, rx) = session_with(&config);
    s.start(None).unwrap();
    feed.feed_all(&frames);
    s.stop().unwrap();
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 6);
    assert_eq!(events[5].protocol, Protocol::Icmp);
    assert_eq!(events[5].source_port, None);
}

#[test]
fn test_non_ipv4_frames_are_counted_not_emitted() {
    let (mut s, feed, rx) = session();
    s.start(None).unwrap();

    let mut v6 = vec![0u8; 40];
    v6[0] = 0x60;
    feed.feed(&ethernet(0x86DD, &v6));
    feed.feed(&ethernet(0x0806, &[0u8; 28]));
    feed.feed(&[0u8; 6]);
    s.stop().unwrap();

    assert_eq!(rx.try_iter().count(), 0);
    let stats = s.stats();
    assert_eq!(stats.frames_received, 3);
    assert_eq!(stats.frames_unsupported, 3);
}

#[test]
fn test_double_start_and_stop_halts_delivery() {
    let (mut s, feed, rx) = session();
    assert_eq!(
        s.start(Some("eth0")).unwrap(),
        StartOutcome::Started {
            device: "eth0".into(),
            link_type: wirelens_engine::LinkType::Ethernet,
        }
    );
    assert_eq!(s.start(Some("lo")).unwrap(), StartOutcome::AlreadyActive);
    assert_eq!(s.source().opens, 1);
    assert_eq!(s.current_device(), Some("eth0"));

    assert!(feed.feed(&tcp(CLIENT, 1, SERVER, 2, SYN, &[])));
    s.stop().unwrap();
    assert!(!feed.feed(&tcp(CLIENT, 3, SERVER, 4, SYN, &[])));
    assert_eq!(rx.try_iter().count(), 1);
    assert!(!s.is_active());
}

#[test]
fn test_dedup_sink_keeps_first_event_per_address_pair() {
    let mut config = EngineConfig::default();
    config.sink.dedup_ip_pairs = true;
    let (mut s, feed, rx) = session_with(&config);
    s.start(None).unwrap();
    feed.feed(&tcp(CLIENT, 50000, SERVER, 80, SYN, &[]));
    feed.feed(&tcp(CLIENT, 50001, SERVER, 80, SYN, &[]));
    feed.feed(&tcp(SERVER, 80, CLIENT, 50000, SYN | ACK, &[]));
    s.stop().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].source_port, Some(50000));
    assert_eq!(events[1].source_port, Some(80));
}

#[test]
fn test_sink_failures_do_not_stop_the_session() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink = CallbackSink::new(move |packet: ClassifiedPacket| {
        sink_seen.lock().unwrap().push(packet.id);
        if packet.id == 1 {
            Err(SinkError::Rejected("ui busy".into()))
        } else {
            Ok(())
        }
    });

    let (source, feed) = ScriptedSource::with_default_devices();
    let mut s = CaptureSession::new(source, &EngineConfig::default(), Arc::new(sink));
    s.start(None).unwrap();
    feed.feed(&tcp(CLIENT, 1, SERVER, 2, SYN, &[]));
    feed.feed(&tcp(CLIENT, 3, SERVER, 4, SYN, &[]));
    s.stop().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(s.stats().sink_failures, 1);
}

#[test]
fn test_event_json_shape() {
    let (mut s, feed, rx) = session();
    s.start(None).unwrap();
    feed.feed(&udp(CLIENT, 53533, RESOLVER, 53, &dns_query("example.com")));
    feed.feed(&ipv4(1, CLIENT, SERVER, &[8, 0, 0, 0]));
    s.stop().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    let value: serde_json::Value = serde_json::from_str(&events[0].to_json().unwrap()).unwrap();
    assert_eq!(value["id"], 1);
    assert_eq!(value["protocol"], "UDP");
    assert_eq!(value["sourceIP"], "192.168.1.10");
    assert_eq!(value["destIP"], "1.1.1.1");
    assert_eq!(value["sourcePort"], 53533);
    assert_eq!(value["destPort"], 53);
    assert_eq!(value["domainName"], "example.com");
    assert_eq!(value["packetState"], "DNS Query");
    assert_eq!(value["info"], "192.168.1.10:53533 → 1.1.1.1:53");
    assert_eq!(value["length"], events[0].length);
    assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[test]
fn test_device_listing_puts_ipv4_first() {
    let (s, _feed, _rx) = session();
    let devices = s.list_devices().unwrap();
    assert_eq!(devices[0].name, "eth0");
    assert!(devices[0].has_ipv4);
    assert_eq!(devices[0].display_name, "Onboard Ethernet");
    assert_eq!(devices[1].display_name, "lo");
    assert_eq!(
        s.local_ipv4_addresses().unwrap(),
        vec![std::net::Ipv4Addr::new(192, 168, 1, 10)]
    );
}
