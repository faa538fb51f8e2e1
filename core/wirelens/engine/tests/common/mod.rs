//! Shared helpers for the integration suites: a frame builder and a
//! capture source driven from the test body.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use wirelens_engine::{
    CaptureError, CaptureSource, DeviceDescriptor, FrameHandler, LinkType, Platform, RawFrame,
};

pub const CLIENT: [u8; 4] = [192, 168, 1, 10];
pub const SERVER: [u8; 4] = [93, 184, 216, 34];
pub const RESOLVER: [u8; 4] = [1, 1, 1, 1];

// ---------------------------------------------------------------------------
// Frame builder
// ---------------------------------------------------------------------------

pub fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut f = vec![0u8; 12];
    f.extend(ethertype.to_be_bytes());
    f.extend_from_slice(payload);
    f
}

pub fn ipv4(proto: u8, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&((20 + payload.len()) as u16).to_be_bytes());
    ip[8] = 64;
    ip[9] = proto;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);
    ip.extend_from_slice(payload);
    ethernet(0x0800, &ip)
}

pub fn tcp(
    src: [u8; 4],
    sport: u16,
    dst: [u8; 4],
    dport: u16,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut seg = vec![0u8; 20];
    seg[0..2].copy_from_slice(&sport.to_be_bytes());
    seg[2..4].copy_from_slice(&dport.to_be_bytes());
    seg[12] = 0x50;
    seg[13] = flags;
    seg.extend_from_slice(payload);
    ipv4(6, src, dst, &seg)
}

pub fn udp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut dgram = vec![0u8; 8];
    dgram[0..2].copy_from_slice(&sport.to_be_bytes());
    dgram[2..4].copy_from_slice(&dport.to_be_bytes());
    dgram[4..6].copy_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    dgram.extend_from_slice(payload);
    ipv4(17, src, dst, &dgram)
}

/// Uncompressed wire encoding of a dotted name.
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.split('.').filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

pub fn dns_query(name: &str) -> Vec<u8> {
    let mut msg = vec![0xBE, 0xEF, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
    msg.extend(encode_name(name));
    msg.extend([0, 1, 0, 1]);
    msg
}

/// Response with one question and one A answer per address. Answer names
/// point back at the question.
pub fn dns_response(name: &str, addrs: &[[u8; 4]]) -> Vec<u8> {
    let mut msg = vec![0xBE, 0xEF, 0x81, 0x80, 0, 1, 0, addrs.len() as u8, 0, 0, 0, 0];
    msg.extend(encode_name(name));
    msg.extend([0, 1, 0, 1]);
    for addr in addrs {
        msg.extend([0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0x01, 0x2C, 0, 4]);
        msg.extend(addr);
    }
    msg
}

/// TLS 1.2 Client Hello record carrying a server_name extension.
pub fn client_hello(sni: &str) -> Vec<u8> {
    let name = sni.as_bytes();
    let mut server_name = Vec::new();
    server_name.extend(((name.len() + 3) as u16).to_be_bytes());
    server_name.push(0);
    server_name.extend((name.len() as u16).to_be_bytes());
    server_name.extend_from_slice(name);

    let mut extensions = Vec::new();
    extensions.extend([0x00, 0x00]);
    extensions.extend((server_name.len() as u16).to_be_bytes());
    extensions.extend(server_name);

    let mut body = vec![0x03, 0x03];
    body.extend([0x11; 32]);
    body.push(0); // session id
    body.extend([0x00, 0x02, 0x13, 0x01]);
    body.extend([0x01, 0x00]);
    body.extend((extensions.len() as u16).to_be_bytes());
    body.extend(extensions);

    let mut handshake = vec![0x01];
    handshake.extend(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend(body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend((handshake.len() as u16).to_be_bytes());
    record.extend(handshake);
    record
}

// ---------------------------------------------------------------------------
// Scripted capture source
// ---------------------------------------------------------------------------

type SharedHandler = Arc<Mutex<Option<FrameHandler>>>;

/// Pushes frames into whatever handler the session installed.
#[derive(Clone, Default)]
pub struct FeedHandle {
    handler: SharedHandler,
}

impl FeedHandle {
    /// Deliver one Ethernet frame. Returns false when no capture is open.
    pub fn feed(&self, frame: &[u8]) -> bool {
        let mut guard = self.handler.lock().unwrap();
        match guard.as_mut() {
            Some(handler) => {
                handler(RawFrame::new(frame, LinkType::Ethernet));
                true
            }
            None => false,
        }
    }

    pub fn feed_all<'a>(&self, frames: impl IntoIterator<Item = &'a Vec<u8>>) {
        for frame in frames {
            self.feed(frame);
        }
    }
}

pub struct ScriptedSource {
    devices: Vec<DeviceDescriptor>,
    handler: SharedHandler,
    pub opens: usize,
    pub closes: usize,
}

impl ScriptedSource {
    pub fn new(devices: Vec<DeviceDescriptor>) -> (Self, FeedHandle) {
        let feed = FeedHandle::default();
        let source = Self {
            devices,
            handler: Arc::clone(&feed.handler),
            opens: 0,
            closes: 0,
        };
        (source, feed)
    }

    pub fn with_default_devices() -> (Self, FeedHandle) {
        Self::new(vec![
            DeviceDescriptor::new("lo"),
            DeviceDescriptor::new("eth0")
                .with_description("Onboard Ethernet")
                .with_address(std::net::Ipv4Addr::new(192, 168, 1, 10)),
        ])
    }
}

impl CaptureSource for ScriptedSource {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        Ok(self.devices.clone())
    }

    fn open(
        &mut self,
        _device: &str,
        _filter: &str,
        _buffer_size: u32,
        handler: FrameHandler,
    ) -> Result<LinkType, CaptureError> {
        self.opens += 1;
        *self.handler.lock().unwrap() = Some(handler);
        Ok(LinkType::Ethernet)
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        self.closes += 1;
        *self.handler.lock().unwrap() = None;
        Ok(())
    }

    fn platform(&self) -> Platform {
        Platform::Generic
    }
}
