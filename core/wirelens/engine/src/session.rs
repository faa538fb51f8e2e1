//! # Capture Session
//!
//! [`CaptureSession`] owns one [`CaptureSource`] and drives frames from it
//! through a [`FlowClassifier`] into an [`EventSink`].
//!
//! ## Lifecycle
//!
//! - `start(None)` picks the first device after ordering (IPv4 devices
//!   first, platform default first among those); `start(Some(name))`
//!   requires `name` to exist.
//! - Starting while active returns [`StartOutcome::AlreadyActive`].
//! - `stop()` is idempotent and returns only after the source has stopped
//!   calling the frame handler.
//! - Each start restarts the event ids at 1 and zeroes the statistics. The
//!   DNS answer cache and the Application Data tracker carry over.
//!
//! Frames are classified on the source's dispatch thread. The classifier
//! sits behind a mutex so the session can be inspected from other threads.

use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::capture::{CaptureDevice, CaptureError, CaptureSource, FrameHandler, RawFrame};
use crate::classifier::{FlowClassifier, Verdict};
use crate::config::{CaptureConfig, EngineConfig};
use crate::event::{ClassifiedPacket, Protocol};
use crate::protocols::link::LinkType;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Event sinks
// ---------------------------------------------------------------------------

/// Errors raised while handing an event to a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("event receiver disconnected")]
    Disconnected,

    #[error("event rejected: {0}")]
    Rejected(String),
}

/// Receives emitted events in order. Must not block.
pub trait EventSink: Send + Sync {
    fn deliver(&self, packet: ClassifiedPacket) -> Result<(), SinkError>;

    /// Called when a capture session starts.
    fn session_started(&self) {}
}

/// Forwards events into an unbounded crossbeam channel.
pub struct ChannelSink {
    tx: Sender<ClassifiedPacket>,
}

impl ChannelSink {
    pub fn new(tx: Sender<ClassifiedPacket>) -> Self {
        Self { tx }
    }

    /// A sink and the receiving end of its channel.
    pub fn unbounded() -> (Self, Receiver<ClassifiedPacket>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, packet: ClassifiedPacket) -> Result<(), SinkError> {
        self.tx.send(packet).map_err(|_| SinkError::Disconnected)
    }
}

/// Calls a closure for every event.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(ClassifiedPacket) -> Result<(), SinkError> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventSink for CallbackSink<F>
where
    F: Fn(ClassifiedPacket) -> Result<(), SinkError> + Send + Sync,
{
    fn deliver(&self, packet: ClassifiedPacket) -> Result<(), SinkError> {
        (self.callback)(packet)
    }
}

/// Forwards only the first event of each (source IP, destination IP) pair.
///
/// The set of seen pairs is LRU-bounded and cleared when a session starts.
pub struct PairDedupSink {
    inner: Arc<dyn EventSink>,
    seen: Mutex<LruCache<(Ipv4Addr, Ipv4Addr), ()>>,
}

impl PairDedupSink {
    pub const DEFAULT_CAPACITY: usize = 16384;

    pub fn new(inner: Arc<dyn EventSink>) -> Self {
        Self::with_capacity(inner, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn EventSink>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            seen: Mutex::new(LruCache::new(cap)),
        }
    }
}

impl EventSink for PairDedupSink {
    fn deliver(&self, packet: ClassifiedPacket) -> Result<(), SinkError> {
        let first = lock(&self.seen)
            .put((packet.source_ip, packet.dest_ip), ())
            .is_none();
        if first {
            self.inner.deliver(packet)
        } else {
            Ok(())
        }
    }

    fn session_started(&self) {
        lock(&self.seen).clear();
        self.inner.session_started();
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Per-session counters, updated from the dispatch thread.
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_received: AtomicU64,
    frames_unsupported: AtomicU64,
    events_emitted: AtomicU64,
    events_filtered: AtomicU64,
    tcp_events: AtomicU64,
    udp_events: AtomicU64,
    icmp_events: AtomicU64,
    other_events: AtomicU64,
    sink_failures: AtomicU64,
}

impl CaptureStats {
    fn reset(&self) {
        for counter in [
            &self.frames_received,
            &self.frames_unsupported,
            &self.events_emitted,
            &self.events_filtered,
            &self.tcp_events,
            &self.udp_events,
            &self.icmp_events,
            &self.other_events,
            &self.sink_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn record_emitted(&self, protocol: Protocol) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        let counter = match protocol {
            Protocol::Tcp => &self.tcp_events,
            Protocol::Udp => &self.udp_events,
            Protocol::Icmp => &self.icmp_events,
            Protocol::Other(_) => &self.other_events,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    /// Non-IPv4 frames and frames with an unreadable IPv4 header.
    pub frames_unsupported: u64,
    pub events_emitted: u64,
    pub events_filtered: u64,
    pub tcp_events: u64,
    pub udp_events: u64,
    pub icmp_events: u64,
    pub other_events: u64,
    pub dns_answers_cached: u64,
    pub sink_failures: u64,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Result of [`CaptureSession::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { device: String, link_type: LinkType },
    /// A capture was already running; nothing changed.
    AlreadyActive,
}

struct ActiveCapture {
    device: String,
    link_type: LinkType,
}

/// A single capture session over one source.
pub struct CaptureSession<S: CaptureSource> {
    source: S,
    capture: CaptureConfig,
    classifier: Arc<Mutex<FlowClassifier>>,
    sink: Arc<dyn EventSink>,
    stats: Arc<CaptureStats>,
    active: Option<ActiveCapture>,
}

impl<S: CaptureSource> CaptureSession<S> {
    /// Create a stopped session.
    ///
    /// With `sink.dedup_ip_pairs` set, `sink` is wrapped in a
    /// [`PairDedupSink`].
    pub fn new(source: S, config: &EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        let sink: Arc<dyn EventSink> = if config.sink.dedup_ip_pairs {
            Arc::new(PairDedupSink::new(sink))
        } else {
            sink
        };

        Self {
            source,
            capture: config.capture.clone(),
            classifier: Arc::new(Mutex::new(FlowClassifier::new(&config.classifier))),
            sink,
            stats: Arc::new(CaptureStats::default()),
            active: None,
        }
    }

    /// Devices decorated with display names, in selection order.
    pub fn list_devices(&self) -> Result<Vec<CaptureDevice>, CaptureError> {
        let devices = self.source.list_devices()?;
        Ok(self.source.platform().decorate(devices))
    }

    /// IPv4 addresses bound to any capture device.
    pub fn local_ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>, CaptureError> {
        let mut addrs: Vec<Ipv4Addr> = self
            .source
            .list_devices()?
            .iter()
            .flat_map(|d| d.addresses.iter())
            .filter_map(|addr| match addr {
                std::net::IpAddr::V4(v4) if !v4.is_unspecified() => Some(*v4),
                _ => None,
            })
            .collect();
        addrs.sort();
        addrs.dedup();
        Ok(addrs)
    }

    /// Start capturing on `device`, or on the default device.
    pub fn start(&mut self, device: Option<&str>) -> Result<StartOutcome, CaptureError> {
        if self.active.is_some() {
            tracing::debug!("capture already active");
            return Ok(StartOutcome::AlreadyActive);
        }

        let devices = self.list_devices()?;
        let name = match (device, devices.first()) {
            (_, None) => return Err(CaptureError::NoDevices),
            (Some(requested), Some(_)) => devices
                .iter()
                .find(|d| d.name == requested)
                .map(|d| d.name.clone())
                .ok_or_else(|| CaptureError::UnknownDevice(requested.to_string()))?,
            (None, Some(first)) => first.name.clone(),
        };
        tracing::debug!(device = %name, candidates = devices.len(), "capture device selected");

        self.stats.reset();
        lock(&self.classifier).begin_session();
        self.sink.session_started();

        let handler = self.frame_handler();
        let link_type = self.source.open(
            &name,
            &self.capture.filter,
            self.capture.buffer_size,
            handler,
        )?;

        tracing::info!(
            device = %name,
            link = %link_type,
            filter = %self.capture.filter,
            "capture started"
        );
        self.active = Some(ActiveCapture {
            device: name.clone(),
            link_type,
        });
        Ok(StartOutcome::Started {
            device: name,
            link_type,
        })
    }

    /// Stop capturing. A no-op when not capturing.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        self.source.close()?;
        let stats = self.stats();
        tracing::info!(
            device = %active.device,
            frames = stats.frames_received,
            events = stats.events_emitted,
            "capture stopped"
        );
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn current_device(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.device.as_str())
    }

    pub fn link_type(&self) -> Option<LinkType> {
        self.active.as_ref().map(|a| a.link_type)
    }

    /// Counters for the current (or last) session.
    pub fn stats(&self) -> StatsSnapshot {
        let s = &self.stats;
        StatsSnapshot {
            frames_received: s.frames_received.load(Ordering::Relaxed),
            frames_unsupported: s.frames_unsupported.load(Ordering::Relaxed),
            events_emitted: s.events_emitted.load(Ordering::Relaxed),
            events_filtered: s.events_filtered.load(Ordering::Relaxed),
            tcp_events: s.tcp_events.load(Ordering::Relaxed),
            udp_events: s.udp_events.load(Ordering::Relaxed),
            icmp_events: s.icmp_events.load(Ordering::Relaxed),
            other_events: s.other_events.load(Ordering::Relaxed),
            dns_answers_cached: lock(&self.classifier).answers_cached(),
            sink_failures: s.sink_failures.load(Ordering::Relaxed),
        }
    }

    /// Shared handle to the classifier.
    pub fn classifier(&self) -> Arc<Mutex<FlowClassifier>> {
        Arc::clone(&self.classifier)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn frame_handler(&self) -> FrameHandler {
        let classifier = Arc::clone(&self.classifier);
        let sink = Arc::clone(&self.sink);
        let stats = Arc::clone(&self.stats);

        Box::new(move |frame: RawFrame<'_>| {
            stats.frames_received.fetch_add(1, Ordering::Relaxed);
            let verdict = lock(&classifier).process(&frame);
            match verdict {
                Verdict::Unsupported(_) => {
                    stats.frames_unsupported.fetch_add(1, Ordering::Relaxed);
                }
                Verdict::Filtered => {
                    stats.events_filtered.fetch_add(1, Ordering::Relaxed);
                }
                Verdict::Emit(packet) => {
                    stats.record_emitted(packet.protocol);
                    let id = packet.id;
                    if let Err(e) = sink.deliver(packet) {
                        let failures = stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                        if failures == 0 {
                            tracing::warn!(id, error = %e, "event delivery failed");
                        } else {
                            tracing::trace!(id, error = %e, "event delivery failed");
                        }
                    }
                }
            }
        })
    }
}

impl<S: CaptureSource> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "capture did not close cleanly");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
