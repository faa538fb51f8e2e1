//! Python bindings, exposed as the `wirelens_engine` module.
//!
//! The capture loop stays in Python (or any other host); frames are fed to
//! [`WirelensEngine::process_frame`] one at a time and emitted events come
//! back as [`PacketRecord`] objects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use pyo3::prelude::*;

use crate::capture::RawFrame;
use crate::classifier::{FlowClassifier, Verdict};
use crate::config::{ClassifierConfig, FilterMode};
use crate::event::ClassifiedPacket;
use crate::protocols::link::LinkType;
use crate::session::lock;

/// Cumulative counters for the engine.
#[derive(Debug, Default)]
struct EngineStats {
    frames_processed: AtomicU64,
    bytes_processed: AtomicU64,
    frames_unsupported: AtomicU64,
    events_emitted: AtomicU64,
    events_filtered: AtomicU64,
}

// ---------------------------------------------------------------------------
// Python-visible record type
// ---------------------------------------------------------------------------

/// One emitted event.
#[pyclass]
#[derive(Debug, Clone)]
pub struct PacketRecord {
    #[pyo3(get)]
    pub id: u64,
    #[pyo3(get)]
    pub timestamp: String,
    #[pyo3(get)]
    pub protocol: String,
    #[pyo3(get)]
    pub source_ip: String,
    #[pyo3(get)]
    pub dest_ip: String,
    #[pyo3(get)]
    pub source_port: Option<u16>,
    #[pyo3(get)]
    pub dest_port: Option<u16>,
    #[pyo3(get)]
    pub length: u32,
    #[pyo3(get)]
    pub info: String,
    #[pyo3(get)]
    pub domain_name: Option<String>,
    #[pyo3(get)]
    pub packet_state: Option<String>,
    packet: ClassifiedPacket,
}

impl From<ClassifiedPacket> for PacketRecord {
    fn from(p: ClassifiedPacket) -> Self {
        Self {
            id: p.id,
            timestamp: p.timestamp.clone(),
            protocol: p.protocol.to_string(),
            source_ip: p.source_ip.to_string(),
            dest_ip: p.dest_ip.to_string(),
            source_port: p.source_port,
            dest_port: p.dest_port,
            length: p.length,
            info: p.info.clone(),
            domain_name: p.domain_name.clone(),
            packet_state: p.packet_state.map(|s| s.label()),
            packet: p,
        }
    }
}

#[pymethods]
impl PacketRecord {
    fn __repr__(&self) -> String {
        format!(
            "PacketRecord(id={}, {} {}, state={:?}, domain={:?})",
            self.id, self.protocol, self.info, self.packet_state, self.domain_name
        )
    }

    /// Serialize this record to its JSON wire shape.
    fn to_json(&self) -> PyResult<String> {
        self.packet.to_json().map_err(|e| {
            pyo3::exceptions::PyValueError::new_err(format!("JSON serialization failed: {e}"))
        })
    }

    /// Explanation of the packet state, if any.
    fn describe_state(&self) -> Option<String> {
        self.packet.packet_state.map(|s| s.description())
    }

    /// Service guessed from the protocol and destination port.
    fn service(&self) -> String {
        self.packet.service_hint().service
    }
}

// ---------------------------------------------------------------------------
// WirelensEngine
// ---------------------------------------------------------------------------

/// Frame classifier driven from Python.
///
/// # Example (Python)
///
/// ```python
/// from wirelens_engine import WirelensEngine
///
/// engine = WirelensEngine()
/// record = engine.process_frame(frame_bytes, 1)  # DLT_EN10MB
/// if record is not None:
///     print(record.to_json())
/// ```
#[pyclass]
pub struct WirelensEngine {
    classifier: Mutex<FlowClassifier>,
    stats: EngineStats,
}

#[pymethods]
impl WirelensEngine {
    /// Create an engine. `mode` is "significant" (default) or "unfiltered".
    #[new]
    #[pyo3(signature = (
        mode = "significant",
        dns_cache_capacity = 4096,
        app_data_capacity = 16384
    ))]
    fn new(mode: &str, dns_cache_capacity: usize, app_data_capacity: usize) -> PyResult<Self> {
        let config = ClassifierConfig {
            mode: parse_mode(mode)?,
            dns_cache_capacity,
            app_data_capacity,
        };
        tracing::info!(mode = ?config.mode, "wirelens engine created");
        Ok(Self {
            classifier: Mutex::new(FlowClassifier::new(&config)),
            stats: EngineStats::default(),
        })
    }

    /// Classify one frame.
    ///
    /// # Arguments
    /// * `data` - Captured frame bytes
    /// * `dlt` - libpcap link-layer type of the frame (1 = Ethernet)
    /// * `wire_len` - Length on the wire, if larger than `data`
    ///
    /// # Returns
    /// The emitted record, or `None` when the frame was dropped or filtered.
    #[pyo3(signature = (data, dlt = 1, wire_len = None))]
    fn process_frame(
        &self,
        data: &[u8],
        dlt: i32,
        wire_len: Option<u32>,
    ) -> PyResult<Option<PacketRecord>> {
        let mut frame = RawFrame::new(data, LinkType::from_dlt(dlt));
        if let Some(len) = wire_len {
            frame.byte_count = len;
        }

        self.stats.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_processed
            .fetch_add(u64::from(frame.byte_count), Ordering::Relaxed);

        let verdict = lock(&self.classifier).process(&frame);
        match verdict {
            Verdict::Emit(packet) => {
                self.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
                Ok(Some(packet.into()))
            }
            Verdict::Filtered => {
                self.stats.events_filtered.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Verdict::Unsupported(_) => {
                self.stats.frames_unsupported.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Start a new session: ids restart at 1. Caches are kept.
    fn reset_session(&self) {
        lock(&self.classifier).begin_session();
        for counter in [
            &self.stats.frames_processed,
            &self.stats.bytes_processed,
            &self.stats.frames_unsupported,
            &self.stats.events_emitted,
            &self.stats.events_filtered,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Switch between "significant" and "unfiltered".
    fn set_mode(&self, mode: &str) -> PyResult<()> {
        lock(&self.classifier).set_mode(parse_mode(mode)?);
        Ok(())
    }

    /// Domain cached for an IPv4 address, if any.
    fn cached_domain(&self, addr: &str) -> PyResult<Option<String>> {
        let addr = addr.parse().map_err(|e| {
            pyo3::exceptions::PyValueError::new_err(format!("invalid IPv4 address {addr}: {e}"))
        })?;
        Ok(lock(&self.classifier).dns_cache().peek(addr).map(str::to_string))
    }

    /// Return a dictionary of engine statistics.
    ///
    /// Keys: frames_processed, bytes_processed, frames_unsupported,
    /// events_emitted, events_filtered, dns_answers_cached,
    /// dns_cache_entries.
    fn get_stats(&self) -> PyResult<HashMap<String, u64>> {
        let classifier = lock(&self.classifier);
        let mut map = HashMap::new();
        map.insert(
            "frames_processed".into(),
            self.stats.frames_processed.load(Ordering::Relaxed),
        );
        map.insert(
            "bytes_processed".into(),
            self.stats.bytes_processed.load(Ordering::Relaxed),
        );
        map.insert(
            "frames_unsupported".into(),
            self.stats.frames_unsupported.load(Ordering::Relaxed),
        );
        map.insert(
            "events_emitted".into(),
            self.stats.events_emitted.load(Ordering::Relaxed),
        );
        map.insert(
            "events_filtered".into(),
            self.stats.events_filtered.load(Ordering::Relaxed),
        );
        map.insert("dns_answers_cached".into(), classifier.answers_cached());
        map.insert("dns_cache_entries".into(), classifier.dns_cache().len() as u64);
        Ok(map)
    }
}

fn parse_mode(mode: &str) -> PyResult<FilterMode> {
    match mode {
        "significant" => Ok(FilterMode::Significant),
        "unfiltered" => Ok(FilterMode::Unfiltered),
        other => Err(pyo3::exceptions::PyValueError::new_err(format!(
            "unknown mode {other:?}, expected \"significant\" or \"unfiltered\""
        ))),
    }
}

// ---------------------------------------------------------------------------
// PyO3 module definition
// ---------------------------------------------------------------------------

/// Wirelens engine: frame decoding and flow classification.
///
/// Classes:
///     WirelensEngine: Frame classifier
///     PacketRecord: Emitted event
#[pymodule]
fn wirelens_engine(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<WirelensEngine>()?;
    m.add_class::<PacketRecord>()?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
