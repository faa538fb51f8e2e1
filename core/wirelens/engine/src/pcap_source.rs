//! # libpcap Capture Source
//!
//! [`CaptureSource`] backed by libpcap (Npcap on Windows). Frames are read
//! on a dedicated dispatch thread and handed to the frame handler one at a
//! time. The read timeout bounds how long [`PcapSource::close`] waits for
//! that thread to notice it was stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::capture::{CaptureError, CaptureSource, DeviceDescriptor, FrameHandler, RawFrame};
use crate::config::CaptureConfig;
use crate::protocols::link::LinkType;

/// Live capture through libpcap.
pub struct PcapSource {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PcapSource {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            config: config.clone(),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Fresh run flag for a new capture thread. A worker detached by a close
    /// from inside its handler keeps the old, cleared flag.
    fn arm(&mut self) -> Arc<AtomicBool> {
        self.running = Arc::new(AtomicBool::new(true));
        Arc::clone(&self.running)
    }
}

fn to_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

impl CaptureSource for PcapSource {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        let devices = pcap::Device::list().map_err(|e| CaptureError::Enumerate(e.to_string()))?;
        Ok(devices
            .into_iter()
            .map(|d| DeviceDescriptor {
                name: d.name,
                description: d.desc,
                addresses: d.addresses.iter().map(|a| a.addr).collect(),
            })
            .collect())
    }

    fn open(
        &mut self,
        device: &str,
        filter: &str,
        buffer_size: u32,
        mut handler: FrameHandler,
    ) -> Result<LinkType, CaptureError> {
        if self.worker.is_some() {
            self.close()?;
        }

        let open_err = |e: pcap::Error| CaptureError::Open {
            device: device.to_string(),
            reason: e.to_string(),
        };

        let mut cap = pcap::Capture::from_device(device)
            .map_err(open_err)?
            .promisc(self.config.promiscuous)
            .snaplen(to_i32(self.config.snaplen))
            .buffer_size(to_i32(buffer_size))
            .timeout(to_i32(self.config.read_timeout_ms))
            .open()
            .map_err(open_err)?;
        cap.filter(filter, true).map_err(open_err)?;

        let link_type = LinkType::from_dlt(cap.get_datalink().0);
        tracing::debug!(device, dlt = cap.get_datalink().0, link = %link_type, "pcap handle open");

        let running = self.arm();
        let device_name = device.to_string();

        let worker = thread::Builder::new()
            .name("wirelens-capture".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match cap.next_packet() {
                        Ok(packet) => handler(RawFrame {
                            data: packet.data,
                            link_type,
                            byte_count: packet.header.len,
                        }),
                        Err(pcap::Error::TimeoutExpired) => continue,
                        Err(pcap::Error::NoMorePackets) => break,
                        Err(e) => {
                            tracing::warn!(
                                device = %device_name,
                                error = %e,
                                "capture read failed"
                            );
                            break;
                        }
                    }
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| CaptureError::Open {
                device: device.to_string(),
                reason: e.to_string(),
            })?;

        self.worker = Some(worker);
        Ok(link_type)
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        // Closing from inside the frame handler: the loop exits after the
        // current frame.
        if worker.thread().id() == thread::current().id() {
            return Ok(());
        }
        worker
            .join()
            .map_err(|_| CaptureError::Close("capture thread panicked".into()))
    }
}

impl Drop for PcapSource {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
