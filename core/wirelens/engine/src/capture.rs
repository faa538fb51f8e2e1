//! # Capture Sources
//!
//! The capability interface between the engine and a platform packet
//! capture backend, plus the per-platform device naming conventions.
//!
//! A backend only has to enumerate devices, open one with a filter and
//! hand every captured frame to a [`FrameHandler`], and close it again.
//! Decoding and classification never live in a backend.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::protocols::link::LinkType;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Capture source and session lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no capture devices available")]
    NoDevices,

    #[error("capture device \"{0}\" not found")]
    UnknownDevice(String),

    #[error("device enumeration failed: {0}")]
    Enumerate(String),

    #[error("failed to open {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("failed to close capture: {0}")]
    Close(String),
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// One captured frame, borrowed from the backend's receive buffer.
///
/// Valid only for the duration of the handler call.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// The captured bytes (at most the snap length).
    pub data: &'a [u8],
    /// Link-layer framing reported when the source was opened.
    pub link_type: LinkType,
    /// Length of the frame on the wire.
    pub byte_count: u32,
}

impl<'a> RawFrame<'a> {
    /// A frame whose wire length equals the captured length.
    pub fn new(data: &'a [u8], link_type: LinkType) -> Self {
        Self {
            data,
            link_type,
            byte_count: u32::try_from(data.len()).unwrap_or(u32::MAX),
        }
    }
}

/// Callback invoked once per captured frame, on the backend's dispatch
/// thread. Calls never overlap.
pub type FrameHandler = Box<dyn FnMut(RawFrame<'_>) + Send>;

/// A packet capture backend.
pub trait CaptureSource: Send {
    /// Enumerate capture devices.
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError>;

    /// Open `device` and start delivering frames to `handler`.
    ///
    /// Returns the link-layer type of the device.
    fn open(
        &mut self,
        device: &str,
        filter: &str,
        buffer_size: u32,
        handler: FrameHandler,
    ) -> Result<LinkType, CaptureError>;

    /// Stop delivering frames. When this returns, `handler` is not called
    /// again. Closing a source that is not open is a no-op.
    fn close(&mut self) -> Result<(), CaptureError>;

    /// Naming conventions for this backend's devices.
    fn platform(&self) -> Platform {
        Platform::current()
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// A device as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Platform-native device name (`en0`, `eth0`, `\Device\NPF_{...}`).
    pub name: String,
    pub description: Option<String>,
    pub addresses: Vec<IpAddr>,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            addresses: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_address(mut self, addr: impl Into<IpAddr>) -> Self {
        self.addresses.push(addr.into());
        self
    }

    /// First usable IPv4 address bound to the device.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses.iter().find_map(|addr| match addr {
            IpAddr::V4(v4) if !v4.is_unspecified() => Some(*v4),
            _ => None,
        })
    }
}

/// A device decorated for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDevice {
    pub name: String,
    pub description: Option<String>,
    pub addresses: Vec<IpAddr>,
    pub display_name: String,
    /// The device has a usable IPv4 address.
    pub has_ipv4: bool,
}

/// Device naming and default-selection conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    MacOs,
    Windows,
    Generic,
}

impl Platform {
    /// Conventions of the platform this crate was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Generic
        }
    }

    /// Human-readable device name.
    pub fn display_name(self, device: &DeviceDescriptor) -> String {
        let ipv4 = device.ipv4();
        match self {
            Platform::MacOs => {
                if let Some(num) = device
                    .name
                    .strip_prefix("en")
                    .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                {
                    let kind = if num == "0" {
                        "Wi-Fi".to_string()
                    } else {
                        format!("Ethernet {num}")
                    };
                    return match ipv4 {
                        Some(ip) => format!("{kind} ({ip})"),
                        None => kind,
                    };
                }
                generic_name(device, ipv4)
            }
            Platform::Windows => {
                if let Some(desc) = device.description.as_deref().filter(|d| !d.is_empty()) {
                    return desc.to_string();
                }
                if let Some(ip) = ipv4 {
                    return format!("Network adapter ({ip})");
                }
                match device.name.split_once("NPF_") {
                    Some((_, guid)) if guid.chars().count() >= 8 => {
                        let short: String = guid.chars().take(8).collect();
                        format!("Network adapter ({short}...)")
                    }
                    _ => device.name.clone(),
                }
            }
            Platform::Generic => generic_name(device, ipv4),
        }
    }

    /// The device this platform prefers when the caller names none.
    pub fn is_preferred_default(self, name: &str) -> bool {
        self == Platform::MacOs && name == "en0"
    }

    /// Decorate and order devices: IPv4-capable devices first, the
    /// preferred default first among those, otherwise backend order.
    pub fn decorate(self, devices: Vec<DeviceDescriptor>) -> Vec<CaptureDevice> {
        let mut decorated: Vec<CaptureDevice> = devices
            .into_iter()
            .map(|d| CaptureDevice {
                display_name: self.display_name(&d),
                has_ipv4: d.ipv4().is_some(),
                name: d.name,
                description: d.description,
                addresses: d.addresses,
            })
            .collect();

        decorated.sort_by_key(|d| {
            (
                !d.has_ipv4,
                !(d.has_ipv4 && self.is_preferred_default(&d.name)),
            )
        });
        decorated
    }
}

fn generic_name(device: &DeviceDescriptor, ipv4: Option<Ipv4Addr>) -> String {
    if let Some(desc) = device.description.as_deref().filter(|d| !d.is_empty()) {
        return desc.to_string();
    }
    match ipv4 {
        Some(ip) => format!("{} ({ip})", device.name),
        None => device.name.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
