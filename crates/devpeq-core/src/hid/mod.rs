//! HID device backend
//!
//! Provides USB HID discovery of PEQ-capable devices and a `ReportTransport`
//! backed by hidapi. Each open device gets a dedicated I/O thread that reads
//! input reports and writes queued output reports.

mod thread;

use crate::config::DeviceRegistry;
use crate::error::TransportError;
use crate::transport::{ListenerRegistry, ReportTransport, Subscription};
use crate::types::{DeviceDetails, ModelConfig};
use crate::vendors::Vendor;
use flume::Sender;
use hidapi::HidApi;
use std::sync::Arc;
use std::time::Duration;
use thread::{HidIoThread, WriteRequest};

/// How long a caller waits for the I/O thread to put a report on the wire
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Information about a discovered, recognised HID device
#[derive(Debug, Clone)]
pub struct HidDeviceInfo {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Device serial number (if available)
    pub serial: Option<String>,
    /// Device filesystem path
    pub path: String,
    /// Product name from the USB descriptor
    pub product_name: String,
    /// Adapter family resolved from the device registry
    pub vendor: Vendor,
    /// Capabilities from the matching profile
    pub model: ModelConfig,
}

/// Enumerate connected HID devices the registry recognises
///
/// A device exposing several HID interfaces is listed once per path.
pub fn enumerate_devices(registry: &DeviceRegistry) -> Vec<HidDeviceInfo> {
    let api = match HidApi::new() {
        Ok(api) => api,
        Err(e) => {
            log::warn!("HID: Failed to initialize hidapi: {}", e);
            return Vec::new();
        }
    };

    let mut found = Vec::new();

    for device_info in api.device_list() {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();
        let product_name = device_info.product_string().unwrap_or_default().to_string();

        let Some((vendor, model)) = registry.resolve(vid, pid, &product_name) else {
            continue;
        };

        let serial = device_info.serial_number().map(|s| s.to_string());
        let path = device_info.path().to_string_lossy().to_string();

        log::info!(
            "HID: Found '{}' (VID={:#06x} PID={:#06x}, {}) at {}",
            product_name,
            vid,
            pid,
            vendor,
            path
        );

        found.push(HidDeviceInfo {
            vendor_id: vid,
            product_id: pid,
            serial,
            path,
            product_name,
            vendor,
            model,
        });
    }

    found
}

/// hidapi-backed transport with its I/O thread
pub struct HidTransport {
    /// Queue of output reports for the I/O thread
    write_tx: Sender<WriteRequest>,
    /// Input report listeners
    registry: ListenerRegistry,
    /// I/O thread handle (owns the thread lifetime)
    io_thread: HidIoThread,
    /// Device info
    pub info: HidDeviceInfo,
}

impl HidTransport {
    /// Open a HID device and spawn its I/O thread
    pub fn open(info: &HidDeviceInfo) -> Result<Self, TransportError> {
        let api = HidApi::new().map_err(|e| TransportError::OpenFailed(format!("Failed to init hidapi: {}", e)))?;
        let path = std::ffi::CString::new(info.path.clone())
            .map_err(|e| TransportError::OpenFailed(format!("Invalid device path {}: {}", info.path, e)))?;
        let device = api
            .open_path(&path)
            .map_err(|e| TransportError::OpenFailed(format!("Failed to open HID device at {}: {}", info.path, e)))?;

        // Set non-blocking mode (the I/O thread uses read_timeout instead)
        device
            .set_blocking_mode(false)
            .map_err(|e| TransportError::OpenFailed(format!("Failed to set non-blocking mode: {}", e)))?;

        let registry = ListenerRegistry::new();
        let (write_tx, write_rx) = flume::bounded::<WriteRequest>(64);
        let io_thread = HidIoThread::spawn(device, registry.clone(), write_rx, info.product_name.clone())?;

        log::info!("HID: Connected to '{}' at {} ({})", info.product_name, info.path, info.vendor);

        Ok(Self {
            write_tx,
            registry,
            io_thread,
            info: info.clone(),
        })
    }

    /// Open the device and wrap it for its adapter
    pub fn connect(info: &HidDeviceInfo) -> Result<DeviceDetails, TransportError> {
        let transport = Self::open(info)?;
        Ok(DeviceDetails::new(Arc::new(transport), info.model.clone()))
    }

    /// Check if the device is still connected
    pub fn is_connected(&self) -> bool {
        self.io_thread.is_alive()
    }
}

impl ReportTransport for HidTransport {
    fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        let (ack_tx, ack_rx) = flume::bounded(1);
        let request = WriteRequest {
            report_id,
            data: data.to_vec(),
            ack: ack_tx,
        };
        self.write_tx
            .send_timeout(request, WRITE_TIMEOUT)
            .map_err(|_| TransportError::Disconnected)?;

        match ack_rx.recv_timeout(WRITE_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(TransportError::SendFailed { report_id, reason }),
            Err(flume::RecvTimeoutError::Timeout) => Err(TransportError::SendFailed {
                report_id,
                reason: format!("not written within {:?}", WRITE_TIMEOUT),
            }),
            Err(flume::RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }
}
