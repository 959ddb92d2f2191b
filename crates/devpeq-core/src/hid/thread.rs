//! HID I/O thread
//!
//! Dedicated thread per HID device. Reads input reports, strips the report
//! id, and fans them out through the transport's listener registry. Also
//! drains queued output reports and acknowledges each write.

use crate::codec::hex_dump;
use crate::error::TransportError;
use crate::transport::{InputEvent, InputReport, ListenerRegistry};
use flume::{Receiver, Sender};
use hidapi::HidDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Largest input report we expect; PEQ devices use full-speed 64-byte reports
const INPUT_BUFFER_SIZE: usize = 64;

/// Output report queued for the I/O thread
pub(crate) struct WriteRequest {
    pub report_id: u8,
    pub data: Vec<u8>,
    /// Receives the outcome once the report is on the wire
    pub ack: Sender<Result<(), String>>,
}

/// HID I/O thread handle
///
/// Owns the thread join handle and a shutdown flag.
/// When dropped, signals the thread to stop and waits for it.
pub(crate) struct HidIoThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    /// Device name (for logging)
    device_name: String,
    /// Whether the I/O loop is still running (set to false on exit)
    alive: Arc<AtomicBool>,
}

impl HidIoThread {
    /// Spawn a new I/O thread for a HID device
    ///
    /// - `device`: The hidapi device handle (must be opened with non-blocking mode)
    /// - `registry`: Listeners that receive every input report
    /// - `write_rx`: Queue of output reports to send
    /// - `device_name`: Human-readable name for logging
    pub fn spawn(
        device: HidDevice,
        registry: ListenerRegistry,
        write_rx: Receiver<WriteRequest>,
        device_name: String,
    ) -> Result<Self, TransportError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_clone = alive.clone();
        let name = device_name.clone();

        let handle = thread::Builder::new()
            .name(format!("hid-io-{}", device_name))
            .spawn(move || {
                Self::io_loop(&device, &registry, &write_rx, &shutdown_clone, &name);
                alive_clone.store(false, Ordering::Relaxed);
                // Wake every pending wait; nothing more will arrive
                registry.dispatch(InputEvent::Disconnected);
            })
            .map_err(|e| TransportError::OpenFailed(format!("Failed to spawn HID I/O thread: {}", e)))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
            device_name,
            alive,
        })
    }

    /// Check if the I/O loop is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Main I/O loop running on the dedicated thread
    fn io_loop(
        device: &HidDevice,
        registry: &ListenerRegistry,
        write_rx: &Receiver<WriteRequest>,
        shutdown: &AtomicBool,
        name: &str,
    ) {
        log::info!("[HID {}] I/O thread started", name);

        let mut input_buf = [0u8; INPUT_BUFFER_SIZE];

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            // ─── Input: non-blocking read with 1ms timeout ───
            match device.read_timeout(&mut input_buf, 1) {
                Ok(n) if n > 0 => {
                    if let Some(report) = InputReport::from_raw(&input_buf[..n]) {
                        if log::log_enabled!(log::Level::Trace) {
                            log::trace!("[HID {}] ← [{:#04x}] {}", name, report.report_id, hex_dump(&report.data));
                        }
                        registry.dispatch(InputEvent::Report(report));
                    }
                }
                Ok(_) => {} // Timeout, no data (expected)
                Err(e) => {
                    log::error!("[HID {}] Read error: {}", name, e);
                    break; // Device disconnected
                }
            }

            // ─── Output: drain queued reports ───
            let mut write_failed = false;
            while let Ok(request) = write_rx.try_recv() {
                let mut buf = Vec::with_capacity(request.data.len() + 1);
                buf.push(request.report_id);
                buf.extend_from_slice(&request.data);

                let result = device.write(&buf).map(|_| ()).map_err(|e| e.to_string());
                if let Err(e) = &result {
                    log::error!("[HID {}] Write error: {}", name, e);
                    write_failed = true;
                }
                // Caller may have given up waiting
                let _ = request.ack.send(result);
                if write_failed {
                    break;
                }
            }
            if write_failed {
                break; // Device disconnected
            }
        }

        log::info!("[HID {}] I/O thread stopped", name);
    }
}

impl Drop for HidIoThread {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            log::debug!("[HID {}] Waiting for I/O thread to stop...", self.device_name);
            let _ = handle.join();
        }
    }
}
