//! Transport primitive consumed by the adapters
//!
//! A transport can send output reports and fan inbound reports out to
//! whoever is listening. Listening always goes through a `Subscription`:
//! it is registered when created and unregistered when dropped, so an
//! adapter call can never leak a listener past its own scope, whatever
//! path it exits by.
//!
//! ```text
//! device → transport reader → ListenerRegistry::dispatch → flume → Subscription
//! ```

use crate::error::TransportError;
use flume::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

/// One inbound report with its id split off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReport {
    pub report_id: u8,
    pub data: Vec<u8>,
}

impl InputReport {
    pub fn new(report_id: u8, data: Vec<u8>) -> Self {
        Self { report_id, data }
    }

    /// Split a raw read (report id first) into id and payload
    ///
    /// Payload offsets in the vendor modules count from the byte after the id.
    pub fn from_raw(raw: &[u8]) -> Option<Self> {
        let (&report_id, data) = raw.split_first()?;
        Some(Self::new(report_id, data.to_vec()))
    }
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Inbound report
    Report(InputReport),
    /// The device went away; no further reports will arrive
    Disconnected,
}

/// Capability-bearing device handle
///
/// Implementations must be shareable across threads: the HID backend reads
/// on its own I/O thread while adapter calls run on the caller's thread.
pub trait ReportTransport: Send + Sync {
    /// Send one output report and wait until the transport accepted it
    fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Start receiving inbound reports until the subscription is dropped
    fn subscribe(&self) -> Subscription;
}

struct Listener {
    id: u64,
    tx: Sender<InputEvent>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Fan-out point for inbound reports
///
/// Transports own one registry and call `dispatch` for every report they
/// read. Cloning shares the same listener set.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the listener set; a poisoned lock is used as-is
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        lock_inner(&self.inner)
    }

    /// Register a new listener
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = flume::unbounded();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push(Listener { id, tx });
        drop(inner);
        log::trace!("Transport: listener {} registered", id);
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every live listener
    pub fn dispatch(&self, event: InputEvent) {
        self.lock()
            .listeners
            .retain(|listener| listener.tx.send(event.clone()).is_ok());
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

fn lock_inner(inner: &Mutex<RegistryInner>) -> MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scoped listener on a transport
///
/// Dropping it removes the listener from the registry.
pub struct Subscription {
    id: u64,
    rx: Receiver<InputEvent>,
    registry: Weak<Mutex<RegistryInner>>,
}

impl Subscription {
    /// Wait for the next event until `deadline`
    pub fn recv_deadline(&self, deadline: Instant) -> Result<InputEvent, RecvTimeoutError> {
        self.rx.recv_deadline(deadline)
    }

    /// Take an already queued event without waiting
    pub fn try_recv(&self) -> Option<InputEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            lock_inner(&inner).listeners.retain(|listener| listener.id != self.id);
        }
        log::trace!("Transport: listener {} released", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report(bytes: &[u8]) -> InputEvent {
        InputEvent::Report(InputReport::new(0x4B, bytes.to_vec()))
    }

    #[test]
    fn test_dispatch_reaches_all_listeners() {
        let registry = ListenerRegistry::new();
        let a = registry.subscribe();
        let b = registry.subscribe();
        registry.dispatch(report(&[1, 2]));

        assert_eq!(a.try_recv(), Some(report(&[1, 2])));
        assert_eq!(b.try_recv(), Some(report(&[1, 2])));
    }

    #[test]
    fn test_split_raw_report() {
        let report = InputReport::from_raw(&[0x4B, 0x0D, 0x03, 0x0F]).unwrap();
        assert_eq!(report.report_id, 0x4B);
        assert_eq!(report.data, vec![0x0D, 0x03, 0x0F]);

        let bare = InputReport::from_raw(&[0x01]).unwrap();
        assert_eq!(bare.report_id, 0x01);
        assert!(bare.data.is_empty());

        assert_eq!(InputReport::from_raw(&[]), None);
    }

    #[test]
    fn test_poisoned_registry_keeps_working() {
        let registry = ListenerRegistry::new();
        let sub = registry.subscribe();

        let holder = registry.clone();
        let _ = std::thread::spawn(move || {
            let _inner = holder.inner.lock().unwrap();
            panic!("listener holder panicked");
        })
        .join();
        assert!(registry.inner.is_poisoned());

        registry.dispatch(report(&[7]));
        assert_eq!(sub.try_recv(), Some(report(&[7])));
        assert_eq!(registry.listener_count(), 1);

        let late = registry.subscribe();
        assert_eq!(registry.listener_count(), 2);
        drop(sub);
        drop(late);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = ListenerRegistry::new();
        let sub = registry.subscribe();
        assert_eq!(registry.listener_count(), 1);
        drop(sub);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_no_delivery_before_subscribe() {
        let registry = ListenerRegistry::new();
        registry.dispatch(report(&[9]));
        let sub = registry.subscribe();
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_recv_deadline_times_out() {
        let registry = ListenerRegistry::new();
        let sub = registry.subscribe();
        let result = sub.recv_deadline(Instant::now() + Duration::from_millis(10));
        assert!(matches!(result, Err(RecvTimeoutError::Timeout)));
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let registry = ListenerRegistry::new();
        let sub = registry.subscribe();
        drop(registry);
        // Sender went with the registry: the receiver sees a disconnect
        let result = sub.recv_deadline(Instant::now() + Duration::from_millis(10));
        assert!(matches!(result, Err(RecvTimeoutError::Disconnected)));
        drop(sub);
    }
}
