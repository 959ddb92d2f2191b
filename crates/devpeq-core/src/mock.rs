//! Scripted in-memory transport for tests
//!
//! Records every sent report, answers through an optional responder closure
//! (synchronously, before `send_report` returns), and can inject unsolicited
//! reports, fail sends, or simulate a disconnect.

use crate::error::TransportError;
use crate::transport::{InputEvent, InputReport, ListenerRegistry, ReportTransport, Subscription};
use std::sync::Mutex;

/// Route library logs through the test harness (`RUST_LOG=trace` for frame dumps)
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) type Responder = Box<dyn FnMut(u8, &[u8]) -> Vec<InputReport> + Send>;

#[derive(Default)]
pub(crate) struct MockTransport {
    registry: ListenerRegistry,
    sent: Mutex<Vec<(u8, Vec<u8>)>>,
    responder: Mutex<Option<Responder>>,
    fail_after: Mutex<Option<usize>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        init_test_logging();
        Self::default()
    }

    pub(crate) fn with_responder(
        responder: impl FnMut(u8, &[u8]) -> Vec<InputReport> + Send + 'static,
    ) -> Self {
        let transport = Self::new();
        *transport.responder.lock().unwrap() = Some(Box::new(responder));
        transport
    }

    /// Every report sent so far, as `(report_id, data)`
    pub(crate) fn sent(&self) -> Vec<(u8, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Sends after the first `n` fail
    pub(crate) fn fail_sends_after(&self, n: usize) {
        *self.fail_after.lock().unwrap() = Some(n);
    }

    pub(crate) fn inject(&self, report: InputReport) {
        self.registry.dispatch(InputEvent::Report(report));
    }

    pub(crate) fn disconnect(&self) {
        self.registry.dispatch(InputEvent::Disconnected);
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.registry.listener_count()
    }
}

impl ReportTransport for MockTransport {
    fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        {
            let mut sent = self.sent.lock().unwrap();
            if let Some(limit) = *self.fail_after.lock().unwrap() {
                if sent.len() >= limit {
                    return Err(TransportError::SendFailed {
                        report_id,
                        reason: "mock send failure".into(),
                    });
                }
            }
            sent.push((report_id, data.to_vec()));
        }

        let replies = match self.responder.lock().unwrap().as_mut() {
            Some(responder) => responder(report_id, data),
            None => Vec::new(),
        };
        for reply in replies {
            self.inject(reply);
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }
}
