//! Response correlation
//!
//! Devices answer requests asynchronously and in no guaranteed order. A pull
//! therefore keeps an explicit state machine: the set of ids it expects and a
//! map of what has arrived, keyed by the id bytes carried in each response.
//! Completion is a pure predicate over that state, never a side effect of
//! arrival order.
//!
//! `await_responses` drives the state from a `Subscription` until the
//! predicate holds, the deadline passes, the caller cancels, or the device
//! disconnects.

use crate::error::PeqError;
use crate::transport::{InputEvent, InputReport, Subscription};
use flume::RecvTimeoutError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity at which a waiting call notices cancellation
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Cooperative cancellation flag shared between a caller and a pull
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Expected ids and the values received for them
#[derive(Debug, Clone)]
pub struct Correlator<K: Ord, V> {
    expected: BTreeSet<K>,
    received: BTreeMap<K, V>,
}

impl<K: Ord + Copy, V> Correlator<K, V> {
    pub fn new(expected: impl IntoIterator<Item = K>) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            received: BTreeMap::new(),
        }
    }

    /// Record a value for `key`
    ///
    /// Unexpected keys are ignored and return `false`. A repeated key
    /// replaces the earlier value; it still counts once.
    pub fn accept(&mut self, key: K, value: V) -> bool {
        if !self.expected.contains(&key) {
            return false;
        }
        self.received.insert(key, value);
        true
    }

    /// Every expected id has a value
    pub fn is_complete(&self) -> bool {
        self.expected.iter().all(|k| self.received.contains_key(k))
    }

    /// Number of distinct expected ids received so far
    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.received.get(key)
    }

    /// Expected ids still outstanding, in order
    pub fn missing(&self) -> Vec<K> {
        self.expected
            .iter()
            .filter(|k| !self.received.contains_key(k))
            .copied()
            .collect()
    }

    /// Received values in key order
    pub fn into_received(self) -> BTreeMap<K, V> {
        self.received
    }
}

/// How a wait ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Complete,
    TimedOut,
}

/// Feed inbound reports into `state` until `is_complete` holds or `timeout` passes
///
/// Timeout is reported as `WaitOutcome::TimedOut` so each vendor can apply
/// its own policy (reject, or resolve with what arrived). Cancellation and
/// disconnects are errors.
pub fn await_responses<S>(
    subscription: &Subscription,
    timeout: Duration,
    cancel: &CancelToken,
    state: &mut S,
    mut on_report: impl FnMut(&mut S, &InputReport),
    is_complete: impl Fn(&S) -> bool,
) -> Result<WaitOutcome, PeqError> {
    let deadline = Instant::now() + timeout;

    loop {
        if is_complete(state) {
            return Ok(WaitOutcome::Complete);
        }
        if cancel.is_cancelled() {
            return Err(PeqError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }

        match subscription.recv_deadline(deadline.min(now + POLL_INTERVAL)) {
            Ok(InputEvent::Report(report)) => on_report(state, &report),
            Ok(InputEvent::Disconnected) | Err(RecvTimeoutError::Disconnected) => {
                return Err(PeqError::Disconnected);
            }
            Err(RecvTimeoutError::Timeout) => continue,
        }
    }
}
