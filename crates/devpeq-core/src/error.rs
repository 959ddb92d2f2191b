//! Error types for adapter operations

use std::time::Duration;

/// Failure reported by a transport primitive
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to send report {report_id:#04x}: {reason}")]
    SendFailed { report_id: u8, reason: String },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Failed to open device: {0}")]
    OpenFailed(String),
}

/// A value that does not fit the wire field it is encoded into
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("{field} value {value} is outside the encodable range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: i64,
        max: i64,
    },

    #[error("{field} value is not a finite number")]
    NotFinite { field: &'static str },
}

/// Error type for adapter operations
#[derive(Debug, thiserror::Error)]
pub enum PeqError {
    #[error("Timeout waiting for device response during {operation} (waited {waited:?})")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Device disconnected during operation")]
    Disconnected,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Another operation is already in flight on this device")]
    Busy,

    #[error("Invalid filter at band {band}: {reason}")]
    InvalidFilter { band: usize, reason: String },

    #[error("Encoding error: {0}")]
    Codec(#[from] CodecError),
}
