//! Parametric EQ protocol adapters for consumer audio DSP devices
//!
//! This crate provides:
//! - A uniform adapter contract (`PeqAdapter`) for reading and writing PEQ bands
//! - Per-vendor wire codecs (Moondrop CAF frames, Qudelix opcodes, Tanchjim fields)
//! - A transport abstraction with scoped input-report subscriptions
//! - Deadline-bounded response correlation with cancellation
//! - YAML device profiles mapping discovered devices to adapters
//! - An optional hidapi transport (feature `hid`)
//!
//! # Architecture
//!
//! ```text
//! caller → Vendor::adapter() → PeqAdapter::pull_from_device()
//!        → send_report() × N → device
//! device → input reports → ListenerRegistry → Subscription → Correlator → PeqSnapshot
//! ```
//!
//! Every adapter call is blocking and runs on the caller's thread. Only one
//! pull/push/enable may be in flight per `DeviceDetails`; a second concurrent
//! call fails with `PeqError::Busy`.

pub mod adapter;
pub mod codec;
pub mod config;
pub mod correlator;
mod error;
pub mod transport;
mod types;
pub mod vendors;

#[cfg(feature = "hid")]
pub mod hid;

#[cfg(test)]
pub(crate) mod mock;

pub use adapter::PeqAdapter;
pub use config::{
    default_config_path, load_config, save_config, DeviceProfile, DeviceRegistry, PeqConfig,
};
pub use correlator::CancelToken;
pub use error::{CodecError, PeqError, TransportError};
pub use transport::{InputEvent, InputReport, ListenerRegistry, ReportTransport, Subscription};
pub use types::{DeviceDetails, Filter, FilterType, ModelConfig, OperationGuard, PeqSnapshot, Slot, SLOT_DISABLED};
pub use vendors::Vendor;

#[cfg(feature = "hid")]
pub use hid::{enumerate_devices, HidDeviceInfo, HidTransport};
