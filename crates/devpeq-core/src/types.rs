//! Vendor-agnostic PEQ data model
//!
//! These types are what the adapter contract speaks: a filter band, the
//! pulled snapshot, the device capability record and the device handle.
//! All of them are plain values copied across the adapter boundary.

use crate::error::PeqError;
use crate::transport::ReportTransport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stored preset identifier
///
/// `-1` conventionally means "PEQ disabled"; `0` and `101` are vendor
/// default/custom-slot sentinels.
pub type Slot = i32;

/// Slot value meaning PEQ processing is off
pub const SLOT_DISABLED: Slot = -1;

/// Parametric filter shape
///
/// Parsing a label never fails: anything unrecognised becomes `PK`. This
/// coercion is lossy and intentional, matching what devices accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterType {
    /// Peaking
    #[default]
    PK,
    /// Low shelf
    LSQ,
    /// High shelf
    HSQ,
    /// Low pass
    LPF,
    /// High pass
    HPF,
    /// Band pass
    BPF,
    /// Notch
    NOTCH,
}

impl FilterType {
    /// Canonical label ("PK", "LSQ", ...)
    pub fn label(self) -> &'static str {
        match self {
            FilterType::PK => "PK",
            FilterType::LSQ => "LSQ",
            FilterType::HSQ => "HSQ",
            FilterType::LPF => "LPF",
            FilterType::HPF => "HPF",
            FilterType::BPF => "BPF",
            FilterType::NOTCH => "NOTCH",
        }
    }

    /// Parse a label, coercing unknown labels to `PK`
    pub fn from_label(label: &str) -> Self {
        match label {
            "PK" => FilterType::PK,
            "LSQ" => FilterType::LSQ,
            "HSQ" => FilterType::HSQ,
            "LPF" => FilterType::LPF,
            "HPF" => FilterType::HPF,
            "BPF" => FilterType::BPF,
            "NOTCH" => FilterType::NOTCH,
            other => {
                log::debug!("Unknown filter type '{}', using PK", other);
                FilterType::PK
            }
        }
    }
}

impl From<String> for FilterType {
    fn from(label: String) -> Self {
        FilterType::from_label(&label)
    }
}

impl From<FilterType> for String {
    fn from(t: FilterType) -> Self {
        t.label().to_string()
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One parametric EQ band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Center/corner frequency in Hz
    pub freq: f64,
    /// Gain in dB (signed, fractional)
    pub gain: f64,
    /// Quality factor
    pub q: f64,
    /// Filter shape, for adapters that carry one on the wire
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub filter_type: Option<FilterType>,
    /// Band bypassed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl Filter {
    /// Enabled band without an explicit type
    pub fn new(freq: f64, gain: f64, q: f64) -> Self {
        Self {
            freq,
            gain,
            q,
            filter_type: None,
            disabled: false,
        }
    }

    /// Same band with an explicit filter type
    pub fn with_type(mut self, filter_type: FilterType) -> Self {
        self.filter_type = Some(filter_type);
        self
    }

    /// Gain to put on the wire: a bypassed band is written flat (0 dB)
    pub fn effective_gain(&self) -> f64 {
        if self.disabled {
            0.0
        } else {
            self.gain
        }
    }

    /// Check the band invariants: `freq > 0`, and `q > 0` unless disabled
    pub fn validate(&self, band: usize) -> Result<(), PeqError> {
        let invalid = |reason: String| PeqError::InvalidFilter { band, reason };

        if !self.freq.is_finite() || self.freq <= 0.0 {
            return Err(invalid(format!("frequency must be > 0 Hz, got {}", self.freq)));
        }
        if !self.gain.is_finite() {
            return Err(invalid(format!("gain must be finite, got {}", self.gain)));
        }
        if !self.disabled && (!self.q.is_finite() || self.q <= 0.0) {
            return Err(invalid(format!("Q must be > 0 for an enabled band, got {}", self.q)));
        }
        Ok(())
    }
}

/// Result of a pull: bands in band order plus the device-wide preamp
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeqSnapshot {
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub global_gain: f64,
}

/// Device capabilities and quirks (external, read-only to adapters)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Human-readable model name
    pub name: String,
    /// Number of PEQ bands the device stores
    pub max_filters: usize,
    /// Device must be reconnected after a push for the new EQ to apply
    pub disconnect_on_save: bool,
    /// Output report id to send on, when it differs from the vendor default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_report_id: Option<u8>,
    /// Override of the vendor response window in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_timeout_ms: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_filters: 10,
            disconnect_on_save: false,
            output_report_id: None,
            response_timeout_ms: None,
        }
    }
}

/// A connected device as seen by an adapter
///
/// Wraps the transport handle and the model's capabilities. The in-flight
/// flag serializes operations: each adapter call takes an `OperationGuard`
/// for its whole duration.
pub struct DeviceDetails {
    transport: Arc<dyn ReportTransport>,
    model: ModelConfig,
    in_flight: AtomicBool,
}

impl DeviceDetails {
    pub fn new(transport: Arc<dyn ReportTransport>, model: ModelConfig) -> Self {
        Self {
            transport,
            model,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Transport handle
    pub fn transport(&self) -> &dyn ReportTransport {
        self.transport.as_ref()
    }

    /// Model capabilities
    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Response window: the model override if set, else the vendor default
    pub fn response_timeout(&self, vendor_default: Duration) -> Duration {
        self.model
            .response_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(vendor_default)
    }

    /// Output report id: the model override if set, else the vendor default
    pub fn output_report_id(&self, vendor_default: u8) -> u8 {
        self.model.output_report_id.unwrap_or(vendor_default)
    }

    /// Claim the device for one operation
    ///
    /// Fails with `PeqError::Busy` if another operation holds it.
    pub fn begin_operation(&self) -> Result<OperationGuard<'_>, PeqError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PeqError::Busy)?;
        Ok(OperationGuard {
            flag: &self.in_flight,
        })
    }
}

impl fmt::Debug for DeviceDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDetails")
            .field("model", &self.model)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

/// Releases the device when dropped
pub struct OperationGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn test_filter_type_labels() {
        for t in [
            FilterType::PK,
            FilterType::LSQ,
            FilterType::HSQ,
            FilterType::LPF,
            FilterType::HPF,
            FilterType::BPF,
            FilterType::NOTCH,
        ] {
            assert_eq!(FilterType::from_label(t.label()), t);
        }
    }

    #[test]
    fn test_unknown_filter_type_becomes_pk() {
        assert_eq!(FilterType::from_label("SHELF"), FilterType::PK);
        assert_eq!(FilterType::from_label("pk"), FilterType::PK);
        assert_eq!(FilterType::from_label(""), FilterType::PK);
    }

    #[test]
    fn test_filter_yaml() {
        let yaml = r#"
- freq: 100
  gain: -3.5
  q: 0.7
  type: LSQ
- freq: 1000
  gain: 2
  q: 1.4
  type: BOGUS
- freq: 8000
  gain: 0
  q: 0
  disabled: true
"#;
        let filters: Vec<Filter> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0].filter_type, Some(FilterType::LSQ));
        assert_eq!(filters[1].filter_type, Some(FilterType::PK));
        assert_eq!(filters[2].filter_type, None);
        assert!(filters[2].disabled);
        assert!(!filters[0].disabled);
    }

    #[test]
    fn test_filter_validate() {
        assert!(Filter::new(100.0, 1.0, 0.7).validate(0).is_ok());
        assert!(matches!(
            Filter::new(0.0, 1.0, 0.7).validate(3),
            Err(PeqError::InvalidFilter { band: 3, .. })
        ));
        assert!(Filter::new(100.0, 1.0, 0.0).validate(0).is_err());
        assert!(Filter::new(100.0, f64::NAN, 1.0).validate(0).is_err());

        let mut bypassed = Filter::new(100.0, 0.0, 0.0);
        bypassed.disabled = true;
        assert!(bypassed.validate(0).is_ok());
    }

    #[test]
    fn test_model_config_defaults() {
        let model: ModelConfig = serde_yaml::from_str("name: Test").unwrap();
        assert_eq!(model.max_filters, 10);
        assert!(!model.disconnect_on_save);
        assert_eq!(model.output_report_id, None);
    }

    #[test]
    fn test_device_overrides() {
        let model = ModelConfig {
            output_report_id: Some(7),
            response_timeout_ms: Some(50),
            ..ModelConfig::default()
        };
        let device = DeviceDetails::new(Arc::new(MockTransport::new()), model);
        assert_eq!(device.output_report_id(1), 7);
        assert_eq!(device.response_timeout(Duration::from_secs(2)), Duration::from_millis(50));

        let plain = DeviceDetails::new(Arc::new(MockTransport::new()), ModelConfig::default());
        assert_eq!(plain.output_report_id(1), 1);
        assert_eq!(plain.response_timeout(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[test]
    fn test_operation_guard_serializes() {
        let device = DeviceDetails::new(Arc::new(MockTransport::new()), ModelConfig::default());
        let guard = device.begin_operation().unwrap();
        assert!(matches!(device.begin_operation(), Err(PeqError::Busy)));
        drop(guard);
        assert!(device.begin_operation().is_ok());
    }
}
