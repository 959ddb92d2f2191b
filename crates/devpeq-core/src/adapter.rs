//! Uniform adapter contract
//!
//! Every vendor implements the same four operations; callers pick an
//! implementation by `Vendor` tag and never look at wire formats.

use crate::correlator::CancelToken;
use crate::error::PeqError;
use crate::types::{DeviceDetails, Filter, PeqSnapshot, Slot};

/// Capability interface implemented once per device family
pub trait PeqAdapter: Send + Sync {
    /// Vendor name for logs
    fn name(&self) -> &'static str;

    /// Active preset slot, or the vendor's default sentinel
    ///
    /// Never fails for a connected device: errors map to the sentinel.
    fn get_current_slot(&self, device: &DeviceDetails) -> Slot;

    /// Read the filter set stored in `slot`
    fn pull_from_device(&self, device: &DeviceDetails, slot: Slot) -> Result<PeqSnapshot, PeqError> {
        self.pull_from_device_cancellable(device, slot, &CancelToken::new())
    }

    /// `pull_from_device` that gives up early once `cancel` fires
    fn pull_from_device_cancellable(
        &self,
        device: &DeviceDetails,
        slot: Slot,
        cancel: &CancelToken,
    ) -> Result<PeqSnapshot, PeqError>;

    /// Write `filters` (and `global_gain` where supported) and commit
    ///
    /// Returns `true` when the caller must disconnect for the device to
    /// apply the new settings.
    fn push_to_device(
        &self,
        device: &DeviceDetails,
        slot: Slot,
        global_gain: f64,
        filters: &[Filter],
    ) -> Result<bool, PeqError>;

    /// Toggle PEQ processing and/or activate `slot_id`
    fn enable_peq(&self, device: &DeviceDetails, enabled: bool, slot_id: Slot) -> Result<(), PeqError>;
}

/// Validate a filter set and cut it to the model's band count
///
/// Bands past `max_filters` are dropped with a warning; an invalid band in
/// the kept range rejects the whole push before anything is sent.
pub(crate) fn bands_to_push<'a>(
    device: &DeviceDetails,
    filters: &'a [Filter],
) -> Result<&'a [Filter], PeqError> {
    let max = device.model().max_filters;
    let kept = if filters.len() > max {
        log::warn!(
            "{}: {} filters given, device stores {}; extra bands ignored",
            device.model().name,
            filters.len(),
            max
        );
        &filters[..max]
    } else {
        filters
    };

    for (band, filter) in kept.iter().enumerate() {
        filter.validate(band)?;
    }
    Ok(kept)
}

/// Send a batch of pre-built frames in order
pub(crate) fn send_frames(
    device: &DeviceDetails,
    report_id: u8,
    frames: &[Vec<u8>],
) -> Result<(), PeqError> {
    for frame in frames {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "{}: → [{:#04x}] {}",
                device.model().name,
                report_id,
                crate::codec::hex_dump(frame)
            );
        }
        device.transport().send_report(report_id, frame)?;
    }
    Ok(())
}
