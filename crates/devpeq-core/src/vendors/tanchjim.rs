//! Tanchjim USB-HID protocol adapter (field-id read/write with commit)
//!
//! Every band is addressed by two synthetic field ids: `0x26 + 2 * band`
//! carries gain and frequency, the next id carries Q. Frames are 9 bytes
//! for a read request and 10 for writes, little-endian throughout:
//!
//! ```text
//! read     [field, 0, 0, 0, 0x52, 0, 0, 0, 0]
//! response [field, .., .., .., 0x52, .., value lo, value hi, freq lo, freq hi]
//! write    [field, 0, 0, 0, 0x57, 0, value lo, value hi, freq/2 lo, freq/2 hi]
//! commit   [0, 0, 0, 0, 0x53, 0, 0, 0, 0, 0]
//! ```
//!
//! Gain is dB × 10, frequency is stored halved, Q is × 1000. The device has
//! a single preset.

use super::Vendor;
use crate::adapter::{bands_to_push, send_frames, PeqAdapter};
use crate::codec;
use crate::correlator::{await_responses, CancelToken, Correlator, WaitOutcome};
use crate::error::{CodecError, PeqError};
use crate::types::{DeviceDetails, Filter, PeqSnapshot, Slot};
use std::time::Duration;

/// Report id for every Tanchjim frame
pub const REPORT_ID: u8 = 0x4B;

pub const CMD_READ: u8 = 0x52;
pub const CMD_WRITE: u8 = 0x57;
pub const CMD_COMMIT: u8 = 0x53;

/// Field id of band 0 gain/frequency
const FIRST_FIELD_ID: u8 = 0x26;

/// Offset of the opcode echo in requests and responses
const OPCODE_OFFSET: usize = 4;
const VALUE_OFFSET: usize = 6;
const FREQ_OFFSET: usize = 8;

const GAIN_SCALE: f64 = 10.0;
const Q_SCALE: f64 = 1000.0;
/// Frequency is stored in 2 Hz steps
const FREQ_SCALE: f64 = 0.5;

/// Slot reported for the single preset
pub const DEFAULT_SLOT: Slot = 101;

/// Window for both fields of one band to come back
pub const BAND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Gain/frequency field id for a band; Q is the id after it
pub fn gain_freq_field(band: usize) -> Result<u8, PeqError> {
    u8::try_from(band)
        .ok()
        .and_then(|b| b.checked_mul(2))
        .and_then(|offset| FIRST_FIELD_ID.checked_add(offset))
        .filter(|id| id.checked_add(1).is_some())
        .ok_or_else(|| {
            CodecError::OutOfRange {
                field: "band",
                value: band as f64,
                min: 0,
                max: ((u8::MAX - 1 - FIRST_FIELD_ID) / 2) as i64,
            }
            .into()
        })
}

pub fn read_command(field: u8) -> [u8; 9] {
    [field, 0, 0, 0, CMD_READ, 0, 0, 0, 0]
}

/// Combined gain and frequency write for `field`
pub fn write_gain_freq_command(field: u8, filter: &Filter) -> Result<[u8; 10], PeqError> {
    let gain = codec::scaled_i16("gain", filter.effective_gain(), GAIN_SCALE)?.to_le_bytes();
    let freq = codec::scaled_u16_nonzero("freq", filter.freq, FREQ_SCALE)?.to_le_bytes();
    Ok([field, 0, 0, 0, CMD_WRITE, 0, gain[0], gain[1], freq[0], freq[1]])
}

pub fn write_q_command(field: u8, q: f64) -> Result<[u8; 10], PeqError> {
    let q = codec::scaled_u16("q", q, Q_SCALE)?.to_le_bytes();
    Ok([field, 0, 0, 0, CMD_WRITE, 0, q[0], q[1], 0, 0])
}

pub fn commit_command() -> [u8; 10] {
    [0, 0, 0, 0, CMD_COMMIT, 0, 0, 0, 0, 0]
}

/// One decoded field of a band
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    GainFreq { gain: f64, freq: f64 },
    Q(f64),
}

/// Decode a read response for either field of `band_field`
///
/// Frames for other fields, non-read opcodes or short frames are `None`.
pub fn parse_response(data: &[u8], band_field: u8) -> Option<(u8, FieldValue)> {
    if *data.get(OPCODE_OFFSET)? != CMD_READ {
        return None;
    }
    let field = *data.first()?;
    if field == band_field {
        let gain = codec::read_i16_le(data, VALUE_OFFSET)? as f64 / GAIN_SCALE;
        let freq = codec::read_u16_le(data, FREQ_OFFSET)? as f64 / FREQ_SCALE;
        Some((field, FieldValue::GainFreq { gain, freq }))
    } else if Some(field) == band_field.checked_add(1) {
        let q = codec::read_u16_le(data, VALUE_OFFSET)? as f64 / Q_SCALE;
        Some((field, FieldValue::Q(q)))
    } else {
        None
    }
}

/// Tanchjim adapter
#[derive(Debug, Default, Clone, Copy)]
pub struct TanchjimAdapter;

impl TanchjimAdapter {
    /// Request both fields of one band and wait for them
    fn read_band(
        &self,
        device: &DeviceDetails,
        band: usize,
        report_id: u8,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Filter, PeqError> {
        let gain_freq_id = gain_freq_field(band)?;
        let q_id = gain_freq_id + 1;

        let subscription = device.transport().subscribe();
        send_frames(
            device,
            report_id,
            &[read_command(gain_freq_id).to_vec(), read_command(q_id).to_vec()],
        )?;

        let mut fields = Correlator::new([gain_freq_id, q_id]);
        let outcome = await_responses(
            &subscription,
            timeout,
            cancel,
            &mut fields,
            |fields, report| {
                if let Some((field, value)) = parse_response(&report.data, gain_freq_id) {
                    fields.accept(field, value);
                }
            },
            |fields| fields.is_complete(),
        )?;

        match (outcome, fields.get(&gain_freq_id), fields.get(&q_id)) {
            (WaitOutcome::Complete, Some(&FieldValue::GainFreq { gain, freq }), Some(&FieldValue::Q(q))) => {
                log::debug!("Tanchjim: band {}: {} Hz, {} dB, Q {}", band, freq, gain, q);
                Ok(Filter::new(freq, gain, q))
            }
            _ => {
                log::warn!("Tanchjim: band {} not answered within {:?}", band, timeout);
                Err(PeqError::Timeout {
                    operation: "Tanchjim band read",
                    waited: timeout,
                })
            }
        }
    }
}

impl PeqAdapter for TanchjimAdapter {
    fn name(&self) -> &'static str {
        Vendor::Tanchjim.label()
    }

    fn get_current_slot(&self, _device: &DeviceDetails) -> Slot {
        DEFAULT_SLOT
    }

    fn pull_from_device_cancellable(
        &self,
        device: &DeviceDetails,
        _slot: Slot,
        cancel: &CancelToken,
    ) -> Result<PeqSnapshot, PeqError> {
        let _guard = device.begin_operation()?;
        let report_id = device.output_report_id(REPORT_ID);
        let timeout = device.response_timeout(BAND_TIMEOUT);

        let filters = (0..device.model().max_filters)
            .map(|band| self.read_band(device, band, report_id, timeout, cancel))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("Tanchjim: pulled {} bands", filters.len());
        Ok(PeqSnapshot {
            filters,
            global_gain: 0.0,
        })
    }

    fn push_to_device(
        &self,
        device: &DeviceDetails,
        _slot: Slot,
        _global_gain: f64,
        filters: &[Filter],
    ) -> Result<bool, PeqError> {
        let _guard = device.begin_operation()?;
        let filters = bands_to_push(device, filters)?;

        let mut frames = Vec::with_capacity(filters.len() * 2 + 1);
        for (band, filter) in filters.iter().enumerate() {
            let field = gain_freq_field(band)?;
            frames.push(write_gain_freq_command(field, filter)?.to_vec());
            frames.push(write_q_command(field + 1, filter.q)?.to_vec());
        }
        frames.push(commit_command().to_vec());

        // Writes are not acknowledged; a sent commit is taken as success
        send_frames(device, device.output_report_id(REPORT_ID), &frames)?;
        log::info!("Tanchjim: pushed {} bands", filters.len());
        Ok(device.model().disconnect_on_save)
    }

    fn enable_peq(&self, _device: &DeviceDetails, _enabled: bool, _slot_id: Slot) -> Result<(), PeqError> {
        Ok(())
    }
}
