//! Qudelix USB-HID protocol adapter (opcode reports)
//!
//! Frames are short and variable length, sent on report id 0x4B. Byte 0 is
//! the opcode; all multi-byte fields are big-endian.
//!
//! | Frame    | Layout |
//! |----------|--------|
//! | Enable   | `[0x01, on]` |
//! | Preset   | `[0x03, slot]` |
//! | PreGain  | `[0x06, left i16, right i16]` (dB × 10) |
//! | Band     | `[0x0D, index, type, freq u16, gain i16 (dB × 10), q u16 (× 100)]` |
//!
//! The device reports its state with the same `Band` and `PreGain` layouts.
//! No read-request command is known for this family, so a pull only listens:
//! it collects the state the device pushes on its own (after an `Enable` or
//! a preset change from the device UI) and gives up after 5 seconds.

use super::Vendor;
use crate::adapter::{bands_to_push, send_frames, PeqAdapter};
use crate::codec;
use crate::correlator::{await_responses, CancelToken, Correlator, WaitOutcome};
use crate::error::{CodecError, PeqError};
use crate::types::{DeviceDetails, Filter, FilterType, PeqSnapshot, Slot};
use std::collections::BTreeMap;
use std::time::Duration;

/// Report id for every Qudelix frame
pub const REPORT_ID: u8 = 0x4B;

/// Slot reported when no query is available (custom slot)
pub const DEFAULT_SLOT: Slot = 101;

/// Time allowed for the device to report every band and the preamp
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Gain fields are dB × 10
const GAIN_SCALE: f64 = 10.0;
/// Q fields are Q × 100
const Q_SCALE: f64 = 100.0;

const BAND_FRAME_LEN: usize = 9;
const PRE_GAIN_FRAME_LEN: usize = 5;

/// Command opcodes (byte 0)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Enable = 0x01,
    Headroom = 0x02,
    Preset = 0x03,
    Type = 0x04,
    Mode = 0x05,
    PreGain = 0x06,
    Gain = 0x07,
    Q = 0x08,
    Filter = 0x09,
    Freq = 0x0A,
    PresetName = 0x0B,
    ReceiverInfo = 0x0C,
    Band = 0x0D,
}

/// Wire code for a filter type; a missing type is sent as PK
pub fn filter_type_code(filter_type: Option<FilterType>) -> u8 {
    match filter_type.unwrap_or_default() {
        FilterType::PK => 0,
        FilterType::LSQ => 1,
        FilterType::HSQ => 2,
        FilterType::LPF => 3,
        FilterType::HPF => 4,
        FilterType::BPF => 5,
        FilterType::NOTCH => 6,
    }
}

/// Filter type for a wire code; unknown codes read as PK
pub fn filter_type_from_code(code: u8) -> FilterType {
    match code {
        0 => FilterType::PK,
        1 => FilterType::LSQ,
        2 => FilterType::HSQ,
        3 => FilterType::LPF,
        4 => FilterType::HPF,
        5 => FilterType::BPF,
        6 => FilterType::NOTCH,
        other => {
            log::debug!("Qudelix: unknown filter type code {}, using PK", other);
            FilterType::PK
        }
    }
}

pub fn enable_command(enabled: bool) -> [u8; 2] {
    [Command::Enable as u8, enabled as u8]
}

pub fn preset_command(slot: Slot) -> Result<[u8; 2], PeqError> {
    let slot = u8::try_from(slot).map_err(|_| CodecError::OutOfRange {
        field: "slot",
        value: slot as f64,
        min: 0,
        max: u8::MAX as i64,
    })?;
    Ok([Command::Preset as u8, slot])
}

/// Preamp frame, same value on both channels
pub fn pre_gain_command(global_gain: f64) -> Result<[u8; PRE_GAIN_FRAME_LEN], PeqError> {
    let raw = codec::scaled_i16("global_gain", global_gain, GAIN_SCALE)?.to_be_bytes();
    Ok([Command::PreGain as u8, raw[0], raw[1], raw[0], raw[1]])
}

/// Combined band frame carrying type, frequency, gain and Q
pub fn band_command(index: usize, filter: &Filter) -> Result<[u8; BAND_FRAME_LEN], PeqError> {
    let index = u8::try_from(index).map_err(|_| CodecError::OutOfRange {
        field: "band",
        value: index as f64,
        min: 0,
        max: u8::MAX as i64,
    })?;
    let freq = codec::scaled_u16_nonzero("freq", filter.freq, 1.0)?.to_be_bytes();
    let gain = codec::scaled_i16("gain", filter.effective_gain(), GAIN_SCALE)?.to_be_bytes();
    let q = codec::scaled_u16("q", filter.q, Q_SCALE)?.to_be_bytes();

    Ok([
        Command::Band as u8,
        index,
        filter_type_code(filter.filter_type),
        freq[0],
        freq[1],
        gain[0],
        gain[1],
        q[0],
        q[1],
    ])
}

/// State report decoded from the device
#[derive(Debug, Clone, PartialEq)]
pub enum QudelixReport {
    Band { index: u8, filter: Filter },
    PreGain(f64),
}

/// Decode a state report; anything else is `None`
///
/// A band with a raw gain of exactly 0 is reported as disabled.
pub fn parse_report(data: &[u8]) -> Option<QudelixReport> {
    match *data.first()? {
        op if op == Command::Band as u8 && data.len() >= BAND_FRAME_LEN => {
            let gain_raw = codec::read_i16_be(data, 5)?;
            let filter = Filter {
                freq: codec::read_u16_be(data, 3)? as f64,
                gain: gain_raw as f64 / GAIN_SCALE,
                q: codec::read_u16_be(data, 7)? as f64 / Q_SCALE,
                filter_type: Some(filter_type_from_code(data[2])),
                disabled: gain_raw == 0,
            };
            Some(QudelixReport::Band {
                index: data[1],
                filter,
            })
        }
        op if op == Command::PreGain as u8 && data.len() >= PRE_GAIN_FRAME_LEN => {
            let left = codec::read_i16_be(data, 1)? as f64;
            let right = codec::read_i16_be(data, 3)? as f64;
            // Average of both channels, in dB × 10
            Some(QudelixReport::PreGain((left + right) / (2.0 * GAIN_SCALE)))
        }
        _ => None,
    }
}

/// Frequency given to a band slot the device never reported
const PLACEHOLDER_FREQ: f64 = 1000.0;

/// Flat, bypassed band standing in for an unreported index
fn placeholder_band() -> Filter {
    Filter {
        disabled: true,
        ..Filter::new(PLACEHOLDER_FREQ, 0.0, 1.0).with_type(FilterType::PK)
    }
}

/// Lay received bands out so list position equals wire index
///
/// Gaps below the highest reported index are filled with bypassed
/// placeholders; nothing is added past it.
fn filters_by_index(mut received: BTreeMap<u8, Filter>) -> Vec<Filter> {
    let Some(&highest) = received.keys().next_back() else {
        return Vec::new();
    };
    (0..=highest)
        .map(|index| received.remove(&index).unwrap_or_else(placeholder_band))
        .collect()
}

struct PullState {
    bands: Correlator<u8, Filter>,
    global_gain: Option<f64>,
}

impl PullState {
    fn is_complete(&self) -> bool {
        self.bands.is_complete() && self.global_gain.is_some()
    }
}

/// Qudelix adapter
#[derive(Debug, Default, Clone, Copy)]
pub struct QudelixAdapter;

impl PeqAdapter for QudelixAdapter {
    fn name(&self) -> &'static str {
        Vendor::Qudelix.label()
    }

    fn get_current_slot(&self, _device: &DeviceDetails) -> Slot {
        // No preset query is defined for this protocol
        DEFAULT_SLOT
    }

    fn pull_from_device_cancellable(
        &self,
        device: &DeviceDetails,
        _slot: Slot,
        cancel: &CancelToken,
    ) -> Result<PeqSnapshot, PeqError> {
        let _guard = device.begin_operation()?;
        let timeout = device.response_timeout(RESPONSE_TIMEOUT);
        let max_bands = device.model().max_filters.min(u8::MAX as usize + 1);

        let subscription = device.transport().subscribe();
        let mut state = PullState {
            bands: Correlator::new((0..max_bands).map(|i| i as u8)),
            global_gain: None,
        };

        let outcome = await_responses(
            &subscription,
            timeout,
            cancel,
            &mut state,
            |state, report| match parse_report(&report.data) {
                Some(QudelixReport::Band { index, filter }) => {
                    if state.bands.accept(index, filter) {
                        log::debug!("Qudelix: band {} received", index);
                    } else {
                        log::trace!("Qudelix: band {} outside 0..{}", index, max_bands);
                    }
                }
                Some(QudelixReport::PreGain(gain)) => {
                    log::debug!("Qudelix: pre-gain {} dB", gain);
                    state.global_gain = Some(gain);
                }
                None => log::trace!("Qudelix: ignoring {}", codec::hex_dump(&report.data)),
            },
            PullState::is_complete,
        )?;

        let received = state.bands.received_count();
        if outcome == WaitOutcome::TimedOut {
            if received == 0 {
                log::warn!("Qudelix: no bands reported within {:?}", timeout);
                return Err(PeqError::Timeout {
                    operation: "Qudelix pull",
                    waited: timeout,
                });
            }
            log::warn!(
                "Qudelix: partial pull, {} of {} bands (pre-gain {})",
                received,
                max_bands,
                if state.global_gain.is_some() { "received" } else { "missing" }
            );
        }

        let filters = filters_by_index(state.bands.into_received());
        log::info!("Qudelix: pulled {} of {} bands", received, filters.len());
        Ok(PeqSnapshot {
            filters,
            global_gain: state.global_gain.unwrap_or(0.0),
        })
    }

    fn push_to_device(
        &self,
        device: &DeviceDetails,
        slot: Slot,
        global_gain: f64,
        filters: &[Filter],
    ) -> Result<bool, PeqError> {
        let _guard = device.begin_operation()?;
        let filters = bands_to_push(device, filters)?;

        let mut frames = vec![
            enable_command(true).to_vec(),
            pre_gain_command(global_gain)?.to_vec(),
        ];
        for (index, filter) in filters.iter().enumerate() {
            frames.push(band_command(index, filter)?.to_vec());
        }
        if slot > 0 {
            frames.push(preset_command(slot)?.to_vec());
        }

        send_frames(device, device.output_report_id(REPORT_ID), &frames)?;
        log::info!(
            "Qudelix: pushed {} bands, pre-gain {} dB{}",
            filters.len(),
            global_gain,
            if slot > 0 { format!(", preset {}", slot) } else { String::new() }
        );
        Ok(device.model().disconnect_on_save)
    }

    fn enable_peq(&self, device: &DeviceDetails, enabled: bool, slot_id: Slot) -> Result<(), PeqError> {
        let _guard = device.begin_operation()?;
        let mut frames = vec![enable_command(enabled).to_vec()];
        if enabled && slot_id > 0 {
            frames.push(preset_command(slot_id)?.to_vec());
        }
        send_frames(device, device.output_report_id(REPORT_ID), &frames)
    }
}
