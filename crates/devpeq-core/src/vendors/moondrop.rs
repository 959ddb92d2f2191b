//! Moondrop USB-HID protocol adapter (CAF command framing)
//!
//! Every command is a fixed 64-byte frame:
//!
//! | Bytes  | Content |
//! |--------|---------|
//! | 0      | Report ID (0x01) |
//! | 1      | Sub-type (0x04) |
//! | 2      | Mode (0x01) |
//! | 3-4    | Command id (u16 LE): 0x1DD read band, 0x0DC write band |
//! | 5      | Reserved (0x00) |
//! | 6-9    | CAF magic `'CTRL'` (u32 LE 0x54524C43) |
//! | 10-    | Payload, one u32 LE word per parameter |
//!
//! # Band response (≥34 bytes)
//!
//! | Bytes  | Content |
//! |--------|---------|
//! | 0      | Report ID echo (0x01) |
//! | 14     | Band number (1-9) |
//! | 18-19  | Frequency in Hz (u16 BE) |
//! | 22-23  | Q × 256 (u16 BE) |
//! | 30-31  | Gain × 256, sign-extended through the upper half of a 32-bit word |
//!
//! The device holds 9 bands and has no slot query or PEQ toggle.

use super::Vendor;
use crate::adapter::{bands_to_push, send_frames, PeqAdapter};
use crate::codec;
use crate::correlator::{await_responses, CancelToken, Correlator, WaitOutcome};
use crate::error::PeqError;
use crate::types::{DeviceDetails, Filter, PeqSnapshot, Slot};
use std::time::Duration;

/// Report ID carried in byte 0 of every frame
pub const REPORT_ID: u8 = 0x01;
/// Fixed sub-type byte
const SUB_TYPE: u8 = 0x04;
/// Fixed mode byte
const MODE: u8 = 0x01;

/// Read one EQ band (477)
pub const CMD_READ_EQ_SLOT: u16 = 0x1DD;
/// Write one EQ band, or trigger a save (220)
pub const CMD_WRITE_EQ_SLOT: u16 = 0x0DC;
/// `'CTRL'` as a little-endian u32
pub const CTRL_CAF_ID: u32 = 0x5452_4C43;

/// Command frame size in bytes
pub const FRAME_SIZE: usize = 64;
/// First payload word offset
const PAYLOAD_OFFSET: usize = 10;
/// Payload word that asks the device to persist written bands
const SAVE_TRIGGER: i32 = 0xFF;

/// Bands stored by the device, numbered 1..=BAND_COUNT on the wire
pub const BAND_COUNT: u8 = 9;
/// Slot reported for this vendor (no slot query exists)
pub const DEFAULT_SLOT: Slot = 0;
/// Time allowed for all band responses to arrive
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Q and gain are 8.8 fixed point on the wire
const FIXED_POINT_SCALE: f64 = 256.0;

// Band response offsets
const MIN_RESPONSE_LEN: usize = 34;
const RESP_BAND: usize = 14;
const RESP_FREQ: usize = 18;
const RESP_Q: usize = 22;
const RESP_GAIN: usize = 30;

/// Build a CAF command frame
pub fn build_caf_command(cmd_id: u16, caf_id: u32, payload: &[i32]) -> [u8; FRAME_SIZE] {
    let mut buf = [0u8; FRAME_SIZE];
    buf[0] = REPORT_ID;
    buf[1] = SUB_TYPE;
    buf[2] = MODE;
    buf[3..5].copy_from_slice(&cmd_id.to_le_bytes());
    buf[5] = 0x00;
    buf[6..10].copy_from_slice(&caf_id.to_le_bytes());
    codec::put_u32_words_le(&mut buf, PAYLOAD_OFFSET, payload);
    buf
}

/// Request for band `band` (1-based)
pub fn read_band_command(band: u8) -> [u8; FRAME_SIZE] {
    build_caf_command(CMD_READ_EQ_SLOT, CTRL_CAF_ID, &[band as i32])
}

/// Write frame for the band at `index` (0-based position in the filter set)
///
/// Payload words: reserved, band number, frequency, Q × 256, three unused
/// words, gain × 256.
pub fn write_band_command(index: usize, filter: &Filter) -> Result<[u8; FRAME_SIZE], PeqError> {
    let band = (index + 1) as i32;
    let freq = codec::scaled_u16_nonzero("freq", filter.freq, 1.0)? as i32;
    let q = codec::scaled_u16("q", filter.q, FIXED_POINT_SCALE)? as i32;
    let gain = codec::scaled_i16("gain", filter.effective_gain(), FIXED_POINT_SCALE)? as i32;

    Ok(build_caf_command(
        CMD_WRITE_EQ_SLOT,
        CTRL_CAF_ID,
        &[0, band, freq, q, 0, 0, 0, gain],
    ))
}

/// Frame that persists previously written bands
pub fn save_command() -> [u8; FRAME_SIZE] {
    build_caf_command(CMD_WRITE_EQ_SLOT, CTRL_CAF_ID, &[SAVE_TRIGGER])
}

/// Decode a band response into `(band, filter)`
///
/// Returns `None` for frames that are too short or carry another report id.
pub fn parse_band_response(data: &[u8]) -> Option<(u8, Filter)> {
    if data.len() < MIN_RESPONSE_LEN || data[0] != REPORT_ID {
        return None;
    }
    let band = data[RESP_BAND];
    let freq = codec::read_u16_be(data, RESP_FREQ)? as f64;
    let q = codec::read_u16_be(data, RESP_Q)? as f64 / FIXED_POINT_SCALE;
    let gain_raw = codec::sign_extend_upper16(data[RESP_GAIN], data[RESP_GAIN + 1]);
    let gain = gain_raw as f64 / FIXED_POINT_SCALE;

    Some((band, Filter::new(freq, gain, q)))
}

/// Moondrop adapter
#[derive(Debug, Default, Clone, Copy)]
pub struct MoondropAdapter;

impl PeqAdapter for MoondropAdapter {
    fn name(&self) -> &'static str {
        Vendor::Moondrop.label()
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
        let timeout = device.response_timeout(RESPONSE_TIMEOUT);

        // Listen before asking so no early response is missed
        let subscription = device.transport().subscribe();

        let requests: Vec<Vec<u8>> = (1..=BAND_COUNT)
            .map(|band| read_band_command(band).to_vec())
            .collect();
        send_frames(device, report_id, &requests)?;

        let mut bands: Correlator<u8, Filter> = Correlator::new(1..=BAND_COUNT);
        let outcome = await_responses(
            &subscription,
            timeout,
            cancel,
            &mut bands,
            |bands, report| match parse_band_response(&report.data) {
                Some((band, filter)) => {
                    if bands.accept(band, filter) {
                        log::debug!("Moondrop: band {} received", band);
                    } else {
                        log::trace!("Moondrop: ignoring response for band {}", band);
                    }
                }
                None => log::trace!("Moondrop: ignoring {}-byte report", report.data.len()),
            },
            |bands| bands.is_complete(),
        )?;

        match outcome {
            WaitOutcome::Complete => {
                let filters: Vec<Filter> = bands.into_received().into_values().collect();
                log::info!("Moondrop: pulled {} bands", filters.len());
                Ok(PeqSnapshot {
                    filters,
                    global_gain: 0.0,
                })
            }
            WaitOutcome::TimedOut => {
                log::warn!(
                    "Moondrop: {} of {} bands after {:?}, missing {:?}",
                    bands.received_count(),
                    BAND_COUNT,
                    timeout,
                    bands.missing()
                );
                Err(PeqError::Timeout {
                    operation: "Moondrop pull",
                    waited: timeout,
                })
            }
        }
    }

    fn push_to_device(
        &self,
        device: &DeviceDetails,
        _slot: Slot,
        _global_gain: f64,
        filters: &[Filter],
    ) -> Result<bool, PeqError> {
        let _guard = device.begin_operation()?;
        let report_id = device.output_report_id(REPORT_ID);
        let filters = bands_to_push(device, filters)?;

        let mut frames = filters
            .iter()
            .enumerate()
            .map(|(index, filter)| write_band_command(index, filter).map(|f| f.to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        frames.push(save_command().to_vec());

        send_frames(device, report_id, &frames)?;
        log::info!("Moondrop: pushed {} bands and saved", filters.len());
        Ok(false)
    }

    fn enable_peq(&self, _device: &DeviceDetails, _enabled: bool, _slot_id: Slot) -> Result<(), PeqError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::InputReport;
    use crate::types::ModelConfig;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn model(timeout_ms: Option<u64>) -> ModelConfig {
        ModelConfig {
            name: "Moondrop Test".into(),
            max_filters: BAND_COUNT as usize,
            response_timeout_ms: timeout_ms,
            ..ModelConfig::default()
        }
    }

    /// Band response as the device sends it
    fn response_frame(band: u8, freq: u16, q_raw: u16, gain_raw: i16) -> InputReport {
        let mut data = vec![0u8; FRAME_SIZE];
        data[0] = REPORT_ID;
        data[RESP_BAND] = band;
        data[RESP_FREQ..RESP_FREQ + 2].copy_from_slice(&freq.to_be_bytes());
        data[RESP_Q..RESP_Q + 2].copy_from_slice(&q_raw.to_be_bytes());
        data[RESP_GAIN..RESP_GAIN + 2].copy_from_slice(&gain_raw.to_be_bytes());
        InputReport::new(REPORT_ID, data)
    }

    fn word(frame: &[u8], index: usize) -> i32 {
        let start = PAYLOAD_OFFSET + index * 4;
        i32::from_le_bytes(frame[start..start + 4].try_into().unwrap())
    }

    /// Device simulator: stores written bands and answers reads from them
    fn simulated_device() -> MockTransport {
        let stored: Arc<Mutex<HashMap<u8, (u16, u16, i16)>>> = Arc::default();
        MockTransport::with_responder(move |_, frame| {
            let cmd = u16::from_le_bytes([frame[3], frame[4]]);
            let mut stored = stored.lock().unwrap();
            match cmd {
                CMD_WRITE_EQ_SLOT if word(frame, 0) == 0 => {
                    let band = word(frame, 1) as u8;
                    stored.insert(band, (word(frame, 2) as u16, word(frame, 3) as u16, word(frame, 7) as i16));
                    Vec::new()
                }
                CMD_READ_EQ_SLOT => {
                    let band = word(frame, 0) as u8;
                    let (freq, q, gain) = stored.get(&band).copied().unwrap_or((1000, 256, 0));
                    vec![response_frame(band, freq, q, gain)]
                }
                _ => Vec::new(),
            }
        })
    }

    #[test]
    fn test_read_frame_layout() {
        let frame = read_band_command(3);
        assert_eq!(
            &frame[..14],
            &[0x01, 0x04, 0x01, 0xDD, 0x01, 0x00, 0x43, 0x4C, 0x52, 0x54, 0x03, 0x00, 0x00, 0x00]
        );
        assert!(frame[14..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_frame_layout() {
        let frame = write_band_command(1, &Filter::new(1000.0, -2.5, 0.7)).unwrap();
        assert_eq!(&frame[..10], &[0x01, 0x04, 0x01, 0xDC, 0x00, 0x00, 0x43, 0x4C, 0x52, 0x54]);
        assert_eq!(word(&frame, 0), 0);
        assert_eq!(word(&frame, 1), 2);
        assert_eq!(word(&frame, 2), 1000);
        assert_eq!(word(&frame, 3), 179); // round(0.7 * 256)
        assert_eq!(word(&frame, 4), 0);
        assert_eq!(word(&frame, 5), 0);
        assert_eq!(word(&frame, 6), 0);
        assert_eq!(word(&frame, 7), -640);
        assert_eq!(&frame[38..42], &[0x80, 0xFD, 0xFF, 0xFF]);
    }

    #[test]
    fn test_save_frame() {
        let frame = save_command();
        assert_eq!(&frame[3..5], &[0xDC, 0x00]);
        assert_eq!(&frame[10..14], &[0xFF, 0x00, 0x00, 0x00]);
        assert!(frame[14..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_frames_are_deterministic() {
        let filter = Filter::new(250.0, 3.0, 1.41);
        assert_eq!(write_band_command(4, &filter).unwrap(), write_band_command(4, &filter).unwrap());
        assert_eq!(read_band_command(7), read_band_command(7));
    }

    #[test]
    fn test_write_rejects_unencodable_gain() {
        let result = write_band_command(0, &Filter::new(100.0, 200.0, 1.0));
        assert!(matches!(result, Err(PeqError::Codec(_))));
    }

    #[test]
    fn test_write_rejects_frequency_rounding_to_zero() {
        let filter = Filter::new(0.3, 1.0, 1.0);
        assert!(filter.validate(0).is_ok());
        assert!(matches!(write_band_command(0, &filter), Err(PeqError::Codec(_))));
    }

    #[test]
    fn test_parse_band_response() {
        let report = response_frame(5, 2000, 384, -768);
        let (band, filter) = parse_band_response(&report.data).unwrap();
        assert_eq!(band, 5);
        assert_eq!(filter.freq, 2000.0);
        assert_eq!(filter.q, 1.5);
        assert_eq!(filter.gain, -3.0);
    }

    #[test]
    fn test_parse_gain_extremes() {
        let max = response_frame(1, 100, 256, i16::MAX);
        let min = response_frame(1, 100, 256, i16::MIN);
        assert_eq!(parse_band_response(&max.data).unwrap().1.gain, 32767.0 / 256.0);
        assert_eq!(parse_band_response(&min.data).unwrap().1.gain, -128.0);
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert!(parse_band_response(&[REPORT_ID; 33]).is_none());
        let mut wrong_id = response_frame(1, 100, 256, 0).data;
        wrong_id[0] = 0x02;
        assert!(parse_band_response(&wrong_id).is_none());
    }

    #[test]
    fn test_pull_indexes_by_band_regardless_of_order() {
        // Answer everything at once, in reverse, after the last request
        let transport = Arc::new(MockTransport::with_responder(|_, frame| {
            if frame[10] != BAND_COUNT {
                return Vec::new();
            }
            (1..=BAND_COUNT)
                .rev()
                .map(|band| response_frame(band, band as u16 * 100, 256, band as i16 * 256))
                .collect()
        }));
        let device = DeviceDetails::new(transport.clone(), model(None));

        let snapshot = MoondropAdapter.pull_from_device(&device, 0).unwrap();
        assert_eq!(snapshot.filters.len(), BAND_COUNT as usize);
        for (index, filter) in snapshot.filters.iter().enumerate() {
            let band = index as f64 + 1.0;
            assert_eq!(filter.freq, band * 100.0);
            assert_eq!(filter.gain, band);
            assert_eq!(filter.q, 1.0);
        }
        assert_eq!(snapshot.global_gain, 0.0);
        assert_eq!(transport.sent().len(), BAND_COUNT as usize);
        assert_eq!(transport.listener_count(), 0);
    }

    #[test]
    fn test_pull_times_out_without_all_bands() {
        // Band 9 never answers
        let transport = Arc::new(MockTransport::with_responder(|_, frame| {
            let band = frame[10];
            if band == BAND_COUNT {
                Vec::new()
            } else {
                vec![response_frame(band, 1000, 256, 0)]
            }
        }));
        let device = DeviceDetails::new(transport.clone(), model(Some(50)));

        let result = MoondropAdapter.pull_from_device(&device, 0);
        assert!(matches!(result, Err(PeqError::Timeout { .. })));
        assert_eq!(transport.listener_count(), 0);
    }

    #[test]
    fn test_pull_duplicate_band_does_not_complete() {
        // Eight bands, one of them twice: still incomplete
        let transport = Arc::new(MockTransport::with_responder(|_, frame| {
            match frame[10] {
                9 => Vec::new(),
                1 => vec![response_frame(1, 100, 256, 0), response_frame(1, 100, 256, 0)],
                band => vec![response_frame(band, 100, 256, 0)],
            }
        }));
        let device = DeviceDetails::new(transport, model(Some(50)));
        assert!(matches!(
            MoondropAdapter.pull_from_device(&device, 0),
            Err(PeqError::Timeout { .. })
        ));
    }

    #[test]
    fn test_pull_uses_model_report_id() {
        let transport = Arc::new(MockTransport::new());
        let model = ModelConfig {
            output_report_id: Some(0x4B),
            response_timeout_ms: Some(10),
            ..model(None)
        };
        let device = DeviceDetails::new(transport.clone(), model);
        let _ = MoondropAdapter.pull_from_device(&device, 0);
        assert!(transport.sent().iter().all(|(id, frame)| *id == 0x4B && frame[0] == REPORT_ID));
    }

    #[test]
    fn test_pull_cancelled() {
        let transport = Arc::new(MockTransport::new());
        let device = DeviceDetails::new(transport.clone(), model(None));
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = MoondropAdapter.pull_from_device_cancellable(&device, 0, &cancel);
        assert!(matches!(result, Err(PeqError::Cancelled)));
        assert_eq!(transport.listener_count(), 0);
    }

    #[test]
    fn test_push_sends_bands_then_save() {
        let transport = Arc::new(MockTransport::new());
        let device = DeviceDetails::new(transport.clone(), model(None));
        let filters = vec![Filter::new(100.0, 1.0, 0.7), Filter::new(5000.0, -4.0, 2.0)];

        let disconnect = MoondropAdapter.push_to_device(&device, 0, -3.0, &filters).unwrap();
        assert!(!disconnect);

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(word(&sent[0].1, 1), 1);
        assert_eq!(word(&sent[1].1, 1), 2);
        assert_eq!(sent[2].1, save_command().to_vec());
        assert!(sent.iter().all(|(id, _)| *id == REPORT_ID));
    }

    #[test]
    fn test_push_invalid_sends_nothing() {
        let transport = Arc::new(MockTransport::new());
        let device = DeviceDetails::new(transport.clone(), model(None));
        let filters = vec![Filter::new(100.0, 1.0, 0.7), Filter::new(100.0, 500.0, 0.7)];
        assert!(MoondropAdapter.push_to_device(&device, 0, 0.0, &filters).is_err());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_push_then_pull_round_trip() {
        let transport = Arc::new(simulated_device());
        let device = DeviceDetails::new(transport, model(None));
        let filters: Vec<Filter> = [
            (31.0, 6.0, 0.5),
            (62.0, -12.5, 0.707),
            (125.0, 0.0, 1.0),
            (250.0, 3.3, 1.41),
            (500.0, -0.1, 2.0),
            (1000.0, 127.99, 4.0),
            (2000.0, -128.0, 8.0),
            (8000.0, 1.0 / 256.0, 0.1),
            (16000.0, -7.77, 255.0),
        ]
        .iter()
        .map(|&(f, g, q)| Filter::new(f, g, q))
        .collect();

        MoondropAdapter.push_to_device(&device, 0, 0.0, &filters).unwrap();
        let pulled = MoondropAdapter.pull_from_device(&device, 0).unwrap();

        assert_eq!(pulled.filters.len(), filters.len());
        for (sent, got) in filters.iter().zip(&pulled.filters) {
            assert_eq!(got.freq, sent.freq);
            assert!((got.gain - sent.gain).abs() <= 0.5 / 256.0, "{} vs {}", got.gain, sent.gain);
            assert!((got.q - sent.q).abs() <= 0.5 / 256.0, "{} vs {}", got.q, sent.q);
        }
    }

    #[test]
    fn test_slot_and_enable_are_inert() {
        let transport = Arc::new(MockTransport::new());
        let device = DeviceDetails::new(transport.clone(), model(None));
        assert_eq!(MoondropAdapter.get_current_slot(&device), DEFAULT_SLOT);
        MoondropAdapter.enable_peq(&device, false, -1).unwrap();
        MoondropAdapter.enable_peq(&device, true, 3).unwrap();
        assert!(transport.sent().is_empty());
    }
}
