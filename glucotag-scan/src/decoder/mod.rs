//! Sensor block decoder
//!
//! Heuristic decoder for the sensor's raw memory image. Experimental and NOT
//! for medical decisions: the vendor's factory calibration is not available,
//! so the decoder only offers raw memory insight plus plausibility filtering.
//!
//! Memory layout assumed (43 or 44 blocks of 8 bytes):
//! - Block 0: age counter candidates (bytes 0-3), sensor state (byte 4)
//! - Block 3: trend pointer (byte 3, low 5 bits), history pointer (byte 4)
//! - Blocks 26..=41: 16-slot circular trend buffer; each slot starts with a
//!   little-endian raw sample and carries the arrow code in byte 3
//!
//! The raw sample is masked with `0x1FFF` (13 bits) and the age heuristic
//! keeps the largest plausible candidate. Both are deliberate best guesses
//! that historical scan logs were produced with; do not "fix" them.
//!
//! `decode` never panics and never returns an error. Every failure is a
//! `glucose = None` reading with a `discardReason` diagnostic.

mod age;
mod blocks;
pub mod rules;

pub use age::{derive_sensor_age, SensorAge, MAX_SENSOR_AGE_MINUTES, WARMUP_MINUTES};
pub use blocks::{RawBlockSet, BLOCK_SIZE};

use crate::calibration::Calibration;
use chrono::{DateTime, Utc};
use glucotag_common::reading::keys;
use glucotag_common::{DecodedReading, Diagnostics};
use rules::GlucoseResolution;
use tracing::trace;

/// Fewest blocks the decoder accepts
pub const MIN_BLOCKS: usize = 43;
/// Block holding the sensor state and age candidates
pub const STATE_BLOCK: usize = 0;
/// Block holding the trend and history pointers
pub const POINTER_BLOCK: usize = 3;
/// First block of the circular trend buffer
pub const TREND_BUFFER_START: usize = 26;
/// Slots in the circular trend buffer
pub const TREND_BUFFER_SLOTS: usize = 16;
/// Bits of the raw sample treated as glucose
pub const RAW_GLUCOSE_MASK: u16 = 0x1FFF;
/// Bits of the pointer byte used as trend index
pub const TREND_INDEX_MASK: u8 = 0x1F;
/// Bits of the arrow byte used as arrow code
pub const TREND_ARROW_MASK: u8 = 0x7F;

/// Why a decode attempt produced no glucose value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    InsufficientBlocks,
    MissingCriticalBlock,
    TrendBlockMissing,
    TrendBlockTooShort,
    CalibratedValueOutOfRange,
    OutOfRangeRawValue,
    /// Set by the verifier, never by the decoder
    VerificationInsufficientMatches,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::InsufficientBlocks => "insufficientBlocks",
            DiscardReason::MissingCriticalBlock => "missingCriticalBlock",
            DiscardReason::TrendBlockMissing => "trendBlockMissing",
            DiscardReason::TrendBlockTooShort => "trendBlockTooShort",
            DiscardReason::CalibratedValueOutOfRange => "calibratedValueOutOfRange",
            DiscardReason::OutOfRangeRawValue => "outOfRangeRawValue",
            DiscardReason::VerificationInsufficientMatches => "verificationInsufficientMatches",
        }
    }
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode a block set, timestamped now
pub fn decode(blocks: &RawBlockSet, calibration: &Calibration) -> DecodedReading {
    decode_at(blocks, calibration, Utc::now())
}

/// Decode a block set with an explicit timestamp
pub fn decode_at(
    blocks: &RawBlockSet,
    calibration: &Calibration,
    timestamp: DateTime<Utc>,
) -> DecodedReading {
    let mut diag = Diagnostics::new();
    diag.insert(keys::BLOCK_COUNT, blocks.len());

    if blocks.len() < MIN_BLOCKS {
        trace!("Decode discarded: {} blocks", blocks.len());
        return discard(timestamp, DiscardReason::InsufficientBlocks, diag);
    }

    // Byte 4 of both critical blocks is read below
    let (state_block, pointer_block) = match (blocks.get(STATE_BLOCK), blocks.get(POINTER_BLOCK)) {
        (Some(b0), Some(b3)) if b0.len() > 4 && b3.len() > 4 => (b0, b3),
        _ => {
            trace!("Decode discarded: critical block 0 or 3 missing");
            return discard(timestamp, DiscardReason::MissingCriticalBlock, diag);
        }
    };

    diag.insert(keys::SENSOR_STATE_HEX, format!("{:02X}", state_block[4]));
    record_sensor_age(&derive_sensor_age(state_block), &mut diag);

    let trend_index = pointer_block[3] & TREND_INDEX_MASK;
    let history_index = pointer_block[4];
    diag.insert(keys::TREND_INDEX, trend_index);
    diag.insert(keys::HISTORY_INDEX, history_index);

    let trend_block_index = TREND_BUFFER_START + (trend_index as usize % TREND_BUFFER_SLOTS);
    diag.insert(keys::SELECTED_TREND_BLOCK, trend_block_index);

    let trend_block = match blocks.get(trend_block_index) {
        Some(block) if !block.is_empty() => block,
        _ => {
            trace!("Decode discarded: trend block {} missing", trend_block_index);
            return discard(timestamp, DiscardReason::TrendBlockMissing, diag);
        }
    };
    if trend_block.len() < 4 {
        trace!(
            "Decode discarded: trend block {} has {} bytes",
            trend_block_index,
            trend_block.len()
        );
        return discard(timestamp, DiscardReason::TrendBlockTooShort, diag);
    }

    let raw16 = u16::from_le_bytes([trend_block[0], trend_block[1]]);
    let masked = raw16 & RAW_GLUCOSE_MASK;
    diag.insert(keys::RAW16, raw16);
    diag.insert(keys::RAW_GLUCOSE_MASKED, masked);

    let arrow_code = trend_block[3] & TREND_ARROW_MASK;
    let trend = rules::trend_for_code(arrow_code);
    diag.insert(keys::TREND_ARROW_VALUE, arrow_code);
    diag.insert(keys::TREND_ARROW_RAW, trend_block[3]);

    let glucose = match rules::resolve_glucose(masked, calibration) {
        GlucoseResolution::Accepted { value, scaling } => {
            diag.insert(keys::APPLIED_SCALING, scaling);
            Some(value)
        }
        GlucoseResolution::Discarded { reason } => {
            diag.insert(keys::APPLIED_SCALING, rules::SCALING_NONE);
            diag.insert(keys::DISCARD_REASON, reason);
            None
        }
    };
    diag.insert(keys::PLAUSIBLE, glucose.is_some());

    trace!(
        "Decoded raw16={} masked={} trend={} glucose={:?}",
        raw16,
        masked,
        trend,
        glucose
    );

    DecodedReading {
        timestamp,
        glucose,
        trend,
        diagnostics: diag,
    }
}

fn discard(timestamp: DateTime<Utc>, reason: DiscardReason, mut diag: Diagnostics) -> DecodedReading {
    diag.insert(keys::APPLIED_SCALING, rules::SCALING_NONE);
    diag.insert(keys::PLAUSIBLE, false);
    DecodedReading::discarded(timestamp, reason.as_str(), diag)
}

fn record_sensor_age(age: &SensorAge, diag: &mut Diagnostics) {
    if let Some(minutes) = age.minutes {
        diag.insert(keys::SENSOR_AGE_MINUTES, minutes);
    }
    if let Some(source) = age.source {
        diag.insert(keys::SENSOR_AGE_SOURCE, source);
    }
    if let Some(remaining) = age.warmup_remaining() {
        diag.insert(keys::WARMUP_REMAINING_MINUTES, remaining);
    }
    if let Some(reason) = age.reason {
        diag.insert(keys::SENSOR_AGE_REASON, reason);
    }
    diag.insert(keys::IS_WARMUP, age.is_warmup());
}

#[cfg(test)]
mod tests {
    use super::*;
    use glucotag_common::Trend;

    /// 43 blocks of 8 bytes with the trend pointer at slot `slot`
    fn image(raw16: u16, arrow: u8, slot: u8) -> Vec<Vec<u8>> {
        let mut blocks = vec![vec![0u8; BLOCK_SIZE]; MIN_BLOCKS];
        blocks[0] = vec![0x00, 0x00, 0x10, 0x27, 0x03, 0x00, 0x00, 0x00];
        blocks[3][3] = slot;
        blocks[3][4] = 7;
        let idx = TREND_BUFFER_START + (slot as usize % TREND_BUFFER_SLOTS);
        let [lo, hi] = raw16.to_le_bytes();
        blocks[idx] = vec![lo, hi, 0x00, arrow, 0x00, 0x00, 0x00, 0x00];
        blocks
    }

    fn decode_image(blocks: Vec<Vec<u8>>) -> DecodedReading {
        decode(&RawBlockSet::from(blocks), &Calibration::default())
    }

    #[test]
    fn test_insufficient_blocks() {
        for count in [0usize, 1, 10, 42] {
            let blocks = vec![vec![0u8; BLOCK_SIZE]; count];
            let reading = decode_image(blocks);
            assert_eq!(reading.glucose, None);
            assert_eq!(reading.discard_reason(), Some("insufficientBlocks"));
            assert_eq!(reading.diagnostics.get(keys::BLOCK_COUNT), Some(count.to_string().as_str()));
        }
    }

    #[test]
    fn test_missing_critical_block() {
        let mut blocks = image(1200, 4, 0);
        blocks[3] = vec![];
        assert_eq!(decode_image(blocks).discard_reason(), Some("missingCriticalBlock"));

        let mut blocks = image(1200, 4, 0);
        blocks[0] = vec![];
        assert_eq!(decode_image(blocks).discard_reason(), Some("missingCriticalBlock"));
    }

    #[test]
    fn test_truncated_critical_block_does_not_panic() {
        let mut blocks = image(1200, 4, 0);
        blocks[0] = vec![0x01, 0x02];
        assert_eq!(decode_image(blocks).discard_reason(), Some("missingCriticalBlock"));
    }

    #[test]
    fn test_trend_block_missing() {
        let mut blocks = image(1200, 4, 5);
        blocks[TREND_BUFFER_START + 5] = vec![];
        let reading = decode_image(blocks);
        assert_eq!(reading.discard_reason(), Some("trendBlockMissing"));
        assert_eq!(reading.diagnostics.get(keys::SELECTED_TREND_BLOCK), Some("31"));
    }

    #[test]
    fn test_last_trend_slot_maps_to_block_41() {
        let reading = decode_image(image(1200, 4, 15));
        assert_eq!(reading.diagnostics.get(keys::SELECTED_TREND_BLOCK), Some("41"));
        assert_eq!(reading.glucose, Some(120.0));
    }

    #[test]
    fn test_trend_block_too_short() {
        let mut blocks = image(1200, 4, 2);
        blocks[TREND_BUFFER_START + 2] = vec![0xB0, 0x04, 0x00];
        assert_eq!(decode_image(blocks).discard_reason(), Some("trendBlockTooShort"));
    }

    #[test]
    fn test_trend_index_wraps_modulo_sixteen() {
        // 0x13 & 0x1F = 19 -> slot 3 -> block 29
        let mut blocks = image(1200, 4, 3);
        blocks[3][3] = 0x13;
        let reading = decode_image(blocks);
        assert_eq!(reading.diagnostics.get(keys::TREND_INDEX), Some("19"));
        assert_eq!(reading.diagnostics.get(keys::SELECTED_TREND_BLOCK), Some("29"));
        assert_eq!(reading.glucose, Some(120.0));
    }

    #[test]
    fn test_tenth_scaling() {
        let reading = decode_image(image(1200, 4, 0));
        assert_eq!(reading.glucose, Some(120.0));
        assert_eq!(reading.trend, Trend::East);
        assert_eq!(reading.diagnostics.get(keys::APPLIED_SCALING), Some("/10"));
        assert_eq!(reading.diagnostics.get(keys::PLAUSIBLE), Some("true"));
        assert_eq!(reading.diagnostics.get(keys::RAW16), Some("1200"));
        assert_eq!(reading.discard_reason(), None);
    }

    #[test]
    fn test_identity_scaling() {
        let reading = decode_image(image(150, 6, 0));
        assert_eq!(reading.glucose, Some(150.0));
        assert_eq!(reading.trend, Trend::North);
        assert_eq!(reading.diagnostics.get(keys::APPLIED_SCALING), Some("*1"));
    }

    #[test]
    fn test_out_of_range_raw_value() {
        let reading = decode_image(image(20, 2, 0));
        assert_eq!(reading.glucose, None);
        assert_eq!(reading.discard_reason(), Some("outOfRangeRawValue"));
        assert_eq!(reading.diagnostics.get(keys::APPLIED_SCALING), Some("none"));
        assert_eq!(reading.diagnostics.get(keys::PLAUSIBLE), Some("false"));
        // Trend is still reported for diagnostics
        assert_eq!(reading.trend, Trend::South);
    }

    #[test]
    fn test_mask_is_thirteen_bits() {
        // 0xE4B0: top three bits dropped -> 0x04B0 = 1200 -> 120.0
        let reading = decode_image(image(0xE4B0, 4, 0));
        assert_eq!(reading.diagnostics.get(keys::RAW16), Some("58544"));
        assert_eq!(reading.diagnostics.get(keys::RAW_GLUCOSE_MASKED), Some("1200"));
        assert_eq!(reading.glucose, Some(120.0));

        // Bit 13 set: a 14-bit mask would read 0x2000 + 1200 and fall out of band
        let reading = decode_image(image(0x2000 | 1200, 4, 0));
        assert_eq!(reading.glucose, Some(120.0));
    }

    #[test]
    fn test_arrow_code_masked_to_seven_bits() {
        let reading = decode_image(image(1200, 0x85, 0));
        assert_eq!(reading.trend, Trend::NorthEast);
        assert_eq!(reading.diagnostics.get(keys::TREND_ARROW_VALUE), Some("5"));
        assert_eq!(reading.diagnostics.get(keys::TREND_ARROW_RAW), Some("133"));
    }

    #[test]
    fn test_calibrated_value() {
        let calibration = Calibration::calibrated(0.5, -480.0);
        let reading = decode(&RawBlockSet::from(image(1200, 4, 0)), &calibration);
        assert_eq!(reading.glucose, Some(120.0));
        assert_eq!(reading.diagnostics.get(keys::APPLIED_SCALING), Some("calibrated"));
    }

    #[test]
    fn test_calibrated_value_out_of_range() {
        let calibration = Calibration::calibrated(1.0, 0.0);
        let reading = decode(&RawBlockSet::from(image(1200, 4, 0)), &calibration);
        assert_eq!(reading.glucose, None);
        assert_eq!(reading.discard_reason(), Some("calibratedValueOutOfRange"));
    }

    #[test]
    fn test_uncalibrated_flag_ignores_slope() {
        let calibration = Calibration {
            slope: 3.0,
            intercept: 100.0,
            is_calibrated: false,
        };
        let reading = decode(&RawBlockSet::from(image(1200, 4, 0)), &calibration);
        assert_eq!(reading.glucose, Some(120.0));
    }

    #[test]
    fn test_diagnostics_populated() {
        let reading = decode_image(image(1200, 4, 0));
        let diag = &reading.diagnostics;
        assert_eq!(diag.get(keys::SENSOR_STATE_HEX), Some("03"));
        // le23 = 0x2710 = 10000 minutes
        assert_eq!(diag.get(keys::SENSOR_AGE_MINUTES), Some("10000"));
        assert_eq!(diag.get(keys::SENSOR_AGE_SOURCE), Some("le23"));
        assert_eq!(diag.get(keys::IS_WARMUP), Some("false"));
        assert_eq!(diag.get(keys::HISTORY_INDEX), Some("7"));
        assert_eq!(diag.get(keys::TREND_INDEX), Some("0"));
        assert_eq!(diag.get(keys::SELECTED_TREND_BLOCK), Some("26"));
    }

    #[test]
    fn test_forty_four_blocks_accepted() {
        let mut blocks = image(1200, 4, 0);
        blocks.push(vec![0u8; BLOCK_SIZE]);
        assert_eq!(decode_image(blocks).glucose, Some(120.0));
    }

    #[test]
    fn test_decode_is_deterministic_with_fixed_timestamp() {
        let set = RawBlockSet::from(image(1200, 4, 9));
        let ts = Utc::now();
        let a = decode_at(&set, &Calibration::default(), ts);
        let b = decode_at(&set, &Calibration::default(), ts);
        assert_eq!(a, b);
    }
}
