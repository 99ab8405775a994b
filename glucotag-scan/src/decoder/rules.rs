//! Ordered heuristic rules for the block decoder
//!
//! Scaling choice and trend-arrow mapping are tables evaluated top to bottom:
//! the first rule that matches wins. Keeping them as data makes the policy
//! auditable and testable without any tag I/O.

use crate::calibration::Calibration;
use crate::decoder::DiscardReason;
use glucotag_common::Trend;
use std::ops::RangeInclusive;

/// Physiological plausibility band, native sensor units (mg/dL)
pub const PLAUSIBLE_RANGE: RangeInclusive<f64> = 40.0..=500.0;

pub const SCALING_CALIBRATED: &str = "calibrated";
pub const SCALING_NONE: &str = "none";

/// One candidate mapping from masked raw value to glucose
#[derive(Debug, Clone, Copy)]
pub struct ScalingRule {
    pub label: &'static str,
    pub apply: fn(f64) -> f64,
}

fn tenth(raw: f64) -> f64 {
    raw / 10.0
}

fn identity(raw: f64) -> f64 {
    raw
}

/// Uncalibrated fallback scalings, in preference order
pub const FALLBACK_SCALINGS: [ScalingRule; 2] = [
    ScalingRule { label: "/10", apply: tenth },
    ScalingRule { label: "*1", apply: identity },
];

/// Trend-arrow code → trend
#[derive(Debug, Clone, Copy)]
pub struct TrendRule {
    pub code: u8,
    pub trend: Trend,
}

impl TrendRule {
    pub fn matches(&self, code: u8) -> bool {
        self.code == code
    }
}

/// Speculative arrow mapping; anything else is `Unknown`
pub const TREND_RULES: [TrendRule; 5] = [
    TrendRule { code: 2, trend: Trend::South },
    TrendRule { code: 3, trend: Trend::SouthEast },
    TrendRule { code: 4, trend: Trend::East },
    TrendRule { code: 5, trend: Trend::NorthEast },
    TrendRule { code: 6, trend: Trend::North },
];

pub fn trend_for_code(code: u8) -> Trend {
    TREND_RULES
        .iter()
        .find(|rule| rule.matches(code))
        .map(|rule| rule.trend)
        .unwrap_or(Trend::Unknown)
}

pub fn is_plausible(value: f64) -> bool {
    PLAUSIBLE_RANGE.contains(&value)
}

/// First rule whose output lands in the plausible band
pub fn first_plausible(raw: f64, rules: &[ScalingRule]) -> Option<(f64, &'static str)> {
    rules
        .iter()
        .map(|rule| ((rule.apply)(raw), rule.label))
        .find(|(value, _)| is_plausible(*value))
}

/// Outcome of mapping a masked raw sample to glucose
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GlucoseResolution {
    Accepted { value: f64, scaling: &'static str },
    Discarded { reason: DiscardReason },
}

/// Apply the user calibration when present, otherwise the fallback scalings
pub fn resolve_glucose(masked_raw: u16, calibration: &Calibration) -> GlucoseResolution {
    let raw = f64::from(masked_raw);

    if calibration.is_calibrated {
        let value = calibration.apply(raw);
        return if is_plausible(value) {
            GlucoseResolution::Accepted {
                value,
                scaling: SCALING_CALIBRATED,
            }
        } else {
            GlucoseResolution::Discarded {
                reason: DiscardReason::CalibratedValueOutOfRange,
            }
        };
    }

    match first_plausible(raw, &FALLBACK_SCALINGS) {
        Some((value, scaling)) => GlucoseResolution::Accepted { value, scaling },
        None => GlucoseResolution::Discarded {
            reason: DiscardReason::OutOfRangeRawValue,
        },
    }
}
