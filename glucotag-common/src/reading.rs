//! Decoded sensor reading types
//!
//! Shared between the decoder, the verifier, the scan log and every
//! collaborator that observes scan results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Diagnostic keys written by the decoder and the verifier
///
/// These names are part of the persisted scan log format and must not change.
pub mod keys {
    pub const BLOCK_COUNT: &str = "blockCount";
    pub const DISCARD_REASON: &str = "discardReason";
    pub const SENSOR_STATE_HEX: &str = "sensorStateHex";
    pub const SENSOR_AGE_MINUTES: &str = "sensorAgeMinutes";
    pub const SENSOR_AGE_SOURCE: &str = "sensorAgeSource";
    pub const SENSOR_AGE_REASON: &str = "sensorAgeReason";
    pub const WARMUP_REMAINING_MINUTES: &str = "warmupRemainingMinutes";
    pub const IS_WARMUP: &str = "isWarmup";
    pub const TREND_INDEX: &str = "trendIndex";
    pub const HISTORY_INDEX: &str = "historyIndex";
    pub const SELECTED_TREND_BLOCK: &str = "selectedTrendBlock";
    pub const RAW16: &str = "raw16";
    pub const RAW_GLUCOSE_MASKED: &str = "rawGlucoseMasked";
    pub const APPLIED_SCALING: &str = "appliedScaling";
    pub const PLAUSIBLE: &str = "plausible";
    pub const TREND_ARROW_VALUE: &str = "trendArrowValue";
    pub const TREND_ARROW_RAW: &str = "trendArrowRaw";

    pub const VERIFICATION_ATTEMPTS: &str = "verificationAttempts";
    pub const VERIFICATION_MAX_ATTEMPTS: &str = "verificationMaxAttempts";
    pub const VERIFICATION_WINDOW_SECONDS: &str = "verificationWindowSeconds";
    pub const VERIFICATION_REQUIRED: &str = "verificationRequired";
    pub const VERIFICATION_TOLERANCE: &str = "verificationClusterToleranceRaw16";
    pub const OVERALL_VERIFICATION_DURATION: &str = "overallVerificationDuration";
    pub const FINAL_ATTEMPT_DURATION: &str = "finalAttemptDuration";
    pub const VERIFICATION_CLUSTERS: &str = "verificationClusters";
    pub const VERIFICATION_BEST_CLUSTER_REP: &str = "verificationBestClusterRep";
    pub const VERIFICATION_BEST_CLUSTER_COUNT: &str = "verificationBestClusterCount";
    pub const VERIFICATION_SUCCEEDED: &str = "verificationSucceeded";
    pub const VERIFICATION_FINAL_REP: &str = "verificationFinalRaw16ClusterRep";
    pub const VERIFICATION_OUTCOME: &str = "verificationOutcome";
    pub const VERIFICATION_STOP_REASON: &str = "verificationStopReason";
    pub const VERIFICATION_FAILED_PASSES: &str = "verificationFailedPasses";
    pub const GLUCOSE_DISCARDED: &str = "glucoseDiscarded";
    pub const GLUCOSE_MGDL: &str = "glucoseMgdl";
}

/// Trend arrow reported by the sensor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum Trend {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    #[default]
    Unknown,
}

impl Trend {
    /// Stable camelCase name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::North => "north",
            Trend::NorthEast => "northEast",
            Trend::East => "east",
            Trend::SouthEast => "southEast",
            Trend::South => "south",
            Trend::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered string-to-string diagnostics mapping
///
/// Every decode attempt and every verification run writes its plausibility
/// flags, chosen offsets and discard reasons here. Values are always strings so
/// the mapping can be flattened into a scan log record unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(BTreeMap<String, String>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    /// Insert only when the key is not yet present
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.entry(key.into()).or_insert_with(|| value.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Parse a value into any `FromStr` type, `None` if absent or unparsable
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Result of decoding one raw block set
///
/// `glucose` is `None` whenever no scaling or calibration produced a value in
/// the plausible band, or when verification withheld the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedReading {
    pub timestamp: DateTime<Utc>,
    pub glucose: Option<f64>,
    pub trend: Trend,
    pub diagnostics: Diagnostics,
}

impl DecodedReading {
    /// Reading with no glucose value and a single discard reason
    pub fn discarded(timestamp: DateTime<Utc>, reason: &str, mut diagnostics: Diagnostics) -> Self {
        diagnostics.insert(keys::DISCARD_REASON, reason);
        Self {
            timestamp,
            glucose: None,
            trend: Trend::Unknown,
            diagnostics,
        }
    }

    /// Unmasked 16-bit trend sample, if the decoder got that far
    pub fn raw16(&self) -> Option<u16> {
        self.diagnostics.get_parsed(keys::RAW16)
    }

    pub fn discard_reason(&self) -> Option<&str> {
        self.diagnostics.get(keys::DISCARD_REASON)
    }

    pub fn is_plausible(&self) -> bool {
        self.glucose.is_some()
    }
}
