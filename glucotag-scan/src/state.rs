//! Observable acquisition state
//!
//! `ControllerState` is the single guarded struct behind the controller's
//! lock: the single-flight flag, the proximity cooldown instant and the
//! auto-scan flag live together so every check-and-set happens under one
//! write guard. `ScanState` is the snapshot handed to the UI collaborator.

use glucotag_common::events::VerificationOutcome;
use glucotag_common::DecodedReading;
use serde::Serialize;
use tokio::time::Instant;

/// The reading published by the last finished scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastReading {
    pub reading: DecodedReading,
    pub outcome: VerificationOutcome,
    pub attempts: u32,
    /// Scan log entry written for this scan, if persistence succeeded
    pub scan_log_id: Option<String>,
}

/// Snapshot for the UI collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanState {
    pub is_scanning: bool,
    pub last_reading: Option<LastReading>,
    /// Transient banner text, cleared automatically
    pub error_message: Option<String>,
    pub auto_scan_enabled: bool,
}

/// Everything the controller mutates, guarded as one unit
#[derive(Debug, Default)]
pub struct ControllerState {
    pub scan: ScanState,
    /// Instant of the last proximity trigger that started a scan
    pub last_proximity_trigger: Option<Instant>,
    /// Bumped on every error message change; an auto-clear only fires if
    /// the generation it was scheduled for is still current
    pub error_generation: u64,
}

impl ControllerState {
    pub fn new(auto_scan_enabled: bool) -> Self {
        Self {
            scan: ScanState {
                auto_scan_enabled,
                ..ScanState::default()
            },
            ..Self::default()
        }
    }

    /// Replace the error text; returns the generation to clear later
    pub fn set_error(&mut self, message: String) -> u64 {
        self.error_generation += 1;
        self.scan.error_message = Some(message);
        self.error_generation
    }

    pub fn clear_error(&mut self) {
        if self.scan.error_message.take().is_some() {
            self.error_generation += 1;
        }
    }

    /// A failed scan leaves no glucose on screen
    ///
    /// The previous reading's trend, diagnostics and log id stay visible.
    pub fn withhold_glucose(&mut self) {
        if let Some(last) = self.scan.last_reading.as_mut() {
            last.reading.glucose = None;
        }
    }

    /// Clear the error if it was not replaced since `generation`
    pub fn expire_error(&mut self, generation: u64) -> bool {
        if self.error_generation == generation && self.scan.error_message.is_some() {
            self.scan.error_message = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glucotag_common::{Diagnostics, Trend};

    #[test]
    fn test_replaced_error_is_not_expired() {
        let mut state = ControllerState::new(false);
        let first = state.set_error("first".to_string());
        let second = state.set_error("second".to_string());
        assert!(!state.expire_error(first));
        assert_eq!(state.scan.error_message.as_deref(), Some("second"));
        assert!(state.expire_error(second));
        assert_eq!(state.scan.error_message, None);
    }

    #[test]
    fn test_withhold_glucose_keeps_reading() {
        let mut state = ControllerState::new(false);
        state.withhold_glucose();
        assert_eq!(state.scan.last_reading, None);

        state.scan.last_reading = Some(LastReading {
            reading: DecodedReading {
                timestamp: chrono::Utc::now(),
                glucose: Some(120.0),
                trend: Trend::East,
                diagnostics: Diagnostics::new(),
            },
            outcome: VerificationOutcome::Succeeded,
            attempts: 3,
            scan_log_id: Some("scan_a.json".to_string()),
        });
        state.withhold_glucose();

        let last = state.scan.last_reading.unwrap();
        assert_eq!(last.reading.glucose, None);
        assert_eq!(last.reading.trend, Trend::East);
        assert_eq!(last.scan_log_id.as_deref(), Some("scan_a.json"));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let state = ControllerState::new(true);
        let value = serde_json::to_value(&state.scan).unwrap();
        assert_eq!(value["isScanning"], false);
        assert_eq!(value["autoScanEnabled"], true);
        assert!(value["lastReading"].is_null());
        assert!(value["errorMessage"].is_null());
    }
}
