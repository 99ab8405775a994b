//! Scan-related type definitions
//!
//! Supporting types for scan triggers and verification outcomes.

use serde::{Deserialize, Serialize};

/// What started a scan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScanTrigger {
    /// Explicit user command
    Manual,
    /// Proximity sensor fired while auto-scan was enabled
    Proximity,
}

impl std::fmt::Display for ScanTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanTrigger::Manual => write!(f, "manual"),
            ScanTrigger::Proximity => write!(f, "proximity"),
        }
    }
}

/// Terminal outcome of a consistency verification run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum VerificationOutcome {
    /// A cluster reached the required number of matching reads
    Succeeded,
    /// Budget exhausted without quorum; glucose withheld
    FailedNoQuorum,
    /// No blocks were obtained from the tag at all
    FailedNoData,
}

impl VerificationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationOutcome::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationOutcome::Succeeded => "succeeded",
            VerificationOutcome::FailedNoQuorum => "failedNoQuorum",
            VerificationOutcome::FailedNoData => "failedNoData",
        }
    }
}

impl std::fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
