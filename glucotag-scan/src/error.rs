//! Error types for glucotag-scan
//!
//! Decode discards are not errors: the decoder reports them through
//! `DiscardReason` in the reading diagnostics and never fails.

use thiserror::Error;

/// Main error type for the acquisition pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Radio could not start a reading session (not retried automatically)
    #[error("NFC hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Connecting to the detected tag failed
    #[error("Tag connection failed: {0}")]
    ConnectionFailed(String),

    /// Detected tag is not an ISO 15693 sensor tag
    #[error("Unsupported tag type: {0}")]
    UnsupportedTagType(String),

    /// A single block read failed; aborts only the current attempt
    #[error("Block {index} read failed: {reason}")]
    BlockReadFailure { index: u8, reason: String },

    /// Session was invalidated by the user or the platform
    #[error("Session invalidated: {0}")]
    SessionInvalidated(String),

    /// Time budget ran out before enough matching reads were collected
    #[error("Verification timed out after {attempts} attempts")]
    VerificationTimeout { attempts: u32 },

    /// Attempt budget ran out before enough matching reads were collected
    #[error("Verification found no quorum after {attempts} attempts")]
    VerificationNoQuorum { attempts: u32 },

    /// No blocks were obtained across all attempts
    #[error("Scan produced no data")]
    NoDataAcquired,

    /// A scan is already running; the request was rejected
    #[error("Scan already in progress")]
    ScanInProgress,

    /// Scan log or calibration write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Stored scan log record is not well-formed
    #[error("Malformed scan log {id}: {reason}")]
    MalformedLog { id: String, reason: String },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors from glucotag-common
    #[error(transparent)]
    Common(#[from] glucotag_common::Error),
}

impl Error {
    /// Error category name, used in `ScanFailed` events
    pub fn kind(&self) -> &'static str {
        match self {
            Error::HardwareUnavailable(_) => "HardwareUnavailable",
            Error::ConnectionFailed(_) => "ConnectionFailed",
            Error::UnsupportedTagType(_) => "UnsupportedTagType",
            Error::BlockReadFailure { .. } => "BlockReadFailure",
            Error::SessionInvalidated(_) => "SessionInvalidated",
            Error::VerificationTimeout { .. } => "VerificationTimeout",
            Error::VerificationNoQuorum { .. } => "VerificationNoQuorum",
            Error::NoDataAcquired => "NoDataAcquired",
            Error::ScanInProgress => "ScanInProgress",
            Error::Persistence(_) => "PersistenceFailure",
            Error::MalformedLog { .. } => "MalformedLog",
            Error::Config(_) => "Config",
            Error::NotFound(_) => "NotFound",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Io(_) => "Io",
            Error::Json(_) => "Json",
            Error::Common(_) => "Common",
        }
    }

    /// Text shown to the user for scan-level failures
    ///
    /// Verification failures and hardware failures are worded differently so
    /// the user can tell a noisy read from a missing radio.
    pub fn user_message(&self) -> String {
        match self {
            Error::HardwareUnavailable(_) => "NFC not available on this device".to_string(),
            Error::ConnectionFailed(reason) => reason.clone(),
            Error::UnsupportedTagType(_) => "Unsupported tag type".to_string(),
            Error::VerificationTimeout { .. } | Error::VerificationNoQuorum { .. } => {
                "Reading not consistent. Try again.".to_string()
            }
            Error::NoDataAcquired => "Scan produced no data.".to_string(),
            Error::ScanInProgress => "A scan is already in progress".to_string(),
            other => other.to_string(),
        }
    }
}

/// Convenience Result type using glucotag-scan Error
pub type Result<T> = std::result::Result<T, Error>;
