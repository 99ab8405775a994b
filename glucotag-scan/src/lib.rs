//! # glucotag-scan
//!
//! Sensor acquisition and decoding pipeline for passive ISO 15693 glucose
//! sensor tags.
//!
//! Data flow:
//! ```text
//! tag session -> block reader -> decoder -> verifier (loops to quorum or budget)
//!     -> scan log (always) + observable state and events (on completion)
//! ```
//!
//! Decoded values are heuristic estimates bounded by a plausibility band.
//! They are not medically validated and never claim calibration accuracy
//! without user-supplied reference points.

pub mod api;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod scan_log;
pub mod state;
pub mod tag;
pub mod verifier;

pub use error::{Error, Result};
