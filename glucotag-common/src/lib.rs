//! # GlucoTag Common Library
//!
//! Shared code for the GlucoTag workspace including:
//! - Decoded reading types (Trend, DecodedReading, Diagnostics)
//! - Event types (ScanEvent enum) and the EventBus
//! - Configuration loading and data folder resolution
//! - Utility functions

pub mod config;
pub mod error;
pub mod events;
pub mod reading;
pub mod time;

pub use error::{Error, Result};
pub use reading::{DecodedReading, Diagnostics, Trend};
