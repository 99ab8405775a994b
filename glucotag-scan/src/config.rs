//! Configuration for the glucotag-scan service
//!
//! One TOML file (`glucotag.toml`) with every section optional. Missing keys
//! take the built-in defaults below; values that would break verification
//! are rejected at startup.
//!
//! ```toml
//! port = 5790
//! root_folder = "/var/lib/glucotag"
//!
//! [logging]
//! level = "debug"
//!
//! [settings]
//! auto_scan_on_proximity = true
//! verbose_logging = false
//!
//! [verification]
//! time_budget_ms = 10000
//! max_attempts = 8
//! required_consistent_reads = 3
//! cluster_tolerance_raw16 = 2
//! block_count = 43
//! fallback_read_timeout_ms = 2000
//!
//! [controller]
//! proximity_cooldown_ms = 10000
//! error_display_ms = 5000
//! tag_detect_timeout_ms = 30000
//! ```

use crate::controller::ControllerConfig;
use crate::decoder::MIN_BLOCKS;
use crate::error::{Error, Result};
use crate::verifier::VerifierConfig;
use glucotag_common::config::{load_toml_or_default, LoggingConfig};
use glucotag_common::time::millis_to_duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5790;

/// Largest block count a pass may request
pub const MAX_BLOCK_COUNT: usize = 44;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub port: u16,
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub settings: SettingsConfig,
    pub verification: VerificationConfig,
    pub controller: ControllerSection,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            root_folder: None,
            logging: LoggingConfig::default(),
            settings: SettingsConfig::default(),
            verification: VerificationConfig::default(),
            controller: ControllerSection::default(),
        }
    }
}

/// User preferences read at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SettingsConfig {
    pub auto_scan_on_proximity: bool,
    pub verbose_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationConfig {
    pub time_budget_ms: u64,
    pub max_attempts: u32,
    pub required_consistent_reads: u32,
    pub cluster_tolerance_raw16: u16,
    pub block_count: usize,
    pub fallback_read_timeout_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 10_000,
            max_attempts: 8,
            required_consistent_reads: 3,
            cluster_tolerance_raw16: 2,
            block_count: MIN_BLOCKS,
            fallback_read_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerSection {
    pub proximity_cooldown_ms: u64,
    pub error_display_ms: u64,
    pub tag_detect_timeout_ms: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            proximity_cooldown_ms: 10_000,
            error_display_ms: 5_000,
            tag_detect_timeout_ms: 30_000,
        }
    }
}

impl TomlConfig {
    /// Load and validate; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config: TomlConfig = load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let v = &self.verification;
        if v.required_consistent_reads == 0 {
            return Err(Error::Config(
                "verification.required_consistent_reads must be at least 1".to_string(),
            ));
        }
        if v.max_attempts == 0 {
            return Err(Error::Config(
                "verification.max_attempts must be at least 1".to_string(),
            ));
        }
        if v.time_budget_ms == 0 {
            return Err(Error::Config(
                "verification.time_budget_ms must be positive".to_string(),
            ));
        }
        if !(MIN_BLOCKS..=MAX_BLOCK_COUNT).contains(&v.block_count) {
            return Err(Error::Config(format!(
                "verification.block_count must be between {} and {}, got {}",
                MIN_BLOCKS, MAX_BLOCK_COUNT, v.block_count
            )));
        }
        if self.controller.tag_detect_timeout_ms == 0 {
            return Err(Error::Config(
                "controller.tag_detect_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn verifier_config(&self) -> VerifierConfig {
        let v = &self.verification;
        VerifierConfig {
            time_budget: millis_to_duration(v.time_budget_ms),
            max_attempts: v.max_attempts,
            required_consistent_reads: v.required_consistent_reads,
            cluster_tolerance: v.cluster_tolerance_raw16,
            block_count: v.block_count,
            fallback_read_timeout: millis_to_duration(v.fallback_read_timeout_ms),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let c = &self.controller;
        ControllerConfig {
            verifier: self.verifier_config(),
            proximity_cooldown: millis_to_duration(c.proximity_cooldown_ms),
            error_display: millis_to_duration(c.error_display_ms),
            tag_detect_timeout: millis_to_duration(c.tag_detect_timeout_ms),
            auto_scan_enabled: self.settings.auto_scan_on_proximity,
            verbose_logging: self.settings.verbose_logging,
        }
    }
}
