//! Configuration loading and data folder resolution
//!
//! Data folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `GLUCOTAG_ROOT_FOLDER` environment variable
//! 3. `root_folder` key of the TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is never fatal: a warning is logged and built-in
//! defaults are used.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the data folder
pub const ROOT_FOLDER_ENV: &str = "GLUCOTAG_ROOT_FOLDER";

/// Sub-directory holding one JSON file per scan
pub const SCAN_LOG_DIR: &str = "ScanLogs";

/// File holding the persisted calibration record
pub const CALIBRATION_FILE: &str = "calibration.json";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolves the data folder following the priority order above
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    config_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            config_value: None,
        }
    }

    /// Value passed on the command line, if any
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Value read from the TOML config file, if any
    pub fn with_config_value(mut self, path: Option<PathBuf>) -> Self {
        self.config_value = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &self.config_value {
            return path.clone();
        }

        // Priority 4: OS-dependent compiled default
        default_root_folder(&self.module_name)
    }
}

/// OS-dependent default data folder
pub fn default_root_folder(module_name: &str) -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(module_name))
        .unwrap_or_else(|| PathBuf::from(format!("./{}_data", module_name)))
}

/// Default location of the TOML config file for a module
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(module_name).join(format!("{}.toml", module_name)))
}

/// Creates the data folder layout and hands out well-known paths
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the data folder and the scan log directory (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(self.scan_log_dir())?;
        info!("Data folder ready: {}", self.root.display());
        Ok(())
    }

    pub fn scan_log_dir(&self) -> PathBuf {
        self.root.join(SCAN_LOG_DIR)
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.root.join(CALIBRATION_FILE)
    }
}

/// Load a TOML config file, falling back to defaults when the file is missing
///
/// A file that exists but does not parse is an error: silently ignoring a
/// typo in the verification budget would be worse than refusing to start.
pub fn load_toml_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        assert_eq!(LoggingConfig::default().level, "info");
    }

    #[test]
    fn test_initializer_paths() {
        let init = RootFolderInitializer::new(PathBuf::from("/tmp/glucotag-x"));
        assert_eq!(init.scan_log_dir(), PathBuf::from("/tmp/glucotag-x/ScanLogs"));
        assert_eq!(
            init.calibration_path(),
            PathBuf::from("/tmp/glucotag-x/calibration.json")
        );
    }

    #[test]
    fn test_default_root_folder_contains_module_name() {
        let folder = default_root_folder("glucotag");
        assert!(folder.to_string_lossy().contains("glucotag"));
    }
}
