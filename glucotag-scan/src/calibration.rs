//! Linear calibration engine
//!
//! Maps masked raw samples to glucose with `raw * slope + intercept`, fitted
//! by ordinary least squares over user-supplied reference pairs. Without a
//! fit the record stays flagged uncalibrated and the decoder falls back to
//! its plausibility scalings instead of applying a meaningless affine map.
//!
//! Persistence is a single JSON file, last writer wins.

use crate::error::{Error, Result};
use glucotag_common::events::{EventBus, ScanEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Persisted calibration record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    pub slope: f64,
    pub intercept: f64,
    pub is_calibrated: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
            is_calibrated: false,
        }
    }
}

impl Calibration {
    pub fn calibrated(slope: f64, intercept: f64) -> Self {
        Self {
            slope,
            intercept,
            is_calibrated: true,
        }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.slope + self.intercept
    }
}

/// Raw value from a logged scan, optionally paired with a reference reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationReferencePoint {
    pub raw_value: i64,
    #[serde(default)]
    pub official_value: Option<f64>,
}

impl CalibrationReferencePoint {
    pub fn new(raw_value: i64, official_value: Option<f64>) -> Self {
        Self {
            raw_value,
            official_value,
        }
    }

    /// `(x, y)` pair when both values are present and finite
    fn pair(&self) -> Option<(f64, f64)> {
        self.official_value
            .filter(|y| y.is_finite())
            .map(|y| (self.raw_value as f64, y))
    }
}

/// Minimum number of eligible points for a fit
pub const MIN_REFERENCE_POINTS: usize = 2;

/// Closed-form ordinary least squares over `(raw, official)` pairs
///
/// A zero denominator (all raw values identical) yields slope 1, intercept 0.
pub fn linear_regression(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let (sum_x, sum_y, sum_xy, sum_x2) = points.iter().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sxy, sx2), &(x, y)| (sx + x, sy + y, sxy + x * y, sx2 + x * x),
    );

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return (1.0, 0.0);
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

/// Holds the process-wide calibration record
pub struct CalibrationEngine {
    path: PathBuf,
    current: RwLock<Calibration>,
    events: Option<EventBus>,
}

impl CalibrationEngine {
    /// Open the engine, loading the persisted record or the default
    pub async fn open(path: PathBuf) -> Self {
        let calibration = Self::load(&path).await;
        Self {
            path,
            current: RwLock::new(calibration),
            events: None,
        }
    }

    /// Publish `CalibrationUpdated` on this bus after every write
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Persisted record, or the uncalibrated default if absent or corrupt
    pub async fn load(path: &Path) -> Calibration {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<Calibration>(&content) {
                Ok(calibration) => {
                    info!(
                        "Loaded calibration slope={} intercept={} calibrated={}",
                        calibration.slope, calibration.intercept, calibration.is_calibrated
                    );
                    calibration
                }
                Err(e) => {
                    warn!(
                        "Calibration file {} is corrupt ({}), using default",
                        path.display(),
                        e
                    );
                    Calibration::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Calibration::default(),
            Err(e) => {
                warn!(
                    "Failed to read calibration file {}: {}, using default",
                    path.display(),
                    e
                );
                Calibration::default()
            }
        }
    }

    /// Snapshot used by a decode pass
    pub async fn current(&self) -> Calibration {
        *self.current.read().await
    }

    /// Fit and persist a new calibration
    ///
    /// Returns `Ok(None)` and leaves the record unchanged when fewer than two
    /// points carry both a raw and an official value.
    pub async fn recompute(
        &self,
        points: &[CalibrationReferencePoint],
    ) -> Result<Option<Calibration>> {
        let pairs: Vec<(f64, f64)> = points.iter().filter_map(|p| p.pair()).collect();
        if pairs.len() < MIN_REFERENCE_POINTS {
            info!(
                "Calibration recompute skipped: {} eligible points (need {})",
                pairs.len(),
                MIN_REFERENCE_POINTS
            );
            return Ok(None);
        }

        let (slope, intercept) = linear_regression(&pairs);
        let calibration = Calibration::calibrated(slope, intercept);
        self.store(calibration).await?;
        info!(
            "Calibration recomputed from {} points: slope={:.4} intercept={:.2}",
            pairs.len(),
            slope,
            intercept
        );
        Ok(Some(calibration))
    }

    /// Restore and persist the uncalibrated default
    pub async fn reset(&self) -> Result<Calibration> {
        let calibration = Calibration::default();
        self.store(calibration).await?;
        info!("Calibration reset to default");
        Ok(calibration)
    }

    async fn store(&self, calibration: Calibration) -> Result<()> {
        let mut guard = self.current.write().await;
        persist(&self.path, &calibration).await?;
        *guard = calibration;
        drop(guard);

        if let Some(events) = &self.events {
            events.emit_lossy(ScanEvent::CalibrationUpdated {
                slope: calibration.slope,
                intercept: calibration.intercept,
                is_calibrated: calibration.is_calibrated,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(())
    }
}

/// Write via a temp file and rename so readers never see a partial record
async fn persist(path: &Path, calibration: &Calibration) -> Result<()> {
    let json = serde_json::to_vec_pretty(calibration)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| Error::Persistence(format!("write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Persistence(format!("rename to {}: {}", path.display(), e)))?;
    Ok(())
}
