//! Acquisition controller
//!
//! Owns the scan lifecycle: single-flight start, proximity auto-scan with a
//! cooldown, the observable UI state and event publication. Each scan runs
//! as its own tokio task; the caller gets a `JoinHandle` and may ignore it.
//!
//! Per scan: open session → verify → persist the kept reading (always) →
//! close session → publish state and events.

use crate::calibration::CalibrationEngine;
use crate::error::{Error, Result};
use crate::scan_log::ScanLogStore;
use crate::state::{ControllerState, LastReading, ScanState};
use crate::tag::{open_connected, TagHardware, INCONSISTENT_ALERT};
use crate::verifier::{Verifier, VerifierConfig};
use glucotag_common::events::{EventBus, ScanEvent, ScanTrigger, VerificationOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Controller timing and behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub verifier: VerifierConfig,
    /// Minimum gap between two proximity-triggered scans
    pub proximity_cooldown: Duration,
    /// How long an error message stays visible
    pub error_display: Duration,
    /// How long a session waits for a tag
    pub tag_detect_timeout: Duration,
    /// Initial auto-scan flag
    pub auto_scan_enabled: bool,
    pub verbose_logging: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            verifier: VerifierConfig::default(),
            proximity_cooldown: Duration::from_secs(10),
            error_display: Duration::from_secs(5),
            tag_detect_timeout: Duration::from_secs(30),
            auto_scan_enabled: false,
            verbose_logging: false,
        }
    }
}

/// What happened to a proximity trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProximityDecision {
    Started,
    AutoScanDisabled,
    Busy,
    CoolingDown,
}

/// Result of a finished scan task
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub last: LastReading,
    pub trigger: ScanTrigger,
}

pub struct AcquisitionController<H: TagHardware> {
    hardware: Arc<H>,
    calibration: Arc<CalibrationEngine>,
    scan_log: ScanLogStore,
    events: EventBus,
    config: ControllerConfig,
    state: RwLock<ControllerState>,
}

impl<H: TagHardware> AcquisitionController<H> {
    pub fn new(
        hardware: Arc<H>,
        calibration: Arc<CalibrationEngine>,
        scan_log: ScanLogStore,
        events: EventBus,
        config: ControllerConfig,
    ) -> Arc<Self> {
        let state = ControllerState::new(config.auto_scan_enabled);
        Arc::new(Self {
            hardware,
            calibration,
            scan_log,
            events,
            config,
            state: RwLock::new(state),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub async fn state(&self) -> ScanState {
        self.state.read().await.scan.clone()
    }

    /// Start a manual scan
    ///
    /// Rejected with `ScanInProgress` while another scan runs; requests are
    /// never queued.
    pub async fn start_scan(self: &Arc<Self>) -> Result<JoinHandle<Result<ScanReport>>> {
        self.start(ScanTrigger::Manual).await
    }

    /// Proximity sensor fired
    pub async fn on_proximity(self: &Arc<Self>) -> ProximityDecision {
        {
            let mut state = self.state.write().await;
            if !state.scan.auto_scan_enabled {
                return ProximityDecision::AutoScanDisabled;
            }
            if state.scan.is_scanning {
                return ProximityDecision::Busy;
            }
            let now = Instant::now();
            if let Some(last) = state.last_proximity_trigger {
                if now.duration_since(last) < self.config.proximity_cooldown {
                    debug!("Proximity trigger ignored due to cooldown");
                    return ProximityDecision::CoolingDown;
                }
            }
            state.last_proximity_trigger = Some(now);
        }

        debug!("Proximity trigger -> starting scan");
        match self.start(ScanTrigger::Proximity).await {
            Ok(_) => ProximityDecision::Started,
            Err(_) => ProximityDecision::Busy,
        }
    }

    /// Toggle auto-scan; a no-op when unchanged
    pub async fn set_auto_scan_enabled(&self, enabled: bool) {
        {
            let mut state = self.state.write().await;
            if state.scan.auto_scan_enabled == enabled {
                debug!("set_auto_scan_enabled noop (unchanged: {})", enabled);
                return;
            }
            state.scan.auto_scan_enabled = enabled;
        }
        info!(
            "Auto-scan on proximity {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.events.emit_lossy(ScanEvent::AutoScanChanged {
            enabled,
            timestamp: chrono::Utc::now(),
        });
    }

    async fn start(self: &Arc<Self>, trigger: ScanTrigger) -> Result<JoinHandle<Result<ScanReport>>> {
        {
            let mut state = self.state.write().await;
            if state.scan.is_scanning {
                return Err(Error::ScanInProgress);
            }
            state.scan.is_scanning = true;
            state.clear_error();
        }

        info!("Scan started ({})", trigger);
        self.events.emit_lossy(ScanEvent::ScanStarted {
            trigger,
            timestamp: chrono::Utc::now(),
        });

        let controller = Arc::clone(self);
        Ok(tokio::spawn(async move { controller.execute(trigger).await }))
    }

    /// Scan task body: run, then publish whatever happened
    async fn execute(self: Arc<Self>, trigger: ScanTrigger) -> Result<ScanReport> {
        let outcome = self.run_scan().await;

        match &outcome {
            Ok(last) => {
                let message = if last.outcome.is_success() {
                    format!(
                        "Verified glucose {:.0} mg/dL after {} attempts",
                        last.reading.glucose.unwrap_or_default(),
                        last.attempts
                    )
                } else {
                    INCONSISTENT_ALERT.to_string()
                };

                let generation = {
                    let mut state = self.state.write().await;
                    state.scan.is_scanning = false;
                    state.scan.last_reading = Some(last.clone());
                    if last.outcome.is_success() {
                        None
                    } else {
                        Some(state.set_error(INCONSISTENT_ALERT.to_string()))
                    }
                };
                if let Some(generation) = generation {
                    self.schedule_error_clear(generation);
                }

                info!("Scan finished: {} ({})", last.outcome, message);
                self.events.emit_lossy(ScanEvent::ScanCompleted {
                    outcome: last.outcome,
                    glucose: last.reading.glucose,
                    trend: last.reading.trend,
                    attempts: last.attempts,
                    message,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) => {
                let message = e.user_message();
                let generation = {
                    let mut state = self.state.write().await;
                    state.scan.is_scanning = false;
                    state.withhold_glucose();
                    state.set_error(message.clone())
                };
                self.schedule_error_clear(generation);

                warn!("Scan failed: {}", e);
                self.events.emit_lossy(ScanEvent::ScanFailed {
                    kind: e.kind().to_string(),
                    message,
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        outcome.map(|last| ScanReport { last, trigger })
    }

    async fn run_scan(&self) -> Result<LastReading> {
        let mut connected =
            open_connected(self.hardware.as_ref(), self.config.tag_detect_timeout).await?;

        let calibration = self.calibration.current().await;
        let verifier =
            Verifier::new(self.config.verifier.clone()).verbose(self.config.verbose_logging);
        let result = verifier.run(&mut connected.tag, &calibration).await;

        // Audit entry for every attempt; a write failure never changes the outcome
        let scan_log_id = match self
            .scan_log
            .append(&result.blocks, &result.reading.diagnostics)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Failed to persist scan log: {}", e);
                None
            }
        };

        if result.outcome == VerificationOutcome::FailedNoData {
            connected.abort("Scan produced no data. Try again.");
            return Err(Error::NoDataAcquired);
        }
        connected.finish(result.succeeded());

        if let Some(glucose) = result.reading.glucose {
            info!(
                "Verified glucose: {:.0} mg/dL attempts={}",
                glucose, result.attempts
            );
        } else if let Some(e) = result.error() {
            info!("Verification failed: {}", e);
        }

        Ok(LastReading {
            reading: result.reading,
            outcome: result.outcome,
            attempts: result.attempts,
            scan_log_id,
        })
    }

    /// Clear the error after the display period unless it was replaced
    fn schedule_error_clear(self: &Arc<Self>, generation: u64) {
        let controller = Arc::clone(self);
        let delay = self.config.error_display;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let cleared = controller.state.write().await.expire_error(generation);
            if cleared {
                debug!("Error message cleared");
                controller.events.emit_lossy(ScanEvent::ErrorCleared {
                    timestamp: chrono::Utc::now(),
                });
            }
        });
    }
}
