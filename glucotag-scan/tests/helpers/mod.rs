//! Shared fixtures for glucotag-scan integration tests
//!
//! - `sensor_image`: synthetic 43-block memory image for a raw sample
//! - `TestEnv`: temp data folder plus a fully wired `AppState` over
//!   simulated hardware
//! - `next_event`: wait for a matching event on the bus

#![allow(dead_code)]

use glucotag_common::config::RootFolderInitializer;
use glucotag_common::events::{EventBus, ScanEvent};
use glucotag_scan::api::AppState;
use glucotag_scan::controller::ControllerConfig;
use glucotag_scan::tag::{MemoryImage, SimulatedHardware, SimulatedHardwareBuilder};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Image whose trend slot 0 holds `raw16` with an "east" arrow
pub fn sensor_image(raw16: u16) -> MemoryImage {
    MemoryImage::synthetic(raw16, 4, 0, 10_000)
}

/// One image per pass, in order
pub fn scripted(values: &[u16]) -> Vec<MemoryImage> {
    values.iter().map(|v| sensor_image(*v)).collect()
}

pub struct TestEnv {
    pub dir: TempDir,
    pub folders: RootFolderInitializer,
    pub hardware: Arc<SimulatedHardware>,
    pub events: EventBus,
    pub state: AppState<SimulatedHardware>,
}

impl TestEnv {
    pub async fn new(builder: SimulatedHardwareBuilder, config: ControllerConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let folders = RootFolderInitializer::new(dir.path().to_path_buf());
        folders.ensure_directory_exists().expect("data folder");
        let hardware = Arc::new(builder.build());
        let events = EventBus::new(64);
        let state =
            AppState::assemble(Arc::clone(&hardware), &folders, config, events.clone()).await;
        Self {
            dir,
            folders,
            hardware,
            events,
            state,
        }
    }

    /// Environment serving a steady 120 mg/dL sensor
    pub async fn steady() -> Self {
        Self::new(
            SimulatedHardware::builder(sensor_image(1200)),
            ControllerConfig::default(),
        )
        .await
    }
}

/// Wait up to `within` for an event matching `pred`
pub async fn next_event<F>(
    rx: &mut broadcast::Receiver<ScanEvent>,
    within: Duration,
    mut pred: F,
) -> Option<ScanEvent>
where
    F: FnMut(&ScanEvent) -> bool,
{
    tokio::time::timeout(within, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
