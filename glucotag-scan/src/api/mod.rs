//! HTTP control surface
//!
//! Exposes the acquisition controller, the calibration engine and the scan
//! log to external collaborators (UI, calibration reviewers, operators).
//!
//! Base URL: `http://localhost:5790`, endpoints under `/api/v1` plus
//! `/health`.

pub mod handlers;
pub mod sse;

use crate::calibration::CalibrationEngine;
use crate::controller::{AcquisitionController, ControllerConfig};
use crate::scan_log::ScanLogStore;
use crate::tag::TagHardware;
use axum::{
    routing::{get, post},
    Router,
};
use glucotag_common::config::RootFolderInitializer;
use glucotag_common::events::EventBus;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
pub struct AppState<H: TagHardware> {
    pub controller: Arc<AcquisitionController<H>>,
    pub calibration: Arc<CalibrationEngine>,
    pub scan_log: ScanLogStore,
    pub events: EventBus,
}

// Manual impl: derive would demand `H: Clone`
impl<H: TagHardware> Clone for AppState<H> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            calibration: Arc::clone(&self.calibration),
            scan_log: self.scan_log.clone(),
            events: self.events.clone(),
        }
    }
}

impl<H: TagHardware> AppState<H> {
    /// Wire the engine, store and controller around one event bus
    pub async fn assemble(
        hardware: Arc<H>,
        folders: &RootFolderInitializer,
        config: ControllerConfig,
        events: EventBus,
    ) -> Self {
        let calibration = Arc::new(
            CalibrationEngine::open(folders.calibration_path())
                .await
                .with_events(events.clone()),
        );
        let scan_log = ScanLogStore::new(folders.scan_log_dir()).with_events(events.clone());
        let controller = AcquisitionController::new(
            hardware,
            Arc::clone(&calibration),
            scan_log.clone(),
            events.clone(),
            config,
        );
        Self {
            controller,
            calibration,
            scan_log,
            events,
        }
    }
}

/// Create the API router
pub fn create_router<H: TagHardware>(state: AppState<H>) -> Router {
    Router::new()
        // Health check (no prefix for health endpoint)
        .route("/health", get(handlers::health))
        .nest(
            "/api/v1",
            Router::new()
                // Scan control
                .route("/scan/state", get(handlers::get_scan_state::<H>))
                .route("/scan/start", post(handlers::start_scan::<H>))
                .route("/scan/proximity", post(handlers::proximity::<H>))
                .route("/scan/auto-scan", post(handlers::set_auto_scan::<H>))
                // Calibration
                .route("/calibration", get(handlers::get_calibration::<H>))
                .route("/calibration/recompute", post(handlers::recompute_calibration::<H>))
                .route("/calibration/reset", post(handlers::reset_calibration::<H>))
                .route("/calibration/candidates", get(handlers::calibration_candidates::<H>))
                // Scan logs
                .route(
                    "/logs",
                    get(handlers::list_logs::<H>).delete(handlers::purge_logs::<H>),
                )
                .route(
                    "/logs/:id",
                    get(handlers::get_log::<H>).delete(handlers::delete_log::<H>),
                )
                // SSE events
                .route("/events", get(sse::event_stream::<H>)),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}
