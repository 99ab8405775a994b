//! HTTP request handlers

use super::AppState;
use crate::calibration::{Calibration, CalibrationReferencePoint};
use crate::controller::ProximityDecision;
use crate::error::Error;
use crate::scan_log::{ReferenceCandidate, ScanLogRecord, DEFAULT_CANDIDATE_LIMIT};
use crate::state::ScanState;
use crate::tag::TagHardware;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    kind: String,
}

#[derive(Debug, Serialize)]
pub struct ProximityResponse {
    decision: ProximityDecision,
}

#[derive(Debug, Deserialize)]
pub struct AutoScanRequest {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecomputeRequest {
    points: Vec<CalibrationReferencePoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeResponse {
    /// False when too few eligible points were supplied
    updated: bool,
    calibration: Calibration,
}

#[derive(Debug, Deserialize)]
pub struct CandidatesQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CandidatesResponse {
    candidates: Vec<ReferenceCandidate>,
}

#[derive(Debug, Serialize)]
pub struct LogListResponse {
    logs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    id: String,
    record: ScanLogRecord,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    removed: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: Error) -> ApiError {
    let status = match &e {
        Error::ScanInProgress => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::MalformedLog { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", e);
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            kind: e.kind().to_string(),
        }),
    )
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "glucotag-scan".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

// ============================================================================
// Scan control
// ============================================================================

/// GET /api/v1/scan/state
pub async fn get_scan_state<H: TagHardware>(State(state): State<AppState<H>>) -> Json<ScanState> {
    Json(state.controller.state().await)
}

/// POST /api/v1/scan/start
///
/// 202 when a scan task was spawned, 409 while another scan runs.
pub async fn start_scan<H: TagHardware>(
    State(state): State<AppState<H>>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    state.controller.start_scan().await.map_err(api_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StatusResponse {
            status: "started".to_string(),
        }),
    ))
}

/// POST /api/v1/scan/proximity
pub async fn proximity<H: TagHardware>(State(state): State<AppState<H>>) -> Json<ProximityResponse> {
    let decision = state.controller.on_proximity().await;
    Json(ProximityResponse { decision })
}

/// POST /api/v1/scan/auto-scan
pub async fn set_auto_scan<H: TagHardware>(
    State(state): State<AppState<H>>,
    Json(req): Json<AutoScanRequest>,
) -> Json<ScanState> {
    state.controller.set_auto_scan_enabled(req.enabled).await;
    Json(state.controller.state().await)
}

// ============================================================================
// Calibration
// ============================================================================

/// GET /api/v1/calibration
pub async fn get_calibration<H: TagHardware>(State(state): State<AppState<H>>) -> Json<Calibration> {
    Json(state.calibration.current().await)
}

/// POST /api/v1/calibration/recompute
pub async fn recompute_calibration<H: TagHardware>(
    State(state): State<AppState<H>>,
    Json(req): Json<RecomputeRequest>,
) -> Result<Json<RecomputeResponse>, ApiError> {
    let fitted = state
        .calibration
        .recompute(&req.points)
        .await
        .map_err(api_error)?;
    let response = match fitted {
        Some(calibration) => RecomputeResponse {
            updated: true,
            calibration,
        },
        None => RecomputeResponse {
            updated: false,
            calibration: state.calibration.current().await,
        },
    };
    Ok(Json(response))
}

/// POST /api/v1/calibration/reset
pub async fn reset_calibration<H: TagHardware>(
    State(state): State<AppState<H>>,
) -> Result<Json<Calibration>, ApiError> {
    let calibration = state.calibration.reset().await.map_err(api_error)?;
    Ok(Json(calibration))
}

/// GET /api/v1/calibration/candidates?limit=N
pub async fn calibration_candidates<H: TagHardware>(
    State(state): State<AppState<H>>,
    Query(query): Query<CandidatesQuery>,
) -> Result<Json<CandidatesResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_CANDIDATE_LIMIT);
    let candidates = state
        .scan_log
        .reference_candidates(limit)
        .await
        .map_err(api_error)?;
    Ok(Json(CandidatesResponse { candidates }))
}

// ============================================================================
// Scan logs
// ============================================================================

/// GET /api/v1/logs
pub async fn list_logs<H: TagHardware>(
    State(state): State<AppState<H>>,
) -> Result<Json<LogListResponse>, ApiError> {
    let logs = state.scan_log.list().await.map_err(api_error)?;
    Ok(Json(LogListResponse { logs }))
}

/// GET /api/v1/logs/:id
pub async fn get_log<H: TagHardware>(
    State(state): State<AppState<H>>,
    Path(id): Path<String>,
) -> Result<Json<LogResponse>, ApiError> {
    let entry = state.scan_log.load(&id).await.map_err(api_error)?;
    let record = ScanLogRecord::new(entry.timestamp, &entry.blocks, &entry.diagnostics);
    Ok(Json(LogResponse { id: entry.id, record }))
}

/// DELETE /api/v1/logs/:id
pub async fn delete_log<H: TagHardware>(
    State(state): State<AppState<H>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.scan_log.delete(&id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/logs
pub async fn purge_logs<H: TagHardware>(
    State(state): State<AppState<H>>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let removed = state.scan_log.purge_all().await.map_err(api_error)?;
    info!("Operator purged {} scan logs", removed);
    Ok(Json(PurgeResponse { removed }))
}
