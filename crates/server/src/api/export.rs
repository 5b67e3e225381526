//! Export API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tessera_core::{
    export::ExportPhase, validation::check_export_allowed, ExportTaskState, ManualFixEntry,
};

use super::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Whether the set may be exported right now
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub passed: bool,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub last_invalidated_at: Option<DateTime<Utc>>,
    pub validation_age_minutes: Option<f64>,
    pub ready_tickets: usize,
}

/// The run record plus the in-process phase
#[derive(Debug, Serialize)]
pub struct ExportStateResponse {
    #[serde(flatten)]
    pub state: ExportTaskState,
    pub phase: ExportPhase,
    pub can_retry: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct ManualFixesResponse {
    pub fixes: Vec<ManualFixEntry>,
    pub total: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Gate decision for a ticket set
pub async fn get_readiness(
    State(state): State<Arc<AppState>>,
    Path(set_id): Path<String>,
) -> Result<Json<ReadinessResponse>, ApiError> {
    let record = state.validations().get(&set_id)?;
    let ready_tickets = state.tickets().list_export_ready(&set_id)?.len();
    let decision = check_export_allowed(record.as_ref());

    Ok(Json(ReadinessResponse {
        ready: decision.is_ok(),
        reason: decision.err().map(|blocked| blocked.to_string()),
        passed: record.as_ref().is_some_and(|r| r.passed),
        last_validated_at: record.as_ref().and_then(|r| r.last_validated_at),
        last_invalidated_at: record.as_ref().and_then(|r| r.last_invalidated_at),
        validation_age_minutes: record
            .as_ref()
            .and_then(|r| r.validation_age_minutes(Utc::now())),
        ready_tickets,
    }))
}

/// Launch an export in the background
pub async fn start_export(
    State(state): State<Arc<AppState>>,
    Path(set_id): Path<String>,
) -> Result<(StatusCode, Json<ExportTaskState>), ApiError> {
    let orchestrator = state
        .orchestrator()
        .ok_or_else(ApiError::tracker_unavailable)?;
    let task = orchestrator.launch(&set_id).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// Current run record
pub async fn get_export(
    State(state): State<Arc<AppState>>,
    Path(set_id): Path<String>,
) -> Result<Json<ExportStateResponse>, ApiError> {
    let task = state
        .tasks()
        .get(&set_id)?
        .ok_or_else(|| ApiError::not_found(format!("no export found for ticket set {}", set_id)))?;

    let phase = match state.orchestrator() {
        Some(orchestrator) => orchestrator.phase(&set_id).await,
        None => ExportPhase::Idle,
    };

    Ok(Json(ExportStateResponse {
        can_retry: task.can_retry(),
        state: task,
        phase,
    }))
}

/// Retry a failed export
pub async fn retry_export(
    State(state): State<Arc<AppState>>,
    Path(set_id): Path<String>,
) -> Result<(StatusCode, Json<ExportTaskState>), ApiError> {
    let orchestrator = state
        .orchestrator()
        .ok_or_else(ApiError::tracker_unavailable)?;
    let task = orchestrator.retry(&set_id).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// Request cancellation of a running export
pub async fn cancel_export(
    State(state): State<Arc<AppState>>,
    Path(set_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let orchestrator = state
        .orchestrator()
        .ok_or_else(ApiError::tracker_unavailable)?;
    if !orchestrator.cancel(&set_id) {
        return Err(ApiError::conflict(format!(
            "no export of ticket set {} is running",
            set_id
        )));
    }
    Ok(Json(CancelResponse { cancelled: true }))
}

/// Manual fixes recorded for a ticket set
pub async fn list_manual_fixes(
    State(state): State<Arc<AppState>>,
    Path(set_id): Path<String>,
) -> Result<Json<ManualFixesResponse>, ApiError> {
    let fixes = state.manual_fixes().list_for_ticket_set(&set_id)?;
    Ok(Json(ManualFixesResponse {
        total: fixes.len(),
        fixes,
    }))
}
