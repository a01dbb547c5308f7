//! Incidents handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::logic::incident::manager::MAX_QUERY_LIMIT;
use crate::logic::incident::{Incident, IncidentStatus};
use crate::logic::store::IncidentFilter;
use crate::logic::threat::types::Severity;
use crate::{AppError, AppResult};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct IncidentQuery {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateIncidentStatus {
    pub status: IncidentStatus,
}

/// List incidents, newest first
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<IncidentQuery>,
) -> AppResult<Json<Vec<Incident>>> {
    let filter = IncidentFilter {
        status: query.status,
        severity: query.severity,
        since: query.since,
    };
    let limit = query.limit.unwrap_or(100).min(MAX_QUERY_LIMIT);
    let incidents = state.pipeline.incidents().list(&filter, limit).await?;
    Ok(Json(incidents))
}

/// Get single incident
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Incident>> {
    let incident = state
        .pipeline
        .incidents()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("incident {} not found", id)))?;
    Ok(Json(incident))
}

/// Update incident status. Idempotent: re-applying the current status
/// succeeds and changes nothing.
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateIncidentStatus>,
) -> AppResult<Json<Incident>> {
    let outcome = state.pipeline.incidents().transition(id, req.status).await?;
    Ok(Json(outcome.incident))
}
