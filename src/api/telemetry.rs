//! Telemetry intake handler

use axum::{extract::State, http::StatusCode, Json};

use crate::logic::pipeline::IngestReport;
use crate::AppResult;

use super::AppState;

/// `POST /telemetry` - accepts a single JSON record or a JSON array.
///
/// Replies 202 with `{accepted, rejected}` whenever the body was parseable
/// JSON, even if every record was rejected; 400 only for an unparseable body
/// (handled by the extractor); 429 under backpressure.
pub async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> AppResult<(StatusCode, Json<IngestReport>)> {
    let report = state.pipeline.submit(payload).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}
