//! Health handler

use axum::{extract::State, Json};
use serde_json::json;

use super::AppState;

/// `GET /health` - liveness plus a few load indicators.
pub async fn check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let windows = state.pipeline.window_depths();
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds();

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "intake_headroom": state.pipeline.intake_headroom(),
        "window_samples": windows
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect::<std::collections::BTreeMap<_, _>>(),
    }))
}
