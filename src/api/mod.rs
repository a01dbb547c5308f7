//! HTTP Surface
//!
//! Intake (`POST /telemetry`), the incident query routes, and health.
//! Everything analytical happens behind `Pipeline`; handlers stay thin.

pub mod health;
pub mod incidents;
pub mod telemetry;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::logic::pipeline::Pipeline;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            started_at: chrono::Utc::now(),
        }
    }
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::check))
        .route("/telemetry", post(telemetry::submit))
        .route("/api/v1/incidents", get(incidents::list))
        .route("/api/v1/incidents/:id", get(incidents::get))
        .route("/api/v1/incidents/:id/status", put(incidents::update_status))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
