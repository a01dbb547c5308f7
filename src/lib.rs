//! Guardian Core - LLM Telemetry Analysis Pipeline
//!
//! Out-of-band analysis for instrumented LLM applications:
//! - Ingress → Normalizer → {Quality, Threat, Anomaly} → Incident Synthesizer
//! - Metrics and incident events go to an injected sink
//! - Records and incidents persist through an injected store
//!
//! The pipeline never sits in the request path. It consumes telemetry the
//! client library already emitted and enriches it after the fact.

pub mod api;
pub mod config;
pub mod error;
pub mod logic;

pub use config::PipelineConfig;
pub use error::{AppError, AppResult};
