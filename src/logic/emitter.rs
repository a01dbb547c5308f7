//! Alert & Metrics Emitter
//!
//! Publishes per-record metrics and per-incident events to an injected sink.
//! Emission is strictly best-effort: sink failures are logged at warn and
//! swallowed, and can never block or fail record processing.

use std::sync::Arc;

use async_trait::async_trait;

use super::threat::types::Severity;

// ============================================================================
// METRIC NAMES (stable wire contract)
// ============================================================================

pub mod names {
    pub const INGRESS_ACCEPTED: &str = "ingress.accepted";
    pub const INGRESS_REJECTED: &str = "ingress.rejected";
    pub const INGRESS_DUPLICATE: &str = "ingress.duplicate";

    pub const REQUESTS_TOTAL: &str = "requests.total";
    pub const REQUESTS_ERRORS: &str = "requests.errors";
    pub const LATENCY_RESPONSE_TIME: &str = "latency.response_time";
    pub const COST_TOTAL: &str = "cost.total";

    pub const QUALITY_OVERALL_SCORE: &str = "quality.overall_score";
    pub const QUALITY_PARSE_FAILURES: &str = "quality.parse_failures";

    pub const THREATS_DETECTED: &str = "threats.detected";
    pub const ANOMALIES_DETECTED: &str = "anomalies.detected";
    pub const INCIDENTS_CREATED: &str = "incidents.created";

    pub const STORE_WRITE_FAILURES: &str = "store.write_failures";
}

// ============================================================================
// SINK INTERFACE
// ============================================================================

#[derive(Debug)]
pub struct SinkError(pub String);

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink error: {}", self.0)
    }
}

impl std::error::Error for SinkError {}

/// The injected outbound interface. Implementations must be safe for
/// concurrent use.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn counter(&self, name: &str, value: f64, tags: &[(&str, &str)])
        -> Result<(), SinkError>;
    async fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) -> Result<(), SinkError>;
    async fn histogram(
        &self,
        name: &str,
        value: f64,
        tags: &[(&str, &str)],
    ) -> Result<(), SinkError>;
    async fn event(
        &self,
        title: &str,
        body: &str,
        severity: Severity,
        tags: &[(&str, &str)],
    ) -> Result<(), SinkError>;
}

// ============================================================================
// EMITTER
// ============================================================================

/// Namespacing wrapper around the sink. One per deployment; the prefix is
/// configured once.
pub struct Emitter {
    namespace: String,
    sink: Arc<dyn MetricsSink>,
}

impl Emitter {
    pub fn new(namespace: impl Into<String>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            namespace: namespace.into(),
            sink,
        }
    }

    fn full(&self, name: &str) -> String {
        format!("{}.{}", self.namespace, name)
    }

    pub async fn counter(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        if let Err(e) = self.sink.counter(&self.full(name), value, tags).await {
            tracing::warn!(metric = name, error = %e, "metric emission failed");
        }
    }

    pub async fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        if let Err(e) = self.sink.gauge(&self.full(name), value, tags).await {
            tracing::warn!(metric = name, error = %e, "metric emission failed");
        }
    }

    pub async fn histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        if let Err(e) = self.sink.histogram(&self.full(name), value, tags).await {
            tracing::warn!(metric = name, error = %e, "metric emission failed");
        }
    }

    pub async fn event(&self, title: &str, body: &str, severity: Severity, tags: &[(&str, &str)]) {
        if let Err(e) = self.sink.event(title, body, severity, tags).await {
            tracing::warn!(event = title, error = %e, "event emission failed");
        }
    }
}

// ============================================================================
// BUILT-IN SINKS
// ============================================================================

/// Discards everything. Useful in tests and as a safe default.
pub struct NullSink;

#[async_trait]
impl MetricsSink for NullSink {
    async fn counter(&self, _: &str, _: f64, _: &[(&str, &str)]) -> Result<(), SinkError> {
        Ok(())
    }
    async fn gauge(&self, _: &str, _: f64, _: &[(&str, &str)]) -> Result<(), SinkError> {
        Ok(())
    }
    async fn histogram(&self, _: &str, _: f64, _: &[(&str, &str)]) -> Result<(), SinkError> {
        Ok(())
    }
    async fn event(&self, _: &str, _: &str, _: Severity, _: &[(&str, &str)]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes every emission to the structured log. The default sink for
/// deployments without a metrics backend wired in.
pub struct TracingSink;

#[async_trait]
impl MetricsSink for TracingSink {
    async fn counter(&self, name: &str, value: f64, tags: &[(&str, &str)]) -> Result<(), SinkError> {
        tracing::debug!(metric = name, value, ?tags, kind = "counter");
        Ok(())
    }
    async fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) -> Result<(), SinkError> {
        tracing::debug!(metric = name, value, ?tags, kind = "gauge");
        Ok(())
    }
    async fn histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]) -> Result<(), SinkError> {
        tracing::debug!(metric = name, value, ?tags, kind = "histogram");
        Ok(())
    }
    async fn event(
        &self,
        title: &str,
        body: &str,
        severity: Severity,
        tags: &[(&str, &str)],
    ) -> Result<(), SinkError> {
        tracing::info!(event = title, body, severity = %severity, ?tags);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
