//! Pipeline Orchestration
//!
//! Bounded intake queue feeding a worker pool with cooperative backpressure.
//! Each record is processed to completion by one task: the three analyzers
//! run concurrently under a shared deadline, the synthesizer merges whatever
//! completed, and persistence plus emission close out the record. No failure
//! inside one record's analysis can fail another record.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::logic::ai::SharedAiClient;
use crate::logic::anomaly::{dedup_by_metric, AnomalyDetector};
use crate::logic::emitter::{names, Emitter, MetricsSink};
use crate::logic::incident::{synthesize, IncidentManager};
use crate::logic::normalize::{NormalizeOutcome, Normalizer};
use crate::logic::quality::QualityClassifier;
use crate::logic::record::{Enrichment, RawTelemetry, TelemetryRecord};
use crate::logic::store::{write_with_retry, RecordStore, SharedStore};
use crate::logic::threat::ThreatClassifier;

// ============================================================================
// SUBMISSION TYPES
// ============================================================================

/// Acknowledgment for one submission (single record or batch).
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: Vec<(usize, String)>,
}

#[derive(Debug)]
pub enum SubmitError {
    /// The intake queue is saturated; callers retry with backoff.
    Overloaded,
    /// The worker pool is gone; the process is shutting down.
    Closed,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Overloaded => write!(f, "pipeline overloaded"),
            SubmitError::Closed => write!(f, "pipeline closed"),
        }
    }
}

impl std::error::Error for SubmitError {}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    inner: Arc<Inner>,
    tx: mpsc::Sender<TelemetryRecord>,
}

struct Inner {
    cfg: Arc<PipelineConfig>,
    normalizer: Normalizer,
    quality: QualityClassifier,
    threat: ThreatClassifier,
    anomaly: AnomalyDetector,
    incidents: Arc<IncidentManager>,
    emitter: Emitter,
    store: SharedStore,
}

impl Pipeline {
    /// Wire the pipeline from its injected leaf adapters and start the
    /// worker pool.
    pub fn new(
        cfg: Arc<PipelineConfig>,
        ai: SharedAiClient,
        sink: Arc<dyn MetricsSink>,
        store: SharedStore,
    ) -> Arc<Self> {
        let incidents = IncidentManager::new(store.clone());
        let inner = Arc::new(Inner {
            normalizer: Normalizer::new(cfg.max_text_bytes, cfg.dedup_capacity),
            quality: QualityClassifier::new(cfg.clone(), ai.clone()),
            threat: ThreatClassifier::new(cfg.clone(), ai),
            anomaly: AnomalyDetector::new(cfg.clone()),
            incidents,
            emitter: Emitter::new(cfg.metric_namespace.clone(), sink),
            store,
            cfg,
        });

        let (tx, rx) = mpsc::channel(inner.cfg.intake_capacity());
        tokio::spawn(dispatch(inner.clone(), rx));

        Arc::new(Self { inner, tx })
    }

    pub fn incidents(&self) -> Arc<IncidentManager> {
        self.inner.incidents.clone()
    }

    pub fn config(&self) -> Arc<PipelineConfig> {
        self.inner.cfg.clone()
    }

    /// Free intake slots, for the health surface.
    pub fn intake_headroom(&self) -> usize {
        self.tx.capacity()
    }

    /// Per-metric rolling-window depths, for the health surface.
    pub fn window_depths(&self) -> std::collections::HashMap<crate::logic::anomaly::types::MetricKind, usize> {
        self.inner.anomaly.window_depths()
    }

    /// Accept a submission: a single JSON record or a JSON array. Performs
    /// schema validation and dedup synchronously, queues fresh records for
    /// analysis, and reports per-record rejections. A saturated queue fails
    /// the whole call with `Overloaded`; dedup makes the caller's retry of
    /// an entire batch safe.
    pub async fn submit(&self, payload: serde_json::Value) -> Result<IngestReport, SubmitError> {
        let items: Vec<serde_json::Value> = match payload {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };

        let mut report = IngestReport {
            accepted: 0,
            rejected: Vec::new(),
        };
        let mut duplicates = 0usize;

        for (index, item) in items.into_iter().enumerate() {
            let raw: RawTelemetry = match serde_json::from_value(item) {
                Ok(raw) => raw,
                Err(e) => {
                    report.rejected.push((index, format!("malformed record: {}", e)));
                    continue;
                }
            };
            if let Err(reason) = raw.validate() {
                report.rejected.push((index, format!("malformed record: {}", reason)));
                continue;
            }

            match self.inner.normalizer.normalize(raw) {
                NormalizeOutcome::Duplicate => {
                    duplicates += 1;
                    report.rejected.push((index, "duplicate".to_string()));
                }
                NormalizeOutcome::Fresh(record) => match self.tx.try_send(record) {
                    Ok(()) => report.accepted += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        return Err(SubmitError::Overloaded);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        return Err(SubmitError::Closed);
                    }
                },
            }
        }

        let emitter = &self.inner.emitter;
        if report.accepted > 0 {
            emitter.counter(names::INGRESS_ACCEPTED, report.accepted as f64, &[]).await;
        }
        let hard_rejects = report.rejected.len() - duplicates;
        if hard_rejects > 0 {
            emitter.counter(names::INGRESS_REJECTED, hard_rejects as f64, &[]).await;
        }
        if duplicates > 0 {
            emitter.counter(names::INGRESS_DUPLICATE, duplicates as f64, &[]).await;
        }

        Ok(report)
    }
}

// ============================================================================
// WORKER POOL
// ============================================================================

/// Pull records off the queue and hand each to its own task, bounded by the
/// analysis semaphore.
async fn dispatch(inner: Arc<Inner>, mut rx: mpsc::Receiver<TelemetryRecord>) {
    let limit = Arc::new(Semaphore::new(inner.cfg.max_concurrent_analyses));
    while let Some(record) = rx.recv().await {
        let permit = match limit.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let inner = inner.clone();
        tokio::spawn(async move {
            process_record(inner, record).await;
            drop(permit);
        });
    }
    tracing::info!("pipeline intake closed, worker pool draining");
}

/// One record, end to end. Analyzer failures degrade to a partial result;
/// they never escape this function.
async fn process_record(inner: Arc<Inner>, record: TelemetryRecord) {
    let deadline = Instant::now() + inner.cfg.record_deadline();

    let quality_fut = tokio::time::timeout_at(deadline, inner.quality.analyze(&record, deadline));
    let threat_fut = tokio::time::timeout_at(deadline, inner.threat.analyze(&record, deadline));
    let (quality_res, threat_res, mut anomalies) = tokio::join!(quality_fut, threat_fut, async {
        inner.anomaly.observe(&record)
    });

    // A deadline overrun counts as a terminal analyzer failure.
    let (quality, quality_failed, quality_analyzed) = match quality_res {
        Ok(outcome) => (outcome.score, outcome.failed, outcome.analyzed),
        Err(_) => {
            tracing::warn!(trace_id = %record.trace_id, "quality analysis hit record deadline");
            (
                crate::logic::record::QualityScore::failed("record deadline exceeded"),
                true,
                true,
            )
        }
    };
    let (threats, threat_failed) = match threat_res {
        Ok(outcome) => (outcome.verdicts, outcome.failed),
        Err(_) => {
            tracing::warn!(trace_id = %record.trace_id, "threat analysis hit record deadline");
            (vec![], true)
        }
    };

    // The quality metric joins the anomaly windows only once its score
    // exists; analyzers themselves never observe each other. The skip
    // sentinel never feeds the window.
    if quality_analyzed {
        if let Some(overall) = quality.overall {
            anomalies.extend(inner.anomaly.observe_quality(record.ingested_at, overall));
        }
    }
    let anomalies = dedup_by_metric(anomalies);

    let enrichment = Enrichment {
        quality: Some(quality),
        threats,
        anomalies,
        partial: quality_failed || threat_failed,
    };

    emit_record_metrics(&inner, &record, &enrichment, quality_failed, quality_analyzed).await;

    let incident = if inner.cfg.enable_incident_emission {
        synthesize(&inner.cfg, &record, &enrichment)
    } else {
        None
    };

    // Incident first: once the enriched record is visible, so is any
    // incident derived from it.
    if let Some(incident) = incident {
        write_with_retry(&inner.emitter, "incident", || {
            let store = inner.store.clone();
            let incident = incident.clone();
            async move { store.put_incident(&incident).await }
        })
        .await;

        inner.incidents.publish(&incident);
        inner
            .emitter
            .counter(
                names::INCIDENTS_CREATED,
                1.0,
                &[("severity", incident.severity.as_str())],
            )
            .await;
        inner
            .emitter
            .event(
                &format!("incident {} ({})", incident.id, incident.severity),
                &incident.summary,
                incident.severity,
                &[("trace_id", incident.trace_id.as_str())],
            )
            .await;
    }

    write_with_retry(&inner.emitter, "record", || {
        let store = inner.store.clone();
        let record = record.clone();
        let enrichment = enrichment.clone();
        async move { store.put_record(&record, &enrichment).await }
    })
    .await;
}

async fn emit_record_metrics(
    inner: &Inner,
    record: &TelemetryRecord,
    enrichment: &Enrichment,
    quality_failed: bool,
    quality_analyzed: bool,
) {
    let emitter = &inner.emitter;
    let model_tag = [("model_id", record.model_id.as_str())];

    emitter.counter(names::REQUESTS_TOTAL, 1.0, &model_tag).await;
    if record.error_occurred {
        emitter.counter(names::REQUESTS_ERRORS, 1.0, &model_tag).await;
    }
    emitter
        .histogram(names::LATENCY_RESPONSE_TIME, record.latency_ms, &model_tag)
        .await;
    emitter.counter(names::COST_TOTAL, record.cost_usd, &model_tag).await;

    if quality_analyzed {
        if let Some(overall) = enrichment.quality.as_ref().and_then(|q| q.overall) {
            emitter
                .gauge(names::QUALITY_OVERALL_SCORE, overall, &model_tag)
                .await;
        }
    }
    if quality_failed {
        emitter.counter(names::QUALITY_PARSE_FAILURES, 1.0, &[]).await;
    }

    for verdict in enrichment.threats.iter().filter(|t| t.is_threat()) {
        emitter
            .counter(
                names::THREATS_DETECTED,
                1.0,
                &[
                    ("kind", verdict.kind.as_str()),
                    ("severity", verdict.severity.as_str()),
                    ("scope", verdict.scope.as_str()),
                ],
            )
            .await;
    }
    for anomaly in &enrichment.anomalies {
        emitter
            .counter(
                names::ANOMALIES_DETECTED,
                1.0,
                &[
                    ("metric", anomaly.metric.as_str()),
                    ("trigger", anomaly.trigger.as_str()),
                    ("severity", anomaly.severity.as_str()),
                ],
            )
            .await;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::ai::OfflineAiClient;
    use crate::logic::emitter::NullSink;
    use crate::logic::store::MemoryStore;

    fn payload(trace_id: &str) -> serde_json::Value {
        serde_json::json!({
            "trace_id": trace_id,
            "model_id": "m",
            "prompt": "Capital of France?",
            "response": "Paris is the capital of France.",
            "input_tokens": 5,
            "output_tokens": 8,
            "latency_ms": 400.0,
            "cost_usd": 0.0005,
            "ingested_at": "2026-01-01T00:00:00Z"
        })
    }

    fn pipeline(cfg: PipelineConfig) -> Arc<Pipeline> {
        Pipeline::new(
            Arc::new(cfg),
            Arc::new(OfflineAiClient),
            Arc::new(NullSink),
            Arc::new(MemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn test_single_record_accepted() {
        let p = pipeline(PipelineConfig::default());
        let report = p.submit(payload("t1")).await.unwrap();
        assert_eq!(report.accepted, 1);
        assert!(report.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_bad_record_does_not_poison_batch() {
        let p = pipeline(PipelineConfig::default());
        let batch = serde_json::json!([
            payload("t1"),
            {"trace_id": "t2"},
            payload("t3"),
        ]);
        let report = p.submit(batch).await.unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, 1);
        assert!(report.rejected[0].1.contains("malformed"));
    }

    #[tokio::test]
    async fn test_duplicate_rejected_with_reason() {
        let p = pipeline(PipelineConfig::default());
        p.submit(payload("t1")).await.unwrap();
        let report = p.submit(payload("t1")).await.unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.rejected, vec![(0, "duplicate".to_string())]);
    }

    #[tokio::test]
    async fn test_negative_tokens_rejected() {
        let p = pipeline(PipelineConfig::default());
        let mut bad = payload("t1");
        bad["output_tokens"] = serde_json::json!(-3);
        let report = p.submit(bad).await.unwrap();
        assert_eq!(report.accepted, 0);
        assert!(report.rejected[0].1.contains("output_tokens"));
    }

    #[tokio::test]
    async fn test_overload_backpressure() {
        use crate::logic::ai::{AiClient, AiError, CompletionOptions};
        use async_trait::async_trait;

        /// Never answers, so the single worker stays busy and the queue
        /// fills deterministically.
        struct StallAi;

        #[async_trait]
        impl AiClient for StallAi {
            async fn complete(&self, _: &str, _: &CompletionOptions) -> Result<String, AiError> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Err(AiError::Timeout)
            }
        }

        let mut cfg = PipelineConfig::default();
        cfg.batch_size = 1; // intake capacity 2
        cfg.max_concurrent_analyses = 1;
        let p = Pipeline::new(
            Arc::new(cfg),
            Arc::new(StallAi),
            Arc::new(NullSink),
            Arc::new(MemoryStore::new()),
        );

        let mut overloaded = false;
        for i in 0..10 {
            match p.submit(payload(&format!("flood-{}", i))).await {
                Ok(_) => {}
                Err(SubmitError::Overloaded) => {
                    overloaded = true;
                    break;
                }
                Err(other) => panic!("unexpected: {}", other),
            }
        }
        assert!(overloaded);
    }
}
