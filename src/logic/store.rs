//! Record Store Adapter
//!
//! The pipeline persists through this injected interface and never assumes a
//! backing engine. Semantics: at-most-once writes (loss between enqueue and
//! persist is tolerated) and read-your-writes within one process for status
//! updates. Write failures retry three times with backoff, then degrade to a
//! counter and an error log - they never propagate out of the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::emitter::{names, Emitter};
use super::incident::types::{Incident, IncidentStatus};
use super::record::{Enrichment, TelemetryRecord};
use super::threat::types::Severity;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone)]
pub enum StoreError {
    NotFound(Uuid),
    IllegalTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },
    WriteFailure(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "incident {} not found", id),
            StoreError::IllegalTransition { from, to } => {
                write!(f, "illegal incident transition {} -> {}", from, to)
            }
            StoreError::WriteFailure(msg) => write!(f, "store write failure: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

// ============================================================================
// INTERFACE
// ============================================================================

/// Query filter for the incident surface. All clauses are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
}

/// Result of a status update; `changed` is false for an idempotent re-apply.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub incident: Incident,
    pub changed: bool,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put_record(
        &self,
        record: &TelemetryRecord,
        enrichment: &Enrichment,
    ) -> Result<(), StoreError>;

    async fn put_incident(&self, incident: &Incident) -> Result<(), StoreError>;

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, StoreError>;

    async fn update_incident_status(
        &self,
        id: Uuid,
        status: IncidentStatus,
    ) -> Result<TransitionOutcome, StoreError>;

    async fn query_incidents(
        &self,
        filter: &IncidentFilter,
        limit: usize,
    ) -> Result<Vec<Incident>, StoreError>;
}

pub type SharedStore = Arc<dyn RecordStore>;

// ============================================================================
// WRITE RETRY
// ============================================================================

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Run a store write with bounded retries. On exhaustion the failure is
/// counted and logged; it is never re-raised into record processing.
pub async fn write_with_retry<F, Fut>(emitter: &Emitter, what: &str, mut op: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), StoreError>>,
{
    for attempt in 0..WRITE_ATTEMPTS {
        match op().await {
            Ok(()) => return,
            Err(err) => {
                if attempt + 1 < WRITE_ATTEMPTS {
                    tokio::time::sleep(WRITE_BACKOFF_BASE * 2u32.pow(attempt)).await;
                } else {
                    tracing::error!(object = what, error = %err, "store write exhausted retries");
                    emitter
                        .counter(names::STORE_WRITE_FAILURES, 1.0, &[("object", what)])
                        .await;
                }
            }
        }
    }
}

// ============================================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================================

/// Process-local store. The default for tests, demos, and single-node
/// deployments; production embeddings inject their own adapter.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, (TelemetryRecord, Enrichment)>>,
    incidents: RwLock<HashMap<Uuid, Incident>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn incident_count(&self) -> usize {
        self.incidents.read().len()
    }

    pub fn get_record(&self, trace_id: &str) -> Option<(TelemetryRecord, Enrichment)> {
        self.records.read().get(trace_id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put_record(
        &self,
        record: &TelemetryRecord,
        enrichment: &Enrichment,
    ) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.trace_id.clone(), (record.clone(), enrichment.clone()));
        Ok(())
    }

    async fn put_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        self.incidents.write().insert(incident.id, incident.clone());
        Ok(())
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, StoreError> {
        Ok(self.incidents.read().get(&id).cloned())
    }

    async fn update_incident_status(
        &self,
        id: Uuid,
        status: IncidentStatus,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut incidents = self.incidents.write();
        let incident = incidents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let changed = incident
            .transition(status)
            .map_err(|e| StoreError::IllegalTransition {
                from: e.from,
                to: e.to,
            })?;
        Ok(TransitionOutcome {
            incident: incident.clone(),
            changed,
        })
    }

    async fn query_incidents(
        &self,
        filter: &IncidentFilter,
        limit: usize,
    ) -> Result<Vec<Incident>, StoreError> {
        let incidents = self.incidents.read();
        let mut list: Vec<Incident> = incidents
            .values()
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .filter(|i| filter.severity.map_or(true, |s| i.severity == s))
            .filter(|i| filter.since.map_or(true, |t| i.created_at >= t))
            .cloned()
            .collect();
        // Newest first.
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        list.truncate(limit);
        Ok(list)
    }
}

// ============================================================================
// TESTS
// ============================================================================
