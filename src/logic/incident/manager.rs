//! Incident Manager
//!
//! In-process registry fronting the Record Store: the query surface used by
//! the API, status transitions, and two append-only push channels - new
//! incidents and status transitions - each tagged with a monotonic sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::logic::store::{
    IncidentFilter, RecordStore, SharedStore, StoreError, TransitionOutcome,
};

use super::types::{Incident, IncidentStatus};

/// Hard cap on query page size.
pub const MAX_QUERY_LIMIT: usize = 500;

const STREAM_BUFFER: usize = 256;

// ============================================================================
// PUSH EVENTS
// ============================================================================

/// A freshly created incident, tagged with a monotonic sequence.
#[derive(Debug, Clone)]
pub struct IncidentCreated {
    pub seq: u64,
    pub incident: Incident,
}

/// A successful status change, tagged with the same sequence space.
#[derive(Debug, Clone)]
pub struct StatusChanged {
    pub seq: u64,
    pub id: Uuid,
    pub from: IncidentStatus,
    pub to: IncidentStatus,
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct IncidentManager {
    store: SharedStore,
    seq: AtomicU64,
    created_tx: broadcast::Sender<IncidentCreated>,
    transition_tx: broadcast::Sender<StatusChanged>,
}

impl IncidentManager {
    pub fn new(store: SharedStore) -> Arc<Self> {
        let (created_tx, _) = broadcast::channel(STREAM_BUFFER);
        let (transition_tx, _) = broadcast::channel(STREAM_BUFFER);
        Arc::new(Self {
            store,
            seq: AtomicU64::new(0),
            created_tx,
            transition_tx,
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a new incident and notify subscribers. Returns the assigned
    /// sequence number.
    pub fn publish(&self, incident: &Incident) -> u64 {
        let seq = self.next_seq();
        // A lagging subscriber misses events; the store remains the source
        // of truth.
        let _ = self.created_tx.send(IncidentCreated {
            seq,
            incident: incident.clone(),
        });
        seq
    }

    /// Apply a status transition through the store. Idempotent re-applies
    /// succeed without emitting a push event.
    pub async fn transition(
        &self,
        id: Uuid,
        to: IncidentStatus,
    ) -> Result<TransitionOutcome, StoreError> {
        let before = self
            .store
            .get_incident(id)
            .await?
            .ok_or(StoreError::NotFound(id))?
            .status;

        let outcome = self.store.update_incident_status(id, to).await?;
        if outcome.changed {
            let _ = self.transition_tx.send(StatusChanged {
                seq: self.next_seq(),
                id,
                from: before,
                to,
            });
        }
        Ok(outcome)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Incident>, StoreError> {
        self.store.get_incident(id).await
    }

    pub async fn list(
        &self,
        filter: &IncidentFilter,
        limit: usize,
    ) -> Result<Vec<Incident>, StoreError> {
        self.store
            .query_incidents(filter, limit.min(MAX_QUERY_LIMIT))
            .await
    }

    pub fn subscribe_created(&self) -> broadcast::Receiver<IncidentCreated> {
        self.created_tx.subscribe()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StatusChanged> {
        self.transition_tx.subscribe()
    }
}

// ============================================================================
// TESTS
// ============================================================================
