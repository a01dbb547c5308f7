//! Normalizer
//!
//! Produces the canonical `TelemetryRecord` from a validated payload: fills
//! defaults, folds opaque metadata into tags, truncates oversized text, and
//! short-circuits duplicate trace ids within a bounded LRU window.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

use super::record::{RawTelemetry, TelemetryRecord};

pub const DEFAULT_USER_ID: &str = "anonymous";

// ============================================================================
// DEDUP WINDOW
// ============================================================================

/// Bounded set of recently seen trace-id fingerprints. Eviction is LRU: a
/// duplicate hit refreshes the entry's position.
struct DedupWindow {
    capacity: usize,
    seen: HashMap<u64, u64>,
    order: VecDeque<(u64, u64)>,
    next_stamp: u64,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashMap::new(),
            order: VecDeque::new(),
            next_stamp: 0,
        }
    }

    /// Returns true when the fingerprint is new to the window.
    fn insert(&mut self, fp: u64) -> bool {
        self.next_stamp += 1;
        let stamp = self.next_stamp;
        let fresh = match self.seen.insert(fp, stamp) {
            Some(_) => false,
            None => true,
        };
        self.order.push_back((stamp, fp));

        while self.seen.len() > self.capacity {
            // Skip stale order entries left behind by LRU touches.
            match self.order.pop_front() {
                Some((stamp, fp)) => {
                    if self.seen.get(&fp) == Some(&stamp) {
                        self.seen.remove(&fp);
                    }
                }
                None => break,
            }
        }
        fresh
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Outcome of normalization for one validated payload.
#[derive(Debug)]
pub enum NormalizeOutcome {
    Fresh(TelemetryRecord),
    Duplicate,
}

pub struct Normalizer {
    max_text_bytes: usize,
    dedup: Mutex<DedupWindow>,
}

impl Normalizer {
    pub fn new(max_text_bytes: usize, dedup_capacity: usize) -> Self {
        Self {
            max_text_bytes,
            dedup: Mutex::new(DedupWindow::new(dedup_capacity)),
        }
    }

    /// Canonicalize a payload that already passed `RawTelemetry::validate`.
    pub fn normalize(&self, raw: RawTelemetry) -> NormalizeOutcome {
        let fp = fingerprint(&raw.trace_id);
        if !self.dedup.lock().insert(fp) {
            return NormalizeOutcome::Duplicate;
        }

        let mut tags = raw.tags;
        for (k, v) in raw.metadata {
            tags.entry(format!("meta.{}", k)).or_insert(v);
        }
        if let Some(demo) = raw.demo_mode {
            tags.entry("demo_mode".to_string()).or_insert(demo.to_string());
        }

        NormalizeOutcome::Fresh(TelemetryRecord {
            trace_id: raw.trace_id,
            ingested_at: raw.ingested_at,
            model_id: raw.model_id,
            prompt: truncate_utf8(raw.prompt, self.max_text_bytes),
            response: truncate_utf8(raw.response, self.max_text_bytes),
            input_tokens: raw.input_tokens as u64,
            output_tokens: raw.output_tokens as u64,
            latency_ms: raw.latency_ms,
            cost_usd: raw.cost_usd,
            error_occurred: raw.error_occurred,
            user_id: raw
                .user_id
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            session_id: raw.session_id,
            tags,
        })
    }
}

/// Stable fingerprint of a trace id: first eight bytes of SHA-256.
pub fn fingerprint(trace_id: &str) -> u64 {
    let digest = Sha256::digest(trace_id.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// Truncate to at most `max_bytes`, backing off to a char boundary.
fn truncate_utf8(mut s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(trace_id: &str) -> RawTelemetry {
        serde_json::from_value(serde_json::json!({
            "trace_id": trace_id,
            "model_id": "m",
            "prompt": "p",
            "response": "r",
            "input_tokens": 1,
            "output_tokens": 1,
            "latency_ms": 1.0,
            "cost_usd": 0.0,
            "ingested_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_filled() {
        let n = Normalizer::new(1024, 100);
        match n.normalize(raw("t1")) {
            NormalizeOutcome::Fresh(rec) => {
                assert_eq!(rec.user_id, "anonymous");
                assert!(rec.tags.is_empty());
            }
            NormalizeOutcome::Duplicate => panic!("first submission flagged duplicate"),
        }
    }

    #[test]
    fn test_duplicate_short_circuits() {
        let n = Normalizer::new(1024, 100);
        assert!(matches!(n.normalize(raw("t1")), NormalizeOutcome::Fresh(_)));
        assert!(matches!(n.normalize(raw("t1")), NormalizeOutcome::Duplicate));
        assert!(matches!(n.normalize(raw("t2")), NormalizeOutcome::Fresh(_)));
    }

    #[test]
    fn test_dedup_window_evicts_oldest() {
        let n = Normalizer::new(1024, 3);
        for id in ["a", "b", "c", "d"] {
            assert!(matches!(n.normalize(raw(id)), NormalizeOutcome::Fresh(_)));
        }
        // "a" was evicted by "d"; it is fresh again.
        assert!(matches!(n.normalize(raw("a")), NormalizeOutcome::Fresh(_)));
        // "d" is still present.
        assert!(matches!(n.normalize(raw("d")), NormalizeOutcome::Duplicate));
    }

    #[test]
    fn test_lru_touch_refreshes_position() {
        let mut w = DedupWindow::new(2);
        assert!(w.insert(1));
        assert!(w.insert(2));
        // Touch 1 so that 2 becomes the eviction candidate.
        assert!(!w.insert(1));
        assert!(w.insert(3));
        assert!(!w.insert(1));
        assert!(w.insert(2));
    }

    #[test]
    fn test_metadata_folded_into_tags() {
        let mut r = raw("t1");
        r.metadata.insert("env".to_string(), "prod".to_string());
        r.demo_mode = Some(true);
        let n = Normalizer::new(1024, 100);
        match n.normalize(r) {
            NormalizeOutcome::Fresh(rec) => {
                assert_eq!(rec.tags.get("meta.env").map(String::as_str), Some("prod"));
                assert_eq!(rec.tags.get("demo_mode").map(String::as_str), Some("true"));
            }
            _ => panic!("expected fresh"),
        }
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let mut r = raw("t1");
        r.prompt = "héllo wörld".repeat(100);
        let n = Normalizer::new(64, 100);
        match n.normalize(r) {
            NormalizeOutcome::Fresh(rec) => {
                assert!(rec.prompt.len() <= 64);
                assert!(rec.prompt.is_char_boundary(rec.prompt.len()));
            }
            _ => panic!("expected fresh"),
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint("t1"), fingerprint("t1"));
        assert_ne!(fingerprint("t1"), fingerprint("t2"));
    }
}
