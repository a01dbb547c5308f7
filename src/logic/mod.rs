//! Logic Module - Analysis Engines
//!
//! The streaming analysis core:
//! - Normalizer → {Quality, Threat, Anomaly} → Incident Synthesizer
//!
//! ## Architecture
//!
//! ### Threat Classification (`threat/`)
//! - `types.rs` - Core types (ThreatKind, Severity, ThreatVerdict)
//! - `rules.rs` - Pre-filter signatures and constants
//! - `classifier.rs` - Pre-filter + AI merge logic
//!
//! ### Anomaly Detection (`anomaly/`)
//! - `types.rs` - Metric kinds, triggers, Anomaly
//! - `window.rs` - Rolling window with incremental statistics
//! - `mod.rs` - Detector with absolute + statistical triggers
//!
//! ### Incident Synthesis (`incident/`)
//! - `types.rs` - Incident, status machine
//! - `synthesizer.rs` - Pure synthesis policy
//! - `manager.rs` - Registry, transitions, push streams

pub mod record;
pub mod normalize;
pub mod ai;
pub mod quality;
pub mod threat;
pub mod anomaly;
pub mod incident;
pub mod emitter;
pub mod store;
pub mod pipeline;
