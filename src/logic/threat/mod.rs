//! Threat Classification
//!
//! - `types.rs` - ThreatKind, Severity, Scope, ThreatVerdict
//! - `rules.rs` - Pre-filter signatures and constants
//! - `classifier.rs` - Pre-filter + AI merge with severity tie-breaks

pub mod classifier;
pub mod rules;
pub mod types;

pub use classifier::{ThreatClassifier, ThreatOutcome};
pub use types::{Scope, Severity, ThreatKind, ThreatVerdict};
