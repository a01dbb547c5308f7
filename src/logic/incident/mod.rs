//! Incident Synthesis & Lifecycle
//!
//! - `types.rs` - Incident, status machine
//! - `synthesizer.rs` - Pure synthesis policy
//! - `manager.rs` - Registry, transitions, push streams

pub mod manager;
pub mod synthesizer;
pub mod types;

pub use manager::{IncidentCreated, IncidentManager, StatusChanged};
pub use synthesizer::synthesize;
pub use types::{IllegalTransition, Incident, IncidentStatus};
