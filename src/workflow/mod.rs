//! Batch enrichment workflow: orchestration and persistence seams

pub mod orchestrator;
pub mod persistence;

pub use orchestrator::{BatchOutcome, EnrichmentOrchestrator, ProgressFn};
pub use persistence::{NullOutcomeStore, OutcomeStore, StoreError};
