//! Outcome persistence seam
//!
//! The engine never blocks on, and never fails because of, the record store:
//! writes are spawned as detached tasks that log their own failures. Callers
//! implement `OutcomeStore` against whatever backend they use; results with
//! no APN are still forwarded (the store decides whether to key them).

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{EnrichmentBatchSummary, EnrichmentResult};

/// Store-layer failure; observable in logs, never in batch results
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// External record store for per-record outcomes and batch summaries
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Persist one per-address outcome, keyed by APN when present
    async fn save_outcome(&self, result: &EnrichmentResult) -> Result<(), StoreError>;

    /// Persist one batch-level summary
    async fn save_summary(&self, summary: &EnrichmentBatchSummary) -> Result<(), StoreError>;
}

/// No-op store for callers that disable persistence
pub struct NullOutcomeStore;

#[async_trait]
impl OutcomeStore for NullOutcomeStore {
    async fn save_outcome(&self, _result: &EnrichmentResult) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_summary(&self, _summary: &EnrichmentBatchSummary) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Fire-and-forget per-record write
pub fn spawn_save_outcome(store: Arc<dyn OutcomeStore>, result: EnrichmentResult) {
    tokio::spawn(async move {
        if let Err(err) = store.save_outcome(&result).await {
            tracing::warn!(
                address = %result.address,
                apn = result.apn.as_deref().unwrap_or(""),
                error = %err,
                "failed to persist enrichment outcome"
            );
        }
    });
}

/// Fire-and-forget batch-summary write
pub fn spawn_save_summary(store: Arc<dyn OutcomeStore>, summary: EnrichmentBatchSummary) {
    tokio::spawn(async move {
        if let Err(err) = store.save_summary(&summary).await {
            tracing::warn!(
                batch_id = %summary.batch_id,
                error = %err,
                "failed to persist batch summary"
            );
        }
    });
}
