//! Batch enrichment orchestration
//!
//! Drives the APN resolver and the parcel-data fetch across many addresses:
//! preflight health check, chunked concurrent resolution, confidence
//! filtering, failure-rate circuit breakers after every chunk, inter-chunk
//! rate limiting, and fire-and-forget persistence of every outcome.
//!
//! Chunks run strictly sequentially so thresholds can be re-evaluated
//! between them; items within a chunk resolve concurrently and write to
//! disjoint slots of a pre-sized results vector, so output order always
//! matches input order. Callers always get a `{results, summary}` pair;
//! batch-level failure is `summary.aborted`, never an error return.

use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::EnrichmentOptions;
use crate::error::{EnrichmentError, ErrorCode, Severity};
use crate::services::apn_resolver::ApnResolver;
use crate::services::gis_client::{HealthReport, ParcelQuery};
use crate::services::parcel_client::ParcelDataSource;
use crate::services::thresholds::{self, ThresholdAction, BATCH_TIMEOUT};
use crate::types::{
    EnrichmentBatchSummary, EnrichmentInput, EnrichmentProgress, EnrichmentResult, ProgressPhase,
    ResolutionMethod,
};
use crate::workflow::persistence::{self, OutcomeStore};

/// Maximum random jitter added to the inter-chunk pause
const RATE_LIMIT_JITTER_MS: u64 = 150;

/// Progress observer invoked after preflight, after every chunk, and at
/// completion
pub type ProgressFn = dyn Fn(EnrichmentProgress) + Send + Sync;

/// Everything a batch run produces
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Per-address results in input order; aborted runs contain only the
    /// records actually processed
    pub results: Vec<EnrichmentResult>,
    pub summary: EnrichmentBatchSummary,
}

/// Top-level enrichment driver
///
/// Collaborators are constructor-injected so tests run against mocks; there
/// is no process-wide instance.
pub struct EnrichmentOrchestrator {
    options: EnrichmentOptions,
    resolver: ApnResolver,
    gis: Arc<dyn ParcelQuery>,
    parcel: Arc<dyn ParcelDataSource>,
    store: Arc<dyn OutcomeStore>,
}

impl EnrichmentOrchestrator {
    pub fn new(
        options: EnrichmentOptions,
        gis: Arc<dyn ParcelQuery>,
        parcel: Arc<dyn ParcelDataSource>,
        store: Arc<dyn OutcomeStore>,
    ) -> Self {
        Self {
            options,
            resolver: ApnResolver::new(gis.clone()),
            gis,
            parcel,
            store,
        }
    }

    /// Run the preflight probe without processing anything
    pub async fn check_health(&self) -> HealthReport {
        self.gis.health_check().await
    }

    /// Enrich a batch of addresses with APN resolution and parcel data
    pub async fn enrich_batch(
        &self,
        inputs: Vec<EnrichmentInput>,
        on_progress: Option<&ProgressFn>,
    ) -> BatchOutcome {
        let started_at = Utc::now();
        let started = Instant::now();
        let total = inputs.len();

        tracing::info!(total, "starting enrichment batch");

        // ── Preflight ──
        if self.options.preflight {
            emit(
                on_progress,
                EnrichmentProgress {
                    total,
                    completed: 0,
                    successful: 0,
                    failed: 0,
                    skipped: 0,
                    percentage: 0,
                    phase: ProgressPhase::Preflight,
                },
            );

            let health = self.gis.health_check().await;
            if !health.healthy {
                let reason = format!("GIS pre-flight failed: {}", health.failing_endpoints());
                tracing::error!(reason = %reason, "aborting batch before processing");
                return self.finalize(Vec::new(), started_at, started, true, Some(reason), on_progress, total);
            }
        }

        // ── Partition: pre-resolved inputs bypass resolution ──
        let mut slots: Vec<Option<EnrichmentResult>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);
        let mut pending: Vec<(usize, EnrichmentInput)> = Vec::new();

        for (index, input) in inputs.into_iter().enumerate() {
            match &input.existing_apn {
                Some(apn) => {
                    slots[index] = Some(EnrichmentResult::cached(&input.address, apn));
                }
                None => pending.push((index, input)),
            }
        }

        let mut aborted = false;
        let mut abort_reason: Option<String> = None;

        // ── Sequential chunks, concurrent items within each ──
        for chunk in pending.chunks(self.options.batch_size.max(1)) {
            if started.elapsed() > BATCH_TIMEOUT {
                aborted = true;
                abort_reason = Some(format!(
                    "Batch timeout exceeded ({}s)",
                    BATCH_TIMEOUT.as_secs()
                ));
                break;
            }

            let outcomes = join_all(chunk.iter().map(|(index, input)| async move {
                (*index, self.process_item(input).await)
            }))
            .await;

            for (index, outcome) in outcomes {
                if self.options.persist_results {
                    persistence::spawn_save_outcome(self.store.clone(), outcome.clone());
                }
                slots[index] = Some(outcome);
            }

            let produced: Vec<&EnrichmentResult> = slots.iter().flatten().collect();
            self.report_chunk_progress(on_progress, &produced, total);

            if let Some(reason) = self.evaluate_thresholds(&produced) {
                aborted = true;
                abort_reason = Some(reason);
                break;
            }

            self.rate_limit_pause().await;
        }

        let results: Vec<EnrichmentResult> = slots.into_iter().flatten().collect();
        self.finalize(results, started_at, started, aborted, abort_reason, on_progress, total)
    }

    /// Enrich one address; convenience wrapper around `enrich_batch`
    pub async fn enrich_single(
        &self,
        address: &str,
        existing_apn: Option<&str>,
    ) -> EnrichmentResult {
        let input = EnrichmentInput {
            address: address.to_string(),
            existing_apn: existing_apn.map(String::from),
        };
        let mut outcome = self.enrich_batch(vec![input], None).await;

        match outcome.results.pop() {
            Some(result) => result,
            // Preflight abort produces no per-address results
            None => EnrichmentResult {
                address: address.to_string(),
                success: false,
                apn: None,
                method: ResolutionMethod::NotFound,
                confidence: 0.0,
                parcel_data: None,
                error: Some(EnrichmentError::new(
                    ErrorCode::ServiceUnavailable,
                    outcome
                        .summary
                        .abort_reason
                        .unwrap_or_else(|| "batch aborted before processing".to_string()),
                )),
                duration_ms: 0,
            },
        }
    }

    /// Per-address pipeline: resolve, gate on confidence, fetch parcel data
    async fn process_item(&self, input: &EnrichmentInput) -> EnrichmentResult {
        let started = Instant::now();

        let resolution = self.resolver.resolve(&input.address).await;
        let mut result = EnrichmentResult::from_resolution(
            &input.address,
            resolution,
            started.elapsed().as_millis() as u64,
        );

        // A found-but-untrustworthy APN must not propagate downstream
        if result.apn.is_some() && result.confidence < self.options.min_confidence {
            tracing::debug!(
                confidence = result.confidence,
                floor = self.options.min_confidence,
                "rejecting low-confidence match"
            );
            result.apn = None;
            result.success = false;
            result.error = Some(EnrichmentError::new(
                ErrorCode::ApnAmbiguous,
                format!(
                    "confidence {:.2} below threshold {:.2}",
                    result.confidence, self.options.min_confidence
                ),
            ));
        }

        if self.options.fetch_parcel_data {
            if let Some(apn) = result.apn.clone() {
                let fetch = self.parcel.fetch_by_apn(&apn).await;
                result.apply_parcel_result(fetch);
                result.duration_ms = started.elapsed().as_millis() as u64;
            }
        }

        result
    }

    fn report_chunk_progress(
        &self,
        on_progress: Option<&ProgressFn>,
        produced: &[&EnrichmentResult],
        total: usize,
    ) {
        let successful = produced.iter().filter(|r| r.success).count();
        let skipped = produced
            .iter()
            .filter(|r| matches!(r.error.as_ref().map(|e| e.severity), Some(Severity::Skipped)))
            .count();
        let failed = produced.len() - successful - skipped;

        emit(
            on_progress,
            EnrichmentProgress {
                total,
                completed: produced.len(),
                successful,
                failed,
                skipped,
                percentage: percentage(produced.len(), total),
                phase: ProgressPhase::Apn,
            },
        );
    }

    /// Evaluate both circuit breakers over everything produced so far;
    /// returns an abort reason when either trips.
    ///
    /// The parcel-fetch sample contains only records that actually attempted
    /// a fetch: records whose APN was supplied by the caller bypass the
    /// fetch and are excluded, so a batch of mostly pre-resolved inputs
    /// cannot trip the breaker without a single fetch being tried.
    fn evaluate_thresholds(&self, produced: &[&EnrichmentResult]) -> Option<String> {
        let apn_failed = produced.iter().filter(|r| r.apn.is_none()).count();
        let check = thresholds::APN_RESOLUTION.evaluate(apn_failed, produced.len());
        match check.action {
            ThresholdAction::Abort => {
                tracing::error!(message = %check.message, "aborting batch");
                return Some(check.message);
            }
            ThresholdAction::Warn => tracing::warn!(message = %check.message, "threshold warning"),
            ThresholdAction::Continue => {}
        }

        if self.options.fetch_parcel_data {
            // Cached inputs never attempt a fetch, so they are excluded
            let attempted: Vec<_> = produced
                .iter()
                .filter(|r| r.apn.is_some() && r.method != ResolutionMethod::Cached)
                .collect();
            let fetch_failed = attempted.iter().filter(|r| r.parcel_data.is_none()).count();

            if !attempted.is_empty() {
                let check = thresholds::PARCEL_FETCH.evaluate(fetch_failed, attempted.len());
                match check.action {
                    ThresholdAction::Abort => {
                        tracing::error!(message = %check.message, "aborting batch");
                        return Some(check.message);
                    }
                    ThresholdAction::Warn => {
                        tracing::warn!(message = %check.message, "threshold warning")
                    }
                    ThresholdAction::Continue => {}
                }
            }
        }

        None
    }

    /// Pause between chunks: base interval from the request budget plus
    /// jitter, so sequential batches don't hammer the upstream in lockstep
    async fn rate_limit_pause(&self) {
        if self.options.requests_per_second == 0 {
            return;
        }
        let base_ms = 1000 / u64::from(self.options.requests_per_second);
        let jitter_ms = rand::thread_rng().gen_range(0..RATE_LIMIT_JITTER_MS);
        tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        results: Vec<EnrichmentResult>,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
        aborted: bool,
        abort_reason: Option<String>,
        on_progress: Option<&ProgressFn>,
        total: usize,
    ) -> BatchOutcome {
        let summary = EnrichmentBatchSummary::compute(
            &results,
            started_at,
            started.elapsed().as_millis() as u64,
            aborted,
            abort_reason,
        );

        if self.options.persist_results {
            persistence::spawn_save_summary(self.store.clone(), summary.clone());
        }

        let successful = results.iter().filter(|r| r.success).count();
        let skipped = summary.skipped;
        let failed = results.len() - successful - skipped;

        emit(
            on_progress,
            EnrichmentProgress {
                total,
                completed: results.len(),
                successful,
                failed,
                skipped,
                percentage: 100,
                phase: ProgressPhase::Complete,
            },
        );

        tracing::info!(
            batch_id = %summary.batch_id,
            total = summary.total,
            resolved = summary.resolved,
            apn_only = summary.apn_only_resolved,
            aborted = summary.aborted,
            duration_ms = summary.duration_ms,
            "enrichment batch finished"
        );

        BatchOutcome { results, summary }
    }
}

fn emit(on_progress: Option<&ProgressFn>, progress: EnrichmentProgress) {
    if let Some(callback) = on_progress {
        callback(progress);
    }
}

fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        ((completed * 100) / total) as u8
    }
}
