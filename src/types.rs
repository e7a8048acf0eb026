//! Result types threaded through the enrichment pipeline
//!
//! `ResolutionResult` is the APN resolver's output, `EnrichmentResult` is the
//! unified per-address record, and `EnrichmentBatchSummary` aggregates one
//! batch run. Summary buckets are mutually exclusive: for a batch that runs
//! to completion they sum to the record count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EnrichmentError, ErrorCode, Severity};
use crate::services::parcel_client::{ParcelError, ParcelRecord};

/// How an APN was (or was not) resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Attribute query matched street number, name, city, and type
    ExactWhere,
    /// Attribute query matched without the street-type predicate
    LooseWhere,
    /// Forward geocode followed by point-in-polygon identify
    GeocodeIdentify,
    /// All strategies exhausted
    NotFound,
    /// APN was supplied by the caller; no lookup performed
    Cached,
    /// Input rejected by the pre-filter; no lookup performed
    Skipped,
}

impl ResolutionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionMethod::ExactWhere => "exact_where",
            ResolutionMethod::LooseWhere => "loose_where",
            ResolutionMethod::GeocodeIdentify => "geocode_identify",
            ResolutionMethod::NotFound => "not_found",
            ResolutionMethod::Cached => "cached",
            ResolutionMethod::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a single APN resolution attempt
///
/// `notes` is a human diagnostic (candidate counts, tie-break rule, elapsed
/// time); control flow reads `error`, never `notes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub apn: Option<String>,
    pub method: ResolutionMethod,
    pub confidence: f64,
    pub notes: String,
    /// Explicit failure classification when no APN was produced
    pub error: Option<ErrorCode>,
}

/// One address submitted for enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentInput {
    pub address: String,
    /// Pre-resolved APN; bypasses resolution entirely when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_apn: Option<String>,
}

impl EnrichmentInput {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            existing_apn: None,
        }
    }

    pub fn with_apn(address: impl Into<String>, apn: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            existing_apn: Some(apn.into()),
        }
    }
}

/// Unified per-address outcome, persisted per record
///
/// `success` tracks APN resolution only: a record can succeed at the APN
/// level while the parcel-data fetch fails (distinct summary buckets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub address: String,
    pub success: bool,
    pub apn: Option<String>,
    pub method: ResolutionMethod,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_data: Option<ParcelRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnrichmentError>,
    pub duration_ms: u64,
}

impl EnrichmentResult {
    /// Record for an input whose APN was supplied by the caller
    pub fn cached(address: impl Into<String>, apn: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            success: true,
            apn: Some(apn.into()),
            method: ResolutionMethod::Cached,
            confidence: 1.0,
            parcel_data: None,
            error: None,
            duration_ms: 0,
        }
    }

    /// Lift a resolver output into the unified record shape
    pub fn from_resolution(address: &str, resolution: ResolutionResult, duration_ms: u64) -> Self {
        let success = resolution.apn.is_some();
        let error = if success {
            None
        } else {
            let code = match resolution.method {
                ResolutionMethod::Skipped => ErrorCode::ApnSkipped,
                _ => resolution.error.unwrap_or(ErrorCode::ApnNotFound),
            };
            Some(EnrichmentError::new(
                code,
                format!(
                    "APN lookup failed via {}: {}",
                    resolution.method, resolution.notes
                ),
            ))
        };

        Self {
            address: address.to_string(),
            success,
            apn: resolution.apn,
            method: resolution.method,
            confidence: resolution.confidence,
            parcel_data: None,
            error,
            duration_ms,
        }
    }

    /// Merge a parcel-data fetch outcome into this record
    ///
    /// A fetch failure leaves `success` untouched: the APN still resolved,
    /// the record just lands in the apn-only summary bucket.
    pub fn apply_parcel_result(&mut self, fetch: Result<ParcelRecord, ParcelError>) {
        match fetch {
            Ok(record) => {
                self.parcel_data = Some(record);
            }
            Err(err) => {
                let code = err.error_code();
                self.error = Some(EnrichmentError::new(code, err.to_string()));
            }
        }
    }
}

/// Aggregate over one batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentBatchSummary {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Records actually processed (not the submitted count when aborted)
    pub total: usize,
    /// APN resolved and parcel data fetched
    pub resolved: usize,
    /// APN resolved but parcel data missing
    pub apn_only_resolved: usize,
    /// No APN found
    pub apn_failed: usize,
    /// Pre-filtered inputs
    pub skipped: usize,
    /// Transient failures worth retrying
    pub retryable: usize,
    /// Failures that will not succeed on retry
    pub permanent: usize,
    pub duration_ms: u64,
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl EnrichmentBatchSummary {
    /// Bucket every produced result into exactly one summary counter
    pub fn compute(
        results: &[EnrichmentResult],
        started_at: DateTime<Utc>,
        duration_ms: u64,
        aborted: bool,
        abort_reason: Option<String>,
    ) -> Self {
        let mut resolved = 0;
        let mut apn_only_resolved = 0;
        let mut apn_failed = 0;
        let mut skipped = 0;
        let mut retryable = 0;
        let mut permanent = 0;

        for r in results {
            if r.success && r.parcel_data.is_some() {
                resolved += 1;
            } else if r.success && r.apn.is_some() {
                apn_only_resolved += 1;
            } else {
                match r.error.as_ref().map(|e| e.severity) {
                    Some(Severity::Skipped) => skipped += 1,
                    Some(Severity::Retryable) => retryable += 1,
                    _ => {
                        if r.method == ResolutionMethod::NotFound {
                            apn_failed += 1;
                        } else {
                            permanent += 1;
                        }
                    }
                }
            }
        }

        Self {
            batch_id: Uuid::new_v4(),
            started_at,
            total: results.len(),
            resolved,
            apn_only_resolved,
            apn_failed,
            skipped,
            retryable,
            permanent,
            duration_ms,
            aborted,
            abort_reason,
        }
    }
}

/// Phase reported alongside batch progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Preflight,
    Apn,
    Complete,
}

/// Progress snapshot emitted after the preflight check, after every chunk,
/// and once at completion. `completed` is monotonically increasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentProgress {
    pub total: usize,
    pub completed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub percentage: u8,
    pub phase: ProgressPhase,
}
