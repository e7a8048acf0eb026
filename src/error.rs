//! Unified error taxonomy for the enrichment pipeline
//!
//! Every failure surfaced to callers carries an explicit `ErrorCode` whose
//! severity is a pure function of the code. Lower-level clients classify
//! their own failures into codes; the `notes` diagnostic strings on
//! resolution results are never inspected for control flow.

use serde::{Deserialize, Serialize};

/// Machine-readable error codes for enrichment outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// All resolution strategies exhausted without a match
    ApnNotFound,
    /// Pre-filtered input (PO Box, no street number, too short)
    ApnSkipped,
    /// A match was found but its confidence fell below the configured floor
    ApnAmbiguous,
    /// Assessor API has no record for the resolved APN
    ParcelNotFound,
    /// Assessor API returned a body that could not be decoded
    ParcelParseError,
    /// Parcel-data cache layer failure
    ParcelCacheError,
    /// Request exceeded the per-call deadline
    Timeout,
    /// Transport-level failure (DNS, connect, reset)
    NetworkError,
    /// Upstream returned 429
    RateLimit,
    /// Upstream returned a 5xx
    ServiceUnavailable,
    /// Input rejected before any network call
    InvalidInput,
    /// APN failed validation (blank or malformed)
    InvalidApn,
}

/// How an error should be treated by retry/reporting logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Will not succeed on retry
    Permanent,
    /// Transient; a later run may succeed
    Retryable,
    /// Deliberately not attempted
    Skipped,
}

impl ErrorCode {
    /// Severity classification is a pure function of the code
    pub fn severity(self) -> Severity {
        match self {
            ErrorCode::Timeout
            | ErrorCode::NetworkError
            | ErrorCode::RateLimit
            | ErrorCode::ServiceUnavailable
            | ErrorCode::ParcelCacheError => Severity::Retryable,
            ErrorCode::ApnSkipped => Severity::Skipped,
            _ => Severity::Permanent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ApnNotFound => "APN_NOT_FOUND",
            ErrorCode::ApnSkipped => "APN_SKIPPED",
            ErrorCode::ApnAmbiguous => "APN_AMBIGUOUS",
            ErrorCode::ParcelNotFound => "PARCEL_NOT_FOUND",
            ErrorCode::ParcelParseError => "PARCEL_PARSE_ERROR",
            ErrorCode::ParcelCacheError => "PARCEL_CACHE_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidApn => "INVALID_APN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error attached to a failed (or partially failed) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentError {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
}

impl EnrichmentError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EnrichmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
