//! Failure-rate circuit breaker for batch enrichment
//!
//! A stateless evaluator: given a failure count and a total, decide whether
//! the batch should continue, warn, or abort. Small samples always continue,
//! so one bad address in a three-item batch cannot halt a run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard ceiling on one batch run's wall-clock time
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(240);

/// APN resolution failure thresholds
pub const APN_RESOLUTION: ThresholdSpec = ThresholdSpec {
    label: "APN resolution",
    min_batch: 5,
    warn_at: 0.20,
    abort_at: 0.40,
};

/// Parcel-data fetch failure thresholds, evaluated only among records that
/// resolved an APN
pub const PARCEL_FETCH: ThresholdSpec = ThresholdSpec {
    label: "Parcel data fetch",
    min_batch: 3,
    warn_at: 0.25,
    abort_at: 0.50,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdAction {
    Continue,
    /// Logged, never halts processing
    Warn,
    /// Halts the batch at the next chunk boundary
    Abort,
}

/// Evaluation output; `message` always states the computed rate and the
/// threshold that triggered the action for operator-facing logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub action: ThresholdAction,
    pub rate: f64,
    pub threshold: f64,
    pub message: String,
}

/// One codified failure-rate policy
#[derive(Debug, Clone, Copy)]
pub struct ThresholdSpec {
    pub label: &'static str,
    /// Below this sample size the policy always continues
    pub min_batch: usize,
    pub warn_at: f64,
    pub abort_at: f64,
}

impl ThresholdSpec {
    pub fn evaluate(&self, failed: usize, total: usize) -> ThresholdResult {
        let rate = if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        };

        if total < self.min_batch {
            return ThresholdResult {
                action: ThresholdAction::Continue,
                rate,
                threshold: self.abort_at,
                message: format!(
                    "{}: sample of {} below minimum batch {}, continuing",
                    self.label, total, self.min_batch
                ),
            };
        }

        if rate >= self.abort_at {
            ThresholdResult {
                action: ThresholdAction::Abort,
                rate,
                threshold: self.abort_at,
                message: format!(
                    "{}: failure rate {:.1}% ({}/{}) at or above abort threshold {:.1}%",
                    self.label,
                    rate * 100.0,
                    failed,
                    total,
                    self.abort_at * 100.0
                ),
            }
        } else if rate >= self.warn_at {
            ThresholdResult {
                action: ThresholdAction::Warn,
                rate,
                threshold: self.warn_at,
                message: format!(
                    "{}: failure rate {:.1}% ({}/{}) at or above warn threshold {:.1}%",
                    self.label,
                    rate * 100.0,
                    failed,
                    total,
                    self.warn_at * 100.0
                ),
            }
        } else {
            ThresholdResult {
                action: ThresholdAction::Continue,
                rate,
                threshold: self.warn_at,
                message: format!(
                    "{}: failure rate {:.1}% ({}/{}) below warn threshold {:.1}%",
                    self.label,
                    rate * 100.0,
                    failed,
                    total,
                    self.warn_at * 100.0
                ),
            }
        }
    }
}
