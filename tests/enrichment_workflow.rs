//! End-to-end enrichment workflow tests against mock collaborators
//!
//! Covers the batch pipeline: resolution scenarios, cached-APN bypass,
//! confidence gating, circuit-breaker aborts, preflight failure, progress
//! reporting, and persistence of outcomes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apn_enrich::services::gis_client::{EndpointHealth, ParcelAttributes, ParcelFeature, Point};
use apn_enrich::workflow::persistence::StoreError;
use apn_enrich::{
    EnrichmentBatchSummary, EnrichmentInput, EnrichmentOptions, EnrichmentOrchestrator,
    EnrichmentProgress, EnrichmentResult, ErrorCode, GisError, HealthReport, OutcomeStore,
    ParcelDataSource, ParcelError, ParcelQuery, ParcelRecord, ProgressPhase, ResolutionMethod,
};

/// Opt-in log output for test debugging via RUST_LOG
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ── Mock collaborators ──────────────────────────────────────

/// GIS mock: WHERE responses keyed by a substring of the clause, plus
/// optional geocode/identify hits. Counts every call.
#[derive(Default)]
struct MockGis {
    /// (where-clause substring, features returned on match)
    where_hits: Vec<(String, Vec<ParcelFeature>)>,
    /// Every attribute query fails with a timeout
    where_times_out: bool,
    geocode_point: Option<Point>,
    identify_attrs: Option<ParcelAttributes>,
    unhealthy: bool,
    where_calls: AtomicUsize,
    geocode_calls: AtomicUsize,
    identify_calls: AtomicUsize,
}

impl MockGis {
    fn total_calls(&self) -> usize {
        self.where_calls.load(Ordering::SeqCst)
            + self.geocode_calls.load(Ordering::SeqCst)
            + self.identify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ParcelQuery for MockGis {
    async fn query_by_where(&self, where_clause: &str) -> Result<Vec<ParcelFeature>, GisError> {
        self.where_calls.fetch_add(1, Ordering::SeqCst);
        if self.where_times_out {
            return Err(GisError::Timeout);
        }
        for (needle, features) in &self.where_hits {
            if where_clause.contains(needle.as_str()) {
                return Ok(features.clone());
            }
        }
        Ok(Vec::new())
    }

    async fn geocode(&self, _address: &str) -> Result<Option<Point>, GisError> {
        self.geocode_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.geocode_point)
    }

    async fn identify(&self, _point: Point) -> Result<Option<ParcelAttributes>, GisError> {
        self.identify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.identify_attrs.clone())
    }

    async fn health_check(&self) -> HealthReport {
        if self.unhealthy {
            HealthReport {
                healthy: false,
                endpoints: vec![
                    EndpointHealth {
                        endpoint: "parcel_query".to_string(),
                        healthy: false,
                        error: Some("HTTP 503".to_string()),
                    },
                    EndpointHealth {
                        endpoint: "geocoder".to_string(),
                        healthy: true,
                        error: None,
                    },
                ],
            }
        } else {
            HealthReport {
                healthy: true,
                endpoints: Vec::new(),
            }
        }
    }
}

/// Parcel-data mock with records keyed by APN
#[derive(Default)]
struct MockParcelSource {
    records: HashMap<String, ParcelRecord>,
    calls: AtomicUsize,
}

#[async_trait]
impl ParcelDataSource for MockParcelSource {
    async fn fetch_by_apn(&self, apn: &str) -> Result<ParcelRecord, ParcelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .get(apn)
            .cloned()
            .ok_or_else(|| ParcelError::NotFound(apn.to_string()))
    }
}

/// Store that records everything saved to it
#[derive(Default)]
struct RecordingStore {
    outcomes: Mutex<Vec<EnrichmentResult>>,
    summaries: Mutex<Vec<EnrichmentBatchSummary>>,
}

#[async_trait]
impl OutcomeStore for RecordingStore {
    async fn save_outcome(&self, result: &EnrichmentResult) -> Result<(), StoreError> {
        self.outcomes.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn save_summary(&self, summary: &EnrichmentBatchSummary) -> Result<(), StoreError> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────

fn feature(apn_dash: &str, physical_address: &str) -> ParcelFeature {
    ParcelFeature {
        attributes: ParcelAttributes {
            apn: Some(apn_dash.replace('-', "")),
            apn_dash: Some(apn_dash.to_string()),
            physical_address: Some(physical_address.to_string()),
            ..Default::default()
        },
    }
}

fn record_with(field: &str, value: &str) -> ParcelRecord {
    let mut record = ParcelRecord::new();
    record.insert(
        field.to_string(),
        serde_json::Value::String(value.to_string()),
    );
    record
}

fn fast_options() -> EnrichmentOptions {
    EnrichmentOptions {
        requests_per_second: 0, // no inter-chunk pause in tests
        ..Default::default()
    }
}

fn orchestrator(
    options: EnrichmentOptions,
    gis: Arc<MockGis>,
    parcel: Arc<MockParcelSource>,
    store: Arc<RecordingStore>,
) -> EnrichmentOrchestrator {
    EnrichmentOrchestrator::new(options, gis, parcel, store)
}

// ── Scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn exact_where_match_resolves_and_fetches_parcel_data() {
    init_tracing();
    let gis = Arc::new(MockGis {
        where_hits: vec![(
            "PHYSICAL_STREET_NUM='123'".to_string(),
            vec![feature("123-45-678", "123 MAIN ST")],
        )],
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource {
        records: HashMap::from([("123-45-678".to_string(), record_with("owner", "DOE JOHN"))]),
        ..Default::default()
    });
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis, parcel.clone(), store);

    let outcome = orch
        .enrich_batch(vec![EnrichmentInput::new("123 Main St, Phoenix")], None)
        .await;

    assert_eq!(outcome.results.len(), 1);
    let result = &outcome.results[0];
    assert!(result.success);
    assert_eq!(result.apn.as_deref(), Some("123-45-678"));
    assert_eq!(result.method, ResolutionMethod::ExactWhere);
    assert_eq!(result.confidence, 1.0);
    let data = result.parcel_data.as_ref().expect("parcel data fetched");
    assert_eq!(data.get("owner").unwrap(), "DOE JOHN");
    assert_eq!(parcel.calls.load(Ordering::SeqCst), 1);

    assert_eq!(outcome.summary.resolved, 1);
    assert!(!outcome.summary.aborted);
}

#[tokio::test]
async fn po_box_is_skipped_with_zero_client_invocations() {
    init_tracing();
    let gis = Arc::new(MockGis::default());
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis.clone(), parcel.clone(), store);

    let outcome = orch
        .enrich_batch(vec![EnrichmentInput::new("PO Box 500")], None)
        .await;

    let result = &outcome.results[0];
    assert!(!result.success);
    assert!(result.apn.is_none());
    assert_eq!(result.method, ResolutionMethod::Skipped);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::ApnSkipped);

    assert_eq!(gis.total_calls(), 0);
    assert_eq!(parcel.calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.summary.skipped, 1);
}

#[tokio::test]
async fn pre_supplied_apn_bypasses_resolution_entirely() {
    init_tracing();
    let gis = Arc::new(MockGis::default());
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis.clone(), parcel.clone(), store);

    let outcome = orch
        .enrich_batch(
            vec![EnrichmentInput::with_apn("1 Test Ave", "123-45-678")],
            None,
        )
        .await;

    let result = &outcome.results[0];
    assert!(result.success);
    assert_eq!(result.apn.as_deref(), Some("123-45-678"));
    assert_eq!(result.method, ResolutionMethod::Cached);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.duration_ms, 0);

    assert_eq!(gis.total_calls(), 0);
    assert_eq!(parcel.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn low_confidence_match_is_downgraded_to_ambiguous() {
    // Only the geocode path hits: confidence 0.75, below the 0.8 floor
    init_tracing();
    let gis = Arc::new(MockGis {
        geocode_point: Some(Point { x: -111.9, y: 33.4 }),
        identify_attrs: Some(ParcelAttributes {
            apn_dash: Some("777-88-999".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis, parcel.clone(), store);

    let outcome = orch
        .enrich_batch(vec![EnrichmentInput::new("789 Elm Dr, Chandler, AZ")], None)
        .await;

    let result = &outcome.results[0];
    assert!(!result.success);
    assert!(result.apn.is_none(), "untrustworthy APN must not propagate");
    assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::ApnAmbiguous);
    // No parcel fetch for a cleared APN
    assert_eq!(parcel.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn parcel_fetch_failure_lands_in_apn_only_bucket() {
    init_tracing();
    let gis = Arc::new(MockGis {
        where_hits: vec![(
            "PHYSICAL_STREET_NUM='123'".to_string(),
            vec![feature("123-45-678", "123 MAIN ST")],
        )],
        ..Default::default()
    });
    // Store has no record for the APN: fetch returns NotFound
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis, parcel, store);

    let outcome = orch
        .enrich_batch(vec![EnrichmentInput::new("123 Main St, Phoenix")], None)
        .await;

    let result = &outcome.results[0];
    assert!(result.success, "APN-level success survives fetch failure");
    assert!(result.parcel_data.is_none());
    assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::ParcelNotFound);

    assert_eq!(outcome.summary.resolved, 0);
    assert_eq!(outcome.summary.apn_only_resolved, 1);
}

#[tokio::test]
async fn summary_conserves_counts_for_completed_batches() {
    init_tracing();
    let gis = Arc::new(MockGis {
        where_hits: vec![(
            "PHYSICAL_STREET_NUM='123'".to_string(),
            vec![feature("123-45-678", "123 MAIN ST")],
        )],
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource {
        records: HashMap::from([("123-45-678".to_string(), record_with("owner", "DOE"))]),
        ..Default::default()
    });
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis, parcel, store);

    let outcome = orch
        .enrich_batch(
            vec![
                EnrichmentInput::new("123 Main St, Phoenix"),  // resolved
                EnrichmentInput::new("PO Box 500"),            // skipped
                EnrichmentInput::new("456 Oak Ave, Mesa, AZ"), // apn_failed
                EnrichmentInput::with_apn("1 Test Ave", "999-99-999"), // apn_only (cached)
            ],
            None,
        )
        .await;

    let s = &outcome.summary;
    assert_eq!(s.total, 4);
    assert_eq!(
        s.resolved + s.apn_only_resolved + s.apn_failed + s.skipped + s.retryable + s.permanent,
        s.total
    );
    assert_eq!(s.resolved, 1);
    assert_eq!(s.skipped, 1);
    assert_eq!(s.apn_failed, 1);
    assert_eq!(s.apn_only_resolved, 1);
    assert!(!s.aborted);
}

#[tokio::test]
async fn apn_failure_rate_abort_preserves_partial_results() {
    // Every lookup misses; with chunks of 4, the breaker arms once the
    // sample reaches 5 and trips after the second chunk at 100% failure
    init_tracing();
    let gis = Arc::new(MockGis::default());
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let options = EnrichmentOptions {
        batch_size: 4,
        ..fast_options()
    };
    let orch = orchestrator(options, gis, parcel, store);

    let inputs: Vec<EnrichmentInput> = (0..12)
        .map(|i| EnrichmentInput::new(format!("{} Main St, Phoenix, AZ", 100 + i)))
        .collect();
    let outcome = orch.enrich_batch(inputs, None).await;

    assert!(outcome.summary.aborted);
    let reason = outcome.summary.abort_reason.as_deref().unwrap();
    assert!(reason.contains("APN resolution"), "reason: {reason}");
    assert!(reason.contains("abort threshold"), "reason: {reason}");

    // Two chunks processed, third never started
    assert_eq!(outcome.results.len(), 8);
    assert_eq!(outcome.summary.total, 8);
}

#[tokio::test]
async fn parcel_fetch_failure_rate_abort_halts_at_the_chunk_boundary() {
    init_tracing();
    // Every APN resolves, every fetch misses: the parcel breaker trips on
    // the first chunk while the APN breaker stays quiet
    let gis = Arc::new(MockGis {
        where_hits: vec![(
            "PHYSICAL_STREET_NUM='".to_string(),
            vec![feature("123-45-678", "123 MAIN ST")],
        )],
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let options = EnrichmentOptions {
        batch_size: 4,
        ..fast_options()
    };
    let orch = orchestrator(options, gis, parcel.clone(), store);

    let inputs: Vec<EnrichmentInput> = (0..8)
        .map(|i| EnrichmentInput::new(format!("{} Main St, Phoenix, AZ", 100 + i)))
        .collect();
    let outcome = orch.enrich_batch(inputs, None).await;

    assert!(outcome.summary.aborted);
    let reason = outcome.summary.abort_reason.as_deref().unwrap();
    assert!(reason.contains("Parcel data fetch"), "reason: {reason}");
    assert!(reason.contains("abort threshold"), "reason: {reason}");

    // One chunk processed, second never started
    assert_eq!(outcome.results.len(), 4);
    assert_eq!(parcel.calls.load(Ordering::SeqCst), 4);
    assert_eq!(outcome.summary.apn_only_resolved, 4);
}

#[tokio::test]
async fn cached_inputs_never_trip_the_parcel_fetch_breaker() {
    init_tracing();
    // Cached records carry no parcel data but also never attempt a fetch,
    // so they stay out of the breaker's sample. Counted as failures, the
    // four data-less cached records here would put the rate at 4/5 and
    // abort the batch.
    let gis = Arc::new(MockGis {
        where_hits: vec![(
            "PHYSICAL_STREET_NUM='123'".to_string(),
            vec![feature("123-45-678", "123 MAIN ST")],
        )],
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource {
        records: HashMap::from([("123-45-678".to_string(), record_with("owner", "DOE"))]),
        ..Default::default()
    });
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis, parcel.clone(), store);

    let mut inputs: Vec<EnrichmentInput> = (0..4)
        .map(|i| EnrichmentInput::with_apn(format!("{} Test Ave", i + 1), format!("10{i}-00-000")))
        .collect();
    inputs.push(EnrichmentInput::new("123 Main St, Phoenix"));
    let outcome = orch.enrich_batch(inputs, None).await;

    assert!(!outcome.summary.aborted);
    assert_eq!(outcome.results.len(), 5);
    assert_eq!(outcome.summary.apn_only_resolved, 4);
    assert_eq!(outcome.summary.resolved, 1);
    // Only the freshly resolved record fetched parcel data
    assert_eq!(parcel.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn gis_outage_records_land_in_the_retryable_bucket() {
    init_tracing();
    let gis = Arc::new(MockGis {
        where_times_out: true,
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis, parcel, store);

    let outcome = orch
        .enrich_batch(vec![EnrichmentInput::new("123 Main St, Phoenix, AZ")], None)
        .await;

    let result = &outcome.results[0];
    assert!(!result.success);
    assert_eq!(result.method, ResolutionMethod::NotFound);
    assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::Timeout);

    assert_eq!(outcome.summary.retryable, 1);
    assert_eq!(outcome.summary.apn_failed, 0);
}

#[tokio::test]
async fn failed_preflight_aborts_before_any_per_address_work() {
    init_tracing();
    let gis = Arc::new(MockGis {
        unhealthy: true,
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis.clone(), parcel, store);

    let outcome = orch
        .enrich_batch(
            vec![
                EnrichmentInput::new("123 Main St, Phoenix"),
                EnrichmentInput::new("456 Oak Ave, Mesa, AZ"),
            ],
            None,
        )
        .await;

    assert!(outcome.results.is_empty());
    assert!(outcome.summary.aborted);
    let reason = outcome.summary.abort_reason.as_deref().unwrap();
    assert!(reason.contains("pre-flight"), "reason: {reason}");
    assert!(reason.contains("parcel_query"), "reason: {reason}");
    assert!(reason.contains("HTTP 503"), "reason: {reason}");
    // Health probe only; no lookups
    assert_eq!(gis.total_calls(), 0);
}

#[tokio::test]
async fn disabled_preflight_skips_the_health_probe() {
    init_tracing();
    let gis = Arc::new(MockGis {
        unhealthy: true, // would abort if probed
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let options = EnrichmentOptions {
        preflight: false,
        ..fast_options()
    };
    let orch = orchestrator(options, gis, parcel, store);

    let outcome = orch
        .enrich_batch(vec![EnrichmentInput::new("PO Box 500")], None)
        .await;
    assert!(!outcome.summary.aborted);
    assert_eq!(outcome.results.len(), 1);
}

#[tokio::test]
async fn progress_reports_are_monotonic_and_end_at_complete() {
    init_tracing();
    let gis = Arc::new(MockGis::default());
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let options = EnrichmentOptions {
        batch_size: 2,
        ..fast_options()
    };
    let orch = orchestrator(options, gis, parcel, store);

    let seen: Arc<Mutex<Vec<EnrichmentProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback = move |p: EnrichmentProgress| sink.lock().unwrap().push(p);

    let inputs: Vec<EnrichmentInput> = (0..4)
        .map(|i| EnrichmentInput::new(format!("{} Desert Ln, Gilbert, AZ", 200 + i)))
        .collect();
    orch.enrich_batch(inputs, Some(&callback)).await;

    let reports = seen.lock().unwrap();
    assert!(reports.len() >= 3, "preflight, chunks, complete");
    assert_eq!(reports.first().unwrap().phase, ProgressPhase::Preflight);
    assert_eq!(reports.last().unwrap().phase, ProgressPhase::Complete);
    assert_eq!(reports.last().unwrap().percentage, 100);

    let completed: Vec<usize> = reports.iter().map(|p| p.completed).collect();
    assert!(
        completed.windows(2).all(|w| w[0] <= w[1]),
        "completed counts must never decrease: {completed:?}"
    );
}

#[tokio::test]
async fn outcomes_and_summary_are_persisted() {
    init_tracing();
    let gis = Arc::new(MockGis {
        where_hits: vec![(
            "PHYSICAL_STREET_NUM='123'".to_string(),
            vec![feature("123-45-678", "123 MAIN ST")],
        )],
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource {
        records: HashMap::from([("123-45-678".to_string(), record_with("owner", "DOE"))]),
        ..Default::default()
    });
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis, parcel, store.clone());

    orch.enrich_batch(
        vec![
            EnrichmentInput::new("123 Main St, Phoenix"),
            EnrichmentInput::new("PO Box 500"),
        ],
        None,
    )
    .await;

    // Writes are detached; give the spawned tasks a beat to land
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcomes = store.outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().any(|r| r.apn.as_deref() == Some("123-45-678")));
    assert!(outcomes.iter().any(|r| r.method == ResolutionMethod::Skipped));

    let summaries = store.summaries.lock().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].total, 2);
}

#[tokio::test]
async fn persistence_disabled_writes_nothing() {
    init_tracing();
    let gis = Arc::new(MockGis::default());
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let options = EnrichmentOptions {
        persist_results: false,
        ..fast_options()
    };
    let orch = orchestrator(options, gis, parcel, store.clone());

    orch.enrich_batch(vec![EnrichmentInput::new("PO Box 500")], None)
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.outcomes.lock().unwrap().is_empty());
    assert!(store.summaries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn enrich_single_returns_the_sole_result() {
    init_tracing();
    let gis = Arc::new(MockGis::default());
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis, parcel, store);

    let result = orch.enrich_single("1 Test Ave", Some("123-45-678")).await;
    assert!(result.success);
    assert_eq!(result.method, ResolutionMethod::Cached);
    assert_eq!(result.apn.as_deref(), Some("123-45-678"));
}

#[tokio::test]
async fn enrich_single_surfaces_preflight_abort_as_failure() {
    init_tracing();
    let gis = Arc::new(MockGis {
        unhealthy: true,
        ..Default::default()
    });
    let parcel = Arc::new(MockParcelSource::default());
    let store = Arc::new(RecordingStore::default());
    let orch = orchestrator(fast_options(), gis, parcel, store);

    let result = orch.enrich_single("123 Main St, Phoenix", None).await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_ref().unwrap().code,
        ErrorCode::ServiceUnavailable
    );
}
