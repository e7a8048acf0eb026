//! APN resolution and parcel enrichment engine
//!
//! Resolves Assessor Parcel Numbers from free-text street addresses using
//! the public Maricopa County GIS services, fetches authoritative parcel
//! data for resolved APNs, and drives both across batches of addresses with
//! explicit safety limits: confidence filtering, failure-rate circuit
//! breakers, a hard batch timeout, and self-imposed rate limiting.
//!
//! The top-level entry point is [`EnrichmentOrchestrator`]; collaborators
//! (GIS queries, parcel data, persistence) are injected as trait objects so
//! callers and tests control the wiring.

pub mod config;
pub mod error;
pub mod services;
pub mod types;
pub mod workflow;

pub use config::{EnrichmentOptions, ServiceEndpoints};
pub use error::{EnrichmentError, ErrorCode, Severity};
pub use services::{
    ApnResolver, ArcGisClient, AssessorApiClient, GisError, HealthReport, ParcelDataSource,
    ParcelError, ParcelQuery, ParcelRecord,
};
pub use types::{
    EnrichmentBatchSummary, EnrichmentInput, EnrichmentProgress, EnrichmentResult, ProgressPhase,
    ResolutionMethod, ResolutionResult,
};
pub use workflow::{
    BatchOutcome, EnrichmentOrchestrator, NullOutcomeStore, OutcomeStore, StoreError,
};
