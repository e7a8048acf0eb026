//! Engine configuration
//!
//! All options have defaults matching production use against the public
//! Maricopa County endpoints. `ServiceEndpoints` exists so integration tests
//! can point the HTTP clients at local mock servers.

use serde::{Deserialize, Serialize};

/// Identifies this engine to the public GIS services
pub const USER_AGENT: &str = "apn-enrich/0.1.0 (+https://mcassessor.maricopa.gov)";

/// Batch enrichment options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentOptions {
    /// Minimum confidence to accept an APN match (0.0 to 1.0)
    pub min_confidence: f64,
    /// Number of addresses resolved concurrently per chunk
    pub batch_size: usize,
    /// Fetch full parcel data for resolved APNs
    pub fetch_parcel_data: bool,
    /// Persist per-record and batch outcomes to the injected store
    pub persist_results: bool,
    /// Run the GIS health check before any per-address work
    pub preflight: bool,
    /// Self-imposed request budget; drives the inter-chunk pause
    pub requests_per_second: u32,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.8,
            batch_size: 10,
            fetch_parcel_data: true,
            persist_results: true,
            preflight: true,
            requests_per_second: 5,
        }
    }
}

/// Upstream service URLs, defaulting to the public Maricopa County endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    /// ArcGIS parcel attribute-query endpoint
    pub parcel_query_url: String,
    /// ArcGIS forward geocoder endpoint
    pub geocoder_url: String,
    /// ArcGIS point-in-polygon identify endpoint
    pub identify_url: String,
    /// Assessor parcel-data API base URL
    pub assessor_base_url: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            parcel_query_url:
                "https://gis.mcassessor.maricopa.gov/arcgis/rest/services/Parcels/MapServer/0/query"
                    .to_string(),
            geocoder_url:
                "https://gis.mcassessor.maricopa.gov/arcgis/rest/services/AssessorCompositeLocator/GeocodeServer/findAddressCandidates"
                    .to_string(),
            identify_url:
                "https://gis.mcassessor.maricopa.gov/arcgis/rest/services/Parcels/MapServer/identify"
                    .to_string(),
            assessor_base_url: "https://mcassessor.maricopa.gov".to_string(),
        }
    }
}
