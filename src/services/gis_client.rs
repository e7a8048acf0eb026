//! ArcGIS parcel-layer query client
//!
//! Thin wrapper over the three read-only operations the resolver needs:
//! attribute query by WHERE clause, forward geocode, and point-in-polygon
//! identify, plus a per-endpoint health probe used by batch preflight.
//!
//! Failure semantics: transport failures and HTTP errors raise `GisError`;
//! a well-formed empty result (no features, no candidates) is a valid
//! "nothing found" value the caller branches on, never an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::{ServiceEndpoints, USER_AGENT};
use crate::error::ErrorCode;

/// Per-request deadline for all GIS calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Identify search box half-width in degrees
const IDENTIFY_BUFFER: f64 = 0.0001;

/// GIS client errors
#[derive(Debug, Error)]
pub enum GisError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {}s", REQUEST_TIMEOUT.as_secs())]
    Timeout,

    #[error("HTTP {0} from GIS service")]
    Http(u16),

    /// The service accepted the request but rejected the query itself
    /// (typically WHERE-clause syntax); surfaced, never swallowed
    #[error("query rejected by GIS service: {0}")]
    Query(String),

    #[error("malformed GIS response: {0}")]
    Parse(String),
}

impl GisError {
    /// Classification consumed by the enrichment pipeline
    pub fn error_code(&self) -> ErrorCode {
        match self {
            GisError::Timeout => ErrorCode::Timeout,
            GisError::Network(_) => ErrorCode::NetworkError,
            GisError::Http(429) => ErrorCode::RateLimit,
            GisError::Http(status) if *status >= 500 => ErrorCode::ServiceUnavailable,
            GisError::Http(_) => ErrorCode::NetworkError,
            GisError::Query(_) => ErrorCode::InvalidInput,
            GisError::Parse(_) => ErrorCode::NetworkError,
        }
    }
}

impl From<reqwest::Error> for GisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GisError::Timeout
        } else {
            GisError::Network(err.to_string())
        }
    }
}

/// Attribute set returned for a parcel feature
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParcelAttributes {
    #[serde(rename = "APN", default)]
    pub apn: Option<String>,
    #[serde(rename = "APN_DASH", default)]
    pub apn_dash: Option<String>,
    #[serde(rename = "PHYSICAL_ADDRESS", default)]
    pub physical_address: Option<String>,
    #[serde(rename = "PHYSICAL_STREET_NUM", default)]
    pub physical_street_num: Option<String>,
    #[serde(rename = "PHYSICAL_STREET_NAME", default)]
    pub physical_street_name: Option<String>,
    #[serde(rename = "PHYSICAL_STREET_TYPE", default)]
    pub physical_street_type: Option<String>,
    #[serde(rename = "PHYSICAL_CITY", default)]
    pub physical_city: Option<String>,
}

impl ParcelAttributes {
    /// Dash-formatted APN preferred over the raw digit field for consistent
    /// downstream formatting
    pub fn best_apn(&self) -> Option<String> {
        self.apn_dash.clone().or_else(|| self.apn.clone())
    }
}

/// One feature from an attribute query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelFeature {
    pub attributes: ParcelAttributes,
}

/// Geographic coordinate (spatial reference 4326)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Health of a single upstream endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate preflight probe result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub endpoints: Vec<EndpointHealth>,
}

impl HealthReport {
    /// Operator-facing list of unhealthy endpoints for abort reasons
    pub fn failing_endpoints(&self) -> String {
        self.endpoints
            .iter()
            .filter(|e| !e.healthy)
            .map(|e| {
                format!(
                    "{}: {}",
                    e.endpoint,
                    e.error.as_deref().unwrap_or("unreachable")
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Read-only geospatial query operations
#[async_trait]
pub trait ParcelQuery: Send + Sync {
    /// Attribute query over the parcel layer
    async fn query_by_where(&self, where_clause: &str) -> Result<Vec<ParcelFeature>, GisError>;

    /// Forward geocode; returns the best candidate's coordinates, or `None`
    /// when the geocoder has no usable candidate
    async fn geocode(&self, address: &str) -> Result<Option<Point>, GisError>;

    /// Point-in-polygon lookup; returns the containing parcel's attributes
    async fn identify(&self, point: Point) -> Result<Option<ParcelAttributes>, GisError>;

    /// Probe every endpoint this client depends on
    async fn health_check(&self) -> HealthReport;
}

// ── Wire shapes ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    features: Vec<ParcelFeature>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    candidates: Vec<GeocodeCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeocodeCandidate {
    #[serde(default)]
    score: f64,
    location: Option<Point>,
}

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    #[serde(default)]
    results: Vec<IdentifyResult>,
}

#[derive(Debug, Deserialize)]
struct IdentifyResult {
    attributes: ParcelAttributes,
}

/// Client for the public Maricopa County ArcGIS REST services
pub struct ArcGisClient {
    http: reqwest::Client,
    endpoints: ServiceEndpoints,
}

impl ArcGisClient {
    pub fn new(endpoints: ServiceEndpoints) -> Result<Self, GisError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GisError::Network(e.to_string()))?;
        Ok(Self { http, endpoints })
    }

    pub fn with_default_endpoints() -> Result<Self, GisError> {
        Self::new(ServiceEndpoints::default())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, GisError> {
        let response = self.http.get(url).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GisError::Http(status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GisError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ParcelQuery for ArcGisClient {
    async fn query_by_where(&self, where_clause: &str) -> Result<Vec<ParcelFeature>, GisError> {
        tracing::debug!(where_clause = %where_clause, "querying parcel layer");

        let body: QueryResponse = self
            .get_json(
                &self.endpoints.parcel_query_url,
                &[
                    ("f", "json"),
                    ("where", where_clause),
                    (
                        "outFields",
                        "APN,APN_DASH,PHYSICAL_ADDRESS,PHYSICAL_STREET_NUM,\
                         PHYSICAL_STREET_NAME,PHYSICAL_STREET_TYPE,PHYSICAL_CITY",
                    ),
                    ("returnGeometry", "false"),
                ],
            )
            .await?;

        // ArcGIS reports query-level failures in-band with HTTP 200
        if let Some(error) = body.error {
            return Err(GisError::Query(error.to_string()));
        }

        tracing::debug!(features = body.features.len(), "parcel query returned");
        Ok(body.features)
    }

    async fn geocode(&self, address: &str) -> Result<Option<Point>, GisError> {
        tracing::debug!("geocoding address");

        let body: GeocodeResponse = self
            .get_json(
                &self.endpoints.geocoder_url,
                &[
                    ("f", "json"),
                    ("SingleLine", address),
                    ("outFields", "Match_addr,Addr_type,Score"),
                    ("maxLocations", "5"),
                ],
            )
            .await?;

        tracing::debug!(candidates = body.candidates.len(), "geocode returned");
        Ok(pick_best_candidate(&body.candidates))
    }

    async fn identify(&self, point: Point) -> Result<Option<ParcelAttributes>, GisError> {
        let geometry = format!("{},{}", point.x, point.y);
        let extent = format!(
            "{},{},{},{}",
            point.x - IDENTIFY_BUFFER,
            point.y - IDENTIFY_BUFFER,
            point.x + IDENTIFY_BUFFER,
            point.y + IDENTIFY_BUFFER
        );

        let body: IdentifyResponse = self
            .get_json(
                &self.endpoints.identify_url,
                &[
                    ("f", "json"),
                    ("geometry", geometry.as_str()),
                    ("geometryType", "esriGeometryPoint"),
                    ("tolerance", "1"),
                    ("mapExtent", extent.as_str()),
                    ("imageDisplay", "400,400,96"),
                    ("sr", "4326"),
                    ("layers", "all:0"),
                    ("returnGeometry", "false"),
                ],
            )
            .await?;

        Ok(body.results.into_iter().next().map(|r| r.attributes))
    }

    async fn health_check(&self) -> HealthReport {
        let probes = [
            ("parcel_query", self.endpoints.parcel_query_url.as_str()),
            ("geocoder", self.endpoints.geocoder_url.as_str()),
            ("identify", self.endpoints.identify_url.as_str()),
        ];

        let mut endpoints = Vec::with_capacity(probes.len());
        for (name, url) in probes {
            let result = self.http.get(url).query(&[("f", "json")]).send().await;
            let (healthy, error) = match result {
                Ok(response) if response.status().is_success() => (true, None),
                Ok(response) => (false, Some(format!("HTTP {}", response.status().as_u16()))),
                Err(e) => (false, Some(e.to_string())),
            };
            if !healthy {
                tracing::warn!(endpoint = name, error = ?error, "GIS endpoint unhealthy");
            }
            endpoints.push(EndpointHealth {
                endpoint: name.to_string(),
                healthy,
                error,
            });
        }

        HealthReport {
            healthy: endpoints.iter().all(|e| e.healthy),
            endpoints,
        }
    }
}

/// Highest-scoring candidate wins; ties go to the first seen. Candidates
/// without coordinates are unusable.
fn pick_best_candidate(candidates: &[GeocodeCandidate]) -> Option<Point> {
    let mut best: Option<&GeocodeCandidate> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.score <= current.score => {}
            _ => best = Some(candidate),
        }
    }
    best.and_then(|c| c.location)
}
