//! Assessor parcel-data client
//!
//! Secondary lookup that turns a resolved APN into the full parcel/owner/tax
//! attribute set via the assessor's public API (`GET /parcel/{apn}`). The
//! engine treats the record as an opaque attribute map.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ServiceEndpoints, USER_AGENT};
use crate::error::ErrorCode;

/// Per-request deadline for parcel-data calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Full parcel attribute set, keyed by field name with `apn` always present
pub type ParcelRecord = serde_json::Map<String, serde_json::Value>;

/// Parcel-data client errors
#[derive(Debug, Error)]
pub enum ParcelError {
    #[error("no parcel record for APN {0}")]
    NotFound(String),

    #[error("APN is blank or malformed: {0:?}")]
    InvalidApn(String),

    #[error("assessor API rate limited the request")]
    RateLimited,

    #[error("request timed out after {}s", REQUEST_TIMEOUT.as_secs())]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("assessor API returned HTTP {0}")]
    Api(u16),

    #[error("malformed parcel record: {0}")]
    Parse(String),
}

impl ParcelError {
    /// Classification consumed by the enrichment pipeline
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ParcelError::NotFound(_) => ErrorCode::ParcelNotFound,
            ParcelError::InvalidApn(_) => ErrorCode::InvalidApn,
            ParcelError::RateLimited => ErrorCode::RateLimit,
            ParcelError::Timeout => ErrorCode::Timeout,
            ParcelError::Network(_) => ErrorCode::NetworkError,
            ParcelError::Api(status) if *status >= 500 => ErrorCode::ServiceUnavailable,
            ParcelError::Api(_) => ErrorCode::NetworkError,
            ParcelError::Parse(_) => ErrorCode::ParcelParseError,
        }
    }
}

impl From<reqwest::Error> for ParcelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ParcelError::Timeout
        } else {
            ParcelError::Network(err.to_string())
        }
    }
}

/// Source of authoritative parcel data for a resolved APN
#[async_trait]
pub trait ParcelDataSource: Send + Sync {
    async fn fetch_by_apn(&self, apn: &str) -> Result<ParcelRecord, ParcelError>;
}

/// HTTP client for the assessor parcel-data API
pub struct AssessorApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl AssessorApiClient {
    pub fn new(endpoints: &ServiceEndpoints) -> Result<Self, ParcelError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ParcelError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: endpoints.assessor_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ParcelDataSource for AssessorApiClient {
    async fn fetch_by_apn(&self, apn: &str) -> Result<ParcelRecord, ParcelError> {
        let apn = apn.trim();
        if apn.is_empty() {
            return Err(ParcelError::InvalidApn(apn.to_string()));
        }

        let url = format!("{}/parcel/{}", self.base_url, apn);
        tracing::debug!(apn = %apn, "fetching parcel record");

        let response = self.http.get(&url).send().await?;
        let status = response.status();

        match status.as_u16() {
            404 => return Err(ParcelError::NotFound(apn.to_string())),
            429 => return Err(ParcelError::RateLimited),
            s if !status.is_success() => return Err(ParcelError::Api(s)),
            _ => {}
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ParcelError::Parse(e.to_string()))?;

        let mut record = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(ParcelError::Parse(format!(
                    "expected object, got {other}"
                )))
            }
        };
        record.insert("apn".to_string(), serde_json::Value::String(apn.to_string()));

        tracing::debug!(apn = %apn, fields = record.len(), "parcel record fetched");
        Ok(record)
    }
}
