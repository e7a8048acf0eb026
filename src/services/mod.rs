//! Leaf services: parsing, GIS queries, resolution, and safety thresholds

pub mod address_normalizer;
pub mod apn_resolver;
pub mod gis_client;
pub mod parcel_client;
pub mod thresholds;

pub use address_normalizer::{is_skippable, normalize, AddressComponents};
pub use apn_resolver::ApnResolver;
pub use gis_client::{
    ArcGisClient, EndpointHealth, GisError, HealthReport, ParcelAttributes, ParcelFeature,
    ParcelQuery, Point,
};
pub use parcel_client::{AssessorApiClient, ParcelDataSource, ParcelError, ParcelRecord};
pub use thresholds::{ThresholdAction, ThresholdResult, ThresholdSpec};
