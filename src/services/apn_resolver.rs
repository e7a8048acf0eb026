//! Multi-strategy APN resolver
//!
//! Tries three lookup strategies against the GIS service in a fixed fallback
//! order, stopping at the first one that yields an APN:
//!
//! 1. exact WHERE (number + name + city + street type) — confidence 1.0
//! 2. loose WHERE (drops the street-type predicate)    — confidence 0.85
//! 3. geocode the raw string + identify the parcel      — confidence 0.75
//!
//! Obviously invalid inputs (PO Boxes, no street number, too short) are
//! rejected before any network call.

use std::sync::Arc;
use std::time::Instant;

use crate::services::address_normalizer::{self, AddressComponents};
use crate::services::gis_client::{GisError, ParcelFeature, ParcelQuery};
use crate::types::{ResolutionMethod, ResolutionResult};

/// Resolution strategies in strict fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    ExactWhere,
    LooseWhere,
    GeocodeIdentify,
}

/// Order is the fallback policy: a later strategy only runs when every
/// earlier one produced no APN.
const STRATEGY_ORDER: [Strategy; 3] = [
    Strategy::ExactWhere,
    Strategy::LooseWhere,
    Strategy::GeocodeIdentify,
];

impl Strategy {
    fn method(self) -> ResolutionMethod {
        match self {
            Strategy::ExactWhere => ResolutionMethod::ExactWhere,
            Strategy::LooseWhere => ResolutionMethod::LooseWhere,
            Strategy::GeocodeIdentify => ResolutionMethod::GeocodeIdentify,
        }
    }

    fn confidence(self) -> f64 {
        match self {
            Strategy::ExactWhere => 1.0,
            Strategy::LooseWhere => 0.85,
            Strategy::GeocodeIdentify => 0.75,
        }
    }
}

/// Resolves a free-text address to an Assessor Parcel Number
pub struct ApnResolver {
    client: Arc<dyn ParcelQuery>,
}

impl ApnResolver {
    pub fn new(client: Arc<dyn ParcelQuery>) -> Self {
        Self { client }
    }

    /// Resolve an address, trying each strategy in order
    ///
    /// Never returns an error: client failures are captured into a failed
    /// result carrying an explicit error code. Elapsed wall-clock time is
    /// appended to `notes` on every path for latency monitoring.
    pub async fn resolve(&self, address: &str) -> ResolutionResult {
        let started = Instant::now();

        if address_normalizer::is_skippable(address) {
            tracing::debug!("address pre-filtered, no lookup attempted");
            return ResolutionResult {
                apn: None,
                method: ResolutionMethod::Skipped,
                confidence: 0.0,
                notes: with_elapsed(
                    "PRE_FILTERED (PO Box, no street number, or too short)",
                    started,
                ),
                error: None,
            };
        }

        let components = address_normalizer::normalize(address);
        tracing::debug!(
            city = components.city.as_deref().unwrap_or("unknown"),
            parsed = components.street_number.is_some(),
            "address normalized"
        );

        for strategy in STRATEGY_ORDER {
            match self.try_strategy(strategy, address, &components).await {
                Ok(Some(hit)) => {
                    tracing::info!(
                        apn = hit.apn.as_deref().unwrap_or(""),
                        method = %hit.method,
                        confidence = hit.confidence,
                        "APN resolved"
                    );
                    return ResolutionResult {
                        notes: with_elapsed(&hit.notes, started),
                        ..hit
                    };
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(method = %strategy.method(), error = %err, "strategy failed");
                    return ResolutionResult {
                        apn: None,
                        method: ResolutionMethod::NotFound,
                        confidence: 0.0,
                        notes: with_elapsed(
                            &format!("{} error: {err}", strategy.method()),
                            started,
                        ),
                        error: Some(err.error_code()),
                    };
                }
            }
        }

        ResolutionResult {
            apn: None,
            method: ResolutionMethod::NotFound,
            confidence: 0.0,
            notes: with_elapsed("All methods failed", started),
            error: None,
        }
    }

    async fn try_strategy(
        &self,
        strategy: Strategy,
        address: &str,
        components: &AddressComponents,
    ) -> Result<Option<ResolutionResult>, GisError> {
        match strategy {
            Strategy::ExactWhere => self.try_where(strategy, components, false).await,
            Strategy::LooseWhere => self.try_where(strategy, components, true).await,
            Strategy::GeocodeIdentify => self.try_geocode_identify(address).await,
        }
    }

    async fn try_where(
        &self,
        strategy: Strategy,
        components: &AddressComponents,
        loose: bool,
    ) -> Result<Option<ResolutionResult>, GisError> {
        let Some(where_clause) = build_where_clause(components, loose) else {
            // Incomplete components: this strategy cannot run
            return Ok(None);
        };

        let features = self.client.query_by_where(&where_clause).await?;
        if features.is_empty() {
            return Ok(None);
        }

        let (apn, picked) = choose_feature(&features, &components.raw);
        let Some(apn) = apn else {
            return Ok(None);
        };

        // Ambiguous matches are a primary source of downstream false
        // positives; record how the winner was picked.
        let notes = if features.len() > 1 {
            format!("MULTI_APN_CANDIDATES={} pick={picked}", features.len())
        } else {
            picked.to_string()
        };

        Ok(Some(ResolutionResult {
            apn: Some(apn),
            method: strategy.method(),
            confidence: strategy.confidence(),
            notes,
            error: None,
        }))
    }

    async fn try_geocode_identify(
        &self,
        address: &str,
    ) -> Result<Option<ResolutionResult>, GisError> {
        // The raw, unparsed string: the geocoder handles its own parsing
        let Some(point) = self.client.geocode(address).await? else {
            return Ok(None);
        };

        let Some(attributes) = self.client.identify(point).await? else {
            return Ok(None);
        };

        let Some(apn) = attributes.best_apn() else {
            return Ok(None);
        };

        Ok(Some(ResolutionResult {
            apn: Some(apn),
            method: ResolutionMethod::GeocodeIdentify,
            confidence: Strategy::GeocodeIdentify.confidence(),
            notes: format!("Geocoded to {:.6}, {:.6}", point.x, point.y),
            error: None,
        }))
    }
}

fn with_elapsed(notes: &str, started: Instant) -> String {
    format!("{notes} | {}ms", started.elapsed().as_millis())
}

/// Build the parcel-layer WHERE clause; `None` when required components are
/// missing. Single quotes in values are escaped by doubling.
fn build_where_clause(components: &AddressComponents, loose: bool) -> Option<String> {
    if !components.is_complete() {
        return None;
    }
    let number = components.street_number.as_deref()?;
    let full_name = components.full_street_name()?;
    let city = components.city.as_deref()?;

    let mut clause = format!(
        "PHYSICAL_STREET_NUM='{}' AND PHYSICAL_STREET_NAME='{}' AND PHYSICAL_CITY='{}'",
        escape(number),
        escape(&full_name),
        escape(city)
    );

    if !loose {
        if let Some(stype) = components.street_type.as_deref() {
            clause.push_str(&format!(" AND PHYSICAL_STREET_TYPE='{}'", escape(stype)));
        }
    }

    Some(clause)
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Pick one feature from a multi-feature query result: prefer the feature
/// whose stored address matches the query address exactly after identical
/// normalization, otherwise fall back to the first feature returned.
fn choose_feature(features: &[ParcelFeature], raw_address: &str) -> (Option<String>, &'static str) {
    let target = fold_whitespace(raw_address);

    for feature in features {
        let stored = feature
            .attributes
            .physical_address
            .as_deref()
            .unwrap_or_default();
        if fold_whitespace(stored) == target {
            if let Some(apn) = feature.attributes.best_apn() {
                return (Some(apn), "EXACT_ADDRESS");
            }
        }
    }

    match features.first().and_then(|f| f.attributes.best_apn()) {
        Some(apn) => (Some(apn), "FIRST_FEATURE"),
        None => (None, "NO_FEATURES"),
    }
}

/// Collapse whitespace, uppercase, trim: both sides of the disambiguation
/// comparison go through this.
fn fold_whitespace(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
