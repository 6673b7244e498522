//! Turns extracted place names into one spatial predicate, or into a
//! user-facing disambiguation when a single name is looked up directly.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use aher_core::config::GeocodingConfig;
use aher_core::{GeometryFeature, Point, SpatialPredicate};

use crate::catalog::{BoundaryCatalog, CatalogResponse, CatalogTier};

/// Outcome of a standalone lookup for one place name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    NoMatch {
        message: String,
    },
    Match {
        result: GeometryFeature,
    },
    Ambiguous {
        results: Vec<GeometryFeature>,
        message: String,
    },
}

impl Resolution {
    fn from_features(name: &str, mut features: Vec<GeometryFeature>) -> Self {
        match features.len() {
            0 => Resolution::NoMatch {
                message: format!(
                    "No locations found matching \"{}\". Please refine your search.",
                    name
                ),
            },
            1 => Resolution::Match {
                result: features.remove(0),
            },
            n => {
                let labels: Vec<String> = features.iter().map(GeometryFeature::label).collect();
                Resolution::Ambiguous {
                    message: format!(
                        "Found {} locations matching \"{}\": {}. Which one did you mean?",
                        n,
                        name,
                        labels.join(", ")
                    ),
                    results: features,
                }
            }
        }
    }
}

/// Split a raw extraction response into candidate place names.
///
/// Whitespace and one layer of surrounding quotes are trimmed, empty entries
/// dropped, and repeated names kept only at their first mention.
pub fn parse_candidates(raw: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let name = part
            .trim()
            .trim_matches(|c: char| c == '\'' || c == '"')
            .trim();
        if name.is_empty() || candidates.iter().any(|c| c == name) {
            continue;
        }
        candidates.push(name.to_string());
    }
    candidates
}

/// Resolves place names against every configured catalog tier.
#[derive(Clone)]
pub struct GeometryResolver {
    catalog: Arc<dyn BoundaryCatalog>,
    tiers: Vec<CatalogTier>,
    threshold_m: f64,
}

impl GeometryResolver {
    pub fn new(catalog: Arc<dyn BoundaryCatalog>, tiers: Vec<CatalogTier>, threshold_m: f64) -> Self {
        Self {
            catalog,
            tiers,
            threshold_m,
        }
    }

    pub fn from_config(catalog: Arc<dyn BoundaryCatalog>, config: &GeocodingConfig) -> Self {
        let tiers = config.tiers.iter().copied().map(CatalogTier).collect();
        Self::new(catalog, tiers, config.distance_threshold_m)
    }

    pub fn tiers(&self) -> &[CatalogTier] {
        &self.tiers
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    /// Every feature matching `name`, in tier order then catalog order.
    ///
    /// Tiers are queried concurrently. Failed tiers contribute nothing, as do
    /// features without geometry or with geometry that cannot be reduced to a
    /// point.
    pub async fn features_for(&self, name: &str) -> Vec<GeometryFeature> {
        let responses = join_all(
            self.tiers
                .iter()
                .map(|tier| async move { (*tier, self.catalog.query(*tier, name).await) }),
        )
        .await;

        let mut features = Vec::new();
        for (tier, response) in responses {
            let raw = match response {
                CatalogResponse::Features(raw) => raw,
                CatalogResponse::Empty => continue,
                CatalogResponse::TransportError(e) => {
                    debug!(tier = tier.id(), name, error = %e, "Tier contributed no results");
                    continue;
                }
            };
            for feature in raw {
                match feature.to_geometry_feature(tier) {
                    Ok(Some(f)) => features.push(f),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(tier = tier.id(), name, error = %e, "Skipping unusable geometry")
                    }
                }
            }
        }
        features
    }

    /// Representative points for every candidate in a raw extraction string.
    pub async fn resolve_points(&self, raw: &str) -> Vec<Point> {
        let mut points = Vec::new();
        for candidate in parse_candidates(raw) {
            let features = self.features_for(&candidate).await;
            debug!(candidate = %candidate, matches = features.len(), "Resolved candidate");
            points.extend(features.into_iter().map(|f| f.point));
        }
        points
    }

    /// Build the proximity predicate for a raw extraction string.
    ///
    /// Returns `None` when no candidate matched anything, in which case
    /// retrieval should run without a spatial filter.
    pub async fn build_predicate(&self, raw: &str) -> Option<SpatialPredicate> {
        let points = self.resolve_points(raw).await;
        let predicate = SpatialPredicate::new(points, self.threshold_m);
        match &predicate {
            Some(p) => info!(points = p.points().len(), "Built spatial predicate"),
            None => info!("No locations resolved; continuing without a spatial filter"),
        }
        predicate
    }

    /// Resolve a single place name for direct use by a caller.
    pub async fn lookup(&self, name: &str) -> Resolution {
        let name = name.trim();
        let features = if name.is_empty() {
            Vec::new()
        } else {
            self.features_for(name).await
        };
        Resolution::from_features(name, features)
    }
}
