//! Boundary catalog client.
//!
//! One HTTP query per (place name, catalog tier) against an ArcGIS feature
//! service publishing administrative boundaries as GeoJSON. Every response is
//! wrapped in a [`CatalogResponse`]; transport failures and non-200 statuses
//! are logged and reported as a variant, never raised.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use aher_core::config::GeocodingConfig;
use aher_core::GeometryFeature;

use crate::error::GeoError;
use crate::geometry::GeoJsonGeometry;

/// One administrative-boundary dataset in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CatalogTier(pub u8);

impl CatalogTier {
    pub const CEREMONIAL_COUNTIES: CatalogTier = CatalogTier(4);
    pub const DISTRICTS: CatalogTier = CatalogTier(5);
    pub const PARISHES: CatalogTier = CatalogTier(6);
    pub const WARDS: CatalogTier = CatalogTier(7);
    pub const COUNTIES: CatalogTier = CatalogTier(9);
    pub const CONSTITUENCIES: CatalogTier = CatalogTier(11);

    /// Broad to narrow, the order tiers are queried and reported in.
    pub const DEFAULT: [CatalogTier; 6] = [
        Self::CEREMONIAL_COUNTIES,
        Self::DISTRICTS,
        Self::PARISHES,
        Self::WARDS,
        Self::COUNTIES,
        Self::CONSTITUENCIES,
    ];

    pub fn id(&self) -> u8 {
        self.0
    }

    pub fn label(&self) -> &'static str {
        match self.0 {
            4 => "ceremonial counties",
            5 => "districts, metropolitan districts, London boroughs and unitary authorities",
            6 => "civil parishes and communities",
            7 => "wards",
            9 => "counties",
            11 => "Westminster constituencies",
            _ => "unknown tier",
        }
    }
}

/// Attributes requested from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CatalogProperties {
    #[serde(rename = "NAME", default)]
    pub name: Option<String>,
    #[serde(rename = "DESCRIPTIO", default)]
    pub description: Option<String>,
}

/// A raw feature from a catalog response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogFeature {
    #[serde(default)]
    pub geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    pub properties: CatalogProperties,
}

impl CatalogFeature {
    /// Reduce to a [`GeometryFeature`]; `Ok(None)` when the feature has no geometry.
    pub fn to_geometry_feature(
        &self,
        tier: CatalogTier,
    ) -> Result<Option<GeometryFeature>, GeoError> {
        let Some(geometry) = &self.geometry else {
            return Ok(None);
        };
        let point = geometry.envelope_centroid()?;
        Ok(Some(GeometryFeature::new(
            self.properties.name.clone().unwrap_or_default(),
            self.properties.description.clone().unwrap_or_default(),
            point,
            tier.id(),
        )))
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<CatalogFeature>,
}

/// Outcome of a single catalog query.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogResponse {
    Features(Vec<CatalogFeature>),
    Empty,
    TransportError(String),
}

impl CatalogResponse {
    fn from_features(features: Vec<CatalogFeature>) -> Self {
        if features.is_empty() {
            CatalogResponse::Empty
        } else {
            CatalogResponse::Features(features)
        }
    }
}

/// A source of boundary features, queried by case-insensitive name substring.
#[async_trait]
pub trait BoundaryCatalog: Send + Sync {
    async fn query(&self, tier: CatalogTier, name: &str) -> CatalogResponse;
}

/// [`BoundaryCatalog`] backed by an ArcGIS REST feature service.
#[derive(Debug, Clone)]
pub struct ArcGisCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl ArcGisCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeoError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &GeocodingConfig) -> Result<Self, GeoError> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn query_url(&self, tier: CatalogTier) -> String {
        format!("{}/{}/query", self.base_url, tier.id())
    }
}

/// `where` clause for a case-insensitive substring match on `NAME`.
///
/// `%` and `_` in the name match literally.
pub fn name_filter(name: &str) -> String {
    let escaped = name
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('\'', "''");
    format!("UPPER(NAME) LIKE UPPER('%{}%') ESCAPE '\\'", escaped)
}

#[async_trait]
impl BoundaryCatalog for ArcGisCatalog {
    async fn query(&self, tier: CatalogTier, name: &str) -> CatalogResponse {
        debug!(tier = tier.id(), name, "Querying boundary catalog");

        let where_clause = name_filter(name);
        let result = self
            .client
            .get(self.query_url(tier))
            .query(&[
                ("where", where_clause.as_str()),
                ("outFields", "NAME,DESCRIPTIO"),
                ("returnGeometry", "true"),
                ("returnIdsOnly", "false"),
                ("f", "geojson"),
            ])
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                warn!(tier = tier.id(), name, error = %e, "Boundary catalog unreachable");
                return CatalogResponse::TransportError(e.to_string());
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(tier = tier.id(), name, %status, "Failed to retrieve boundary data");
            return CatalogResponse::TransportError(format!("HTTP {}", status));
        }

        match response.json::<FeatureCollection>().await {
            Ok(collection) => CatalogResponse::from_features(collection.features),
            Err(e) => {
                warn!(tier = tier.id(), name, error = %e, "Malformed boundary catalog response");
                CatalogResponse::TransportError(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const CAMDEN_RESPONSE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {"type": "Polygon", "coordinates": [[[-0.21,51.51],[-0.10,51.51],[-0.10,51.57],[-0.21,51.57],[-0.21,51.51]]]},
                "properties": {"NAME": "Camden", "DESCRIPTIO": "London Borough"}
            },
            {
                "type": "Feature",
                "geometry": null,
                "properties": {"NAME": "Camden Detached", "DESCRIPTIO": "Ward"}
            }
        ]
    }"#;

    fn catalog(server: &mockito::ServerGuard) -> ArcGisCatalog {
        ArcGisCatalog::new(server.url(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_default_tier_order() {
        let ids: Vec<u8> = CatalogTier::DEFAULT.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![4, 5, 6, 7, 9, 11]);
        assert_eq!(CatalogTier::WARDS.label(), "wards");
    }

    #[test]
    fn test_name_filter_escapes_quotes() {
        assert_eq!(
            name_filter("King's Lynn"),
            r"UPPER(NAME) LIKE UPPER('%King''s Lynn%') ESCAPE '\'"
        );
    }

    #[test]
    fn test_name_filter_escapes_like_wildcards() {
        assert_eq!(
            name_filter("St_Ives 100%"),
            r"UPPER(NAME) LIKE UPPER('%St\_Ives 100\%%') ESCAPE '\'"
        );
        assert_eq!(
            name_filter(r"A\B"),
            r"UPPER(NAME) LIKE UPPER('%A\\B%') ESCAPE '\'"
        );
    }

    #[test]
    fn test_feature_without_geometry_is_skipped() {
        let feature = CatalogFeature {
            geometry: None,
            properties: CatalogProperties::default(),
        };
        assert!(feature
            .to_geometry_feature(CatalogTier::WARDS)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_query_parses_features() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/5/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "where".into(),
                    r"UPPER(NAME) LIKE UPPER('%Camden%') ESCAPE '\'".into(),
                ),
                Matcher::UrlEncoded("outFields".into(), "NAME,DESCRIPTIO".into()),
                Matcher::UrlEncoded("returnGeometry".into(), "true".into()),
                Matcher::UrlEncoded("f".into(), "geojson".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(CAMDEN_RESPONSE)
            .create_async()
            .await;

        let response = catalog(&server)
            .query(CatalogTier::DISTRICTS, "Camden")
            .await;
        mock.assert_async().await;

        let CatalogResponse::Features(features) = response else {
            panic!("expected features, got {:?}", response);
        };
        assert_eq!(features.len(), 2);
        let first = features[0]
            .to_geometry_feature(CatalogTier::DISTRICTS)
            .unwrap()
            .unwrap();
        assert_eq!(first.name, "Camden");
        assert_eq!(first.description, "London Borough");
        assert_eq!(first.source_catalog, 5);
        assert!(first.geometry.starts_with("POINT ("));
    }

    #[tokio::test]
    async fn test_empty_feature_collection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/4/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"type":"FeatureCollection","features":[]}"#)
            .create_async()
            .await;

        let response = catalog(&server)
            .query(CatalogTier::CEREMONIAL_COUNTIES, "Nowhere")
            .await;
        assert_eq!(response, CatalogResponse::Empty);
    }

    #[tokio::test]
    async fn test_non_200_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/7/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let response = catalog(&server).query(CatalogTier::WARDS, "Camden").await;
        assert!(matches!(response, CatalogResponse::TransportError(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_malformed_body_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/9/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let response = catalog(&server).query(CatalogTier::COUNTIES, "Kent").await;
        assert!(matches!(response, CatalogResponse::TransportError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_catalog_is_transport_error() {
        let catalog = ArcGisCatalog::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let response = catalog.query(CatalogTier::WARDS, "Camden").await;
        assert!(matches!(response, CatalogResponse::TransportError(_)));
    }
}
