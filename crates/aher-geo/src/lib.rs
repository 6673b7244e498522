//! Place-name resolution against administrative boundary catalogs.
//!
//! The [`catalog`] module talks to the boundary feature service, [`geometry`]
//! reduces raw GeoJSON shapes to one planar point each, and [`resolver`]
//! turns extracted place names into a [`aher_core::SpatialPredicate`] or a
//! user-facing disambiguation.

pub mod catalog;
pub mod error;
pub mod geometry;
pub mod resolver;

pub use catalog::{ArcGisCatalog, BoundaryCatalog, CatalogFeature, CatalogResponse, CatalogTier};
pub use error::GeoError;
pub use geometry::GeoJsonGeometry;
pub use resolver::{parse_candidates, GeometryResolver, Resolution};
