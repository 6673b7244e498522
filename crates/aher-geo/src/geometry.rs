//! GeoJSON geometries and their reduction to a single planar point.
//!
//! Catalog features arrive in WGS84 longitude/latitude. Each one is
//! reprojected to spherical Web Mercator (EPSG:3857) and represented by the
//! centre of its bounding box. For irregular shapes that is not the true
//! centroid; one representative point per feature is all the predicate needs.

use std::f64::consts::PI;

use serde::Deserialize;

use aher_core::Point;

use crate::error::GeoError;

/// Earth radius used by Web Mercator, in meters.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Web Mercator is undefined at the poles; latitudes are clamped to this.
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// A GeoJSON position: `[lon, lat]` with optional extra ordinates.
pub type Position = Vec<f64>;

/// The GeoJSON geometry types a boundary catalog can return.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<GeoJsonGeometry> },
    #[serde(other)]
    Unsupported,
}

impl GeoJsonGeometry {
    /// All positions of the geometry, flattened.
    pub fn positions(&self) -> Result<Vec<&Position>, GeoError> {
        let positions = match self {
            GeoJsonGeometry::Point { coordinates } => vec![coordinates],
            GeoJsonGeometry::MultiPoint { coordinates }
            | GeoJsonGeometry::LineString { coordinates } => coordinates.iter().collect(),
            GeoJsonGeometry::MultiLineString { coordinates }
            | GeoJsonGeometry::Polygon { coordinates } => coordinates.iter().flatten().collect(),
            GeoJsonGeometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().collect()
            }
            GeoJsonGeometry::GeometryCollection { geometries } => {
                let mut positions = Vec::new();
                for geometry in geometries {
                    positions.extend(geometry.positions()?);
                }
                positions
            }
            GeoJsonGeometry::Unsupported => return Err(GeoError::UnsupportedGeometry),
        };
        Ok(positions)
    }

    /// Reproject to Web Mercator and return the centre of the bounding box.
    pub fn envelope_centroid(&self) -> Result<Point, GeoError> {
        let positions = self.positions()?;
        if positions.is_empty() {
            return Err(GeoError::EmptyGeometry);
        }

        let mut min = Point::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for position in positions {
            let projected = project(position)?;
            min.x = min.x.min(projected.x);
            min.y = min.y.min(projected.y);
            max.x = max.x.max(projected.x);
            max.y = max.y.max(projected.y);
        }

        Ok(Point::new((min.x + max.x) / 2.0, (min.y + max.y) / 2.0))
    }
}

/// Project one WGS84 position to Web Mercator meters.
pub fn project(position: &Position) -> Result<Point, GeoError> {
    let (lon, lat) = match position.as_slice() {
        [lon, lat, ..] => (*lon, *lat),
        _ => {
            return Err(GeoError::InvalidGeometry(format!(
                "position needs two ordinates, got {}",
                position.len()
            )))
        }
    };
    if !lon.is_finite() || !lat.is_finite() {
        return Err(GeoError::InvalidGeometry(format!(
            "non-finite coordinate ({}, {})",
            lon, lat
        )));
    }

    let lat = lat.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    let x = lon.to_radians() * EARTH_RADIUS_M;
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS_M;
    Ok(Point::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GeoJsonGeometry {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_project_origin() {
        let p = project(&vec![0.0, 0.0]).unwrap();
        assert!(p.x.abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
    }

    #[test]
    fn test_project_antimeridian() {
        let p = project(&vec![180.0, 0.0]).unwrap();
        assert!((p.x - 20_037_508.342_789_244).abs() < 1e-6);
    }

    #[test]
    fn test_project_london() {
        // Trafalgar Square, roughly.
        let p = project(&vec![-0.1281, 51.508]).unwrap();
        assert!((p.x - -14_260.03).abs() < 0.1, "x = {}", p.x);
        assert!((p.y - 6_711_649.79).abs() < 0.1, "y = {}", p.y);
    }

    #[test]
    fn test_project_clamps_poles() {
        let p = project(&vec![0.0, 90.0]).unwrap();
        assert!(p.y.is_finite());
    }

    #[test]
    fn test_project_rejects_short_position() {
        assert!(matches!(
            project(&vec![1.0]),
            Err(GeoError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_project_rejects_nan() {
        assert!(project(&vec![f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_point_centroid_is_projection() {
        let geom = parse(r#"{"type":"Point","coordinates":[-0.1281,51.508]}"#);
        let c = geom.envelope_centroid().unwrap();
        let p = project(&vec![-0.1281, 51.508]).unwrap();
        assert_eq!(c, p);
    }

    #[test]
    fn test_polygon_envelope_centroid() {
        let geom = parse(
            r#"{"type":"Polygon","coordinates":[[[-1.0,-1.0],[1.0,-1.0],[1.0,1.0],[-1.0,1.0],[-1.0,-1.0]]]}"#,
        );
        let c = geom.envelope_centroid().unwrap();
        assert!(c.x.abs() < 1e-6);
        assert!(c.y.abs() < 1e-6);
    }

    #[test]
    fn test_irregular_shape_uses_bbox_not_vertex_mean() {
        // Three vertices bunched at the west edge plus one far east: the
        // vertex mean sits west of the bbox centre.
        let geom = parse(
            r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[0.0,0.1],[0.1,0.0],[2.0,0.0],[0.0,0.0]]]}"#,
        );
        let c = geom.envelope_centroid().unwrap();
        let east = project(&vec![2.0, 0.0]).unwrap();
        assert!((c.x - east.x / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_multipolygon_spans_all_parts() {
        let geom = parse(
            r#"{"type":"MultiPolygon","coordinates":[
                [[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,0.0]]],
                [[[3.0,0.0],[4.0,0.0],[4.0,1.0],[3.0,0.0]]]
            ]}"#,
        );
        let c = geom.envelope_centroid().unwrap();
        let mid = project(&vec![2.0, 0.0]).unwrap();
        assert!((c.x - mid.x).abs() < 1e-6);
    }

    #[test]
    fn test_three_dimensional_positions_accepted() {
        let geom = parse(r#"{"type":"Point","coordinates":[1.0,2.0,35.0]}"#);
        assert!(geom.envelope_centroid().is_ok());
    }

    #[test]
    fn test_empty_polygon_is_error() {
        let geom = parse(r#"{"type":"Polygon","coordinates":[]}"#);
        assert!(matches!(
            geom.envelope_centroid(),
            Err(GeoError::EmptyGeometry)
        ));
    }

    #[test]
    fn test_geometry_collection_spans_every_member() {
        let geom = parse(
            r#"{"type":"GeometryCollection","geometries":[
                {"type":"Point","coordinates":[0.0,0.0]},
                {"type":"Polygon","coordinates":[[[3.0,1.0],[4.0,1.0],[4.0,2.0],[3.0,1.0]]]}
            ]}"#,
        );
        let c = geom.envelope_centroid().unwrap();
        let mid = project(&vec![2.0, 1.0]).unwrap();
        let top = project(&vec![0.0, 2.0]).unwrap();
        assert!((c.x - mid.x).abs() < 1e-6);
        assert!((c.y - top.y / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_geometry_collection_is_error() {
        let geom = parse(r#"{"type":"GeometryCollection","geometries":[]}"#);
        assert!(matches!(
            geom.envelope_centroid(),
            Err(GeoError::EmptyGeometry)
        ));
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let geom = parse(r#"{"type":"CircularString","coordinates":[]}"#);
        assert_eq!(geom, GeoJsonGeometry::Unsupported);
        assert!(matches!(
            geom.envelope_centroid(),
            Err(GeoError::UnsupportedGeometry)
        ));
    }
}
