//! Planar geometry primitives and the distance predicate used to scope
//! retrieval to the places mentioned in a conversation.
//!
//! All coordinates here are in the planar (Web Mercator, EPSG:3857) reference
//! system, so distances are in meters.

use serde::{Deserialize, Serialize};

/// SRID of the planar reference system used for predicates.
pub const PLANAR_SRID: u32 = 3857;

/// Default proximity threshold in meters.
pub const DEFAULT_DISTANCE_THRESHOLD_M: f64 = 2000.0;

/// A point in planar coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Serialize as well-known text: `POINT (x y)`.
    pub fn to_wkt(&self) -> String {
        format!("POINT ({} {})", self.x, self.y)
    }

    /// Euclidean distance in planar units.
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Remove the leading `POINT` tag from a WKT point, leaving `(x y)`.
pub fn strip_point_tag(wkt: &str) -> &str {
    wkt.trim().trim_start_matches("POINT").trim()
}

/// "Record geometry lies within `threshold_m` of any of `points`."
///
/// Never empty: an aggregate with no points has no valid predicate, so
/// [`SpatialPredicate::new`] returns `None` and callers run unscoped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialPredicate {
    points: Vec<Point>,
    threshold_m: f64,
}

impl SpatialPredicate {
    pub fn new(points: Vec<Point>, threshold_m: f64) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(Self {
            points,
            threshold_m,
        })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    /// The aggregate geometry: `MULTIPOINT((x1 y1), (x2 y2), ...)`.
    pub fn multipoint_wkt(&self) -> String {
        let members: Vec<String> = self
            .points
            .iter()
            .map(|p| strip_point_tag(&p.to_wkt()).to_string())
            .collect();
        format!("MULTIPOINT({})", members.join(", "))
    }

    /// The predicate as a SQL filter over a `geom` column.
    pub fn to_where_clause(&self) -> String {
        format!(
            "WHERE ST_Distance(geom, ST_GeomFromText('{}', {})) < {}",
            self.multipoint_wkt(),
            PLANAR_SRID,
            self.threshold_m
        )
    }

    /// Evaluate the predicate against a record geometry.
    pub fn matches(&self, point: &Point) -> bool {
        self.points
            .iter()
            .any(|p| p.distance(point) < self.threshold_m)
    }
}

impl std::fmt::Display for SpatialPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_where_clause())
    }
}
