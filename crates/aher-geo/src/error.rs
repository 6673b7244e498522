//! Error types for geometry handling.

use aher_core::error::AherError;

/// Errors raised while building or converting geometries.
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("geometry has no coordinates")]
    EmptyGeometry,
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("unsupported geometry type")]
    UnsupportedGeometry,
    #[error("catalog client error: {0}")]
    Client(String),
}

impl From<GeoError> for AherError {
    fn from(err: GeoError) -> Self {
        AherError::Search(err.to_string())
    }
}
