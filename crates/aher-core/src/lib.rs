//! Shared types, configuration, and errors for the AHER assistant.
//!
//! Every other crate in the workspace depends on this one for the
//! conversation message model, the planar geometry primitives used to build
//! spatial predicates, and the top-level [`AherError`].

pub mod config;
pub mod error;
pub mod spatial;
pub mod types;

pub use config::AherConfig;
pub use error::{AherError, Result};
pub use spatial::{Point, SpatialPredicate, DEFAULT_DISTANCE_THRESHOLD_M, PLANAR_SRID};
pub use types::*;
