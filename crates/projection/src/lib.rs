//! Coordinate reference system transformations.
//!
//! Implements map projections from scratch without external dependencies.

pub mod geographic;
pub mod mercator;
pub mod polar;
pub mod transform;

pub use geographic::{normalize_lon, EARTH_RADIUS_KM};
pub use mercator::WebMercator;
pub use polar::PolarStereographic;
pub use transform::{CoordinateTransformation, Projection};
