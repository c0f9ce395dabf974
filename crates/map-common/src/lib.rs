//! Common types and utilities shared across the map rendering crates.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod hash;
pub mod json;
pub mod time;

pub use bbox::{BoundingBox, PixelBox};
pub use crs::{CrsCode, CrsSpec};
pub use error::{ErrorKind, RenderError, RenderResult, ResultExt};
pub use hash::{hash_combine, hash_f64, hash_json, hash_value};
pub use json::ConfigObject;
pub use time::{parse_time, to_iso_string, TimePeriod};
