//! Raster and vector primitives for map layers.
//!
//! - Colour maps and the raster painters that composite data onto ARGB images
//! - Streamline tracing for animated flow rendering
//! - Isoline and isoband contouring (marching squares)
//! - Grid smoothing and isoline filtering
//! - Isolabel candidate generation and selection
//! - Geometry serialization to SVG paths, GeoJSON and TopoJSON
//! - Well-known text geometry parsing
//! - PNG encoding

pub mod colormap;
pub mod contour;
pub mod geometry;
pub mod isolabel;
pub mod isoline_filter;
pub mod painter;
pub mod png;
pub mod smoother;
pub mod streamline;
pub mod wkt;

pub use colormap::ColorMap;
pub use painter::{merge_argb, Canvas, ColorPainter, Parameters, PARAM_VALUE_MISSING};
