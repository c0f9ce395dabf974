//! Transformations between supported coordinate reference systems.
//!
//! Every supported CRS is either geographic or a projection of WGS84, so a
//! transformation always goes through lon/lat degrees.

use crate::mercator::WebMercator;
use crate::polar::PolarStereographic;
use map_common::{BoundingBox, CrsCode, RenderError, RenderResult};

/// A concrete projection for one CRS code.
#[derive(Debug, Clone, Copy)]
pub enum Projection {
    Geographic,
    Mercator(WebMercator),
    Polar(PolarStereographic),
}

impl Projection {
    pub fn from_code(code: CrsCode) -> Self {
        match code {
            CrsCode::Epsg4326 => Projection::Geographic,
            CrsCode::Epsg3857 => Projection::Mercator(WebMercator::default()),
            CrsCode::Epsg3413 | CrsCode::Epsg3995 | CrsCode::Epsg3031 => {
                // Every polar code carries parameters
                let (lat_ts, lon0) = code.polar_parameters().unwrap_or((90.0, 0.0));
                Projection::Polar(PolarStereographic::new(lat_ts, lon0))
            }
        }
    }

    /// Lon/lat degrees to CRS coordinates.
    pub fn forward(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        match self {
            Projection::Geographic => {
                if lon.is_finite() && lat.is_finite() {
                    Some((lon, lat))
                } else {
                    None
                }
            }
            Projection::Mercator(p) => p.forward(lon, lat),
            Projection::Polar(p) => p.forward(lon, lat),
        }
    }

    /// CRS coordinates to lon/lat degrees.
    pub fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            Projection::Geographic => {
                if x.is_finite() && y.is_finite() {
                    Some((x, y))
                } else {
                    None
                }
            }
            Projection::Mercator(p) => p.inverse(x, y),
            Projection::Polar(p) => p.inverse(x, y),
        }
    }
}

/// A transformation from one CRS to another.
///
/// Points that cannot be transformed yield `None`; callers drop them.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateTransformation {
    pub source_code: CrsCode,
    pub target_code: CrsCode,
    source: Projection,
    target: Projection,
}

impl CoordinateTransformation {
    pub fn new(source: CrsCode, target: CrsCode) -> Self {
        Self {
            source_code: source,
            target_code: target,
            source: Projection::from_code(source),
            target: Projection::from_code(target),
        }
    }

    /// Transformation from WGS84 to `target`.
    pub fn from_wgs84(target: CrsCode) -> Self {
        Self::new(CrsCode::Epsg4326, target)
    }

    /// Transformation from `source` to WGS84.
    pub fn to_wgs84(source: CrsCode) -> Self {
        Self::new(source, CrsCode::Epsg4326)
    }

    pub fn is_identity(&self) -> bool {
        self.source_code == self.target_code
    }

    /// Transform one point.
    pub fn transform(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if self.is_identity() {
            return if x.is_finite() && y.is_finite() {
                Some((x, y))
            } else {
                None
            };
        }
        let (lon, lat) = self.source.inverse(x, y)?;
        self.target.forward(lon, lat)
    }

    /// Transform one point, failing with a `Transform` error.
    pub fn transform_checked(&self, x: f64, y: f64) -> RenderResult<(f64, f64)> {
        self.transform(x, y).ok_or_else(|| {
            RenderError::transform("Failed to transform coordinate")
                .with_param("source", self.source_code)
                .with_param("target", self.target_code)
                .with_param("x", x)
                .with_param("y", y)
        })
    }

    /// The inverse transformation.
    pub fn inverse(&self) -> Self {
        Self::new(self.target_code, self.source_code)
    }

    /// Transform a box by sampling its edges, returning the enclosing target box.
    ///
    /// Fails when no sample point can be transformed.
    pub fn transform_box(&self, bbox: &BoundingBox) -> RenderResult<BoundingBox> {
        const SAMPLES: usize = 20;
        let mut points = Vec::with_capacity(4 * (SAMPLES + 1));
        for i in 0..=SAMPLES {
            let f = i as f64 / SAMPLES as f64;
            let x = bbox.min_x + f * bbox.width();
            let y = bbox.min_y + f * bbox.height();
            points.push((x, bbox.min_y));
            points.push((x, bbox.max_y));
            points.push((bbox.min_x, y));
            points.push((bbox.max_x, y));
        }
        let transformed = points.into_iter().filter_map(|(x, y)| self.transform(x, y));
        BoundingBox::from_points(transformed).ok_or_else(|| {
            RenderError::transform("Failed to transform bounding box")
                .with_param("source", self.source_code)
                .with_param("target", self.target_code)
        })
    }
}
