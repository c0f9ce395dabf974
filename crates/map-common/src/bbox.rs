//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

/// A geographic or projected bounding box.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// For projected CRS (EPSG:3857, etc.), coordinates are in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest box containing all the given points, or `None` when no point is finite.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut bbox: Option<BoundingBox> = None;
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            bbox = Some(match bbox {
                None => BoundingBox::new(x, y, x, y),
                Some(b) => b.expand_to(x, y),
            });
        }
        bbox
    }

    /// Parse a comma separated "minx,miny,maxx,maxy" string.
    pub fn from_csv(s: &str) -> Result<Self, BboxParseError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        let number = |p: &str| -> Result<f64, BboxParseError> {
            p.parse()
                .map_err(|_| BboxParseError::InvalidNumber(p.to_string()))
        };

        Ok(Self {
            min_x: number(parts[0])?,
            min_y: number(parts[1])?,
            max_x: number(parts[2])?,
            max_y: number(parts[3])?,
        })
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Compute the intersection of two bounding boxes.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }

        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Grow the box by `dx` horizontally and `dy` vertically on every side.
    pub fn expand(&self, dx: f64, dy: f64) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x - dx,
            min_y: self.min_y - dy,
            max_x: self.max_x + dx,
            max_y: self.max_y + dy,
        }
    }

    /// Grow the box so that it contains the given point.
    pub fn expand_to(&self, x: f64, y: f64) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(x),
            min_y: self.min_y.min(y),
            max_x: self.max_x.max(x),
            max_y: self.max_y.max(y),
        }
    }
}

/// Affine mapping between a world rectangle and an image of `width` x `height` pixels.
///
/// Pixel `y` grows downwards, so `world.max_y` maps to row 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBox {
    pub world: BoundingBox,
    pub width: u32,
    pub height: u32,
}

impl PixelBox {
    pub fn new(world: BoundingBox, width: u32, height: u32) -> Self {
        Self {
            world,
            width,
            height,
        }
    }

    /// World coordinates to pixel coordinates.
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        let px = (x - self.world.min_x) / self.world.width() * self.width as f64;
        let py = (self.world.max_y - y) / self.world.height() * self.height as f64;
        (px, py)
    }

    /// Pixel coordinates to world coordinates.
    pub fn itransform(&self, px: f64, py: f64) -> (f64, f64) {
        let x = self.world.min_x + px / self.width as f64 * self.world.width();
        let y = self.world.max_y - py / self.height as f64 * self.world.height();
        (x, y)
    }

    /// World units per pixel horizontally.
    pub fn x_resolution(&self) -> f64 {
        self.world.width() / self.width as f64
    }

    /// World units per pixel vertically.
    pub fn y_resolution(&self) -> f64 {
        self.world.height() / self.height as f64
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BboxParseError {
    #[error("Invalid bbox format: {0}. Expected 'x1,y1,x2,y2'")]
    InvalidFormat(String),

    #[error("Invalid number in bbox: {0}")]
    InvalidNumber(String),
}
