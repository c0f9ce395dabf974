//! Spherical Web Mercator projection (EPSG:3857).

use std::f64::consts::PI;

/// Latitude limit beyond which the projection is undefined for rendering purposes.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Web Mercator on a sphere with the WGS84 semi-major axis.
#[derive(Debug, Clone, Copy)]
pub struct WebMercator {
    /// Sphere radius (meters)
    pub radius: f64,
}

impl Default for WebMercator {
    fn default() -> Self {
        Self { radius: 6_378_137.0 }
    }
}

impl WebMercator {
    /// Geographic degrees to projected meters.
    ///
    /// Returns `None` at or beyond the poles.
    pub fn forward(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() >= 90.0 {
            return None;
        }
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let to_rad = PI / 180.0;
        let x = self.radius * lon * to_rad;
        let y = self.radius * (PI / 4.0 + lat * to_rad / 2.0).tan().ln();
        Some((x, y))
    }

    /// Projected meters to geographic degrees.
    pub fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let to_deg = 180.0 / PI;
        let lon = x / self.radius * to_deg;
        let lat = (2.0 * (y / self.radius).exp().atan() - PI / 2.0) * to_deg;
        Some((lon, lat))
    }
}
