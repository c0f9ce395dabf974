//! Polar Stereographic projection on the WGS84 ellipsoid.
//!
//! Variant B (latitude of true scale), as used by EPSG:3413, EPSG:3995 and
//! EPSG:3031. Formulas follow Snyder, "Map Projections: A Working Manual",
//! equations 21-33 through 21-40 and 7-9.
//!
//! The southern aspect is computed by mirroring latitude and longitude
//! through the northern formulas and negating the result.

use std::f64::consts::PI;

/// Polar Stereographic projection parameters.
#[derive(Debug, Clone, Copy)]
pub struct PolarStereographic {
    /// Latitude of true scale in radians (sign selects the hemisphere)
    pub lat_ts: f64,
    /// Central meridian in radians
    pub lon0: f64,
    /// Semi-major axis (meters)
    pub a: f64,
    /// First eccentricity
    pub e: f64,
    /// True when projecting around the south pole
    south: bool,
    /// Snyder's m at the latitude of true scale
    mc: f64,
    /// Snyder's t at the latitude of true scale
    tc: f64,
}

impl PolarStereographic {
    /// Create a projection from degrees.
    ///
    /// # Arguments
    /// * `lat_ts_deg` - Latitude of true scale; negative for the southern aspect
    /// * `lon0_deg` - Central meridian (straight down from the pole in the north)
    pub fn new(lat_ts_deg: f64, lon0_deg: f64) -> Self {
        let to_rad = PI / 180.0;
        let a = 6_378_137.0;
        let e = 0.081_819_190_842_622;
        let south = lat_ts_deg < 0.0;
        let phi_c = lat_ts_deg.abs() * to_rad;

        let mc = phi_c.cos() / (1.0 - e * e * phi_c.sin().powi(2)).sqrt();
        let tc = Self::t(phi_c, e);

        Self {
            lat_ts: lat_ts_deg * to_rad,
            lon0: lon0_deg * to_rad,
            a,
            e,
            south,
            mc,
            tc,
        }
    }

    /// NSIDC Sea Ice Polar Stereographic North.
    pub fn epsg3413() -> Self {
        Self::new(70.0, -45.0)
    }

    /// Antarctic Polar Stereographic.
    pub fn epsg3031() -> Self {
        Self::new(-71.0, 0.0)
    }

    fn t(phi: f64, e: f64) -> f64 {
        let es = e * phi.sin();
        (PI / 4.0 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
    }

    /// Geographic degrees to projected meters.
    ///
    /// Returns `None` for the opposite pole, where the projection diverges.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> Option<(f64, f64)> {
        if !lon_deg.is_finite() || !lat_deg.is_finite() || lat_deg.abs() > 90.0 {
            return None;
        }
        let to_rad = PI / 180.0;
        let (mut phi, mut dlon) = (lat_deg * to_rad, lon_deg * to_rad - self.lon0);
        if self.south {
            phi = -phi;
            dlon = -dlon;
        }
        if phi <= -PI / 2.0 + 1e-10 {
            return None;
        }

        let t = Self::t(phi, self.e);
        let rho = self.a * self.mc * t / self.tc;
        let x = rho * dlon.sin();
        let y = -rho * dlon.cos();

        if self.south {
            Some((-x, -y))
        } else {
            Some((x, y))
        }
    }

    /// Projected meters to geographic degrees.
    pub fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let (x, y) = if self.south { (-x, -y) } else { (x, y) };

        let rho = x.hypot(y);
        let t = rho * self.tc / (self.a * self.mc);

        // Iterate Snyder 7-9 starting from the conformal latitude
        let mut phi = PI / 2.0 - 2.0 * t.atan();
        for _ in 0..15 {
            let es = self.e * phi.sin();
            let next = PI / 2.0 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0)).atan();
            let done = (next - phi).abs() < 1e-12;
            phi = next;
            if done {
                break;
            }
        }

        let mut dlon = if rho == 0.0 { 0.0 } else { x.atan2(-y) };
        if self.south {
            phi = -phi;
            dlon = -dlon;
        }

        let to_deg = 180.0 / PI;
        let lon = crate::geographic::normalize_lon((self.lon0 + dlon) * to_deg);
        Some((lon, phi * to_deg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pole_is_origin() {
        let proj = PolarStereographic::epsg3413();
        let (x, y) = proj.forward(0.0, 90.0).unwrap();
        assert!(x.abs() < 1e-6 && y.abs() < 1e-6);
    }

    #[test]
    fn test_central_meridian_points_down() {
        // In EPSG:3413 the -45 meridian runs along the negative y axis
        let proj = PolarStereographic::epsg3413();
        let (x, y) = proj.forward(-45.0, 75.0).unwrap();
        assert!(x.abs() < 1e-6, "x should be ~0, got {}", x);
        assert!(y < 0.0);
    }

    #[test]
    fn test_roundtrip_north_and_south() {
        for proj in [PolarStereographic::epsg3413(), PolarStereographic::new(71.0, 0.0)] {
            let (x, y) = proj.forward(24.94, 60.17).unwrap();
            let (lon, lat) = proj.inverse(x, y).unwrap();
            assert!((lon - 24.94).abs() < 1e-7, "lon roundtrip {}", lon);
            assert!((lat - 60.17).abs() < 1e-7, "lat roundtrip {}", lat);
        }

        let proj = PolarStereographic::epsg3031();
        let (x, y) = proj.forward(166.67, -77.85).unwrap();
        let (lon, lat) = proj.inverse(x, y).unwrap();
        assert!((lon - 166.67).abs() < 1e-7);
        assert!((lat + 77.85).abs() < 1e-7);
    }

    #[test]
    fn test_true_scale_distance() {
        // Known value: a point at 70N on the central meridian of EPSG:3413
        let proj = PolarStereographic::epsg3413();
        let (_, y) = proj.forward(-45.0, 70.0).unwrap();
        assert!((y + 2_187_000.0).abs() < 5_000.0, "got {}", y);
    }

    #[test]
    fn test_opposite_pole_rejected() {
        assert!(PolarStereographic::epsg3413().forward(0.0, -90.0).is_none());
        assert!(PolarStereographic::epsg3031().forward(0.0, 90.0).is_none());
    }
}
