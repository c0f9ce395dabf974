//! Geographic (lon/lat) helpers.

use std::f64::consts::PI;

/// Mean earth radius used for km <-> degree conversions.
pub const EARTH_RADIUS_KM: f64 = 6371.22;

/// Wrap a longitude into `[-180, 180)`.
pub fn normalize_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped.is_nan() {
        lon
    } else {
        wrapped
    }
}

/// Kilometres to degrees of arc along a great circle.
pub fn km_to_degrees(km: f64) -> f64 {
    km / (2.0 * PI * EARTH_RADIUS_KM) * 360.0
}

/// Degrees of arc to kilometres along a great circle.
pub fn degrees_to_km(deg: f64) -> f64 {
    deg * 2.0 * PI * EARTH_RADIUS_KM / 360.0
}

/// Great circle distance in kilometres (haversine).
pub fn distance_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let to_rad = PI / 180.0;
    let dlat = (lat2 - lat1) * to_rad;
    let dlon = (lon2 - lon1) * to_rad;
    let a = (dlat / 2.0).sin().powi(2)
        + (lat1 * to_rad).cos() * (lat2 * to_rad).cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lon() {
        assert_eq!(normalize_lon(190.0), -170.0);
        assert_eq!(normalize_lon(-190.0), 170.0);
        assert_eq!(normalize_lon(180.0), -180.0);
        assert_eq!(normalize_lon(25.0), 25.0);
    }

    #[test]
    fn test_km_degree_round_trip() {
        let km = 111.2;
        assert!((degrees_to_km(km_to_degrees(km)) - km).abs() < 1e-9);
        assert!((km_to_degrees(degrees_to_km(1.0)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance_one_degree_of_latitude() {
        let d = distance_km(25.0, 60.0, 25.0, 61.0);
        assert!((d - degrees_to_km(1.0)).abs() < 0.01, "got {}", d);
    }
}
