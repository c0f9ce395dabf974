//! Common fixtures: boxes, times, colour maps and in-memory engine documents.

/// Bounding boxes as `(min_x, min_y, max_x, max_y)`.
pub mod bbox {
    /// Finland in lon/lat
    pub const FINLAND: (f64, f64, f64, f64) = (19.0, 59.0, 32.0, 71.0);

    /// A 10x10 degree box around the origin
    pub const SIMPLE: (f64, f64, f64, f64) = (-10.0, -10.0, 10.0, 10.0);
}

pub mod time {
    /// A fixed reference time for tests
    pub const REFERENCE_TIME: &str = "2024-01-15T12:00:00Z";
}

pub mod crs {
    pub const EPSG_4326: &str = "EPSG:4326";
}

/// Colour maps in the `value;colour` text format.
pub mod colormaps {
    pub const TEMPERATURE: &str = "# temperature\n\
        -20;FF0000FF\n\
        0;FFFFFFFF\n\
        20;FFFFFF00\n\
        40;FFFF0000\n";
}

/// Builders for in-memory engine documents.
pub mod engine {
    use serde_json::{json, Value};

    /// A grid entry for the `grids` array.
    #[allow(clippy::too_many_arguments)]
    pub fn grid(
        producer: &str,
        parameter: &str,
        time: &str,
        crs: &str,
        bbox: (f64, f64, f64, f64),
        width: usize,
        height: usize,
        values: &[f32],
    ) -> Value {
        json!({
            "producer": producer,
            "parameter": parameter,
            "time": time,
            "crs": crs,
            "bbox": [bbox.0, bbox.1, bbox.2, bbox.3],
            "width": width,
            "height": height,
            "values": values.iter().map(|v| if v.is_nan() { Value::Null } else { json!(v) }).collect::<Vec<_>>(),
        })
    }

    /// An engine document holding the given grids and nothing else.
    pub fn with_grids(grids: Vec<Value>) -> Value {
        json!({ "grids": grids })
    }

    /// A closed lon/lat rectangle as a GeoJSON polygon.
    pub fn rectangle(bbox: (f64, f64, f64, f64)) -> Value {
        let (x1, y1, x2, y2) = bbox;
        json!({
            "type": "Polygon",
            "coordinates": [[[x1, y1], [x2, y1], [x2, y2], [x1, y2], [x1, y1]]]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_entry() {
        let g = engine::grid("pal", "Temperature", time::REFERENCE_TIME, crs::EPSG_4326, bbox::SIMPLE, 2, 1, &[1.0, f32::NAN]);
        assert_eq!(g["width"], 2);
        assert!(g["values"][1].is_null());
        assert_eq!(g["bbox"][2], 10.0);
    }

    #[test]
    fn test_rectangle_is_closed() {
        let r = engine::rectangle(bbox::FINLAND);
        let ring = r["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_colormap_lines() {
        assert_eq!(colormaps::TEMPERATURE.lines().filter(|l| l.contains(';')).count(), 4);
    }
}
