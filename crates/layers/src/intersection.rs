//! Restricting layers to areas where another field lies within limits.

use crate::field::{fetch_grid, grid_to_crs, prepare_values, ValueScaling};
use crate::properties::Properties;
use crate::state::State;
use geo::{Contains, Geometry, MultiPolygon, Point};
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use renderer::contour::{isoband, ContourGrid, Interpolation};
use renderer::smoother::Smoother;
use serde_json::Value;
use std::collections::BTreeMap;

/// Stand-ins for open limits when contouring.
const OPEN_LIMIT: f64 = 1e9;

/// An area where one parameter lies within limits.
#[derive(Debug, Clone, Default)]
pub struct Intersection {
    pub lolimit: Option<f64>,
    pub hilimit: Option<f64>,
    pub value: Option<f64>,
    pub level: Option<f64>,
    pub producer: Option<String>,
    pub parameter: Option<String>,
    pub interpolation: Interpolation,
    pub smoother: Smoother,
    pub scaling: ValueScaling,
    area: Option<MultiPolygon<f64>>,
}

impl Intersection {
    pub fn init(mut cfg: ConfigObject) -> RenderResult<Self> {
        let mut intersection = Self {
            lolimit: cfg.take_f64("lolimit")?,
            hilimit: cfg.take_f64("hilimit")?,
            value: cfg.take_f64("value")?,
            level: cfg.take_f64("level")?,
            producer: cfg.take_string("producer")?,
            parameter: cfg.take_string("parameter")?,
            scaling: ValueScaling::take(&mut cfg)?,
            ..Default::default()
        };
        if let Some(name) = cfg.take_string("interpolation")? {
            intersection.interpolation = Interpolation::parse(&name)?;
        }
        if let Some(smoother) = cfg.take_parsed::<Smoother>("smoother")? {
            smoother.validate()?;
            intersection.smoother = smoother;
        }
        if intersection.value.is_some() && (intersection.lolimit.is_some() || intersection.hilimit.is_some()) {
            return Err(RenderError::config("Intersection cannot have both a value and lolimit/hilimit"));
        }
        cfg.finish("Intersection")?;
        Ok(intersection)
    }

    /// The band `[lo, hi)` contoured. An exact value becomes a sliver band.
    fn limits(&self) -> (f64, f64) {
        match self.value {
            Some(v) => (v, v + v.abs().max(1.0) * 1e-6),
            None => (
                self.lolimit.unwrap_or(-OPEN_LIMIT),
                self.hilimit.unwrap_or(OPEN_LIMIT),
            ),
        }
    }

    /// Contour the area in the projection of `properties`.
    pub fn fetch(&mut self, state: &State, properties: &Properties) -> RenderResult<()> {
        let Some(parameter) = &self.parameter else {
            return Ok(());
        };
        let crs = properties.projection.crs_code()?;
        let grid = fetch_grid(state, properties, parameter, self.producer.as_deref(), self.level)?;
        let values = prepare_values(&grid, &self.scaling, &self.smoother, state)?;
        let contour_grid = ContourGrid::new(&values, grid.width, grid.height)?;
        let (lo, hi) = self.limits();
        let band = isoband(&contour_grid, Some(lo), Some(hi), self.interpolation);

        let area = match grid_to_crs(&Geometry::MultiPolygon(band), &grid, crs) {
            Geometry::MultiPolygon(mp) => mp,
            Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            _ => MultiPolygon::new(Vec::new()),
        };
        tracing::debug!(parameter = %parameter, polygons = area.0.len(), "contoured intersection");
        self.area = Some(area);
        Ok(())
    }

    pub fn inside(&self, x: f64, y: f64) -> bool {
        if self.parameter.is_none() {
            return true;
        }
        match &self.area {
            Some(area) if !area.0.is_empty() => area.contains(&Point::new(x, y)),
            _ => false,
        }
    }

    /// Check a sampled value against the limits, inclusively.
    pub fn inside_value(&self, x: f64) -> RenderResult<bool> {
        let (multiplier, offset) = match &self.scaling.unit_conversion {
            Some(_) => return Err(RenderError::config("unit_conversion cannot be used for value intersections")),
            None => (self.scaling.multiplier.unwrap_or(1.0), self.scaling.offset.unwrap_or(0.0)),
        };
        let x = multiplier * x + offset;
        if let Some(v) = self.value {
            return Ok(x == v);
        }
        Ok(self.lolimit.map_or(true, |lo| lo <= x) && self.hilimit.map_or(true, |hi| x <= hi))
    }

    pub fn intersect(&self, geom: &Geometry<f64>) -> Geometry<f64> {
        match (&self.parameter, &self.area) {
            (None, _) => geom.clone(),
            (Some(_), Some(area)) => renderer::geometry::clip(geom, area),
            (Some(_), None) => renderer::geometry::clip(geom, &MultiPolygon::new(Vec::new())),
        }
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.parameter);
        for v in [self.lolimit, self.hilimit, self.value, self.level] {
            hash_combine(&mut seed, v.map_or(0, hash_f64));
        }
        hash_combine(&mut seed, hash_value(&self.producer));
        hash_combine(&mut seed, hash_value(&self.interpolation));
        hash_combine(&mut seed, self.smoother.hash_value());
        hash_combine(&mut seed, self.scaling.hash_value());
        seed
    }
}

/// All intersections of a layer. Every one must pass.
#[derive(Debug, Clone, Default)]
pub struct Intersections {
    list: Vec<Intersection>,
}

impl Intersections {
    /// Accepts a single object or an array of objects.
    pub fn init(value: Value) -> RenderResult<Self> {
        let items = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            other => {
                return Err(RenderError::config("Intersections must be a JSON object or an array of objects")
                    .with_param("json", other))
            }
        };
        let list = items
            .into_iter()
            .map(|item| Intersection::init(ConfigObject::from_value(item, "Intersection")?))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self { list })
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn fetch(&mut self, state: &State, properties: &Properties) -> RenderResult<()> {
        for intersection in &mut self.list {
            intersection
                .fetch(state, properties)
                .trace("Failed to generate intersection")?;
        }
        Ok(())
    }

    pub fn inside(&self, x: f64, y: f64) -> bool {
        self.list.iter().all(|i| i.inside(x, y))
    }

    /// Check sampled values by parameter name. Parameters not in `values`
    /// pass.
    pub fn inside_values(&self, values: &BTreeMap<String, f64>) -> RenderResult<bool> {
        for intersection in &self.list {
            let Some(parameter) = &intersection.parameter else {
                continue;
            };
            if let Some(&x) = values.get(parameter) {
                if !intersection.inside_value(x)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    pub fn intersect(&self, geom: &Geometry<f64>) -> Geometry<f64> {
        self.list.iter().fold(geom.clone(), |g, i| i.intersect(&g))
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = self.list.len() as u64;
        for intersection in &self.list {
            hash_combine(&mut seed, intersection.hash_value());
        }
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engines, MemoryEngine};
    use crate::properties::PartialProperties;
    use serde_json::json;
    use std::sync::Arc;
    use test_utils::fixtures::{engine, time};

    fn state_with_gradient() -> State {
        let values = test_utils::create_gradient_grid(11, 11, 10.0);
        let doc = engine::with_grids(vec![engine::grid(
            "pal",
            "Temperature",
            time::REFERENCE_TIME,
            "EPSG:4326",
            (0.0, 0.0, 10.0, 10.0),
            11,
            11,
            &values,
        )]);
        State::new(Engines::from_memory(Arc::new(MemoryEngine::from_json(doc).unwrap())))
    }

    fn properties(state: &State) -> Properties {
        let mut cfg = ConfigObject::from_value(
            json!({"time": time::REFERENCE_TIME, "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 10, "y2": 10}}),
            "test",
        )
        .unwrap();
        Properties::merge(&Properties::default(), PartialProperties::take(&mut cfg, state.gazetteer()).unwrap())
    }

    #[test]
    fn test_inside_contoured_band() {
        let state = state_with_gradient();
        let mut intersections = Intersections::init(json!({"parameter": "Temperature", "lolimit": 2, "hilimit": 5})).unwrap();
        intersections.fetch(&state, &properties(&state)).unwrap();
        assert!(intersections.inside(3.5, 5.0));
        assert!(!intersections.inside(1.0, 5.0));
        assert!(!intersections.inside(6.0, 5.0));
    }

    #[test]
    fn test_every_intersection_must_pass() {
        let state = state_with_gradient();
        let mut intersections = Intersections::init(json!([
            {"parameter": "Temperature", "lolimit": 2},
            {"parameter": "Temperature", "hilimit": 4}
        ]))
        .unwrap();
        intersections.fetch(&state, &properties(&state)).unwrap();
        assert!(intersections.inside(3.0, 3.0));
        assert!(!intersections.inside(5.0, 3.0));
    }

    #[test]
    fn test_without_parameter_passes() {
        let intersections = Intersections::init(json!({"lolimit": 0})).unwrap();
        assert!(intersections.inside(1e6, 1e6));
    }

    #[test]
    fn test_unfetched_area_fails() {
        let intersections = Intersections::init(json!({"parameter": "Temperature"})).unwrap();
        assert!(!intersections.inside(0.0, 0.0));
    }

    #[test]
    fn test_inside_values_is_inclusive() {
        let intersections =
            Intersections::init(json!({"parameter": "Temperature", "lolimit": 0, "hilimit": 10, "multiplier": 2}))
                .unwrap();
        let mut values = BTreeMap::new();
        values.insert("Temperature".to_string(), 5.0);
        assert!(intersections.inside_values(&values).unwrap());
        values.insert("Temperature".to_string(), 5.5);
        assert!(!intersections.inside_values(&values).unwrap());
        assert!(intersections.inside_values(&BTreeMap::new()).unwrap());
    }

    #[test]
    fn test_intersect_clips_geometry() {
        let state = state_with_gradient();
        let mut intersections = Intersections::init(json!({"parameter": "Temperature", "hilimit": 5})).unwrap();
        intersections.fetch(&state, &properties(&state)).unwrap();
        let square = Geometry::MultiPolygon(renderer::geometry::box_polygon(&map_common::BoundingBox::new(
            0.0, 0.0, 10.0, 10.0,
        )));
        let clipped = intersections.intersect(&square);
        let rect = geo::BoundingRect::bounding_rect(&clipped).unwrap();
        assert!((rect.max().x - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_config_errors() {
        assert!(Intersections::init(json!({"parameter": "T", "value": 1, "lolimit": 0})).is_err());
        assert!(Intersections::init(json!({"parameter": "T", "interpolation": "cubic"})).is_err());
        assert!(Intersections::init(json!({"parameter": "T", "colour": "red"})).is_err());
        assert!(Intersections::init(json!("Temperature")).is_err());
    }
}
