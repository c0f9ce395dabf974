//! Data sources used by the layers.
//!
//! Layers only see the [`DataEngine`], [`ShapeEngine`], [`Gazetteer`] and
//! [`ObservationEngine`] traits. [`MemoryEngine`] implements all of them from
//! a single JSON document and is what the CLI and the tests run against.

use chrono::{DateTime, Utc};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use map_common::{BoundingBox, CrsCode, RenderError, RenderResult, ResultExt};
use projection::CoordinateTransformation;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// Grids
// ============================================================================

/// What to fetch from a [`DataEngine`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridQuery {
    pub producer: Option<String>,
    pub parameter: String,
    pub time: Option<DateTime<Utc>>,
    pub level: Option<f64>,
}

/// A regular grid of values in its native CRS.
///
/// `values` are row-major with row 0 at the southern edge. Grid nodes lie on
/// the edges of `bbox`, so node `(i, j)` is at
/// `min_x + i * width(bbox) / (width - 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GridData {
    pub crs: CrsCode,
    pub bbox: BoundingBox,
    pub width: usize,
    pub height: usize,
    pub values: Vec<f32>,
}

impl GridData {
    pub fn new(crs: CrsCode, bbox: BoundingBox, width: usize, height: usize, values: Vec<f32>) -> RenderResult<Self> {
        if width < 2 || height < 2 {
            return Err(RenderError::data("Grid must be at least 2x2")
                .with_param("width", width)
                .with_param("height", height));
        }
        if values.len() != width * height {
            return Err(RenderError::data("Grid value count does not match its size")
                .with_param("values", values.len())
                .with_param("width", width)
                .with_param("height", height));
        }
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(RenderError::data("Grid bounding box is empty").with_param("bbox", format!("{:?}", bbox)));
        }
        Ok(Self {
            crs,
            bbox,
            width,
            height,
            values,
        })
    }

    fn cell_size(&self) -> (f64, f64) {
        (
            self.bbox.width() / (self.width - 1) as f64,
            self.bbox.height() / (self.height - 1) as f64,
        )
    }

    /// World coordinates of fractional grid position `(gx, gy)`.
    pub fn grid_to_world(&self, gx: f64, gy: f64) -> (f64, f64) {
        let (dx, dy) = self.cell_size();
        (self.bbox.min_x + gx * dx, self.bbox.min_y + gy * dy)
    }

    pub fn world_to_grid(&self, x: f64, y: f64) -> (f64, f64) {
        let (dx, dy) = self.cell_size();
        ((x - self.bbox.min_x) / dx, (y - self.bbox.min_y) / dy)
    }

    pub fn value(&self, i: usize, j: usize) -> Option<f32> {
        let v = *self.values.get(j * self.width + i)?;
        (!renderer::painter::is_missing(v)).then_some(v)
    }

    /// Bilinear value at a fractional grid position. Missing when any of the
    /// surrounding nodes is missing or the position is outside the grid.
    pub fn value_at_grid(&self, gx: f64, gy: f64) -> Option<f64> {
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        if !(0.0..=max_x).contains(&gx) || !(0.0..=max_y).contains(&gy) {
            return None;
        }
        let i = (gx.floor() as usize).min(self.width - 2);
        let j = (gy.floor() as usize).min(self.height - 2);
        let fx = gx - i as f64;
        let fy = gy - j as f64;

        let v00 = self.value(i, j)? as f64;
        let v10 = self.value(i + 1, j)? as f64;
        let v01 = self.value(i, j + 1)? as f64;
        let v11 = self.value(i + 1, j + 1)? as f64;
        let bottom = v00 + (v10 - v00) * fx;
        let top = v01 + (v11 - v01) * fx;
        Some(bottom + (top - bottom) * fy)
    }

    pub fn value_at_world(&self, x: f64, y: f64) -> Option<f64> {
        let (gx, gy) = self.world_to_grid(x, y);
        self.value_at_grid(gx, gy)
    }

    /// Bilinear value at a WGS84 location.
    pub fn grid_values_at(&self, lon: f64, lat: f64) -> Option<f64> {
        let (x, y) = CoordinateTransformation::from_wgs84(self.crs).transform(lon, lat)?;
        self.value_at_world(x, y)
    }

    /// Convert a geometry from grid space to world coordinates.
    pub fn to_world(&self, geom: &Geometry<f64>) -> Geometry<f64> {
        renderer::geometry::map_points(geom, &|c: Coord<f64>| {
            let (x, y) = self.grid_to_world(c.x, c.y);
            Some(Coord { x, y })
        })
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = map_common::hash_value(&self.crs.to_string());
        for v in [self.bbox.min_x, self.bbox.min_y, self.bbox.max_x, self.bbox.max_y] {
            map_common::hash_combine(&mut seed, map_common::hash_f64(v));
        }
        map_common::hash_combine(&mut seed, self.width as u64);
        map_common::hash_combine(&mut seed, self.height as u64);
        for v in &self.values {
            map_common::hash_combine(&mut seed, v.to_bits() as u64);
        }
        seed
    }
}

/// Source of gridded fields.
pub trait DataEngine: Send + Sync {
    fn grid(&self, query: &GridQuery) -> RenderResult<Arc<GridData>>;

    /// Named `(multiplier, offset)` conversion, e.g. kelvin to celsius.
    fn unit_conversion(&self, _name: &str) -> Option<(f64, f64)> {
        None
    }

    /// Colour map text shipped with the data.
    fn color_map(&self, _name: &str) -> Option<String> {
        None
    }
}

// ============================================================================
// Shapes and places
// ============================================================================

/// What to fetch from a [`ShapeEngine`].
///
/// Configured as `{"schema": .., "table": .., "where": ..}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShapeQuery {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    #[serde(default, rename = "where")]
    pub filter: Option<String>,
}

/// Source of vector map features, returned in WGS84.
pub trait ShapeEngine: Send + Sync {
    fn shape(&self, query: &ShapeQuery) -> RenderResult<Option<Geometry<f64>>>;
}

/// A named place.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Location {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub geoid: Option<i64>,
    /// Observation station number, if the place is a station
    #[serde(default)]
    pub fmisid: Option<i64>,
}

pub trait Gazetteer: Send + Sync {
    /// All places tagged with the keyword.
    fn keyword_search(&self, keyword: &str) -> Vec<Location>;

    /// A place by its name.
    fn name_search(&self, name: &str) -> Option<Location>;

    /// A place by its geographic id.
    fn id_search(&self, geoid: i64) -> Option<Location>;
}

// ============================================================================
// Observations
// ============================================================================

/// What to fetch from an [`ObservationEngine`].
///
/// Empty `stations` and no `bbox` mean every station. The time range is
/// inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationQuery {
    pub producer: Option<String>,
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    pub stations: Vec<i64>,
    /// Lon/lat box the stations must lie in
    pub bbox: Option<BoundingBox>,
}

/// Measurements of one station at one time.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub fmisid: i64,
    pub longitude: f64,
    pub latitude: f64,
    pub time: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl Observation {
    /// A measured value, `None` when missing.
    pub fn value(&self, parameter: &str) -> Option<f64> {
        self.values.get(parameter).copied().filter(|v| v.is_finite())
    }
}

/// Source of station observations.
pub trait ObservationEngine: Send + Sync {
    /// Matching observations ordered by station and time.
    fn observations(&self, query: &ObservationQuery) -> RenderResult<Vec<Observation>>;
}

/// The engines of one request.
#[derive(Clone)]
pub struct Engines {
    pub data: Arc<dyn DataEngine>,
    pub shapes: Arc<dyn ShapeEngine>,
    pub gazetteer: Arc<dyn Gazetteer>,
    pub observations: Arc<dyn ObservationEngine>,
}

impl Engines {
    pub fn from_memory(engine: Arc<MemoryEngine>) -> Self {
        Self {
            data: engine.clone(),
            shapes: engine.clone(),
            gazetteer: engine.clone(),
            observations: engine,
        }
    }
}

impl Default for Engines {
    fn default() -> Self {
        Self::from_memory(Arc::new(MemoryEngine::default()))
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines").finish_non_exhaustive()
    }
}

// ============================================================================
// In-memory engine
// ============================================================================

/// A GeoJSON geometry in lon/lat.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ShapeGeometry {
    Point { coordinates: [f64; 2] },
    MultiPoint { coordinates: Vec<[f64; 2]> },
    LineString { coordinates: Vec<[f64; 2]> },
    MultiLineString { coordinates: Vec<Vec<[f64; 2]>> },
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<[f64; 2]>>> },
}

fn line(coords: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(coords.iter().map(|c| (c[0], c[1])).collect::<Vec<_>>())
}

fn polygon(rings: &[Vec<[f64; 2]>]) -> Polygon<f64> {
    let mut rings = rings.iter();
    let exterior = rings.next().map(|r| line(r)).unwrap_or_else(|| LineString::new(Vec::new()));
    Polygon::new(exterior, rings.map(|r| line(r)).collect())
}

impl ShapeGeometry {
    pub fn to_geometry(&self) -> Geometry<f64> {
        match self {
            Self::Point { coordinates } => Geometry::Point(Point::new(coordinates[0], coordinates[1])),
            Self::MultiPoint { coordinates } => Geometry::MultiPoint(MultiPoint::from(
                coordinates.iter().map(|c| Point::new(c[0], c[1])).collect::<Vec<_>>(),
            )),
            Self::LineString { coordinates } => Geometry::LineString(line(coordinates)),
            Self::MultiLineString { coordinates } => {
                Geometry::MultiLineString(MultiLineString::new(coordinates.iter().map(|l| line(l)).collect()))
            }
            Self::Polygon { coordinates } => Geometry::Polygon(polygon(coordinates)),
            Self::MultiPolygon { coordinates } => {
                Geometry::MultiPolygon(MultiPolygon::new(coordinates.iter().map(|p| polygon(p)).collect()))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GridEntry {
    #[serde(default)]
    producer: Option<String>,
    parameter: String,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    level: Option<f64>,
    #[serde(default = "default_grid_crs")]
    crs: String,
    bbox: [f64; 4],
    width: usize,
    height: usize,
    values: Vec<Option<f32>>,
}

fn default_grid_crs() -> String {
    "EPSG:4326".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitConversion {
    #[serde(default = "one")]
    multiplier: f64,
    #[serde(default)]
    offset: f64,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ObservationEntry {
    #[serde(default)]
    producer: Option<String>,
    fmisid: i64,
    longitude: f64,
    latitude: f64,
    time: String,
    values: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryDocument {
    #[serde(default)]
    grids: Vec<GridEntry>,
    #[serde(default)]
    shapes: BTreeMap<String, ShapeGeometry>,
    #[serde(default)]
    keywords: BTreeMap<String, Vec<Location>>,
    #[serde(default)]
    colormaps: BTreeMap<String, String>,
    #[serde(default)]
    unit_conversions: BTreeMap<String, UnitConversion>,
    #[serde(default)]
    observations: Vec<ObservationEntry>,
}

#[derive(Debug)]
struct StoredGrid {
    producer: Option<String>,
    parameter: String,
    time: Option<DateTime<Utc>>,
    level: Option<f64>,
    grid: Arc<GridData>,
}

impl StoredGrid {
    fn matches(&self, query: &GridQuery) -> bool {
        if !self.parameter.eq_ignore_ascii_case(&query.parameter) {
            return false;
        }
        if let (Some(a), Some(b)) = (&self.producer, &query.producer) {
            if a != b {
                return false;
            }
        }
        if let (Some(a), Some(b)) = (self.time, query.time) {
            if a != b {
                return false;
            }
        }
        if let (Some(a), Some(b)) = (self.level, query.level) {
            if a != b {
                return false;
            }
        }
        true
    }
}

/// Grids, shapes, places and colour maps held in memory.
///
/// Shape filters (`where`) are not evaluated, a table name selects the
/// whole shape.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    grids: Vec<StoredGrid>,
    shapes: BTreeMap<String, Geometry<f64>>,
    keywords: BTreeMap<String, Vec<Location>>,
    colormaps: BTreeMap<String, String>,
    unit_conversions: BTreeMap<String, UnitConversion>,
    observations: Vec<(Option<String>, Observation)>,
}

impl MemoryEngine {
    pub fn from_json(value: serde_json::Value) -> RenderResult<Self> {
        let doc: MemoryDocument =
            serde_json::from_value(value).map_err(|e| RenderError::from(e).trace("Invalid engine document"))?;

        let mut grids = Vec::with_capacity(doc.grids.len());
        for entry in doc.grids {
            let crs = CrsCode::parse(&entry.crs)?;
            let [x1, y1, x2, y2] = entry.bbox;
            let values = entry.values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
            let time = entry.time.as_deref().map(map_common::parse_time).transpose()?;
            let grid = GridData::new(crs, BoundingBox::new(x1, y1, x2, y2), entry.width, entry.height, values)
                .with_param("parameter", &entry.parameter)?;
            grids.push(StoredGrid {
                producer: entry.producer,
                parameter: entry.parameter,
                time,
                level: entry.level,
                grid: Arc::new(grid),
            });
        }

        let mut observations = Vec::with_capacity(doc.observations.len());
        for entry in doc.observations {
            let time = map_common::parse_time(&entry.time).map_err(RenderError::from).with_param("fmisid", entry.fmisid)?;
            let values = entry
                .values
                .into_iter()
                .map(|(name, v)| (name, v.unwrap_or(f64::NAN)))
                .collect();
            observations.push((
                entry.producer,
                Observation {
                    fmisid: entry.fmisid,
                    longitude: entry.longitude,
                    latitude: entry.latitude,
                    time,
                    values,
                },
            ));
        }
        observations.sort_by(|a, b| (a.1.fmisid, a.1.time).cmp(&(b.1.fmisid, b.1.time)));

        tracing::debug!(
            grids = grids.len(),
            shapes = doc.shapes.len(),
            keywords = doc.keywords.len(),
            observations = observations.len(),
            "loaded memory engine"
        );

        Ok(Self {
            grids,
            shapes: doc.shapes.into_iter().map(|(k, v)| (k, v.to_geometry())).collect(),
            keywords: doc.keywords,
            colormaps: doc.colormaps,
            unit_conversions: doc.unit_conversions,
            observations,
        })
    }

    pub fn from_file(path: &Path) -> RenderResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RenderError::from(e)
                .trace("Failed to read engine document")
                .with_param("path", path.display())
        })?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        Self::from_json(value).with_param("path", path.display())
    }
}

impl DataEngine for MemoryEngine {
    fn grid(&self, query: &GridQuery) -> RenderResult<Arc<GridData>> {
        self.grids
            .iter()
            .find(|g| g.matches(query))
            .map(|g| g.grid.clone())
            .ok_or_else(|| {
                RenderError::data("No data available for the parameter")
                    .with_param("parameter", &query.parameter)
                    .with_param("producer", query.producer.as_deref().unwrap_or("default"))
                    .with_param(
                        "time",
                        query.time.map(|t| map_common::to_iso_string(&t)).unwrap_or_default(),
                    )
            })
    }

    fn unit_conversion(&self, name: &str) -> Option<(f64, f64)> {
        self.unit_conversions.get(name).map(|c| (c.multiplier, c.offset))
    }

    fn color_map(&self, name: &str) -> Option<String> {
        self.colormaps.get(name).cloned()
    }
}

impl ShapeEngine for MemoryEngine {
    fn shape(&self, query: &ShapeQuery) -> RenderResult<Option<Geometry<f64>>> {
        let key = match &query.schema {
            Some(schema) => format!("{}.{}", schema, query.table),
            None => query.table.clone(),
        };
        Ok(self
            .shapes
            .get(&key)
            .or_else(|| self.shapes.get(&query.table))
            .cloned())
    }
}

impl Gazetteer for MemoryEngine {
    fn keyword_search(&self, keyword: &str) -> Vec<Location> {
        self.keywords.get(keyword).cloned().unwrap_or_default()
    }

    fn name_search(&self, name: &str) -> Option<Location> {
        self.keywords
            .values()
            .flatten()
            .find(|loc| loc.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn id_search(&self, geoid: i64) -> Option<Location> {
        self.keywords
            .values()
            .flatten()
            .find(|loc| loc.geoid == Some(geoid))
            .cloned()
    }
}

impl ObservationEngine for MemoryEngine {
    fn observations(&self, query: &ObservationQuery) -> RenderResult<Vec<Observation>> {
        Ok(self
            .observations
            .iter()
            .filter(|(producer, _)| match (producer, &query.producer) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
            .map(|(_, obs)| obs)
            .filter(|obs| obs.time >= query.starttime && obs.time <= query.endtime)
            .filter(|obs| query.stations.is_empty() || query.stations.contains(&obs.fmisid))
            .filter(|obs| {
                query
                    .bbox
                    .as_ref()
                    .map_or(true, |b| b.contains_point(obs.longitude, obs.latitude))
            })
            .cloned()
            .collect())
    }
}
