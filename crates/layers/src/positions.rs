//! Where symbols and numbers are placed.
//!
//! A [`Positions`] is configured once per layer, prepared against the data of
//! the request and then asked for pixel positions in the output box.

use crate::engine::{GridData, Location, ShapeQuery};
use crate::field::fetch_grid;
use crate::intersection::Intersections;
use crate::properties::Properties;
use crate::state::State;
use geo::{Contains, Geometry};
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, CrsCode, PixelBox, RenderError, RenderResult};
use projection::CoordinateTransformation;
use rstar::RTree;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    #[default]
    Grid,
    Data,
    Graticule,
    GraticuleFill,
    Keyword,
    LatLon,
}

impl Layout {
    pub fn parse(name: &str) -> RenderResult<Self> {
        match name {
            "grid" => Ok(Self::Grid),
            "data" => Ok(Self::Data),
            "graticule" => Ok(Self::Graticule),
            "graticulefill" => Ok(Self::GraticuleFill),
            "keyword" => Ok(Self::Keyword),
            "latlon" => Ok(Self::LatLon),
            _ => Err(RenderError::config("Unknown layout type for positions").with_param("layout", name)),
        }
    }
}

/// A generated position in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
    pub lon: f64,
    pub lat: f64,
    pub dx: i32,
    pub dy: i32,
}

/// An explicit `latlon` layout location.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatLonLocation {
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub dx: Option<i32>,
    #[serde(default)]
    pub dy: Option<i32>,
}

const DEFAULT_GRID_STEP: i32 = 20;

#[derive(Debug, Clone)]
pub struct Positions {
    pub layout: Layout,
    pub x: i32,
    pub y: i32,
    pub dx: Option<i32>,
    pub dy: Option<i32>,
    pub ddx: i32,
    pub xmargin: i32,
    pub ymargin: i32,
    pub directionoffset: i32,
    pub rotate: f64,
    pub direction: Option<String>,
    pub u: Option<String>,
    pub v: Option<String>,
    pub size: i32,
    pub step: i32,
    pub mindistance: i32,
    pub keyword: Option<String>,
    pub locations: Vec<LatLonLocation>,
    pub outside: Option<ShapeQuery>,
    pub inside: Option<ShapeQuery>,
    pub intersections: Intersections,

    outside_shape: Option<Geometry<f64>>,
    inside_shape: Option<Geometry<f64>>,
    direction_grid: Option<Arc<GridData>>,
    wind_grids: Option<(Arc<GridData>, Arc<GridData>)>,
    keyword_locations: Vec<Location>,
}

impl Default for Positions {
    fn default() -> Self {
        Self {
            layout: Layout::Grid,
            x: 5,
            y: 5,
            dx: None,
            dy: None,
            ddx: 0,
            xmargin: 0,
            ymargin: 0,
            directionoffset: 0,
            rotate: 0.0,
            direction: None,
            u: None,
            v: None,
            size: 10,
            step: 1,
            mindistance: 50,
            keyword: None,
            locations: Vec::new(),
            outside: None,
            inside: None,
            intersections: Intersections::default(),
            outside_shape: None,
            inside_shape: None,
            direction_grid: None,
            wind_grids: None,
            keyword_locations: Vec::new(),
        }
    }
}

fn take_i32(cfg: &mut ConfigObject, key: &str) -> RenderResult<Option<i32>> {
    match cfg.take_i64(key)? {
        None => Ok(None),
        Some(v) => i32::try_from(v)
            .map(Some)
            .map_err(|_| RenderError::config("Positions setting is out of range").with_param(key, v)),
    }
}

impl Positions {
    pub fn init(value: Value) -> RenderResult<Self> {
        let mut cfg = ConfigObject::from_value(value, "Positions")?;
        let mut p = Positions::default();

        if let Some(layout) = cfg.take_string("layout")? {
            p.layout = Layout::parse(&layout)?;
        }
        macro_rules! take_int {
            ($($field:ident),*) => {
                $(if let Some(v) = take_i32(&mut cfg, stringify!($field))? { p.$field = v; })*
            };
        }
        take_int!(x, y, ddx, xmargin, ymargin, directionoffset, size, step, mindistance);
        p.dx = take_i32(&mut cfg, "dx")?;
        p.dy = take_i32(&mut cfg, "dy")?;
        if let Some(rotate) = cfg.take_f64("rotate")? {
            p.rotate = rotate;
        }
        p.direction = cfg.take_string("direction")?;
        p.u = cfg.take_string("u")?;
        p.v = cfg.take_string("v")?;
        p.keyword = cfg.take_string("keyword")?;
        if let Some(locations) = cfg.take_value("locations") {
            p.locations = serde_json::from_value(locations)
                .map_err(|e| RenderError::from(e).trace("Invalid positions locations"))?;
        }
        p.outside = cfg.take_parsed("outside")?;
        p.inside = cfg.take_parsed("inside")?;
        if let Some(intersect) = cfg.take_value("intersect") {
            p.intersections = Intersections::init(intersect)?;
        }
        cfg.finish("Positions")?;

        p.validate()?;
        Ok(p)
    }

    fn validate(&self) -> RenderResult<()> {
        if self.size <= 0 {
            return Err(RenderError::config("Positions size must be positive").with_param("size", self.size));
        }
        if self.step <= 0 {
            return Err(RenderError::config("Positions step must be positive").with_param("step", self.step));
        }
        if self.step > self.size {
            return Err(RenderError::config("Positions step must not exceed size")
                .with_param("step", self.step)
                .with_param("size", self.size));
        }
        if 180 % self.step != 0 {
            return Err(RenderError::config("Positions step must divide 180 evenly").with_param("step", self.step));
        }
        if self.mindistance < 2 {
            return Err(
                RenderError::config("Positions mindistance must be at least 2").with_param("mindistance", self.mindistance)
            );
        }

        if self.layout == Layout::Grid {
            let dx = self.dx.unwrap_or(DEFAULT_GRID_STEP);
            let dy = self.dy.unwrap_or(DEFAULT_GRID_STEP);
            if dx <= 0 || dy <= 0 {
                return Err(RenderError::config("Positions dx and dy must be positive")
                    .with_param("dx", dx)
                    .with_param("dy", dy));
            }
            if self.ddx.abs() >= dx {
                return Err(RenderError::config("ddx must be smaller than dx")
                    .with_param("ddx", self.ddx)
                    .with_param("dx", dx));
            }
        }

        match (&self.direction, &self.u, &self.v) {
            (Some(_), None, None) | (None, Some(_), Some(_)) | (None, None, None) => {}
            (Some(_), _, _) => return Err(RenderError::config("Positions cannot use both direction and u,v")),
            _ => return Err(RenderError::config("Positions requires both u and v components")),
        }
        if self.directionoffset != 0 && self.direction.is_none() && self.u.is_none() {
            return Err(RenderError::config("directionoffset requires direction or u and v"));
        }

        for location in &self.locations {
            if location.longitude.is_none() || location.latitude.is_none() {
                return Err(RenderError::config("Positions location must have both longitude and latitude"));
            }
        }
        if self.layout == Layout::Keyword && self.keyword.as_deref().map_or(true, str::is_empty) {
            return Err(RenderError::config("No keyword given for keyword layout"));
        }
        Ok(())
    }

    /// Grow the margins to at least the given values.
    pub fn add_margins(&mut self, xmargin: i32, ymargin: i32) {
        self.xmargin = self.xmargin.max(xmargin);
        self.ymargin = self.ymargin.max(ymargin);
    }

    /// Fetch everything the point generation needs from the engines.
    pub fn prepare(&mut self, state: &State, properties: &Properties) -> RenderResult<()> {
        let shapes = &state.engines().shapes;
        if let Some(query) = &self.outside {
            self.outside_shape = shapes.shape(query)?.filter(|g| !renderer::geometry::is_empty(g));
        }
        if let Some(query) = &self.inside {
            match shapes.shape(query)? {
                Some(g) if !renderer::geometry::is_empty(&g) => self.inside_shape = Some(g),
                _ => {
                    return Err(RenderError::data("Positions received empty inside-shape")
                        .with_param("table", &query.table))
                }
            }
        }

        self.intersections.fetch(state, properties)?;

        let fetch_direction = |name: &str| {
            fetch_grid(state, properties, name, None, None).map_err(|e| {
                RenderError::data(format!("Parameter '{}' is not available for position selection", name))
                    .with_param("reason", e.message())
            })
        };
        if self.directionoffset != 0 {
            if let Some(direction) = &self.direction {
                self.direction_grid = Some(fetch_direction(direction)?);
            } else if let (Some(u), Some(v)) = (&self.u, &self.v) {
                self.wind_grids = Some((fetch_direction(u)?, fetch_direction(v)?));
            }
        }

        if self.layout == Layout::Keyword {
            let keyword = self.keyword.as_deref().unwrap_or_default();
            self.keyword_locations = state.gazetteer().keyword_search(keyword);
            tracing::debug!(keyword = %keyword, locations = self.keyword_locations.len(), "resolved keyword");
        }
        Ok(())
    }

    fn inside_shapes(&self, lon: f64, lat: f64) -> bool {
        let point = geo::Point::new(lon, lat);
        if self.outside_shape.as_ref().is_some_and(|s| s.contains(&point)) {
            return false;
        }
        if self.inside_shape.as_ref().is_some_and(|s| !s.contains(&point)) {
            return false;
        }
        true
    }

    /// Shape filters use lon/lat, intersections the world coordinates of
    /// the output CRS.
    fn inside(&self, lon: f64, lat: f64, x: f64, y: f64) -> bool {
        self.inside_shapes(lon, lat) && self.intersections.inside(x, y)
    }

    /// Generate the positions for an output box in `crs`.
    pub fn get_points(&self, data: Option<&GridData>, crs: CrsCode, pbox: &PixelBox) -> RenderResult<Vec<Point>> {
        let mut points = match self.layout {
            Layout::Grid => self.grid_points(crs, pbox)?,
            Layout::Data => self.data_points(data, crs, pbox),
            Layout::Graticule => self.graticule_points(crs, pbox),
            Layout::GraticuleFill => self.graticule_fill_points(crs, pbox),
            Layout::Keyword => {
                let locations: Vec<(f64, f64, i32, i32)> = self
                    .keyword_locations
                    .iter()
                    .map(|l| (l.longitude, l.latitude, 0, 0))
                    .collect();
                self.location_points(&locations, crs, pbox)
            }
            Layout::LatLon => {
                let locations: Vec<(f64, f64, i32, i32)> = self
                    .locations
                    .iter()
                    .filter_map(|l| Some((l.longitude?, l.latitude?, l.dx.unwrap_or(0), l.dy.unwrap_or(0))))
                    .collect();
                self.location_points(&locations, crs, pbox)
            }
        };
        self.apply_direction_offsets(&mut points);
        tracing::debug!(layout = ?self.layout, points = points.len(), "generated positions");
        Ok(points)
    }

    fn grid_points(&self, crs: CrsCode, pbox: &PixelBox) -> RenderResult<Vec<Point>> {
        let dx = self.dx.unwrap_or(DEFAULT_GRID_STEP);
        let dy = self.dy.unwrap_or(DEFAULT_GRID_STEP);
        if dx <= 0 || dy <= 0 {
            return Err(RenderError::config("Positions dx and dy must be positive"));
        }
        if self.ddx.abs() >= dx {
            return Err(RenderError::config("ddx must be smaller than dx").with_param("ddx", self.ddx));
        }

        let to_wgs84 = CoordinateTransformation::to_wgs84(crs);
        let width = pbox.width as i32;
        let height = pbox.height as i32;

        let mut xstart = self.x;
        while xstart - dx >= -self.xmargin {
            xstart -= dx;
        }
        let mut ystart = self.y;
        while ystart - dy >= -self.ymargin {
            ystart -= dy;
        }
        xstart -= self.ddx;

        let mut points = Vec::new();
        let mut row = 0;
        let mut ypos = ystart;
        while ypos < height + self.ymargin {
            if row % 2 == 0 {
                xstart += self.ddx;
            } else {
                xstart -= self.ddx;
            }
            let mut xpos = xstart;
            while xpos < width + self.xmargin {
                let (wx, wy) = pbox.itransform(xpos as f64, ypos as f64);
                if let Some((lon, lat)) = to_wgs84.transform(wx, wy) {
                    if self.inside(lon, lat, wx, wy) {
                        points.push(Point {
                            x: xpos,
                            y: ypos,
                            lon,
                            lat,
                            dx: 0,
                            dy: 0,
                        });
                    }
                }
                xpos += dx;
            }
            ypos += dy;
            row += 1;
        }
        Ok(points)
    }

    fn data_points(&self, data: Option<&GridData>, crs: CrsCode, pbox: &PixelBox) -> Vec<Point> {
        let Some(grid) = data else {
            return Vec::new();
        };
        let to_output = CoordinateTransformation::new(grid.crs, crs);
        let to_wgs84 = CoordinateTransformation::to_wgs84(grid.crs);
        let mut points = Vec::new();
        for j in 0..grid.height {
            for i in 0..grid.width {
                let (gx, gy) = grid.grid_to_world(i as f64, j as f64);
                let (Some((wx, wy)), Some((lon, lat))) = (to_output.transform(gx, gy), to_wgs84.transform(gx, gy))
                else {
                    continue;
                };
                if !self.inside(lon, lat, wx, wy) {
                    continue;
                }
                let (px, py) = pbox.transform(wx, wy);
                points.push(Point {
                    x: px.round() as i32,
                    y: py.round() as i32,
                    lon,
                    lat,
                    dx: self.dx.unwrap_or(0),
                    dy: self.dy.unwrap_or(0),
                });
            }
        }
        points
    }

    fn graticule_points(&self, crs: CrsCode, pbox: &PixelBox) -> Vec<Point> {
        let from_wgs84 = CoordinateTransformation::from_wgs84(crs);
        let mut points = Vec::new();
        for lat in (-90i32..=90).step_by(self.step as usize) {
            for lon in (-180i32..180).step_by(self.step as usize) {
                if lon % self.size == 0 || lat % self.size == 0 {
                    let (lon, lat) = (lon as f64, lat as f64);
                    if let Some((wx, wy)) = from_wgs84.transform(lon, lat) {
                        let (px, py) = pbox.transform(wx, wy);
                        if self.inside(lon, lat, wx, wy) {
                            points.push(Point {
                                x: px.round() as i32,
                                y: py.round() as i32,
                                lon,
                                lat,
                                dx: self.dx.unwrap_or(0),
                                dy: self.dy.unwrap_or(0),
                            });
                        }
                    }
                }
                // Poles once
                if lat.abs() == 90 {
                    break;
                }
            }
        }
        points
    }

    fn graticule_fill_points(&self, crs: CrsCode, pbox: &PixelBox) -> Vec<Point> {
        let from_wgs84 = CoordinateTransformation::from_wgs84(crs);
        let project = |lon: f64, lat: f64| {
            let (wx, wy) = from_wgs84.transform(lon, lat)?;
            let (px, py) = pbox.transform(wx, wy);
            Some((wx, wy, px, py))
        };
        let mindistance = self.mindistance as f64;
        let size = self.size as f64;
        let mut points: Vec<Point> = Vec::new();
        let mut selected: RTree<[f64; 2]> = RTree::new();

        let mut accept = |points: &mut Vec<Point>, lon: f64, lat: f64| {
            let Some((wx, wy, px, py)) = project(lon, lat) else {
                return;
            };
            if !self.inside(lon, lat, wx, wy) {
                return;
            }
            let xy = [px, py];
            let limit = mindistance * mindistance;
            let crowded = selected
                .locate_within_distance(xy, limit)
                .any(|p| (p[0] - px).powi(2) + (p[1] - py).powi(2) < limit);
            if crowded {
                return;
            }
            selected.insert(xy);
            points.push(Point {
                x: px.round() as i32,
                y: py.round() as i32,
                lon,
                lat,
                dx: self.dx.unwrap_or(0),
                dy: self.dy.unwrap_or(0),
            });
        };

        for lat in (-90i32..90).step_by(self.size as usize) {
            for lon in (-180i32..180).step_by(self.size as usize) {
                let (lon, lat) = (lon as f64, lat as f64);
                let corners = [
                    project(lon, lat),
                    project(lon + size, lat),
                    project(lon + size, lat + size),
                    project(lon, lat + size),
                ];
                let Some(corners) = corners
                    .into_iter()
                    .map(|c| c.map(|(_, _, px, py)| (px, py)))
                    .collect::<Option<Vec<_>>>()
                else {
                    continue;
                };
                if !overlaps(&corners, pbox) {
                    continue;
                }

                let edge = |a: usize, b: usize| {
                    let (x1, y1) = corners[a];
                    let (x2, y2) = corners[b];
                    ((x2 - x1).hypot(y2 - y1) / mindistance).floor() as usize
                };
                let nbottom = edge(0, 1);
                let nright = edge(1, 2);
                let ntop = edge(2, 3);
                let nleft = edge(3, 0);
                let nparallel = nbottom.min(ntop);
                let nmeridian = nleft.min(nright);

                for j in 0..nleft {
                    accept(&mut points, lon, lat + j as f64 / nleft as f64 * size);
                }
                if lat > -90.0 {
                    for i in 1..nbottom {
                        accept(&mut points, lon + i as f64 / nbottom as f64 * size, lat);
                    }
                }
                for i in 1..nparallel {
                    for j in 1..nmeridian {
                        accept(
                            &mut points,
                            lon + i as f64 / nparallel as f64 * size,
                            lat + j as f64 / nmeridian as f64 * size,
                        );
                    }
                }
            }
        }

        accept(&mut points, 0.0, 90.0);
        points
    }

    fn location_points(&self, locations: &[(f64, f64, i32, i32)], crs: CrsCode, pbox: &PixelBox) -> Vec<Point> {
        let from_wgs84 = CoordinateTransformation::from_wgs84(crs);
        let mut points = Vec::new();
        for &(lon, lat, dx, dy) in locations {
            let Some((wx, wy)) = from_wgs84.transform(lon, lat) else {
                continue;
            };
            if !self.inside(lon, lat, wx, wy) {
                continue;
            }
            let (px, py) = pbox.transform(wx, wy);
            points.push(Point {
                x: px.round() as i32,
                y: py.round() as i32,
                lon,
                lat,
                dx: self.dx.unwrap_or(0) + dx,
                dy: self.dy.unwrap_or(0) + dy,
            });
        }
        points
    }

    fn apply_direction_offsets(&self, points: &mut [Point]) {
        if self.directionoffset == 0 {
            return;
        }
        let offset = self.directionoffset as f64;
        let rotate = self.rotate;
        let shift = |point: &mut Point, dir: f64| {
            let angle = (dir + 90.0 + rotate).to_radians();
            point.x += (offset * angle.cos()).round() as i32;
            point.y += (offset * angle.sin()).round() as i32;
        };

        if let Some(grid) = &self.direction_grid {
            for point in points.iter_mut() {
                if let Some(dir) = grid.grid_values_at(point.lon, point.lat) {
                    shift(point, dir);
                }
            }
        } else if let Some((ugrid, vgrid)) = &self.wind_grids {
            for point in points.iter_mut() {
                let (Some(u), Some(v)) = (
                    ugrid.grid_values_at(point.lon, point.lat),
                    vgrid.grid_values_at(point.lon, point.lat),
                ) else {
                    continue;
                };
                if u == 0.0 && v == 0.0 {
                    continue;
                }
                let dir = (180.0 + u.atan2(v).to_degrees()) % 360.0;
                shift(point, dir);
            }
        }
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.layout);
        hash_combine(
            &mut seed,
            hash_value(&(
                self.x,
                self.y,
                self.dx,
                self.dy,
                self.ddx,
                self.xmargin,
                self.ymargin,
                self.directionoffset,
            )),
        );
        hash_combine(&mut seed, hash_f64(self.rotate));
        hash_combine(&mut seed, hash_value(&(&self.direction, &self.u, &self.v)));
        hash_combine(&mut seed, hash_value(&(self.size, self.step, self.mindistance)));
        hash_combine(&mut seed, hash_value(&self.keyword));
        for location in &self.locations {
            hash_combine(&mut seed, location.longitude.map_or(0, hash_f64));
            hash_combine(&mut seed, location.latitude.map_or(0, hash_f64));
            hash_combine(&mut seed, hash_value(&(location.dx, location.dy)));
        }
        hash_combine(&mut seed, hash_value(&self.outside));
        hash_combine(&mut seed, hash_value(&self.inside));
        hash_combine(&mut seed, self.intersections.hash_value());
        seed
    }
}

/// Whether the pixel bounding box of the corners has a positive area inside
/// the image.
fn overlaps(corners: &[(f64, f64)], pbox: &PixelBox) -> bool {
    let (mut xmin, mut ymin, mut xmax, mut ymax) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for &(x, y) in corners {
        xmin = xmin.min(x);
        ymin = ymin.min(y);
        xmax = xmax.max(x);
        ymax = ymax.max(y);
    }
    let w = pbox.width as f64;
    let h = pbox.height as f64;
    let xmin = xmin.clamp(0.0, w);
    let xmax = xmax.clamp(0.0, w);
    let ymin = ymin.clamp(0.0, h);
    let ymax = ymax.clamp(0.0, h);
    (xmax - xmin) * (ymax - ymin) > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engines, MemoryEngine};
    use map_common::BoundingBox;
    use serde_json::json;

    fn pbox() -> PixelBox {
        PixelBox::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 100, 100)
    }

    fn positions(value: Value) -> Positions {
        Positions::init(value).unwrap()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    #[test]
    fn test_defaults() {
        let p = positions(json!({}));
        assert_eq!(p.layout, Layout::Grid);
        assert_eq!((p.x, p.y, p.size, p.step, p.mindistance), (5, 5, 10, 1, 50));
    }

    #[test]
    fn test_invalid_settings() {
        for bad in [
            json!({"layout": "spiral"}),
            json!({"colour": "red"}),
            json!({"ddx": 20}),
            json!({"dx": 0}),
            json!({"size": 0}),
            json!({"step": 0}),
            json!({"step": 20, "size": 10}),
            json!({"step": 7, "size": 10}),
            json!({"mindistance": 1}),
            json!({"direction": "WindDirection", "u": "U"}),
            json!({"u": "U"}),
            json!({"directionoffset": 5}),
            json!({"layout": "keyword"}),
            json!({"layout": "latlon", "locations": [{"longitude": 25}]}),
        ] {
            assert!(Positions::init(bad.clone()).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_add_margins_keeps_larger() {
        let mut p = positions(json!({"xmargin": 10}));
        p.add_margins(5, 7);
        assert_eq!((p.xmargin, p.ymargin), (10, 7));
    }

    // ========================================================================
    // Layouts
    // ========================================================================

    #[test]
    fn test_grid_rows_are_staggered() {
        let p = positions(json!({"x": 5, "y": 5, "dx": 20, "dy": 20, "ddx": 5}));
        let points = p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        assert!(!points.is_empty());
        assert!(points.iter().all(|pt| (0..100).contains(&pt.x) && (0..100).contains(&pt.y)));

        let first_x = |row_y: i32| points.iter().filter(|pt| pt.y == row_y).map(|pt| pt.x).min().unwrap();
        assert_eq!(first_x(5), 5);
        assert_eq!(first_x(25), 0);
        assert_eq!(first_x(45), 5);
        assert_eq!(points.iter().filter(|pt| pt.y == 5).count(), 5);
    }

    #[test]
    fn test_grid_start_is_pulled_back_into_margin() {
        let p = positions(json!({"x": 45, "y": 45, "dx": 20, "dy": 20, "xmargin": 20, "ymargin": 0}));
        let points = p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        assert_eq!(points.iter().map(|pt| pt.x).min(), Some(-15));
        assert_eq!(points.iter().map(|pt| pt.y).min(), Some(5));
    }

    #[test]
    fn test_grid_points_carry_lonlat() {
        let p = positions(json!({"x": 50, "y": 50, "dx": 90, "dy": 90}));
        let points = p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        let center = points.iter().find(|pt| pt.x == 50 && pt.y == 50).unwrap();
        assert!((center.lon - 5.0).abs() < 1e-9);
        assert!((center.lat - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_data_layout_without_data_is_empty() {
        let p = positions(json!({"layout": "data"}));
        assert!(p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap().is_empty());
    }

    #[test]
    fn test_data_layout_one_point_per_node() {
        let grid = GridData::new(CrsCode::Epsg4326, BoundingBox::new(0.0, 0.0, 10.0, 10.0), 3, 3, vec![0.0; 9]).unwrap();
        let p = positions(json!({"layout": "data", "dx": 2, "dy": -3}));
        let points = p.get_points(Some(&grid), CrsCode::Epsg4326, &pbox()).unwrap();
        assert_eq!(points.len(), 9);
        assert!(points.iter().any(|pt| pt.x == 50 && pt.y == 50));
        assert!(points.iter().all(|pt| pt.dx == 2 && pt.dy == -3));
    }

    #[test]
    fn test_graticule_poles_once() {
        let global = PixelBox::new(BoundingBox::new(-180.0, -91.0, 180.0, 91.0), 360, 182);
        let p = positions(json!({"layout": "graticule", "size": 30, "step": 30}));
        let points = p.get_points(None, CrsCode::Epsg4326, &global).unwrap();
        assert_eq!(points.iter().filter(|pt| pt.lat == 90.0).count(), 1);
        assert_eq!(points.iter().filter(|pt| pt.lat == -90.0).count(), 1);
        assert!(points.iter().all(|pt| pt.lon as i32 % 30 == 0 || pt.lat as i32 % 30 == 0));
    }

    #[test]
    fn test_graticule_step_densifies_lines() {
        let p = positions(json!({"layout": "graticule", "size": 10, "step": 5}));
        let points = p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        // (0,5) is on the 0 meridian, (5,5) is on neither line
        assert!(points.iter().any(|pt| pt.lon == 0.0 && pt.lat == 5.0));
        assert!(!points.iter().any(|pt| pt.lon == 5.0 && pt.lat == 5.0));
    }

    #[test]
    fn test_graticule_fill_respects_mindistance() {
        let europe = PixelBox::new(BoundingBox::new(-10.0, 35.0, 40.0, 70.0), 500, 350);
        let p = positions(json!({"layout": "graticulefill", "size": 10, "mindistance": 30}));
        let points = p.get_points(None, CrsCode::Epsg4326, &europe).unwrap();
        assert!(points.len() > 4);
        // Thinning is done before rounding to whole pixels
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                assert!(((a.x - b.x) as f64).hypot((a.y - b.y) as f64) > 28.5);
            }
        }
    }

    #[test]
    fn test_dense_graticule_fill() {
        let europe = PixelBox::new(BoundingBox::new(-10.0, 35.0, 40.0, 70.0), 800, 560);
        let p = positions(json!({"layout": "graticulefill", "size": 1, "mindistance": 2}));
        let points = p.get_points(None, CrsCode::Epsg4326, &europe).unwrap();
        assert!(points.len() > 50_000);
        let unique: std::collections::BTreeSet<(i32, i32)> = points.iter().map(|pt| (pt.x, pt.y)).collect();
        assert_eq!(unique.len(), points.len());
    }

    #[test]
    fn test_graticule_is_not_limited_to_image() {
        let p = positions(json!({"layout": "graticule", "size": 10, "step": 10}));
        let points = p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        assert!(points.iter().any(|pt| pt.x < 0 || pt.x >= 100));
        assert_eq!(points.iter().filter(|pt| pt.lat.abs() == 90.0).count(), 2);
    }

    #[test]
    fn test_latlon_offsets_add_up() {
        let p = positions(json!({
            "layout": "latlon",
            "dx": 3,
            "locations": [{"longitude": 5, "latitude": 5, "dx": 2, "dy": 1}, {"longitude": 1, "latitude": 9}]
        }));
        let points = p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!((points[0].x, points[0].y, points[0].dx, points[0].dy), (50, 50, 5, 1));
        assert_eq!((points[1].x, points[1].y, points[1].dx), (10, 10, 3));
    }

    #[test]
    fn test_keyword_layout_uses_gazetteer() {
        let engine = MemoryEngine::from_json(json!({
            "keywords": {"cities": [
                {"name": "A", "longitude": 2, "latitude": 2},
                {"name": "B", "longitude": 8, "latitude": 8}
            ]}
        }))
        .unwrap();
        let state = State::new(Engines::from_memory(Arc::new(engine)));
        let mut p = positions(json!({"layout": "keyword", "keyword": "cities"}));
        p.prepare(&state, &Properties::default()).unwrap();
        let points = p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!((points[1].x, points[1].y), (80, 20));
    }

    // ========================================================================
    // Filtering and offsets
    // ========================================================================

    fn shape_state() -> State {
        let engine = MemoryEngine::from_json(json!({
            "shapes": {"west": {"type": "Polygon", "coordinates": [[[0, 0], [5, 0], [5, 10], [0, 10], [0, 0]]]}}
        }))
        .unwrap();
        State::new(Engines::from_memory(Arc::new(engine)))
    }

    #[test]
    fn test_inside_and_outside_shapes() {
        let state = shape_state();
        let mut inside = positions(json!({"dx": 10, "dy": 10, "inside": {"table": "west"}}));
        inside.prepare(&state, &Properties::default()).unwrap();
        let points = inside.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        assert!(!points.is_empty());
        assert!(points.iter().all(|pt| pt.lon < 5.0));

        let mut outside = positions(json!({"dx": 10, "dy": 10, "outside": {"table": "west"}}));
        outside.prepare(&state, &Properties::default()).unwrap();
        let points = outside.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        assert!(!points.is_empty());
        assert!(points.iter().all(|pt| pt.lon > 5.0));
    }

    #[test]
    fn test_missing_inside_shape_is_data_error() {
        let state = shape_state();
        let mut p = positions(json!({"inside": {"table": "east"}}));
        let err = p.prepare(&state, &Properties::default()).unwrap_err();
        assert_eq!(err.kind(), map_common::ErrorKind::Data);
    }

    #[test]
    fn test_direction_offsets_from_wind_components() {
        let mut p = positions(json!({"layout": "latlon", "locations": [{"longitude": 5, "latitude": 5}]}));
        let grid = |v: f32| {
            Arc::new(
                GridData::new(CrsCode::Epsg4326, BoundingBox::new(0.0, 0.0, 10.0, 10.0), 2, 2, vec![v; 4]).unwrap(),
            )
        };
        p.directionoffset = 10;
        // Wind from the south: u = 0, v = 1 gives direction 180
        p.wind_grids = Some((grid(0.0), grid(1.0)));
        let points = p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        assert_eq!((points[0].x, points[0].y), (50, 40));

        // Calm wind is not moved
        p.wind_grids = Some((grid(0.0), grid(0.0)));
        let points = p.get_points(None, CrsCode::Epsg4326, &pbox()).unwrap();
        assert_eq!((points[0].x, points[0].y), (50, 50));
    }

    #[test]
    fn test_missing_direction_parameter_is_data_error() {
        let state = State::default();
        let mut p = positions(json!({"direction": "WindDirection", "directionoffset": 5}));
        let err = p.prepare(&state, &Properties::default()).unwrap_err();
        assert_eq!(err.kind(), map_common::ErrorKind::Data);
        assert!(err.message().contains("WindDirection"));
    }

    #[test]
    fn test_hash_changes_with_layout() {
        let a = positions(json!({"layout": "grid"}));
        let b = positions(json!({"layout": "graticule"}));
        assert_ne!(a.hash_value(), b.hash_value());
    }
}
