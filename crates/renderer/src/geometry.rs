//! Geometry transforms, clipping and serialization.
//!
//! Geometries are kept in world coordinates of the rendering CRS. Output is
//! produced as SVG path data in pixel coordinates, or as GeoJSON / TopoJSON
//! coordinate fragments in WGS84.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;

use geo::orient::{Direction, Orient};
use geo::{
    Area, BooleanOps, Contains, Coord, Geometry, GeometryCollection, LineString, MultiLineString,
    MultiPoint, MultiPolygon, Point, Polygon, Rect,
};
use map_common::{BoundingBox, CrsCode, PixelBox, RenderError, RenderResult};
use projection::CoordinateTransformation;
use serde_json::Value;

/// Serialization format of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum OutputFormat {
    #[default]
    Svg,
    GeoJson,
    TopoJson,
}

impl OutputFormat {
    pub fn parse(s: &str) -> RenderResult<Self> {
        match s {
            "svg" => Ok(Self::Svg),
            "geojson" => Ok(Self::GeoJson),
            "topojson" => Ok(Self::TopoJson),
            other => Err(RenderError::config("Unknown product type").with_param("type", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::GeoJson => "geojson",
            Self::TopoJson => "topojson",
        }
    }
}

/// Geometry type name as used by the output format.
pub fn geometry_name(geom: &Geometry<f64>, format: OutputFormat) -> &'static str {
    let json = format != OutputFormat::Svg;
    match (geom, json) {
        (Geometry::Point(_), true) => "Point",
        (Geometry::Point(_), false) => "POINT",
        (Geometry::Line(_) | Geometry::LineString(_), true) => "LineString",
        (Geometry::Line(_) | Geometry::LineString(_), false) => "LINESTRING",
        (Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_), true) => "Polygon",
        (Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_), false) => "POLYGON",
        (Geometry::MultiPoint(_), true) => "MultiPoint",
        (Geometry::MultiPoint(_), false) => "MULTIPOINT",
        (Geometry::MultiLineString(_), true) => "MultiLineString",
        (Geometry::MultiLineString(_), false) => "MULTILINESTRING",
        (Geometry::MultiPolygon(_), true) => "MultiPolygon",
        (Geometry::MultiPolygon(_), false) => "MULTIPOLYGON",
        (Geometry::GeometryCollection(_), true) => "GeometryCollection",
        (Geometry::GeometryCollection(_), false) => "GEOMETRYCOLLECTION",
    }
}

// ============================================================================
// Transforms
// ============================================================================

fn map_line<F>(line: &LineString<f64>, f: &F) -> LineString<f64>
where
    F: Fn(Coord<f64>) -> Option<Coord<f64>>,
{
    LineString::new(line.0.iter().filter_map(|c| f(*c)).collect())
}

fn map_ring<F>(ring: &LineString<f64>, f: &F) -> Option<LineString<f64>>
where
    F: Fn(Coord<f64>) -> Option<Coord<f64>>,
{
    let mut out = map_line(ring, f);
    out.close();
    (out.0.len() >= 4).then_some(out)
}

fn map_polygon<F>(polygon: &Polygon<f64>, f: &F) -> Option<Polygon<f64>>
where
    F: Fn(Coord<f64>) -> Option<Coord<f64>>,
{
    let exterior = map_ring(polygon.exterior(), f)?;
    let interiors = polygon.interiors().iter().filter_map(|r| map_ring(r, f)).collect();
    Some(Polygon::new(exterior, interiors))
}

/// Map every coordinate, dropping the ones `f` rejects together with any
/// ring or line left degenerate.
pub fn map_points<F>(geom: &Geometry<f64>, f: &F) -> Geometry<f64>
where
    F: Fn(Coord<f64>) -> Option<Coord<f64>>,
{
    match geom {
        Geometry::Point(p) => match f(p.0) {
            Some(c) => Geometry::Point(Point(c)),
            None => Geometry::MultiPoint(MultiPoint::new(Vec::new())),
        },
        Geometry::Line(l) => map_points(&Geometry::LineString(LineString::from(*l)), f),
        Geometry::LineString(l) => {
            let line = map_line(l, f);
            if line.0.len() >= 2 {
                Geometry::LineString(line)
            } else {
                Geometry::MultiLineString(MultiLineString::new(Vec::new()))
            }
        }
        Geometry::Rect(r) => map_points(&Geometry::Polygon(r.to_polygon()), f),
        Geometry::Triangle(t) => map_points(&Geometry::Polygon(t.to_polygon()), f),
        Geometry::Polygon(p) => match map_polygon(p, f) {
            Some(p) => Geometry::Polygon(p),
            None => Geometry::MultiPolygon(MultiPolygon::new(Vec::new())),
        },
        Geometry::MultiPoint(mp) => {
            Geometry::MultiPoint(MultiPoint::new(mp.0.iter().filter_map(|p| f(p.0).map(Point)).collect()))
        }
        Geometry::MultiLineString(ml) => Geometry::MultiLineString(MultiLineString::new(
            ml.0.iter()
                .map(|l| map_line(l, f))
                .filter(|l| l.0.len() >= 2)
                .collect(),
        )),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(MultiPolygon::new(
            mp.0.iter().filter_map(|p| map_polygon(p, f)).collect(),
        )),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection(
            gc.0.iter().map(|g| map_points(g, f)).collect(),
        )),
    }
}

/// Reproject a geometry. Points that fail to transform are dropped.
pub fn transform_geometry(geom: &Geometry<f64>, transformation: &CoordinateTransformation) -> Geometry<f64> {
    if transformation.is_identity() {
        return geom.clone();
    }
    map_points(geom, &|c| transformation.transform(c.x, c.y).map(|(x, y)| Coord { x, y }))
}

/// World coordinates to pixel coordinates.
pub fn to_pixels(geom: &Geometry<f64>, pixel_box: &PixelBox) -> Geometry<f64> {
    map_points(geom, &|c| {
        let (x, y) = pixel_box.transform(c.x, c.y);
        Some(Coord { x, y })
    })
}

/// True when the geometry has no coordinates left.
pub fn is_empty(geom: &Geometry<f64>) -> bool {
    match geom {
        Geometry::Point(_) | Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => false,
        Geometry::LineString(l) => l.0.is_empty(),
        Geometry::Polygon(p) => p.exterior().0.is_empty(),
        Geometry::MultiPoint(mp) => mp.0.is_empty(),
        Geometry::MultiLineString(ml) => ml.0.iter().all(|l| l.0.is_empty()),
        Geometry::MultiPolygon(mp) => mp.0.is_empty(),
        Geometry::GeometryCollection(gc) => gc.0.iter().all(is_empty),
    }
}

/// A multi geometry with exactly one part as that part, so that a single
/// band or line is reported as `Polygon` or `LineString`.
pub fn single_part(geom: &Geometry<f64>) -> Cow<'_, Geometry<f64>> {
    match geom {
        Geometry::MultiPolygon(mp) if mp.0.len() == 1 => Cow::Owned(Geometry::Polygon(mp.0[0].clone())),
        Geometry::MultiLineString(ml) if ml.0.len() == 1 => Cow::Owned(Geometry::LineString(ml.0[0].clone())),
        Geometry::MultiPoint(mp) if mp.0.len() == 1 => Cow::Owned(Geometry::Point(mp.0[0])),
        _ => Cow::Borrowed(geom),
    }
}

// ============================================================================
// Clipping
// ============================================================================

fn as_multipolygon(geom: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geom {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Some(MultiPolygon::new(vec![t.to_polygon()])),
        _ => None,
    }
}

/// Intersect a geometry with an area. Lines are cut, points are filtered.
pub fn clip(geom: &Geometry<f64>, area: &MultiPolygon<f64>) -> Geometry<f64> {
    if let Some(mp) = as_multipolygon(geom) {
        return Geometry::MultiPolygon(mp.intersection(area));
    }
    match geom {
        Geometry::Point(p) => {
            if area.contains(p) {
                Geometry::Point(*p)
            } else {
                Geometry::MultiPoint(MultiPoint::new(Vec::new()))
            }
        }
        Geometry::MultiPoint(mp) => {
            Geometry::MultiPoint(MultiPoint::new(mp.0.iter().filter(|p| area.contains(*p)).copied().collect()))
        }
        Geometry::Line(l) => clip(&Geometry::LineString(LineString::from(*l)), area),
        Geometry::LineString(l) => {
            Geometry::MultiLineString(area.clip(&MultiLineString::new(vec![l.clone()]), false))
        }
        Geometry::MultiLineString(ml) => Geometry::MultiLineString(area.clip(ml, false)),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection(
            gc.0.iter().map(|g| clip(g, area)).collect(),
        )),
        _ => geom.clone(),
    }
}

pub fn box_polygon(bbox: &BoundingBox) -> MultiPolygon<f64> {
    let rect = Rect::new(
        Coord { x: bbox.min_x, y: bbox.min_y },
        Coord { x: bbox.max_x, y: bbox.max_y },
    );
    MultiPolygon::new(vec![rect.to_polygon()])
}

pub fn clip_to_box(geom: &Geometry<f64>, bbox: &BoundingBox) -> Geometry<f64> {
    clip(geom, &box_polygon(bbox))
}

/// Drop polygons and holes whose area is below `min_area`.
pub fn remove_small_rings(mp: MultiPolygon<f64>, min_area: f64) -> MultiPolygon<f64> {
    if min_area <= 0.0 {
        return mp;
    }
    MultiPolygon::new(
        mp.0.into_iter()
            .filter(|p| Polygon::new(p.exterior().clone(), vec![]).unsigned_area() >= min_area)
            .map(|p| {
                let (exterior, interiors) = p.into_inner();
                let interiors = interiors
                    .into_iter()
                    .filter(|r| Polygon::new(r.clone(), vec![]).unsigned_area() >= min_area)
                    .collect();
                Polygon::new(exterior, interiors)
            })
            .collect(),
    )
}

/// Polygon rings as lines.
pub fn boundaries(geom: &Geometry<f64>) -> Geometry<f64> {
    match as_multipolygon(geom) {
        Some(mp) => Geometry::MultiLineString(MultiLineString::new(
            mp.0.iter()
                .flat_map(|p| std::iter::once(p.exterior().clone()).chain(p.interiors().iter().cloned()))
                .collect(),
        )),
        None => geom.clone(),
    }
}

// ============================================================================
// SVG
// ============================================================================

/// Fixed decimals with trailing zeros removed.
pub fn format_number(value: f64, precision: usize) -> String {
    let mut s = format!("{:.*}", precision, value);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

fn svg_line(out: &mut String, coords: &[Coord<f64>], close: bool, precision: usize) {
    let coords = if close && coords.len() > 1 && coords.first() == coords.last() {
        &coords[..coords.len() - 1]
    } else {
        coords
    };
    for (i, c) in coords.iter().enumerate() {
        out.push(if i == 0 { 'M' } else { 'L' });
        out.push_str(&format_number(c.x, precision));
        out.push(' ');
        out.push_str(&format_number(c.y, precision));
    }
    if close && !coords.is_empty() {
        out.push('Z');
    }
}

fn svg_polygon(out: &mut String, polygon: &Polygon<f64>, precision: usize) {
    svg_line(out, &polygon.exterior().0, true, precision);
    for ring in polygon.interiors() {
        svg_line(out, &ring.0, true, precision);
    }
}

fn svg_geometry(out: &mut String, geom: &Geometry<f64>, precision: usize) {
    match geom {
        Geometry::Point(p) => svg_line(out, &[p.0], false, precision),
        Geometry::MultiPoint(mp) => {
            for p in &mp.0 {
                svg_line(out, &[p.0], false, precision);
            }
        }
        Geometry::Line(l) => svg_line(out, &[l.start, l.end], false, precision),
        Geometry::LineString(l) => svg_line(out, &l.0, false, precision),
        Geometry::MultiLineString(ml) => {
            for l in &ml.0 {
                svg_line(out, &l.0, false, precision);
            }
        }
        Geometry::Polygon(p) => svg_polygon(out, p, precision),
        Geometry::MultiPolygon(mp) => {
            for p in &mp.0 {
                svg_polygon(out, p, precision);
            }
        }
        Geometry::Rect(r) => svg_polygon(out, &r.to_polygon(), precision),
        Geometry::Triangle(t) => svg_polygon(out, &t.to_polygon(), precision),
        Geometry::GeometryCollection(gc) => {
            for g in &gc.0 {
                svg_geometry(out, g, precision);
            }
        }
    }
}

/// SVG path data for a world-coordinate geometry.
pub fn svg_path(geom: &Geometry<f64>, pixel_box: &PixelBox, precision: usize) -> String {
    let mut out = String::new();
    svg_geometry(&mut out, &to_pixels(geom, pixel_box), precision);
    out
}

// ============================================================================
// GeoJSON
// ============================================================================

fn json_coord(out: &mut String, c: &Coord<f64>, precision: usize) {
    let _ = write!(
        out,
        "[{},{}]",
        format_number(c.x, precision),
        format_number(c.y, precision)
    );
}

fn json_list<T>(out: &mut String, items: &[T], mut f: impl FnMut(&mut String, &T)) {
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        f(out, item);
    }
    out.push(']');
}

fn json_line(out: &mut String, line: &LineString<f64>, precision: usize) {
    json_list(out, &line.0, |o, c| json_coord(o, c, precision));
}

fn json_polygon(out: &mut String, polygon: &Polygon<f64>, precision: usize) {
    let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .collect();
    json_list(out, &rings, |o, r| json_line(o, r, precision));
}

fn geojson_geometry(out: &mut String, geom: &Geometry<f64>, precision: usize) -> RenderResult<()> {
    match geom {
        Geometry::Point(p) => json_coord(out, &p.0, precision),
        Geometry::MultiPoint(mp) => json_list(out, &mp.0, |o, p| json_coord(o, &p.0, precision)),
        Geometry::Line(l) => json_line(out, &LineString::from(*l), precision),
        Geometry::LineString(l) => json_line(out, l, precision),
        Geometry::MultiLineString(ml) => json_list(out, &ml.0, |o, l| json_line(o, l, precision)),
        Geometry::Polygon(p) => json_polygon(out, &p.orient(Direction::Default), precision),
        Geometry::Rect(r) => json_polygon(out, &r.to_polygon().orient(Direction::Default), precision),
        Geometry::Triangle(t) => json_polygon(out, &t.to_polygon().orient(Direction::Default), precision),
        Geometry::MultiPolygon(mp) => {
            let mp = mp.orient(Direction::Default);
            json_list(out, &mp.0, |o, p| json_polygon(o, p, precision));
        }
        Geometry::GeometryCollection(_) => {
            return Err(RenderError::data(
                "GeoJSON coordinates cannot be extracted from a geometry collection",
            ))
        }
    }
    Ok(())
}

/// GeoJSON `coordinates` member for a geometry in `crs`, reprojected to
/// WGS84 with exterior rings counterclockwise.
pub fn geojson_coordinates(geom: &Geometry<f64>, crs: CrsCode, precision: usize) -> RenderResult<String> {
    let wgs84 = transform_geometry(geom, &CoordinateTransformation::to_wgs84(crs));
    let mut out = String::new();
    geojson_geometry(&mut out, &wgs84, precision)?;
    Ok(out)
}

// ============================================================================
// TopoJSON
// ============================================================================

/// Shared arc table of a TopoJSON product.
///
/// Arcs added after the last [`ArcTable::commit`] are dropped again by
/// [`ArcTable::rollback`].
#[derive(Debug, Default, Clone)]
pub struct ArcTable {
    index: HashMap<u64, i64>,
    arcs: Vec<String>,
    committed: usize,
}

/// TopoJSON encoding of a single geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct TopoGeometry {
    /// Arc references, nested like the geometry's coordinates
    pub arcs: Value,
    /// Quantized coordinates of point geometries
    pub coordinates: Option<Value>,
}

impl ArcTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// All arcs so far, in index order.
    pub fn arcs(&self) -> &[String] {
        &self.arcs
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    pub fn commit(&mut self) {
        self.committed = self.arcs.len();
    }

    pub fn rollback(&mut self) {
        let committed = self.committed;
        self.arcs.truncate(committed);
        self.index.retain(|_, n| (*n as usize) < committed);
    }

    /// Delta-encoded arc text. Zero deltas are skipped.
    fn encode_arc<'a>(coords: impl Iterator<Item = &'a Coord<f64>>, scale: f64) -> String {
        let mut out = String::from("[");
        let mut last: Option<(i64, i64)> = None;
        for c in coords {
            let (x, y) = ((c.x * scale).trunc() as i64, (c.y * scale).trunc() as i64);
            match last {
                None => {
                    let _ = write!(out, "[{},{}]", x, y);
                    last = Some((x, y));
                }
                Some((lx, ly)) => {
                    if x != lx || y != ly {
                        let _ = write!(out, ",[{},{}]", x - lx, y - ly);
                        last = Some((x, y));
                    }
                }
            }
        }
        out.push(']');
        out
    }

    /// Index of the arc, registering it unless it or its reverse is known.
    /// A reversed match is returned as `-(n + 1)`.
    fn arc_index(&mut self, line: &LineString<f64>, scale: f64) -> i64 {
        let forward = Self::encode_arc(line.0.iter(), scale);
        let forward_hash = map_common::hash_value(&forward);
        if let Some(&n) = self.index.get(&forward_hash) {
            return n;
        }
        let reverse = Self::encode_arc(line.0.iter().rev(), scale);
        if let Some(&n) = self.index.get(&map_common::hash_value(&reverse)) {
            return -(n + 1);
        }
        let n = self.arcs.len() as i64;
        self.index.insert(forward_hash, n);
        self.arcs.push(forward);
        n
    }

    fn polygon_arcs(&mut self, polygon: &Polygon<f64>, scale: f64) -> Value {
        let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors().iter());
        Value::Array(
            rings
                .filter(|r| r.0.len() >= 2)
                .map(|r| Value::Array(vec![Value::from(self.arc_index(r, scale))]))
                .collect(),
        )
    }

    fn quantize(c: &Coord<f64>, scale: f64) -> Value {
        Value::Array(vec![
            Value::from((c.x * scale).trunc() as i64),
            Value::from((c.y * scale).trunc() as i64),
        ])
    }

    /// Encode a geometry given in `crs`. Coordinates are reprojected to
    /// WGS84 and quantized by `10^precision`.
    pub fn encode(&mut self, geom: &Geometry<f64>, crs: CrsCode, precision: usize) -> RenderResult<TopoGeometry> {
        let wgs84 = transform_geometry(geom, &CoordinateTransformation::to_wgs84(crs));
        let scale = 10f64.powi(precision as i32);
        self.encode_wgs84(&wgs84, scale)
    }

    fn encode_wgs84(&mut self, geom: &Geometry<f64>, scale: f64) -> RenderResult<TopoGeometry> {
        let empty = || Value::Array(Vec::new());
        let topo = match geom {
            Geometry::Point(p) => TopoGeometry {
                arcs: empty(),
                coordinates: Some(Self::quantize(&p.0, scale)),
            },
            Geometry::MultiPoint(mp) => TopoGeometry {
                arcs: empty(),
                coordinates: Some(Value::Array(mp.0.iter().map(|p| Self::quantize(&p.0, scale)).collect())),
            },
            Geometry::Line(l) => self.encode_wgs84(&Geometry::LineString(LineString::from(*l)), scale)?,
            Geometry::LineString(l) => TopoGeometry {
                arcs: Value::Array(vec![Value::from(self.arc_index(l, scale))]),
                coordinates: None,
            },
            Geometry::MultiLineString(ml) => TopoGeometry {
                arcs: Value::Array(
                    ml.0.iter()
                        .filter(|l| l.0.len() >= 2)
                        .map(|l| Value::Array(vec![Value::from(self.arc_index(l, scale))]))
                        .collect(),
                ),
                coordinates: None,
            },
            Geometry::Polygon(p) => TopoGeometry {
                arcs: self.polygon_arcs(p, scale),
                coordinates: None,
            },
            Geometry::Rect(r) => self.encode_wgs84(&Geometry::Polygon(r.to_polygon()), scale)?,
            Geometry::Triangle(t) => self.encode_wgs84(&Geometry::Polygon(t.to_polygon()), scale)?,
            Geometry::MultiPolygon(mp) => TopoGeometry {
                arcs: Value::Array(mp.0.iter().map(|p| self.polygon_arcs(p, scale)).collect()),
                coordinates: None,
            },
            Geometry::GeometryCollection(_) => {
                return Err(RenderError::data("TopoJSON encoding of geometry collections is not supported"))
            }
        };
        Ok(topo)
    }
}
