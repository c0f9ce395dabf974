//! Isoline and isoband extraction using marching squares.
//!
//! Contouring works in grid index space: `x` is the column and `y` the row
//! of a bottom-up raster, so `y` grows northwards and counter-clockwise rings
//! have positive signed area. Callers map the result to world coordinates.
//!
//! Crossing points are identified by the grid edge they lie on rather than
//! by their coordinates, which makes segment chaining and the cancellation
//! of shared band edges exact.

use crate::painter::is_missing;
use geo::{Area, Contains, Coord, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use map_common::{RenderError, RenderResult};
use std::collections::HashMap;

/// How crossing points are placed along a cell edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interpolation {
    #[default]
    Linear,
    /// Crossings at edge midpoints
    Midpoint,
    /// Linear in the logarithm of the values, falling back to linear for
    /// non-positive values
    Logarithmic,
}

impl Interpolation {
    /// Parse an `interpolation` setting. `nearest` and `discrete` are
    /// aliases of `midpoint`.
    pub fn parse(name: &str) -> RenderResult<Self> {
        match name {
            "linear" => Ok(Self::Linear),
            "nearest" | "discrete" | "midpoint" => Ok(Self::Midpoint),
            "logarithmic" => Ok(Self::Logarithmic),
            _ => Err(RenderError::config("Unknown interpolation method").with_param("interpolation", name)),
        }
    }

    fn fraction(&self, a: f64, b: f64, level: f64) -> f64 {
        let linear = |a: f64, b: f64, level: f64| {
            if (b - a).abs() < 1e-12 {
                0.5
            } else {
                ((level - a) / (b - a)).clamp(0.0, 1.0)
            }
        };
        match self {
            Self::Linear => linear(a, b, level),
            Self::Midpoint => 0.5,
            Self::Logarithmic if a > 0.0 && b > 0.0 && level > 0.0 => {
                linear(a.ln(), b.ln(), level.ln())
            }
            Self::Logarithmic => linear(a, b, level),
        }
    }
}

/// A bottom-up row-major value raster.
#[derive(Debug, Clone, Copy)]
pub struct ContourGrid<'a> {
    pub values: &'a [f32],
    pub width: usize,
    pub height: usize,
}

impl<'a> ContourGrid<'a> {
    pub fn new(values: &'a [f32], width: usize, height: usize) -> RenderResult<Self> {
        if values.len() != width * height {
            return Err(RenderError::data("Grid size does not match its values")
                .with_param("values", values.len())
                .with_param("width", width)
                .with_param("height", height));
        }
        Ok(Self {
            values,
            width,
            height,
        })
    }

    #[inline]
    fn value(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.width + x]
    }

    /// The four corner values of cell `(x, y)` counter-clockwise from the
    /// lower left, or `None` when any is missing.
    fn cell(&self, x: usize, y: usize) -> Option<[f64; 4]> {
        let v = [
            self.value(x, y),
            self.value(x + 1, y),
            self.value(x + 1, y + 1),
            self.value(x, y + 1),
        ];
        if v.iter().any(|&c| is_missing(c)) {
            return None;
        }
        Some(v.map(|c| c as f64))
    }

    fn cells(&self) -> impl Iterator<Item = (usize, usize)> {
        let (w, h) = (self.width, self.height);
        (0..h.saturating_sub(1)).flat_map(move |y| (0..w.saturating_sub(1)).map(move |x| (x, y)))
    }

    /// Grid edges of cell `(x, y)` in counter-clockwise order: bottom, right,
    /// top, left. Edge `k` runs from corner `k` to corner `k + 1`.
    fn cell_edges(&self, x: usize, y: usize) -> [EdgeId; 4] {
        [
            EdgeId::horizontal(x, y),
            EdgeId::vertical(x + 1, y),
            EdgeId::horizontal(x, y + 1),
            EdgeId::vertical(x, y),
        ]
    }

    fn corner_position(x: usize, y: usize, k: usize) -> (usize, usize) {
        match k {
            0 => (x, y),
            1 => (x + 1, y),
            2 => (x + 1, y + 1),
            _ => (x, y + 1),
        }
    }

    /// Location of the crossing of `level` on an edge, interpolated from the
    /// edge's lower endpoint so that both adjacent cells agree.
    fn crossing(&self, edge: EdgeId, level: f64, interp: Interpolation) -> Coord<f64> {
        let (x, y) = (edge.x as usize, edge.y as usize);
        let a = self.value(x, y) as f64;
        if edge.horizontal {
            let b = self.value(x + 1, y) as f64;
            Coord {
                x: x as f64 + interp.fraction(a, b, level),
                y: y as f64,
            }
        } else {
            let b = self.value(x, y + 1) as f64;
            Coord {
                x: x as f64,
                y: y as f64 + interp.fraction(a, b, level),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct EdgeId {
    x: u32,
    y: u32,
    horizontal: bool,
}

impl EdgeId {
    fn horizontal(x: usize, y: usize) -> Self {
        Self {
            x: x as u32,
            y: y as u32,
            horizontal: true,
        }
    }

    fn vertical(x: usize, y: usize) -> Self {
        Self {
            x: x as u32,
            y: y as u32,
            horizontal: false,
        }
    }
}

/// A contour vertex: a grid node or a level crossing on a grid edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Vertex {
    Node(u32, u32),
    /// Crossing of the lower (`false`) or upper (`true`) band limit
    Cross(EdgeId, bool),
}

/// A line segment between two edge crossings
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: EdgeId,
    end: EdgeId,
}

/// Marching squares for one level. Saddle cells are resolved by the mean of
/// the four corners.
fn march_squares(grid: &ContourGrid<'_>, level: f64) -> Vec<Segment> {
    let mut segments = Vec::new();
    for (x, y) in grid.cells() {
        let Some(v) = grid.cell(x, y) else {
            continue;
        };
        let above = v.map(|c| c >= level);
        let edges = grid.cell_edges(x, y);
        let crossed: Vec<usize> = (0..4).filter(|&k| above[k] != above[(k + 1) % 4]).collect();

        match crossed.len() {
            2 => segments.push(Segment {
                start: edges[crossed[0]],
                end: edges[crossed[1]],
            }),
            4 => {
                // Cut off the corners on the side the centre is not on
                let centre_above = (v[0] + v[1] + v[2] + v[3]) / 4.0 >= level;
                for k in 0..4 {
                    if above[k] != centre_above {
                        segments.push(Segment {
                            start: edges[(k + 3) % 4],
                            end: edges[k],
                        });
                    }
                }
            }
            _ => {}
        }
    }
    segments
}

/// Chain segments sharing an edge crossing into polylines. Open lines come
/// first, starting from their free ends; the remaining chains are closed.
fn connect_segments(segments: &[Segment]) -> Vec<Vec<EdgeId>> {
    let mut at: HashMap<EdgeId, Vec<usize>> = HashMap::new();
    for (i, s) in segments.iter().enumerate() {
        at.entry(s.start).or_default().push(i);
        at.entry(s.end).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut lines = Vec::new();

    let walk = |first: usize, from: EdgeId, used: &mut Vec<bool>| -> Vec<EdgeId> {
        let mut points = vec![from];
        let mut current = first;
        let mut node = from;
        loop {
            used[current] = true;
            let s = segments[current];
            node = if s.start == node { s.end } else { s.start };
            points.push(node);
            let next = at
                .get(&node)
                .and_then(|ids| ids.iter().copied().find(|&i| !used[i]));
            match next {
                Some(i) => current = i,
                None => break,
            }
        }
        points
    };

    for i in 0..segments.len() {
        if used[i] {
            continue;
        }
        let s = segments[i];
        let free = |e: &EdgeId| at.get(e).map(|ids| ids.len() == 1).unwrap_or(false);
        if free(&s.start) {
            lines.push(walk(i, s.start, &mut used));
        } else if free(&s.end) {
            lines.push(walk(i, s.end, &mut used));
        }
    }
    for i in 0..segments.len() {
        if !used[i] {
            lines.push(walk(i, segments[i].start, &mut used));
        }
    }
    lines
}

/// Isolines of `level` as polylines in grid coordinates. Closed lines repeat
/// their first vertex.
pub fn isoline(grid: &ContourGrid<'_>, level: f64, interp: Interpolation) -> MultiLineString<f64> {
    let segments = march_squares(grid, level);
    let lines = connect_segments(&segments)
        .into_iter()
        .map(|edges| {
            let mut coords: Vec<Coord<f64>> = edges
                .into_iter()
                .map(|e| grid.crossing(e, level, interp))
                .collect();
            coords.dedup();
            LineString::new(coords)
        })
        .filter(|ls| ls.0.len() >= 2)
        .collect();
    MultiLineString::new(lines)
}

/// The region `lo <= value < hi` as polygons in grid coordinates. A missing
/// limit leaves that side open.
pub fn isoband(
    grid: &ContourGrid<'_>,
    lo: Option<f64>,
    hi: Option<f64>,
    interp: Interpolation,
) -> MultiPolygon<f64> {
    let lo_v = lo.unwrap_or(f64::NEG_INFINITY);
    let hi_v = hi.unwrap_or(f64::INFINITY);
    let inside = |v: f64| v >= lo_v && v < hi_v;

    // Directed boundary edges; an edge and its reverse cancel
    let mut edges: Vec<Option<(Vertex, Vertex)>> = Vec::new();
    let mut index: HashMap<(Vertex, Vertex), usize> = HashMap::new();
    let mut add_edge = |a: Vertex, b: Vertex| {
        if a == b {
            return;
        }
        if let Some(i) = index.remove(&(b, a)) {
            edges[i] = None;
        } else {
            index.insert((a, b), edges.len());
            edges.push(Some((a, b)));
        }
    };

    for (x, y) in grid.cells() {
        let Some(v) = grid.cell(x, y) else {
            continue;
        };
        let cell_edges = grid.cell_edges(x, y);

        // Walk the cell boundary keeping in-band corners and limit crossings
        let mut ring: Vec<Vertex> = Vec::with_capacity(12);
        for k in 0..4 {
            let (a, b) = (v[k], v[(k + 1) % 4]);
            if inside(a) {
                let (cx, cy) = ContourGrid::corner_position(x, y, k);
                ring.push(Vertex::Node(cx as u32, cy as u32));
            }
            let mut crossings: Vec<(f64, Vertex)> = Vec::with_capacity(2);
            if (a < lo_v) != (b < lo_v) {
                crossings.push((interp.fraction(a, b, lo_v), Vertex::Cross(cell_edges[k], false)));
            }
            if (a < hi_v) != (b < hi_v) {
                crossings.push((interp.fraction(a, b, hi_v), Vertex::Cross(cell_edges[k], true)));
            }
            crossings.sort_by(|p, q| p.0.total_cmp(&q.0));
            ring.extend(crossings.into_iter().map(|(_, vx)| vx));
        }
        if ring.len() < 3 {
            continue;
        }
        for i in 0..ring.len() {
            add_edge(ring[i], ring[(i + 1) % ring.len()]);
        }
    }

    let edges: Vec<(Vertex, Vertex)> = edges.into_iter().flatten().collect();
    let position = |vx: Vertex| -> Coord<f64> {
        match vx {
            Vertex::Node(x, y) => Coord {
                x: x as f64,
                y: y as f64,
            },
            Vertex::Cross(e, upper) => grid.crossing(e, if upper { hi_v } else { lo_v }, interp),
        }
    };

    let rings = chain_rings(&edges)
        .into_iter()
        .filter_map(|ring| {
            let mut coords: Vec<Coord<f64>> = ring.into_iter().map(&position).collect();
            coords.dedup();
            if coords.len() > 1 && coords.first() == coords.last() {
                coords.pop();
            }
            (coords.len() >= 3).then(|| LineString::new(coords))
        })
        .collect();

    assemble_polygons(rings)
}

/// Follow directed edges into closed vertex rings.
fn chain_rings(edges: &[(Vertex, Vertex)]) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, (a, _)) in edges.iter().enumerate() {
        outgoing.entry(*a).or_default().push(i);
    }
    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut ring = vec![edges[start].0];
        let mut current = start;
        loop {
            used[current] = true;
            let end = edges[current].1;
            if end == edges[start].0 {
                break;
            }
            ring.push(end);
            match outgoing
                .get(&end)
                .and_then(|ids| ids.iter().copied().find(|&i| !used[i]))
            {
                Some(next) => current = next,
                None => break,
            }
        }
        rings.push(ring);
    }
    rings
}

/// Sort rings into shells (counter-clockwise) and holes (clockwise), and
/// attach every hole to the smallest shell containing it.
fn assemble_polygons(rings: Vec<LineString<f64>>) -> MultiPolygon<f64> {
    let mut shells: Vec<(f64, Polygon<f64>)> = Vec::new();
    let mut holes: Vec<LineString<f64>> = Vec::new();

    for ring in rings {
        let area = Polygon::new(ring.clone(), vec![]).signed_area();
        if area > 0.0 {
            shells.push((area, Polygon::new(ring, vec![])));
        } else if area < 0.0 {
            holes.push(ring);
        }
    }

    let mut interiors: Vec<Vec<LineString<f64>>> = vec![Vec::new(); shells.len()];
    for hole in holes {
        let sample = match (hole.0.first(), hole.0.get(1)) {
            (Some(a), Some(b)) => Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0),
            _ => continue,
        };
        let owner = shells
            .iter()
            .enumerate()
            .filter(|(_, (_, shell))| shell.contains(&sample))
            .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
            .map(|(i, _)| i);
        if let Some(i) = owner {
            interiors[i].push(hole);
        }
    }

    MultiPolygon::new(
        shells
            .into_iter()
            .zip(interiors)
            .map(|((_, shell), holes)| Polygon::new(shell.exterior().clone(), holes))
            .collect(),
    )
}

/// Values `start, start + step, ..` up to and including `end`.
pub fn contour_levels(start: f64, end: f64, step: f64) -> Vec<f64> {
    if step <= 0.0 || end < start {
        return vec![];
    }
    let n = ((end - start) / step + 1e-9).floor() as usize;
    (0..=n).map(|i| start + i as f64 * step).collect()
}
