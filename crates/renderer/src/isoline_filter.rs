//! Distance-weighted smoothing of isoline and isoband vertices.

use geo::{Coord, LineString, MultiLineString, MultiPolygon, Polygon};
use map_common::{PixelBox, RenderError, RenderResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MAX_RADIUS: f64 = 100.0;
pub const MAX_ITERATIONS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    None,
    Average,
    Linear,
    Gaussian,
    Tukey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Straight-line distance to the filtered vertex
    #[default]
    Euclidian,
    /// Distance along the line
    Path,
}

/// Filter settings. `radius` is in pixels until [`IsolineFilter::bbox`]
/// converts it to world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsolineFilter {
    #[serde(default, rename = "type")]
    pub filter_type: FilterType,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub radius: f64,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    1
}

impl Default for IsolineFilter {
    fn default() -> Self {
        Self {
            filter_type: FilterType::None,
            metric: Metric::Euclidian,
            radius: 0.0,
            iterations: default_iterations(),
        }
    }
}

impl IsolineFilter {
    pub fn validate(&self) -> RenderResult<()> {
        if self.radius < 0.0 {
            return Err(RenderError::config("Isoline filter radius must be nonnegative"));
        }
        if self.radius > MAX_RADIUS {
            return Err(RenderError::config("Isoline filter radius must be less than 100 pixels")
                .with_param("radius", self.radius));
        }
        if self.iterations > MAX_ITERATIONS {
            return Err(RenderError::config(
                "Isoline filter number of iterations must be less than 100",
            )
            .with_param("iterations", self.iterations));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.filter_type != FilterType::None && self.iterations > 0 && self.radius > 0.0
    }

    /// Convert the pixel radius into world units of the box.
    pub fn bbox(&mut self, pbox: &PixelBox) {
        let (x1, y1) = pbox.itransform(0.0, 0.0);
        let (x2, y2) = pbox.itransform(self.radius, 0.0);
        self.radius = (x2 - x1).hypot(y2 - y1);
    }

    /// Weight of a neighbour at distance `d`, zero at and beyond the radius.
    pub fn weight(&self, d: f64) -> f64 {
        let r = self.radius;
        if d >= r {
            return 0.0;
        }
        match self.filter_type {
            FilterType::Tukey => {
                let t = 1.0 - (d / r) * (d / r);
                t * t
            }
            FilterType::Linear => (r - d) / r,
            FilterType::Average => 1.0,
            FilterType::Gaussian | FilterType::None => {
                let sigma = 1.5 * r;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            }
        }
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = self.filter_type as u64;
        map_common::hash_combine(&mut seed, self.metric as u64);
        map_common::hash_combine(&mut seed, map_common::hash_f64(self.radius));
        map_common::hash_combine(&mut seed, self.iterations as u64);
        seed
    }

    pub fn apply_lines(&self, lines: &mut MultiLineString<f64>) {
        if !self.is_active() {
            return;
        }
        let counter = VertexCounter::default();
        for line in lines.0.iter_mut() {
            *line = self.filter_line(line, &counter);
        }
    }

    /// Filter band rings. With `preserve_topology` only vertices shared by
    /// exactly two rings move, so adjacent bands keep matching edges.
    pub fn apply_polygons(&self, bands: &mut [MultiPolygon<f64>], preserve_topology: bool) {
        if !self.is_active() {
            return;
        }
        let mut counter = VertexCounter::default();
        if preserve_topology {
            for band in bands.iter() {
                for polygon in &band.0 {
                    counter.add(polygon.exterior());
                    polygon.interiors().iter().for_each(|r| counter.add(r));
                }
            }
        }
        for band in bands.iter_mut() {
            let filtered = band
                .0
                .iter()
                .map(|polygon| {
                    Polygon::new(
                        self.filter_line(polygon.exterior(), &counter),
                        polygon
                            .interiors()
                            .iter()
                            .map(|r| self.filter_line(r, &counter))
                            .collect(),
                    )
                })
                .collect();
            *band = MultiPolygon::new(filtered);
        }
    }

    fn filter_line(&self, line: &LineString<f64>, counter: &VertexCounter) -> LineString<f64> {
        if line.0.len() < 2 {
            return line.clone();
        }
        let closed = line.is_closed();
        let mut current = line.0.clone();

        for _ in 0..self.iterations {
            let n = current.len() as i64;
            let max_closed = n / 4;
            let imax = if closed { n - 2 } else { n - 1 };
            let mut out = Vec::with_capacity(current.len());

            for i in 0..=imax {
                let mut acc = Accumulator::new(self, current[i as usize]);
                if counter.allowed(&current[i as usize]) {
                    let (jmin, jmax) = if closed {
                        (i - max_closed, i + max_closed)
                    } else {
                        let offset = i.min(n - 1 - i);
                        (i - offset, i + offset)
                    };
                    let mut j = i;
                    while j >= jmin && acc.add(vertex(&current, j, closed), counter) {
                        j -= 1;
                    }
                    acc.reset_path();
                    let mut j = i + 1;
                    while j <= jmax && acc.add(vertex(&current, j, closed), counter) {
                        j += 1;
                    }
                }
                out.push(acc.result());
            }
            if closed {
                if let Some(first) = out.first().copied() {
                    out.push(first);
                }
            }
            current = out;
        }
        LineString::new(current)
    }
}

/// Vertex `j` of a possibly closed line, wrapping around closed rings and
/// skipping the duplicated closing vertex.
fn vertex(coords: &[Coord<f64>], j: i64, closed: bool) -> Coord<f64> {
    let n = coords.len() as i64;
    let mut j = j;
    if closed {
        if j < 0 {
            j += n - 1;
        } else if j >= n {
            j -= n - 1;
        }
    }
    coords[j.clamp(0, n - 1) as usize]
}

struct Accumulator<'a> {
    filter: &'a IsolineFilter,
    first: Coord<f64>,
    prev: Coord<f64>,
    path_length: f64,
    sum: Coord<f64>,
    total_weight: f64,
}

impl<'a> Accumulator<'a> {
    fn new(filter: &'a IsolineFilter, first: Coord<f64>) -> Self {
        Self {
            filter,
            first,
            prev: first,
            path_length: 0.0,
            sum: Coord { x: 0.0, y: 0.0 },
            total_weight: 0.0,
        }
    }

    fn reset_path(&mut self) {
        self.path_length = 0.0;
        self.prev = self.first;
    }

    fn distance(&self, pt: Coord<f64>) -> f64 {
        match self.filter.metric {
            Metric::Euclidian => (pt.x - self.first.x).hypot(pt.y - self.first.y),
            Metric::Path => self.path_length + (pt.x - self.prev.x).hypot(pt.y - self.prev.y),
        }
    }

    fn add(&mut self, pt: Coord<f64>, counter: &VertexCounter) -> bool {
        if !counter.allowed(&pt) {
            return false;
        }
        let d = self.distance(pt);
        let w = self.filter.weight(d);
        if w == 0.0 {
            return false;
        }
        self.sum.x += w * pt.x;
        self.sum.y += w * pt.y;
        self.total_weight += w;
        self.path_length = d;
        self.prev = pt;
        true
    }

    fn result(&self) -> Coord<f64> {
        if self.total_weight == 0.0 {
            self.first
        } else {
            Coord {
                x: self.sum.x / self.total_weight,
                y: self.sum.y / self.total_weight,
            }
        }
    }
}

/// Number of rings each vertex appears in.
#[derive(Debug, Default)]
struct VertexCounter {
    counts: HashMap<(u64, u64), u32>,
}

impl VertexCounter {
    fn key(c: &Coord<f64>) -> (u64, u64) {
        (c.x.to_bits(), c.y.to_bits())
    }

    fn add(&mut self, ring: &LineString<f64>) {
        let coords = &ring.0;
        let n = if ring.is_closed() && coords.len() > 1 {
            coords.len() - 1
        } else {
            coords.len()
        };
        for c in &coords[..n] {
            *self.counts.entry(Self::key(c)).or_insert(0) += 1;
        }
    }

    fn allowed(&self, c: &Coord<f64>) -> bool {
        matches!(self.counts.get(&Self::key(c)).copied().unwrap_or(0), 0 | 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(t: FilterType, radius: f64) -> IsolineFilter {
        IsolineFilter {
            filter_type: t,
            radius,
            ..Default::default()
        }
    }

    #[test]
    fn test_weights() {
        let f = filter(FilterType::Tukey, 2.0);
        assert_eq!(f.weight(0.0), 1.0);
        assert_eq!(f.weight(2.0), 0.0);
        assert!((f.weight(1.0) - 0.5625).abs() < 1e-12);

        let f = filter(FilterType::Linear, 4.0);
        assert_eq!(f.weight(1.0), 0.75);

        let f = filter(FilterType::Gaussian, 2.0);
        let sigma: f64 = 3.0;
        assert!((f.weight(1.0) - (-1.0 / (2.0 * sigma * sigma)).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_validate_limits() {
        assert!(filter(FilterType::Average, 101.0).validate().is_err());
        assert!(filter(FilterType::Average, -1.0).validate().is_err());
        let mut f = filter(FilterType::Average, 5.0);
        f.iterations = 101;
        assert!(f.validate().is_err());
    }

    #[test]
    fn test_open_line_keeps_endpoints() {
        let mut lines = MultiLineString::new(vec![LineString::from(vec![
            (0.0, 0.0),
            (1.0, 1.0),
            (2.0, 0.0),
            (3.0, 1.0),
            (4.0, 0.0),
        ])]);
        filter(FilterType::Average, 1.5).apply_lines(&mut lines);
        let c = &lines.0[0].0;
        assert_eq!(c.len(), 5);
        assert_eq!(c[0], Coord { x: 0.0, y: 0.0 });
        assert_eq!(c[4], Coord { x: 4.0, y: 0.0 });
        // Zig-zag is flattened towards the mean
        assert!((c[1].y - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_closed_ring_stays_closed() {
        let square = LineString::from(vec![
            (0.0, 0.0),
            (1.0, 0.0),
            (2.0, 0.0),
            (2.0, 1.0),
            (2.0, 2.0),
            (1.0, 2.0),
            (0.0, 2.0),
            (0.0, 1.0),
            (0.0, 0.0),
        ]);
        let mut lines = MultiLineString::new(vec![square]);
        filter(FilterType::Linear, 1.5).apply_lines(&mut lines);
        let ring = &lines.0[0];
        assert!(ring.is_closed());
        assert_eq!(ring.0.len(), 9);
        // Corners are pulled inwards
        assert!(ring.0[0].x > 0.0 && ring.0[0].y > 0.0);
    }

    #[test]
    fn test_inactive_filter_is_noop() {
        let original = MultiLineString::new(vec![LineString::from(vec![(0.0, 0.0), (1.0, 5.0), (2.0, 0.0)])]);
        let mut lines = original.clone();
        IsolineFilter::default().apply_lines(&mut lines);
        assert_eq!(lines, original);
    }

    #[test]
    fn test_deserialize() {
        let f: IsolineFilter =
            serde_json::from_str(r#"{"type": "tukey", "metric": "path", "radius": 10}"#).unwrap();
        assert_eq!(f.filter_type, FilterType::Tukey);
        assert_eq!(f.metric, Metric::Path);
        assert_eq!(f.iterations, 1);
        assert!(serde_json::from_str::<IsolineFilter>(r#"{"type": "box"}"#).is_err());
        assert!(serde_json::from_str::<IsolineFilter>(r#"{"sigma": 1}"#).is_err());
    }
}
