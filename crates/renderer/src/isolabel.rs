//! Isoline label placement.
//!
//! Candidates are the local extremes of each isoline in a few rotated
//! directions. They are filtered by angle, edge distance and curvature, and
//! the final set is grown as a minimum spanning tree over the candidates
//! whose mutual distances satisfy the spacing rules.

use geo::{Coord, MultiLineString};

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub isovalue: f64,
    pub x: f64,
    pub y: f64,
    /// Degrees, clockwise in pixel coordinates
    pub angle: f64,
    pub curvature: f64,
    /// Identifies the isoline the candidate lies on
    pub id: usize,
    /// Preference among equally spaced candidates, straighter is higher
    pub weight: f64,
    /// Label box corners relative to `(x, y)`
    pub corners: [Coord<f64>; 4],
}

impl Candidate {
    fn new(isovalue: f64, at: Coord<f64>, angle: f64, curvature: f64, id: usize, size: (f64, f64)) -> Self {
        let (sine, cosine) = angle.to_radians().sin_cos();
        let (hw, hh) = (size.0 / 2.0, size.1 / 2.0);
        let corner = |dx: f64, dy: f64| Coord {
            x: dx * cosine - dy * sine,
            y: dx * sine + dy * cosine,
        };
        Self {
            isovalue,
            x: at.x,
            y: at.y,
            angle,
            curvature,
            id,
            weight: 1.0 / (1.0 + curvature),
            corners: [corner(-hw, -hh), corner(hw, -hh), corner(hw, hh), corner(-hw, hh)],
        }
    }
}

/// Placement settings, distances in pixels and angles in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPlacement {
    pub upright: bool,
    pub max_angle: f64,
    pub min_distance_edge: f64,
    pub max_distance_edge: f64,
    pub min_distance_other: f64,
    pub min_distance_same: f64,
    pub min_distance_self: f64,
    pub max_curvature: f64,
    pub stencil_size: usize,
    pub angles: Vec<f64>,
    /// Estimated label extent in pixels, zero when unknown
    pub label_size: (f64, f64),
}

impl Default for LabelPlacement {
    fn default() -> Self {
        Self {
            upright: false,
            max_angle: 60.0,
            min_distance_edge: 10.0,
            max_distance_edge: 9999.0,
            min_distance_other: 10.0,
            min_distance_same: 50.0,
            min_distance_self: 50.0,
            max_curvature: 90.0,
            stencil_size: 5,
            angles: vec![0.0, -45.0, 45.0, 180.0],
            label_size: (0.0, 0.0),
        }
    }
}

impl LabelPlacement {
    pub fn hash_value(&self) -> u64 {
        let mut seed = self.upright as u64;
        for v in [
            self.max_angle,
            self.min_distance_edge,
            self.max_distance_edge,
            self.min_distance_other,
            self.min_distance_same,
            self.min_distance_self,
            self.max_curvature,
            self.label_size.0,
            self.label_size.1,
        ] {
            map_common::hash_combine(&mut seed, map_common::hash_f64(v));
        }
        map_common::hash_combine(&mut seed, self.stencil_size as u64);
        for a in &self.angles {
            map_common::hash_combine(&mut seed, map_common::hash_f64(*a));
        }
        seed
    }

    /// Candidates for every isoline of every isovalue, in pixel coordinates.
    pub fn find_candidates(&self, isolines: &[(f64, MultiLineString<f64>)]) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let mut id = 0;
        for (isovalue, lines) in isolines {
            for line in &lines.0 {
                id += 1;
                let closed = line.is_closed() && line.0.len() > 3;
                // Closed rings without the repeated closing vertex
                let coords: &[Coord<f64>] = if closed {
                    &line.0[..line.0.len() - 1]
                } else {
                    &line.0
                };
                for angle in &self.angles {
                    let (sine, cosine) = angle.to_radians().sin_cos();
                    let rotated: Vec<f64> = coords.iter().map(|c| sine * c.x + cosine * c.y).collect();
                    for pos in local_minima(&rotated, closed, self.stencil_size) {
                        candidates.push(Candidate::new(
                            *isovalue,
                            coords[pos],
                            direction_at(coords, pos, closed),
                            curvature(coords, pos, closed, self.stencil_size),
                            id,
                            self.label_size,
                        ));
                    }
                }
            }
        }
        candidates
    }

    /// Filter candidates and pick a well separated subset.
    pub fn select_best_candidates(
        &self,
        candidates: &[Candidate],
        width: f64,
        height: f64,
    ) -> Vec<Candidate> {
        let candis: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| {
                let angle = if self.upright { upright(c.angle) } else { c.angle };
                if angle.abs() > self.max_angle {
                    return false;
                }
                let d = edge_distance(c, width, height);
                d >= self.min_distance_edge && d <= self.max_distance_edge && c.curvature < self.max_curvature
            })
            .collect();

        if candis.len() < 2 {
            return Vec::new();
        }

        let n = candis.len();
        let mut edges: Vec<(usize, usize, f64)> = Vec::new();
        let mut bad: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 0..n - 1 {
            for j in i + 1..n {
                let (a, b) = (candis[i], candis[j]);
                let length = (a.x - b.x).hypot(a.y - b.y);
                let limit = if a.id == b.id {
                    self.min_distance_self
                } else if a.isovalue == b.isovalue {
                    self.min_distance_same
                } else {
                    self.min_distance_other
                };
                if length >= limit {
                    edges.push((i, j, length));
                } else {
                    bad[i].push(j);
                    bad[j].push(i);
                }
            }
        }

        let weight = |i: usize, j: usize| candis[i].weight + candis[j].weight;
        let Some(start) = edges
            .iter()
            .enumerate()
            .min_by(|a, b| {
                a.1 .2
                    .total_cmp(&b.1 .2)
                    .then(weight(b.1 .0, b.1 .1).total_cmp(&weight(a.1 .0, a.1 .1)))
            })
            .map(|(i, _)| i)
        else {
            return Vec::new();
        };

        let mut status = vec![Status::Unknown; n];
        let (a, b, _) = edges.swap_remove(start);
        status[a] = Status::Selected;
        status[b] = Status::Selected;

        loop {
            let mut best: Option<(usize, f64, f64)> = None;
            for (k, &(i, j, length)) in edges.iter().enumerate() {
                let new_vertex = match (status[i], status[j]) {
                    (Status::Selected, Status::Unknown) => j,
                    (Status::Unknown, Status::Selected) => i,
                    _ => continue,
                };
                let w = weight(i, j);
                let better = match best {
                    None => true,
                    Some((_, l, bw)) => length < l || (length == l && w > bw),
                };
                if better {
                    let forbidden = bad[new_vertex]
                        .iter()
                        .any(|&other| status[other] == Status::Selected);
                    if forbidden {
                        status[new_vertex] = Status::Rejected;
                    } else {
                        best = Some((k, length, w));
                    }
                }
            }
            let Some((k, _, _)) = best else {
                break;
            };
            let (i, j, _) = edges.swap_remove(k);
            status[i] = Status::Selected;
            status[j] = Status::Selected;
        }

        candis
            .into_iter()
            .zip(status)
            .filter(|(_, s)| *s == Status::Selected)
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// Turn labels so that they point towards increasing values.
    ///
    /// `sample` returns the value at a pixel position. Candidates where it
    /// fails get a NaN angle and should be skipped.
    pub fn fix_orientation<F>(&self, candidates: &mut [Candidate], sample: F)
    where
        F: Fn(f64, f64) -> Option<f64>,
    {
        const LOOKAHEAD: f64 = 2.0;
        for cand in candidates.iter_mut() {
            let rad = cand.angle.to_radians();
            let x = cand.x + LOOKAHEAD * rad.sin();
            let y = cand.y - LOOKAHEAD * rad.cos();
            match sample(x, y) {
                None => cand.angle = f64::NAN,
                Some(v) => {
                    if v < cand.isovalue {
                        cand.angle = normalize(cand.angle + 180.0);
                    }
                    if self.upright {
                        cand.angle = upright(cand.angle);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Unknown,
    Selected,
    Rejected,
}

/// Angle in `(-180, 180]`.
fn normalize(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}

/// Angle turned by 180 degrees when the text would be upside down.
fn upright(angle: f64) -> f64 {
    let a = normalize(angle);
    if a < -90.0 || a > 90.0 {
        normalize(a + 180.0)
    } else {
        a
    }
}

/// Distance from the label anchor or its box to the nearest image edge.
fn edge_distance(c: &Candidate, width: f64, height: f64) -> f64 {
    let distance = |x: f64, y: f64| {
        let dx = x.abs().min((x - width).abs());
        let dy = y.abs().min((y - height).abs());
        dx.min(dy)
    };
    c.corners
        .iter()
        .map(|off| distance(c.x + off.x, c.y + off.y))
        .fold(distance(c.x, c.y), f64::min)
}

/// Positions strictly lower than all neighbours within the stencil. Open
/// lines skip their ends; closed lines wrap around, even more than once
/// for rings shorter than the stencil.
fn local_minima(values: &[f64], closed: bool, stencil: usize) -> Vec<usize> {
    let n = values.len();
    let range = if closed {
        0..n
    } else if n > 2 * stencil {
        stencil..n - stencil
    } else {
        return Vec::new();
    };
    range
        .filter(|&pos| {
            (1..=stencil).all(|i| {
                let prev = (pos + n - i % n) % n;
                let next = (pos + i) % n;
                values[pos] < values[prev] && values[pos] < values[next]
            })
        })
        .collect()
}

fn segment_angle(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (b.y - a.y).atan2(b.x - a.x)
}

/// Mean direction of the two segments meeting at `pos`, in `(-90, 90]`
/// since a line has no preferred direction.
fn direction_at(coords: &[Coord<f64>], pos: usize, closed: bool) -> f64 {
    let n = coords.len();
    let prev = if pos == 0 {
        if closed {
            n - 1
        } else {
            0
        }
    } else {
        pos - 1
    };
    let next = if pos + 1 >= n {
        if closed {
            0
        } else {
            n - 1
        }
    } else {
        pos + 1
    };
    let a1 = segment_angle(coords[prev], coords[pos]);
    let a2 = segment_angle(coords[pos], coords[next]);
    let mean = (a1.sin() + a2.sin()).atan2(a1.cos() + a2.cos()).to_degrees();
    let mut a = normalize(mean);
    if a <= -90.0 {
        a += 180.0;
    } else if a > 90.0 {
        a -= 180.0;
    }
    a
}

/// Summed absolute turn angle over the stencil, or 999 when fewer than
/// three segments are available.
fn curvature(coords: &[Coord<f64>], pos: usize, closed: bool, stencil: usize) -> f64 {
    let n = coords.len() as i64;
    let s = stencil as i64;
    let p = pos as i64;
    let indices: Vec<usize> = if closed {
        (p - s..=p + s).map(|i| i.rem_euclid(n) as usize).collect()
    } else {
        (p.saturating_sub(s).max(0)..=(p + s).min(n - 1))
            .map(|i| i as usize)
            .collect()
    };
    if indices.len() < 4 {
        return 999.0;
    }
    let mut sum = 0.0;
    let mut last: Option<f64> = None;
    for w in indices.windows(2) {
        let angle = segment_angle(coords[w[0]], coords[w[1]]).to_degrees();
        if let Some(prev) = last {
            let mut diff = angle - prev;
            if diff < -180.0 {
                diff += 360.0;
            } else if diff > 180.0 {
                diff -= 360.0;
            }
            sum += diff.abs();
        }
        last = Some(angle);
    }
    sum
}
