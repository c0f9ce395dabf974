//! Graticule lines or edge ticks at whole degrees, with optional labels.

use super::{add_path, take_precision, Layer, LayerBase};
use crate::node::{deserialize_attributes, hash_attributes, Attributes, Globals, Node};
use crate::state::State;
use geo::{Coord, Geometry, LineString, MultiLineString};
use map_common::{hash_combine, hash_value, ConfigObject, PixelBox, RenderError, RenderResult, ResultExt};
use projection::CoordinateTransformation;
use renderer::geometry::OutputFormat;
use serde::Deserialize;
use serde_json::Value;

/// SVG does not know HTML entities, numeric ones work everywhere.
const MINUS_SIGN: &str = "&#x2212;";
const DEGREE_SIGN: &str = "&#176;";

/// Sampling interval along graticule lines in degrees.
const LINE_STEP: i32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LineLayout {
    #[default]
    Grid,
    Ticks,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LabelLayout {
    #[default]
    None,
    Center,
    Cross,
    EdgeCenter,
    Ticks,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct GraticuleLabels {
    layout: LabelLayout,
    /// Defaults to the graticule step
    step: Option<u32>,
    upright: bool,
    degree_sign: bool,
    /// Use a minus sign instead of N/S/E/W suffixes
    minus_sign: bool,
    dx: i32,
    dy: i32,
    #[serde(deserialize_with = "deserialize_attributes")]
    attributes: Attributes,
    #[serde(deserialize_with = "deserialize_attributes")]
    textattributes: Attributes,
}

impl Default for GraticuleLabels {
    fn default() -> Self {
        Self {
            layout: LabelLayout::None,
            step: None,
            upright: false,
            degree_sign: true,
            minus_sign: true,
            dx: 0,
            dy: 0,
            attributes: Attributes::new(),
            textattributes: Attributes::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct Graticule {
    layout: LineLayout,
    /// Degrees between lines
    step: u32,
    /// Multiples to leave out
    except: Vec<i32>,
    /// Tick length in pixels
    length: u32,
    #[serde(deserialize_with = "deserialize_attributes")]
    attributes: Attributes,
    labels: GraticuleLabels,
}

impl Default for Graticule {
    fn default() -> Self {
        Self {
            layout: LineLayout::Grid,
            step: 10,
            except: Vec::new(),
            length: 5,
            attributes: Attributes::new(),
            labels: GraticuleLabels::default(),
        }
    }
}

/// A label in pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
struct Label {
    text: String,
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Bottom,
    Top,
    Left,
    Right,
}

/// A tick line in world coordinates at the given degree value.
#[derive(Debug, Clone)]
struct Tick {
    line: LineString<f64>,
    edge: Edge,
    value: i32,
}

impl Edge {
    fn level(self, pbox: &PixelBox) -> f64 {
        match self {
            Edge::Bottom => pbox.world.min_y,
            Edge::Top => pbox.world.max_y,
            Edge::Left => pbox.world.min_x,
            Edge::Right => pbox.world.max_x,
        }
    }

    /// The coordinate compared against the edge level.
    fn coord(self, c: Coord<f64>) -> f64 {
        match self {
            Edge::Bottom | Edge::Top => c.y,
            Edge::Left | Edge::Right => c.x,
        }
    }

    /// Whether the other coordinate is along the edge inside the box.
    fn spans(self, c: Coord<f64>, pbox: &PixelBox) -> bool {
        let w = &pbox.world;
        match self {
            Edge::Bottom | Edge::Top => c.x >= w.min_x && c.x <= w.max_x,
            Edge::Left | Edge::Right => c.y >= w.min_y && c.y <= w.max_y,
        }
    }

    /// Whether `value` lies on the image side of `level`.
    fn is_inward(self, value: f64, level: f64) -> bool {
        match self {
            Edge::Bottom | Edge::Left => value > level,
            Edge::Top | Edge::Right => value < level,
        }
    }
}

/// A tick `length` pixels long where the segment `a`-`b` crosses the edge,
/// pointing into the box along the segment.
fn edge_tick(a: Coord<f64>, b: Coord<f64>, edge: Edge, pbox: &PixelBox, length: f64) -> Option<LineString<f64>> {
    let level = edge.level(pbox);
    let (ca, cb) = (edge.coord(a), edge.coord(b));
    if (ca <= level) == (cb <= level) {
        return None;
    }
    let t = (level - ca) / (cb - ca);
    let hit = Coord {
        x: a.x + t * (b.x - a.x),
        y: a.y + t * (b.y - a.y),
    };
    if !edge.spans(hit, pbox) {
        return None;
    }
    let d = Coord {
        x: b.x - a.x,
        y: b.y - a.y,
    };
    let d = if edge.is_inward(edge.coord(d), 0.0) { d } else { -d };
    let (x0, y0) = pbox.transform(hit.x, hit.y);
    let (x1, y1) = pbox.transform(hit.x + d.x, hit.y + d.y);
    let len = (x1 - x0).hypot(y1 - y0);
    if len == 0.0 {
        return None;
    }
    let (ex, ey) = pbox.itransform(x0 + (x1 - x0) / len * length, y0 + (y1 - y0) / len * length);
    Some(LineString::from(vec![(hit.x, hit.y), (ex, ey)]))
}

fn inside(pbox: &PixelBox, x: f64, y: f64) -> bool {
    x > 0.0 && x < pbox.width as f64 && y > 0.0 && y < pbox.height as f64
}

fn pixel(transformation: &CoordinateTransformation, pbox: &PixelBox, lon: f64, lat: f64) -> Option<(f64, f64)> {
    transformation
        .transform(lon, lat)
        .map(|(x, y)| pbox.transform(x, y))
}

fn step_range(from: i32, to_inclusive: i32, step: u32) -> impl Iterator<Item = i32> {
    (from..=to_inclusive).step_by(step.max(1) as usize)
}

impl Graticule {
    fn parse(value: Value) -> RenderResult<Self> {
        if !value.is_object() {
            return Err(RenderError::config("Graticule settings must be JSON objects"));
        }
        let g: Graticule =
            serde_json::from_value(value).map_err(|e| RenderError::from(e).trace("Invalid graticule"))?;
        if g.step < 1 || 180 % g.step != 0 {
            return Err(RenderError::config("Graticule step must be at least 1 and divide 180 evenly")
                .with_param("step", g.step));
        }
        if g.layout == LineLayout::Ticks && g.length < 1 {
            return Err(RenderError::config("Graticule tick length must be at least 1"));
        }
        let label_step = g.label_step();
        if g.labels.layout != LabelLayout::None && (label_step < 1 || 180 % label_step != 0) {
            return Err(RenderError::config("Graticule label step must be at least 1 and divide 180 evenly")
                .with_param("step", label_step));
        }
        Ok(g)
    }

    fn label_step(&self) -> u32 {
        self.labels.step.unwrap_or(self.step)
    }

    fn is_skipped(&self, value: i32) -> bool {
        self.except.iter().any(|&e| e != 0 && value.abs() % e == 0)
    }

    fn is_labelled(&self, value: i32) -> bool {
        self.labels.layout != LabelLayout::None && value.unsigned_abs() % self.label_step() == 0
    }

    fn meridians(&self) -> impl Iterator<Item = i32> + '_ {
        step_range(-180, 180, self.step).filter(|&lon| !self.is_skipped(lon))
    }

    /// Parallels without the poles.
    fn parallels(&self) -> impl Iterator<Item = i32> + '_ {
        step_range(-90 + self.step as i32, 89, self.step).filter(|&lat| !self.is_skipped(lat))
    }

    fn text(&self, value: i32, positive: char, negative: char) -> String {
        let labels = &self.labels;
        let mut text = String::new();
        if labels.minus_sign && value < 0 {
            text.push_str(MINUS_SIGN);
        }
        text.push_str(&value.abs().to_string());
        if labels.degree_sign {
            text.push_str(DEGREE_SIGN);
        }
        if !labels.minus_sign && value != 0 {
            text.push(if value < 0 { negative } else { positive });
        }
        text
    }

    fn lon_text(&self, lon: i32) -> String {
        self.text(lon, 'E', 'W')
    }

    fn lat_text(&self, lat: i32) -> String {
        self.text(lat, 'N', 'S')
    }

    /// Full meridians and parallels in WGS84.
    fn grid_lines(&self) -> MultiLineString<f64> {
        let mut lines = Vec::new();
        for lon in self.meridians() {
            let line: Vec<(f64, f64)> = step_range(-90, 90, LINE_STEP as u32)
                .map(|lat| (lon as f64, lat as f64))
                .collect();
            lines.push(LineString::from(line));
        }
        for lat in self.parallels() {
            let line: Vec<(f64, f64)> = step_range(-180, 180, LINE_STEP as u32)
                .map(|lon| (lon as f64, lat as f64))
                .collect();
            lines.push(LineString::from(line));
        }
        MultiLineString::new(lines)
    }

    /// Meridian ticks at the top and bottom edges, parallel ticks at the
    /// left and right edges.
    fn ticks(&self, transformation: &CoordinateTransformation, pbox: &PixelBox) -> Vec<Tick> {
        let length = self.length as f64;
        let mut ticks = Vec::new();
        let mut scan = |value: i32, points: Vec<Option<Coord<f64>>>, edges: [Edge; 2]| {
            for pair in points.windows(2) {
                let (Some(a), Some(b)) = (pair[0], pair[1]) else {
                    continue;
                };
                for edge in edges {
                    if let Some(line) = edge_tick(a, b, edge, pbox, length) {
                        ticks.push(Tick { line, edge, value });
                    }
                }
            }
        };
        let world = |lon: i32, lat: i32| {
            transformation
                .transform(lon as f64, lat as f64)
                .map(|(x, y)| Coord { x, y })
        };
        for lon in self.meridians() {
            let points = step_range(-90, 90, LINE_STEP as u32).map(|lat| world(lon, lat)).collect();
            scan(lon, points, [Edge::Bottom, Edge::Top]);
        }
        for lat in self.parallels() {
            let points = step_range(-180, 180, LINE_STEP as u32).map(|lon| world(lon, lat)).collect();
            scan(lat, points, [Edge::Left, Edge::Right]);
        }
        ticks
    }

    /// Labels at the centres of the graticule cell edges.
    fn center_labels(&self, transformation: &CoordinateTransformation, pbox: &PixelBox) -> Vec<Label> {
        let step = self.label_step();
        let half = step as f64 / 2.0;
        let mut labels = Vec::new();
        for lon in step_range(-180, 180, step) {
            for lat in step_range(-90, 89, step) {
                if let Some((x, y)) = pixel(transformation, pbox, lon as f64, lat as f64 + half) {
                    labels.push(Label { text: self.lon_text(lon), x, y });
                }
            }
        }
        for lat in step_range(-90 + step as i32, 89, step) {
            for lon in step_range(-180, 179, step) {
                if let Some((x, y)) = pixel(transformation, pbox, lon as f64 + half, lat as f64) {
                    labels.push(Label { text: self.lat_text(lat), x, y });
                }
            }
        }
        labels.retain(|l| inside(pbox, l.x, l.y));
        labels
    }

    /// The outermost cell edge centres of each line inside the image.
    fn edge_center_labels(&self, transformation: &CoordinateTransformation, pbox: &PixelBox) -> Vec<Label> {
        let step = self.label_step();
        let half = step as f64 / 2.0;
        let mut labels = Vec::new();
        let mut keep_extremes = |text: String, points: Vec<(f64, f64)>, key: fn(&(f64, f64)) -> f64| {
            let visible: Vec<(f64, f64)> = points.into_iter().filter(|&(x, y)| inside(pbox, x, y)).collect();
            let min = visible.iter().copied().min_by(|a, b| key(a).total_cmp(&key(b)));
            let max = visible.iter().copied().max_by(|a, b| key(a).total_cmp(&key(b)));
            if let (Some(min), Some(max)) = (min, max) {
                labels.push(Label { text: text.clone(), x: min.0, y: min.1 });
                if min != max {
                    labels.push(Label { text, x: max.0, y: max.1 });
                }
            }
        };
        for lon in step_range(-180, 180, step) {
            let points = step_range(-90, 89, step)
                .filter_map(|lat| pixel(transformation, pbox, lon as f64, lat as f64 + half))
                .collect();
            keep_extremes(self.lon_text(lon), points, |p| p.1);
        }
        for lat in step_range(-90 + step as i32, 89, step) {
            let points = step_range(-180, 179, step)
                .filter_map(|lon| pixel(transformation, pbox, lon as f64 + half, lat as f64))
                .collect();
            keep_extremes(self.lat_text(lat), points, |p| p.0);
        }
        labels
    }

    /// Latitude labels along the column with most of them visible, and
    /// longitude labels along the best row.
    fn cross_labels(&self, transformation: &CoordinateTransformation, pbox: &PixelBox) -> Vec<Label> {
        let step = self.label_step();
        let half = step as f64 / 2.0;
        let visible = |labels: Vec<Label>| -> Vec<Label> {
            labels
                .into_iter()
                .filter(|l| l.x >= 0.0 && l.x < pbox.width as f64 && l.y >= 0.0 && l.y < pbox.height as f64)
                .collect()
        };
        // The first candidate with the most labels wins
        let best = |candidates: Vec<Vec<Label>>| {
            candidates
                .into_iter()
                .fold(Vec::new(), |best, c| if c.len() > best.len() { c } else { best })
        };

        let columns = step_range(-180, 180, step)
            .map(|lon| {
                visible(
                    step_range(-90, 89, step)
                        .filter_map(|lat| {
                            pixel(transformation, pbox, lon as f64 + half, lat as f64)
                                .map(|(x, y)| Label { text: self.lat_text(lat), x, y })
                        })
                        .collect(),
                )
            })
            .collect();
        let rows = step_range(-90 + step as i32, 89, step)
            .map(|lat| {
                visible(
                    step_range(-180, 179, step)
                        .filter_map(|lon| {
                            pixel(transformation, pbox, lon as f64, lat as f64 + half)
                                .map(|(x, y)| Label { text: self.lon_text(lon), x, y })
                        })
                        .collect(),
                )
            })
            .collect();

        let mut labels = best(columns);
        labels.extend(best(rows));
        labels
    }

    /// Labels at the inner ends of the labelled ticks.
    fn tick_labels(&self, transformation: &CoordinateTransformation, pbox: &PixelBox) -> Vec<Label> {
        let dy = self.labels.dy as f64;
        self.ticks(transformation, pbox)
            .into_iter()
            .filter(|tick| self.is_labelled(tick.value))
            .filter_map(|tick| {
                let end = *tick.line.0.last()?;
                let (x, y) = pbox.transform(end.x, end.y);
                let (text, y) = match tick.edge {
                    // Keep a positive dy pointing into the image at both edges
                    Edge::Bottom => (self.lon_text(tick.value), y - 2.0 * dy),
                    Edge::Top => (self.lon_text(tick.value), y),
                    Edge::Left | Edge::Right => (self.lat_text(tick.value), y),
                };
                Some(Label { text, x, y })
            })
            .collect()
    }

    fn labels(&self, transformation: &CoordinateTransformation, pbox: &PixelBox) -> Vec<Label> {
        match self.labels.layout {
            LabelLayout::None => Vec::new(),
            LabelLayout::Center => self.center_labels(transformation, pbox),
            LabelLayout::Cross => self.cross_labels(transformation, pbox),
            LabelLayout::EdgeCenter => self.edge_center_labels(transformation, pbox),
            LabelLayout::Ticks => self.tick_labels(transformation, pbox),
        }
    }

    fn lines(&self, transformation: &CoordinateTransformation, pbox: &PixelBox) -> Geometry<f64> {
        match self.layout {
            LineLayout::Grid => {
                renderer::geometry::transform_geometry(&Geometry::MultiLineString(self.grid_lines()), transformation)
            }
            LineLayout::Ticks => Geometry::MultiLineString(MultiLineString::new(
                self.ticks(transformation, pbox).into_iter().map(|t| t.line).collect(),
            )),
        }
    }

    fn hash_value(&self) -> u64 {
        let labels = &self.labels;
        let mut seed = hash_value(&self.layout);
        hash_combine(&mut seed, hash_value(&self.step));
        hash_combine(&mut seed, hash_value(&self.except));
        hash_combine(&mut seed, hash_value(&self.length));
        hash_combine(&mut seed, hash_attributes(&self.attributes));
        hash_combine(&mut seed, hash_value(&labels.layout));
        hash_combine(&mut seed, hash_value(&labels.step));
        hash_combine(&mut seed, hash_value(&labels.upright));
        hash_combine(&mut seed, hash_value(&labels.degree_sign));
        hash_combine(&mut seed, hash_value(&labels.minus_sign));
        hash_combine(&mut seed, hash_value(&labels.dx));
        hash_combine(&mut seed, hash_value(&labels.dy));
        hash_combine(&mut seed, hash_attributes(&labels.attributes));
        hash_combine(&mut seed, hash_attributes(&labels.textattributes));
        seed
    }
}

#[derive(Debug)]
pub struct GraticuleLayer {
    base: LayerBase,
    graticules: Vec<Graticule>,
    /// Id of the group holding all labels
    mask_id: Option<String>,
    precision: Option<usize>,
}

impl GraticuleLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            graticules: Vec::new(),
            mask_id: None,
            precision: None,
        }
    }

    fn unique_id(state: &mut State, id: String) -> RenderResult<String> {
        if state.add_id(&id) {
            Ok(id)
        } else {
            Err(RenderError::uniqueness("Non-unique ID assigned to graticule").with_param("id", id))
        }
    }

    fn generate_graticules(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let crs = self.base.crs()?;
        let pbox = self.base.pixel_box()?;
        let clip_box = self.base.clip_box(&pbox);
        let transformation = CoordinateTransformation::from_wgs84(crs);

        let lines: Vec<Geometry<f64>> = self
            .graticules
            .iter()
            .map(|g| renderer::geometry::clip_to_box(&g.lines(&transformation, &pbox), &clip_box))
            .collect();

        self.base.add_clip_rect(nodes, state, &pbox);

        let qid = self.base.qid.clone();
        let group_id = if qid.is_empty() {
            state.make_qid("graticule-layer-")
        } else {
            qid.clone()
        };
        let group_id = Self::unique_id(state, group_id)?;
        let mut group = self.base.group(globals, state)?.with_attribute("id", &group_id);

        let precision = self.precision.unwrap_or_else(|| state.precision());
        let object_key = format!("graticule:{}", qid);
        for (graticule, geom) in self.graticules.iter().zip(&lines) {
            if renderer::geometry::is_empty(geom) {
                continue;
            }
            let graticule_qid = state.make_qid("graticule");
            let iri = if qid.is_empty() {
                graticule_qid
            } else {
                format!("{}.{}", qid, graticule_qid)
            };
            let iri = Self::unique_id(state, iri)?;

            let mut attributes = self.base.attributes.clone();
            attributes.extend(graticule.attributes.clone());
            let path = Node {
                iri: Some(iri.clone()),
                layertype: Some("graticule".to_string()),
                attributes,
                ..Default::default()
            };
            add_path(globals, state, &object_key, path, geom, crs, &pbox, precision)?;

            state.add_attributes(globals, &graticule.attributes)?;
            group.tags.push(Node::use_tag(&iri, graticule.attributes.clone()));
        }

        let labels_id = match &self.mask_id {
            Some(id) => id.clone(),
            None => state.make_qid("graticule-labels-"),
        };
        let labels_id = Self::unique_id(state, labels_id)?;
        let mut labels_group = Node::group(Attributes::new()).with_attribute("id", &labels_id);

        for graticule in &self.graticules {
            let labels = graticule.labels(&transformation, &pbox);
            if labels.is_empty() {
                continue;
            }
            let numbers_id = state.make_qid("graticule-numbers-");
            let numbers_id = Self::unique_id(state, numbers_id)?;
            state.add_attributes(globals, &graticule.labels.attributes)?;
            let mut numbers = Node::group(graticule.labels.attributes.clone()).with_attribute("id", &numbers_id);

            state.add_attributes(globals, &graticule.labels.textattributes)?;
            for label in labels {
                let mut text = Node::tag("<text", "</text>");
                text.attributes = graticule.labels.textattributes.clone();
                let x = (label.x + graticule.labels.dx as f64).round() as i64;
                let y = (label.y + graticule.labels.dy as f64).round() as i64;
                text.attributes.insert("x".to_string(), x.to_string());
                text.attributes.insert("y".to_string(), y.to_string());
                text.cdata = Some(label.text);
                numbers.tags.push(text);
            }
            labels_group.tags.push(numbers);
        }
        group.tags.push(labels_group);

        tracing::debug!(qid = %qid, graticules = self.graticules.len(), "generated graticules");
        nodes.push(group);
        Ok(())
    }
}

impl Layer for GraticuleLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        self.mask_id = cfg.take_string("mask_id")?;
        self.precision = take_precision(cfg)?;
        self.graticules = match cfg.take_value("graticules") {
            None | Some(Value::Null) => {
                return Err(RenderError::config("Graticule layer must define at least one graticule"));
            }
            Some(Value::Array(values)) => values
                .into_iter()
                .map(Graticule::parse)
                .collect::<RenderResult<Vec<_>>>()?,
            Some(value @ Value::Object(_)) => vec![Graticule::parse(value)?],
            Some(_) => {
                return Err(RenderError::config(
                    "graticules setting must be a graticule definition or an array of them",
                ));
            }
        };
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        // Graticules are decoration, not data
        if matches!(state.format(), OutputFormat::GeoJson | OutputFormat::TopoJson) {
            return Ok(());
        }
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_graticules(globals, nodes, state)
            .trace("Graticule layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        for graticule in &self.graticules {
            hash_combine(&mut seed, graticule.hash_value());
        }
        hash_combine(&mut seed, hash_value(&self.mask_id));
        hash_combine(&mut seed, hash_value(&self.precision));
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::create_layer;
    use crate::properties::Properties;
    use map_common::BoundingBox;
    use serde_json::json;

    fn layer(state: &mut State, graticules: Value) -> RenderResult<Box<dyn Layer>> {
        create_layer(
            json!({
                "layer_type": "graticule",
                "qid": "grat",
                "graticules": graticules,
                "projection": {"crs": "EPSG:4326", "xsize": 300, "ysize": 300, "x1": 5, "y1": 45, "x2": 35, "y2": 75}
            }),
            state,
            &Properties::default(),
        )
    }

    fn generate(state: &mut State, graticules: Value) -> (Globals, Vec<Node>) {
        let mut layer = layer(state, graticules).unwrap();
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, state).unwrap();
        (globals, nodes)
    }

    fn texts(nodes: &[Node]) -> Vec<&Node> {
        let labels = nodes[0].tags.last().unwrap();
        labels.tags.iter().flat_map(|numbers| numbers.tags.iter()).collect()
    }

    fn pbox() -> PixelBox {
        PixelBox::new(BoundingBox::new(5.0, 45.0, 35.0, 75.0), 300, 300)
    }

    #[test]
    fn test_label_text() {
        let mut g = Graticule::default();
        assert_eq!(g.lon_text(-10), "&#x2212;10&#176;");
        assert_eq!(g.lat_text(0), "0&#176;");
        g.labels.minus_sign = false;
        g.labels.degree_sign = false;
        assert_eq!(g.lon_text(-10), "10W");
        assert_eq!(g.lat_text(60), "60N");
        assert_eq!(g.lat_text(0), "0");
    }

    #[test]
    fn test_except_skips_multiples() {
        let g = Graticule {
            step: 5,
            except: vec![10],
            ..Default::default()
        };
        let parallels: Vec<i32> = g.parallels().filter(|lat| (40..=70).contains(lat)).collect();
        assert_eq!(parallels, vec![45, 55, 65]);
        assert_eq!(g.meridians().next(), Some(-175));
    }

    #[test]
    fn test_grid_lines() {
        let mut state = State::default();
        let (globals, nodes) = generate(&mut state, json!({"attributes": {"stroke": "grey"}}));

        let path = &globals.paths["grat.graticule1"];
        assert_eq!(path.layertype.as_deref(), Some("graticule"));
        let data = path.data.as_ref().unwrap().as_str().unwrap();
        // Meridians 10, 20 and 30, parallels 50, 60 and 70
        assert_eq!(data.matches('M').count(), 6);

        let group = &nodes[0];
        assert_eq!(group.attributes["id"], "grat");
        assert_eq!(group.tags[0].attributes["xlink:href"], "#grat.graticule1");
        assert_eq!(group.tags[0].attributes["stroke"], "grey");
        assert!(texts(&nodes).is_empty());
    }

    #[test]
    fn test_ticks_point_inwards() {
        let g = Graticule {
            layout: LineLayout::Ticks,
            ..Default::default()
        };
        let ticks = g.ticks(&CoordinateTransformation::from_wgs84(map_common::CrsCode::Epsg4326), &pbox());
        assert_eq!(ticks.len(), 12);

        let bottom = ticks
            .iter()
            .find(|t| t.edge == Edge::Bottom && t.value == 10)
            .unwrap();
        let start = bottom.line.0[0];
        let end = bottom.line.0[1];
        assert!((start.x - 10.0).abs() < 1e-9 && (start.y - 45.0).abs() < 1e-9);
        assert!((end.y - 45.5).abs() < 1e-9);

        let right = ticks.iter().find(|t| t.edge == Edge::Right && t.value == 60).unwrap();
        assert!((right.line.0[1].x - 34.5).abs() < 1e-9);
    }

    #[test]
    fn test_center_labels() {
        let mut state = State::default();
        let (_, nodes) = generate(
            &mut state,
            json!({"labels": {"layout": "center", "textattributes": {"font-size": "10"}}}),
        );
        let texts = texts(&nodes);
        assert_eq!(texts.len(), 12);
        assert_eq!(texts[0].cdata.as_deref(), Some("10&#176;"));
        assert_eq!(texts[0].attributes["font-size"], "10");
        assert_eq!(texts[0].attributes["x"], "50");
    }

    #[test]
    fn test_cross_and_edge_labels() {
        let g = Graticule {
            labels: GraticuleLabels {
                layout: LabelLayout::Cross,
                ..Default::default()
            },
            ..Default::default()
        };
        let transformation = CoordinateTransformation::from_wgs84(map_common::CrsCode::Epsg4326);
        assert_eq!(g.labels(&transformation, &pbox()).len(), 6);

        let g = Graticule {
            labels: GraticuleLabels {
                layout: LabelLayout::EdgeCenter,
                ..Default::default()
            },
            ..Default::default()
        };
        let labels = g.labels(&transformation, &pbox());
        assert_eq!(labels.len(), 12);
        assert!(labels.iter().all(|l| inside(&pbox(), l.x, l.y)));
    }

    #[test]
    fn test_tick_labels() {
        let mut state = State::default();
        let (_, nodes) = generate(
            &mut state,
            json!([
                {"layout": "ticks", "labels": {"layout": "ticks", "step": 20}},
                {"step": 30, "attributes": {"stroke": "red"}}
            ]),
        );
        // Labelled meridian 20 at both edges, parallel 60 at both edges
        assert_eq!(texts(&nodes).len(), 4);
        assert_eq!(nodes[0].tags.len(), 3);
    }

    #[test]
    fn test_skipped_for_geojson() {
        let mut state = State::default();
        state.set_format(OutputFormat::GeoJson);
        let (globals, nodes) = generate(&mut state, json!({}));
        assert!(nodes.is_empty());
        assert!(globals.paths.is_empty());
    }

    #[test]
    fn test_duplicate_id() {
        let mut state = State::default();
        state.add_id("grat");
        let mut layer = layer(&mut state, json!({})).unwrap();
        let err = layer.generate(&mut Globals::default(), &mut Vec::new(), &mut state).unwrap_err();
        assert_eq!(err.kind(), map_common::ErrorKind::Uniqueness);
    }

    #[test]
    fn test_invalid_settings() {
        let mut state = State::default();
        assert!(layer(&mut state, Value::Null).is_err());
        assert!(layer(&mut state, json!({"step": 7})).is_err());
        assert!(layer(&mut state, json!({"layout": "dots"})).is_err());
        assert!(layer(&mut state, json!({"layout": "ticks", "length": 0})).is_err());
        assert!(layer(&mut state, json!({"labels": {"layout": "edge"}})).is_err());
        assert!(layer(&mut state, json!({"labels": {"layout": "center", "step": 7}})).is_err());
        assert!(layer(&mut state, json!({"colour": "red"})).is_err());
        assert!(layer(&mut state, json!("grid")).is_err());
    }
}
