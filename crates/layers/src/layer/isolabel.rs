//! Numbers placed along contour lines.

use super::contours::ContourSettings;
use super::isoline::{contour_lines, parse_isolines, Isoline};
use super::isoband::Isoband;
use super::{xml_escape, Layer, LayerBase};
use crate::label::{Label, Orientation};
use crate::node::{Globals, Node};
use crate::projection::Projection;
use crate::state::State;
use map_common::{hash_combine, hash_f64, ConfigObject, RenderError, RenderResult, ResultExt};
use renderer::isolabel::LabelPlacement;
use serde::Deserialize;
use serde_json::Value;

const MAX_ISOVALUES: f64 = 1000.0;

/// `isovalues: {start, stop, step}`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IsovalueRange {
    start: f64,
    stop: f64,
    #[serde(default = "default_step")]
    step: f64,
}

fn default_step() -> f64 {
    1.0
}

impl IsovalueRange {
    fn values(&self) -> RenderResult<Vec<f64>> {
        if self.stop < self.start {
            return Err(RenderError::config("Isolabel isovalues stop value must be greater than the start value"));
        }
        if self.step <= 0.0 {
            return Err(RenderError::config("Isolabel isovalues step must be greater than zero"));
        }
        if (self.stop - self.start) / self.step > MAX_ISOVALUES {
            return Err(RenderError::config("Isolabel isovalues setting generates too many values (> 1000)"));
        }
        // Stop half a step early so rounding cannot give both 999.9999 and 1000
        let mut values = Vec::new();
        let mut value = self.start;
        while value < self.stop - self.step / 2.0 {
            values.push(value);
            value += self.step;
        }
        values.push(self.stop);
        Ok(values)
    }
}

fn parse_isovalues(value: Value) -> RenderResult<Vec<f64>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| RenderError::config("Isolabel isovalues must be numbers").with_param("json", v))
            })
            .collect(),
        range @ Value::Object(_) => {
            let range: IsovalueRange = serde_json::from_value(range)
                .map_err(|e| RenderError::from(e).trace("Invalid isovalues range"))?;
            range.values()
        }
        other => Err(RenderError::config("Isolabel isovalues setting must be an object or an array of numbers")
            .with_param("json", other)),
    }
}

#[derive(Debug)]
pub struct IsolabelLayer {
    base: LayerBase,
    settings: ContourSettings,
    isolines: Vec<Isoline>,
    label: Label,
    placement: LabelPlacement,
    isovalues: Vec<f64>,
}

impl IsolabelLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            settings: ContourSettings::default(),
            isolines: Vec::new(),
            label: Label::default(),
            placement: LabelPlacement::default(),
            isovalues: Vec::new(),
        }
    }

    fn take_placement(cfg: &mut ConfigObject) -> RenderResult<LabelPlacement> {
        let mut p = LabelPlacement::default();
        if let Some(upright) = cfg.take_bool("upright")? {
            p.upright = upright;
        }
        for (key, field) in [
            ("max_angle", &mut p.max_angle),
            ("min_distance_edge", &mut p.min_distance_edge),
            ("max_distance_edge", &mut p.max_distance_edge),
            ("min_distance_other", &mut p.min_distance_other),
            ("min_distance_same", &mut p.min_distance_same),
            ("min_distance_self", &mut p.min_distance_self),
            ("max_curvature", &mut p.max_curvature),
        ] {
            if let Some(v) = cfg.take_f64(key)? {
                *field = v;
            }
        }
        if let Some(size) = cfg.take_i64("stencil_size")? {
            if size < 1 {
                return Err(RenderError::config("stencil_size must be positive").with_param("stencil_size", size));
            }
            p.stencil_size = size as usize;
        }
        if let Some(angles) = cfg.take_parsed::<Vec<f64>>("angles")? {
            p.angles = angles;
        }
        Ok(p)
    }

    fn generate_labels(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let contoured = contour_lines(&mut self.settings, &mut self.base, &self.isovalues, state)?;
        let pbox = contoured.pbox;

        let pixel_lines: Vec<(f64, geo::MultiLineString<f64>)> = self
            .isovalues
            .iter()
            .zip(&contoured.lines)
            .filter_map(|(value, geom)| match renderer::geometry::to_pixels(geom, &pbox) {
                geo::Geometry::MultiLineString(ml) if !ml.0.is_empty() => Some((*value, ml)),
                _ => None,
            })
            .collect();

        let candidates = self.placement.find_candidates(&pixel_lines);
        let mut selected =
            self.placement
                .select_best_candidates(&candidates, pbox.width as f64, pbox.height as f64);

        let auto = self.label.orientation == Orientation::Auto;
        if auto {
            let grid = &contoured.grid;
            let to_grid = projection::CoordinateTransformation::new(contoured.crs, grid.crs);
            self.placement.fix_orientation(&mut selected, |px, py| {
                let (wx, wy) = pbox.itransform(px, py);
                let (gx, gy) = to_grid.transform(wx, wy)?;
                grid.value_at_world(gx, gy)
            });
        }

        self.base.add_clip_rect(nodes, state, &pbox);
        let mut group = self.base.group(globals, state)?;

        for candidate in &selected {
            if candidate.angle.is_nan() {
                continue;
            }
            let text = self.label.print(candidate.isovalue);
            if text.is_empty() {
                continue;
            }
            let mut node = Node::tag("<text", "</text>");
            node.cdata = Some(xml_escape(&text));

            if let Some(isoline) = self.isolines.iter().find(|i| i.value == candidate.isovalue) {
                state.add_attributes(globals, &isoline.attributes)?;
                node.attributes.extend(isoline.attributes.clone());
            }

            let (dx, dy) = (self.label.dx as f64, self.label.dy as f64);
            let transform = if auto {
                let (sine, cosine) = candidate.angle.to_radians().sin_cos();
                format!(
                    "translate({} {}) rotate({})",
                    (candidate.x + dx * cosine + dy * sine).round(),
                    (candidate.y + dx * sine - dy * cosine).round(),
                    candidate.angle.round()
                )
            } else {
                format!("translate({} {})", (candidate.x + dx).round(), (candidate.y - dy).round())
            };
            node.attributes.insert("transform".to_string(), transform);
            group.layers.push(node);
        }

        tracing::debug!(
            qid = %self.base.qid,
            candidates = candidates.len(),
            labels = group.layers.len(),
            "placed isolabels"
        );
        nodes.push(group);
        Ok(())
    }
}

impl Layer for IsolabelLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, state: &mut State) -> RenderResult<()> {
        self.settings = ContourSettings::take(cfg)?;
        self.settings.parameter()?;
        let autoqid = cfg.take_string("autoqid")?;
        if let Some(value) = cfg.take_value("isolines") {
            self.isolines = parse_isolines(value, autoqid.as_deref(), state)?;
        }
        if let Some(value) = cfg.take_value("label") {
            self.label = Label::parse(value)?;
        }
        self.label.resolve(state)?;
        self.placement = Self::take_placement(cfg)?;

        let mut isovalues = Vec::new();
        if let Some(value) = cfg.take_value("isobands") {
            for band in Isoband::parse_list(value)? {
                isovalues.extend(band.lolimit);
                isovalues.extend(band.hilimit);
            }
        }
        if let Some(value) = cfg.take_value("isovalues") {
            isovalues.extend(parse_isovalues(value)?);
        }
        isovalues.extend(self.isolines.iter().map(|i| i.value));
        isovalues.retain(|v| v.is_finite());
        isovalues.sort_by(f64::total_cmp);
        isovalues.dedup();
        self.isovalues = isovalues;
        Ok(())
    }

    fn probe_projection(&self, state: &State) -> RenderResult<Option<Projection>> {
        self.settings.probe_projection(&self.base, state)
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? || self.isovalues.is_empty() {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_labels(globals, nodes, state)
            .trace("Isolabel layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, self.settings.hash_value());
        for isoline in &self.isolines {
            hash_combine(&mut seed, isoline.hash_value());
        }
        hash_combine(&mut seed, self.label.hash_value());
        hash_combine(&mut seed, self.placement.hash_value());
        for v in &self.isovalues {
            hash_combine(&mut seed, hash_f64(*v));
        }
        seed
    }
}
