//! A geographic frame around the map with optional degree scale tics.

use super::{add_path, take_precision, Layer, LayerBase};
use crate::node::{parse_attributes, Attributes, Globals, Node};
use crate::state::State;
use geo::{Densify, Euclidean, Geometry, LineString, Polygon};
use map_common::{
    hash_combine, hash_f64, hash_value, ConfigObject, PixelBox, RenderError, RenderResult, ResultExt,
};
use projection::CoordinateTransformation;
use renderer::geometry::format_number;
use std::collections::BTreeMap;

/// Estimated glyph width relative to the font size.
const GLYPH_WIDTH: f64 = 0.6;
const DEFAULT_FONT_SIZE: f64 = 10.0;

/// A lon/lat rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Border {
    left: f64,
    bottom: f64,
    right: f64,
    top: f64,
}

impl Border {
    /// Parse `"lon lat, lon lat"` as the bottom left and top right corners.
    fn parse(text: &str) -> RenderResult<Self> {
        let invalid = || {
            RenderError::config("Invalid frame border, expected 'lon lat, lon lat' (bottom left, top right)")
                .with_param("border", text)
        };
        let corner = |part: &str| -> RenderResult<(f64, f64)> {
            let mut numbers = part.split_whitespace().map(str::parse::<f64>);
            match (numbers.next(), numbers.next(), numbers.next()) {
                (Some(Ok(lon)), Some(Ok(lat)), None) => Ok((lon, lat)),
                _ => Err(invalid()),
            }
        };
        let (bottom_left, top_right) = text.split_once(',').ok_or_else(invalid)?;
        let (left, bottom) = corner(bottom_left)?;
        let (right, top) = corner(top_right)?;
        if left >= right || bottom >= top {
            return Err(invalid());
        }
        Ok(Self { left, bottom, right, top })
    }

    fn ring(&self, clockwise: bool) -> LineString<f64> {
        let mut coords = vec![
            (self.left, self.bottom),
            (self.right, self.bottom),
            (self.right, self.top),
            (self.left, self.top),
            (self.left, self.bottom),
        ];
        if clockwise {
            coords.reverse();
        }
        LineString::from(coords)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = hash_f64(self.left);
        for v in [self.bottom, self.right, self.top] {
            hash_combine(&mut seed, hash_f64(v));
        }
        seed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Inside,
    Outside,
}

impl Side {
    fn take(cfg: &mut ConfigObject, key: &str) -> RenderResult<Self> {
        match cfg.take_string(key)?.as_deref() {
            None | Some("outside") => Ok(Self::Outside),
            Some("inside") => Ok(Self::Inside),
            Some(other) => Err(RenderError::config("Expected inside or outside").with_param(key, other)),
        }
    }

    /// `+1` pointing out of the frame, `-1` into it.
    fn sign(self) -> f64 {
        match self {
            Self::Outside => 1.0,
            Self::Inside => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tic {
    step: f64,
    /// Length in pixels
    length: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Scale {
    tic_position: Side,
    label_position: Side,
    /// Long, intermediate and small tics in order of precedence
    tics: Vec<Tic>,
    label_step: Option<f64>,
}

impl Scale {
    fn init(mut cfg: ConfigObject) -> RenderResult<Self> {
        let mut tics = Vec::new();
        for kind in ["long", "intermediate", "small"] {
            let step = cfg.take_f64(&format!("{}_tic_step", kind))?;
            let length = cfg.take_f64(&format!("{}_tic_length", kind))?;
            if let Some(step) = step {
                if step <= 0.0 {
                    return Err(RenderError::config("Tic step must be positive").with_param("kind", kind));
                }
                tics.push(Tic {
                    step,
                    length: length.unwrap_or(0.0),
                });
            }
        }
        let scale = Self {
            tic_position: Side::take(&mut cfg, "tic_position")?,
            label_position: Side::take(&mut cfg, "label_position")?,
            tics,
            label_step: cfg.take_f64("label_step")?.filter(|&s| s > 0.0),
        };
        cfg.finish("frame scale")?;
        Ok(scale)
    }

    /// Tic values strictly between `min` and `max`, the highest ranking
    /// class winning where steps coincide.
    fn tics_between(&self, min: f64, max: f64) -> BTreeMap<i64, (f64, Tic)> {
        let mut out = BTreeMap::new();
        for tic in &self.tics {
            let mut v = (min / tic.step).floor() * tic.step + tic.step;
            while v < max {
                if v > min {
                    out.entry((v * 1000.0).round() as i64).or_insert((v, *tic));
                }
                v += tic.step;
            }
        }
        out
    }

    fn is_labelled(&self, value: f64) -> bool {
        self.label_step.is_some_and(|step| {
            let r = value.rem_euclid(step);
            r < 0.01 || step - r < 0.01
        })
    }

    fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.tic_position);
        hash_combine(&mut seed, hash_value(&self.label_position));
        for tic in &self.tics {
            hash_combine(&mut seed, hash_f64(tic.step));
            hash_combine(&mut seed, hash_f64(tic.length));
        }
        hash_combine(&mut seed, self.label_step.map_or(0, hash_f64));
        seed
    }
}

#[derive(Debug)]
pub struct FrameLayer {
    base: LayerBase,
    inner: Option<Border>,
    outer: Option<Border>,
    pattern: Option<String>,
    precision: Option<usize>,
    scale: Option<Scale>,
    scale_attributes: Attributes,
}

impl FrameLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            inner: None,
            outer: None,
            pattern: None,
            precision: None,
            scale: None,
            scale_attributes: Attributes::new(),
        }
    }

    fn inner(&self) -> RenderResult<Border> {
        self.inner
            .ok_or_else(|| RenderError::config("Frame layer must have an inner border"))
    }

    /// The frame in WGS84: the outer border with the inner one as a hole.
    fn geometry(&self) -> RenderResult<Polygon<f64>> {
        let inner = self.inner()?;
        let polygon = match &self.outer {
            Some(outer) => Polygon::new(outer.ring(false), vec![inner.ring(true)]),
            None => Polygon::new(inner.ring(false), Vec::new()),
        };
        // Borders follow parallels and meridians, not straight lines
        Ok(Euclidean.densify(&polygon, 1.0))
    }

    fn font_size(&self) -> f64 {
        self.scale_attributes
            .get("font-size")
            .and_then(|s| s.trim_end_matches("px").trim().parse::<f64>().ok())
            .unwrap_or(DEFAULT_FONT_SIZE)
    }

    fn tic_node(&self, x1: f64, y1: f64, x2: f64, y2: f64) -> Node {
        let mut node = Node::tag("<line", "/>");
        for (name, value) in [("x1", x1), ("y1", y1), ("x2", x2), ("y2", y2)] {
            node.attributes.insert(name.to_string(), format_number(value, 1));
        }
        for name in ["stroke", "stroke-width"] {
            if let Some(value) = self.scale_attributes.get(name) {
                node.attributes.insert(name.to_string(), value.clone());
            }
        }
        node
    }

    fn label_node(&self, x: f64, y: f64, text: &str) -> Node {
        let mut node = Node::tag("<text", "</text>");
        node.attributes.insert("x".to_string(), (x.round() as i64).to_string());
        node.attributes.insert("y".to_string(), (y.round() as i64).to_string());
        for name in ["font-family", "font-size", "font-style", "font-weight", "text-anchor"] {
            if let Some(value) = self.scale_attributes.get(name) {
                node.attributes.insert(name.to_string(), value.clone());
            }
        }
        node.cdata = Some(text.to_string());
        node
    }

    /// Tics and degree labels along the inner border, in pixels.
    fn scale_nodes(&self, scale: &Scale, pbox: &PixelBox, transformation: &CoordinateTransformation) -> RenderResult<Vec<Node>> {
        let inner = self.inner()?;
        let pixel = |lon: f64, lat: f64| {
            transformation
                .transform(lon, lat)
                .map(|(x, y)| pbox.transform(x, y))
        };
        let tic_sign = scale.tic_position.sign();
        let label_outside = scale.label_position == Side::Outside;
        let height = self.font_size();
        let text_width = |text: &str| text.chars().count() as f64 * height * GLYPH_WIDTH;
        let mut nodes = Vec::new();

        for (lat, tic) in scale.tics_between(inner.bottom, inner.top).into_values() {
            let (Some((xl, y)), Some((xr, yr))) = (pixel(inner.left, lat), pixel(inner.right, lat)) else {
                continue;
            };
            // Outward is left on the left edge and right on the right edge
            nodes.push(self.tic_node(xl, y, xl - tic_sign * tic.length, y));
            nodes.push(self.tic_node(xr, yr, xr + tic_sign * tic.length, yr));
            if !scale.is_labelled(lat) {
                continue;
            }
            let text = format!("{}°", lat.round() as i64);
            let w = text_width(&text);
            let (left, right) = match (label_outside, scale.tic_position) {
                (true, Side::Outside) => (xl - w - 1.3 * tic.length, xr + 1.3 * tic.length),
                (true, Side::Inside) => (xl - w - 0.3 * tic.length, xr + 0.3 * tic.length),
                (false, Side::Outside) => (xl + 0.3 * tic.length, xr - w - 0.3 * tic.length),
                (false, Side::Inside) => (xl + 1.3 * tic.length, xr - w - 1.3 * tic.length),
            };
            nodes.push(self.label_node(left, y + height / 2.0, &text));
            nodes.push(self.label_node(right, yr + height / 2.0, &text));
        }

        for (lon, tic) in scale.tics_between(inner.left, inner.right).into_values() {
            let (Some((xt, yt)), Some((xb, yb))) = (pixel(lon, inner.top), pixel(lon, inner.bottom)) else {
                continue;
            };
            // Outward is up on the top edge and down on the bottom edge
            nodes.push(self.tic_node(xt, yt, xt, yt - tic_sign * tic.length));
            nodes.push(self.tic_node(xb, yb, xb, yb + tic_sign * tic.length));
            if !scale.is_labelled(lon) {
                continue;
            }
            let text = format!("{}°", lon.round() as i64);
            let w = text_width(&text);
            let (top, bottom) = match (label_outside, scale.tic_position) {
                (true, Side::Outside) => (yt - 1.3 * tic.length, yb + height + 1.3 * tic.length),
                (true, Side::Inside) => (yt - 0.3 * tic.length, yb + height + 0.3 * tic.length),
                (false, Side::Outside) => (yt + height + 0.3 * tic.length, yb - 0.3 * tic.length),
                (false, Side::Inside) => (yt + height + 1.3 * tic.length, yb - 1.3 * tic.length),
            };
            nodes.push(self.label_node(xt - w / 2.0, top, &text));
            nodes.push(self.label_node(xb - w / 2.0, bottom, &text));
        }
        Ok(nodes)
    }

    fn generate_frame(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let crs = self.base.crs()?;
        let pbox = self.base.pixel_box()?;
        let transformation = CoordinateTransformation::from_wgs84(crs);

        let geom = renderer::geometry::transform_geometry(&Geometry::Polygon(self.geometry()?), &transformation);
        let iri = self.base.qid.clone();
        let path = Node {
            iri: Some(iri.clone()),
            layertype: Some("frame".to_string()),
            ..Default::default()
        };
        let precision = self.precision.unwrap_or_else(|| state.precision());
        add_path(globals, state, &format!("frame:{}", iri), path, &geom, crs, &pbox, precision)?;

        if let Some(pattern) = &self.pattern {
            if state.add_id(pattern) {
                let text = state
                    .registries
                    .patterns
                    .get(pattern)
                    .ok_or_else(|| RenderError::config("Pattern is not defined").with_param("pattern", pattern))?
                    .to_string();
                globals.includes.insert(pattern.clone(), text);
            }
        }

        if !state.in_defs() {
            let mut group = self.base.group(globals, state)?;
            group.tags.push(Node::use_tag(&iri, Attributes::new()));
            nodes.push(group);
        }

        if let Some(scale) = &self.scale {
            let tics = self.scale_nodes(scale, &pbox, &transformation)?;
            tracing::debug!(qid = %self.base.qid, nodes = tics.len(), "generated frame scale");
            nodes.extend(tics);
        }
        Ok(())
    }
}

impl Layer for FrameLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        let mut dimension = cfg
            .take_object("dimension")?
            .ok_or_else(|| RenderError::config("Frame layer must have a dimension setting"))?;
        let inner = dimension
            .take_string("inner_border")?
            .ok_or_else(|| RenderError::config("Frame layer must have an inner_border setting"))?;
        self.inner = Some(Border::parse(&inner)?);
        if let Some(outer) = dimension.take_string("outer_border")? {
            self.outer = Some(Border::parse(&outer)?);
        }
        dimension.finish("frame dimension")?;

        self.pattern = cfg.take_string("pattern")?;
        self.precision = take_precision(cfg)?;
        if let Some(value) = cfg.take_value("scale_attributes") {
            self.scale_attributes = parse_attributes(value).trace("Invalid frame scale_attributes")?;
        }
        if let Some(scale) = cfg.take_object("scale")? {
            self.scale = Some(Scale::init(scale)?);
        }
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_frame(globals, nodes, state)
            .trace("Frame layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, self.inner.as_ref().map_or(0, Border::hash_value));
        hash_combine(&mut seed, self.outer.as_ref().map_or(0, Border::hash_value));
        hash_combine(&mut seed, hash_value(&self.pattern));
        hash_combine(&mut seed, hash_value(&self.precision));
        hash_combine(&mut seed, self.scale.as_ref().map_or(0, Scale::hash_value));
        hash_combine(&mut seed, hash_value(&self.scale_attributes));
        seed
    }
}
