//! Painted raster images embedded as PNG data URLs.
//!
//! The data field is sampled at every pixel centre, then the land, sea and
//! data painters are composited in a fixed order:
//!
//! 1. sea, land and land border painters positioned at the bottom
//! 2. data shadows
//! 3. the data painter
//! 4. data borders
//! 5. sea, land and land border painters positioned at the top

use super::{Layer, LayerBase};
use crate::engine::{GridData, ShapeQuery};
use crate::field::{fetch_grid, sample_grid, ValueScaling};
use crate::node::{Attributes, Globals, Node};
use crate::projection::Projection;
use crate::state::State;
use base64::Engine as _;
use map_common::{hash_combine, hash_value, ConfigObject, CrsCode, PixelBox, RenderError, RenderResult, ResultExt};
use projection::CoordinateTransformation;
use renderer::colormap::{parse_argb, resolve_color_map};
use renderer::painter::{
    create_painter, Border, BorderPainter, RangePainter, ShadowPainter, ValueRange,
};
use renderer::{Canvas, ColorPainter, Parameters};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Where a land or sea painter goes relative to the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaintPosition {
    #[default]
    None,
    Bottom,
    Top,
}

impl PaintPosition {
    fn parse(name: &str, key: &str) -> RenderResult<Self> {
        match name {
            "none" => Ok(Self::None),
            "bottom" => Ok(Self::Bottom),
            "top" => Ok(Self::Top),
            _ => Err(RenderError::config("Unknown paint position").with_param(key, name)),
        }
    }

    fn take(cfg: &mut ConfigObject, key: &str) -> RenderResult<Self> {
        match cfg.take_string(key)? {
            None => Ok(Self::None),
            Some(name) => Self::parse(&name, key),
        }
    }
}

/// The fields painted by a raster layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RasterSource {
    Scalar(String),
    Vector { direction: String, speed: String },
}

impl RasterSource {
    /// Name of the field that drives the data projection and the object key.
    fn primary(&self) -> &str {
        match self {
            Self::Scalar(parameter) => parameter,
            Self::Vector { direction, .. } => direction,
        }
    }
}

fn take_color(cfg: &mut ConfigObject, key: &str, default: u32) -> RenderResult<u32> {
    match cfg.take_string(key)? {
        None => Ok(default),
        Some(text) => parse_argb(&text).map_err(|e| e.with_param("setting", key)),
    }
}

/// `painter_parameters` values may be strings or numbers.
fn take_parameters(cfg: &mut ConfigObject) -> RenderResult<Parameters> {
    let Some(value) = cfg.take_value("painter_parameters") else {
        return Ok(Parameters::new());
    };
    let Value::Object(map) = value else {
        return Err(RenderError::config("painter_parameters must be a JSON object"));
    };
    map.into_iter()
        .map(|(name, value)| match value {
            Value::String(s) => Ok((name, s)),
            Value::Number(n) => Ok((name, n.to_string())),
            Value::Bool(b) => Ok((name, b.to_string())),
            other => Err(RenderError::config("Invalid painter parameter")
                .with_param("parameter", &name)
                .with_param("value", other)),
        })
        .collect()
}

/// Rasterize the land shape into a bottom-up land fraction raster.
fn land_mask(shape: &geo::Geometry<f64>, crs: CrsCode, pbox: &PixelBox) -> RenderResult<Vec<f32>> {
    let world = renderer::geometry::transform_geometry(shape, &CoordinateTransformation::from_wgs84(crs));
    let pixels = renderer::geometry::to_pixels(&world, pbox);
    let width = pbox.width as usize;
    let height = pbox.height as usize;

    let mut pixmap = tiny_skia::Pixmap::new(pbox.width, pbox.height)
        .ok_or_else(|| RenderError::data("Cannot allocate the land mask").with_param("width", pbox.width))?;

    let mut builder = tiny_skia::PathBuilder::new();
    let mut add_ring = |ring: &geo::LineString<f64>| {
        let mut coords = ring.0.iter();
        if let Some(first) = coords.next() {
            builder.move_to(first.x as f32, first.y as f32);
            for c in coords {
                builder.line_to(c.x as f32, c.y as f32);
            }
            builder.close();
        }
    };
    let mut add_polygon = |p: &geo::Polygon<f64>| {
        add_ring(p.exterior());
        for hole in p.interiors() {
            add_ring(hole);
        }
    };
    for polygon in super::polygons(pixels).0.iter() {
        add_polygon(polygon);
    }

    if let Some(path) = builder.finish() {
        let mut paint = tiny_skia::Paint::default();
        paint.set_color_rgba8(0, 0, 0, 255);
        paint.anti_alias = true;
        pixmap.fill_path(
            &path,
            &paint,
            tiny_skia::FillRule::EvenOdd,
            tiny_skia::Transform::identity(),
            None,
        );
    }

    let mut land = vec![0.0f32; width * height];
    for (i, pixel) in pixmap.pixels().iter().enumerate() {
        let (x, y) = (i % width, i / width);
        land[(height - y - 1) * width + x] = pixel.alpha() as f32 / 255.0;
    }
    Ok(land)
}

pub struct RasterLayer {
    base: LayerBase,
    source: Option<RasterSource>,
    scaling: ValueScaling,
    painter_name: String,
    painter: Option<Box<dyn ColorPainter>>,
    painter_parameters: Parameters,
    land_position: PaintPosition,
    land_color: u32,
    sea_position: PaintPosition,
    sea_color: u32,
    land_border_position: PaintPosition,
    land_border_color: u32,
    sea_border_color: u32,
    land_shape: Option<ShapeQuery>,
    data_borders: BorderPainter,
    data_shadows: ShadowPainter,
    compression: u32,
}

impl fmt::Debug for RasterLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterLayer")
            .field("base", &self.base)
            .field("source", &self.source)
            .field("painter", &self.painter_name)
            .field("painter_parameters", &self.painter_parameters)
            .finish_non_exhaustive()
    }
}

impl RasterLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            source: None,
            scaling: ValueScaling::default(),
            painter_name: "default".to_string(),
            painter: None,
            painter_parameters: Parameters::new(),
            land_position: PaintPosition::None,
            land_color: 0,
            sea_position: PaintPosition::None,
            sea_color: 0,
            land_border_position: PaintPosition::None,
            land_border_color: 0xFF00_0000,
            sea_border_color: 0xFFFF_FFFF,
            land_shape: None,
            data_borders: BorderPainter::default(),
            data_shadows: ShadowPainter::default(),
            compression: 1,
        }
    }

    fn source(&self) -> RenderResult<&RasterSource> {
        self.source
            .as_ref()
            .ok_or_else(|| RenderError::config("Raster layer needs a parameter or direction and speed"))
    }

    fn fetch_values(&mut self, state: &State, crs: CrsCode, pbox: &PixelBox) -> RenderResult<(Vec<f32>, Vec<f32>)> {
        let fetch = |base: &mut LayerBase, name: &str| -> RenderResult<Arc<GridData>> {
            let grid = fetch_grid(state, &base.properties, name, None, None)?;
            base.update_projection(&grid);
            Ok(grid)
        };
        let source = self.source()?.clone();
        let (mut values1, mut values2) = match &source {
            RasterSource::Scalar(parameter) => {
                let grid = fetch(&mut self.base, parameter)?;
                (sample_grid(&grid, crs, pbox), Vec::new())
            }
            RasterSource::Vector { direction, speed } => {
                let direction = fetch(&mut self.base, direction)?;
                let speed = fetch(&mut self.base, speed)?;
                (sample_grid(&direction, crs, pbox), sample_grid(&speed, crs, pbox))
            }
        };
        // Directions are angles, only the magnitude is converted
        if values2.is_empty() {
            self.scaling.apply(&mut values1, state)?;
        } else {
            self.scaling.apply(&mut values2, state)?;
        }
        Ok((values1, values2))
    }

    fn land(&self, state: &State, crs: CrsCode, pbox: &PixelBox) -> RenderResult<Vec<f32>> {
        let Some(query) = &self.land_shape else {
            return Ok(Vec::new());
        };
        match state.engines().shapes.shape(query)? {
            Some(shape) if !renderer::geometry::is_empty(&shape) => land_mask(&shape, crs, pbox),
            _ => Err(RenderError::data("Land shape is empty").with_param("table", &query.table)),
        }
    }

    /// The land, sea and land border painters at one position.
    fn paint_surface(&self, canvas: &mut Canvas<'_>, land: &[f32], position: PaintPosition) -> RenderResult<()> {
        if land.is_empty() {
            return Ok(());
        }
        let none = Parameters::new();
        if self.sea_position == position {
            let mut sea = RangePainter::default();
            sea.add_range(ValueRange::solid(-0.1, 0.1, self.sea_color));
            sea.set_image_colors(canvas, land, &none)?;
        }
        if self.land_position == position {
            let mut painter = RangePainter::default();
            painter.add_range(ValueRange::solid(0.9, 1.1, self.land_color));
            painter.set_image_colors(canvas, land, &none)?;
        }
        if self.land_border_position == position {
            let mut border = BorderPainter::default();
            border.add_border(Border {
                inside_value_min: 0.9,
                inside_color: self.land_border_color,
                outside_color: self.sea_border_color,
                ..Default::default()
            });
            border.set_image_colors(canvas, land, &none)?;
        }
        Ok(())
    }

    fn paint(&mut self, values1: &[f32], values2: &[f32], land: &[f32], pbox: &PixelBox, state: &State) -> RenderResult<Vec<u32>> {
        let width = pbox.width as usize;
        let height = pbox.height as usize;
        let (loop_step, loop_steps) = state.animation();
        let none = Parameters::new();

        let mut image = vec![0u32; width * height];
        let mut canvas = Canvas::new(width, height, &mut image, land).with_animation(loop_step, loop_steps);

        self.paint_surface(&mut canvas, land, PaintPosition::Bottom)?;
        if self.data_shadows.shadow_count() > 0 {
            self.data_shadows.set_image_colors(&mut canvas, values1, &none)?;
        }
        if let Some(painter) = self.painter.as_mut() {
            if values2.is_empty() {
                painter.set_image_colors(&mut canvas, values1, &self.painter_parameters)?;
            } else {
                painter.set_image_colors2(&mut canvas, values1, values2, &self.painter_parameters)?;
            }
        }
        if self.data_borders.border_count() > 0 {
            self.data_borders.set_image_colors(&mut canvas, values1, &none)?;
        }
        self.paint_surface(&mut canvas, land, PaintPosition::Top)?;
        Ok(image)
    }

    fn generate_raster(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let crs = self.base.crs()?;
        let pbox = self.base.pixel_box()?;
        let (values1, values2) = self.fetch_values(state, crs, &pbox)?;
        self.base.note_data_time(state);
        let land = self.land(state, crs, &pbox)?;

        let image = self.paint(&values1, &values2, &land, &pbox, state)?;
        let png = renderer::png::encode_argb(&image, pbox.width as usize, pbox.height as usize, self.compression)?;

        let qid = self.base.qid.clone();
        state.require_id(&qid)?;
        globals.includes.insert(
            qid.clone(),
            format!(
                "<image id=\"{}\" href=\"data:image/png;base64,{}\" x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" />\n\n",
                qid,
                base64::engine::general_purpose::STANDARD.encode(&png),
                pbox.width,
                pbox.height
            ),
        );

        let world = pbox.world;
        globals.bbox = Some(format!("{},{},{},{}", world.min_x, world.min_y, world.max_x, world.max_y));
        let object_key = format!("raster:{}:{}", self.source()?.primary(), qid);
        globals.objects.entry(object_key).or_default();

        let mut group = self.base.group(globals, state)?;
        group.tags.push(Node::use_tag(&qid, Attributes::new()));
        nodes.push(group);

        tracing::debug!(
            qid = %qid,
            painter = %self.painter_name,
            width = pbox.width,
            height = pbox.height,
            bytes = png.len(),
            "painted raster"
        );
        Ok(())
    }
}

impl Layer for RasterLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, state: &mut State) -> RenderResult<()> {
        let parameter = cfg.take_string("parameter")?;
        let direction = cfg.take_string("direction")?;
        let speed = cfg.take_string("speed")?;
        self.source = match (parameter, direction, speed) {
            (Some(parameter), None, None) => Some(RasterSource::Scalar(parameter)),
            (None, Some(direction), Some(speed)) => Some(RasterSource::Vector { direction, speed }),
            _ => None,
        };
        self.source()?;

        self.scaling = ValueScaling::take(cfg)?;

        if let Some(name) = cfg.take_string("data_painter")? {
            self.painter_name = name;
        }
        let mut painter = create_painter(&self.painter_name)?;
        painter.init(cfg, &*state)?;
        self.painter_parameters = take_parameters(cfg)?;
        if let Some(name) = self.painter_parameters.get("colormap") {
            painter.add_color_map(name, resolve_color_map(name, &*state)?);
        }
        self.painter = Some(painter);

        self.land_position = PaintPosition::take(cfg, "land_position")?;
        self.land_color = take_color(cfg, "land_color", 0)?;
        self.sea_position = PaintPosition::take(cfg, "sea_position")?;
        self.sea_color = take_color(cfg, "sea_color", 0)?;
        self.land_border_position = PaintPosition::take(cfg, "land_border_position")?;
        self.land_border_color = take_color(cfg, "land_border_color", self.land_border_color)?;
        self.sea_border_color = take_color(cfg, "sea_border_color", self.sea_border_color)?;
        self.land_shape = cfg.take_parsed("land_shape")?;

        let uses_land = [self.land_position, self.sea_position, self.land_border_position]
            .iter()
            .any(|p| *p != PaintPosition::None);
        if uses_land && self.land_shape.is_none() {
            return Err(RenderError::config("Land and sea painting requires a land_shape"));
        }

        if let Some(borders) = cfg.take_value("data_borders") {
            let mut borders_cfg = ConfigObject::from_value(json!({ "borders": borders }), "data_borders")?;
            self.data_borders.init_borders(&mut borders_cfg)?;
            borders_cfg.finish("data_borders")?;
        }
        if let Some(shadows) = cfg.take_value("data_shadows") {
            let mut shadows_cfg = ConfigObject::from_value(json!({ "shadows": shadows }), "data_shadows")?;
            self.data_shadows.init(&mut shadows_cfg, &*state)?;
            shadows_cfg.finish("data_shadows")?;
        }

        if let Some(compression) = cfg.take_i64("compression")? {
            if !(0..=9).contains(&compression) {
                return Err(RenderError::config("PNG compression must be in the range 0-9")
                    .with_param("compression", compression));
            }
            self.compression = compression as u32;
        }
        Ok(())
    }

    fn probe_projection(&self, state: &State) -> RenderResult<Option<Projection>> {
        let parameter = self.source.as_ref().map(RasterSource::primary);
        self.base.probe_data_projection(state, parameter)
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_raster(globals, nodes, state)
            .trace("Raster layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.source));
        hash_combine(&mut seed, self.scaling.hash_value());
        hash_combine(&mut seed, hash_value(&self.painter_name));
        if let Some(painter) = &self.painter {
            hash_combine(&mut seed, painter.hash_value());
        }
        hash_combine(&mut seed, hash_value(&self.painter_parameters));
        hash_combine(
            &mut seed,
            hash_value(&(
                self.land_position,
                self.land_color,
                self.sea_position,
                self.sea_color,
                self.land_border_position,
                self.land_border_color,
                self.sea_border_color,
            )),
        );
        hash_combine(&mut seed, hash_value(&self.land_shape));
        hash_combine(&mut seed, self.data_borders.hash_value());
        hash_combine(&mut seed, self.data_shadows.hash_value());
        hash_combine(&mut seed, self.compression as u64);
        seed
    }
}
