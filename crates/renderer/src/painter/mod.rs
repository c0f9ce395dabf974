//! Raster painters that composite data values onto an ARGB image.
//!
//! The image is row-major top-down while value rasters are row-major
//! bottom-up, so painters read source row `height - y - 1` when writing
//! image row `y`. The land mask shares the value raster layout.

mod argb;
mod border;
mod rain;
mod range;
mod shading;
mod shadow;
mod stream;

pub use argb::ArgbPainter;
pub use border::{Border, BorderPainter};
pub use rain::RainPainter;
pub use range::{RangePainter, ValueRange};
pub use shading::ShadingPainter;
pub use shadow::{Shadow, ShadowPainter};
pub use stream::{StreamPainter, StreamSpeed};

use crate::colormap::ColorMapProvider;
use map_common::{ConfigObject, RenderError, RenderResult};
use std::collections::BTreeMap;

/// Marker for a missing value in data rasters.
pub const PARAM_VALUE_MISSING: f32 = -16_777_216.0;

/// Land mask values above this count as land.
pub const LAND_THRESHOLD: f32 = 0.9;

/// Per-call string parameters, as given by `painter_parameters`.
pub type Parameters = BTreeMap<String, String>;

/// True for NaN and the missing-value marker.
#[inline]
pub fn is_missing(value: f32) -> bool {
    value.is_nan() || value == PARAM_VALUE_MISSING
}

/// Composite `src` over `dst` (non-premultiplied ARGB).
pub fn merge_argb(src: u32, dst: u32) -> u32 {
    let a = src >> 24;
    if a == 0 {
        return dst;
    }
    if a == 255 {
        return src;
    }
    let ad = dst >> 24;
    let inv = 255 - a;

    let blend = |shift: u32| -> u32 {
        let s = (src >> shift) & 0xFF;
        let d = (dst >> shift) & 0xFF;
        ((s * a + d * inv + 127) / 255) & 0xFF
    };

    let alpha = (a + (ad * inv + 127) / 255).min(255);
    (alpha << 24) | (blend(16) << 16) | (blend(8) << 8) | blend(0)
}

/// Scale the alpha channel of `color` by `opacity`, saturating at 255.
pub fn scale_alpha(color: u32, opacity: f64) -> u32 {
    if opacity == 1.0 {
        return color;
    }
    let a = ((color >> 24) as f64 * opacity).max(0.0) as u32;
    (a.min(255) << 24) | (color & 0x00FF_FFFF)
}

/// The target image plus the animation frame and land mask.
#[derive(Debug)]
pub struct Canvas<'a> {
    pub width: usize,
    pub height: usize,
    pub loop_step: u32,
    pub loop_steps: u32,
    /// Top-down ARGB pixels
    pub image: &'a mut [u32],
    /// Bottom-up land fraction, or empty when unknown
    pub land: &'a [f32],
}

impl<'a> Canvas<'a> {
    pub fn new(width: usize, height: usize, image: &'a mut [u32], land: &'a [f32]) -> Self {
        Self {
            width,
            height,
            loop_step: 0,
            loop_steps: 1,
            image,
            land,
        }
    }

    pub fn with_animation(mut self, loop_step: u32, loop_steps: u32) -> Self {
        self.loop_step = loop_step;
        self.loop_steps = loop_steps.max(1);
        self
    }

    pub fn size(&self) -> usize {
        self.width * self.height
    }

    /// Whether the bottom-up value index `idx` is over land.
    pub fn is_land(&self, idx: usize) -> bool {
        self.land.get(idx).map(|v| *v > LAND_THRESHOLD).unwrap_or(false)
    }

    /// Check that the image and a value raster agree on size.
    pub fn check(&self, values: &[f32], name: &str) -> RenderResult<()> {
        let sz = self.size();
        if sz == 0 {
            return Err(RenderError::data("The image size is zero"));
        }
        if self.image.len() != sz {
            return Err(RenderError::internal("Image buffer does not match its dimensions")
                .with_param("pixels", self.image.len())
                .with_param("expected", sz));
        }
        if values.len() != sz {
            return Err(RenderError::data("Invalid number of values")
                .with_param(name, values.len())
                .with_param("expected", sz));
        }
        if !self.land.is_empty() && self.land.len() != sz {
            return Err(RenderError::data("Invalid land mask size")
                .with_param("land", self.land.len())
                .with_param("expected", sz));
        }
        Ok(())
    }
}

/// Land and sea opacity multipliers shared by every painter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Opacity {
    pub land: f64,
    pub sea: f64,
}

impl Default for Opacity {
    fn default() -> Self {
        Self { land: 1.0, sea: 1.0 }
    }
}

impl Opacity {
    pub fn init(&mut self, cfg: &mut ConfigObject) -> RenderResult<()> {
        if let Some(v) = cfg.take_f64("data_opacity_land")? {
            self.land = v;
        }
        if let Some(v) = cfg.take_f64("data_opacity_sea")? {
            self.sea = v;
        }
        Ok(())
    }

    pub fn for_land(&self, land: bool) -> f64 {
        if land {
            self.land
        } else {
            self.sea
        }
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = 0;
        map_common::hash_combine(&mut seed, map_common::hash_f64(self.land));
        map_common::hash_combine(&mut seed, map_common::hash_f64(self.sea));
        seed
    }
}

/// A raster painter.
///
/// Painters are configured once with [`ColorPainter::init`] and may then
/// paint any number of frames.
pub trait ColorPainter: Send {
    /// Consume the painter's settings from the layer configuration.
    fn init(
        &mut self,
        cfg: &mut ConfigObject,
        colormaps: &dyn ColorMapProvider,
    ) -> RenderResult<()>;

    /// Paint one value field.
    fn set_image_colors(
        &mut self,
        canvas: &mut Canvas<'_>,
        values: &[f32],
        params: &Parameters,
    ) -> RenderResult<()>;

    /// Paint a direction field plus a magnitude field.
    ///
    /// Painters without a two-field mode paint the first field only.
    fn set_image_colors2(
        &mut self,
        canvas: &mut Canvas<'_>,
        values1: &[f32],
        values2: &[f32],
        params: &Parameters,
    ) -> RenderResult<()> {
        canvas.check(values2, "values2")?;
        self.set_image_colors(canvas, values1, params)
    }

    fn hash_value(&self) -> u64;

    /// Make a colour map available to parameter-driven lookups.
    ///
    /// Painters that take their colour map from `init` ignore this.
    fn add_color_map(&mut self, _name: &str, _color_map: crate::colormap::ColorMap) {}

    /// Whether the output changes from frame to frame.
    fn is_animator(&self) -> bool {
        false
    }
}

/// A painter that leaves the image untouched.
#[derive(Debug, Default)]
pub struct NullPainter {
    opacity: Opacity,
}

impl ColorPainter for NullPainter {
    fn init(&mut self, cfg: &mut ConfigObject, _: &dyn ColorMapProvider) -> RenderResult<()> {
        self.opacity.init(cfg)
    }

    fn set_image_colors(
        &mut self,
        canvas: &mut Canvas<'_>,
        values: &[f32],
        _: &Parameters,
    ) -> RenderResult<()> {
        canvas.check(values, "values")
    }

    fn hash_value(&self) -> u64 {
        self.opacity.hash_value()
    }
}

/// Create a painter by its `data_painter` name.
pub fn create_painter(name: &str) -> RenderResult<Box<dyn ColorPainter>> {
    let painter: Box<dyn ColorPainter> = match name {
        "null" => Box::new(NullPainter::default()),
        "default" => Box::new(ArgbPainter::default()),
        "range" => Box::new(RangePainter::default()),
        "stream" => Box::new(StreamPainter::default()),
        "rain" => Box::new(RainPainter::default()),
        "border" => Box::new(BorderPainter::default()),
        "shadow" => Box::new(ShadowPainter::default()),
        "shading" => Box::new(ShadingPainter::default()),
        _ => {
            return Err(RenderError::config("Unknown data painter").with_param("data_painter", name))
        }
    };
    Ok(painter)
}

/// Look up a required numeric parameter.
pub(crate) fn required_f64(params: &Parameters, key: &str) -> RenderResult<f64> {
    let raw = params.get(key).ok_or_else(|| {
        RenderError::config(format!("Cannot find the '{}' parameter", key))
    })?;
    parse_f64(raw, key)
}

pub(crate) fn parse_f64(raw: &str, key: &str) -> RenderResult<f64> {
    raw.trim().parse().map_err(|_| {
        RenderError::config("Invalid numeric parameter")
            .with_param("parameter", key)
            .with_param("value", raw)
    })
}

/// Look up a required colour parameter.
pub(crate) fn required_argb(params: &Parameters, key: &str) -> RenderResult<u32> {
    let raw = params.get(key).ok_or_else(|| {
        RenderError::config(format!("Cannot find the '{}' parameter", key))
    })?;
    crate::colormap::parse_argb(raw).map_err(|e| e.with_param("parameter", key))
}

pub(crate) fn optional_argb(params: &Parameters, key: &str, default: u32) -> RenderResult<u32> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => crate::colormap::parse_argb(raw).map_err(|e| e.with_param("parameter", key)),
    }
}

/// Colour string from a configuration object, defaulting when absent.
pub(crate) fn take_argb(cfg: &mut ConfigObject, key: &str, default: u32) -> RenderResult<u32> {
    match cfg.take_string(key)? {
        None => Ok(default),
        Some(s) => crate::colormap::parse_argb(&s).map_err(|e| e.with_param("setting", key)),
    }
}

/// Items of a JSON array setting, each as a configuration object.
pub(crate) fn take_object_array(
    cfg: &mut ConfigObject,
    key: &str,
    what: &str,
) -> RenderResult<Vec<ConfigObject>> {
    match cfg.take_value(key) {
        None => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter(|item| !item.is_null())
            .map(|item| ConfigObject::from_value(item, what))
            .collect(),
        Some(_) => Err(RenderError::config(format!("{} JSON is not a JSON array", what))),
    }
}
