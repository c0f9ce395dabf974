//! Hill shading painter (`shading`).

use super::{is_missing, merge_argb, optional_argb, parse_f64, Canvas, ColorPainter, Opacity, Parameters};
use crate::colormap::ColorMapProvider;
use map_common::{ConfigObject, RenderResult};

/// Paints positive values as white light and negative values as black
/// shadow, with alpha proportional to the value.
///
/// Parameters:
/// - `rotate`: `"0"` reads the values top-down (default bottom-up)
/// - `shading_light`, `shading_shadow`: alpha multipliers (default 0)
/// - `shading_background`: colour laid under every non-missing pixel
/// - `shading_position`: `"top"` merges the background even when it is
///   fully transparent white
#[derive(Debug, Default)]
pub struct ShadingPainter {
    opacity: Opacity,
}

struct Settings {
    rotate: bool,
    light: f64,
    shadow: f64,
    background: Option<u32>,
    on_top: bool,
}

impl Settings {
    fn from_params(params: &Parameters) -> RenderResult<Self> {
        let number = |key: &str, default: f64| -> RenderResult<f64> {
            params.get(key).map(|v| parse_f64(v, key)).unwrap_or(Ok(default))
        };
        let background = if params.contains_key("shading_background") {
            Some(optional_argb(params, "shading_background", 0)?)
        } else {
            None
        };
        Ok(Self {
            rotate: number("rotate", 1.0)? != 0.0,
            light: number("shading_light", 0.0)?,
            shadow: number("shading_shadow", 0.0)?,
            background,
            on_top: params.get("shading_position").map(|p| p == "top").unwrap_or(false),
        })
    }
}

impl ColorPainter for ShadingPainter {
    fn init(&mut self, cfg: &mut ConfigObject, _: &dyn ColorMapProvider) -> RenderResult<()> {
        self.opacity.init(cfg)
    }

    fn set_image_colors(
        &mut self,
        canvas: &mut Canvas<'_>,
        values: &[f32],
        params: &Parameters,
    ) -> RenderResult<()> {
        canvas.check(values, "values")?;
        let s = Settings::from_params(params)?;

        let (width, height) = (canvas.width, canvas.height);
        for y in 0..height {
            let row = if s.rotate { height - y - 1 } else { y };
            for x in 0..width {
                let m = values[row * width + x];
                if is_missing(m) {
                    continue;
                }
                let c = y * width + x;
                let mut old = canvas.image[c];

                if let Some(bg) = s.background {
                    if bg == 0x00FF_FFFF && !s.on_top {
                        old = 0;
                    } else {
                        old = merge_argb(bg, old);
                    }
                }

                let m = m as f64;
                let shade = if m < 0.0 {
                    let alpha = (-s.shadow * m).min(255.0) as u32;
                    alpha << 24
                } else {
                    let alpha = (s.light * m).min(255.0) as u32;
                    (alpha << 24) | 0x00FF_FFFF
                };
                canvas.image[c] = merge_argb(shade, old);
            }
        }
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        self.opacity.hash_value()
    }
}
