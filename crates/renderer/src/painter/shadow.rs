//! Drop shadow painter (`shadow`).

use super::{
    is_missing, merge_argb, take_argb, take_object_array, Canvas, ColorPainter, Opacity,
    Parameters,
};
use crate::colormap::{interpolate_argb, ColorMapProvider};
use map_common::{ConfigObject, RenderResult};

/// A shadow cast by values in `[value_min, value_max]`, offset by
/// `(dx, dy)` pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shadow {
    pub value_min: f64,
    pub value_max: f64,
    pub color_min: u32,
    pub color_max: u32,
    pub dx: i32,
    pub dy: i32,
}

impl Default for Shadow {
    fn default() -> Self {
        Self {
            value_min: 0.0,
            value_max: 0.0,
            color_min: 0,
            color_max: 0x4000_0000,
            dx: 10,
            dy: 10,
        }
    }
}

impl Shadow {
    fn in_band(&self, val: f32) -> bool {
        !is_missing(val) && val as f64 >= self.value_min && val as f64 <= self.value_max
    }
}

#[derive(Debug, Default)]
pub struct ShadowPainter {
    opacity: Opacity,
    shadows: Vec<Shadow>,
}

impl ShadowPainter {
    pub fn add_shadow(&mut self, shadow: Shadow) {
        self.shadows.push(shadow);
    }

    pub fn shadow_count(&self) -> usize {
        self.shadows.len()
    }

    fn paint(shadow: &Shadow, canvas: &mut Canvas<'_>, values: &[f32]) {
        if shadow.dx == 0 && shadow.dy == 0 {
            return;
        }
        let w = canvas.width as i64;
        let h = canvas.height as i64;
        let sz = w * h;
        let (dx, dy) = (shadow.dx as i64, shadow.dy as i64);
        let dv = shadow.value_max - shadow.value_min;

        for y in 0..h {
            let dyy = y + dy;
            let yy = h - y - 1;
            let py = yy * w;
            let yp = (yy + dy) * w;

            for x in 0..w {
                let dxx = x - dx;
                let px = py + x;
                let xp = yp + x - dx;
                if xp < 0 || xp >= sz || dxx < 0 || dxx >= w || dyy < 0 || dyy >= h {
                    continue;
                }

                // The shadow falls on pixels outside the band whose offset
                // neighbour is inside it
                let val = values[xp as usize];
                let color = if shadow.in_band(val) && !shadow.in_band(values[px as usize]) {
                    let p = if dv == 0.0 {
                        0.0
                    } else {
                        (val as f64 - shadow.value_min) / dv
                    };
                    interpolate_argb(shadow.color_min, shadow.color_max, p)
                } else {
                    0
                };

                let c = (y * w + x) as usize;
                canvas.image[c] = merge_argb(color, canvas.image[c]);
            }
        }
    }
}

impl ColorPainter for ShadowPainter {
    fn init(&mut self, cfg: &mut ConfigObject, _: &dyn ColorMapProvider) -> RenderResult<()> {
        self.opacity.init(cfg)?;
        let defaults = Shadow::default();
        for mut item in take_object_array(cfg, "shadows", "Shadows")? {
            let shadow = Shadow {
                value_min: item.take_f64("value_min")?.unwrap_or(defaults.value_min),
                value_max: item.take_f64("value_max")?.unwrap_or(defaults.value_max),
                color_min: take_argb(&mut item, "color_min", defaults.color_min)?,
                color_max: take_argb(&mut item, "color_max", defaults.color_max)?,
                dx: item.take_i64("dx")?.map(|v| v as i32).unwrap_or(defaults.dx),
                dy: item.take_i64("dy")?.map(|v| v as i32).unwrap_or(defaults.dy),
            };
            item.finish("Shadow")?;
            self.add_shadow(shadow);
        }
        Ok(())
    }

    fn set_image_colors(
        &mut self,
        canvas: &mut Canvas<'_>,
        values: &[f32],
        _: &Parameters,
    ) -> RenderResult<()> {
        canvas.check(values, "values")?;
        for shadow in &self.shadows {
            Self::paint(shadow, canvas, values);
        }
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.opacity.hash_value();
        for s in &self.shadows {
            map_common::hash_combine(&mut seed, map_common::hash_f64(s.value_min));
            map_common::hash_combine(&mut seed, map_common::hash_f64(s.value_max));
            map_common::hash_combine(&mut seed, s.color_min as u64);
            map_common::hash_combine(&mut seed, s.color_max as u64);
            map_common::hash_combine(&mut seed, s.dx as u64);
            map_common::hash_combine(&mut seed, s.dy as u64);
        }
        seed
    }
}
