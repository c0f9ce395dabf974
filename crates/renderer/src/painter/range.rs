//! Linear colour range painter (`range`).

use super::{
    is_missing, merge_argb, optional_argb, required_argb, required_f64, scale_alpha,
    take_argb, take_object_array, Canvas, ColorPainter, Opacity, Parameters,
};
use crate::colormap::{interpolate_argb, ColorMapProvider};
use map_common::{ConfigObject, RenderResult};

/// A configured value range with its colours.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ValueRange {
    pub value_min: f64,
    pub value_max: f64,
    pub color_min: u32,
    pub color_max: u32,
    pub color_low: u32,
    pub color_high: u32,
}

impl ValueRange {
    /// A single colour over `[value_min, value_max]`.
    pub fn solid(value_min: f64, value_max: f64, color: u32) -> Self {
        Self {
            value_min,
            value_max,
            color_min: color,
            color_max: color,
            ..Default::default()
        }
    }

    fn color(&self, val: f64) -> u32 {
        if val < self.value_min {
            self.color_low
        } else if val > self.value_max {
            self.color_high
        } else if self.value_max == self.value_min {
            self.color_min
        } else {
            let p = (val - self.value_min) / (self.value_max - self.value_min);
            interpolate_argb(self.color_min, self.color_max, p)
        }
    }
}

/// Interpolates colours over value ranges.
///
/// With configured `ranges` every range is composited in order. Otherwise
/// the painter reads `min_value`, `max_value`, `min_color` and `max_color`
/// from the call parameters and overwrites pixels: values below the range
/// get `low_color`, values above get `high_color` (both transparent by
/// default).
#[derive(Debug, Default)]
pub struct RangePainter {
    opacity: Opacity,
    ranges: Vec<ValueRange>,
}

impl RangePainter {
    pub fn add_range(&mut self, range: ValueRange) {
        self.ranges.push(range);
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    fn paint_ranges(&self, canvas: &mut Canvas<'_>, values: &[f32]) {
        let (width, height) = (canvas.width, canvas.height);
        for range in &self.ranges {
            for y in 0..height {
                let base = (height - y - 1) * width;
                for x in 0..width {
                    let idx = base + x;
                    let val = values[idx];
                    if is_missing(val) {
                        continue;
                    }
                    let opacity = self.opacity.for_land(canvas.is_land(idx));
                    let color = scale_alpha(range.color(val as f64), opacity);
                    let pixel = &mut canvas.image[y * width + x];
                    *pixel = merge_argb(color, *pixel);
                }
            }
        }
    }
}

impl ColorPainter for RangePainter {
    fn init(&mut self, cfg: &mut ConfigObject, _: &dyn ColorMapProvider) -> RenderResult<()> {
        self.opacity.init(cfg)?;
        for mut item in take_object_array(cfg, "ranges", "Ranges")? {
            let range = ValueRange {
                value_min: item.take_f64("value_min")?.unwrap_or(0.0),
                value_max: item.take_f64("value_max")?.unwrap_or(0.0),
                color_min: take_argb(&mut item, "color_min", 0)?,
                color_max: take_argb(&mut item, "color_max", 0)?,
                color_low: take_argb(&mut item, "color_low", 0)?,
                color_high: take_argb(&mut item, "color_high", 0)?,
            };
            item.finish("Range")?;
            self.add_range(range);
        }
        Ok(())
    }

    fn set_image_colors(
        &mut self,
        canvas: &mut Canvas<'_>,
        values: &[f32],
        params: &Parameters,
    ) -> RenderResult<()> {
        canvas.check(values, "values")?;

        if !self.ranges.is_empty() {
            self.paint_ranges(canvas, values);
            return Ok(());
        }

        let min_value = required_f64(params, "min_value")?;
        let max_value = required_f64(params, "max_value")?;
        let min_color = required_argb(params, "min_color")?;
        let max_color = required_argb(params, "max_color")?;
        let low_color = optional_argb(params, "low_color", 0)?;
        let high_color = optional_argb(params, "high_color", 0)?;
        let dv = max_value - min_value;

        let (width, height) = (canvas.width, canvas.height);
        for y in 0..height {
            let base = (height - y - 1) * width;
            for x in 0..width {
                let val = values[base + x];
                if is_missing(val) {
                    continue;
                }
                let val = val as f64;
                canvas.image[y * width + x] = if val < min_value {
                    low_color
                } else if val > max_value {
                    high_color
                } else if dv == 0.0 {
                    min_color
                } else {
                    interpolate_argb(min_color, max_color, (val - min_value) / dv)
                };
            }
        }
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.opacity.hash_value();
        for r in &self.ranges {
            map_common::hash_combine(&mut seed, map_common::hash_f64(r.value_min));
            map_common::hash_combine(&mut seed, map_common::hash_f64(r.value_max));
            map_common::hash_combine(&mut seed, r.color_min as u64);
            map_common::hash_combine(&mut seed, r.color_max as u64);
            map_common::hash_combine(&mut seed, r.color_low as u64);
            map_common::hash_combine(&mut seed, r.color_high as u64);
        }
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Parameters {
        [
            ("min_value", "0"),
            ("max_value", "10"),
            ("min_color", "FF000000"),
            ("max_color", "FFFF0000"),
            ("high_color", "FF00FF00"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_range_colors() {
        let mut painter = RangePainter::default();
        let values = vec![-1.0, 5.0, 11.0, f32::NAN];
        let mut image = vec![0xDEAD_BEEFu32; 4];
        let mut canvas = Canvas::new(4, 1, &mut image, &[]);
        painter.set_image_colors(&mut canvas, &values, &params()).unwrap();

        assert_eq!(image[0], 0);
        assert_eq!((image[1] >> 16) & 0xFF, 127);
        assert_eq!(image[2], 0xFF00_FF00);
        assert_eq!(image[3], 0xDEAD_BEEF);
    }

    #[test]
    fn test_configured_ranges_composite() {
        let mut painter = RangePainter::default();
        let mut cfg = ConfigObject::from_value(
            serde_json::json!({"ranges": [
                {"value_min": 0.9, "value_max": 1.1, "color_min": "FF00FF00", "color_max": "FF00FF00"}
            ]}),
            "painter",
        )
        .unwrap();
        painter.init(&mut cfg, &std::collections::BTreeMap::<String, String>::new()).unwrap();
        assert_eq!(painter.range_count(), 1);

        let values = vec![1.0, 0.0];
        let mut image = vec![0xFF11_1111u32; 2];
        let mut canvas = Canvas::new(2, 1, &mut image, &[]);
        painter
            .set_image_colors(&mut canvas, &values, &Parameters::new())
            .unwrap();
        assert_eq!(image, vec![0xFF00_FF00, 0xFF11_1111]);
    }

    #[test]
    fn test_missing_param_is_config_error() {
        let mut painter = RangePainter::default();
        let mut p = params();
        p.remove("max_color");
        let mut image = vec![0u32; 1];
        let mut canvas = Canvas::new(1, 1, &mut image, &[]);
        let err = painter.set_image_colors(&mut canvas, &[1.0], &p).unwrap_err();
        assert_eq!(err.kind(), map_common::ErrorKind::Config);
        assert!(err.message().contains("max_color"));
    }
}
