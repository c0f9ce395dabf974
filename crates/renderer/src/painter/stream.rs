//! Animated streamline painter (`stream`).

use super::{merge_argb, take_argb, take_object_array, Canvas, ColorPainter, Opacity, Parameters};
use crate::colormap::{resolve_color_map, ColorMap, ColorMapProvider};
use crate::streamline::{flip_rows, streamline_image, TraceSettings};
use map_common::{ConfigObject, RenderResult, ResultExt};

/// Animation speed multiplier for magnitudes in `[value_min, value_max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSpeed {
    pub speed: f64,
    pub value_min: f64,
    pub value_max: f64,
}

impl Default for StreamSpeed {
    fn default() -> Self {
        Self {
            speed: 1.0,
            value_min: -1_000_000_000.0,
            value_max: 1_000_000_000.0,
        }
    }
}

impl StreamSpeed {
    pub(crate) fn contains(&self, value: f32) -> bool {
        let v = value as f64;
        v >= self.value_min && v <= self.value_max
    }
}

pub(crate) fn take_speeds(cfg: &mut ConfigObject) -> RenderResult<Vec<StreamSpeed>> {
    let mut speeds = Vec::new();
    for mut item in take_object_array(cfg, "speeds", "StreamSpeed")? {
        let d = StreamSpeed::default();
        speeds.push(StreamSpeed {
            speed: item.take_f64("speed")?.unwrap_or(d.speed),
            value_min: item.take_f64("value_min")?.unwrap_or(d.value_min),
            value_max: item.take_f64("value_max")?.unwrap_or(d.value_max),
        });
        item.finish("StreamSpeed")?;
    }
    if speeds.is_empty() {
        speeds.push(StreamSpeed::default());
    }
    Ok(speeds)
}

/// Reads the `smooth` string and the `smooth_colors` flag.
pub(crate) fn take_smooth(cfg: &mut ConfigObject, current: bool) -> RenderResult<bool> {
    let mut smooth = current;
    if let Some(s) = cfg.take_string("smooth")? {
        if s != "true" {
            smooth = false;
        }
    }
    if let Some(b) = cfg.take_bool("smooth_colors")? {
        smooth = b;
    }
    Ok(smooth)
}

/// A colour map resolved by name at init time.
#[derive(Debug, Clone, Default)]
pub(crate) struct NamedColorMap {
    pub name: String,
    pub map: Option<ColorMap>,
}

impl NamedColorMap {
    pub fn resolve(
        cfg: &mut ConfigObject,
        colormaps: &dyn ColorMapProvider,
    ) -> RenderResult<Self> {
        match cfg.take_string("colormap")? {
            None => Ok(Self::default()),
            Some(name) => {
                let map = resolve_color_map(&name, colormaps)?;
                Ok(Self { name, map: Some(map) })
            }
        }
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = map_common::hash_value(&self.name);
        if let Some(map) = &self.map {
            map_common::hash_combine(&mut seed, map.hash_value());
        }
        seed
    }
}

/// Paints a magnitude field along precomputed lines with a fading alpha
/// ramp whose phase advances with the animation step.
///
/// `phase` holds per-pixel line positions in top-down order, zero for none.
/// `speed` holds top-down magnitudes.
#[allow(clippy::too_many_arguments)]
pub(crate) fn paint_speed_lines(
    canvas: &mut Canvas<'_>,
    phase: &[u32],
    speed: &[f32],
    line_length: usize,
    speeds: &[StreamSpeed],
    colormap: &ColorMap,
    smooth: bool,
    opacity: Opacity,
) {
    let line_length = line_length.max(1);
    let ramp = |op: f64| -> Vec<f64> {
        let mp = 1.0 / line_length as f64;
        (0..line_length)
            .map(|t| ((1.0 - t as f64 * mp) * op).min(1.0))
            .collect()
    };
    let alpha_land = ramp(opacity.land);
    let alpha_sea = ramp(opacity.sea);
    let vm = line_length as f64 / canvas.loop_steps.max(1) as f64;

    let (width, height) = (canvas.width, canvas.height);
    for stream_speed in speeds {
        let step = (vm * canvas.loop_step as f64 * stream_speed.speed) as i64;
        for y in 0..height {
            let base = (height - y - 1) * width;
            for x in 0..width {
                let c = y * width + x;
                let val = phase[c];
                if val == 0 || !stream_speed.contains(speed[c]) {
                    continue;
                }
                let speed_col = colormap.color(speed[c], smooth);
                let speed_alpha = (speed_col >> 24) as f64;
                let stp = (step + val as i64).rem_euclid(line_length as i64) as usize;
                let alpha = if canvas.is_land(base + x) {
                    alpha_land[stp]
                } else {
                    alpha_sea[stp]
                };
                let new_alpha = ((alpha * speed_alpha) as u32).min(255);
                let color = (new_alpha << 24) | (speed_col & 0x00FF_FFFF);
                canvas.image[c] = merge_argb(color, canvas.image[c]);
            }
        }
    }
}


/// Streamlines over a direction field.
///
/// With one field the lines are drawn in `line_color_land`/`line_color_sea`.
/// With a second magnitude field the lines are coloured through `colormap`
/// and animated at the matching [`StreamSpeed`].
#[derive(Debug)]
pub struct StreamPainter {
    opacity: Opacity,
    trace: TraceSettings,
    line_length: usize,
    line_color_land: u32,
    line_color_sea: u32,
    speeds: Vec<StreamSpeed>,
    colormap: NamedColorMap,
    smooth: bool,
}

impl Default for StreamPainter {
    fn default() -> Self {
        Self {
            opacity: Opacity::default(),
            trace: TraceSettings::default(),
            line_length: 16,
            line_color_land: 0xFF00_0000,
            line_color_sea: 0xFF00_0000,
            speeds: vec![StreamSpeed::default()],
            colormap: NamedColorMap::default(),
            smooth: true,
        }
    }
}

impl StreamPainter {
    pub fn speeds(&self) -> &[StreamSpeed] {
        &self.speeds
    }

    fn init_stream(
        &mut self,
        mut cfg: ConfigObject,
        colormaps: &dyn ColorMapProvider,
    ) -> RenderResult<()> {
        let int = |cfg: &mut ConfigObject, key: &str, current: usize| -> RenderResult<usize> {
            Ok(cfg.take_i64(key)?.map(|v| v.max(0) as usize).unwrap_or(current))
        };
        self.trace.step_x = int(&mut cfg, "trace_step_x", self.trace.step_x)?;
        self.trace.step_y = int(&mut cfg, "trace_step_y", self.trace.step_y)?;
        self.trace.length_min = int(&mut cfg, "trace_length_min", self.trace.length_min)?;
        self.trace.length_max = int(&mut cfg, "trace_length_max", self.trace.length_max)?;
        self.line_length = int(&mut cfg, "line_length", self.line_length)?.max(1);
        self.speeds = take_speeds(&mut cfg)?;
        self.line_color_land = take_argb(&mut cfg, "line_color_land", self.line_color_land)?;
        self.line_color_sea = take_argb(&mut cfg, "line_color_sea", self.line_color_sea)?;
        self.colormap = NamedColorMap::resolve(&mut cfg, colormaps)?;
        self.smooth = take_smooth(&mut cfg, self.smooth)?;
        cfg.finish("stream")
    }
}

impl ColorPainter for StreamPainter {
    fn init(&mut self, cfg: &mut ConfigObject, colormaps: &dyn ColorMapProvider) -> RenderResult<()> {
        self.opacity.init(cfg)?;
        if let Some(stream) = cfg.take_object("stream")? {
            self.init_stream(stream, colormaps)
                .trace("Failed to initialize the stream painter")?;
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
        let (width, height) = (canvas.width, canvas.height);

        let direction = flip_rows(values, width, height);
        let lines = streamline_image(&direction, width, height, &self.trace);

        let l = self.line_length;
        let mp = 255.0 / l as f64;
        let ramp = |op: f64, color: u32| -> Vec<u32> {
            (0..l)
                .map(|t| {
                    let a = ((255 - (t as f64 * mp) as u32) as f64 * op) as u32;
                    (a.min(255) << 24) | (color & 0x00FF_FFFF)
                })
                .collect()
        };
        let color_land = ramp(self.opacity.land, self.line_color_land);
        let color_sea = ramp(self.opacity.sea, self.line_color_sea);
        let vm = l as f64 / canvas.loop_steps.max(1) as f64;
        let step = (vm * canvas.loop_step as f64) as usize;

        for y in 0..height {
            let base = (height - y - 1) * width;
            for x in 0..width {
                let c = y * width + x;
                let val = lines[c];
                if val == 0 {
                    continue;
                }
                let stp = (step + val as usize) % l;
                let color = if canvas.is_land(base + x) {
                    color_land[stp]
                } else {
                    color_sea[stp]
                };
                canvas.image[c] = merge_argb(color, canvas.image[c]);
            }
        }
        Ok(())
    }

    fn set_image_colors2(
        &mut self,
        canvas: &mut Canvas<'_>,
        values1: &[f32],
        values2: &[f32],
        _: &Parameters,
    ) -> RenderResult<()> {
        canvas.check(values1, "values1")?;
        canvas.check(values2, "values2")?;
        let (width, height) = (canvas.width, canvas.height);

        let direction = flip_rows(values1, width, height);
        let speed = flip_rows(values2, width, height);
        let lines = streamline_image(&direction, width, height, &self.trace);

        let Some(colormap) = &self.colormap.map else {
            tracing::debug!("stream painter has no colormap, skipping speed colouring");
            return Ok(());
        };
        paint_speed_lines(
            canvas,
            &lines,
            &speed,
            self.line_length,
            &self.speeds,
            colormap,
            self.smooth,
            self.opacity,
        );
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.opacity.hash_value();
        for v in [
            self.trace.step_x,
            self.trace.step_y,
            self.trace.length_min,
            self.trace.length_max,
            self.line_length,
        ] {
            map_common::hash_combine(&mut seed, v as u64);
        }
        map_common::hash_combine(&mut seed, self.line_color_land as u64);
        map_common::hash_combine(&mut seed, self.line_color_sea as u64);
        map_common::hash_combine(&mut seed, self.colormap.hash_value());
        map_common::hash_combine(&mut seed, self.smooth as u64);
        for s in &self.speeds {
            map_common::hash_combine(&mut seed, map_common::hash_f64(s.speed));
            map_common::hash_combine(&mut seed, map_common::hash_f64(s.value_min));
            map_common::hash_combine(&mut seed, map_common::hash_f64(s.value_max));
        }
        seed
    }

    fn is_animator(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn painter(json: serde_json::Value, maps: &BTreeMap<String, String>) -> StreamPainter {
        let mut p = StreamPainter::default();
        let mut cfg = ConfigObject::from_value(json, "painter").unwrap();
        p.init(&mut cfg, maps).unwrap();
        p
    }

    #[test]
    fn test_init_reads_stream_object() {
        let mut maps = BTreeMap::new();
        maps.insert("wind".to_string(), "0;FF000000\n10;FFFFFFFF".to_string());
        let p = painter(
            serde_json::json!({"stream": {
                "trace_step_x": 4,
                "line_length": 8,
                "colormap": "wind",
                "smooth": "false",
                "speeds": [{"speed": 2, "value_min": 0, "value_max": 5}, null]
            }}),
            &maps,
        );
        assert_eq!(p.trace.step_x, 4);
        assert_eq!(p.line_length, 8);
        assert!(!p.smooth);
        assert_eq!(p.speeds().len(), 1);
        assert_eq!(p.speeds()[0].speed, 2.0);
        assert!(p.colormap.map.is_some());
    }

    #[test]
    fn test_unknown_colormap_fails() {
        let mut p = StreamPainter::default();
        let mut cfg =
            ConfigObject::from_value(serde_json::json!({"stream": {"colormap": "nope"}}), "painter")
                .unwrap();
        assert!(p.init(&mut cfg, &BTreeMap::<String, String>::new()).is_err());
    }

    #[test]
    fn test_unknown_stream_key_fails() {
        let mut p = StreamPainter::default();
        let mut cfg =
            ConfigObject::from_value(serde_json::json!({"stream": {"colour": "x"}}), "painter")
                .unwrap();
        assert!(p.init(&mut cfg, &BTreeMap::<String, String>::new()).is_err());
    }

    #[test]
    fn test_single_field_paints_lines() {
        let mut p = painter(
            serde_json::json!({"stream": {"trace_step_x": 100, "trace_step_y": 100, "trace_length_min": 2}}),
            &BTreeMap::new(),
        );
        let (w, h) = (16, 2);
        let values = vec![90.0f32; w * h];
        let mut image = vec![0u32; w * h];
        let mut canvas = Canvas::new(w, h, &mut image, &[]);
        p.set_image_colors(&mut canvas, &values, &Parameters::new()).unwrap();

        assert!(image[..w].iter().any(|&c| c >> 24 > 0));
        assert!(image[w..].iter().all(|&c| c == 0));
        assert!(p.is_animator());
    }

    #[test]
    fn test_two_fields_without_colormap_leaves_image() {
        let mut p = StreamPainter::default();
        let values = vec![90.0f32; 4];
        let speed = vec![1.0f32; 4];
        let mut image = vec![0x0102_0304u32; 4];
        let mut canvas = Canvas::new(2, 2, &mut image, &[]);
        p.set_image_colors2(&mut canvas, &values, &speed, &Parameters::new())
            .unwrap();
        assert!(image.iter().all(|&c| c == 0x0102_0304));
    }

    #[test]
    fn test_hash_changes_with_settings() {
        let a = StreamPainter::default();
        let b = painter(serde_json::json!({"stream": {"line_length": 4}}), &BTreeMap::new());
        assert_ne!(a.hash_value(), b.hash_value());
    }
}
