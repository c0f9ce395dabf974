//! Animated rain streak painter (`rain`).

use super::stream::{paint_speed_lines, take_smooth, take_speeds, NamedColorMap, StreamSpeed};
use super::{Canvas, ColorPainter, Opacity, Parameters};
use crate::colormap::ColorMapProvider;
use map_common::{ConfigObject, RenderResult, ResultExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Vertical streaks coloured by the value field.
///
/// Every `step_x`-th column carries a streak whose phase starts at a random
/// offset and increases by one per row, so consecutive frames appear to fall.
/// The `seed` setting makes the phases reproducible.
#[derive(Debug)]
pub struct RainPainter {
    opacity: Opacity,
    line_length: usize,
    step_x: usize,
    speeds: Vec<StreamSpeed>,
    colormap: NamedColorMap,
    smooth: bool,
    seed: Option<u64>,
    phase: Vec<u32>,
    phase_size: (usize, usize),
}

impl Default for RainPainter {
    fn default() -> Self {
        Self {
            opacity: Opacity::default(),
            line_length: 16,
            step_x: 2,
            speeds: vec![StreamSpeed::default()],
            colormap: NamedColorMap::default(),
            smooth: true,
            seed: None,
            phase: Vec::new(),
            phase_size: (0, 0),
        }
    }
}

impl RainPainter {
    fn init_stream(
        &mut self,
        mut cfg: ConfigObject,
        colormaps: &dyn ColorMapProvider,
    ) -> RenderResult<()> {
        if let Some(v) = cfg.take_i64("line_length")? {
            self.line_length = v.max(1) as usize;
        }
        if let Some(v) = cfg.take_i64("step_x")? {
            self.step_x = v.max(1) as usize;
        }
        if let Some(v) = cfg.take_i64("seed")? {
            self.seed = Some(v as u64);
        }
        self.speeds = take_speeds(&mut cfg)?;
        self.colormap = NamedColorMap::resolve(&mut cfg, colormaps)?;
        self.smooth = take_smooth(&mut cfg, self.smooth)?;
        cfg.finish("stream")
    }

    /// The phase raster for an image size, regenerated when the size changes.
    fn phase_for(&mut self, width: usize, height: usize) -> &[u32] {
        if self.phase_size != (width, height) || self.phase.len() != width * height {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut phase = vec![0u32; width * height];
            for x in (0..width).step_by(self.step_x.max(1)) {
                let mut v: u32 = rng.gen_range(1..=u16::MAX as u32);
                for y in 0..height {
                    phase[(height - y - 1) * width + x] = v;
                    v = v.wrapping_add(1).max(1);
                }
            }
            tracing::trace!(width, height, "regenerated rain phase raster");
            self.phase = phase;
            self.phase_size = (width, height);
        }
        &self.phase
    }
}

impl ColorPainter for RainPainter {
    fn init(&mut self, cfg: &mut ConfigObject, colormaps: &dyn ColorMapProvider) -> RenderResult<()> {
        self.opacity.init(cfg)?;
        if let Some(stream) = cfg.take_object("stream")? {
            self.init_stream(stream, colormaps)
                .trace("Failed to initialize the rain painter")?;
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

        let Some(colormap) = self.colormap.map.clone() else {
            return Ok(());
        };
        let speed = crate::streamline::flip_rows(values, width, height);
        let line_length = self.line_length;
        let speeds = self.speeds.clone();
        let (smooth, opacity) = (self.smooth, self.opacity);
        let phase = self.phase_for(width, height);

        paint_speed_lines(
            canvas,
            phase,
            &speed,
            line_length,
            &speeds,
            &colormap,
            smooth,
            opacity,
        );
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.opacity.hash_value();
        map_common::hash_combine(&mut seed, self.line_length as u64);
        map_common::hash_combine(&mut seed, self.step_x as u64);
        map_common::hash_combine(&mut seed, self.colormap.hash_value());
        map_common::hash_combine(&mut seed, self.smooth as u64);
        if let Some(s) = self.seed {
            map_common::hash_combine(&mut seed, s);
        }
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
