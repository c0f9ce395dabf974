//! Colour-map painter (`default`).

use super::{is_missing, scale_alpha, merge_argb, Canvas, ColorPainter, Opacity, Parameters};
use crate::colormap::{ColorMap, ColorMapProvider};
use map_common::{ConfigObject, RenderError, RenderResult};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Paints each value through a named colour map.
///
/// Parameters:
/// - `colormap`: name of the colour map (required)
/// - `smooth`: `"false"` selects nearest-below lookup instead of interpolation
#[derive(Debug)]
pub struct ArgbPainter {
    opacity: Opacity,
    color_maps: BTreeMap<String, ColorMap>,
}

impl Default for ArgbPainter {
    fn default() -> Self {
        let color_maps = ["percent", "sea", "land", "sea2"]
            .iter()
            .filter_map(|name| ColorMap::builtin(name).map(|cm| (name.to_string(), cm)))
            .collect();
        Self {
            opacity: Opacity::default(),
            color_maps,
        }
    }
}

impl ColorPainter for ArgbPainter {
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

        let name = params
            .get("colormap")
            .ok_or_else(|| RenderError::config("Cannot find the 'colormap' parameter"))?;
        let cm = self
            .color_maps
            .get(name)
            .ok_or_else(|| RenderError::config("Cannot find the colormap").with_param("colormap", name))?;
        let smooth = params.get("smooth").map(|s| s != "false").unwrap_or(true);

        let width = canvas.width;
        let height = canvas.height;
        let land = canvas.land;
        let opacity = self.opacity;

        canvas
            .image
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                let base = (height - y - 1) * width;
                for (x, pixel) in row.iter_mut().enumerate() {
                    let idx = base + x;
                    let val = values[idx];
                    if is_missing(val) {
                        continue;
                    }
                    let is_land = land.get(idx).map(|v| *v > super::LAND_THRESHOLD).unwrap_or(false);
                    let color = scale_alpha(cm.color(val, smooth), opacity.for_land(is_land));
                    *pixel = merge_argb(color, *pixel);
                }
            });

        Ok(())
    }

    fn add_color_map(&mut self, name: &str, color_map: ColorMap) {
        self.color_maps.insert(name.to_string(), color_map);
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.opacity.hash_value();
        for (name, cm) in &self.color_maps {
            map_common::hash_combine(&mut seed, map_common::hash_value(name));
            map_common::hash_combine(&mut seed, cm.hash_value());
        }
        seed
    }
}
