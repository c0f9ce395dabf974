//! Value border painter (`border`).

use super::{
    merge_argb, scale_alpha, take_argb, take_object_array, Canvas, ColorPainter, Opacity,
    Parameters,
};
use crate::colormap::ColorMapProvider;
use map_common::{ConfigObject, RenderResult};

/// One border definition.
///
/// A pixel is inside when its value is at least `inside_value_min`. Each of
/// `steps` passes raises the threshold by `step_increase`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Border {
    pub inside_value_min: f64,
    pub step_increase: f64,
    pub steps: u32,
    pub inside_color: u32,
    pub outside_color: u32,
}

impl Default for Border {
    fn default() -> Self {
        Self {
            inside_value_min: 0.0,
            step_increase: 0.0,
            steps: 1,
            inside_color: 0,
            outside_color: 0,
        }
    }
}

/// Paints both sides of every inside/outside transition.
#[derive(Debug, Default)]
pub struct BorderPainter {
    opacity: Opacity,
    borders: Vec<Border>,
}

impl BorderPainter {
    pub fn add_border(&mut self, border: Border) {
        self.borders.push(border);
    }

    pub fn border_count(&self) -> usize {
        self.borders.len()
    }

    /// Read the `borders` array of a painter configuration.
    pub fn init_borders(&mut self, cfg: &mut ConfigObject) -> RenderResult<()> {
        for mut item in take_object_array(cfg, "borders", "Borders")? {
            let border = Border {
                inside_value_min: item.take_f64("inside_value_min")?.unwrap_or(0.0),
                step_increase: item.take_f64("step_increase")?.unwrap_or(0.0),
                steps: item.take_i64("steps")?.unwrap_or(1).max(0) as u32,
                inside_color: take_argb(&mut item, "inside_color", 0)?,
                outside_color: take_argb(&mut item, "outside_color", 0)?,
            };
            item.finish("Border")?;
            self.add_border(border);
        }
        Ok(())
    }
}

impl ColorPainter for BorderPainter {
    fn init(&mut self, cfg: &mut ConfigObject, _: &dyn ColorMapProvider) -> RenderResult<()> {
        self.opacity.init(cfg)?;
        self.init_borders(cfg)
    }

    fn set_image_colors(
        &mut self,
        canvas: &mut Canvas<'_>,
        values: &[f32],
        _: &Parameters,
    ) -> RenderResult<()> {
        canvas.check(values, "values")?;

        let (width, height) = (canvas.width, canvas.height);

        for border in &self.borders {
            let inside_land = scale_alpha(border.inside_color, self.opacity.land);
            let inside_sea = scale_alpha(border.inside_color, self.opacity.sea);
            let outside_land = scale_alpha(border.outside_color, self.opacity.land);
            let outside_sea = scale_alpha(border.outside_color, self.opacity.sea);

            let pick = |is_land: bool, inside: bool| match (is_land, inside) {
                (true, true) => inside_land,
                (true, false) => outside_land,
                (false, true) => inside_sea,
                (false, false) => outside_sea,
            };

            let mut min_val = border.inside_value_min;
            for _ in 0..border.steps {
                // Per column: whether the pixel above was inside, and its land flag
                let mut prev_inside_y = vec![false; width];
                let mut prev_land_y = vec![false; width];

                for y in 0..height {
                    let base = (height - y - 1) * width;
                    let mut prev_inside = false;
                    let mut prev_land = false;

                    for x in 0..width {
                        let idx = base + x;
                        let c = y * width + x;
                        // Missing values compare false and count as outside
                        let inside = values[idx] as f64 >= min_val;
                        let is_land = canvas.is_land(idx);

                        if x > 0 && prev_inside != inside {
                            let left = c - 1;
                            canvas.image[left] =
                                merge_argb(pick(prev_land, prev_inside), canvas.image[left]);
                            canvas.image[c] = merge_argb(pick(is_land, inside), canvas.image[c]);
                        }

                        if y > 0 && prev_inside_y[x] != inside {
                            let above = c - width;
                            canvas.image[above] =
                                merge_argb(pick(prev_land_y[x], prev_inside_y[x]), canvas.image[above]);
                            canvas.image[c] = merge_argb(pick(is_land, inside), canvas.image[c]);
                        }

                        prev_inside = inside;
                        prev_land = is_land;
                        prev_inside_y[x] = inside;
                        prev_land_y[x] = is_land;
                    }
                }
                min_val += border.step_increase;
            }
        }
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.opacity.hash_value();
        for b in &self.borders {
            map_common::hash_combine(&mut seed, map_common::hash_f64(b.inside_value_min));
            map_common::hash_combine(&mut seed, map_common::hash_f64(b.step_increase));
            map_common::hash_combine(&mut seed, b.steps as u64);
            map_common::hash_combine(&mut seed, b.inside_color as u64);
            map_common::hash_combine(&mut seed, b.outside_color as u64);
        }
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizontal_transition() {
        let mut painter = BorderPainter::default();
        painter.add_border(Border {
            inside_value_min: 5.0,
            inside_color: 0xFFFF_0000,
            outside_color: 0xFF00_00FF,
            ..Default::default()
        });

        let values = vec![0.0, 0.0, 10.0, 10.0];
        let mut image = vec![0u32; 4];
        let mut canvas = Canvas::new(4, 1, &mut image, &[]);
        painter
            .set_image_colors(&mut canvas, &values, &Parameters::new())
            .unwrap();

        assert_eq!(image, vec![0, 0xFF00_00FF, 0xFFFF_0000, 0]);
    }

    #[test]
    fn test_vertical_transition() {
        let mut painter = BorderPainter::default();
        painter.add_border(Border {
            inside_value_min: 5.0,
            inside_color: 0xFFFF_0000,
            outside_color: 0xFF00_00FF,
            ..Default::default()
        });

        // Bottom-up: bottom row inside, top row outside
        let values = vec![10.0, 0.0];
        let mut image = vec![0u32; 2];
        let mut canvas = Canvas::new(1, 2, &mut image, &[]);
        painter
            .set_image_colors(&mut canvas, &values, &Parameters::new())
            .unwrap();

        assert_eq!(image, vec![0xFF00_00FF, 0xFFFF_0000]);
    }

    #[test]
    fn test_init_from_json() {
        let mut painter = BorderPainter::default();
        let mut cfg = ConfigObject::from_value(
            serde_json::json!({"borders": [{"inside_value_min": 1, "steps": 3, "inside_color": "FF000000"}]}),
            "painter",
        )
        .unwrap();
        painter
            .init(&mut cfg, &std::collections::BTreeMap::<String, String>::new())
            .unwrap();
        assert_eq!(painter.border_count(), 1);
        assert_eq!(painter.borders[0].steps, 3);
        assert!(cfg.finish("painter").is_ok());

        let mut bad = ConfigObject::from_value(serde_json::json!({"borders": {"x": 1}}), "painter").unwrap();
        assert!(painter.init(&mut bad, &std::collections::BTreeMap::<String, String>::new()).is_err());
    }
}
