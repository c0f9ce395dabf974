//! Streamline tracing over a direction field.
//!
//! The direction field holds degrees clockwise from north (image up). Lines
//! are seeded on a regular grid and traced forward one pixel at a time until
//! they leave the image, hit missing data, run into another line or reach
//! the maximum length. [`streamline_image`] returns a top-down image where
//! zero means "no line" and a line's pixels count down towards its head, so
//! that advancing an animation phase moves the pattern along the flow.
//! [`streamline_paths`] returns the same lines as polylines.

use crate::painter::is_missing;

/// Seeding and length limits for [`streamline_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceSettings {
    pub step_x: usize,
    pub step_y: usize,
    pub length_min: usize,
    pub length_max: usize,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            step_x: 10,
            step_y: 10,
            length_min: 10,
            length_max: 128,
        }
    }
}

/// Seed lines on the settings grid and hand each accepted line to `accept`
/// as top-down pixel indices, head last.
fn trace_all(
    direction: &[f32],
    width: usize,
    height: usize,
    settings: &TraceSettings,
    mut accept: impl FnMut(&[usize]),
) {
    let size = width * height;
    if size == 0 || direction.len() != size {
        return;
    }

    let step_x = settings.step_x.max(1);
    let step_y = settings.step_y.max(1);
    let length_max = settings.length_max.max(1);

    let mut occupied = vec![false; size];
    let mut line: Vec<usize> = Vec::with_capacity(length_max);

    for sy in (0..height).step_by(step_y) {
        for sx in (0..width).step_by(step_x) {
            if occupied[sy * width + sx] {
                continue;
            }
            line.clear();
            trace(direction, width, height, &occupied, sx, sy, length_max, &mut line);

            if line.len() < settings.length_min.max(1) {
                continue;
            }
            for &pos in &line {
                occupied[pos] = true;
            }
            accept(&line);
        }
    }
}

/// Trace streamlines over a top-down direction raster.
pub fn streamline_image(
    direction: &[f32],
    width: usize,
    height: usize,
    settings: &TraceSettings,
) -> Vec<u32> {
    let mut image = vec![0u32; width * height];
    trace_all(direction, width, height, settings, |line| {
        let n = line.len() as u32;
        for (i, &pos) in line.iter().enumerate() {
            image[pos] = n - i as u32;
        }
    });
    image
}

/// Trace streamlines over a top-down direction raster as polylines through
/// the pixel centres, in top-down pixel coordinates.
pub fn streamline_paths(
    direction: &[f32],
    width: usize,
    height: usize,
    settings: &TraceSettings,
) -> Vec<Vec<(f64, f64)>> {
    let mut paths = Vec::new();
    trace_all(direction, width, height, settings, |line| {
        paths.push(
            line.iter()
                .map(|&pos| ((pos % width) as f64 + 0.5, (pos / width) as f64 + 0.5))
                .collect(),
        );
    });
    paths
}

/// Flip a bottom-up raster to top-down.
pub fn flip_rows(values: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(values.len());
    for y in 0..height {
        let start = (height - y - 1) * width;
        out.extend_from_slice(&values[start..start + width]);
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn trace(
    direction: &[f32],
    width: usize,
    height: usize,
    occupied: &[bool],
    sx: usize,
    sy: usize,
    length_max: usize,
    line: &mut Vec<usize>,
) {
    let mut x = sx as f64 + 0.5;
    let mut y = sy as f64 + 0.5;
    let mut last = usize::MAX;

    // Each step moves at most one pixel, so bound the loop generously
    for _ in 0..length_max * 2 {
        if x < 0.0 || y < 0.0 {
            break;
        }
        let (px, py) = (x as usize, y as usize);
        if px >= width || py >= height {
            break;
        }
        let pos = py * width + px;
        if pos != last {
            if occupied[pos] || line.contains(&pos) {
                break;
            }
            line.push(pos);
            last = pos;
            if line.len() >= length_max {
                break;
            }
        }

        let dir = direction[pos];
        if is_missing(dir) {
            break;
        }
        let rad = (dir as f64).to_radians();
        x += rad.sin();
        y -= rad.cos();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eastward_flow_counts_down() {
        let (w, h) = (20, 3);
        let direction = vec![90.0f32; w * h];
        let settings = TraceSettings {
            step_x: 100,
            step_y: 100,
            length_min: 5,
            length_max: 128,
        };
        let img = streamline_image(&direction, w, h, &settings);
        // One line along the top row from x=0 to the right edge
        assert_eq!(img[0], 20);
        assert_eq!(img[19], 1);
        assert!(img[w..].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_short_lines_are_dropped() {
        let (w, h) = (4, 4);
        let direction = vec![90.0f32; w * h];
        let settings = TraceSettings {
            step_x: 1,
            step_y: 1,
            length_min: 10,
            length_max: 128,
        };
        let img = streamline_image(&direction, w, h, &settings);
        assert!(img.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_missing_direction_stops_line() {
        let (w, h) = (10, 1);
        let mut direction = vec![90.0f32; w];
        direction[5] = f32::NAN;
        let settings = TraceSettings {
            step_x: 100,
            step_y: 100,
            length_min: 1,
            length_max: 128,
        };
        let img = streamline_image(&direction, w, h, &settings);
        assert_eq!(img[0], 6);
        assert_eq!(img[5], 1);
        assert_eq!(img[6], 0);
    }

    #[test]
    fn test_paths_follow_pixel_centres() {
        let (w, h) = (6, 4);
        // Northward flow
        let direction = vec![0.0f32; w * h];
        let settings = TraceSettings {
            step_x: 3,
            step_y: 100,
            length_min: 2,
            length_max: 128,
        };
        let paths = streamline_paths(&direction, w, h, &settings);
        // Seeds on the top row leave the image at once
        assert!(paths.is_empty());

        let direction = vec![180.0f32; w * h];
        let paths = streamline_paths(&direction, w, h, &settings);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0], vec![(0.5, 0.5), (0.5, 1.5), (0.5, 2.5), (0.5, 3.5)]);
        assert_eq!(paths[1][0], (3.5, 0.5));
    }

    #[test]
    fn test_flip_rows() {
        let values = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(flip_rows(&values, 2, 3), vec![5.0, 6.0, 3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_max_length() {
        let (w, h) = (50, 1);
        let direction = vec![90.0f32; w];
        let settings = TraceSettings {
            step_x: 100,
            step_y: 100,
            length_min: 1,
            length_max: 8,
        };
        let img = streamline_image(&direction, w, h, &settings);
        assert_eq!(img.iter().filter(|&&v| v != 0).count(), 8);
    }
}
