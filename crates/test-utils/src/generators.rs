//! Synthetic grids and images.
//!
//! Grids are row-major and bottom-up: index `row * width + col` with row 0
//! at the southern edge, the layout the painters and contouring expect.

/// Temperature-like values in Celsius, -20 in the south-west corner rising
/// to +40 in the north-east.
pub fn create_temperature_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let x_factor = col as f32 / width.max(1) as f32;
            let y_factor = row as f32 / height.max(1) as f32;
            data.push(-20.0 + x_factor * 30.0 + y_factor * 30.0);
        }
    }
    data
}

/// Values growing linearly from 0 at the western edge to `max` at the eastern.
pub fn create_gradient_grid(width: usize, height: usize, max: f32) -> Vec<f32> {
    let denom = (width.max(2) - 1) as f32;
    (0..width * height)
        .map(|i| (i % width) as f32 / denom * max)
        .collect()
}

/// A single Gaussian peak in the middle of the grid, so every isovalue
/// between 0 and `peak` gives one closed ring.
pub fn create_bump_grid(width: usize, height: usize, peak: f32) -> Vec<f32> {
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let sigma = width.min(height) as f32 / 5.0;
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let dx = col as f32 - cx;
            let dy = row as f32 - cy;
            data.push(peak * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp());
        }
    }
    data
}

/// Wind speed in m/s, calm in the centre and up to 50 at the corners.
pub fn create_wind_speed_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;
    let max_dist = ((center_x * center_x) + (center_y * center_y)).sqrt();

    for row in 0..height {
        for col in 0..width {
            let dx = col as f32 - center_x;
            let dy = row as f32 - center_y;
            let dist = (dx * dx + dy * dy).sqrt();
            data.push((dist / max_dist) * 50.0);
        }
    }
    data
}

/// West-east wind component, -20 m/s in the south to +20 in the north.
pub fn create_u_wind_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        let lat_factor = (row as f32 / height as f32 - 0.5) * 2.0;
        data.extend(std::iter::repeat(lat_factor * 20.0).take(width));
    }
    data
}

/// Every cell set to `value`.
pub fn create_constant_grid(width: usize, height: usize, value: f32) -> Vec<f32> {
    vec![value; width * height]
}

/// Zeros with NaN at the given `(col, row)` positions.
pub fn create_grid_with_nans(
    width: usize,
    height: usize,
    nan_positions: &[(usize, usize)],
) -> Vec<f32> {
    let mut data = vec![0.0f32; width * height];
    for &(col, row) in nan_positions {
        if col < width && row < height {
            data[row * width + col] = f32::NAN;
        }
    }
    data
}

/// Land mask with the western half as land (1.0) and the rest sea (0.0).
pub fn create_land_mask(width: usize, height: usize) -> Vec<f32> {
    (0..width * height)
        .map(|i| if i % width < width / 2 { 1.0 } else { 0.0 })
        .collect()
}

/// Opaque ARGB gradient image with up to 65536 distinct colours.
pub fn create_argb_gradient(width: usize, height: usize) -> Vec<u32> {
    let mut image = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let r = ((x as f32 / width as f32) * 255.0) as u32;
            let g = ((y as f32 / height as f32) * 255.0) as u32;
            image.push(0xFF00_0000 | (r << 16) | (g << 8) | 0x80);
        }
    }
    image
}

/// ARGB image using a 20 colour temperature-like palette.
pub fn create_argb_palette_image(width: usize, height: usize) -> Vec<u32> {
    const PALETTE: [u32; 20] = [
        0xFF6600D6, 0xFF0033FF, 0xFF0080FF, 0xFF00BFFF, 0xFF00FFFF, 0xFF00FFBF, 0xFF00FF80,
        0xFF00FF00, 0xFF80FF00, 0xFFBFFF00, 0xFFFFFF00, 0xFFFFDC00, 0xFFFFBF00, 0xFFFF8000,
        0xFFFF4000, 0xFFFF0000, 0xFFD60000, 0xFFB20000, 0xFF8B0000, 0xFF640000,
    ];
    let mut image = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let idx = ((x as f32 / width as f32 * 0.3 + y as f32 / height as f32 * 0.7) * 19.0) as usize;
            image.push(PALETTE[idx.min(19)]);
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_temperature_grid() {
        let grid = create_temperature_grid(100, 100);
        let min = grid.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = grid.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!(min >= -20.0);
        assert!(max <= 40.0);
    }

    #[test]
    fn test_create_gradient_grid() {
        let grid = create_gradient_grid(5, 2, 8.0);
        assert_eq!(&grid[..5], &[0.0, 2.0, 4.0, 6.0, 8.0]);
        assert_eq!(grid[5], 0.0);
    }

    #[test]
    fn test_create_bump_grid_peaks_in_centre() {
        let grid = create_bump_grid(11, 11, 10.0);
        assert!((grid[5 * 11 + 5] - 10.0).abs() < 1e-5);
        assert!(grid[0] < 1.0);
    }

    #[test]
    fn test_create_wind_speed_grid() {
        let grid = create_wind_speed_grid(100, 100);
        assert!(grid[50 * 100 + 50] < 5.0);
        assert!(grid[0] > 30.0);
    }

    #[test]
    fn test_create_grid_with_nans() {
        let grid = create_grid_with_nans(10, 10, &[(5, 5), (0, 0)]);
        assert!(grid[0].is_nan());
        assert!(grid[55].is_nan());
        assert!(!grid[1].is_nan());
    }

    #[test]
    fn test_create_land_mask() {
        let mask = create_land_mask(4, 2);
        assert_eq!(mask, vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_palette_image_is_opaque() {
        let image = create_argb_palette_image(64, 64);
        assert!(image.iter().all(|c| c >> 24 == 0xFF));
    }
}
