//! Fetching and preparing data fields for contouring and painting.

use crate::engine::{GridData, GridQuery};
use crate::properties::Properties;
use crate::state::State;
use geo::Geometry;
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, CrsCode, PixelBox, RenderError, RenderResult, ResultExt};
use projection::CoordinateTransformation;
use renderer::painter::is_missing;
use renderer::smoother::Smoother;
use std::sync::Arc;

/// A linear value conversion, by name or by explicit factors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueScaling {
    pub unit_conversion: Option<String>,
    pub multiplier: Option<f64>,
    pub offset: Option<f64>,
}

impl ValueScaling {
    pub fn take(cfg: &mut ConfigObject) -> RenderResult<Self> {
        let scaling = Self {
            unit_conversion: cfg.take_string("unit_conversion")?,
            multiplier: cfg.take_f64("multiplier")?,
            offset: cfg.take_f64("offset")?,
        };
        if scaling.unit_conversion.is_some() && (scaling.multiplier.is_some() || scaling.offset.is_some()) {
            return Err(RenderError::config("Cannot use unit_conversion together with multiplier or offset")
                .with_param("unit_conversion", scaling.unit_conversion.as_deref().unwrap_or_default()));
        }
        Ok(scaling)
    }

    /// The effective `(multiplier, offset)`.
    pub fn resolve(&self, state: &State) -> RenderResult<(f64, f64)> {
        match &self.unit_conversion {
            Some(name) => state.unit_conversion(name),
            None => Ok((self.multiplier.unwrap_or(1.0), self.offset.unwrap_or(0.0))),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.unit_conversion.is_none()
            && self.multiplier.map_or(true, |m| m == 1.0)
            && self.offset.map_or(true, |o| o == 0.0)
    }

    /// Scale valid values in place.
    pub fn apply(&self, values: &mut [f32], state: &State) -> RenderResult<()> {
        if self.is_identity() {
            return Ok(());
        }
        let (multiplier, offset) = self.resolve(state)?;
        for v in values.iter_mut().filter(|v| !is_missing(**v)) {
            *v = (multiplier * *v as f64 + offset) as f32;
        }
        Ok(())
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.unit_conversion);
        hash_combine(&mut seed, self.multiplier.map_or(0, hash_f64));
        hash_combine(&mut seed, self.offset.map_or(0, hash_f64));
        seed
    }
}

/// Fetch a parameter at the layer's valid time.
pub fn fetch_grid(
    state: &State,
    properties: &Properties,
    parameter: &str,
    producer: Option<&str>,
    level: Option<f64>,
) -> RenderResult<Arc<GridData>> {
    let time = if properties.has_valid_time() {
        Some(properties.valid_time()?)
    } else {
        None
    };
    let query = GridQuery {
        producer: producer.map(str::to_string).or_else(|| properties.producer.clone()),
        parameter: parameter.to_string(),
        time,
        level: level.or(properties.level),
    };
    state
        .grid(&query)
        .trace("Failed to fetch data")
        .with_param("parameter", parameter)
}

/// Grid values after scaling and smoothing.
pub fn prepare_values(
    grid: &GridData,
    scaling: &ValueScaling,
    smoother: &Smoother,
    state: &State,
) -> RenderResult<Vec<f32>> {
    let mut values = grid.values.clone();
    scaling.apply(&mut values, state)?;
    if !smoother.is_noop() {
        smoother.apply(&mut values, grid.width, grid.height)?;
    }
    Ok(values)
}

/// Convert a grid-space contour to world coordinates of `crs`.
pub fn grid_to_crs(geom: &Geometry<f64>, grid: &GridData, crs: CrsCode) -> Geometry<f64> {
    let world = grid.to_world(geom);
    renderer::geometry::transform_geometry(&world, &CoordinateTransformation::new(grid.crs, crs))
}

/// Sample `grid` at every pixel centre of `pbox`.
///
/// The result is bottom-up like every value raster the painters read.
pub fn sample_grid(grid: &GridData, crs: CrsCode, pbox: &PixelBox) -> Vec<f32> {
    let width = pbox.width as usize;
    let height = pbox.height as usize;
    let transformation = CoordinateTransformation::new(crs, grid.crs);
    let mut values = vec![f32::NAN; width * height];
    for y in 0..height {
        let row = (height - y - 1) * width;
        for x in 0..width {
            let (wx, wy) = pbox.itransform(x as f64 + 0.5, y as f64 + 0.5);
            if let Some((gx, gy)) = transformation.transform(wx, wy) {
                if let Some(v) = grid.value_at_world(gx, gy) {
                    values[row + x] = v as f32;
                }
            }
        }
    }
    values
}
