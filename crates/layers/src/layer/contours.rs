//! Settings and geometry pipeline shared by the isoband, isoline and
//! isolabel layers.

use super::{difference, polygons, LayerBase};
use crate::engine::{GridData, ShapeQuery};
use crate::field::{fetch_grid, grid_to_crs, prepare_values, ValueScaling};
use crate::intersection::Intersections;
use crate::projection::Projection;
use crate::state::State;
use geo::{Geometry, MultiLineString, MultiPolygon};
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, CrsCode, PixelBox, RenderError, RenderResult};
use projection::geographic::km_to_degrees;
use projection::CoordinateTransformation;
use renderer::contour::Interpolation;
use renderer::isoline_filter::IsolineFilter;
use renderer::smoother::Smoother;
use std::sync::Arc;

/// Unit of the `minarea` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AreaUnit {
    #[default]
    Pixels,
    SquareKilometres,
}

impl AreaUnit {
    pub fn parse(name: &str) -> RenderResult<Self> {
        match name {
            "px^2" => Ok(Self::Pixels),
            "km^2" => Ok(Self::SquareKilometres),
            _ => Err(RenderError::config("Unknown areaunit").with_param("areaunit", name)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContourSettings {
    pub parameter: Option<String>,
    pub interpolation: Interpolation,
    pub smoother: Smoother,
    pub filter: IsolineFilter,
    pub scaling: ValueScaling,
    pub precision: Option<usize>,
    pub minarea: Option<f64>,
    pub areaunit: AreaUnit,
    pub inside: Option<ShapeQuery>,
    pub outside: Option<ShapeQuery>,
    pub intersections: Intersections,
}

impl ContourSettings {
    pub fn take(cfg: &mut ConfigObject) -> RenderResult<Self> {
        let mut settings = Self {
            parameter: cfg.take_string("parameter")?,
            scaling: ValueScaling::take(cfg)?,
            minarea: cfg.take_f64("minarea")?,
            inside: cfg.take_parsed("inside")?,
            outside: cfg.take_parsed("outside")?,
            ..Default::default()
        };
        if let Some(name) = cfg.take_string("interpolation")? {
            settings.interpolation = Interpolation::parse(&name)?;
        }
        if let Some(smoother) = cfg.take_parsed::<Smoother>("smoother")? {
            smoother.validate()?;
            settings.smoother = smoother;
        }
        if let Some(filter) = cfg.take_parsed::<IsolineFilter>("filter")? {
            filter.validate()?;
            settings.filter = filter;
        }
        settings.precision = super::take_precision(cfg)?;
        if let Some(unit) = cfg.take_string("areaunit")? {
            settings.areaunit = AreaUnit::parse(&unit)?;
        }
        if let Some(intersect) = cfg.take_value("intersect") {
            settings.intersections = Intersections::init(intersect)?;
        }
        Ok(settings)
    }

    pub fn parameter(&self) -> RenderResult<&str> {
        self.parameter
            .as_deref()
            .ok_or_else(|| RenderError::config("Parameter not set"))
    }

    pub fn probe_projection(&self, base: &LayerBase, state: &State) -> RenderResult<Option<Projection>> {
        base.probe_data_projection(state, self.parameter.as_deref())
    }

    /// Fetch the grid, resolve the data projection and prepare the values.
    pub fn fetch(&self, base: &mut LayerBase, state: &State) -> RenderResult<(Arc<GridData>, Vec<f32>)> {
        let grid = fetch_grid(state, &base.properties, self.parameter()?, None, None)?;
        base.update_projection(&grid);
        let values = prepare_values(&grid, &self.scaling, &self.smoother, state)?;
        Ok((grid, values))
    }

    /// Minimum ring area in squared world units of `crs`.
    pub fn min_world_area(&self, crs: CrsCode, pbox: &PixelBox) -> Option<f64> {
        let area = self.minarea.filter(|a| *a > 0.0)?;
        Some(match self.areaunit {
            AreaUnit::Pixels => area * pbox.x_resolution() * pbox.y_resolution(),
            AreaUnit::SquareKilometres if crs.is_geographic() => {
                let side = km_to_degrees(area.sqrt());
                side * side
            }
            AreaUnit::SquareKilometres => area * 1e6,
        })
    }

    /// The inside and outside shapes in the output CRS.
    pub fn masks(&self, state: &State, crs: CrsCode) -> RenderResult<Masks> {
        let transformation = CoordinateTransformation::from_wgs84(crs);
        let fetch = |query: &ShapeQuery| -> RenderResult<Option<MultiPolygon<f64>>> {
            let shape = state.engines().shapes.shape(query)?;
            Ok(shape.map(|g| polygons(renderer::geometry::transform_geometry(&g, &transformation))))
        };
        let inside = match &self.inside {
            Some(query) => Some(fetch(query)?.unwrap_or_else(|| MultiPolygon::new(Vec::new()))),
            None => None,
        };
        let outside = match &self.outside {
            Some(query) => fetch(query)?,
            None => None,
        };
        Ok(Masks { inside, outside })
    }

    /// Grid space bands to finished world geometries.
    pub fn finish_bands(
        &self,
        bands: Vec<MultiPolygon<f64>>,
        grid: &GridData,
        base: &LayerBase,
        masks: &Masks,
        crs: CrsCode,
        pbox: &PixelBox,
    ) -> Vec<Geometry<f64>> {
        let mut bands: Vec<MultiPolygon<f64>> = bands
            .into_iter()
            .map(|band| polygons(grid_to_crs(&Geometry::MultiPolygon(band), grid, crs)))
            .collect();

        if self.filter.is_active() {
            let mut filter = self.filter;
            filter.bbox(pbox);
            filter.apply_polygons(&mut bands, true);
        }

        let min_area = self.min_world_area(crs, pbox);
        bands
            .into_iter()
            .map(|band| {
                let mut geom = masks.apply(Geometry::MultiPolygon(band));
                if base.properties.clip {
                    geom = renderer::geometry::clip_to_box(&geom, &base.clip_box(pbox));
                }
                geom = self.intersections.intersect(&geom);
                match min_area {
                    Some(area) => Geometry::MultiPolygon(renderer::geometry::remove_small_rings(polygons(geom), area)),
                    None => geom,
                }
            })
            .collect()
    }

    /// Grid space isolines to finished world geometries.
    pub fn finish_lines(
        &self,
        lines: Vec<MultiLineString<f64>>,
        grid: &GridData,
        base: &LayerBase,
        masks: &Masks,
        crs: CrsCode,
        pbox: &PixelBox,
    ) -> Vec<Geometry<f64>> {
        let mut filter = self.filter;
        if filter.is_active() {
            filter.bbox(pbox);
        }
        lines
            .into_iter()
            .map(|line| {
                let mut geom = grid_to_crs(&Geometry::MultiLineString(line), grid, crs);
                if let Geometry::MultiLineString(ml) = &mut geom {
                    filter.apply_lines(ml);
                }
                geom = masks.apply(geom);
                if base.properties.clip {
                    geom = renderer::geometry::clip_to_box(&geom, &base.clip_box(pbox));
                }
                self.intersections.intersect(&geom)
            })
            .collect()
    }

    /// Coordinate decimals, from the layer or the product default.
    pub fn precision(&self, state: &State) -> usize {
        self.precision.unwrap_or_else(|| state.precision())
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.parameter);
        hash_combine(&mut seed, hash_value(&self.interpolation));
        hash_combine(&mut seed, self.smoother.hash_value());
        hash_combine(&mut seed, self.filter.hash_value());
        hash_combine(&mut seed, self.scaling.hash_value());
        hash_combine(&mut seed, hash_value(&self.precision));
        hash_combine(&mut seed, self.minarea.map_or(0, hash_f64));
        hash_combine(&mut seed, hash_value(&self.areaunit));
        hash_combine(&mut seed, hash_value(&self.inside));
        hash_combine(&mut seed, hash_value(&self.outside));
        hash_combine(&mut seed, self.intersections.hash_value());
        seed
    }
}

/// Areas a contour is restricted to or excluded from.
#[derive(Debug, Clone, Default)]
pub struct Masks {
    inside: Option<MultiPolygon<f64>>,
    outside: Option<MultiPolygon<f64>>,
}

impl Masks {
    pub fn apply(&self, mut geom: Geometry<f64>) -> Geometry<f64> {
        if let Some(inside) = &self.inside {
            geom = renderer::geometry::clip(&geom, inside);
        }
        if let Some(outside) = &self.outside {
            geom = difference(&geom, outside);
        }
        geom
    }
}
