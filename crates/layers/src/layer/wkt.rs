//! A WGS84 geometry given inline as well-known text.

use super::{add_path, take_precision, Layer, LayerBase};
use crate::node::{Attributes, Globals, Node};
use crate::state::State;
use geo::{Densify, Euclidean, Geometry, GeometryCollection};
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use projection::CoordinateTransformation;

/// Mean earth radius used to turn kilometres into degrees.
const EARTH_RADIUS_KM: f64 = 6371.22;

/// Insert points so that no segment is longer than `delta` degrees.
fn segmentize(geom: &Geometry<f64>, delta: f64) -> Geometry<f64> {
    match geom {
        Geometry::LineString(g) => Geometry::LineString(Euclidean.densify(g, delta)),
        Geometry::MultiLineString(g) => Geometry::MultiLineString(Euclidean.densify(g, delta)),
        Geometry::Polygon(g) => Geometry::Polygon(Euclidean.densify(g, delta)),
        Geometry::MultiPolygon(g) => Geometry::MultiPolygon(Euclidean.densify(g, delta)),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection::new_from(
            gc.0.iter().map(|g| segmentize(g, delta)).collect(),
        )),
        other => other.clone(),
    }
}

#[derive(Debug)]
pub struct WktLayer {
    base: LayerBase,
    wkt: String,
    /// Segment length in km
    resolution: Option<f64>,
    /// Segment length in pixels
    relativeresolution: Option<f64>,
    precision: Option<usize>,
}

impl WktLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            wkt: String::new(),
            resolution: None,
            relativeresolution: None,
            precision: None,
        }
    }

    /// Maximum segment length in degrees, if segmentizing was requested.
    fn segment_length(&self) -> RenderResult<Option<f64>> {
        let km = match (self.resolution, self.relativeresolution) {
            (None, None) => return Ok(None),
            (Some(_), Some(_)) => {
                return Err(RenderError::config("Cannot set both resolution and relativeresolution for WKT"))
            }
            (Some(resolution), None) => resolution,
            (None, Some(relative)) => {
                let resolution = self
                    .base
                    .properties
                    .projection
                    .resolution()
                    .trace("Cannot segmentize WKT if projection resolution is not known")?;
                resolution * relative
            }
        };
        if km <= 0.0 {
            return Err(RenderError::config("WKT resolution must be positive").with_param("resolution", km));
        }
        Ok(Some(360.0 * km / (2.0 * std::f64::consts::PI * EARTH_RADIUS_KM)))
    }

    fn generate_wkt(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let crs = self.base.crs()?;
        let pbox = self.base.pixel_box()?;
        let clip_box = self.base.clip_box(&pbox);

        let mut geom = renderer::wkt::parse_wkt(&self.wkt)?;
        if let Some(delta) = self.segment_length()? {
            geom = segmentize(&geom, delta);
        }
        let geom = renderer::geometry::transform_geometry(&geom, &CoordinateTransformation::from_wgs84(crs));
        if renderer::geometry::is_empty(&geom) {
            return Ok(());
        }
        let geom = renderer::geometry::clip_to_box(&geom, &clip_box);
        if renderer::geometry::is_empty(&geom) {
            return Ok(());
        }

        let iri = if self.base.qid.is_empty() {
            state.generate_unique_id()
        } else {
            self.base.qid.clone()
        };
        if !state.add_id(&iri) {
            return Err(RenderError::uniqueness("Non-unique ID assigned to WKT layer").with_param("iri", &iri));
        }

        let path = Node {
            iri: Some(iri.clone()),
            layertype: Some("wkt".to_string()),
            ..Default::default()
        };
        let precision = self.precision.unwrap_or_else(|| state.precision());
        add_path(globals, state, &format!("wkt:{}", iri), path, &geom, crs, &pbox, precision)?;

        self.base.add_clip_rect(nodes, state, &pbox);
        state.add_attributes(globals, &self.base.attributes)?;
        let mut group = Node::group(Attributes::new());
        group.tags.push(Node::use_tag(&iri, self.base.attributes.clone()));
        nodes.push(group);
        Ok(())
    }
}

impl Layer for WktLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        self.wkt = cfg.take_string("wkt")?.unwrap_or_default();
        self.resolution = cfg.take_f64("resolution")?;
        self.relativeresolution = cfg.take_f64("relativeresolution")?;
        self.precision = take_precision(cfg)?;
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if self.wkt.is_empty() {
            return Err(RenderError::config("WKT must be defined and be non-empty").with_param("qid", &self.base.qid));
        }
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_wkt(globals, nodes, state)
            .trace("WKT layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.wkt));
        hash_combine(&mut seed, self.resolution.map_or(0, hash_f64));
        hash_combine(&mut seed, self.relativeresolution.map_or(0, hash_f64));
        hash_combine(&mut seed, hash_value(&self.precision));
        seed
    }
}
