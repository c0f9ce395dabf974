//! Vector map features from the shape engine.

use super::{add_path, polygons, Layer, LayerBase};
use crate::engine::ShapeQuery;
use crate::intersection::Intersections;
use crate::node::{Globals, Node};
use crate::state::State;
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPolygon, Polygon};
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use projection::CoordinateTransformation;
use serde::Deserialize;

/// `map: {schema, table, where, lines, mindistance, minarea}`
///
/// Distances are in pixels and areas in square pixels.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapSettings {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    #[serde(default, rename = "where")]
    pub filter: Option<String>,
    #[serde(default)]
    pub lines: bool,
    #[serde(default)]
    pub mindistance: Option<f64>,
    #[serde(default)]
    pub minarea: Option<f64>,
}

impl MapSettings {
    fn query(&self) -> ShapeQuery {
        ShapeQuery {
            schema: self.schema.clone(),
            table: self.table.clone(),
            filter: self.filter.clone(),
        }
    }

    fn name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }
}

/// Drop vertices closer than `min_distance` to the previously kept one.
/// Ring and line end points are always kept.
fn thin_line(line: &LineString<f64>, min_distance: f64) -> LineString<f64> {
    let n = line.0.len();
    if n <= 2 {
        return line.clone();
    }
    let mut kept: Vec<Coord<f64>> = Vec::with_capacity(n);
    for (i, c) in line.0.iter().enumerate() {
        match kept.last() {
            Some(last) if i + 1 < n && (c.x - last.x).hypot(c.y - last.y) < min_distance => {}
            _ => kept.push(*c),
        }
    }
    LineString::new(kept)
}

fn thin_vertices(geom: Geometry<f64>, min_distance: f64) -> Geometry<f64> {
    let thin_polygon = |p: &Polygon<f64>| {
        Polygon::new(
            thin_line(p.exterior(), min_distance),
            p.interiors().iter().map(|r| thin_line(r, min_distance)).collect(),
        )
    };
    match geom {
        Geometry::LineString(l) => Geometry::LineString(thin_line(&l, min_distance)),
        Geometry::MultiLineString(ml) => {
            Geometry::MultiLineString(MultiLineString::new(ml.0.iter().map(|l| thin_line(l, min_distance)).collect()))
        }
        Geometry::Polygon(p) => Geometry::Polygon(thin_polygon(&p)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(MultiPolygon::new(mp.0.iter().map(thin_polygon).collect())),
        other => other,
    }
}

#[derive(Debug)]
pub struct MapLayer {
    base: LayerBase,
    map: MapSettings,
    precision: Option<usize>,
    intersections: Intersections,
}

impl MapLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            map: MapSettings::default(),
            precision: None,
            intersections: Intersections::default(),
        }
    }

    fn generate_map(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let crs = self.base.crs()?;
        let pbox = self.base.pixel_box()?;

        let shape = state.engines().shapes.shape(&self.map.query())?;
        let Some(shape) = shape.filter(|g| !renderer::geometry::is_empty(g)) else {
            let mut err = RenderError::data("Requested map data is empty").with_param("table", self.map.name());
            if self.map.minarea.is_some() {
                err = err.with_param("hint", "Is the minarea limit too large?");
            }
            return Err(err);
        };

        let mut geom = renderer::geometry::transform_geometry(&shape, &CoordinateTransformation::from_wgs84(crs));
        if self.map.lines {
            geom = renderer::geometry::boundaries(&geom);
        }
        geom = renderer::geometry::clip_to_box(&geom, &self.base.clip_box(&pbox));

        self.intersections.fetch(state, &self.base.properties)?;
        geom = self.intersections.intersect(&geom);

        if let Some(minarea) = self.map.minarea.filter(|a| *a > 0.0) {
            if matches!(geom, Geometry::Polygon(_) | Geometry::MultiPolygon(_)) {
                let area = minarea * pbox.x_resolution() * pbox.y_resolution();
                geom = Geometry::MultiPolygon(renderer::geometry::remove_small_rings(polygons(geom), area));
            }
        }
        if let Some(mindistance) = self.map.mindistance.filter(|d| *d > 0.0) {
            geom = thin_vertices(geom, mindistance * pbox.x_resolution().max(pbox.y_resolution()));
        }

        if renderer::geometry::is_empty(&geom) {
            return Ok(());
        }

        let iri = self.base.qid.clone();
        let precision = self.precision.unwrap_or_else(|| state.precision());

        // Several views may show the same map, the first one stores the path
        if state.add_id(&iri) {
            let path = Node {
                iri: Some(iri.clone()),
                layertype: Some("map".to_string()),
                attributes: self.base.attributes.clone(),
                ..Default::default()
            };
            add_path(globals, state, &format!("map:{}", iri), path, &geom, crs, &pbox, precision)?;
        }

        if state.in_defs() {
            return Ok(());
        }
        self.base.add_clip_rect(nodes, state, &pbox);
        state.add_attributes(globals, &self.base.attributes)?;
        nodes.push(Node::use_tag(&iri, self.base.attributes.clone()));
        Ok(())
    }
}

impl Layer for MapLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        self.map = cfg
            .take_parsed("map")?
            .ok_or_else(|| RenderError::config("Map layer needs a map setting"))?;
        self.precision = super::take_precision(cfg)?;
        if let Some(intersect) = cfg.take_value("intersect") {
            self.intersections = Intersections::init(intersect)?;
        }
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_map(globals, nodes, state)
            .trace("Map layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.map.query()));
        hash_combine(&mut seed, self.map.lines as u64);
        hash_combine(&mut seed, self.map.mindistance.map_or(0, hash_f64));
        hash_combine(&mut seed, self.map.minarea.map_or(0, hash_f64));
        hash_combine(&mut seed, hash_value(&self.precision));
        hash_combine(&mut seed, self.intersections.hash_value());
        seed
    }
}
