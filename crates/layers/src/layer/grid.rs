//! The cell outlines of a data grid.

use super::{add_path, Layer, LayerBase};
use crate::engine::GridData;
use crate::field::fetch_grid;
use crate::node::{Attributes, Globals, Node};
use crate::projection::Projection;
use crate::state::State;
use geo::{Coord, Geometry, LineString, MultiPolygon, Polygon};
use map_common::{hash_combine, hash_value, BoundingBox, ConfigObject, CrsCode, RenderError, RenderResult, ResultExt};
use projection::CoordinateTransformation;

/// About one pixel accuracy.
const GRID_PRECISION: usize = 1;

/// One polygon per grid cell whose corners all project to `crs`, each
/// clipped to `clip_box` separately so that shared edges survive.
fn cell_polygons(grid: &GridData, crs: CrsCode, clip_box: &BoundingBox) -> MultiPolygon<f64> {
    let transformation = CoordinateTransformation::new(grid.crs, crs);
    let corners: Vec<Option<Coord<f64>>> = (0..grid.height)
        .flat_map(|j| (0..grid.width).map(move |i| (i, j)))
        .map(|(i, j)| {
            let (x, y) = grid.grid_to_world(i as f64, j as f64);
            transformation.transform(x, y).map(|(x, y)| Coord { x, y })
        })
        .collect();
    let corner = |i: usize, j: usize| corners[j * grid.width + i];

    let area = renderer::geometry::box_polygon(clip_box);
    let mut cells = Vec::new();
    for j in 0..grid.height - 1 {
        for i in 0..grid.width - 1 {
            let ring = [corner(i, j), corner(i + 1, j), corner(i + 1, j + 1), corner(i, j + 1), corner(i, j)];
            let Some(ring) = ring.into_iter().collect::<Option<Vec<_>>>() else {
                continue;
            };
            let cell = Geometry::Polygon(Polygon::new(LineString::new(ring), Vec::new()));
            if let Geometry::MultiPolygon(clipped) = renderer::geometry::clip(&cell, &area) {
                cells.extend(clipped.0);
            }
        }
    }
    MultiPolygon::new(cells)
}

#[derive(Debug)]
pub struct GridLayer {
    base: LayerBase,
    parameter: String,
}

impl GridLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            parameter: String::new(),
        }
    }

    fn generate_grid(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let grid = fetch_grid(state, &self.base.properties, &self.parameter, None, None)?;
        self.base.update_projection(&grid);
        let crs = self.base.crs()?;
        let pbox = self.base.pixel_box()?;
        let clip_box = self.base.clip_box(&pbox);

        let cells = cell_polygons(&grid, crs, &clip_box);

        let iri = if self.base.qid.is_empty() {
            state.generate_unique_id()
        } else {
            self.base.qid.clone()
        };
        if !state.add_id(&iri) {
            return Err(RenderError::uniqueness("Non-unique ID assigned to grid layer").with_param("iri", &iri));
        }

        let path = Node {
            iri: Some(iri.clone()),
            layertype: Some("grid".to_string()),
            parameter: Some(self.parameter.clone()),
            ..Default::default()
        };
        let object_key = format!("grid:{}", self.base.qid);
        let geom = Geometry::MultiPolygon(cells);
        add_path(globals, state, &object_key, path, &geom, crs, &pbox, GRID_PRECISION)?;

        self.base.add_clip_rect(nodes, state, &pbox);
        state.add_attributes(globals, &self.base.attributes)?;
        let mut group = Node::group(Attributes::new());
        group.tags.push(Node::use_tag(&iri, self.base.attributes.clone()));

        tracing::debug!(qid = %self.base.qid, width = grid.width, height = grid.height, "generated grid cells");
        nodes.push(group);
        Ok(())
    }
}

impl Layer for GridLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        self.parameter = cfg
            .take_string("parameter")?
            .ok_or_else(|| RenderError::config("Grid layer parameter is not set"))?;
        Ok(())
    }

    fn probe_projection(&self, state: &State) -> RenderResult<Option<Projection>> {
        self.base.probe_data_projection(state, Some(&self.parameter))
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_grid(globals, nodes, state)
            .trace("Grid layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.parameter));
        seed
    }
}
