//! Streamlines traced through a wind direction field.

use super::{add_path, take_precision, Layer, LayerBase};
use crate::engine::GridData;
use crate::field::{fetch_grid, sample_grid};
use crate::node::{Globals, Node};
use crate::projection::Projection;
use crate::state::State;
use geo::{Geometry, LineString};
use map_common::{hash_combine, hash_value, ConfigObject, PixelBox, RenderError, RenderResult, ResultExt};
use renderer::painter::is_missing;
use renderer::streamline::{flip_rows, streamline_paths, TraceSettings};
use std::sync::Arc;

/// Where the directions come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StreamSource {
    Direction(String),
    Components { u: String, v: String },
}

impl StreamSource {
    fn object_name(&self) -> String {
        match self {
            StreamSource::Direction(parameter) => parameter.clone(),
            StreamSource::Components { u, v } => format!("{}_{}", u, v),
        }
    }

    fn primary(&self) -> &str {
        match self {
            StreamSource::Direction(parameter) => parameter,
            StreamSource::Components { u, .. } => u,
        }
    }
}

/// Meteorological direction of a wind vector, missing for calm or missing
/// components.
fn wind_direction(u: f32, v: f32) -> f32 {
    if is_missing(u) || is_missing(v) || (u == 0.0 && v == 0.0) {
        return f32::NAN;
    }
    (180.0 + (u as f64).atan2(v as f64).to_degrees()).rem_euclid(360.0) as f32
}

/// Split a polyline into pieces of at most `points` points sharing their
/// end points.
fn split_line(line: &[(f64, f64)], points: usize) -> Vec<&[(f64, f64)]> {
    if line.len() < 2 {
        return Vec::new();
    }
    let step = points.max(2) - 1;
    (0..line.len() - 1)
        .step_by(step)
        .map(|start| &line[start..(start + step + 1).min(line.len())])
        .collect()
}

fn take_count(cfg: &mut ConfigObject, key: &str, default: usize, minimum: usize) -> RenderResult<usize> {
    match cfg.take_i64(key)? {
        None => Ok(default),
        Some(n) if n >= minimum as i64 => Ok(n as usize),
        Some(n) => Err(RenderError::config(format!("Stream layer {} must be at least {}", key, minimum))
            .with_param(key, n)),
    }
}

#[derive(Debug)]
pub struct StreamLayer {
    base: LayerBase,
    source: Option<StreamSource>,
    settings: TraceSettings,
    /// Points per generated path
    line_length: usize,
    precision: Option<usize>,
}

impl StreamLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            source: None,
            settings: TraceSettings {
                step_x: 20,
                step_y: 20,
                length_min: 5,
                length_max: 2048,
            },
            line_length: 32,
            precision: None,
        }
    }

    fn source(&self) -> RenderResult<&StreamSource> {
        self.source
            .as_ref()
            .ok_or_else(|| RenderError::config("Stream layer needs a direction parameter or u and v components"))
    }

    /// Bottom-up directions at every pixel.
    fn directions(&mut self, state: &State) -> RenderResult<(Vec<f32>, PixelBox, map_common::CrsCode)> {
        let fetch = |base: &mut LayerBase, name: &str| -> RenderResult<Arc<GridData>> {
            let grid = fetch_grid(state, &base.properties, name, None, None)?;
            base.update_projection(&grid);
            Ok(grid)
        };
        let source = self.source()?.clone();
        let grids = match &source {
            StreamSource::Direction(parameter) => vec![fetch(&mut self.base, parameter)?],
            StreamSource::Components { u, v } => vec![fetch(&mut self.base, u)?, fetch(&mut self.base, v)?],
        };
        let crs = self.base.crs()?;
        let pbox = self.base.pixel_box()?;
        let directions = match grids.as_slice() {
            [u, v] => sample_grid(u, crs, &pbox)
                .into_iter()
                .zip(sample_grid(v, crs, &pbox))
                .map(|(u, v)| wind_direction(u, v))
                .collect(),
            _ => sample_grid(&grids[0], crs, &pbox),
        };
        Ok((directions, pbox, crs))
    }

    fn generate_streams(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let (directions, pbox, crs) = self.directions(state)?;
        self.base.note_data_time(state);

        let width = pbox.width as usize;
        let height = pbox.height as usize;
        let top_down = flip_rows(&directions, width, height);
        let paths = streamline_paths(&top_down, width, height, &self.settings);

        self.base.add_clip_rect(nodes, state, &pbox);
        let mut group = self.base.group(globals, state)?;

        let qid = self.base.qid.clone();
        let object_key = format!("streamline:{}:{}", self.source()?.object_name(), qid);
        let precision = self.precision.unwrap_or_else(|| state.precision());
        let mut count = 0;
        for path in &paths {
            for piece in split_line(path, self.line_length) {
                let world: Vec<(f64, f64)> = piece.iter().map(|&(x, y)| pbox.itransform(x, y)).collect();
                let iri = if qid.is_empty() {
                    count.to_string()
                } else {
                    format!("{}.{}", qid, count)
                };
                count += 1;
                if !state.add_id(&iri) {
                    return Err(RenderError::uniqueness("Non-unique ID assigned to streamline").with_param("iri", &iri));
                }
                let node = Node {
                    iri: Some(iri.clone()),
                    layertype: Some("stream".to_string()),
                    parameter: Some(self.source()?.primary().to_string()),
                    ..Default::default()
                };
                let geom = Geometry::LineString(LineString::from(world));
                add_path(globals, state, &object_key, node, &geom, crs, &pbox, precision)?;
                group.tags.push(Node::use_tag(&iri, Default::default()));
            }
        }

        tracing::debug!(qid = %qid, streamlines = paths.len(), paths = count, "generated streamlines");
        nodes.push(group);
        Ok(())
    }
}

impl Layer for StreamLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        let parameter = cfg.take_string("parameter")?;
        let u = cfg.take_string("u")?;
        let v = cfg.take_string("v")?;
        self.source = match (parameter, u, v) {
            (Some(parameter), None, None) => Some(StreamSource::Direction(parameter)),
            (None, Some(u), Some(v)) => Some(StreamSource::Components { u, v }),
            _ => {
                return Err(RenderError::config(
                    "Stream layer needs either a direction parameter or both u and v components",
                ))
            }
        };

        self.settings.length_min = take_count(cfg, "min_length", self.settings.length_min, 1)?;
        self.settings.length_max = take_count(cfg, "max_length", self.settings.length_max, 1)?;
        self.settings.step_x = take_count(cfg, "xstep", self.settings.step_x, 1)?;
        self.settings.step_y = take_count(cfg, "ystep", self.settings.step_y, 1)?;
        self.line_length = take_count(cfg, "line_length", self.line_length, 2)?;
        if self.settings.length_min > self.settings.length_max {
            return Err(RenderError::config("Stream layer min_length exceeds max_length"));
        }
        self.precision = take_precision(cfg)?;
        Ok(())
    }

    fn probe_projection(&self, state: &State) -> RenderResult<Option<Projection>> {
        let parameter = self.source.as_ref().map(StreamSource::primary);
        match parameter {
            Some(parameter) => self.base.probe_data_projection(state, Some(parameter)),
            None => Ok(None),
        }
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_streams(globals, nodes, state)
            .trace("Stream layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.source));
        hash_combine(&mut seed, hash_value(&self.settings));
        hash_combine(&mut seed, hash_value(&self.line_length));
        hash_combine(&mut seed, hash_value(&self.precision));
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engines, MemoryEngine};
    use crate::layer::create_layer;
    use crate::properties::Properties;
    use serde_json::{json, Value};
    use test_utils::fixtures::{engine, time};

    fn state() -> State {
        let n = 11 * 11;
        let grid = |name: &str, value: f32| {
            engine::grid("pal", name, time::REFERENCE_TIME, "EPSG:4326", (0.0, 0.0, 10.0, 10.0), 11, 11, &vec![value; n])
        };
        let doc = engine::with_grids(vec![
            grid("WindDirection", 90.0),
            grid("U", 0.0),
            grid("V", -1.0),
            grid("Calm", 0.0),
        ]);
        State::new(Engines::from_memory(Arc::new(MemoryEngine::from_json(doc).unwrap())))
    }

    fn layer(state: &mut State, extra: Value) -> RenderResult<Box<dyn Layer>> {
        let mut cfg = json!({
            "layer_type": "stream",
            "qid": "wind",
            "time": time::REFERENCE_TIME,
            "xstep": 100,
            "ystep": 50,
            "line_length": 50,
            "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 10, "y2": 10}
        });
        if let (Some(obj), Value::Object(extra)) = (cfg.as_object_mut(), extra) {
            obj.extend(extra);
        }
        create_layer(cfg, state, &Properties::default())
    }

    fn generate(state: &mut State, extra: Value) -> (Globals, Vec<Node>) {
        let mut layer = layer(state, extra).unwrap();
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, state).unwrap();
        (globals, nodes)
    }

    #[test]
    fn test_wind_direction() {
        assert_eq!(wind_direction(0.0, -1.0), 0.0);
        assert_eq!(wind_direction(-1.0, 0.0), 90.0);
        assert_eq!(wind_direction(0.0, 1.0), 180.0);
        assert_eq!(wind_direction(1.0, 0.0), 270.0);
        assert!(wind_direction(0.0, 0.0).is_nan());
        assert!(wind_direction(f32::NAN, 1.0).is_nan());
    }

    #[test]
    fn test_split_line() {
        let line: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 0.0)).collect();
        let pieces = split_line(&line, 4);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].len(), 4);
        assert_eq!(pieces[1][0], pieces[0][3]);
        assert_eq!(pieces[2].last(), line.last());
        assert!(split_line(&line[..1], 4).is_empty());
    }

    #[test]
    fn test_direction_parameter() {
        let mut state = state();
        let (globals, nodes) = generate(&mut state, json!({"parameter": "WindDirection", "attributes": {"stroke": "blue"}}));

        // Two eastward lines across the image, three pieces each
        assert_eq!(globals.paths.len(), 6);
        let path = &globals.paths["wind.0"];
        assert_eq!(path.layertype.as_deref(), Some("stream"));
        assert_eq!(path.parameter.as_deref(), Some("WindDirection"));
        let group = nodes.last().unwrap();
        assert_eq!(group.attributes["stroke"], "blue");
        assert_eq!(group.tags.len(), 6);
        assert_eq!(group.tags[5].attributes["xlink:href"], "#wind.5");
    }

    #[test]
    fn test_wind_components() {
        let mut state = state();
        // Northward flow from the second seed row only
        let (globals, _) = generate(&mut state, json!({"u": "U", "v": "V"}));
        assert_eq!(globals.paths.len(), 2);

        let mut state = self::state();
        let (globals, nodes) = generate(&mut state, json!({"u": "Calm", "v": "Calm"}));
        assert!(globals.paths.is_empty());
        assert!(nodes.last().unwrap().tags.is_empty());
    }

    #[test]
    fn test_invalid_settings() {
        let mut state = State::default();
        assert!(layer(&mut state, json!({})).is_err());
        assert!(layer(&mut state, json!({"u": "U"})).is_err());
        assert!(layer(&mut state, json!({"parameter": "D", "u": "U", "v": "V"})).is_err());
        assert!(layer(&mut state, json!({"parameter": "D", "line_length": 1})).is_err());
        assert!(layer(&mut state, json!({"parameter": "D", "min_length": 10, "max_length": 5})).is_err());
        assert!(layer(&mut state, json!({"parameter": "D", "xstep": 0})).is_err());
    }
}
