//! Contour lines.

use super::contours::ContourSettings;
use super::{add_path, Layer, LayerBase};
use crate::engine::GridData;
use crate::label::Label;
use crate::node::{deserialize_attributes, hash_attributes, Attributes, Globals, Node};
use crate::projection::Projection;
use crate::state::State;
use geo::Geometry;
use map_common::{
    hash_combine, hash_f64, hash_value, ConfigObject, CrsCode, PixelBox, RenderError, RenderResult, ResultExt,
};
use renderer::contour::{isoline, ContourGrid};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const MAX_GENERATED_ISOLINES: usize = 10000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Isoline {
    #[serde(default)]
    pub qid: Option<String>,
    pub value: f64,
    #[serde(default, deserialize_with = "deserialize_attributes")]
    pub attributes: Attributes,
    #[serde(default)]
    pub label: Option<Label>,
}

impl Isoline {
    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.qid);
        hash_combine(&mut seed, hash_f64(self.value));
        hash_combine(&mut seed, hash_attributes(&self.attributes));
        hash_combine(&mut seed, self.label.as_ref().map_or(0, Label::hash_value));
        seed
    }
}

/// `isolines: {startvalue, endvalue, interval, except, qidprefix}`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IsolineSequence {
    startvalue: f64,
    endvalue: f64,
    interval: f64,
    #[serde(default)]
    except: Option<Value>,
    #[serde(default)]
    qidprefix: Option<String>,
}

impl IsolineSequence {
    fn except_values(&self) -> RenderResult<Vec<f64>> {
        let invalid = || RenderError::config("isolines except must be a number or an array of numbers");
        match &self.except {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Number(n)) => Ok(vec![n.as_f64().ok_or_else(invalid)?]),
            Some(Value::Array(items)) => items.iter().map(|v| v.as_f64().ok_or_else(invalid)).collect(),
            Some(_) => Err(invalid()),
        }
    }

    /// Values not divisible by any nonzero `except` value.
    fn values(&self) -> RenderResult<Vec<f64>> {
        if self.startvalue > self.endvalue {
            return Err(RenderError::config("isolines startvalue > endvalue"));
        }
        if self.interval <= 0.0 {
            return Err(RenderError::config("isolines interval must be positive"));
        }
        let except = self.except_values()?;
        let mut values = Vec::new();
        let mut step = 0u64;
        loop {
            let value = self.startvalue + step as f64 * self.interval;
            if value > self.endvalue + self.interval * 1e-9 {
                break;
            }
            step += 1;
            if except.iter().any(|e| *e != 0.0 && value % e == 0.0) {
                continue;
            }
            values.push(value);
            if values.len() > MAX_GENERATED_ISOLINES {
                return Err(RenderError::config("Too many (> 10000) isolines"));
            }
        }
        Ok(values)
    }
}

/// Fill the `{}` placeholder with the isovalue, `1.5` prints as `1,5`.
pub(crate) fn format_value(template: &str, value: f64) -> String {
    template.replacen("{}", &value.to_string(), 1).replace('.', ",")
}

/// Parse an `isolines` setting, giving every isoline a qid.
pub(crate) fn parse_isolines(value: Value, autoqid: Option<&str>, state: &mut State) -> RenderResult<Vec<Isoline>> {
    let (mut isolines, autoqid) = match value {
        Value::Null => return Ok(Vec::new()),
        list @ Value::Array(_) => {
            let isolines: Vec<Isoline> =
                serde_json::from_value(list).map_err(|e| RenderError::from(e).trace("Invalid isoline settings"))?;
            (isolines, autoqid.map(str::to_string))
        }
        sequence @ Value::Object(_) => {
            let sequence: IsolineSequence = serde_json::from_value(sequence)
                .map_err(|e| RenderError::from(e).trace("Invalid isolines sequence"))?;
            let pattern = match (autoqid, &sequence.qidprefix) {
                (Some(pattern), _) => pattern.to_string(),
                (None, Some(prefix)) => format!("{}_{{}}", prefix),
                (None, None) => "isoline_{}".to_string(),
            };
            let isolines = sequence
                .values()?
                .into_iter()
                .map(|value| Isoline {
                    value,
                    ..Default::default()
                })
                .collect();
            (isolines, Some(pattern))
        }
        other => {
            return Err(RenderError::config("Isoline layer isolines setting must be an array or a group")
                .with_param("json", other))
        }
    };

    for isoline in &mut isolines {
        let qid = match (&isoline.qid, &autoqid) {
            (Some(qid), _) => qid.replace('.', ","),
            (None, Some(pattern)) => format_value(pattern, isoline.value),
            (None, None) => state.make_qid("isoline"),
        };
        isoline.qid = Some(qid);
    }
    Ok(isolines)
}

/// Isolines of one layer in world coordinates of the output projection.
pub(crate) struct ContouredLines {
    /// The grid with scaled and smoothed values
    pub grid: GridData,
    pub crs: CrsCode,
    pub pbox: PixelBox,
    pub lines: Vec<Geometry<f64>>,
}

pub(crate) fn contour_lines(
    settings: &mut ContourSettings,
    base: &mut LayerBase,
    levels: &[f64],
    state: &mut State,
) -> RenderResult<ContouredLines> {
    let (grid, values): (Arc<GridData>, Vec<f32>) = settings.fetch(base, state)?;
    base.note_data_time(state);
    let crs = base.crs()?;
    let pbox = base.pixel_box()?;

    settings.intersections.fetch(state, &base.properties)?;
    let masks = settings.masks(state, crs)?;

    let contour_grid = ContourGrid::new(&values, grid.width, grid.height)?;
    let raw = levels
        .iter()
        .map(|level| isoline(&contour_grid, *level, settings.interpolation))
        .collect();
    let lines = settings.finish_lines(raw, &grid, base, &masks, crs, &pbox);
    let grid = GridData::new(grid.crs, grid.bbox, grid.width, grid.height, values)?;
    Ok(ContouredLines { grid, crs, pbox, lines })
}

#[derive(Debug)]
pub struct IsolineLayer {
    base: LayerBase,
    settings: ContourSettings,
    isolines: Vec<Isoline>,
    autoclass: Option<String>,
}

impl IsolineLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            settings: ContourSettings::default(),
            isolines: Vec::new(),
            autoclass: None,
        }
    }

    fn generate_lines(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let levels: Vec<f64> = self.isolines.iter().map(|i| i.value).collect();
        let contoured = contour_lines(&mut self.settings, &mut self.base, &levels, state)?;
        let precision = self.settings.precision(state);

        self.base.add_clip_rect(nodes, state, &contoured.pbox);
        let mut group = self.base.group(globals, state)?;

        let parameter = self.settings.parameter()?.to_string();
        let time = self
            .base
            .properties
            .valid_time()
            .ok()
            .map(|t| map_common::to_iso_string(&t));
        let object_key = format!("isoline:{}:{}", parameter, self.base.qid);

        for (isoline, geom) in self.isolines.iter().zip(contoured.lines) {
            if renderer::geometry::is_empty(&geom) {
                continue;
            }
            let iri = format!("{}.{}", self.base.qid, isoline.qid.as_deref().unwrap_or_default());
            if !state.add_id(&iri) {
                return Err(RenderError::uniqueness("Non-unique ID assigned to isoline").with_param("iri", &iri));
            }

            let mut attributes = isoline.attributes.clone();
            if let Some(template) = &self.autoclass {
                attributes.insert("class".to_string(), format_value(template, isoline.value));
            }
            state.add_attributes(globals, &attributes)?;

            let path = Node {
                iri: Some(iri.clone()),
                time: time.clone(),
                parameter: Some(parameter.clone()),
                layertype: Some("isoline".to_string()),
                isovalue: Some(isoline.value),
                attributes,
                ..Default::default()
            };
            add_path(globals, state, &object_key, path, &geom, contoured.crs, &contoured.pbox, precision)?;
            group.tags.push(Node::use_tag(&iri, Attributes::new()));
        }

        tracing::debug!(qid = %self.base.qid, isolines = group.tags.len(), "generated isolines");
        nodes.push(group);
        Ok(())
    }
}

impl Layer for IsolineLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, state: &mut State) -> RenderResult<()> {
        self.settings = ContourSettings::take(cfg)?;
        self.settings.parameter()?;
        let autoqid = cfg.take_string("autoqid")?;
        if let Some(value) = cfg.take_value("isolines") {
            self.isolines = parse_isolines(value, autoqid.as_deref(), state)?;
        }
        self.autoclass = cfg.take_string("autoclass")?;
        Ok(())
    }

    fn probe_projection(&self, state: &State) -> RenderResult<Option<Projection>> {
        self.settings.probe_projection(&self.base, state)
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_lines(globals, nodes, state)
            .trace("Isoline layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, self.settings.hash_value());
        for isoline in &self.isolines {
            hash_combine(&mut seed, isoline.hash_value());
        }
        hash_combine(&mut seed, hash_value(&self.autoclass));
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engines, MemoryEngine};
    use crate::layer::create_layer;
    use crate::properties::Properties;
    use serde_json::json;
    use test_utils::fixtures::{engine, time};

    fn state() -> State {
        let values = test_utils::create_gradient_grid(11, 11, 10.0);
        let doc = engine::with_grids(vec![engine::grid(
            "pal",
            "Temperature",
            time::REFERENCE_TIME,
            "EPSG:4326",
            (0.0, 0.0, 10.0, 10.0),
            11,
            11,
            &values,
        )]);
        State::new(Engines::from_memory(Arc::new(MemoryEngine::from_json(doc).unwrap())))
    }

    fn isolines(value: Value, autoqid: Option<&str>) -> RenderResult<Vec<Isoline>> {
        parse_isolines(value, autoqid, &mut State::default())
    }

    #[test]
    fn test_sequence() {
        let list = isolines(json!({"startvalue": 0, "endvalue": 10, "interval": 2.5, "except": 5}), None).unwrap();
        let values: Vec<f64> = list.iter().map(|i| i.value).collect();
        assert_eq!(values, vec![2.5, 7.5]);
        assert_eq!(list[0].qid.as_deref(), Some("isoline_2,5"));

        let list = isolines(json!({"startvalue": 0, "endvalue": 2, "interval": 1, "qidprefix": "t"}), None).unwrap();
        assert_eq!(list[2].qid.as_deref(), Some("t_2"));

        let list = isolines(json!({"startvalue": 0, "endvalue": 0.3, "interval": 0.1}), Some("x{}")).unwrap();
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_sequence_errors() {
        assert!(isolines(json!({"startvalue": 5, "endvalue": 0, "interval": 1}), None).is_err());
        assert!(isolines(json!({"startvalue": 0, "endvalue": 5, "interval": 0}), None).is_err());
        assert!(isolines(json!({"startvalue": 0, "endvalue": 5}), None).is_err());
        assert!(isolines(json!({"startvalue": 0, "endvalue": 1e6, "interval": 1}), None).is_err());
        assert!(isolines(json!({"startvalue": 0, "endvalue": 5, "interval": 1, "step": 1}), None).is_err());
        assert!(isolines(json!(5), None).is_err());
    }

    #[test]
    fn test_list_qids() {
        let list = isolines(json!([{"value": 1.5}, {"value": 2, "qid": "two"}]), None).unwrap();
        assert_eq!(list[0].qid.as_deref(), Some("isoline1"));
        assert_eq!(list[1].qid.as_deref(), Some("two"));
    }

    #[test]
    fn test_generates_isolines() {
        let mut state = state();
        let mut layer = create_layer(
            json!({
                "layer_type": "isoline",
                "qid": "t",
                "parameter": "Temperature",
                "time": time::REFERENCE_TIME,
                "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 10, "y2": 10},
                "isolines": [{"value": 5, "qid": "five", "attributes": {"stroke": "red"}}, {"value": 50}],
                "autoclass": "iso{}"
            }),
            &mut state,
            &Properties::default(),
        )
        .unwrap();
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, &mut state).unwrap();

        assert_eq!(nodes[0].tags.len(), 1);
        let path = &globals.paths["t.five"];
        assert_eq!(path.layertype.as_deref(), Some("isoline"));
        assert_eq!(path.isovalue, Some(5.0));
        assert_eq!(path.node_type.as_deref(), Some("LINESTRING"));
        assert_eq!(path.attributes["class"], "iso5");
        assert_eq!(path.attributes["stroke"], "red");
    }

    #[test]
    fn test_duplicate_isoline_ids() {
        let mut state = state();
        let mut layer = create_layer(
            json!({
                "layer_type": "isoline",
                "parameter": "Temperature",
                "time": time::REFERENCE_TIME,
                "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 10, "y2": 10},
                "isolines": [{"value": 4, "qid": "a"}, {"value": 6, "qid": "a"}]
            }),
            &mut state,
            &Properties::default(),
        )
        .unwrap();
        let err = layer.generate(&mut Globals::default(), &mut Vec::new(), &mut state).unwrap_err();
        assert_eq!(err.kind(), map_common::ErrorKind::Uniqueness);
    }
}
