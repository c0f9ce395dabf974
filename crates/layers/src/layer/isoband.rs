//! Filled contour bands.

use super::contours::ContourSettings;
use super::{add_path, Layer, LayerBase};
use crate::label::Label;
use crate::node::{deserialize_attributes, hash_attributes, Attributes, Globals, Node};
use crate::projection::Projection;
use crate::state::State;
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use renderer::contour::{isoband, ContourGrid};
use serde::Deserialize;
use serde_json::Value;

/// One band `[lolimit, hilimit)`, open on a missing side.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Isoband {
    #[serde(default)]
    pub qid: Option<String>,
    #[serde(default)]
    pub lolimit: Option<f64>,
    #[serde(default)]
    pub hilimit: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_attributes")]
    pub attributes: Attributes,
    /// Legend label
    #[serde(default)]
    pub label: Option<Label>,
}

impl Isoband {
    pub fn parse_list(value: Value) -> RenderResult<Vec<Isoband>> {
        if !value.is_array() {
            return Err(RenderError::config("isobands must be a JSON array"));
        }
        let bands: Vec<Isoband> =
            serde_json::from_value(value).map_err(|e| RenderError::from(e).trace("Invalid isoband settings"))?;
        for band in &bands {
            if let (Some(lo), Some(hi)) = (band.lolimit, band.hilimit) {
                if lo > hi {
                    return Err(RenderError::config("Isoband lolimit is above hilimit")
                        .with_param("lolimit", lo)
                        .with_param("hilimit", hi));
                }
            }
        }
        Ok(bands)
    }

    fn limit_json(limit: Option<f64>) -> Value {
        limit
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number)
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.qid);
        hash_combine(&mut seed, self.lolimit.map_or(0, hash_f64));
        hash_combine(&mut seed, self.hilimit.map_or(0, hash_f64));
        hash_combine(&mut seed, hash_attributes(&self.attributes));
        hash_combine(&mut seed, self.label.as_ref().map_or(0, Label::hash_value));
        seed
    }
}

/// Fill `{}` placeholders with the limits, `1.5` prints as `1,5`.
fn format_auto(template: &str, lo: Option<f64>, hi: Option<f64>) -> String {
    let text = |limit: Option<f64>, open: &str| match limit {
        None => open.to_string(),
        Some(v) if v.is_nan() => "nan".to_string(),
        Some(v) if v.is_infinite() => if v > 0.0 { "inf" } else { "-inf" }.to_string(),
        Some(v) => v.to_string().replace('.', ","),
    };
    let mut out = template.to_string();
    for value in [text(lo, "-inf"), text(hi, "inf")] {
        match out.find("{}") {
            Some(pos) => out.replace_range(pos..pos + 2, &value),
            None => break,
        }
    }
    out
}

#[derive(Debug)]
pub struct IsobandLayer {
    base: LayerBase,
    settings: ContourSettings,
    isobands: Vec<Isoband>,
    autoqid: Option<String>,
    autoclass: Option<String>,
}

impl IsobandLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            settings: ContourSettings::default(),
            isobands: Vec::new(),
            autoqid: None,
            autoclass: None,
        }
    }

    fn band_qid(&self, band: &Isoband, state: &mut State) -> String {
        if let Some(qid) = &band.qid {
            return qid.clone();
        }
        match &self.autoqid {
            Some(template) => format_auto(template, band.lolimit, band.hilimit),
            None => state.make_qid("isoband"),
        }
    }

    fn generate_bands(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let (grid, values) = self.settings.fetch(&mut self.base, state)?;
        self.base.note_data_time(state);
        let crs = self.base.crs()?;
        let pbox = self.base.pixel_box()?;
        let precision = self.settings.precision(state);

        self.settings.intersections.fetch(state, &self.base.properties)?;
        let masks = self.settings.masks(state, crs)?;

        let contour_grid = ContourGrid::new(&values, grid.width, grid.height)?;
        let bands = self
            .isobands
            .iter()
            .map(|band| isoband(&contour_grid, band.lolimit, band.hilimit, self.settings.interpolation))
            .collect();
        let geometries = self.settings.finish_bands(bands, &grid, &self.base, &masks, crs, &pbox);

        self.base.add_clip_rect(nodes, state, &pbox);
        let mut group = self.base.group(globals, state)?;

        let parameter = self.settings.parameter()?.to_string();
        let time = self
            .base
            .properties
            .valid_time()
            .ok()
            .map(|t| map_common::to_iso_string(&t));
        let object_key = format!("isoband:{}:{}", parameter, self.base.qid);

        let isobands = self.isobands.clone();
        for (band, geom) in isobands.iter().zip(geometries) {
            if renderer::geometry::is_empty(&geom) {
                continue;
            }
            let band_qid = self.band_qid(band, state);
            let iri = format!("{}.{}", self.base.qid, band_qid);
            if !state.add_id(&iri) {
                return Err(RenderError::uniqueness("Non-unique ID assigned to isoband").with_param("iri", &iri));
            }

            let mut attributes = band.attributes.clone();
            if let Some(template) = &self.autoclass {
                attributes.insert("class".to_string(), format_auto(template, band.lolimit, band.hilimit));
            }
            state.add_attributes(globals, &attributes)?;

            let path = Node {
                iri: Some(iri.clone()),
                time: time.clone(),
                parameter: Some(parameter.clone()),
                layertype: Some("isoband".to_string()),
                lolimit: Some(Isoband::limit_json(band.lolimit)),
                hilimit: Some(Isoband::limit_json(band.hilimit)),
                attributes: attributes.clone(),
                ..Default::default()
            };
            add_path(globals, state, &object_key, path, &geom, crs, &pbox, precision)?;
            group.tags.push(Node::use_tag(&iri, Attributes::new()));
        }

        tracing::debug!(qid = %self.base.qid, bands = group.tags.len(), "generated isobands");
        nodes.push(group);
        Ok(())
    }
}

impl Layer for IsobandLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        self.settings = ContourSettings::take(cfg)?;
        self.settings.parameter()?;
        if let Some(value) = cfg.take_value("isobands") {
            self.isobands = Isoband::parse_list(value)?;
        }
        self.autoqid = cfg.take_string("autoqid")?;
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
        self.generate_bands(globals, nodes, state)
            .trace("Isoband layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, self.settings.hash_value());
        for band in &self.isobands {
            hash_combine(&mut seed, band.hash_value());
        }
        hash_combine(&mut seed, hash_value(&self.autoqid));
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
    use renderer::geometry::OutputFormat;
    use serde_json::json;
    use std::sync::Arc;
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

    fn layer(state: &mut State, extra: Value) -> Box<dyn Layer> {
        let mut cfg = json!({
            "layer_type": "isoband",
            "qid": "temp",
            "parameter": "Temperature",
            "time": time::REFERENCE_TIME,
            "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 10, "y2": 10},
            "isobands": [
                {"qid": "cold", "hilimit": 3, "attributes": {"fill": "blue"}},
                {"qid": "mild", "lolimit": 3, "hilimit": 6},
                {"lolimit": 6}
            ]
        });
        if let (Some(obj), Value::Object(extra)) = (cfg.as_object_mut(), extra) {
            obj.extend(extra);
        }
        create_layer(cfg, state, &Properties::default()).unwrap()
    }

    #[test]
    fn test_format_auto() {
        assert_eq!(format_auto("t_{}_{}", Some(-1.5), Some(2.0)), "t_-1,5_2");
        assert_eq!(format_auto("t_{}_{}", None, Some(f64::NAN)), "t_-inf_nan");
        assert_eq!(format_auto("t_{}", Some(f64::INFINITY), None), "t_inf");
    }

    #[test]
    fn test_generates_paths_and_uses() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({}));
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, &mut state).unwrap();

        assert_eq!(nodes.len(), 1);
        let group = &nodes[0];
        assert_eq!(group.tags.len(), 3);
        assert_eq!(group.tags[0].attributes["xlink:href"], "#temp.cold");
        assert_eq!(group.tags[2].attributes["xlink:href"], "#temp.isoband1");

        let cold = &globals.paths["temp.cold"];
        assert_eq!(cold.layertype.as_deref(), Some("isoband"));
        assert_eq!(cold.lolimit, Some(Value::Null));
        assert_eq!(cold.hilimit, Some(json!(3.0)));
        assert_eq!(cold.attributes["fill"], "blue");
        assert_eq!(cold.time.as_deref(), Some("20240115T120000"));
        assert!(cold.data.as_ref().unwrap().as_str().unwrap().starts_with('M'));
    }

    #[test]
    fn test_autoqid_and_autoclass() {
        let mut state = state();
        let mut layer = layer(
            &mut state,
            json!({"isobands": [{"lolimit": 2.5, "hilimit": 5}], "autoqid": "t_{}_{}", "autoclass": "c{}"}),
        );
        let mut globals = Globals::default();
        layer.generate(&mut globals, &mut Vec::new(), &mut state).unwrap();
        assert_eq!(globals.paths["temp.t_2,5_5"].attributes["class"], "c2,5");
    }

    #[test]
    fn test_duplicate_band_ids() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({"isobands": [{"qid": "a", "hilimit": 5}, {"qid": "a", "lolimit": 5}]}));
        let err = layer.generate(&mut Globals::default(), &mut Vec::new(), &mut state).unwrap_err();
        assert_eq!(err.kind(), map_common::ErrorKind::Uniqueness);
        assert_eq!(err.param("qid"), Some("temp"));
    }

    #[test]
    fn test_topojson_output() {
        let mut state = state();
        state.set_format(OutputFormat::TopoJson);
        let mut layer = layer(&mut state, json!({}));
        let mut globals = Globals::default();
        layer.generate(&mut globals, &mut Vec::new(), &mut state).unwrap();
        assert!(globals.paths.is_empty());
        assert_eq!(globals.objects["isoband:Temperature:temp"].paths.len(), 3);
        assert!(!globals.arcs.is_empty());
    }

    #[test]
    fn test_empty_bands_are_skipped() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({"isobands": [{"lolimit": 100}]}));
        let mut nodes = Vec::new();
        layer.generate(&mut Globals::default(), &mut nodes, &mut state).unwrap();
        assert!(nodes[0].tags.is_empty());
    }

    #[test]
    fn test_parameter_required() {
        let mut state = State::default();
        assert!(create_layer(json!({"layer_type": "isoband"}), &mut state, &Properties::default()).is_err());
        assert!(create_layer(
            json!({"layer_type": "isoband", "parameter": "T", "isobands": [{"lolimit": 5, "hilimit": 1}]}),
            &mut state,
            &Properties::default()
        )
        .is_err());
    }

    #[test]
    fn test_data_projection_lookup() {
        let state = state();
        let mut s = State::default();
        let layer = create_layer(
            json!({"layer_type": "isoband", "parameter": "Temperature", "time": time::REFERENCE_TIME, "projection": {"crs": "data"}}),
            &mut s,
            &Properties::default(),
        )
        .unwrap();
        let projection = layer.probe_projection(&state).unwrap().unwrap();
        assert_eq!(projection.crs_code().unwrap(), map_common::CrsCode::Epsg4326);
        assert_eq!(projection.image_size(), Some((11, 11)));
    }
}
