//! Formatted data values at generated positions.

use super::symbol::{include_symbol, read_point_values, symbol_transform, PointValue};
use super::{Layer, LayerBase};
use crate::attribute_selection::AttributeSelection;
use crate::field::ValueScaling;
use crate::label::Label;
use crate::node::{Attributes, Globals, Node};
use crate::positions::Positions;
use crate::projection::Projection;
use crate::state::State;
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};

/// How values are drawn: a formatted label and an optional symbol chosen
/// by value.
#[derive(Debug, Clone, Default)]
pub(crate) struct NumberStyle {
    label: Label,
    symbol: Option<String>,
    scale: Option<f64>,
    numbers: Vec<AttributeSelection>,
    minvalues: usize,
}

impl NumberStyle {
    pub(crate) fn take(cfg: &mut ConfigObject, state: &State) -> RenderResult<Self> {
        let mut style = NumberStyle::default();
        if let Some(value) = cfg.take_value("label") {
            style.label = Label::parse(value)?;
        }
        style.label.resolve(state)?;
        style.symbol = cfg.take_string("symbol")?;
        style.scale = cfg.take_f64("scale")?;
        if let Some(value) = cfg.take_value("numbers") {
            style.numbers = AttributeSelection::parse_list(value, "numbers")?;
        }
        if let Some(minvalues) = cfg.take_i64("minvalues")? {
            style.minvalues = usize::try_from(minvalues)
                .map_err(|_| RenderError::config("minvalues cannot be negative").with_param("minvalues", minvalues))?;
        }
        Ok(style)
    }

    /// Append symbols and labels of the values to the group.
    pub(crate) fn render(
        &self,
        group: &mut Node,
        globals: &mut Globals,
        state: &mut State,
        values: &[PointValue],
    ) -> RenderResult<usize> {
        let mut valid_count = 0;

        for pv in values {
            let selection = AttributeSelection::select(&self.numbers, pv.value)?;

            // A selection may rescale its symbol
            let mut attributes = selection.map(|s| s.attributes.clone()).unwrap_or_default();
            let rescale = match attributes.remove("scale") {
                Some(text) => text
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| RenderError::config("Invalid scale attribute").with_param("scale", &text))?,
                None => 1.0,
            };

            let iri = selection
                .and_then(|s| s.symbol.clone())
                .or_else(|| self.symbol.clone());
            if let Some(iri) = iri {
                include_symbol(globals, state, &iri)?;
                let scale = self.scale.unwrap_or(1.0) * rescale;
                group.tags.push(
                    Node::use_tag(&iri, Attributes::new()).with_attribute("transform", symbol_transform(&pv.point, scale)),
                );
            }

            if pv.value.is_finite() {
                valid_count += 1;
            }
            let text = self.label.print(pv.value);
            if text.is_empty() {
                continue;
            }
            state.add_attributes(globals, &attributes)?;
            let mut node = Node::tag("<text", "</text>");
            node.attributes = attributes;
            node.attributes
                .insert("x".to_string(), (pv.point.x + pv.point.dx + self.label.dx).to_string());
            node.attributes
                .insert("y".to_string(), (pv.point.y + pv.point.dy + self.label.dy).to_string());
            node.cdata = Some(super::xml_escape(&text));
            group.tags.push(node);
        }

        if valid_count < self.minvalues {
            return Err(RenderError::data("Too few valid values in number layer")
                .with_param("valid values", valid_count)
                .with_param("minimum count", self.minvalues));
        }
        Ok(valid_count)
    }

    pub(crate) fn hash_value(&self) -> u64 {
        let mut seed = self.label.hash_value();
        hash_combine(&mut seed, hash_value(&self.symbol));
        hash_combine(&mut seed, self.scale.map_or(0, hash_f64));
        for selection in &self.numbers {
            hash_combine(&mut seed, selection.hash_value());
        }
        hash_combine(&mut seed, self.minvalues as u64);
        seed
    }
}

#[derive(Debug)]
pub struct NumberLayer {
    base: LayerBase,
    parameter: String,
    scaling: ValueScaling,
    positions: Option<Positions>,
    style: NumberStyle,
}

impl NumberLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            parameter: String::new(),
            scaling: ValueScaling::default(),
            positions: None,
            style: NumberStyle::default(),
        }
    }

    fn generate_numbers(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let mut positions = self.positions.clone().unwrap_or_default();
        let values = read_point_values(&mut self.base, &mut positions, Some(&self.parameter), &self.scaling, state)?;
        self.base.note_data_time(state);

        let mut group = self.base.group(globals, state)?;
        let valid_count = self.style.render(&mut group, globals, state, &values)?;

        tracing::debug!(qid = %self.base.qid, points = values.len(), valid = valid_count, "generated numbers");
        nodes.push(group);
        Ok(())
    }
}

impl Layer for NumberLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, state: &mut State) -> RenderResult<()> {
        self.parameter = cfg
            .take_string("parameter")?
            .ok_or_else(|| RenderError::config("Number layer parameter is not set"))?;
        self.scaling = ValueScaling::take(cfg)?;
        if let Some(value) = cfg.take_value("positions") {
            self.positions = Some(Positions::init(value)?);
        }
        self.style = NumberStyle::take(cfg, state)?;
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
        self.generate_numbers(globals, nodes, state)
            .trace("Number layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.parameter));
        hash_combine(&mut seed, self.scaling.hash_value());
        hash_combine(&mut seed, self.positions.as_ref().map_or(0, Positions::hash_value));
        hash_combine(&mut seed, self.style.hash_value());
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
        let mut state = State::new(Engines::from_memory(Arc::new(MemoryEngine::from_json(doc).unwrap())));
        state.registries.symbols.register("dot", "<symbol id=\"dot\"/>").unwrap();
        state
    }

    fn layer(state: &mut State, extra: Value) -> RenderResult<Box<dyn Layer>> {
        let mut cfg = json!({
            "layer_type": "number",
            "qid": "n",
            "parameter": "Temperature",
            "time": time::REFERENCE_TIME,
            "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 10, "y2": 10},
            "positions": {"layout": "latlon", "locations": [
                {"longitude": 2, "latitude": 5, "dx": 4},
                {"longitude": 8, "latitude": 5}
            ]}
        });
        if let (Some(obj), Value::Object(extra)) = (cfg.as_object_mut(), extra) {
            obj.extend(extra);
        }
        create_layer(cfg, state, &Properties::default())
    }

    #[test]
    fn test_numbers_are_formatted() {
        let mut state = state();
        let mut layer = layer(
            &mut state,
            json!({
                "label": {"precision": 1, "suffix": "°", "dy": 2},
                "numbers": [{"lolimit": 5, "attributes": {"fill": "red"}}]
            }),
        )
        .unwrap();
        let mut nodes = Vec::new();
        layer.generate(&mut Globals::default(), &mut nodes, &mut state).unwrap();

        let texts = &nodes[0].tags;
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0].start, "<text");
        assert_eq!(texts[0].cdata.as_deref(), Some("2.0°"));
        assert_eq!(texts[0].attributes["x"], "24");
        assert_eq!(texts[0].attributes["y"], "52");
        assert!(!texts[0].attributes.contains_key("fill"));
        assert_eq!(texts[1].cdata.as_deref(), Some("8.0°"));
        assert_eq!(texts[1].attributes["fill"], "red");
    }

    #[test]
    fn test_unit_conversion_and_symbols() {
        let mut state = state();
        let mut layer = layer(
            &mut state,
            json!({
                "multiplier": 10,
                "symbol": "dot",
                "scale": 2,
                "numbers": [{"lolimit": 50, "attributes": {"scale": "0.5"}}]
            }),
        )
        .unwrap();
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, &mut state).unwrap();

        let tags = &nodes[0].tags;
        assert_eq!(tags[0].attributes["transform"], "translate(20,50) scale(2)");
        assert_eq!(tags[1].cdata.as_deref(), Some("20"));
        assert_eq!(tags[2].attributes["transform"], "translate(80,50)");
        assert_eq!(tags[3].cdata.as_deref(), Some("80"));
        assert!(!tags[3].attributes.contains_key("scale"));
        assert!(globals.includes.contains_key("dot"));
    }

    #[test]
    fn test_minvalues() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({"minvalues": 3})).unwrap();
        let err = layer.generate(&mut Globals::default(), &mut Vec::new(), &mut state).unwrap_err();
        assert_eq!(err.kind(), map_common::ErrorKind::Data);
        assert_eq!(err.param("valid values"), Some("2"));
    }

    #[test]
    fn test_missing_values_use_label_text() {
        let mut state = state();
        let mut layer = layer(
            &mut state,
            json!({
                "label": {"missing": "?"},
                "positions": {"layout": "latlon", "locations": [{"longitude": 20, "latitude": 5}]},
                "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 15, "y1": 0, "x2": 25, "y2": 10}
            }),
        )
        .unwrap();
        let mut nodes = Vec::new();
        layer.generate(&mut Globals::default(), &mut nodes, &mut state).unwrap();
        assert_eq!(nodes[0].tags[0].cdata.as_deref(), Some("?"));
    }

    #[test]
    fn test_init_errors() {
        let mut state = state();
        assert!(create_layer(json!({"layer_type": "number"}), &mut state, &Properties::default()).is_err());
        assert!(layer(&mut state, json!({"minvalues": -1})).is_err());
        assert!(layer(&mut state, json!({"label": {"precision": 1, "font": "x"}})).is_err());
    }
}
