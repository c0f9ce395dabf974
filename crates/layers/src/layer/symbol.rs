//! Symbols placed at generated positions.

use super::{Layer, LayerBase};
use crate::attribute_selection::AttributeSelection;
use crate::engine::GridData;
use crate::field::{fetch_grid, ValueScaling};
use crate::node::{Attributes, Globals, Node};
use crate::positions::{Point, Positions};
use crate::projection::Projection;
use crate::state::State;
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use std::sync::Arc;

/// A position with the data value sampled there, NaN when missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointValue {
    pub point: Point,
    pub value: f64,
}

/// Generate positions and sample the (scaled) grid at each of them.
pub(crate) fn read_point_values(
    base: &mut LayerBase,
    positions: &mut Positions,
    parameter: Option<&str>,
    scaling: &ValueScaling,
    state: &State,
) -> RenderResult<Vec<PointValue>> {
    let grid: Option<Arc<GridData>> = match parameter {
        Some(parameter) => {
            let grid = fetch_grid(state, &base.properties, parameter, None, None)?;
            base.update_projection(&grid);
            Some(grid)
        }
        None => None,
    };
    let crs = base.crs()?;
    let pbox = base.pixel_box()?;

    positions.prepare(state, &base.properties)?;
    let points = positions.get_points(grid.as_deref(), crs, &pbox)?;

    let (multiplier, offset) = scaling.resolve(state)?;
    Ok(points
        .into_iter()
        .map(|point| {
            let value = grid
                .as_ref()
                .and_then(|g| g.grid_values_at(point.lon, point.lat))
                .map_or(f64::NAN, |v| multiplier * v + offset);
            PointValue { point, value }
        })
        .collect())
}

/// `translate(x,y)` with an optional `scale(s)`.
pub(crate) fn symbol_transform(point: &Point, scale: f64) -> String {
    if scale == 1.0 {
        format!("translate({},{})", point.x, point.y)
    } else {
        format!("translate({},{}) scale({})", point.x, point.y, scale)
    }
}

/// Put the symbol definition into the includes the first time it is used.
pub(crate) fn include_symbol(globals: &mut Globals, state: &mut State, iri: &str) -> RenderResult<()> {
    if state.add_id(iri) {
        let text = state
            .symbol(iri)
            .ok_or_else(|| RenderError::config("Symbol is not defined").with_param("symbol", iri))?
            .to_string();
        globals.includes.insert(iri.to_string(), text);
    }
    Ok(())
}

#[derive(Debug)]
pub struct SymbolLayer {
    base: LayerBase,
    parameter: Option<String>,
    scaling: ValueScaling,
    positions: Option<Positions>,
    symbol: Option<String>,
    scale: Option<f64>,
    symbols: Vec<AttributeSelection>,
}

impl SymbolLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            parameter: None,
            scaling: ValueScaling::default(),
            positions: None,
            symbol: None,
            scale: None,
            symbols: Vec::new(),
        }
    }

    fn generate_symbols(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let mut positions = self.positions.clone().unwrap_or_default();
        let values = read_point_values(&mut self.base, &mut positions, self.parameter.as_deref(), &self.scaling, state)?;
        self.base.note_data_time(state);

        let mut group = self.base.group(globals, state)?;
        for pv in &values {
            let mut iri = self.symbol.clone();
            let mut attributes = Attributes::new();
            if let Some(selection) = AttributeSelection::select(&self.symbols, pv.value)? {
                if let Some(symbol) = &selection.symbol {
                    iri = Some(symbol.clone());
                }
                attributes = selection.attributes.clone();
            }
            let Some(iri) = iri else {
                continue;
            };
            state.add_attributes(globals, &attributes)?;
            include_symbol(globals, state, &iri)?;
            let node = Node::use_tag(&iri, attributes)
                .with_attribute("transform", symbol_transform(&pv.point, self.scale.unwrap_or(1.0)));
            group.tags.push(node);
        }

        tracing::debug!(qid = %self.base.qid, points = values.len(), symbols = group.tags.len(), "generated symbols");
        nodes.push(group);
        Ok(())
    }
}

impl Layer for SymbolLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        self.parameter = cfg.take_string("parameter")?;
        self.scaling = ValueScaling::take(cfg)?;
        if let Some(value) = cfg.take_value("positions") {
            self.positions = Some(Positions::init(value)?);
        }
        self.symbol = cfg.take_string("symbol")?;
        self.scale = cfg.take_f64("scale")?;
        if let Some(value) = cfg.take_value("symbols") {
            self.symbols = AttributeSelection::parse_list(value, "symbols")?;
        }

        if self.symbol.is_none() && self.symbols.is_empty() {
            return Err(RenderError::config(
                "Must define a default symbol with 'symbol' or value specific 'symbols' in a symbol layer",
            ));
        }
        if !self.symbols.is_empty() && self.parameter.is_none() {
            return Err(RenderError::config("Parameter not set for symbol layer even though multiple symbols are in use"));
        }
        Ok(())
    }

    fn probe_projection(&self, state: &State) -> RenderResult<Option<Projection>> {
        match &self.parameter {
            Some(parameter) => self.base.probe_data_projection(state, Some(parameter)),
            None => Ok(None),
        }
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if state.in_defs() {
            return Err(RenderError::config("Symbol layer cannot be used in defs").with_param("qid", &self.base.qid));
        }
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_symbols(globals, nodes, state)
            .trace("Symbol layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.parameter));
        hash_combine(&mut seed, self.scaling.hash_value());
        hash_combine(&mut seed, self.positions.as_ref().map_or(0, Positions::hash_value));
        hash_combine(&mut seed, hash_value(&self.symbol));
        hash_combine(&mut seed, self.scale.map_or(0, hash_f64));
        for selection in &self.symbols {
            hash_combine(&mut seed, selection.hash_value());
        }
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
        state.registries.symbols.register("cold", "<symbol id=\"cold\"/>").unwrap();
        state.registries.symbols.register("warm", "<symbol id=\"warm\"/>").unwrap();
        state
    }

    fn layer(state: &mut State, extra: Value) -> RenderResult<Box<dyn Layer>> {
        let mut cfg = json!({
            "layer_type": "symbol",
            "qid": "s",
            "time": time::REFERENCE_TIME,
            "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 10, "y2": 10},
            "positions": {"layout": "latlon", "locations": [
                {"longitude": 1, "latitude": 5},
                {"longitude": 9, "latitude": 5}
            ]}
        });
        if let (Some(obj), Value::Object(extra)) = (cfg.as_object_mut(), extra) {
            obj.extend(extra);
        }
        create_layer(cfg, state, &Properties::default())
    }

    #[test]
    fn test_value_selects_symbol() {
        let mut state = state();
        let mut layer = layer(
            &mut state,
            json!({
                "parameter": "Temperature",
                "scale": 2,
                "symbols": [
                    {"hilimit": 5, "symbol": "cold", "attributes": {"fill": "blue"}},
                    {"lolimit": 5, "symbol": "warm"}
                ]
            }),
        )
        .unwrap();
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, &mut state).unwrap();

        let uses = &nodes[0].tags;
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0].attributes["xlink:href"], "#cold");
        assert_eq!(uses[0].attributes["fill"], "blue");
        assert_eq!(uses[0].attributes["transform"], "translate(10,50) scale(2)");
        assert_eq!(uses[1].attributes["xlink:href"], "#warm");
        assert!(globals.includes.contains_key("cold"));
        assert!(globals.includes.contains_key("warm"));
    }

    #[test]
    fn test_default_symbol_without_data() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({"symbol": "cold"})).unwrap();
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, &mut state).unwrap();
        assert_eq!(nodes[0].tags.len(), 2);
        assert_eq!(nodes[0].tags[1].attributes["transform"], "translate(90,50)");
        assert_eq!(globals.includes.len(), 1);
    }

    #[test]
    fn test_undefined_symbol() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({"symbol": "missing"})).unwrap();
        let err = layer.generate(&mut Globals::default(), &mut Vec::new(), &mut state).unwrap_err();
        assert_eq!(err.param("symbol"), Some("missing"));
    }

    #[test]
    fn test_init_errors() {
        let mut state = state();
        assert!(layer(&mut state, json!({})).is_err());
        assert!(layer(&mut state, json!({"symbols": [{"symbol": "cold"}]})).is_err());
        assert!(layer(&mut state, json!({"symbol": "cold", "symbols": {}})).is_err());
    }

    #[test]
    fn test_not_allowed_in_defs() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({"symbol": "cold"})).unwrap();
        state.set_in_defs(true);
        assert!(layer.generate(&mut Globals::default(), &mut Vec::new(), &mut state).is_err());
    }

    #[test]
    fn test_symbol_transform() {
        let point = Point { x: 3, y: 4, lon: 0.0, lat: 0.0, dx: 0, dy: 0 };
        assert_eq!(symbol_transform(&point, 1.0), "translate(3,4)");
        assert_eq!(symbol_transform(&point, 0.5), "translate(3,4) scale(0.5)");
    }
}
