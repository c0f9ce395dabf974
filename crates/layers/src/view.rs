//! Views: positioned groups of layers sharing one projection.

use crate::layers::Layers;
use crate::node::{hash_attributes, parse_attributes, Attributes, Globals, Node};
use crate::properties::Properties;
use crate::state::State;
use map_common::{hash_combine, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use serde_json::Value;

#[derive(Debug)]
pub struct View {
    pub qid: String,
    pub properties: Properties,
    pub attributes: Attributes,
    pub layers: Layers,
}

impl View {
    pub fn init(value: Value, state: &mut State, parent: &Properties) -> RenderResult<Self> {
        let mut cfg = ConfigObject::from_value(value, "View")?;
        let properties = Properties::init(&mut cfg, parent, state.gazetteer())?;
        let qid = match cfg.take_string("qid")? {
            Some(qid) => qid,
            None => state.make_qid("view"),
        };
        let attributes = parse_attributes(cfg.take_value("attributes").unwrap_or(Value::Null))
            .trace("Invalid view attributes")
            .with_param("qid", &qid)?;
        let layers = match cfg.take_value("layers") {
            Some(layers) => Layers::init(layers, state, &properties).with_param("qid", &qid)?,
            None => Layers::default(),
        };
        cfg.finish("View").with_param("qid", &qid)?;
        Ok(Self {
            qid,
            properties,
            attributes,
            layers,
        })
    }

    /// Replace `crs: "data"` by the projection of the first layer that knows it.
    fn resolve_projection(&mut self, state: &State) -> RenderResult<()> {
        if !self.properties.projection.is_data() {
            return Ok(());
        }
        let projection = self
            .layers
            .probe_projection(state)?
            .ok_or_else(|| RenderError::config("No layer of the view can resolve the data projection"))?;
        tracing::debug!(qid = %self.qid, crs = ?projection.crs, "resolved data projection");
        self.layers.set_projection(&projection);
        self.properties.projection = projection;
        Ok(())
    }

    pub fn generate(&mut self, globals: &mut Globals, state: &mut State) -> RenderResult<Node> {
        let span = tracing::info_span!("view", qid = %self.qid);
        let _enter = span.enter();

        self.resolve_projection(state).with_param("qid", &self.qid)?;
        state.add_attributes(globals, &self.attributes)?;
        let mut node = Node::group(self.attributes.clone());
        self.layers
            .generate(globals, &mut node.layers, state)
            .trace("View generation failed")
            .with_param("qid", &self.qid)?;
        Ok(node)
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.qid);
        hash_combine(&mut seed, self.properties.hash_value());
        hash_combine(&mut seed, hash_attributes(&self.attributes));
        hash_combine(&mut seed, self.layers.hash_value());
        seed
    }
}

/// The views of a product, in order.
#[derive(Debug, Default)]
pub struct Views {
    pub views: Vec<View>,
}

impl Views {
    pub fn init(value: Value, state: &mut State, parent: &Properties) -> RenderResult<Self> {
        let Value::Array(items) = value else {
            return Err(RenderError::config("Views JSON is not a JSON array"));
        };
        let views = items
            .into_iter()
            .map(|item| View::init(item, state, parent))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self { views })
    }

    pub fn generate(&mut self, globals: &mut Globals, state: &mut State) -> RenderResult<Vec<Node>> {
        self.views.iter_mut().map(|view| view.generate(globals, state)).collect()
    }

    /// Image size of the first view, once its projection is resolved.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.views.first().and_then(|v| v.properties.projection.image_size())
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = 0;
        for view in &self.views {
            hash_combine(&mut seed, view.hash_value());
        }
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engines, MemoryEngine};
    use serde_json::json;
    use std::sync::Arc;
    use test_utils::fixtures::{engine, time};

    fn state() -> State {
        let values = test_utils::create_gradient_grid(21, 11, 10.0);
        let doc = engine::with_grids(vec![engine::grid(
            "pal",
            "Temperature",
            time::REFERENCE_TIME,
            "EPSG:4326",
            (0.0, 0.0, 20.0, 10.0),
            21,
            11,
            &values,
        )]);
        State::new(Engines::from_memory(Arc::new(MemoryEngine::from_json(doc).unwrap())))
    }

    #[test]
    fn test_view_group_with_layers() {
        let mut state = state();
        let mut view = View::init(
            json!({
                "qid": "main",
                "attributes": {"transform": "translate(10,10)"},
                "layers": [{"tag": "rect"}]
            }),
            &mut state,
            &Properties::default(),
        )
        .unwrap();
        let node = view.generate(&mut Globals::default(), &mut state).unwrap();
        assert_eq!(node.start, "<g");
        assert_eq!(node.attributes["transform"], "translate(10,10)");
        assert_eq!(node.layers.len(), 1);
    }

    #[test]
    fn test_data_projection_resolved_from_layer() {
        let mut state = state();
        let mut view = View::init(
            json!({
                "time": time::REFERENCE_TIME,
                "projection": {"crs": "data"},
                "layers": [
                    {"tag": "rect"},
                    {"layer_type": "isoband", "parameter": "Temperature", "isobands": [{"lolimit": 2, "hilimit": 4}]}
                ]
            }),
            &mut state,
            &Properties::default(),
        )
        .unwrap();
        let mut globals = Globals::default();
        view.generate(&mut globals, &mut state).unwrap();
        assert_eq!(view.properties.projection.image_size(), Some((21, 11)));
        assert_eq!(globals.paths.len(), 1);
    }

    #[test]
    fn test_unresolvable_data_projection() {
        let mut state = state();
        let mut view = View::init(
            json!({"projection": {"crs": "data"}, "layers": [{"tag": "rect"}]}),
            &mut state,
            &Properties::default(),
        )
        .unwrap();
        let err = view.generate(&mut Globals::default(), &mut state).unwrap_err();
        assert_eq!(err.kind(), map_common::ErrorKind::Config);
    }

    #[test]
    fn test_views_require_array() {
        let mut state = state();
        assert!(Views::init(json!({}), &mut state, &Properties::default()).is_err());
        let views = Views::init(json!([{}, {}]), &mut state, &Properties::default()).unwrap();
        assert_eq!(views.views[1].qid, "view2");
    }

    #[test]
    fn test_unknown_view_key() {
        let mut state = state();
        let err = View::init(json!({"layerz": []}), &mut state, &Properties::default()).unwrap_err();
        assert_eq!(err.param("key"), Some("layerz"));
    }
}
