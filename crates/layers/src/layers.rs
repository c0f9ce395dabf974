//! An ordered list of layers.

use crate::layer::{create_layer, Layer};
use crate::node::{Globals, Node};
use crate::projection::Projection;
use crate::properties::Properties;
use crate::state::State;
use map_common::{hash_combine, RenderError, RenderResult, ResultExt};
use serde_json::Value;

/// Layers generated strictly in configuration order.
#[derive(Debug, Default)]
pub struct Layers {
    layers: Vec<Box<dyn Layer>>,
}

impl Layers {
    pub fn init(value: Value, state: &mut State, properties: &Properties) -> RenderResult<Self> {
        let Value::Array(items) = value else {
            return Err(RenderError::config("Layers JSON is not a JSON array"));
        };
        let mut layers = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            layers.push(create_layer(item, state, properties).with_param("index", index)?);
        }
        Ok(Self { layers })
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Layer> {
        self.layers.iter().map(|l| l.as_ref())
    }

    /// The first data projection any of the layers can resolve.
    pub fn probe_projection(&self, state: &State) -> RenderResult<Option<Projection>> {
        for layer in &self.layers {
            if let Some(projection) = layer.probe_projection(state)? {
                return Ok(Some(projection));
            }
        }
        Ok(None)
    }

    pub fn set_projection(&mut self, projection: &Projection) {
        for layer in &mut self.layers {
            layer.set_projection(projection);
        }
    }

    pub fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        for layer in &mut self.layers {
            let base = layer.base();
            let span = tracing::info_span!("layer", qid = %base.qid, layer_type = %base.layer_type);
            let _enter = span.enter();
            layer.generate(globals, nodes, state)?;
        }
        Ok(())
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = 0;
        for layer in &self.layers {
            hash_combine(&mut seed, layer.hash_value());
        }
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requires_array() {
        let mut state = State::default();
        let err = Layers::init(json!({"layer_type": "tag"}), &mut state, &Properties::default()).unwrap_err();
        assert!(err.to_string().contains("Layers JSON is not a JSON array"));
    }

    #[test]
    fn test_generates_in_order() {
        let mut state = State::default();
        let mut layers = Layers::init(
            json!([
                {"tag": "rect", "qid": "a"},
                {"tag": "circle", "qid": "b"},
                {"layer_type": "null"}
            ]),
            &mut state,
            &Properties::default(),
        )
        .unwrap();
        assert_eq!(layers.len(), 3);

        let mut nodes = Vec::new();
        layers.generate(&mut Globals::default(), &mut nodes, &mut state).unwrap();
        let tags: Vec<&str> = nodes.iter().map(|n| n.start.as_str()).collect();
        assert_eq!(tags, ["<rect", "<circle"]);
    }

    #[test]
    fn test_failing_layer_reports_index() {
        let mut state = State::default();
        let err = Layers::init(json!([{"tag": "g"}, {"layer_type": "bogus"}]), &mut state, &Properties::default())
            .unwrap_err();
        assert_eq!(err.param("index"), Some("1"));
    }

    #[test]
    fn test_hash_depends_on_order() {
        let mut state = State::default();
        let a = Layers::init(json!([{"tag": "rect"}, {"tag": "circle"}]), &mut state, &Properties::default()).unwrap();
        let b = Layers::init(json!([{"tag": "circle"}, {"tag": "rect"}]), &mut state, &Properties::default()).unwrap();
        assert_ne!(a.hash_value(), b.hash_value());
    }
}
