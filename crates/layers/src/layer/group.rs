//! Grouping layers.

use super::{Layer, LayerBase};
use crate::node::{Globals, Node};
use crate::state::State;
use map_common::{ConfigObject, RenderResult};

/// A `<g>` around the nested layers.
#[derive(Debug)]
pub struct GroupLayer {
    base: LayerBase,
}

impl GroupLayer {
    pub fn new(base: LayerBase) -> Self {
        Self { base }
    }
}

impl Layer for GroupLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, _cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        if let Ok(pbox) = self.base.pixel_box() {
            self.base.add_clip_rect(nodes, state, &pbox);
        }
        let mut group = self.base.group(globals, state)?;
        self.base.layers.generate(globals, &mut group.layers, state)?;
        nodes.push(group);
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        self.base.hash_value()
    }
}

/// A placeholder that renders nothing.
#[derive(Debug)]
pub struct NullLayer {
    base: LayerBase,
}

impl NullLayer {
    pub fn new(base: LayerBase) -> Self {
        Self { base }
    }
}

impl Layer for NullLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, _cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        Ok(())
    }

    fn generate(&mut self, _globals: &mut Globals, _nodes: &mut Vec<Node>, _state: &mut State) -> RenderResult<()> {
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use crate::layer::create_layer;
    use crate::node::Globals;
    use crate::properties::Properties;
    use crate::state::State;
    use serde_json::json;

    #[test]
    fn test_group_with_clip() {
        let mut state = State::default();
        let mut layer = create_layer(
            json!({
                "layer_type": "group",
                "clip": true,
                "projection": {"crs": "EPSG:4326", "xsize": 10, "ysize": 10, "x1": 0, "y1": 0, "x2": 1, "y2": 1},
                "attributes": {"class": "outer"},
                "layers": [{"tag": "rect"}]
            }),
            &mut state,
            &Properties::default(),
        )
        .unwrap();
        let mut nodes = Vec::new();
        layer.generate(&mut Globals::default(), &mut nodes, &mut state).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].start, "<clipPath");
        assert_eq!(nodes[1].attributes["clip-path"], "url(#generated_id_0)");
        assert_eq!(nodes[1].attributes["class"], "outer");
        assert_eq!(nodes[1].layers.len(), 1);
    }

    #[test]
    fn test_null_layer() {
        let mut state = State::default();
        let mut layer =
            create_layer(json!({"layer_type": "null", "layers": [{"tag": "rect"}]}), &mut state, &Properties::default())
                .unwrap();
        let mut nodes = Vec::new();
        layer.generate(&mut Globals::default(), &mut nodes, &mut state).unwrap();
        assert!(nodes.is_empty());
        assert_eq!(layer.hash_value(), 0);
    }
}
