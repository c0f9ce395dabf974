//! A rectangle covering the image and its margins.

use super::{Layer, LayerBase};
use crate::node::{Globals, Node};
use crate::state::State;
use map_common::{ConfigObject, RenderResult, ResultExt};

#[derive(Debug)]
pub struct BackgroundLayer {
    base: LayerBase,
}

impl BackgroundLayer {
    pub fn new(base: LayerBase) -> Self {
        Self { base }
    }
}

impl Layer for BackgroundLayer {
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
        let pbox = self
            .base
            .pixel_box()
            .trace("Background layer needs the image size")
            .with_param("qid", &self.base.qid)?;
        state.add_attributes(globals, &self.base.attributes)?;

        let xmargin = self.base.properties.xmargin;
        let ymargin = self.base.properties.ymargin;
        let mut rect = Node::tag("<rect", "/>")
            .with_attribute("x", -xmargin)
            .with_attribute("y", -ymargin)
            .with_attribute("width", pbox.width as i64 + 2 * xmargin)
            .with_attribute("height", pbox.height as i64 + 2 * ymargin);
        rect.attributes.extend(self.base.attributes.clone());

        let mut wrapper = Node::default();
        wrapper.tags.push(rect);
        nodes.push(wrapper);
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        self.base.hash_value()
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
    fn test_background_covers_margins() {
        let mut state = State::default();
        let mut layer = create_layer(
            json!({
                "layer_type": "background",
                "margin": 10,
                "projection": {"crs": "EPSG:3857", "xsize": 200, "ysize": 100, "x1": 0, "y1": 0, "x2": 2000, "y2": 1000},
                "attributes": {"fill": "white"}
            }),
            &mut state,
            &Properties::default(),
        )
        .unwrap();
        let mut nodes = Vec::new();
        layer.generate(&mut Globals::default(), &mut nodes, &mut state).unwrap();
        let rect = &nodes[0].tags[0];
        assert_eq!(rect.start, "<rect");
        assert_eq!(rect.attributes["x"], "-10");
        assert_eq!(rect.attributes["width"], "220");
        assert_eq!(rect.attributes["height"], "120");
        assert_eq!(rect.attributes["fill"], "white");
    }

    #[test]
    fn test_background_needs_projection() {
        let mut state = State::default();
        let mut layer =
            create_layer(json!({"layer_type": "background"}), &mut state, &Properties::default()).unwrap();
        assert!(layer.generate(&mut Globals::default(), &mut Vec::new(), &mut state).is_err());
    }
}
