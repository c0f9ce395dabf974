//! A literal element, optionally wrapping text and nested layers.

use super::{Layer, LayerBase};
use crate::node::{Globals, Node};
use crate::state::State;
use map_common::{hash_combine, hash_value, ConfigObject, PixelBox, RenderError, RenderResult, ResultExt};
use projection::CoordinateTransformation;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct TagLayer {
    base: LayerBase,
    tag: String,
    /// Text by language, `""` is the fallback
    cdata: BTreeMap<String, String>,
}

impl TagLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            tag: "g".to_string(),
            cdata: BTreeMap::new(),
        }
    }

    fn text(&self) -> Option<&str> {
        let language = self.base.properties.language.as_deref().unwrap_or_default();
        self.cdata
            .get(language)
            .or_else(|| self.cdata.get(""))
            .or_else(|| self.cdata.values().next())
            .map(String::as_str)
    }

    /// Geographic placement and negative offsets from the far edges.
    fn resolve_position(&self, attributes: &mut crate::node::Attributes, pbox: Option<&PixelBox>) -> RenderResult<()> {
        let lon = attributes.remove("longitude");
        let lat = attributes.remove("latitude");
        if let (Some(lon), Some(lat)) = (&lon, &lat) {
            let pbox = pbox.ok_or_else(|| RenderError::config("Projection is needed for longitude and latitude"))?;
            let lon: f64 = parse_number("longitude", lon)?;
            let lat: f64 = parse_number("latitude", lat)?;
            let crs = self.base.crs()?;
            let (x, y) = CoordinateTransformation::from_wgs84(crs).transform_checked(lon, lat)?;
            let (px, py) = pbox.transform(x, y);
            attributes.insert("x".to_string(), renderer::geometry::format_number(px, 1));
            attributes.insert("y".to_string(), renderer::geometry::format_number(py, 1));
        } else if lon.is_some() || lat.is_some() {
            return Err(RenderError::config("Both longitude and latitude are needed"));
        }

        if let Some(pbox) = pbox {
            for (name, size) in [("x", pbox.width), ("y", pbox.height)] {
                if let Some(value) = attributes.get(name) {
                    let v = parse_number(name, value)?;
                    if v < 0.0 {
                        attributes.insert(name.to_string(), renderer::geometry::format_number(size as f64 + v, 1));
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> RenderResult<f64> {
    value
        .trim()
        .parse()
        .map_err(|_| RenderError::config("Attribute is not a number").with_param(name, value))
}

impl Layer for TagLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        if let Some(tag) = cfg.take_string("tag")? {
            if tag.is_empty() {
                return Err(RenderError::config("Tag name cannot be empty"));
            }
            self.tag = tag;
        }
        match cfg.take_value("cdata") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => {
                self.cdata.insert(String::new(), text);
            }
            Some(Value::Object(map)) => {
                for (language, text) in map {
                    let Value::String(text) = text else {
                        return Err(RenderError::config("Translated cdata must be a string").with_param("language", language));
                    };
                    self.cdata.insert(language, text);
                }
            }
            Some(other) => {
                return Err(RenderError::config("cdata must be a string or a translation object").with_param("json", other))
            }
        }
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;

        let pbox = self.base.pixel_box().ok();
        let mut attributes = self.base.attributes.clone();
        self.resolve_position(&mut attributes, pbox.as_ref())
            .trace("Failed to place tag")
            .with_param("qid", &self.base.qid)?;
        state.add_attributes(globals, &attributes)?;

        let composite = !self.base.layers.is_empty() || !self.cdata.is_empty();
        if !composite {
            let mut node = Node::tag(format!("<{}", self.tag), "/>");
            node.attributes = attributes;
            nodes.push(node);
            return Ok(());
        }

        let mut node = Node::tag(format!("<{}", self.tag), format!("</{}>", self.tag));
        node.attributes = attributes;
        node.cdata = self.text().map(super::xml_escape);
        self.base.layers.generate(globals, &mut node.layers, state)?;
        nodes.push(node);
        Ok(())
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.tag));
        hash_combine(&mut seed, hash_value(&self.cdata));
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::create_layer;
    use crate::properties::Properties;
    use serde_json::json;

    fn generate(value: Value) -> RenderResult<Vec<Node>> {
        let mut state = State::default();
        let mut layer = create_layer(value, &mut state, &Properties::default())?;
        let mut nodes = Vec::new();
        layer.generate(&mut Globals::default(), &mut nodes, &mut state)?;
        Ok(nodes)
    }

    #[test]
    fn test_simple_tag() {
        let nodes = generate(json!({"tag": "circle", "attributes": {"r": 5}})).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].start, "<circle");
        assert_eq!(nodes[0].end, "/>");
        assert_eq!(nodes[0].attributes["r"], "5");
    }

    #[test]
    fn test_cdata_and_translation() {
        let nodes = generate(json!({"tag": "text", "cdata": "a < b"})).unwrap();
        assert_eq!(nodes[0].end, "</text>");
        assert_eq!(nodes[0].cdata.as_deref(), Some("a &lt; b"));

        let nodes = generate(json!({"tag": "text", "language": "fi", "cdata": {"en": "rain", "fi": "sade"}})).unwrap();
        assert_eq!(nodes[0].cdata.as_deref(), Some("sade"));
    }

    #[test]
    fn test_nested_layers() {
        let nodes = generate(json!({"layers": [{"tag": "rect"}, {"tag": "circle"}]})).unwrap();
        assert_eq!(nodes[0].start, "<g");
        assert_eq!(nodes[0].layers.len(), 2);
        assert_eq!(nodes[0].layers[1].start, "<circle");
    }

    #[test]
    fn test_negative_position_and_lonlat() {
        let projection = json!({"crs": "EPSG:4326", "xsize": 100, "ysize": 50, "x1": 0, "y1": 0, "x2": 20, "y2": 10});
        let nodes = generate(json!({"tag": "text", "projection": projection, "attributes": {"x": -10, "y": 5}})).unwrap();
        assert_eq!(nodes[0].attributes["x"], "90");
        assert_eq!(nodes[0].attributes["y"], "5");

        let nodes =
            generate(json!({"tag": "circle", "projection": projection, "attributes": {"longitude": 10, "latitude": 5}}))
                .unwrap();
        assert_eq!(nodes[0].attributes["x"], "50");
        assert_eq!(nodes[0].attributes["y"], "25");
        assert!(!nodes[0].attributes.contains_key("longitude"));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(generate(json!({"tag": ""})).is_err());
        assert!(generate(json!({"cdata": 5})).is_err());
        assert!(generate(json!({"attributes": {"longitude": 10}})).is_err());
    }

    #[test]
    fn test_invisible_tag() {
        assert!(generate(json!({"tag": "rect", "visible": false})).unwrap().is_empty());
    }
}
