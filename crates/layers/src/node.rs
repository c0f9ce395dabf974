//! The output tree handed to the template backend.
//!
//! Layers append [`Node`]s to their parent's node list and register shared
//! material (styles, includes, paths, TopoJSON objects) in [`Globals`].

use map_common::{RenderError, RenderResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Presentation attributes, ordered by name.
pub type Attributes = BTreeMap<String, String>;

/// Parse an attribute object. Scalars are stored as text.
pub fn parse_attributes(value: Value) -> RenderResult<Attributes> {
    let map = match value {
        Value::Null => return Ok(Attributes::new()),
        Value::Object(map) => map,
        other => {
            return Err(RenderError::config("Attributes must be a JSON object").with_param("json", other))
        }
    };

    let mut attributes = Attributes::new();
    for (name, value) in map {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(RenderError::config("Attribute values must be scalars")
                    .with_param("attribute", name)
                    .with_param("json", other))
            }
        };
        attributes.insert(name, text);
    }
    Ok(attributes)
}

/// serde adapter for attribute maps inside derived settings.
pub fn deserialize_attributes<'de, D>(deserializer: D) -> Result<Attributes, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_attributes(value).map_err(|e| serde::de::Error::custom(e.message()))
}

pub fn hash_attributes(attributes: &Attributes) -> u64 {
    map_common::hash_value(attributes)
}

/// One element of the output tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Node {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub start: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub end: String,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iri: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layertype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// `Some(Value::Null)` marks an open lower limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lolimit: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hilimit: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isovalue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Circle radius in km
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Node>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<Node>,
}

impl Node {
    /// An element with explicit start and end text, e.g. `("<rect", "/>")`.
    pub fn tag(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            ..Default::default()
        }
    }

    /// A `<g>` group.
    pub fn group(attributes: Attributes) -> Self {
        Self {
            attributes,
            ..Self::tag("<g", "</g>")
        }
    }

    /// A `<use>` reference to the given IRI.
    pub fn use_tag(iri: &str, mut attributes: Attributes) -> Self {
        attributes.insert("xlink:href".to_string(), format!("#{}", iri));
        Self {
            attributes,
            ..Self::tag("<use", "/>")
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl ToString) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }
}

/// Paths of one TopoJSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectGroup {
    pub paths: BTreeMap<String, Node>,
}

/// Product-wide output shared by all views.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Globals {
    #[serde(rename = "type")]
    pub product_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub svg_tmpl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png: Option<Value>,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    pub css: BTreeMap<String, String>,
    pub includes: BTreeMap<String, String>,
    pub paths: BTreeMap<String, Node>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub objects: BTreeMap<String, ObjectGroup>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arcs: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    pub defs: Vec<Node>,
}

/// The result of generating a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderOutput {
    pub globals: Globals,
    pub views: Vec<Node>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_attributes_scalars() {
        let attrs = parse_attributes(json!({"fill": "red", "stroke-width": 1.5, "visible": true})).unwrap();
        assert_eq!(attrs["fill"], "red");
        assert_eq!(attrs["stroke-width"], "1.5");
        assert_eq!(attrs["visible"], "true");
    }

    #[test]
    fn test_parse_attributes_rejects_nested() {
        assert!(parse_attributes(json!({"style": {"a": 1}})).is_err());
        assert!(parse_attributes(json!(["fill"])).is_err());
        assert!(parse_attributes(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_node_serialization_skips_empty() {
        let node = Node::use_tag("temperature.band1", Attributes::new());
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["start"], "<use");
        assert_eq!(json["attributes"]["xlink:href"], "#temperature.band1");
        assert!(json.get("tags").is_none());
        assert!(json.get("iri").is_none());
    }

    #[test]
    fn test_open_limit_serializes_as_null() {
        let node = Node {
            lolimit: Some(Value::Null),
            hilimit: Some(json!(10.0)),
            ..Default::default()
        };
        let json = serde_json::to_value(&node).unwrap();
        assert!(json["lolimit"].is_null());
        assert_eq!(json["hilimit"], 10.0);
    }
}
