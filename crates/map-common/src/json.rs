//! Typed extraction of configuration keys from JSON objects.
//!
//! Layers consume their settings by removing keys one by one from a
//! [`ConfigObject`]. Whatever remains after [`ConfigObject::finish`] was not
//! recognised by anyone and is reported as a configuration error.

use crate::error::{RenderError, RenderResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A JSON object whose keys are consumed as they are read.
#[derive(Debug, Clone, Default)]
pub struct ConfigObject {
    map: Map<String, Value>,
}

impl ConfigObject {
    pub fn new(map: Map<String, Value>) -> Self {
        Self { map }
    }

    /// Wrap a JSON value, which must be an object.
    pub fn from_value(value: Value, context: &str) -> RenderResult<Self> {
        match value {
            Value::Object(map) => Ok(Self { map }),
            Value::Null => Ok(Self::default()),
            other => Err(RenderError::config(format!(
                "{} settings must be a JSON object",
                context
            ))
            .with_param("json", other)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Remove a raw value. An explicit `null` counts as absent.
    pub fn take_value(&mut self, key: &str) -> Option<Value> {
        match self.map.remove(key) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }

    pub fn take_string(&mut self, key: &str) -> RenderResult<Option<String>> {
        match self.take_value(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(type_error(key, "a string", &other)),
        }
    }

    pub fn take_f64(&mut self, key: &str) -> RenderResult<Option<f64>> {
        match self.take_value(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| RenderError::config(format!("'{}' is not a finite number", key))),
            Some(other) => Err(type_error(key, "a number", &other)),
        }
    }

    pub fn take_i64(&mut self, key: &str) -> RenderResult<Option<i64>> {
        match self.take_value(key) {
            None => Ok(None),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(i) => Ok(Some(i)),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => Ok(Some(f as i64)),
                    _ => Err(type_error(key, "an integer", &Value::Number(n))),
                },
            },
            Some(other) => Err(type_error(key, "an integer", &other)),
        }
    }

    pub fn take_bool(&mut self, key: &str) -> RenderResult<Option<bool>> {
        match self.take_value(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::Number(n)) => Ok(Some(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
            Some(other) => Err(type_error(key, "a boolean", &other)),
        }
    }

    /// A string or an array of strings, collected into a set.
    pub fn take_string_set(&mut self, key: &str) -> RenderResult<Option<BTreeSet<String>>> {
        match self.take_value(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(std::iter::once(s).collect())),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(type_error(key, "an array of strings", &other)),
                })
                .collect::<RenderResult<BTreeSet<String>>>()
                .map(Some),
            Some(other) => Err(type_error(key, "a string or an array of strings", &other)),
        }
    }

    /// A nested object.
    pub fn take_object(&mut self, key: &str) -> RenderResult<Option<ConfigObject>> {
        match self.take_value(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(ConfigObject::new(map))),
            Some(other) => Err(type_error(key, "a JSON object", &other)),
        }
    }

    /// Deserialize a value with serde.
    pub fn take_parsed<T: DeserializeOwned>(&mut self, key: &str) -> RenderResult<Option<T>> {
        match self.take_value(key) {
            None => Ok(None),
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| RenderError::from(e).trace(format!("Failed to parse '{}'", key))),
        }
    }

    /// Fail if any key was left unconsumed.
    pub fn finish(self, context: &str) -> RenderResult<()> {
        match self.map.keys().next() {
            None => Ok(()),
            Some(key) => Err(RenderError::config(format!(
                "{} does not have a setting named '{}'",
                context, key
            ))
            .with_param("key", key)),
        }
    }
}

fn type_error(key: &str, expected: &str, got: &Value) -> RenderError {
    RenderError::config(format!("'{}' must be {}", key, expected)).with_param("value", got)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn object(value: Value) -> ConfigObject {
        ConfigObject::from_value(value, "test").unwrap()
    }

    #[test]
    fn test_take_typed_values() {
        let mut cfg = object(json!({
            "name": "temp",
            "size": 2.5,
            "count": 4,
            "enabled": true,
            "formats": ["svg", "png"],
            "skip": null
        }));

        assert_eq!(cfg.take_string("name").unwrap().as_deref(), Some("temp"));
        assert_eq!(cfg.take_f64("size").unwrap(), Some(2.5));
        assert_eq!(cfg.take_i64("count").unwrap(), Some(4));
        assert_eq!(cfg.take_bool("enabled").unwrap(), Some(true));
        assert_eq!(cfg.take_string_set("formats").unwrap().unwrap().len(), 2);
        assert_eq!(cfg.take_value("skip"), None);
        assert!(cfg.finish("test").is_ok());
    }

    #[test]
    fn test_wrong_type_is_config_error() {
        let mut cfg = object(json!({"size": "big"}));
        let err = cfg.take_f64("size").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_leftover_key_is_reported() {
        let mut cfg = object(json!({"known": 1, "mystery": 2}));
        cfg.take_i64("known").unwrap();
        let err = cfg.finish("Isoband layer").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("mystery"));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(ConfigObject::from_value(json!([1, 2]), "test").is_err());
    }
}
