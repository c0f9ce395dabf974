//! Value-driven choice of symbols and presentation attributes.

use crate::node::{deserialize_attributes, Attributes};
use map_common::{hash_combine, hash_f64, hash_value, RenderError, RenderResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One entry of a `symbols` or `numbers` list.
///
/// Matches `value` exactly, or the half-open range `[lolimit, hilimit)`.
/// An entry with neither matches every value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeSelection {
    #[serde(default)]
    pub qid: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub lolimit: Option<f64>,
    #[serde(default)]
    pub hilimit: Option<f64>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "deserialize_attributes")]
    pub attributes: Attributes,
    #[serde(default)]
    pub translation: BTreeMap<String, String>,
}

impl AttributeSelection {
    pub fn validate(&self) -> RenderResult<()> {
        if self.value.is_some() && (self.lolimit.is_some() || self.hilimit.is_some()) {
            return Err(RenderError::config(
                "Attribute selection cannot have both a value and lolimit/hilimit",
            ));
        }
        Ok(())
    }

    pub fn matches(&self, x: f64) -> RenderResult<bool> {
        self.validate()?;
        if let Some(value) = self.value {
            return Ok(x == value);
        }
        Ok(self.lolimit.map_or(true, |lo| x >= lo) && self.hilimit.map_or(true, |hi| x < hi))
    }

    /// First matching selection.
    pub fn select(selections: &[AttributeSelection], x: f64) -> RenderResult<Option<&AttributeSelection>> {
        for selection in selections {
            if selection.matches(x)? {
                return Ok(Some(selection));
            }
        }
        Ok(None)
    }

    /// Parse a JSON array of selections.
    pub fn parse_list(value: Value, context: &str) -> RenderResult<Vec<AttributeSelection>> {
        if !value.is_array() {
            return Err(RenderError::config(format!("{} must be a JSON array", context)));
        }
        let list: Vec<AttributeSelection> = serde_json::from_value(value)
            .map_err(|e| RenderError::from(e).trace(format!("Invalid {} settings", context)))?;
        for selection in &list {
            selection.validate()?;
        }
        Ok(list)
    }

    /// Text for the language, if translated.
    pub fn translate(&self, language: Option<&str>) -> Option<&str> {
        language.and_then(|l| self.translation.get(l)).map(String::as_str)
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = self.value.map_or(0, hash_f64);
        hash_combine(&mut seed, self.lolimit.map_or(0, hash_f64));
        hash_combine(&mut seed, self.hilimit.map_or(0, hash_f64));
        hash_combine(&mut seed, hash_value(&self.symbol));
        hash_combine(&mut seed, hash_value(&self.attributes));
        hash_combine(&mut seed, hash_value(&self.translation));
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range(lo: Option<f64>, hi: Option<f64>) -> AttributeSelection {
        AttributeSelection {
            lolimit: lo,
            hilimit: hi,
            ..Default::default()
        }
    }

    #[test]
    fn test_range_is_half_open() {
        let s = range(Some(0.0), Some(10.0));
        assert!(s.matches(0.0).unwrap());
        assert!(s.matches(9.999).unwrap());
        assert!(!s.matches(10.0).unwrap());
        assert!(!s.matches(-0.1).unwrap());
    }

    #[test]
    fn test_open_ranges_and_default() {
        assert!(range(None, Some(0.0)).matches(-1e9).unwrap());
        assert!(range(Some(5.0), None).matches(1e9).unwrap());
        assert!(range(None, None).matches(42.0).unwrap());
    }

    #[test]
    fn test_exact_value() {
        let s = AttributeSelection {
            value: Some(3.0),
            ..Default::default()
        };
        assert!(s.matches(3.0).unwrap());
        assert!(!s.matches(3.5).unwrap());
    }

    #[test]
    fn test_value_and_limit_conflict() {
        let s = AttributeSelection {
            value: Some(3.0),
            hilimit: Some(4.0),
            ..Default::default()
        };
        assert!(s.matches(3.0).is_err());
        assert!(AttributeSelection::parse_list(json!([{"value": 1, "lolimit": 0}]), "symbols").is_err());
    }

    #[test]
    fn test_select_first_match() {
        let list = AttributeSelection::parse_list(
            json!([
                {"hilimit": 0, "symbol": "cold", "attributes": {"fill": "blue"}},
                {"lolimit": 0, "hilimit": 20, "symbol": "mild", "attributes": {"opacity": 0.5}},
                {"symbol": "other"}
            ]),
            "symbols",
        )
        .unwrap();
        assert_eq!(AttributeSelection::select(&list, -5.0).unwrap().unwrap().symbol.as_deref(), Some("cold"));
        let mild = AttributeSelection::select(&list, 0.0).unwrap().unwrap();
        assert_eq!(mild.symbol.as_deref(), Some("mild"));
        assert_eq!(mild.attributes["opacity"], "0.5");
        assert_eq!(AttributeSelection::select(&list, 20.0).unwrap().unwrap().symbol.as_deref(), Some("other"));
    }

    #[test]
    fn test_parse_list_errors() {
        assert!(AttributeSelection::parse_list(json!({"symbol": "a"}), "symbols").is_err());
        assert!(AttributeSelection::parse_list(json!([{"colour": "red"}]), "symbols").is_err());
    }

    #[test]
    fn test_translation() {
        let list = AttributeSelection::parse_list(json!([{"translation": {"fi": "sade", "en": "rain"}}]), "numbers")
            .unwrap();
        assert_eq!(list[0].translate(Some("fi")), Some("sade"));
        assert_eq!(list[0].translate(Some("sv")), None);
        assert_eq!(list[0].translate(None), None);
    }
}
