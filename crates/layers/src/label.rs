//! Number formatting for number and isolabel layers.

use crate::state::State;
use map_common::{hash_combine, hash_f64, hash_value, RenderError, RenderResult};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    #[default]
    ToNearest,
    TowardZero,
    Upward,
    Downward,
}

impl Rounding {
    fn apply(self, x: f64) -> f64 {
        match self {
            // Ties to even, like rint()
            Self::ToNearest => {
                let r = x.round();
                if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
                    r - x.signum()
                } else {
                    r
                }
            }
            Self::TowardZero => x.trunc(),
            Self::Upward => x.ceil(),
            Self::Downward => x.floor(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Horizontal,
    Vertical,
    Auto,
    Gradient,
}

/// Label settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Label {
    pub dx: i32,
    pub dy: i32,
    pub unit_conversion: Option<String>,
    pub multiplier: f64,
    pub offset: f64,
    /// Accepted for compatibility, formatting is controlled by `precision`
    pub format: Option<String>,
    pub locale: Option<String>,
    pub missing: String,
    pub precision: usize,
    pub multiple: f64,
    pub rounding: Rounding,
    pub prefix: String,
    pub suffix: String,
    pub plusprefix: String,
    pub minusprefix: String,
    pub orientation: Orientation,
    pub padding_char: Option<String>,
    pub padding_length: usize,
}

impl Default for Label {
    fn default() -> Self {
        Self {
            dx: 0,
            dy: 0,
            unit_conversion: None,
            multiplier: 1.0,
            offset: 0.0,
            format: None,
            locale: None,
            missing: "-".to_string(),
            precision: 0,
            multiple: 0.0,
            rounding: Rounding::ToNearest,
            prefix: String::new(),
            suffix: String::new(),
            plusprefix: String::new(),
            minusprefix: String::new(),
            orientation: Orientation::Horizontal,
            padding_char: None,
            padding_length: 0,
        }
    }
}

/// Legacy missing value marker of point data.
const LEGACY_MISSING: f64 = 32700.0;

impl Label {
    pub fn parse(value: serde_json::Value) -> RenderResult<Self> {
        let label: Label =
            serde_json::from_value(value).map_err(|e| RenderError::from(e).trace("Invalid label settings"))?;
        if label.padding_char.as_ref().is_some_and(|c| c.chars().count() != 1) {
            return Err(RenderError::config("padding_char must be a single character"));
        }
        if label.multiple < 0.0 {
            return Err(RenderError::config("Label multiple cannot be negative").with_param("multiple", label.multiple));
        }
        Ok(label)
    }

    /// Replace a named unit conversion by its factors.
    pub fn resolve(&mut self, state: &State) -> RenderResult<()> {
        if let Some(name) = self.unit_conversion.take() {
            if self.multiplier != 1.0 || self.offset != 0.0 {
                return Err(RenderError::config("Cannot use unit_conversion together with multiplier or offset")
                    .with_param("unit_conversion", name));
            }
            let (multiplier, offset) = state.unit_conversion(&name)?;
            self.multiplier = multiplier;
            self.offset = offset;
        }
        Ok(())
    }

    fn fixed(&self, value: f64) -> String {
        let scale = 10f64.powi(self.precision as i32);
        let mut rounded = self.rounding.apply(value * scale) / scale;
        if rounded == 0.0 {
            rounded = 0.0;
        }
        format!("{:.*}", self.precision, rounded)
    }

    /// Format a value, or the `missing` text for missing values.
    pub fn print(&self, value: f64) -> String {
        if !value.is_finite() || value == LEGACY_MISSING || renderer::painter::is_missing(value as f32) {
            return self.missing.clone();
        }
        let mut value = self.multiplier * value + self.offset;
        if self.multiple > 0.0 {
            value = self.multiple * self.rounding.apply(value / self.multiple);
        }

        if self.plusprefix.is_empty() && self.minusprefix.is_empty() {
            let text = format!("{}{}{}", self.prefix, self.fixed(value), self.suffix);
            let len = text.chars().count();
            return match self.padding_char.as_ref().and_then(|c| c.chars().next()) {
                Some(pad) if len < self.padding_length => {
                    let mut padded: String = std::iter::repeat(pad).take(self.padding_length - len).collect();
                    padded.push_str(&text);
                    padded
                }
                _ => text,
            };
        }

        let sign = if value < 0.0 { &self.minusprefix } else { &self.plusprefix };
        format!("{}{}{}{}", self.prefix, sign, self.fixed(value.abs()), self.suffix)
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&(self.dx, self.dy));
        hash_combine(&mut seed, hash_value(&self.unit_conversion));
        hash_combine(&mut seed, hash_f64(self.multiplier));
        hash_combine(&mut seed, hash_f64(self.offset));
        hash_combine(&mut seed, hash_value(&self.missing));
        hash_combine(&mut seed, self.precision as u64);
        hash_combine(&mut seed, hash_f64(self.multiple));
        hash_combine(&mut seed, hash_value(&self.rounding));
        hash_combine(&mut seed, hash_value(&[&self.prefix, &self.suffix, &self.plusprefix, &self.minusprefix]));
        hash_combine(&mut seed, hash_value(&self.orientation));
        hash_combine(&mut seed, hash_value(&self.padding_char));
        hash_combine(&mut seed, self.padding_length as u64);
        seed
    }
}
