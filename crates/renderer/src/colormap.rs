//! Value to ARGB colour maps.
//!
//! A colour map is an ordered set of `(threshold, colour)` entries. Lookups
//! either take the nearest entry at or below the value, or interpolate each
//! channel linearly between the surrounding entries.
//!
//! The text format has one `value;colour` entry per line where the colour is
//! `AARRGGBB` hex or decimal `a,r,g,b`. A `#` starts a comment.

use map_common::{RenderError, RenderResult};

/// Parse an `AARRGGBB` (or `RRGGBB`, alpha 0) hex colour.
pub fn parse_argb(s: &str) -> RenderResult<u32> {
    let hex = s.trim().trim_start_matches('#');
    let hex = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    if hex.is_empty() || hex.len() > 8 {
        return Err(RenderError::config("Invalid ARGB colour").with_param("color", s));
    }
    u32::from_str_radix(hex, 16)
        .map_err(|_| RenderError::config("Invalid ARGB colour").with_param("color", s))
}

/// Interpolate each channel of two ARGB colours. `p` is clamped to `[0, 1]`.
///
/// Channel deltas are truncated toward zero.
pub fn interpolate_argb(from: u32, to: u32, p: f64) -> u32 {
    let p = p.clamp(0.0, 1.0);
    let mut out = 0u32;
    for shift in [0u32, 8, 16, 24] {
        let a = ((from >> shift) & 0xFF) as i32;
        let b = ((to >> shift) & 0xFF) as i32;
        let d = ((b - a) as f64 * p) as i32;
        out |= (((a + d) as u32) & 0xFF) << shift;
    }
    out
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColorMap {
    entries: Vec<(f32, u32)>,
}

impl ColorMap {
    /// Build from entries in any order. Later duplicates replace earlier ones.
    pub fn new(mut entries: Vec<(f32, u32)>) -> Self {
        entries.retain(|(v, _)| !v.is_nan());
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut deduped: Vec<(f32, u32)> = Vec::with_capacity(entries.len());
        for (v, c) in entries {
            match deduped.last_mut() {
                Some(last) if last.0 == v => last.1 = c,
                _ => deduped.push((v, c)),
            }
        }
        Self { entries: deduped }
    }

    /// Parse the `value;colour` text format.
    pub fn parse(text: &str) -> RenderResult<Self> {
        let mut entries = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (value, color) = line.split_once(';').ok_or_else(|| {
                RenderError::config("Colour map line is missing ';'")
                    .with_param("line", lineno + 1)
                    .with_param("text", raw)
            })?;
            let value: f32 = value.trim().parse().map_err(|_| {
                RenderError::config("Invalid colour map value")
                    .with_param("line", lineno + 1)
                    .with_param("value", value)
            })?;
            let color = color.trim();
            let color = if color.contains(',') {
                let parts = color
                    .split(',')
                    .map(|p| p.trim().parse::<u8>())
                    .collect::<Result<Vec<u8>, _>>()
                    .map_err(|_| {
                        RenderError::config("Invalid colour map colour")
                            .with_param("line", lineno + 1)
                            .with_param("color", color)
                    })?;
                if parts.len() != 4 {
                    return Err(RenderError::config("Colour must have four a,r,g,b components")
                        .with_param("line", lineno + 1)
                        .with_param("color", color));
                }
                (parts[0] as u32) << 24 | (parts[1] as u32) << 16 | (parts[2] as u32) << 8 | parts[3] as u32
            } else {
                parse_argb(color).map_err(|e| e.with_param("line", lineno + 1))?
            };
            entries.push((value, color));
        }
        Ok(Self::new(entries))
    }

    /// One of the built-in maps: `percent`, `sea`, `land` or `sea2`.
    pub fn builtin(name: &str) -> Option<Self> {
        let entries = match name {
            "percent" => vec![(0.0, 0x0000_0000), (1.0, 0x80FF_FFFF)],
            "sea" => vec![(0.0, 0xFF73_9EC9), (0.1, 0x0073_9EC9), (1.0, 0x0000_0000)],
            "land" => vec![
                (0.0, 0x0000_0000),
                (0.099, 0x00A8_BBA3),
                (0.1, 0xFFA8_BBA3),
                (1.0, 0xFFA8_BBA3),
            ],
            "sea2" => vec![(0.0, 0x2000_0000), (0.1, 0x0000_0000), (1.0, 0x0000_0000)],
            _ => return None,
        };
        Some(Self::new(entries))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(f32, u32)] {
        &self.entries
    }

    /// Nearest entry at or below `value`, clamped at both ends.
    pub fn get_color(&self, value: f32) -> u32 {
        let (first, last) = match (self.entries.first(), self.entries.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return 0,
        };
        if value <= first.0 {
            return first.1;
        }
        if value >= last.0 {
            return last.1;
        }
        // Index of the first entry strictly above value
        let idx = self.entries.partition_point(|(v, _)| *v <= value);
        self.entries[idx - 1].1
    }

    /// Per-channel linear interpolation, clamped at both ends.
    pub fn get_smooth_color(&self, value: f32) -> u32 {
        let (first, last) = match (self.entries.first(), self.entries.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return 0,
        };
        if value <= first.0 {
            return first.1;
        }
        if value >= last.0 {
            return last.1;
        }
        let idx = self.entries.partition_point(|(v, _)| *v <= value);
        let (lo_v, lo_c) = self.entries[idx - 1];
        let (hi_v, hi_c) = self.entries[idx];
        if lo_v == value {
            return lo_c;
        }
        let p = (value - lo_v) as f64 / (hi_v - lo_v) as f64;
        interpolate_argb(lo_c, hi_c, p)
    }

    pub fn color(&self, value: f32, smooth: bool) -> u32 {
        if smooth {
            self.get_smooth_color(value)
        } else {
            self.get_color(value)
        }
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = 0;
        for (v, c) in &self.entries {
            map_common::hash_combine(&mut seed, map_common::hash_f64(*v as f64));
            map_common::hash_combine(&mut seed, *c as u64);
        }
        seed
    }
}

/// Source of named colour map definitions in the text format.
pub trait ColorMapProvider {
    fn color_map_text(&self, name: &str) -> Option<String>;
}

impl ColorMapProvider for std::collections::BTreeMap<String, String> {
    fn color_map_text(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl ColorMapProvider for std::collections::HashMap<String, String> {
    fn color_map_text(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Resolve a colour map by name, looking at the provider before the built-ins.
pub fn resolve_color_map(
    name: &str,
    provider: &dyn ColorMapProvider,
) -> RenderResult<ColorMap> {
    if let Some(text) = provider.color_map_text(name) {
        return ColorMap::parse(&text).map_err(|e| {
            e.trace("Failed to parse colour map")
                .with_param("colormap", name)
        });
    }
    ColorMap::builtin(name)
        .ok_or_else(|| RenderError::config("Cannot find the colormap").with_param("colormap", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> ColorMap {
        ColorMap::new(vec![(10.0, 0xFF00_0000), (0.0, 0x0000_0000), (20.0, 0xFFFF_FFFF)])
    }

    #[test]
    fn test_get_color_exact_and_below() {
        let cm = ramp();
        assert_eq!(cm.get_color(0.0), 0x0000_0000);
        assert_eq!(cm.get_color(10.0), 0xFF00_0000);
        assert_eq!(cm.get_color(15.0), 0xFF00_0000);
        assert_eq!(cm.get_color(9.99), 0x0000_0000);
    }

    #[test]
    fn test_get_color_clamps() {
        let cm = ramp();
        assert_eq!(cm.get_color(-100.0), 0x0000_0000);
        assert_eq!(cm.get_color(100.0), 0xFFFF_FFFF);
        assert_eq!(cm.get_smooth_color(-100.0), 0x0000_0000);
        assert_eq!(cm.get_smooth_color(100.0), 0xFFFF_FFFF);
    }

    #[test]
    fn test_smooth_midpoint_is_channel_average() {
        let cm = ColorMap::new(vec![(0.0, 0x0010_2030), (1.0, 0xFF30_4050)]);
        let c = cm.get_smooth_color(0.5);
        let channel = |c: u32, s: u32| ((c >> s) & 0xFF) as i32;
        assert!((channel(c, 24) - 127).abs() <= 1);
        assert!((channel(c, 16) - 0x20).abs() <= 1);
        assert!((channel(c, 8) - 0x30).abs() <= 1);
        assert!((channel(c, 0) - 0x40).abs() <= 1);
    }

    #[test]
    fn test_parse_text_format() {
        let cm = ColorMap::parse(
            "# temperature\n\
             -10;FF0000FF\n\
             0;255,255,255,255 # white\n\
             \n\
             10;FFFF0000\n",
        )
        .unwrap();
        assert_eq!(cm.entries().len(), 3);
        assert_eq!(cm.get_color(0.0), 0xFFFF_FFFF);
        assert_eq!(cm.get_color(-20.0), 0xFF00_00FF);
    }

    #[test]
    fn test_parse_errors() {
        assert!(ColorMap::parse("1;2;3;4").is_err());
        assert!(ColorMap::parse("x;FF000000").is_err());
        assert!(ColorMap::parse("1;1,2,3").is_err());
    }

    #[test]
    fn test_builtins() {
        for name in ["percent", "sea", "land", "sea2"] {
            assert!(ColorMap::builtin(name).is_some(), "{}", name);
        }
        assert_eq!(ColorMap::builtin("land").unwrap().get_color(0.5), 0xFFA8_BBA3);
        assert!(ColorMap::builtin("rainbow").is_none());
    }

    #[test]
    fn test_resolve_prefers_provider() {
        let mut registry = std::collections::BTreeMap::new();
        registry.insert("sea".to_string(), "0;11223344".to_string());
        let cm = resolve_color_map("sea", &registry).unwrap();
        assert_eq!(cm.get_color(0.0), 0x1122_3344);
        assert!(resolve_color_map("missing", &registry).is_err());
    }
}
