//! Product-level definitions: named styles, symbols and other reusable SVG
//! fragments, plus layers rendered into the `<defs>` section.

use crate::layers::Layers;
use crate::node::{Globals, Node};
use crate::properties::Properties;
use crate::state::{Registry, State};
use map_common::{hash_combine, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use serde_json::Value;
use std::collections::BTreeMap;

/// Keys holding `name -> text` definition tables.
const DEFINITION_KINDS: [&str; 7] = ["styles", "symbols", "patterns", "markers", "gradients", "filters", "colormaps"];

#[derive(Debug, Default)]
pub struct Defs {
    definitions: BTreeMap<&'static str, BTreeMap<String, String>>,
    pub layers: Layers,
}

fn registry<'a>(state: &'a mut State, kind: &str) -> RenderResult<&'a mut Registry> {
    let registries = &mut state.registries;
    Ok(match kind {
        "styles" => &mut registries.styles,
        "symbols" => &mut registries.symbols,
        "patterns" => &mut registries.patterns,
        "markers" => &mut registries.markers,
        "gradients" => &mut registries.gradients,
        "filters" => &mut registries.filters,
        "colormaps" => &mut registries.colormaps,
        other => return Err(RenderError::internal("Unknown definition kind").with_param("kind", other)),
    })
}

fn parse_table(value: Value, kind: &str) -> RenderResult<BTreeMap<String, String>> {
    let Value::Object(map) = value else {
        return Err(RenderError::config("Definitions must be a JSON object").with_param("defs", kind));
    };
    map.into_iter()
        .map(|(name, text)| match text {
            Value::String(text) => Ok((name, text)),
            _ => Err(RenderError::config("Definition must be a string")
                .with_param("defs", kind)
                .with_param("name", &name)),
        })
        .collect()
}

impl Defs {
    pub fn init(value: Value, state: &mut State, parent: &Properties) -> RenderResult<Self> {
        let mut cfg = ConfigObject::from_value(value, "Defs")?;
        let mut definitions = BTreeMap::new();

        for kind in DEFINITION_KINDS {
            let Some(value) = cfg.take_value(kind) else {
                continue;
            };
            let table = parse_table(value, kind)?;
            let registry = registry(state, kind)?;
            for (name, text) in &table {
                registry.register(name, text.as_str())?;
            }
            definitions.insert(kind, table);
        }

        let layers = match cfg.take_value("layers") {
            Some(value) => Layers::init(value, state, parent).trace("Invalid defs layers")?,
            None => Layers::default(),
        };
        cfg.finish("Defs")?;
        Ok(Self { definitions, layers })
    }

    /// Generate the defs layers into `globals.defs`.
    pub fn generate(&mut self, globals: &mut Globals, state: &mut State) -> RenderResult<()> {
        if self.layers.is_empty() {
            return Ok(());
        }
        let mut nodes: Vec<Node> = Vec::new();
        state.set_in_defs(true);
        let result = self.layers.generate(globals, &mut nodes, state);
        state.set_in_defs(false);
        result.trace("Defs generation failed")?;
        globals.defs.extend(nodes);
        Ok(())
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = 0;
        for (kind, table) in &self.definitions {
            hash_combine(&mut seed, hash_value(kind));
            for (name, text) in table {
                hash_combine(&mut seed, hash_value(name));
                hash_combine(&mut seed, hash_value(text));
            }
        }
        hash_combine(&mut seed, self.layers.hash_value());
        seed
    }
}
