//! An element whose text is picked by the requested language.

use super::{xml_escape, Layer, LayerBase};
use crate::node::{Globals, Node};
use crate::state::State;
use map_common::{hash_combine, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct TranslationLayer {
    base: LayerBase,
    tag: String,
    translations: BTreeMap<String, String>,
}

impl TranslationLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            tag: String::new(),
            translations: BTreeMap::new(),
        }
    }

    fn translate(&self) -> RenderResult<&str> {
        let language = self
            .base
            .properties
            .language
            .as_deref()
            .ok_or_else(|| RenderError::config("Language is not set for the translation layer"))?;
        self.translations
            .get(language)
            .map(String::as_str)
            .ok_or_else(|| RenderError::config("No translation for the language").with_param("language", language))
    }

    fn generate_translation(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let text = xml_escape(self.translate()?);
        state.add_attributes(globals, &self.base.attributes)?;
        let mut node = Node::tag(format!("<{}", self.tag), format!("</{}>", self.tag));
        node.attributes = self.base.attributes.clone();
        node.cdata = Some(text);
        nodes.push(node);
        Ok(())
    }
}

impl Layer for TranslationLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        self.tag = cfg
            .take_string("tag")?
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| RenderError::config("Translation layer needs a non-empty tag"))?;

        match cfg.take_value("translations") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (language, text) in map {
                    let Value::String(text) = text else {
                        return Err(RenderError::config("Translation must be a string").with_param("language", language));
                    };
                    self.translations.insert(language, text);
                }
            }
            Some(other) => {
                return Err(RenderError::config("translations must be an object").with_param("json", other));
            }
        }
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_translation(globals, nodes, state)
            .trace("Translation layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.tag));
        hash_combine(&mut seed, hash_value(&self.translations));
        seed
    }
}
