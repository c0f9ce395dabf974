//! The root of a product configuration.

use crate::defs::Defs;
use crate::node::{hash_attributes, parse_attributes, Attributes, Globals, RenderOutput};
use crate::properties::Properties;
use crate::state::State;
use crate::view::Views;
use map_common::{hash_combine, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use renderer::geometry::OutputFormat;
use serde_json::Value;

#[derive(Debug)]
pub struct Product {
    pub format: OutputFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub title: Option<String>,
    pub svg_tmpl: Option<String>,
    pub png: Option<Value>,
    pub precision: Option<usize>,
    pub attributes: Attributes,
    pub properties: Properties,
    pub defs: Defs,
    pub views: Views,
}

fn take_size(cfg: &mut ConfigObject, key: &str) -> RenderResult<Option<u32>> {
    cfg.take_i64(key)?
        .map(|v| {
            u32::try_from(v)
                .ok()
                .filter(|&v| v > 0)
                .ok_or_else(|| RenderError::config("Product size must be positive").with_param(key, v))
        })
        .transpose()
}

impl Product {
    /// Parse a product. Definitions registered while parsing are committed
    /// only if the whole product is valid.
    pub fn init(value: Value, state: &mut State) -> RenderResult<Self> {
        let result = Self::parse(value, state);
        match &result {
            Ok(_) => state.commit(),
            Err(_) => state.rollback(),
        }
        result.trace("Invalid product")
    }

    fn parse(value: Value, state: &mut State) -> RenderResult<Self> {
        let mut cfg = ConfigObject::from_value(value, "Product")?;

        let format = match cfg.take_string("type")? {
            Some(name) => OutputFormat::parse(&name)?,
            None => OutputFormat::Svg,
        };
        state.set_format(format);

        let width = take_size(&mut cfg, "width")?;
        let height = take_size(&mut cfg, "height")?;
        let title = cfg.take_string("title")?;
        let svg_tmpl = cfg.take_string("svg_tmpl")?;
        let png = cfg.take_value("png");
        let precision = match cfg.take_i64("precision")? {
            Some(p) => Some(
                usize::try_from(p)
                    .map_err(|_| RenderError::config("precision cannot be negative").with_param("precision", p))?,
            ),
            None => None,
        };
        if let Some(precision) = precision {
            state.set_precision(precision);
        }
        let attributes = parse_attributes(cfg.take_value("attributes").unwrap_or(Value::Null))?;

        let root = Properties {
            time: state.time(),
            ..Properties::default()
        };
        let properties = Properties::init(&mut cfg, &root, state.gazetteer())?;

        let defs = match cfg.take_value("defs") {
            Some(value) => Defs::init(value, state, &properties)?,
            None => Defs::default(),
        };
        let views = Views::init(
            cfg.take_value("views")
                .ok_or_else(|| RenderError::config("Product has no views"))?,
            state,
            &properties,
        )?;
        cfg.finish("Product")?;

        Ok(Self {
            format,
            width,
            height,
            title,
            svg_tmpl,
            png,
            precision,
            attributes,
            properties,
            defs,
            views,
        })
    }

    pub fn generate(&mut self, state: &mut State) -> RenderResult<RenderOutput> {
        let span = tracing::info_span!("product", format = self.format.as_str());
        let _enter = span.enter();

        let mut globals = Globals {
            product_type: self.format.as_str().to_string(),
            title: self.title.clone(),
            svg_tmpl: self.svg_tmpl.clone(),
            png: self.png.clone(),
            precision: Some(state.precision() as f64),
            attributes: self.attributes.clone(),
            ..Globals::default()
        };

        let result = self.generate_content(&mut globals, state);
        match &result {
            Ok(_) => state.commit(),
            Err(_) => state.rollback(),
        }
        let views = result.trace("Product generation failed")?;

        let size = self.views.image_size();
        globals.width = self.width.or(size.map(|s| s.0));
        globals.height = self.height.or(size.map(|s| s.1));

        tracing::info!(views = views.len(), paths = globals.paths.len(), "generated product");
        Ok(RenderOutput { globals, views })
    }

    fn generate_content(&mut self, globals: &mut Globals, state: &mut State) -> RenderResult<Vec<crate::node::Node>> {
        let attributes = self.attributes.clone();
        state.add_attributes(globals, &attributes)?;
        self.defs.generate(globals, state)?;
        self.views.generate(globals, state)
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(self.format.as_str());
        hash_combine(&mut seed, hash_value(&self.width));
        hash_combine(&mut seed, hash_value(&self.height));
        hash_combine(&mut seed, hash_value(&self.title));
        hash_combine(&mut seed, hash_value(&self.svg_tmpl));
        hash_combine(&mut seed, hash_value(&self.png.as_ref().map(Value::to_string)));
        hash_combine(&mut seed, hash_value(&self.precision));
        hash_combine(&mut seed, hash_attributes(&self.attributes));
        hash_combine(&mut seed, self.properties.hash_value());
        hash_combine(&mut seed, self.defs.hash_value());
        hash_combine(&mut seed, self.views.hash_value());
        seed
    }
}
