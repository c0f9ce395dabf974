//! The layer kinds of a product and what they have in common.
//!
//! Every layer is created by [`create_layer`] from its JSON configuration.
//! The common settings go into a [`LayerBase`], the rest is consumed by the
//! concrete layer's [`Layer::init`]. Whatever is left over is an error.

mod background;
mod circle;
mod cloud_ceiling;
mod contours;
mod frame;
mod graticule;
mod grid;
mod group;
mod isoband;
mod isolabel;
mod isoline;
mod map;
mod number;
mod observation;
mod raster;
mod stream;
mod symbol;
mod tag;
mod translation;
mod windrose;
mod wkt;

pub use background::BackgroundLayer;
pub use circle::CircleLayer;
pub use cloud_ceiling::CloudCeilingLayer;
pub use frame::FrameLayer;
pub use graticule::GraticuleLayer;
pub use grid::GridLayer;
pub use group::{GroupLayer, NullLayer};
pub use isoband::{Isoband, IsobandLayer};
pub use isolabel::IsolabelLayer;
pub use isoline::{Isoline, IsolineLayer};
pub use map::MapLayer;
pub use number::NumberLayer;
pub use observation::{ObservationLayer, SymbolKind};
pub use raster::RasterLayer;
pub use stream::StreamLayer;
pub use symbol::SymbolLayer;
pub use tag::TagLayer;
pub use translation::TranslationLayer;
pub use windrose::WindRoseLayer;
pub use wkt::WktLayer;

use crate::engine::GridData;
use crate::layers::Layers;
use crate::node::{hash_attributes, parse_attributes, Attributes, Globals, Node};
use crate::projection::Projection;
use crate::properties::Properties;
use crate::state::State;
use geo::{BooleanOps, Geometry, MultiPolygon};
use map_common::{
    hash_combine, hash_f64, hash_value, BoundingBox, ConfigObject, CrsCode, PixelBox, RenderError, RenderResult,
    ResultExt,
};
use renderer::geometry::OutputFormat;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// A renderable layer.
///
/// The lifecycle is `init` once, then `probe_projection` and
/// `set_projection` when the view needs the data projection, then
/// `generate`.
pub trait Layer: fmt::Debug {
    fn base(&self) -> &LayerBase;

    fn base_mut(&mut self) -> &mut LayerBase;

    /// Consume the layer specific settings. The common settings have
    /// already been removed from `cfg`.
    fn init(&mut self, cfg: &mut ConfigObject, state: &mut State) -> RenderResult<()>;

    /// The projection this layer would use for `crs: "data"`, if it knows.
    fn probe_projection(&self, state: &State) -> RenderResult<Option<Projection>> {
        self.base().layers.probe_projection(state)
    }

    fn set_projection(&mut self, projection: &Projection) {
        self.base_mut().set_projection(projection);
    }

    /// Append the output of the layer to `nodes`.
    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()>;

    fn hash_value(&self) -> u64;
}

/// Settings shared by every layer kind.
#[derive(Debug, Default)]
pub struct LayerBase {
    pub qid: String,
    pub layer_type: String,
    pub properties: Properties,
    pub attributes: Attributes,
    pub css: Option<String>,
    pub minresolution: Option<f64>,
    pub maxresolution: Option<f64>,
    pub enable: BTreeSet<String>,
    pub disable: BTreeSet<String>,
    pub visible: bool,
    pub layers: Layers,
}

impl LayerBase {
    pub fn init(
        cfg: &mut ConfigObject,
        state: &mut State,
        parent: &Properties,
        layer_type: &str,
    ) -> RenderResult<Self> {
        let properties = Properties::init(cfg, parent, state.gazetteer())?;
        let qid = match cfg.take_string("qid")? {
            Some(qid) => qid,
            None => state.make_qid(layer_type),
        };
        let attributes = parse_attributes(cfg.take_value("attributes").unwrap_or(Value::Null))
            .trace("Invalid layer attributes")?;

        let mut base = Self {
            qid,
            layer_type: layer_type.to_string(),
            attributes,
            css: cfg.take_string("css")?,
            minresolution: cfg.take_f64("minresolution")?,
            maxresolution: cfg.take_f64("maxresolution")?,
            enable: cfg.take_string_set("enable")?.unwrap_or_default(),
            disable: cfg.take_string_set("disable")?.unwrap_or_default(),
            visible: cfg.take_bool("visible")?.unwrap_or(true),
            ..Default::default()
        };
        if !base.enable.is_empty() && !base.disable.is_empty() {
            return Err(RenderError::config(
                "Setting disable and enable image formats simultaneously is an error",
            ));
        }
        if let Some(layers) = cfg.take_value("layers") {
            base.layers = Layers::init(layers, state, &properties)?;
        }
        base.properties = properties;
        Ok(base)
    }

    /// Apply a resolved data projection. An explicitly configured CRS is
    /// kept, nested layers decide for themselves.
    pub fn set_projection(&mut self, projection: &Projection) {
        let own = &self.properties.projection;
        if own.crs.is_none() || own.is_data() {
            self.properties.projection = projection.clone();
        }
        self.layers.set_projection(projection);
    }

    /// Whether the layer produces output for this request at all.
    pub fn valid_layer(&self, state: &State) -> RenderResult<bool> {
        if !self.visible {
            return Ok(false);
        }
        if !self.valid_resolution()? {
            return Ok(false);
        }
        Ok(self.valid_format(state.format()))
    }

    fn valid_resolution(&self) -> RenderResult<bool> {
        if self.minresolution.is_none() && self.maxresolution.is_none() {
            return Ok(true);
        }
        let resolution = self
            .properties
            .projection
            .resolution()
            .trace("Projection resolution is needed for minresolution and maxresolution")?;
        if self.minresolution.is_some_and(|min| min <= resolution) {
            return Ok(false);
        }
        if self.maxresolution.is_some_and(|max| max > resolution) {
            return Ok(false);
        }
        Ok(true)
    }

    fn valid_format(&self, format: OutputFormat) -> bool {
        if !self.disable.is_empty() {
            return !self.disable.contains(format.as_str());
        }
        if !self.enable.is_empty() {
            return self.enable.contains(format.as_str());
        }
        true
    }

    pub fn pixel_box(&self) -> RenderResult<PixelBox> {
        self.properties.projection.pixel_box()
    }

    pub fn crs(&self) -> RenderResult<CrsCode> {
        self.properties.projection.crs_code()
    }

    /// The world box of the image grown by the margins.
    pub fn clip_box(&self, pbox: &PixelBox) -> BoundingBox {
        let dx = pbox.world.width() * self.properties.xmargin as f64 / pbox.width as f64;
        let dy = pbox.world.height() * self.properties.ymargin as f64 / pbox.height as f64;
        pbox.world.expand(dx, dy)
    }

    /// Clip the layer group to the image with a generated clip path.
    pub fn add_clip_rect(&mut self, nodes: &mut Vec<Node>, state: &mut State, pbox: &PixelBox) {
        if !self.properties.clip || self.attributes.contains_key("clip-path") {
            return;
        }
        let id = state.generate_unique_id();
        self.attributes
            .insert("clip-path".to_string(), format!("url(#{})", id));
        let mut clip = Node::tag("<clipPath", "</clipPath>").with_attribute("id", &id);
        clip.cdata = Some(format!(
            r#"<rect x="0" y="0" width="{}" height="{}"/>"#,
            pbox.width, pbox.height
        ));
        nodes.push(clip);
    }

    /// Copy the referenced CSS into the globals.
    pub fn add_css(&self, globals: &mut Globals, state: &State) -> RenderResult<()> {
        if let Some(css) = &self.css {
            let text = state
                .style(css)
                .ok_or_else(|| RenderError::config("Unknown CSS style").with_param("css", css))?;
            globals.css.insert(css.clone(), text.to_string());
        }
        Ok(())
    }

    /// A `<g>` carrying the layer attributes.
    pub fn group(&self, globals: &mut Globals, state: &mut State) -> RenderResult<Node> {
        state.add_attributes(globals, &self.attributes)?;
        Ok(Node::group(self.attributes.clone()))
    }

    /// The data projection a grid of `parameter` implies.
    pub fn probe_data_projection(
        &self,
        state: &State,
        parameter: Option<&str>,
    ) -> RenderResult<Option<Projection>> {
        let projection = &self.properties.projection;
        let Some(parameter) = parameter else {
            return self.layers.probe_projection(state);
        };
        if !projection.is_data() {
            return Ok(None);
        }
        let grid = crate::field::fetch_grid(state, &self.properties, parameter, None, None)?;
        let mut resolved = projection.clone();
        resolved.update(&grid);
        Ok(Some(resolved))
    }

    /// Resolve `crs: "data"` from a fetched grid.
    pub fn update_projection(&mut self, grid: &GridData) {
        self.properties.projection.update(grid);
    }

    /// Record the data time for the cache headers. With a `timestep` the
    /// output expires when the next step becomes valid.
    pub fn note_data_time(&self, state: &mut State) {
        if let Ok(t) = self.properties.valid_time() {
            state.update_modification_time(t);
            if let Some(step) = self.properties.timestep.filter(|&s| s > 0) {
                state.update_expiration_time(t + chrono::Duration::minutes(step));
            }
        }
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.qid);
        hash_combine(&mut seed, hash_value(&self.layer_type));
        hash_combine(&mut seed, self.properties.hash_value());
        hash_combine(&mut seed, hash_attributes(&self.attributes));
        hash_combine(&mut seed, hash_value(&self.css));
        hash_combine(&mut seed, self.minresolution.map_or(0, hash_f64));
        hash_combine(&mut seed, self.maxresolution.map_or(0, hash_f64));
        hash_combine(&mut seed, hash_value(&self.enable));
        hash_combine(&mut seed, hash_value(&self.disable));
        hash_combine(&mut seed, self.visible as u64);
        hash_combine(&mut seed, self.layers.hash_value());
        seed
    }
}

/// Create and initialize a layer from its JSON configuration.
pub fn create_layer(value: Value, state: &mut State, parent: &Properties) -> RenderResult<Box<dyn Layer>> {
    if !value.is_object() {
        return Err(RenderError::config("Layer JSON must be an object"));
    }
    let mut cfg = ConfigObject::from_value(value, "Layer")?;
    let layer_type = cfg.take_string("layer_type")?.unwrap_or_else(|| "tag".to_string());

    let base = LayerBase::init(&mut cfg, state, parent, &layer_type)?;
    let qid = base.qid.clone();

    let mut layer: Box<dyn Layer> = match layer_type.as_str() {
        "tag" => Box::new(TagLayer::new(base)),
        "group" => Box::new(GroupLayer::new(base)),
        "null" => Box::new(NullLayer::new(base)),
        "background" => Box::new(BackgroundLayer::new(base)),
        "map" => Box::new(MapLayer::new(base)),
        "isoband" => Box::new(IsobandLayer::new(base)),
        "isoline" => Box::new(IsolineLayer::new(base)),
        "isolabel" => Box::new(IsolabelLayer::new(base)),
        "symbol" => Box::new(SymbolLayer::new(base)),
        "number" => Box::new(NumberLayer::new(base)),
        "raster" => Box::new(RasterLayer::new(base)),
        "translation" => Box::new(TranslationLayer::new(base)),
        "grid" => Box::new(GridLayer::new(base)),
        "wkt" => Box::new(WktLayer::new(base)),
        "circle" => Box::new(CircleLayer::new(base)),
        "frame" => Box::new(FrameLayer::new(base)),
        "graticule" => Box::new(GraticuleLayer::new(base)),
        "stream" => Box::new(StreamLayer::new(base)),
        "windrose" => Box::new(WindRoseLayer::new(base)),
        "finnish_road_observation" => Box::new(ObservationLayer::new(base, SymbolKind::FinnishRoad)),
        "present_weather_observation" => Box::new(ObservationLayer::new(base, SymbolKind::PresentWeather)),
        "cloud_ceiling" => Box::new(CloudCeilingLayer::new(base)),
        _ => {
            return Err(RenderError::config("Unknown layer type").with_param("layer_type", &layer_type));
        }
    };

    layer
        .init(&mut cfg, state)
        .and_then(|()| cfg.finish(&format!("{} layer", layer_type)))
        .trace("Failed to initialize layer")
        .with_param("qid", &qid)?;
    tracing::debug!(qid = %qid, layer_type = %layer_type, "initialized layer");
    Ok(layer)
}

// ============================================================================
// Helpers shared by the layer kinds
// ============================================================================

/// Escape text for embedding in XML.
pub(crate) fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// The optional non-negative `precision` setting.
pub(crate) fn take_precision(cfg: &mut ConfigObject) -> RenderResult<Option<usize>> {
    match cfg.take_i64("precision")? {
        None => Ok(None),
        Some(precision) => usize::try_from(precision)
            .map(Some)
            .map_err(|_| RenderError::config("precision cannot be negative").with_param("precision", precision)),
    }
}

/// Polygons of a geometry, dropping everything else.
pub(crate) fn polygons(geom: Geometry<f64>) -> MultiPolygon<f64> {
    match geom {
        Geometry::MultiPolygon(mp) => mp,
        Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        Geometry::Rect(r) => MultiPolygon::new(vec![r.to_polygon()]),
        Geometry::GeometryCollection(gc) => {
            MultiPolygon::new(gc.0.into_iter().flat_map(|g| polygons(g).0).collect())
        }
        _ => MultiPolygon::new(Vec::new()),
    }
}

/// Remove `area` from a polygonal geometry. Other geometries are clipped to
/// the complement by dropping the parts inside.
pub(crate) fn difference(geom: &Geometry<f64>, area: &MultiPolygon<f64>) -> Geometry<f64> {
    match geom {
        Geometry::MultiPolygon(_) | Geometry::Polygon(_) | Geometry::Rect(_) => {
            Geometry::MultiPolygon(polygons(geom.clone()).difference(area))
        }
        Geometry::MultiLineString(lines) => {
            Geometry::MultiLineString(area.clip(lines, true))
        }
        Geometry::LineString(line) => {
            Geometry::MultiLineString(area.clip(&geo::MultiLineString::new(vec![line.clone()]), true))
        }
        other => other.clone(),
    }
}

/// Store a serialized feature into the globals.
///
/// SVG and GeoJSON paths go to `globals.paths`, TopoJSON paths to the object
/// named `object_key` with their new arcs appended to `globals.arcs`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn add_path(
    globals: &mut Globals,
    state: &mut State,
    object_key: &str,
    mut path: Node,
    geom: &Geometry<f64>,
    crs: CrsCode,
    pbox: &PixelBox,
    precision: usize,
) -> RenderResult<()> {
    let format = state.format();
    let geom = renderer::geometry::single_part(geom);
    let geom = geom.as_ref();
    let iri = path
        .iri
        .clone()
        .ok_or_else(|| RenderError::internal("Path has no IRI"))?;
    path.node_type = Some(renderer::geometry::geometry_name(geom, format).to_string());

    match format {
        OutputFormat::Svg => {
            path.data = Some(Value::String(renderer::geometry::svg_path(geom, pbox, precision)));
            globals.paths.insert(iri, path);
        }
        OutputFormat::GeoJson => {
            path.data = Some(Value::String(renderer::geometry::geojson_coordinates(
                geom, crs, precision,
            )?));
            globals.paths.insert(iri, path);
        }
        OutputFormat::TopoJson => {
            let known = state.arc_table().len();
            let topo = state.arcs().encode(geom, crs, precision)?;
            for arc in &state.arc_table().arcs()[known..] {
                globals.arcs.push(serde_json::json!({ "data": arc }));
            }
            path.data = Some(topo.coordinates.unwrap_or(topo.arcs));
            globals
                .objects
                .entry(object_key.to_string())
                .or_default()
                .paths
                .insert(iri, path);
        }
    }

    let world = pbox.world;
    globals.bbox = Some(format!(
        "{},{},{},{}",
        world.min_x, world.min_y, world.max_x, world.max_y
    ));
    if precision >= 1 {
        globals.precision = Some(10f64.powi(-(precision as i32)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engines, MemoryEngine};
    use geo::polygon;
    use serde_json::json;
    use std::sync::Arc;

    fn init(value: Value) -> RenderResult<Box<dyn Layer>> {
        let mut state = State::default();
        create_layer(value, &mut state, &Properties::default())
    }

    #[test]
    fn test_layer_type_defaults_to_tag() {
        let layer = init(json!({"tag": "rect"})).unwrap();
        assert_eq!(layer.base().layer_type, "tag");
        assert_eq!(layer.base().qid, "tag1");
    }

    #[test]
    fn test_unknown_layer_type() {
        let err = init(json!({"layer_type": "hologram"})).unwrap_err();
        assert_eq!(err.param("layer_type"), Some("hologram"));
    }

    #[test]
    fn test_layer_must_be_object() {
        assert!(init(json!(["tag"])).is_err());
    }

    #[test]
    fn test_unknown_setting_is_error() {
        let err = init(json!({"layer_type": "group", "qid": "g", "colour": "red"})).unwrap_err();
        assert_eq!(err.param("qid"), Some("g"));
        assert_eq!(err.param("key"), Some("colour"));
    }

    #[test]
    fn test_enable_and_disable_conflict() {
        assert!(init(json!({"enable": ["svg"], "disable": ["geojson"]})).is_err());
    }

    #[test]
    fn test_valid_format() {
        let state = State::default();
        let layer = init(json!({"disable": ["svg"]})).unwrap();
        assert!(!layer.base().valid_layer(&state).unwrap());
        let layer = init(json!({"enable": ["svg", "topojson"]})).unwrap();
        assert!(layer.base().valid_layer(&state).unwrap());
        let layer = init(json!({"visible": false})).unwrap();
        assert!(!layer.base().valid_layer(&state).unwrap());
    }

    #[test]
    fn test_resolution_limits() {
        let state = State::default();
        let projection = json!({"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 10, "y2": 10});
        // About 11 km per pixel
        let layer = init(json!({"projection": projection, "maxresolution": 5})).unwrap();
        assert!(layer.base().valid_layer(&state).unwrap());
        let layer = init(json!({"projection": projection, "maxresolution": 20})).unwrap();
        assert!(!layer.base().valid_layer(&state).unwrap());
        let layer = init(json!({"projection": projection, "minresolution": 5})).unwrap();
        assert!(!layer.base().valid_layer(&state).unwrap());
        let layer = init(json!({"minresolution": 5})).unwrap();
        assert!(layer.base().valid_layer(&state).is_err());
    }

    #[test]
    fn test_clip_rect_is_added_once() {
        let mut state = State::default();
        let mut layer = init(json!({"clip": true})).unwrap();
        let pbox = PixelBox::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 40, 30);
        let mut nodes = Vec::new();
        layer.base_mut().add_clip_rect(&mut nodes, &mut state, &pbox);
        layer.base_mut().add_clip_rect(&mut nodes, &mut state, &pbox);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].attributes["id"], "generated_id_0");
        assert_eq!(layer.base().attributes["clip-path"], "url(#generated_id_0)");
        assert!(nodes[0].cdata.as_deref().unwrap().contains(r#"width="40""#));
    }

    #[test]
    fn test_missing_css_is_error() {
        let state = State::default();
        let layer = init(json!({"css": "nothing"})).unwrap();
        assert!(layer.base().add_css(&mut Globals::default(), &state).is_err());
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = init(json!({"qid": "a", "attributes": {"fill": "red"}})).unwrap();
        let b = init(json!({"qid": "a", "attributes": {"fill": "red"}})).unwrap();
        let c = init(json!({"qid": "a", "attributes": {"fill": "blue"}})).unwrap();
        assert_eq!(a.hash_value(), b.hash_value());
        assert_ne!(a.hash_value(), c.hash_value());
    }

    #[test]
    fn test_add_path_svg_and_topojson() {
        let engine = MemoryEngine::default();
        let mut state = State::new(Engines::from_memory(Arc::new(engine)));
        let pbox = PixelBox::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 100, 100);
        let geom = Geometry::Polygon(polygon![(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 1.0)]);
        let path = Node {
            iri: Some("p1".into()),
            ..Default::default()
        };

        let mut globals = Globals::default();
        add_path(&mut globals, &mut state, "obj", path.clone(), &geom, CrsCode::Epsg4326, &pbox, 1).unwrap();
        assert_eq!(globals.paths["p1"].node_type.as_deref(), Some("POLYGON"));
        assert!(globals.paths["p1"].data.as_ref().unwrap().as_str().unwrap().starts_with('M'));
        assert_eq!(globals.precision, Some(0.1));

        state.set_format(OutputFormat::TopoJson);
        let mut globals = Globals::default();
        add_path(&mut globals, &mut state, "obj", path, &geom, CrsCode::Epsg4326, &pbox, 1).unwrap();
        assert!(globals.paths.is_empty());
        assert_eq!(globals.objects["obj"].paths["p1"].node_type.as_deref(), Some("Polygon"));
        assert_eq!(globals.arcs.len(), 1);
    }

    #[test]
    fn test_set_projection_keeps_explicit_crs() {
        let mut state = State::default();
        let data = init(json!({"projection": {"crs": "data"}})).unwrap().base().properties.clone();
        let mut layer = create_layer(
            json!({
                "qid": "outer",
                "layers": [
                    {"qid": "inherits"},
                    {"qid": "mercator", "projection": {"crs": "EPSG:3857", "bbox": "0,0,100000,100000"}}
                ]
            }),
            &mut state,
            &data,
        )
        .unwrap();

        let resolved = init(json!({"projection": {"crs": "EPSG:4326", "xsize": 30, "ysize": 20}}))
            .unwrap()
            .base()
            .properties
            .projection
            .clone();
        layer.set_projection(&resolved);

        let base = layer.base();
        assert_eq!(base.crs().unwrap(), CrsCode::Epsg4326);
        let children = base.layers.iter().map(|l| l.base().crs().unwrap()).collect::<Vec<_>>();
        assert_eq!(children, vec![CrsCode::Epsg4326, CrsCode::Epsg3857]);
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }
}
