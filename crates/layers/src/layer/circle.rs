//! Geodesic circles of fixed radius around places, with optional radius
//! labels.

use super::{add_path, take_precision, xml_escape, Layer, LayerBase};
use crate::engine::Location;
use crate::node::{deserialize_attributes, hash_attributes, Attributes, Globals, Node};
use crate::state::State;
use geo::{Coord, Destination, Geodesic, Geometry, LineString, Point, Polygon};
use map_common::{
    hash_combine, hash_f64, hash_value, BoundingBox, ConfigObject, CrsCode, PixelBox, RenderError, RenderResult,
    ResultExt,
};
use projection::CoordinateTransformation;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Points on a circle ring, one per degree of bearing.
const RING_POINTS: usize = 360;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Circle {
    /// Radius in km
    pub radius: f64,
    #[serde(default, deserialize_with = "deserialize_attributes")]
    pub attributes: Attributes,
}

impl Circle {
    fn parse_list(value: Value) -> RenderResult<Vec<Circle>> {
        let circles: Vec<Circle> = match value {
            Value::Object(_) => vec![serde_json::from_value(value)?],
            Value::Array(_) => serde_json::from_value(value)?,
            _ => return Err(RenderError::config("circles setting must be an array or an object")),
        };
        for circle in &circles {
            if !(circle.radius > 0.0 && circle.radius < 6378.0) {
                return Err(RenderError::config("Circle radius must be positive and less than 6378 km")
                    .with_param("radius", circle.radius));
            }
        }
        Ok(circles)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = hash_f64(self.radius);
        hash_combine(&mut seed, hash_attributes(&self.attributes));
        seed
    }
}

const LABEL_LAYOUTS: [&str; 8] = ["north", "east", "south", "west", "top", "right", "bottom", "left"];

/// Radius labels placed on each circle.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CircleLabels {
    pub layout: BTreeSet<String>,
    pub prefix: String,
    pub suffix: String,
    pub dx: i32,
    pub dy: i32,
    #[serde(deserialize_with = "deserialize_attributes")]
    pub attributes: Attributes,
    #[serde(deserialize_with = "deserialize_attributes")]
    pub textattributes: Attributes,
}

impl CircleLabels {
    fn parse(value: Value) -> RenderResult<Self> {
        if !value.is_object() {
            return Err(RenderError::config("Circle labels must be a JSON object"));
        }
        let labels: CircleLabels =
            serde_json::from_value(value).map_err(|e| RenderError::from(e).trace("Invalid circle labels"))?;
        if let Some(bad) = labels.layout.iter().find(|l| !LABEL_LAYOUTS.contains(&l.as_str())) {
            return Err(RenderError::config("Invalid circle label layout").with_param("layout", bad));
        }
        Ok(labels)
    }

    fn format(&self, radius: f64) -> String {
        format!("{}{}{}", self.prefix, radius, self.suffix)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.layout);
        hash_combine(&mut seed, hash_value(&self.prefix));
        hash_combine(&mut seed, hash_value(&self.suffix));
        hash_combine(&mut seed, hash_value(&self.dx));
        hash_combine(&mut seed, hash_value(&self.dy));
        hash_combine(&mut seed, hash_attributes(&self.attributes));
        hash_combine(&mut seed, hash_attributes(&self.textattributes));
        seed
    }
}

/// The WGS84 ring of a geodesic circle, counterclockwise.
fn circle_ring(lon: f64, lat: f64, radius_km: f64) -> LineString<f64> {
    let center = Point::new(lon, lat);
    let mut coords: Vec<Coord<f64>> = (0..RING_POINTS)
        .rev()
        .map(|i| {
            let bearing = i as f64 * 360.0 / RING_POINTS as f64;
            Geodesic.destination(center, bearing, radius_km * 1000.0).0
        })
        .collect();
    if let Some(&first) = coords.first() {
        coords.push(first);
    }
    LineString::new(coords)
}

/// World position of a label on a projected circle ring.
fn label_position(
    layout: &str,
    center: &Location,
    radius_km: f64,
    ring: &LineString<f64>,
    transformation: &CoordinateTransformation,
) -> Option<(f64, f64)> {
    let bearing = match layout {
        "north" => Some(0.0),
        "east" => Some(90.0),
        "south" => Some(180.0),
        "west" => Some(270.0),
        _ => None,
    };
    if let Some(bearing) = bearing {
        let p = Geodesic.destination(Point::new(center.longitude, center.latitude), bearing, radius_km * 1000.0);
        return transformation.transform(p.x(), p.y());
    }
    let extreme = |better: fn(&Coord<f64>, &Coord<f64>) -> bool| {
        ring.0
            .iter()
            .fold(None::<Coord<f64>>, |best, c| match best {
                Some(b) if !better(c, &b) => Some(b),
                _ => Some(*c),
            })
            .map(|c| (c.x, c.y))
    };
    match layout {
        "top" => extreme(|a, b| a.y > b.y),
        "bottom" => extreme(|a, b| a.y < b.y),
        "left" => extreme(|a, b| a.x < b.x),
        "right" => extreme(|a, b| a.x > b.x),
        _ => None,
    }
}

#[derive(Debug)]
pub struct CircleLayer {
    base: LayerBase,
    keyword: Option<String>,
    places: Vec<String>,
    geoids: Vec<i64>,
    lines: bool,
    circles: Vec<Circle>,
    labels: Option<CircleLabels>,
    precision: Option<usize>,
}

impl CircleLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            keyword: None,
            places: Vec::new(),
            geoids: Vec::new(),
            lines: false,
            circles: Vec::new(),
            labels: None,
            precision: None,
        }
    }

    fn locations(&self, state: &State) -> RenderResult<Vec<Location>> {
        let gazetteer = state.gazetteer();
        let mut locations = match &self.keyword {
            Some(keyword) => gazetteer.keyword_search(keyword),
            None => Vec::new(),
        };
        for &geoid in &self.geoids {
            let location = gazetteer
                .id_search(geoid)
                .ok_or_else(|| RenderError::data("Unknown geoid").with_param("geoid", geoid))?;
            locations.push(location);
        }
        for place in &self.places {
            let location = gazetteer
                .name_search(place)
                .ok_or_else(|| RenderError::data("Unknown place").with_param("place", place))?;
            locations.push(location);
        }
        Ok(locations)
    }

    #[allow(clippy::too_many_arguments)]
    fn label_nodes(
        &self,
        labels: &CircleLabels,
        globals: &mut Globals,
        state: &mut State,
        rings: &[(Location, &Circle, LineString<f64>)],
        transformation: &CoordinateTransformation,
        clip_box: &BoundingBox,
        pbox: &PixelBox,
    ) -> RenderResult<Node> {
        let id = state.make_qid("circle-labels-");
        if !state.add_id(&id) {
            return Err(RenderError::uniqueness("Non-unique ID assigned to circle radius labels").with_param("iri", &id));
        }
        state.add_attributes(globals, &labels.attributes)?;
        let mut group = Node::group(labels.attributes.clone()).with_attribute("id", &id);

        for (location, circle, ring) in rings {
            let text = xml_escape(&labels.format(circle.radius));
            for layout in &labels.layout {
                let Some((x, y)) = label_position(layout, location, circle.radius, ring, transformation) else {
                    continue;
                };
                if !clip_box.contains_point(x, y) {
                    continue;
                }
                let (px, py) = pbox.transform(x, y);
                state.add_attributes(globals, &labels.textattributes)?;
                let mut node = Node::tag("<text", "</text>");
                node.attributes = labels.textattributes.clone();
                node.attributes
                    .insert("x".to_string(), ((px + labels.dx as f64).round() as i64).to_string());
                node.attributes
                    .insert("y".to_string(), ((py + labels.dy as f64).round() as i64).to_string());
                node.cdata = Some(text.clone());
                group.tags.push(node);
            }
        }
        Ok(group)
    }

    fn generate_circles(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let locations = self.locations(state)?;
        let crs: CrsCode = self.base.crs()?;
        let pbox = self.base.pixel_box()?;
        let clip_box = self.base.clip_box(&pbox);
        let transformation = CoordinateTransformation::from_wgs84(crs);

        self.base.add_clip_rect(nodes, state, &pbox);

        let mut rings = Vec::with_capacity(locations.len() * self.circles.len());
        for location in &locations {
            for circle in &self.circles {
                let ring = circle_ring(location.longitude, location.latitude, circle.radius);
                let ring = renderer::geometry::map_points(&Geometry::LineString(ring), &|c: Coord<f64>| {
                    transformation.transform(c.x, c.y).map(|(x, y)| Coord { x, y })
                });
                let Geometry::LineString(ring) = ring else {
                    continue;
                };
                rings.push((location.clone(), circle, ring));
            }
        }

        if let Some(labels) = &self.labels {
            let group = self.label_nodes(labels, globals, state, &rings, &transformation, &clip_box, &pbox)?;
            nodes.push(group);
        }

        let mut group = self.base.group(globals, state)?;
        let precision = self.precision.unwrap_or_else(|| state.precision());
        let object_key = format!("circle:{}", self.base.qid);
        let area = renderer::geometry::box_polygon(&clip_box);

        for (location, circle, ring) in &rings {
            if ring.0.len() < 4 {
                continue;
            }
            let geom = if self.lines {
                Geometry::LineString(ring.clone())
            } else {
                Geometry::Polygon(Polygon::new(ring.clone(), Vec::new()))
            };
            let geom = renderer::geometry::clip(&geom, &area);
            if renderer::geometry::is_empty(&geom) {
                continue;
            }

            let circle_qid = state.make_qid("circle");
            let iri = if self.base.qid.is_empty() {
                circle_qid
            } else {
                format!("{}.{}", self.base.qid, circle_qid)
            };
            if !state.add_id(&iri) {
                return Err(RenderError::uniqueness("Non-unique ID assigned to circle").with_param("iri", &iri));
            }

            let mut attributes = self.base.attributes.clone();
            attributes.extend(circle.attributes.clone());
            let path = Node {
                iri: Some(iri.clone()),
                layertype: Some("circle".to_string()),
                longitude: Some(location.longitude),
                latitude: Some(location.latitude),
                radius: Some(circle.radius),
                attributes,
                ..Default::default()
            };
            add_path(globals, state, &object_key, path, &geom, crs, &pbox, precision)?;

            state.add_attributes(globals, &circle.attributes)?;
            group.tags.push(Node::use_tag(&iri, circle.attributes.clone()));
        }

        tracing::debug!(qid = %self.base.qid, circles = group.tags.len(), "generated circles");
        nodes.push(group);
        Ok(())
    }
}

impl Layer for CircleLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, _state: &mut State) -> RenderResult<()> {
        self.keyword = cfg.take_string("keyword")?;
        self.places = cfg.take_string_set("places")?.unwrap_or_default().into_iter().collect();
        self.geoids = cfg.take_parsed::<Vec<i64>>("geoids")?.unwrap_or_default();
        self.lines = cfg.take_bool("lines")?.unwrap_or(false);
        self.precision = take_precision(cfg)?;

        match cfg.take_value("circles") {
            None | Some(Value::Null) => {
                return Err(RenderError::config("Circle layer must define at least one circle"));
            }
            Some(value) => self.circles = Circle::parse_list(value).trace("Invalid circles setting")?,
        }
        if self.circles.is_empty() {
            return Err(RenderError::config("Circle layer must define at least one circle"));
        }
        if let Some(value) = cfg.take_value("labels").filter(|v| !v.is_null()) {
            self.labels = Some(CircleLabels::parse(value)?);
        }
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_circles(globals, nodes, state)
            .trace("Circle layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.keyword));
        hash_combine(&mut seed, hash_value(&self.places));
        hash_combine(&mut seed, hash_value(&self.geoids));
        hash_combine(&mut seed, self.lines as u64);
        for circle in &self.circles {
            hash_combine(&mut seed, circle.hash_value());
        }
        hash_combine(&mut seed, self.labels.as_ref().map_or(0, CircleLabels::hash_value));
        hash_combine(&mut seed, hash_value(&self.precision));
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engines, MemoryEngine};
    use crate::layer::create_layer;
    use crate::properties::Properties;
    use geo::{Area, Contains};
    use renderer::geometry::OutputFormat;
    use serde_json::json;
    use std::sync::Arc;

    fn state() -> State {
        let doc = json!({
            "keywords": {
                "capitals": [
                    {"name": "Helsinki", "longitude": 24.94, "latitude": 60.17, "geoid": 658225},
                    {"name": "Tallinn", "longitude": 24.75, "latitude": 59.44, "geoid": 588409}
                ]
            }
        });
        State::new(Engines::from_memory(Arc::new(MemoryEngine::from_json(doc).unwrap())))
    }

    fn layer(state: &mut State, extra: Value) -> RenderResult<Box<dyn Layer>> {
        let mut cfg = json!({
            "layer_type": "circle",
            "qid": "rings",
            "places": ["Helsinki"],
            "circles": [{"radius": 50, "attributes": {"stroke": "red"}}, {"radius": 100}],
            "projection": {"crs": "EPSG:4326", "xsize": 400, "ysize": 400, "x1": 20, "y1": 56, "x2": 30, "y2": 64}
        });
        if let (Some(obj), Value::Object(extra)) = (cfg.as_object_mut(), extra) {
            obj.extend(extra);
        }
        create_layer(cfg, state, &Properties::default())
    }

    #[test]
    fn test_ring_has_the_requested_radius() {
        let ring = circle_ring(25.0, 60.0, 100.0);
        assert_eq!(ring.0.len(), RING_POINTS + 1);
        assert_eq!(ring.0.first(), ring.0.last());
        for c in &ring.0 {
            let km = projection::geographic::distance_km(25.0, 60.0, c.x, c.y);
            assert!((km - 100.0).abs() < 1.0, "{}", km);
        }
        let polygon = Polygon::new(ring, Vec::new());
        assert!(polygon.signed_area() > 0.0);
        assert!(polygon.contains(&Point::new(25.0, 60.0)));
    }

    #[test]
    fn test_generates_circle_paths() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({})).unwrap();
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, &mut state).unwrap();

        assert_eq!(nodes.len(), 1);
        let group = &nodes[0];
        assert_eq!(group.tags.len(), 2);
        assert_eq!(group.tags[0].attributes["xlink:href"], "#rings.circle1");
        assert_eq!(group.tags[0].attributes["stroke"], "red");

        let path = &globals.paths["rings.circle1"];
        assert_eq!(path.layertype.as_deref(), Some("circle"));
        assert_eq!(path.node_type.as_deref(), Some("POLYGON"));
        assert_eq!(path.radius, Some(50.0));
        assert_eq!(path.longitude, Some(24.94));
        assert_eq!(globals.paths["rings.circle2"].radius, Some(100.0));
    }

    #[test]
    fn test_lines_and_keyword() {
        let mut state = state();
        let mut layer = layer(
            &mut state,
            json!({"places": [], "keyword": "capitals", "lines": true, "circles": {"radius": 30}}),
        )
        .unwrap();
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, &mut state).unwrap();
        assert_eq!(nodes[0].tags.len(), 2);
        assert_eq!(globals.paths["rings.circle1"].node_type.as_deref(), Some("LINESTRING"));
    }

    #[test]
    fn test_geoid_lookup() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({"places": [], "geoids": [588409]})).unwrap();
        let mut globals = Globals::default();
        layer.generate(&mut globals, &mut Vec::new(), &mut state).unwrap();
        assert_eq!(globals.paths["rings.circle1"].latitude, Some(59.44));

        let mut layer = self::layer(&mut state, json!({"qid": "x", "places": [], "geoids": [1]})).unwrap();
        let err = layer.generate(&mut Globals::default(), &mut Vec::new(), &mut state).unwrap_err();
        assert_eq!(err.param("geoid"), Some("1"));
    }

    #[test]
    fn test_labels() {
        let mut state = state();
        let mut layer = layer(
            &mut state,
            json!({
                "circles": {"radius": 100},
                "labels": {"layout": ["north", "east", "bottom"], "suffix": " km", "dy": 5, "textattributes": {"class": "r"}}
            }),
        )
        .unwrap();
        let mut globals = Globals::default();
        let mut nodes = Vec::new();
        layer.generate(&mut globals, &mut nodes, &mut state).unwrap();

        assert_eq!(nodes.len(), 2);
        let labels = &nodes[0];
        assert_eq!(labels.attributes["id"], "circle-labels-1");
        assert_eq!(labels.tags.len(), 3);
        assert!(labels.tags.iter().all(|t| t.cdata.as_deref() == Some("100 km")));
        assert_eq!(labels.tags[0].attributes["class"], "r");

        // Layouts are visited in name order: bottom, east, north
        let y = |i: usize| labels.tags[i].attributes["y"].parse::<i64>().unwrap();
        let x = |i: usize| labels.tags[i].attributes["x"].parse::<i64>().unwrap();
        assert!(y(0) > y(2));
        assert!(x(1) > x(2));
    }

    #[test]
    fn test_labels_outside_are_dropped() {
        let mut state = state();
        let mut layer = layer(
            &mut state,
            json!({"circles": {"radius": 2000}, "labels": {"layout": ["north", "south"]}}),
        )
        .unwrap();
        let mut nodes = Vec::new();
        layer.generate(&mut Globals::default(), &mut nodes, &mut state).unwrap();
        assert!(nodes[0].tags.is_empty());
    }

    #[test]
    fn test_topojson_object() {
        let mut state = state();
        state.set_format(OutputFormat::TopoJson);
        let mut layer = layer(&mut state, json!({})).unwrap();
        let mut globals = Globals::default();
        layer.generate(&mut globals, &mut Vec::new(), &mut state).unwrap();
        assert_eq!(globals.objects["circle:rings"].paths.len(), 2);
    }

    #[test]
    fn test_invalid_settings() {
        let mut state = state();
        assert!(layer(&mut state, json!({"circles": []})).is_err());
        assert!(layer(&mut state, json!({"circles": null})).is_err());
        assert!(layer(&mut state, json!({"circles": {"radius": 0}})).is_err());
        assert!(layer(&mut state, json!({"circles": {"radius": 7000}})).is_err());
        assert!(layer(&mut state, json!({"circles": "50"})).is_err());
        assert!(layer(&mut state, json!({"labels": {"layout": ["up"]}})).is_err());
        assert!(layer(&mut state, json!({"labels": ["north"]})).is_err());
    }
}
