//! End-to-end tests generating whole products against in-memory engines.

use layers::{Engines, MemoryEngine, Product, RenderOutput, State};
use map_common::ErrorKind;
use serde_json::{json, Value};
use std::sync::Arc;
use test_utils::fixtures::{engine, time};
use test_utils::{crate_testdata_dir, create_gradient_grid};

// ============================================================================
// Helper functions
// ============================================================================

fn state_with(doc: Value) -> State {
    State::new(Engines::from_memory(Arc::new(MemoryEngine::from_json(doc).unwrap())))
}

fn testdata_state() -> State {
    let path = crate_testdata_dir("layers").join("engine.json");
    State::new(Engines::from_memory(Arc::new(MemoryEngine::from_file(&path).unwrap())))
}

fn testdata_product() -> Value {
    let path = crate_testdata_dir("layers").join("product.json");
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn render(state: &mut State, config: Value) -> RenderOutput {
    let mut product = Product::init(config, state).unwrap();
    product.generate(state).unwrap()
}

/// A 3x3 grid with a single peak of 5 surrounded by -1.
fn peak_state() -> State {
    let values = [-1.0, -1.0, -1.0, -1.0, 5.0, -1.0, -1.0, -1.0, -1.0];
    state_with(engine::with_grids(vec![engine::grid(
        "pal",
        "Temperature",
        time::REFERENCE_TIME,
        "EPSG:4326",
        (0.0, 0.0, 2.0, 2.0),
        3,
        3,
        &values,
    )]))
}

fn peak_product(format: &str) -> Value {
    json!({
        "type": format,
        "time": time::REFERENCE_TIME,
        "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 2, "y2": 2},
        "views": [{
            "layers": [{
                "layer_type": "isoband",
                "qid": "peak",
                "parameter": "Temperature",
                "isobands": [{"qid": "inside", "lolimit": 0, "hilimit": 10}]
            }]
        }]
    })
}

// ============================================================================
// Isobands
// ============================================================================

#[test]
fn test_isoband_around_peak_is_single_ring() {
    let mut state = peak_state();
    let output = render(&mut state, peak_product("svg"));

    assert_eq!(output.globals.paths.len(), 1);
    let path = &output.globals.paths["peak.inside"];
    let data = path.data.as_ref().and_then(Value::as_str).unwrap();
    assert!(data.starts_with('M'));
    assert!(data.ends_with('Z'));
    assert_eq!(data.matches('M').count(), 1);
    assert_eq!(path.layertype.as_deref(), Some("isoband"));

    let group = &output.views[0].layers[0];
    assert_eq!(group.tags[0].attributes["xlink:href"], "#peak.inside");
}

#[test]
fn test_isoband_geojson_output() {
    let mut state = peak_state();
    let output = render(&mut state, peak_product("geojson"));

    assert_eq!(output.globals.product_type, "geojson");
    let path = &output.globals.paths["peak.inside"];
    assert_eq!(path.node_type.as_deref(), Some("Polygon"));
    let coordinates: Value = serde_json::from_str(path.data.as_ref().and_then(Value::as_str).unwrap()).unwrap();
    let ring = coordinates[0].as_array().unwrap();
    assert!(ring.len() >= 4);
    assert_eq!(ring.first(), ring.last());
}

#[test]
fn test_isoband_topojson_output() {
    let mut state = peak_state();
    let output = render(&mut state, peak_product("topojson"));

    assert!(output.globals.paths.is_empty());
    assert!(!output.globals.arcs.is_empty());
    let object = &output.globals.objects["isoband:Temperature:peak"];
    assert!(object.paths.contains_key("peak.inside"));
}

// ============================================================================
// Whole products
// ============================================================================

#[test]
fn test_testdata_product() {
    let mut state = testdata_state();
    let output = render(&mut state, testdata_product());
    let globals = &output.globals;

    assert_eq!(globals.width, Some(200));
    assert_eq!(globals.height, Some(200));
    assert!(globals.paths.contains_key("temps.cold"));
    assert!(globals.paths.contains_key("temps.warm"));
    assert!(globals.paths.contains_key("zero.line0"));
    assert!(globals.paths.contains_key("coast"));
    assert!(globals.includes.contains_key("city"));

    let view = &output.views[0];
    assert_eq!(view.layers.len(), 5);

    // Two cities with a symbol each, two numbers
    let cities = view.layers.iter().find(|n| n.attributes.get("id").map(String::as_str) == Some("cities"));
    if let Some(cities) = cities {
        assert_eq!(cities.tags.len(), 2);
    }
    let numbers: Vec<&str> = view
        .layers
        .iter()
        .flat_map(|n| n.tags.iter())
        .filter(|n| n.start == "<text")
        .filter_map(|n| n.cdata.as_deref())
        .collect();
    assert_eq!(numbers.len(), 2);
}

#[test]
fn test_output_serializes() {
    let mut state = testdata_state();
    let output = render(&mut state, testdata_product());
    let value = serde_json::to_value(&output).unwrap();
    assert_eq!(value["globals"]["type"], "svg");
    assert_eq!(value["globals"]["title"], "Temperature");
    assert!(value["views"].is_array());
}

#[test]
fn test_data_projection_sets_product_size() {
    let values = create_gradient_grid(30, 20, 10.0);
    let mut state = state_with(engine::with_grids(vec![engine::grid(
        "pal",
        "Temperature",
        time::REFERENCE_TIME,
        "EPSG:4326",
        (0.0, 0.0, 29.0, 19.0),
        30,
        20,
        &values,
    )]));
    let output = render(
        &mut state,
        json!({
            "time": time::REFERENCE_TIME,
            "projection": {"crs": "data"},
            "views": [{"layers": [{
                "layer_type": "isoline",
                "parameter": "Temperature",
                "isolines": [{"value": 5, "qid": "five"}]
            }]}]
        }),
    );
    assert_eq!(output.globals.width, Some(30));
    assert_eq!(output.globals.height, Some(20));
}

#[test]
fn test_product_hash_is_stable() {
    let mut a = testdata_state();
    let mut b = testdata_state();
    let first = Product::init(testdata_product(), &mut a).unwrap();
    let second = Product::init(testdata_product(), &mut b).unwrap();
    assert_eq!(first.hash_value(), second.hash_value());
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_unknown_key_fails_product() {
    let mut state = testdata_state();
    let mut config = testdata_product();
    config["views"][0]["layers"][0]["colour"] = json!("red");
    let err = Product::init(config, &mut state).unwrap_err();
    assert_eq!(err.root().kind(), ErrorKind::Config);
    assert!(err.report().contains("colour"));
}

#[test]
fn test_registering_definitions_twice_fails() {
    let mut state = testdata_state();
    let config = json!({"defs": {"symbols": {"dot": "<symbol/>"}}, "views": []});
    Product::init(config.clone(), &mut state).unwrap();
    let err = Product::init(config, &mut state).unwrap_err();
    assert_eq!(err.root().kind(), ErrorKind::Uniqueness);
}

#[test]
fn test_missing_data_is_data_error() {
    let mut state = testdata_state();
    let mut config = testdata_product();
    config["views"][0]["layers"][0]["parameter"] = json!("Pressure");
    let mut product = Product::init(config, &mut state).unwrap();
    let err = product.generate(&mut state).unwrap_err();
    assert_eq!(err.root().kind(), ErrorKind::Data);
}

#[test]
fn test_failed_generation_releases_ids() {
    let mut state = peak_state();
    let mut config = peak_product("svg");
    config["views"][0]["layers"][0]["isobands"] =
        json!([{"qid": "a", "lolimit": 0, "hilimit": 10}, {"qid": "a", "lolimit": -5, "hilimit": 10}]);
    let mut product = Product::init(config, &mut state).unwrap();
    assert!(product.generate(&mut state).is_err());
    assert!(!state.has_id("peak.a"));
}

#[test]
fn test_failed_generation_drops_its_arcs() {
    let mut state = peak_state();
    let mut config = peak_product("topojson");
    config["views"][0]["layers"][0]["isobands"] =
        json!([{"qid": "a", "lolimit": 0, "hilimit": 10}, {"qid": "a", "lolimit": -5, "hilimit": 10}]);
    let mut product = Product::init(config, &mut state).unwrap();
    assert!(product.generate(&mut state).is_err());
    assert!(state.arc_table().is_empty());

    let output = render(&mut state, peak_product("topojson"));
    assert_eq!(output.globals.arcs.len(), state.arc_table().len());
}
