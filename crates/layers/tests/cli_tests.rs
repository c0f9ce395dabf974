//! Tests running the `render-product` binary.

use serde_json::Value;
use std::process::Command;
use test_utils::{crate_testdata_dir, temp_test_dir};

fn render_product() -> Command {
    Command::new(env!("CARGO_BIN_EXE_render-product"))
}

#[test]
fn test_writes_output_file() {
    let dir = temp_test_dir();
    let output = dir.path().join("out.json");
    let testdata = crate_testdata_dir("layers");

    let status = render_product()
        .arg("--product")
        .arg(testdata.join("product.json"))
        .arg("--data")
        .arg(testdata.join("engine.json"))
        .arg("--output")
        .arg(&output)
        .status()
        .unwrap();
    assert!(status.success());

    let value: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(value["globals"]["type"], "svg");
    assert_eq!(value["globals"]["width"], 200);
    assert!(value["globals"]["paths"]["temps.warm"]["data"].is_string());
}

#[test]
fn test_prints_to_stdout() {
    let testdata = crate_testdata_dir("layers");
    let output = render_product()
        .arg("--product")
        .arg(testdata.join("product.json"))
        .arg("--data")
        .arg(testdata.join("engine.json"))
        .arg("--log-format")
        .arg("json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["views"].as_array().map(Vec::len), Some(1));
}

#[test]
fn test_configuration_error_exit_code() {
    let dir = temp_test_dir();
    let product = dir.path().join("bad.json");
    std::fs::write(&product, r#"{"views": [{"layers": [{"layer_type": "bogus"}]}]}"#).unwrap();

    let output = render_product()
        .arg("--product")
        .arg(&product)
        .arg("--data")
        .arg(crate_testdata_dir("layers").join("engine.json"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown layer type"));
}

#[test]
fn test_time_option_sets_product_time() {
    let dir = temp_test_dir();
    let product = dir.path().join("product.json");
    std::fs::write(
        &product,
        r#"{
            "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 20, "y1": 60, "x2": 30, "y2": 70},
            "views": [{"layers": [{
                "layer_type": "isoline",
                "qid": "t",
                "parameter": "Temperature",
                "isolines": [{"value": 5, "qid": "five"}]
            }]}]
        }"#,
    )
    .unwrap();

    let output = render_product()
        .arg("--product")
        .arg(&product)
        .arg("--data")
        .arg(crate_testdata_dir("layers").join("engine.json"))
        .arg("--time")
        .arg("2024-01-15T12:00:00Z")
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value["globals"]["paths"]["t.five"].is_object());
}
