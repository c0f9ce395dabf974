//! Cloud base height of the lowest broken or overcast layer at stations.

use super::number::NumberStyle;
use super::observation::{latest_observations, StationSelection};
use super::symbol::PointValue;
use super::{Layer, LayerBase};
use crate::engine::Observation;
use crate::field::ValueScaling;
use crate::node::{Globals, Node};
use crate::positions::Point;
use crate::state::State;
use map_common::{hash_combine, ConfigObject, RenderResult, ResultExt};

/// Cloud layers reported by a ceilometer.
const CLOUD_LAYERS: usize = 5;

/// Amounts in oktas that count as a ceiling.
const CEILING_OKTAS: std::ops::RangeInclusive<f64> = 5.0..=9.0;

fn amount_parameter(layer: usize) -> String {
    format!("CLA{}_PT1M_ACC", layer)
}

fn height_parameter(layer: usize) -> String {
    format!("CLHB{}_PT1M_INSTANT", layer)
}

/// Base height of the first layer covering at least five oktas.
fn ceiling(obs: &Observation) -> Option<f64> {
    (1..=CLOUD_LAYERS).find_map(|layer| {
        let height = obs.value(&height_parameter(layer))?;
        let amount = obs.value(&amount_parameter(layer))?;
        CEILING_OKTAS.contains(&amount).then_some(height)
    })
}

#[derive(Debug)]
pub struct CloudCeilingLayer {
    base: LayerBase,
    stations: StationSelection,
    scaling: ValueScaling,
    style: NumberStyle,
}

impl CloudCeilingLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            stations: StationSelection::default(),
            scaling: ValueScaling::default(),
            style: NumberStyle::default(),
        }
    }

    fn generate_ceilings(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let observations = latest_observations(&self.base, state, &self.stations)?;
        self.base.note_data_time(state);
        let (multiplier, offset) = self.scaling.resolve(state)?;

        let values: Vec<PointValue> = observations
            .iter()
            .filter_map(|so| {
                let height = ceiling(&so.observation)?;
                Some(PointValue {
                    point: Point {
                        x: so.x,
                        y: so.y,
                        lon: so.observation.longitude,
                        lat: so.observation.latitude,
                        dx: 0,
                        dy: 0,
                    },
                    value: multiplier * height + offset,
                })
            })
            .collect();

        let pbox = self.base.pixel_box()?;
        self.base.add_clip_rect(nodes, state, &pbox);
        let mut group = self.base.group(globals, state)?;
        let valid_count = self.style.render(&mut group, globals, state, &values)?;
        tracing::debug!(qid = %self.base.qid, stations = observations.len(), valid = valid_count, "generated cloud ceilings");
        nodes.push(group);
        Ok(())
    }
}

impl Layer for CloudCeilingLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, state: &mut State) -> RenderResult<()> {
        self.stations = StationSelection::take(cfg)?;
        self.scaling = ValueScaling::take(cfg)?;
        self.style = NumberStyle::take(cfg, state)?;
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_ceilings(globals, nodes, state)
            .trace("Cloud ceiling layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, self.stations.hash_value());
        hash_combine(&mut seed, self.scaling.hash_value());
        hash_combine(&mut seed, self.style.hash_value());
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engines, MemoryEngine};
    use crate::layer::create_layer;
    use crate::properties::Properties;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use test_utils::fixtures::time;

    fn state() -> State {
        let obs = |fmisid: i64, lon: f64, values: Value| {
            json!({"fmisid": fmisid, "longitude": lon, "latitude": 5.0, "time": "2024-01-15T12:00:00Z", "values": values})
        };
        let doc = json!({
            "observations": [
                // scattered at 300 m, broken at 900 m
                obs(1, 2.0, json!({"CLA1_PT1M_ACC": 3.0, "CLHB1_PT1M_INSTANT": 300.0, "CLA2_PT1M_ACC": 6.0, "CLHB2_PT1M_INSTANT": 900.0})),
                // overcast at 470 m
                obs(2, 5.0, json!({"CLA1_PT1M_ACC": 8.0, "CLHB1_PT1M_INSTANT": 470.0})),
                // few clouds only
                obs(3, 8.0, json!({"CLA1_PT1M_ACC": 1.0, "CLHB1_PT1M_INSTANT": 2000.0}))
            ]
        });
        State::new(Engines::from_memory(Arc::new(MemoryEngine::from_json(doc).unwrap())))
    }

    fn layer(state: &mut State, extra: Value) -> RenderResult<Box<dyn Layer>> {
        let mut cfg = json!({
            "layer_type": "cloud_ceiling",
            "producer": "fmi",
            "timestep": 10,
            "time": time::REFERENCE_TIME,
            "projection": {"crs": "EPSG:4326", "xsize": 100, "ysize": 100, "x1": 0, "y1": 0, "x2": 10, "y2": 10}
        });
        if let (Some(obj), Value::Object(extra)) = (cfg.as_object_mut(), extra) {
            obj.extend(extra);
        }
        create_layer(cfg, state, &Properties::default())
    }

    #[test]
    fn test_ceiling_is_lowest_broken_layer() {
        let values = |v: Value| Observation {
            fmisid: 1,
            longitude: 0.0,
            latitude: 0.0,
            time: map_common::parse_time(time::REFERENCE_TIME).unwrap(),
            values: serde_json::from_value(v).unwrap(),
        };
        assert_eq!(
            ceiling(&values(json!({"CLA1_PT1M_ACC": 5.0, "CLHB1_PT1M_INSTANT": 100.0}))),
            Some(100.0)
        );
        assert_eq!(
            ceiling(&values(json!({"CLA1_PT1M_ACC": 9.0, "CLA2_PT1M_ACC": 7.0, "CLHB2_PT1M_INSTANT": 800.0}))),
            Some(800.0)
        );
        assert_eq!(ceiling(&values(json!({"CLA1_PT1M_ACC": 4.0, "CLHB1_PT1M_INSTANT": 100.0}))), None);
    }

    #[test]
    fn test_generates_numbers() {
        let mut state = state();
        let mut layer = layer(
            &mut state,
            json!({"label": {"dy": 10}, "multiplier": 0.01, "numbers": [{"hilimit": 5, "attributes": {"class": "low"}}]}),
        )
        .unwrap();
        let mut nodes = Vec::new();
        layer.generate(&mut Globals::default(), &mut nodes, &mut state).unwrap();
        let texts: Vec<&Node> = nodes[0].tags.iter().filter(|n| n.start == "<text").collect();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0].cdata.as_deref(), Some("9"));
        assert_eq!(texts[0].attributes["x"], "20");
        assert_eq!(texts[0].attributes["y"], "60");
        assert!(!texts[0].attributes.contains_key("class"));
        assert_eq!(texts[1].cdata.as_deref(), Some("5"));
        assert_eq!(texts[1].attributes["class"], "low");
    }

    #[test]
    fn test_minvalues() {
        let mut state = state();
        let mut layer = layer(&mut state, json!({"fmisid": 3, "minvalues": 1})).unwrap();
        assert!(layer.generate(&mut Globals::default(), &mut Vec::new(), &mut state).is_err());
    }
}
