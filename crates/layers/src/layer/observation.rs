//! Weather symbols drawn at observation stations.
//!
//! Stations come from a gazetteer keyword, an explicit `fmisid` list or,
//! when neither is given, every station of the producer inside the image.
//! Only the latest observation of each station within the valid time
//! period is used.

use super::{Layer, LayerBase};
use crate::engine::{Observation, ObservationQuery};
use crate::label::Label;
use crate::node::{Globals, Node};
use crate::state::State;
use chrono::Duration;
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, RenderError, RenderResult, ResultExt};
use projection::CoordinateTransformation;
use rstar::RTree;
use serde_json::Value;

/// Stations an observation layer reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StationSelection {
    keyword: Option<String>,
    fmisids: Vec<i64>,
}

impl StationSelection {
    pub(crate) fn take(cfg: &mut ConfigObject) -> RenderResult<Self> {
        let keyword = cfg.take_string("keyword")?.filter(|k| !k.is_empty());
        let fmisids = match cfg.take_value("fmisid") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(list)) => list.iter().map(parse_fmisid).collect::<RenderResult<_>>()?,
            Some(other) => vec![parse_fmisid(&other)?],
        };
        Ok(Self { keyword, fmisids })
    }

    /// Station numbers to query, empty for all stations.
    fn stations(&self, state: &State) -> RenderResult<Vec<i64>> {
        let Some(keyword) = &self.keyword else {
            return Ok(self.fmisids.clone());
        };
        let stations: Vec<i64> = state
            .gazetteer()
            .keyword_search(keyword)
            .iter()
            .filter_map(|loc| loc.fmisid)
            .collect();
        if stations.is_empty() {
            return Err(RenderError::data("No stations found for the keyword").with_param("keyword", keyword));
        }
        Ok(stations)
    }

    pub(crate) fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.keyword);
        hash_combine(&mut seed, hash_value(&self.fmisids));
        seed
    }
}

fn parse_fmisid(value: &Value) -> RenderResult<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| RenderError::config("fmisid must be an integer or a list of integers").with_param("fmisid", value))
}

/// A station observation at its rounded pixel position.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StationObservation {
    pub x: i32,
    pub y: i32,
    pub observation: Observation,
}

/// Latest observation of each selected station visible in the image.
///
/// The time window is the valid time period, extended back by at least one
/// `timestep` so that stations reporting at that interval are found.
pub(crate) fn latest_observations(
    base: &LayerBase,
    state: &State,
    stations: &StationSelection,
) -> RenderResult<Vec<StationObservation>> {
    let properties = &base.properties;
    let producer = properties
        .producer
        .clone()
        .ok_or_else(|| RenderError::config("Producer must be defined for observation layers"))?;
    let timestep = properties
        .timestep
        .filter(|&t| t > 0)
        .ok_or_else(|| RenderError::config("Timestep must be defined for observation layers"))?;

    let valid_time = properties.valid_time()?;
    let period = properties.valid_time_period()?;
    let query = ObservationQuery {
        producer: Some(producer),
        starttime: period.start.min(valid_time - Duration::minutes(timestep)),
        endtime: period.end,
        stations: stations.stations(state)?,
        bbox: None,
    };
    let observations = state.engines().observations.observations(&query)?;

    let crs = base.crs()?;
    let pbox = base.pixel_box()?;
    let transformation = CoordinateTransformation::from_wgs84(crs);

    let mut latest: Vec<Observation> = Vec::new();
    for obs in observations {
        match latest.last_mut() {
            Some(last) if last.fmisid == obs.fmisid => *last = obs,
            _ => latest.push(obs),
        }
    }

    Ok(latest
        .into_iter()
        .filter_map(|observation| {
            let (wx, wy) = transformation.transform(observation.longitude, observation.latitude)?;
            let (x, y) = pbox.transform(wx, wy);
            properties
                .inside(pbox.width, pbox.height, x, y)
                .then(|| StationObservation {
                    x: x.round() as i32,
                    y: y.round() as i32,
                    observation,
                })
        })
        .collect())
}

/// Present weather codes of automatic stations mapped to manual codes.
const WAWA_TO_WW: [u32; 100] = [
    0, 1, 2, 3, 4, 5, 0, 0, 0, 0, //
    10, 0, 13, 0, 0, 0, 0, 0, 18, 0, //
    28, 21, 20, 21, 22, 24, 29, 0, 0, 0, //
    42, 41, 43, 45, 47, 48, 0, 0, 0, 0, //
    61, 63, 65, 61, 65, 71, 75, 66, 67, 0, //
    50, 51, 53, 55, 56, 57, 57, 58, 59, 0, //
    60, 61, 63, 65, 66, 67, 67, 68, 69, 0, //
    70, 71, 73, 75, 79, 79, 79, 77, 78, 0, //
    80, 80, 81, 81, 82, 85, 86, 86, 0, 89, //
    92, 17, 93, 96, 17, 97, 99, 0, 0, 8,
];

/// Which observations are turned into which weather symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// Precipitation at road weather stations
    FinnishRoad,
    /// Present weather code of automatic stations
    PresentWeather,
}

impl SymbolKind {
    fn layer_type(self) -> &'static str {
        match self {
            SymbolKind::FinnishRoad => "finnish_road_observation",
            SymbolKind::PresentWeather => "present_weather_observation",
        }
    }

    /// Symbol code and priority of the observation, `None` when not drawn.
    fn symbol(self, obs: &Observation, missing: Option<u32>) -> Option<(u32, u32)> {
        let symbol = match self {
            SymbolKind::FinnishRoad => {
                let t2m = obs.value("ILMA")?;
                let rain = obs.value("SADE")?;
                let rform = obs.value("RST")?;
                match road_symbol(rain as i64, rform as i64) {
                    Some(symbol) => return Some((symbol, road_priority(symbol, t2m))),
                    None => missing?,
                }
            }
            SymbolKind::PresentWeather => match obs.value("ww_aws").and_then(present_weather_symbol) {
                Some(symbol) => return Some((symbol, present_weather_priority(symbol))),
                None => missing?,
            },
        };
        Some((symbol, 0))
    }
}

fn road_symbol(rain: i64, rform: i64) -> Option<u32> {
    let symbol = match (rain, rform) {
        (1, 9) => 51,
        (1, 10) => 52,
        (1, 11) => 53,
        (1, 18) => 213,
        (1, 19) => 223,
        (2, 9) => 209,
        (2, 10) => 219,
        (2, 11) => 229,
        (2, 18) | (3, 18) => 214,
        (2, 19) | (3, 19) => 224,
        (3, 9) => 212,
        (3, 10) => 222,
        (3, 11) => 232,
        (_, 13) => 225,
        (_, 14) => 244,
        (_, 15) => 233,
        (_, 16) => 234,
        (_, 17) => 236,
        (4, _) => 53,
        (5, _) => 229,
        (6, _) => 232,
        _ => return None,
    };
    Some(symbol)
}

/// Priority of a road weather symbol, freezing and heavy precipitation win.
fn road_priority(symbol: u32, t2m: f64) -> u32 {
    if t2m <= 0.0 {
        match symbol {
            53 | 229 => 1,
            232 | 233 | 234 | 236 | 244 => 2,
            225 => 5,
            51 | 213 => 6,
            209 => 7,
            52 | 212 | 214 | 223 => 8,
            219 => 9,
            222 | 224 => 10,
            _ => 0,
        }
    } else if t2m < 10.0 {
        match symbol {
            51 | 52 | 53 | 213 | 223 | 225 => 1,
            209 | 219 | 229 | 233 | 234 | 236 | 244 => 2,
            212 | 214 | 222 | 224 | 232 => 4,
            _ => 0,
        }
    } else {
        match symbol {
            209 | 219 => 1,
            212 | 222 => 2,
            213 => 3,
            214 => 4,
            225 => 5,
            53 | 223 => 6,
            224 | 229 => 7,
            232 => 8,
            233 | 234 | 236 | 244 => 9,
            _ => 0,
        }
    }
}

fn present_weather_symbol(wawa: f64) -> Option<u32> {
    if wawa < 0.0 {
        return None;
    }
    let ww = if wawa <= 99.0 {
        WAWA_TO_WW[wawa as usize]
    } else {
        wawa as u32
    };
    match ww {
        0..=3 => None,
        99 => Some(48),
        ww => Some(157 + ww),
    }
}

fn present_weather_priority(symbol: u32) -> u32 {
    match symbol {
        170..=173 => 1,
        162..=165 | 167..=169 | 174 | 177..=186 | 198 | 207 | 208 | 213 | 215 | 217 | 218 | 227 | 235 | 242
        | 244 | 246 | 248..=251 => 5,
        187..=189 | 193 | 195 | 197 | 199 | 200 | 209 | 210 | 219 | 220 | 225 | 228 | 229 | 233 | 234 | 236
        | 237 | 240 => 7,
        161 | 175 | 211 | 216 | 221 | 223 | 230 | 231 | 238 | 252 | 253 => 8,
        201..=206 | 212 | 239 | 241 | 243 | 245 | 247 => 9,
        48 | 166 | 176 | 190..=192 | 194 | 196 | 214 | 222 | 224 | 226 | 232 | 254 | 255 => 10,
        _ => 0,
    }
}

/// A station symbol with its drawing priority.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StationSymbol {
    x: i32,
    y: i32,
    symbol: u32,
    priority: u32,
}

/// Keep the highest priority symbols, dropping any closer than `mindistance`
/// pixels to one already kept.
fn thin_symbols(mut symbols: Vec<StationSymbol>, mindistance: f64) -> Vec<StationSymbol> {
    symbols.sort_by(|a, b| b.priority.cmp(&a.priority));
    if mindistance <= 0.0 {
        return symbols;
    }
    let limit = mindistance * mindistance;
    let mut selected: RTree<[f64; 2]> = RTree::new();
    symbols
        .into_iter()
        .filter(|s| {
            let xy = [s.x as f64, s.y as f64];
            if selected.locate_within_distance(xy, limit).next().is_some() {
                return false;
            }
            selected.insert(xy);
            true
        })
        .collect()
}

/// Weather symbols as font glyphs at observation stations.
#[derive(Debug)]
pub struct ObservationLayer {
    base: LayerBase,
    kind: SymbolKind,
    stations: StationSelection,
    label: Label,
    mindistance: f64,
    /// Symbol for stations whose observation maps to no symbol
    missing: Option<u32>,
}

impl ObservationLayer {
    pub fn new(base: LayerBase, kind: SymbolKind) -> Self {
        Self {
            base,
            kind,
            stations: StationSelection::default(),
            label: Label::default(),
            mindistance: 0.0,
            missing: None,
        }
    }

    fn generate_symbols(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let observations = latest_observations(&self.base, state, &self.stations)?;
        self.base.note_data_time(state);

        let symbols: Vec<StationSymbol> = observations
            .iter()
            .filter_map(|so| {
                let (symbol, priority) = self.kind.symbol(&so.observation, self.missing)?;
                Some(StationSymbol {
                    x: so.x,
                    y: so.y,
                    symbol,
                    priority,
                })
            })
            .collect();
        let symbols = thin_symbols(symbols, self.mindistance);

        let pbox = self.base.pixel_box()?;
        self.base.add_clip_rect(nodes, state, &pbox);
        let mut group = self.base.group(globals, state)?;
        for s in &symbols {
            let mut text = Node::tag("<text", "</text>")
                .with_attribute("x", s.x + self.label.dx)
                .with_attribute("y", s.y + self.label.dy);
            text.cdata = Some(format!("&#{};", s.symbol));
            group.tags.push(text);
        }
        tracing::debug!(
            qid = %self.base.qid,
            stations = observations.len(),
            symbols = symbols.len(),
            "generated observation symbols"
        );
        nodes.push(group);
        Ok(())
    }
}

impl Layer for ObservationLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, state: &mut State) -> RenderResult<()> {
        self.stations = StationSelection::take(cfg)?;
        if let Some(value) = cfg.take_value("label") {
            self.label = Label::parse(value)?;
        }
        self.label.resolve(state)?;
        if let Some(mindistance) = cfg.take_f64("mindistance")? {
            if mindistance < 0.0 {
                return Err(RenderError::config("mindistance cannot be negative").with_param("mindistance", mindistance));
            }
            self.mindistance = mindistance;
        }
        if let Some(missing) = cfg.take_i64("missing")? {
            let missing = u32::try_from(missing)
                .map_err(|_| RenderError::config("Invalid missing symbol").with_param("missing", missing))?;
            self.missing = (missing > 0).then_some(missing);
        }
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_symbols(globals, nodes, state)
            .trace("Observation layer failed")
            .with_param("qid", qid)
            .with_param("layer_type", self.kind.layer_type())
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.kind));
        hash_combine(&mut seed, self.stations.hash_value());
        hash_combine(&mut seed, self.label.hash_value());
        hash_combine(&mut seed, hash_f64(self.mindistance));
        hash_combine(&mut seed, hash_value(&self.missing));
        seed
    }
}
