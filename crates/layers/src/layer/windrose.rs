//! Wind roses drawn from station observations.
//!
//! For each station the directions observed over the time window are
//! counted into `sectors` equal compass sectors. The largest sector reaches
//! the full rose radius; sector areas scale with their share of the
//! observations.

use super::symbol::include_symbol;
use super::{xml_escape, Layer, LayerBase};
use crate::attribute_selection::AttributeSelection;
use crate::engine::{Observation, ObservationQuery};
use crate::label::Label;
use crate::node::{deserialize_attributes, hash_attributes, Attributes, Globals, Node};
use crate::state::State;
use chrono::Duration;
use map_common::{
    hash_combine, hash_f64, hash_value, ConfigObject, PixelBox, RenderError, RenderResult, ResultExt,
};
use projection::CoordinateTransformation;
use renderer::geometry::format_number;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

const DIRECTION: &str = "WindDirection";
const SPEED: &str = "WindSpeedMS";
const TEMPERATURE: &str = "t2m";

/// Largest allowed gap between complete observations.
const MAX_GAP_MINUTES: i64 = 60;

/// Plain text, or text per language with an optional `default`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Text {
    Plain(String),
    Translated(BTreeMap<String, String>),
}

impl Text {
    fn translate(&self, language: Option<&str>) -> RenderResult<&str> {
        match self {
            Text::Plain(text) => Ok(text),
            Text::Translated(map) => language
                .and_then(|l| map.get(l))
                .or_else(|| map.get("default"))
                .map(String::as_str)
                .ok_or_else(|| {
                    RenderError::config("No translation for the station title")
                        .with_param("language", language.unwrap_or("default"))
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct Title {
    text: Text,
    #[serde(default)]
    dx: i32,
    #[serde(default)]
    dy: i32,
    #[serde(default, deserialize_with = "deserialize_attributes")]
    attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct Station {
    fmisid: i64,
    /// Rose position, defaults to the station position
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default, deserialize_with = "deserialize_attributes")]
    attributes: Attributes,
    #[serde(default)]
    title: Option<Title>,
}

/// Line from the station to its rose.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct Connector {
    #[serde(default)]
    startoffset: f64,
    #[serde(default)]
    endoffset: f64,
    #[serde(default, deserialize_with = "deserialize_attributes")]
    attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct WindRose {
    radius: f64,
    minpercentage: f64,
    sectors: usize,
    symbol: Option<String>,
    #[serde(deserialize_with = "deserialize_attributes")]
    attributes: Attributes,
    connector: Option<Connector>,
    parameter: Option<String>,
    /// Sector styles chosen by the strongest wind of the sector
    limits: Vec<AttributeSelection>,
}

impl Default for WindRose {
    fn default() -> Self {
        Self {
            radius: 20.0,
            minpercentage: 0.0,
            sectors: 8,
            symbol: None,
            attributes: Attributes::new(),
            connector: None,
            parameter: None,
            limits: Vec::new(),
        }
    }
}

impl WindRose {
    fn hash_value(&self) -> u64 {
        let mut seed = hash_f64(self.radius);
        hash_combine(&mut seed, hash_f64(self.minpercentage));
        hash_combine(&mut seed, self.sectors as u64);
        hash_combine(&mut seed, hash_value(&self.symbol));
        hash_combine(&mut seed, hash_attributes(&self.attributes));
        if let Some(connector) = &self.connector {
            hash_combine(&mut seed, hash_f64(connector.startoffset));
            hash_combine(&mut seed, hash_f64(connector.endoffset));
            hash_combine(&mut seed, hash_attributes(&connector.attributes));
        }
        hash_combine(&mut seed, hash_value(&self.parameter));
        for limit in &self.limits {
            hash_combine(&mut seed, limit.hash_value());
        }
        seed
    }
}

/// Statistics printable next to a rose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
enum Statistic {
    #[serde(rename = "mean_t(T)")]
    MeanTemperature,
    #[serde(rename = "mean_t(ws_10min)")]
    MeanWind,
    #[serde(rename = "max_t(ws_10min)")]
    MaxWind,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatisticSettings {
    parameter: Statistic,
    #[serde(default)]
    label: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_attributes")]
    attributes: Attributes,
}

#[derive(Debug, Clone)]
struct StatisticText {
    parameter: Statistic,
    label: Label,
    attributes: Attributes,
}

/// Summary of the observations of one station.
#[derive(Debug, Clone, PartialEq)]
struct RoseData {
    longitude: f64,
    latitude: f64,
    /// Share of observed directions per sector, in percent
    percentages: Vec<f64>,
    /// Strongest wind per sector
    max_winds: Vec<f64>,
    mean_wind: f64,
    max_wind: f64,
    mean_temperature: f64,
    valid: bool,
}

/// Sector of a direction, sector 0 is centered on north.
fn rose_sector(sectors: usize, direction: f64) -> usize {
    let sector = (sectors as f64 * direction / 360.0).round() as i64;
    sector.rem_euclid(sectors as i64) as usize
}

/// Start and end angles of a sector in degrees clockwise from north.
fn sector_angles(sector: usize, sectors: usize) -> (f64, f64) {
    let width = 360.0 / sectors as f64;
    ((sector as f64 - 0.5) * width, (sector as f64 + 0.5) * width)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// True when some observation is complete and complete observations are at
/// most an hour apart, including the gap to any trailing incomplete ones.
fn is_valid_series(observations: &[Observation]) -> bool {
    let limit = Duration::minutes(MAX_GAP_MINUTES);
    let mut previous = None;
    for obs in observations {
        let complete = [DIRECTION, SPEED, TEMPERATURE].iter().all(|p| obs.value(p).is_some());
        if let Some(t) = previous {
            if obs.time - t > limit {
                return false;
            }
        }
        if complete {
            previous = Some(obs.time);
        }
    }
    previous.is_some()
}

fn rose_data(observations: &[Observation], sectors: usize) -> Option<RoseData> {
    let first = observations.first()?;
    let mut counts = vec![0usize; sectors];
    let mut max_winds = vec![0.0f64; sectors];
    for obs in observations {
        let Some(direction) = obs.value(DIRECTION) else {
            continue;
        };
        let sector = rose_sector(sectors, direction);
        counts[sector] += 1;
        if let Some(speed) = obs.value(SPEED) {
            max_winds[sector] = max_winds[sector].max(speed);
        }
    }
    let total: usize = counts.iter().sum();
    let percentages = counts
        .iter()
        .map(|&n| if total > 0 { 100.0 * n as f64 / total as f64 } else { 0.0 })
        .collect();

    Some(RoseData {
        longitude: first.longitude,
        latitude: first.latitude,
        percentages,
        max_winds,
        mean_wind: mean(observations.iter().filter_map(|o| o.value(SPEED))),
        max_wind: observations
            .iter()
            .filter_map(|o| o.value(SPEED))
            .fold(f64::NAN, f64::max),
        mean_temperature: mean(observations.iter().filter_map(|o| o.value(TEMPERATURE))),
        valid: is_valid_series(observations),
    })
}

/// SVG path of one sector of radius `r` centered at the rose position.
fn sector_path(x: i64, y: i64, r: f64, sector: usize, sectors: usize) -> String {
    let (start, end) = sector_angles(sector, sectors);
    let (a1, a2) = ((start - 90.0).to_radians(), (end - 90.0).to_radians());
    let x1 = x as f64 + r * a1.cos();
    let y1 = y as f64 + r * a1.sin();
    let x2 = x as f64 + r * a2.cos();
    let y2 = y as f64 + r * a2.sin();
    format!(
        "M{} {} {},{} A {} {} 0,0,1 {},{}Z",
        x,
        y,
        format_number(x1, 2),
        format_number(y1, 2),
        format_number(r, 2),
        format_number(r, 2),
        format_number(x2, 2),
        format_number(y2, 2)
    )
}

/// Connector end points after the offsets, `None` if nothing is left.
fn connector_line(
    connector: &Connector,
    station: (i64, i64),
    rose: (i64, i64),
) -> Option<((i64, i64), (i64, i64))> {
    let ((mut x1, mut y1), (mut x2, mut y2)) = (station, rose);
    let length = |x1: i64, y1: i64, x2: i64, y2: i64| (((x1 - x2).pow(2) + (y1 - y2).pow(2)) as f64).sqrt();
    if connector.startoffset > 0.0 {
        let alpha = connector.startoffset / length(x1, y1, x2, y2);
        if alpha >= 1.0 {
            return None;
        }
        x1 += (alpha * (x2 - x1) as f64).round() as i64;
        y1 += (alpha * (y2 - y1) as f64).round() as i64;
    }
    if connector.endoffset > 0.0 {
        let alpha = connector.endoffset / length(x1, y1, x2, y2);
        if alpha >= 1.0 {
            return None;
        }
        x2 += (alpha * (x1 - x2) as f64).round() as i64;
        y2 += (alpha * (y1 - y2) as f64).round() as i64;
    }
    Some(((x1, y1), (x2, y2)))
}

fn pixel(transformation: &CoordinateTransformation, pbox: &PixelBox, lon: f64, lat: f64) -> Option<(i64, i64)> {
    let (x, y) = transformation.transform(lon, lat)?;
    let (px, py) = pbox.transform(x, y);
    Some((px.round() as i64, py.round() as i64))
}

fn parse<T: serde::de::DeserializeOwned>(value: Value, context: &str) -> RenderResult<T> {
    serde_json::from_value(value).map_err(|e| RenderError::from(e).trace(format!("Invalid {} settings", context)))
}

#[derive(Debug)]
pub struct WindRoseLayer {
    base: LayerBase,
    timezone: String,
    /// Window start relative to the valid time, hours
    starttimeoffset: i64,
    endtimeoffset: i64,
    windrose: WindRose,
    statistics: Vec<StatisticText>,
    stations: Vec<Station>,
}

impl WindRoseLayer {
    pub fn new(base: LayerBase) -> Self {
        Self {
            base,
            timezone: "UTC".to_string(),
            starttimeoffset: 0,
            endtimeoffset: 24,
            windrose: WindRose::default(),
            statistics: Vec::new(),
            stations: Vec::new(),
        }
    }

    fn observations(&self, state: &State, station: &Station) -> RenderResult<Vec<Observation>> {
        let valid_time = self.base.properties.valid_time()?;
        let query = ObservationQuery {
            producer: None,
            starttime: valid_time + Duration::hours(self.starttimeoffset),
            endtime: valid_time + Duration::hours(self.endtimeoffset),
            stations: vec![station.fmisid],
            bbox: None,
        };
        state.engines().observations.observations(&query)
    }

    fn use_symbol(
        globals: &mut Globals,
        state: &mut State,
        iri: &str,
        attributes: &Attributes,
        (x, y): (i64, i64),
    ) -> RenderResult<Node> {
        include_symbol(globals, state, iri)?;
        state.add_attributes(globals, attributes)?;
        Ok(Node::use_tag(iri, attributes.clone())
            .with_attribute("x", x)
            .with_attribute("y", y))
    }

    fn text(
        globals: &mut Globals,
        state: &mut State,
        text: &str,
        attributes: &Attributes,
        (x, y): (i64, i64),
    ) -> RenderResult<Node> {
        state.add_attributes(globals, attributes)?;
        let mut node = Node::tag("<text", "</text>");
        node.attributes = attributes.clone();
        node.attributes.insert("x".to_string(), x.to_string());
        node.attributes.insert("y".to_string(), y.to_string());
        node.cdata = Some(xml_escape(text));
        Ok(node)
    }

    fn sectors(&self, globals: &mut Globals, state: &mut State, data: &RoseData, rose: (i64, i64)) -> RenderResult<Vec<Node>> {
        let sectors = self.windrose.sectors;
        let max_percentage = data.percentages.iter().copied().fold(0.0, f64::max);
        let mut nodes = Vec::new();
        if max_percentage <= 0.0 {
            return Ok(nodes);
        }
        for (i, &percentage) in data.percentages.iter().enumerate() {
            if percentage < self.windrose.minpercentage {
                continue;
            }
            // Areas scale with the square of the radius
            let r = self.windrose.radius * (percentage / max_percentage).sqrt();
            let mut node = Node::tag("<path", "/>");
            if let Some(selection) = AttributeSelection::select(&self.windrose.limits, data.max_winds[i])? {
                state.add_attributes(globals, &selection.attributes)?;
                node.attributes = selection.attributes.clone();
            }
            node.attributes
                .insert("d".to_string(), sector_path(rose.0, rose.1, r, i, sectors));
            nodes.push(node);
        }
        Ok(nodes)
    }

    fn generate_roses(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        let crs = self.base.crs()?;
        let pbox = self.base.pixel_box()?;
        let transformation = CoordinateTransformation::from_wgs84(crs);

        let mut roses = Vec::new();
        for station in &self.stations {
            let observations = self
                .observations(state, station)
                .trace("Wind rose observations failed")
                .with_param("fmisid", station.fmisid)?;
            match rose_data(&observations, self.windrose.sectors) {
                Some(data) => roses.push((station, data)),
                None => tracing::debug!(fmisid = station.fmisid, "No wind rose observations for station"),
            }
        }
        self.base.note_data_time(state);

        self.base.add_clip_rect(nodes, state, &pbox);
        let mut group = self.base.group(globals, state)?;
        // Texts go last to stay on top of the roses
        let mut texts = Vec::new();
        let language = self.base.properties.language.clone();

        for (station, data) in &roses {
            let lon = station.longitude.unwrap_or(data.longitude);
            let lat = station.latitude.unwrap_or(data.latitude);
            let (Some(rose), Some(site)) = (
                pixel(&transformation, &pbox, lon, lat),
                pixel(&transformation, &pbox, data.longitude, data.latitude),
            ) else {
                continue;
            };

            if let Some(iri) = station.symbol.as_deref().filter(|s| !s.is_empty()) {
                group
                    .tags
                    .push(Self::use_symbol(globals, state, iri, &station.attributes, site)?);
            }
            if let Some(iri) = self.windrose.symbol.as_deref().filter(|s| !s.is_empty()) {
                group
                    .tags
                    .push(Self::use_symbol(globals, state, iri, &self.windrose.attributes, rose)?);
            }
            if data.valid {
                group.tags.extend(self.sectors(globals, state, data, rose)?);
            }

            if let Some(connector) = &self.windrose.connector {
                if let Some(((x1, y1), (x2, y2))) = connector_line(connector, site, rose) {
                    state.add_attributes(globals, &connector.attributes)?;
                    let mut line = Node::tag("<line", "/>");
                    line.attributes = connector.attributes.clone();
                    for (name, value) in [("x1", x1), ("y1", y1), ("x2", x2), ("y2", y2)] {
                        line.attributes.insert(name.to_string(), value.to_string());
                    }
                    group.tags.push(line);
                }
            }

            if let Some(title) = &station.title {
                let text = title.text.translate(language.as_deref())?;
                let position = (rose.0 + title.dx as i64, rose.1 + title.dy as i64);
                texts.push(Self::text(globals, state, text, &title.attributes, position)?);
            }

            if data.valid {
                for statistic in &self.statistics {
                    let value = match statistic.parameter {
                        Statistic::MeanTemperature => data.mean_temperature,
                        Statistic::MeanWind => data.mean_wind,
                        Statistic::MaxWind => data.max_wind,
                    };
                    let label = &statistic.label;
                    let position = (rose.0 + label.dx as i64, rose.1 + label.dy as i64);
                    texts.push(Self::text(globals, state, &label.print(value), &statistic.attributes, position)?);
                }
            }
        }

        group.tags.extend(texts);
        nodes.push(group);
        Ok(())
    }
}

impl Layer for WindRoseLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn init(&mut self, cfg: &mut ConfigObject, state: &mut State) -> RenderResult<()> {
        if let Some(timezone) = cfg.take_string("timezone")? {
            self.timezone = timezone;
        }
        if let Some(offset) = cfg.take_i64("starttimeoffset")? {
            self.starttimeoffset = offset;
        }
        if let Some(offset) = cfg.take_i64("endtimeoffset")? {
            self.endtimeoffset = offset;
        }
        if self.starttimeoffset > self.endtimeoffset {
            return Err(RenderError::config("Wind rose starttimeoffset is after endtimeoffset")
                .with_param("starttimeoffset", self.starttimeoffset)
                .with_param("endtimeoffset", self.endtimeoffset));
        }

        if let Some(value) = cfg.take_value("windrose") {
            self.windrose = parse(value, "windrose")?;
        }
        if self.windrose.sectors == 0 {
            return Err(RenderError::config("Wind rose must have at least one sector"));
        }
        if self.windrose.radius <= 0.0 {
            return Err(RenderError::config("Wind rose radius must be positive").with_param("radius", self.windrose.radius));
        }
        for limit in &self.windrose.limits {
            limit.validate()?;
        }

        if let Some(value) = cfg.take_value("observations") {
            let settings: Vec<StatisticSettings> = parse(value, "wind rose observations")?;
            for s in settings {
                let mut label = Label::parse(s.label.unwrap_or_else(|| Value::Object(Default::default())))?;
                label.resolve(state)?;
                self.statistics.push(StatisticText {
                    parameter: s.parameter,
                    label,
                    attributes: s.attributes,
                });
            }
        }

        if let Some(value) = cfg.take_value("stations") {
            self.stations = parse(value, "wind rose stations")?;
        }
        Ok(())
    }

    fn generate(&mut self, globals: &mut Globals, nodes: &mut Vec<Node>, state: &mut State) -> RenderResult<()> {
        if state.in_defs() {
            return Err(RenderError::config("Wind rose layer cannot be used in the defs section"));
        }
        if !self.base.valid_layer(state)? {
            return Ok(());
        }
        self.base.add_css(globals, state)?;
        let qid = self.base.qid.clone();
        self.generate_roses(globals, nodes, state)
            .trace("Wind rose layer failed")
            .with_param("qid", qid)
    }

    fn hash_value(&self) -> u64 {
        let mut seed = self.base.hash_value();
        hash_combine(&mut seed, hash_value(&self.timezone));
        hash_combine(&mut seed, hash_value(&(self.starttimeoffset, self.endtimeoffset)));
        hash_combine(&mut seed, self.windrose.hash_value());
        for statistic in &self.statistics {
            hash_combine(&mut seed, hash_value(&statistic.parameter));
            hash_combine(&mut seed, statistic.label.hash_value());
            hash_combine(&mut seed, hash_attributes(&statistic.attributes));
        }
        for station in &self.stations {
            hash_combine(&mut seed, hash_value(&station.fmisid));
            hash_combine(&mut seed, station.longitude.map_or(0, hash_f64));
            hash_combine(&mut seed, station.latitude.map_or(0, hash_f64));
            hash_combine(&mut seed, hash_value(&station.symbol));
            hash_combine(&mut seed, hash_attributes(&station.attributes));
            if let Some(title) = &station.title {
                hash_combine(&mut seed, hash_value(&(title.dx, title.dy)));
                hash_combine(&mut seed, hash_attributes(&title.attributes));
                match &title.text {
                    Text::Plain(text) => hash_combine(&mut seed, hash_value(text)),
                    Text::Translated(map) => hash_combine(&mut seed, hash_value(map)),
                }
            }
        }
        seed
    }
}
