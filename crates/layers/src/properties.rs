//! Settings inherited from parent to child layers.

use crate::engine::Gazetteer;
use crate::projection::{Projection, ProjectionSettings};
use chrono::{DateTime, Duration, Utc};
use map_common::{hash_combine, hash_f64, hash_value, ConfigObject, RenderError, RenderResult, TimePeriod};

/// Effective settings of a product, view or layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Properties {
    pub language: Option<String>,
    pub producer: Option<String>,
    pub source: Option<String>,
    /// Kept for the template backend, times are always UTC here
    pub tz: String,
    pub time: Option<DateTime<Utc>>,
    pub origintime: Option<DateTime<Utc>>,
    /// Minutes added to `time`
    pub time_offset: i64,
    pub interval_start: i64,
    pub interval_end: i64,
    pub timestep: Option<i64>,
    pub xmargin: i64,
    pub ymargin: i64,
    pub clip: bool,
    pub level: Option<f64>,
    pub level_id: Option<String>,
    pub projection: Projection,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            language: None,
            producer: None,
            source: None,
            tz: "UTC".to_string(),
            time: None,
            origintime: None,
            time_offset: 0,
            interval_start: 0,
            interval_end: 0,
            timestep: None,
            xmargin: 0,
            ymargin: 0,
            clip: false,
            level: None,
            level_id: None,
            projection: Projection::default(),
        }
    }
}

/// Overrides read from one level of the configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialProperties {
    pub language: Option<String>,
    pub producer: Option<String>,
    pub source: Option<String>,
    pub tz: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub origintime: Option<DateTime<Utc>>,
    pub time_offset: Option<i64>,
    pub interval_start: Option<i64>,
    pub interval_end: Option<i64>,
    pub timestep: Option<i64>,
    pub xmargin: Option<i64>,
    pub ymargin: Option<i64>,
    pub clip: Option<bool>,
    pub level: Option<f64>,
    pub level_id: Option<String>,
    pub projection: Option<ProjectionSettings>,
}

fn take_time(cfg: &mut ConfigObject, key: &str) -> RenderResult<Option<DateTime<Utc>>> {
    match cfg.take_string(key)? {
        None => Ok(None),
        Some(text) => map_common::parse_time(&text)
            .map(Some)
            .map_err(|e| RenderError::from(e).with_param("setting", key)),
    }
}

impl PartialProperties {
    /// Remove the property keys from a configuration object.
    pub fn take(cfg: &mut ConfigObject, gazetteer: &dyn Gazetteer) -> RenderResult<Self> {
        let mut props = Self {
            language: cfg.take_string("language")?,
            producer: cfg.take_string("producer")?,
            source: cfg.take_string("source")?,
            tz: cfg.take_string("tz")?,
            time: take_time(cfg, "time")?,
            origintime: take_time(cfg, "origintime")?,
            time_offset: cfg.take_i64("time_offset")?,
            interval_start: cfg.take_i64("interval_start")?,
            interval_end: cfg.take_i64("interval_end")?,
            timestep: cfg.take_i64("timestep")?,
            clip: cfg.take_bool("clip")?,
            level: cfg.take_f64("level")?,
            level_id: cfg.take_string("levelId")?,
            ..Default::default()
        };

        if let Some(elevation) = cfg.take_f64("elevation")? {
            if props.level.is_some() {
                return Err(RenderError::config("Cannot set both level and elevation"));
            }
            props.level = Some(elevation);
        }

        if let Some(margin) = cfg.take_i64("margin")? {
            props.xmargin = Some(margin);
            props.ymargin = Some(margin);
        }
        if let Some(m) = cfg.take_i64("xmargin")? {
            props.xmargin = Some(m);
        }
        if let Some(m) = cfg.take_i64("ymargin")? {
            props.ymargin = Some(m);
        }
        for (name, margin) in [("xmargin", props.xmargin), ("ymargin", props.ymargin)] {
            if margin.is_some_and(|m| m < 0) {
                return Err(RenderError::config("Margins cannot be negative").with_param("setting", name));
            }
        }
        if let Some(timestep) = props.timestep {
            if timestep <= 0 {
                return Err(RenderError::config("timestep must be positive").with_param("timestep", timestep));
            }
        }

        if let Some(projection) = cfg.take_object("projection")? {
            props.projection = Some(ProjectionSettings::init(projection, gazetteer)?);
        }

        Ok(props)
    }
}

impl Properties {
    /// Overlay `partial` on top of `parent`.
    pub fn merge(parent: &Properties, partial: PartialProperties) -> Properties {
        let projection = match &partial.projection {
            Some(settings) => parent.projection.merge(settings),
            None => parent.projection.clone(),
        };
        Properties {
            language: partial.language.or_else(|| parent.language.clone()),
            producer: partial.producer.or_else(|| parent.producer.clone()),
            source: partial.source.or_else(|| parent.source.clone()),
            tz: partial.tz.unwrap_or_else(|| parent.tz.clone()),
            time: partial.time.or(parent.time),
            origintime: partial.origintime.or(parent.origintime),
            time_offset: partial.time_offset.unwrap_or(parent.time_offset),
            interval_start: partial.interval_start.unwrap_or(parent.interval_start),
            interval_end: partial.interval_end.unwrap_or(parent.interval_end),
            timestep: partial.timestep.or(parent.timestep),
            xmargin: partial.xmargin.unwrap_or(parent.xmargin),
            ymargin: partial.ymargin.unwrap_or(parent.ymargin),
            clip: partial.clip.unwrap_or(parent.clip),
            level: partial.level.or(parent.level),
            level_id: partial.level_id.or_else(|| parent.level_id.clone()),
            projection,
        }
    }

    /// Read the property keys of `cfg` on top of `parent`.
    pub fn init(cfg: &mut ConfigObject, parent: &Properties, gazetteer: &dyn Gazetteer) -> RenderResult<Properties> {
        Ok(Self::merge(parent, PartialProperties::take(cfg, gazetteer)?))
    }

    pub fn has_valid_time(&self) -> bool {
        self.time.is_some()
    }

    /// The time data is requested for.
    pub fn valid_time(&self) -> RenderResult<DateTime<Utc>> {
        self.time
            .map(|t| t + Duration::minutes(self.time_offset))
            .ok_or_else(|| RenderError::config("Time has not been set"))
    }

    pub fn valid_time_period(&self) -> RenderResult<TimePeriod> {
        let t = self.valid_time()?;
        Ok(TimePeriod::around(t, self.interval_start, self.interval_end))
    }

    /// True when the pixel lies within the image extended by the margins.
    pub fn inside(&self, width: u32, height: u32, x: f64, y: f64) -> bool {
        let (xm, ym) = (self.xmargin as f64, self.ymargin as f64);
        x >= -xm && x <= width as f64 + xm && y >= -ym && y <= height as f64 + ym
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.language);
        hash_combine(&mut seed, hash_value(&self.producer));
        hash_combine(&mut seed, hash_value(&self.source));
        hash_combine(&mut seed, hash_value(&self.tz));
        hash_combine(&mut seed, hash_value(&self.time.map(|t| t.timestamp())));
        hash_combine(&mut seed, hash_value(&self.origintime.map(|t| t.timestamp())));
        hash_combine(&mut seed, hash_value(&self.time_offset));
        hash_combine(&mut seed, hash_value(&self.interval_start));
        hash_combine(&mut seed, hash_value(&self.interval_end));
        hash_combine(&mut seed, hash_value(&self.timestep));
        hash_combine(&mut seed, hash_value(&self.xmargin));
        hash_combine(&mut seed, hash_value(&self.ymargin));
        hash_combine(&mut seed, self.clip as u64);
        hash_combine(&mut seed, self.level.map_or(0, hash_f64));
        hash_combine(&mut seed, hash_value(&self.level_id));
        hash_combine(&mut seed, self.projection.hash_value());
        seed
    }
}
