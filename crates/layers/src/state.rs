//! Request-scoped state shared by all layers of one product.

use crate::engine::{Engines, GridData, GridQuery};
use crate::node::{Attributes, Globals};
use chrono::{DateTime, Utc};
use map_common::{RenderError, RenderResult};
use renderer::colormap::ColorMapProvider;
use renderer::geometry::{ArcTable, OutputFormat};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Named definitions that may be registered only once.
///
/// Registrations are staged until [`Registry::commit`], so a product that
/// fails to initialize can be rolled back without leaving partial entries.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    kind: &'static str,
    committed: BTreeMap<String, String>,
    pending: BTreeMap<String, String>,
}

impl Registry {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn register(&mut self, name: &str, value: impl Into<String>) -> RenderResult<()> {
        if self.committed.contains_key(name) || self.pending.contains_key(name) {
            return Err(RenderError::uniqueness(format!("{} '{}' is defined more than once", self.kind, name))
                .with_param("name", name));
        }
        self.pending.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pending
            .get(name)
            .or_else(|| self.committed.get(name))
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn commit(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.committed.extend(pending);
    }

    pub fn rollback(&mut self) {
        self.pending.clear();
    }
}

/// The definition registries of a product.
#[derive(Debug, Clone)]
pub struct Registries {
    pub styles: Registry,
    pub symbols: Registry,
    pub patterns: Registry,
    pub markers: Registry,
    pub gradients: Registry,
    pub filters: Registry,
    pub colormaps: Registry,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            styles: Registry::new("Style"),
            symbols: Registry::new("Symbol"),
            patterns: Registry::new("Pattern"),
            markers: Registry::new("Marker"),
            gradients: Registry::new("Gradient"),
            filters: Registry::new("Filter"),
            colormaps: Registry::new("Colormap"),
        }
    }
}

impl Registries {
    fn all_mut(&mut self) -> [&mut Registry; 7] {
        [
            &mut self.styles,
            &mut self.symbols,
            &mut self.patterns,
            &mut self.markers,
            &mut self.gradients,
            &mut self.filters,
            &mut self.colormaps,
        ]
    }

    pub fn commit(&mut self) {
        self.all_mut().into_iter().for_each(Registry::commit);
    }

    pub fn rollback(&mut self) {
        self.all_mut().into_iter().for_each(Registry::rollback);
    }
}

/// Attributes whose `url(#name)` values pull a definition into the output.
const REFERENCING_ATTRIBUTES: [&str; 6] = ["filter", "marker", "marker-start", "marker-mid", "marker-end", "fill"];

fn url_reference(value: &str) -> Option<&str> {
    value.trim().strip_prefix("url(#")?.strip_suffix(')')
}

/// Everything a request needs besides the product itself.
#[derive(Debug)]
pub struct State {
    engines: Engines,
    format: OutputFormat,
    time: Option<DateTime<Utc>>,
    ids: BTreeSet<String>,
    pending_ids: BTreeSet<String>,
    qid_counters: HashMap<String, u64>,
    unique_counter: u64,
    pub registries: Registries,
    expiration_time: Option<DateTime<Utc>>,
    modification_time: Option<DateTime<Utc>>,
    arcs: ArcTable,
    precision: usize,
    in_defs: bool,
    animation: (u32, u32),
}

impl Default for State {
    fn default() -> Self {
        Self::new(Engines::default())
    }
}

impl State {
    pub fn new(engines: Engines) -> Self {
        Self {
            engines,
            format: OutputFormat::Svg,
            time: None,
            ids: BTreeSet::new(),
            pending_ids: BTreeSet::new(),
            qid_counters: HashMap::new(),
            unique_counter: 0,
            registries: Registries::default(),
            expiration_time: None,
            modification_time: None,
            arcs: ArcTable::new(),
            precision: 1,
            in_defs: false,
            animation: (0, 1),
        }
    }

    pub fn engines(&self) -> &Engines {
        &self.engines
    }

    pub fn gazetteer(&self) -> &dyn crate::engine::Gazetteer {
        self.engines.gazetteer.as_ref()
    }

    pub fn grid(&self, query: &GridQuery) -> RenderResult<Arc<GridData>> {
        self.engines.data.grid(query)
    }

    pub fn unit_conversion(&self, name: &str) -> RenderResult<(f64, f64)> {
        self.engines
            .data
            .unit_conversion(name)
            .ok_or_else(|| RenderError::config("Unknown unit conversion").with_param("unit_conversion", name))
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn set_format(&mut self, format: OutputFormat) {
        self.format = format;
    }

    /// Default time for products that do not set one.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn set_time(&mut self, time: Option<DateTime<Utc>>) {
        self.time = time;
    }

    pub fn animation(&self) -> (u32, u32) {
        self.animation
    }

    /// Select frame `step` of `steps` for animated painters.
    pub fn set_animation(&mut self, step: u32, steps: u32) -> RenderResult<()> {
        if steps == 0 || step >= steps {
            return Err(RenderError::config("Animation step must be below the step count")
                .with_param("loop_step", step)
                .with_param("loop_steps", steps));
        }
        self.animation = (step, steps);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Identifiers
    // ------------------------------------------------------------------------

    /// `prefix1`, `prefix2`, ... per prefix.
    pub fn make_qid(&mut self, prefix: &str) -> String {
        let counter = self.qid_counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("{}{}", prefix, counter)
    }

    pub fn generate_unique_id(&mut self) -> String {
        let id = format!("generated_id_{}", self.unique_counter);
        self.unique_counter += 1;
        id
    }

    /// Claim an output IRI. Returns false if it is already taken.
    pub fn add_id(&mut self, id: &str) -> bool {
        if self.ids.contains(id) || self.pending_ids.contains(id) {
            return false;
        }
        self.pending_ids.insert(id.to_string());
        true
    }

    pub fn require_id(&mut self, id: &str) -> RenderResult<()> {
        if self.add_id(id) {
            Ok(())
        } else {
            Err(RenderError::uniqueness(format!("ID '{}' is defined more than once", id)).with_param("id", id))
        }
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.ids.contains(id) || self.pending_ids.contains(id)
    }

    // ------------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------------

    pub fn commit(&mut self) {
        self.registries.commit();
        let pending = std::mem::take(&mut self.pending_ids);
        self.ids.extend(pending);
        self.arcs.commit();
    }

    pub fn rollback(&mut self) {
        self.registries.rollback();
        self.pending_ids.clear();
        self.arcs.rollback();
    }

    // ------------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------------

    pub fn style(&self, name: &str) -> Option<&str> {
        self.registries.styles.get(name)
    }

    pub fn symbol(&self, name: &str) -> Option<&str> {
        self.registries.symbols.get(name)
    }

    pub fn in_defs(&self) -> bool {
        self.in_defs
    }

    pub fn set_in_defs(&mut self, flag: bool) {
        self.in_defs = flag;
    }

    /// Copy definitions referenced through `url(#name)` into the includes.
    pub fn add_attributes(&mut self, globals: &mut Globals, attributes: &Attributes) -> RenderResult<()> {
        for (name, value) in attributes {
            if !REFERENCING_ATTRIBUTES.contains(&name.as_str()) {
                continue;
            }
            let Some(iri) = url_reference(value) else {
                continue;
            };
            let registry = match name.as_str() {
                "filter" => &self.registries.filters,
                "fill" if self.registries.gradients.contains(iri) => &self.registries.gradients,
                "fill" => &self.registries.patterns,
                _ => &self.registries.markers,
            };
            let Some(text) = registry.get(iri).map(str::to_string) else {
                return Err(RenderError::config("Attribute refers to an undefined definition")
                    .with_param("attribute", name)
                    .with_param("iri", iri));
            };
            if self.add_id(iri) {
                globals.includes.insert(iri.to_string(), text);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Output bookkeeping
    // ------------------------------------------------------------------------

    pub fn arcs(&mut self) -> &mut ArcTable {
        &mut self.arcs
    }

    pub fn arc_table(&self) -> &ArcTable {
        &self.arcs
    }

    /// Default number of decimals in serialized coordinates.
    pub fn precision(&self) -> usize {
        self.precision
    }

    pub fn set_precision(&mut self, precision: usize) {
        self.precision = precision;
    }

    /// Keep the earliest expiration time seen.
    pub fn update_expiration_time(&mut self, t: DateTime<Utc>) {
        self.expiration_time = Some(self.expiration_time.map_or(t, |old| old.min(t)));
    }

    /// Keep the latest modification time seen.
    pub fn update_modification_time(&mut self, t: DateTime<Utc>) {
        self.modification_time = Some(self.modification_time.map_or(t, |old| old.max(t)));
    }

    pub fn expiration_time(&self) -> Option<DateTime<Utc>> {
        self.expiration_time
    }

    pub fn modification_time(&self) -> Option<DateTime<Utc>> {
        self.modification_time
    }
}

impl ColorMapProvider for State {
    fn color_map_text(&self, name: &str) -> Option<String> {
        self.registries
            .colormaps
            .get(name)
            .map(str::to_string)
            .or_else(|| self.engines.data.color_map(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_qid_counts_per_prefix() {
        let mut state = State::default();
        assert_eq!(state.make_qid("isoband"), "isoband1");
        assert_eq!(state.make_qid("isoband"), "isoband2");
        assert_eq!(state.make_qid("isoline"), "isoline1");
    }

    #[test]
    fn test_generate_unique_id() {
        let mut state = State::default();
        assert_eq!(state.generate_unique_id(), "generated_id_0");
        assert_eq!(state.generate_unique_id(), "generated_id_1");
    }

    #[test]
    fn test_register_twice_fails() {
        let mut registry = Registry::new("Symbol");
        registry.register("dot", "<circle r=\"2\"/>").unwrap();
        let err = registry.register("dot", "<circle r=\"2\"/>").unwrap_err();
        assert_eq!(err.kind(), map_common::ErrorKind::Uniqueness);
        assert!(registry.register("dot", "<rect/>").is_err());

        registry.commit();
        assert!(registry.register("dot", "<rect/>").is_err());
        assert_eq!(registry.get("dot"), Some("<circle r=\"2\"/>"));
    }

    #[test]
    fn test_rollback_discards_pending() {
        let mut state = State::default();
        state.registries.symbols.register("kept", "a").unwrap();
        state.commit();
        state.registries.symbols.register("dropped", "b").unwrap();
        assert!(state.add_id("feature"));
        state.rollback();

        assert!(state.symbol("kept").is_some());
        assert!(state.symbol("dropped").is_none());
        assert!(!state.has_id("feature"));
        state.registries.symbols.register("dropped", "c").unwrap();
    }

    #[test]
    fn test_ids_are_unique() {
        let mut state = State::default();
        assert!(state.add_id("a"));
        assert!(!state.add_id("a"));
        state.commit();
        assert!(!state.add_id("a"));
        let err = state.require_id("a").unwrap_err();
        assert_eq!(err.message(), "ID 'a' is defined more than once");
    }

    #[test]
    fn test_add_attributes_includes_definitions() {
        let mut state = State::default();
        state.registries.filters.register("shadow", "<filter id=\"shadow\"/>").unwrap();
        state.registries.gradients.register("fade", "<linearGradient id=\"fade\"/>").unwrap();
        state.registries.patterns.register("hatch", "<pattern id=\"hatch\"/>").unwrap();

        let mut globals = Globals::default();
        let mut attrs = Attributes::new();
        attrs.insert("filter".into(), "url(#shadow)".into());
        attrs.insert("fill".into(), "url(#fade)".into());
        attrs.insert("stroke".into(), "url(#ignored)".into());
        state.add_attributes(&mut globals, &attrs).unwrap();
        assert_eq!(globals.includes.len(), 2);
        assert!(globals.includes.contains_key("fade"));

        let mut attrs = Attributes::new();
        attrs.insert("fill".into(), "url(#hatch)".into());
        state.add_attributes(&mut globals, &attrs).unwrap();
        assert!(globals.includes.contains_key("hatch"));

        let mut attrs = Attributes::new();
        attrs.insert("marker-end".into(), "url(#arrow)".into());
        assert!(state.add_attributes(&mut globals, &attrs).is_err());
    }

    #[test]
    fn test_color_map_provider_prefers_registry() {
        let mut state = State::default();
        state.registries.colormaps.register("custom", "0;FF000000").unwrap();
        assert_eq!(state.color_map_text("custom").as_deref(), Some("0;FF000000"));
        assert!(state.color_map_text("missing").is_none());
    }

    #[test]
    fn test_time_bookkeeping() {
        let mut state = State::default();
        let a = map_common::parse_time("2024-01-15T12:00:00Z").unwrap();
        let b = map_common::parse_time("2024-01-15T13:00:00Z").unwrap();
        state.update_expiration_time(b);
        state.update_expiration_time(a);
        state.update_modification_time(a);
        state.update_modification_time(b);
        assert_eq!(state.expiration_time(), Some(a));
        assert_eq!(state.modification_time(), Some(b));
    }

    #[test]
    fn test_animation_step_must_be_below_count() {
        let mut state = State::default();
        assert_eq!(state.animation(), (0, 1));
        state.set_animation(3, 8).unwrap();
        assert_eq!(state.animation(), (3, 8));
        assert!(state.set_animation(8, 8).is_err());
        assert!(state.set_animation(0, 0).is_err());
        assert_eq!(state.animation(), (3, 8));
    }
}
