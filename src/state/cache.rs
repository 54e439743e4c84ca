//! Variable cache
//!
//! Last known value of every zone, source and preset variable seen on the
//! wire. Names are stored lower-cased so lookups are case-insensitive.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use crate::protocol::{StateUpdate, UpdateTarget};
use crate::types::{PresetId, SourceId, ZoneId};

/// Variables of one zone, source or preset
pub type Variables = HashMap<String, String>;

/// Signal that a variable has not been seen yet
///
/// Not a failure: callers fall back to asking the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{target}.{variable} is not cached")]
pub struct Uncached {
    /// Wire form of the object that was looked up
    pub target: String,
    /// Variable name that was looked up
    pub variable: String,
}

/// Receives zone variable updates
pub trait ZoneObserver: Send + Sync {
    /// Called after `zone.name` was stored
    fn zone_changed(&self, zone: ZoneId, name: &str, value: &str);
}

/// Receives source variable updates
pub trait SourceObserver: Send + Sync {
    /// Called after `source.name` was stored
    fn source_changed(&self, source: SourceId, name: &str, value: &str);
}

/// Receives preset variable updates
pub trait PresetObserver: Send + Sync {
    /// Called after `preset.name` was stored
    fn preset_changed(&self, preset: PresetId, name: &str, value: &str);
}

impl<F> ZoneObserver for F
where
    F: Fn(ZoneId, &str, &str) + Send + Sync,
{
    fn zone_changed(&self, zone: ZoneId, name: &str, value: &str) {
        self(zone, name, value);
    }
}

impl<F> SourceObserver for F
where
    F: Fn(SourceId, &str, &str) + Send + Sync,
{
    fn source_changed(&self, source: SourceId, name: &str, value: &str) {
        self(source, name, value);
    }
}

impl<F> PresetObserver for F
where
    F: Fn(PresetId, &str, &str) + Send + Sync,
{
    fn preset_changed(&self, preset: PresetId, name: &str, value: &str) {
        self(preset, name, value);
    }
}

/// Handle returned when registering an observer, used to remove it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// One table plus its observers
struct Domain<K, O: ?Sized> {
    values: RwLock<HashMap<K, Variables>>,
    observers: RwLock<Vec<(ObserverId, Arc<O>)>>,
}

impl<K, O> Domain<K, O>
where
    K: Eq + Hash + Copy,
    O: ?Sized,
{
    fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Upsert and return the normalised name
    fn store(&self, id: K, name: &str, value: &str) -> String {
        let name = name.to_lowercase();
        self.values
            .write()
            .entry(id)
            .or_default()
            .insert(name.clone(), value.to_string());
        name
    }

    fn retrieve(&self, id: &K, name: &str) -> Option<String> {
        self.values
            .read()
            .get(id)
            .and_then(|vars| vars.get(&name.to_lowercase()))
            .cloned()
    }

    fn snapshot(&self, id: &K) -> Option<Variables> {
        self.values.read().get(id).cloned()
    }

    fn ids(&self) -> Vec<K> {
        self.values.read().keys().copied().collect()
    }

    /// Observers in registration order, cloned so none are called under the lock
    fn observers(&self) -> Vec<Arc<O>> {
        self.observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    fn add_observer(&self, id: ObserverId, observer: Arc<O>) {
        self.observers.write().push((id, observer));
    }

    fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }
}

/// Cache of device variables with change notification
pub struct VariableCache {
    zones: Domain<ZoneId, dyn ZoneObserver>,
    sources: Domain<SourceId, dyn SourceObserver>,
    presets: Domain<PresetId, dyn PresetObserver>,
    next_observer_id: AtomicU64,
}

impl VariableCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            zones: Domain::new(),
            sources: Domain::new(),
            presets: Domain::new(),
            next_observer_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> ObserverId {
        ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed))
    }

    // === Store ===

    /// Apply a parsed state update
    pub fn apply(&self, update: &StateUpdate) {
        match update.target {
            UpdateTarget::Zone(zone) => self.store_zone(zone, &update.variable, &update.value),
            UpdateTarget::Source(source) => {
                self.store_source(source, &update.variable, &update.value);
            }
            UpdateTarget::Preset(preset) => {
                self.store_preset(preset, &update.variable, &update.value);
            }
        }
    }

    /// Store a zone variable and notify zone observers
    pub fn store_zone(&self, zone: ZoneId, name: &str, value: &str) {
        let name = self.zones.store(zone, name, value);
        tracing::debug!(target_id = %zone.device_str(), name, value, "Zone cache store");
        for observer in self.zones.observers() {
            observer.zone_changed(zone, &name, value);
        }
    }

    /// Store a source variable and notify source observers
    pub fn store_source(&self, source: SourceId, name: &str, value: &str) {
        let name = self.sources.store(source, name, value);
        tracing::debug!(target_id = %source.device_str(), name, value, "Source cache store");
        for observer in self.sources.observers() {
            observer.source_changed(source, &name, value);
        }
    }

    /// Store a preset variable and notify preset observers
    pub fn store_preset(&self, preset: PresetId, name: &str, value: &str) {
        let name = self.presets.store(preset, name, value);
        tracing::debug!(target_id = %preset.device_str(), name, value, "Preset cache store");
        for observer in self.presets.observers() {
            observer.preset_changed(preset, &name, value);
        }
    }

    // === Retrieve ===

    /// Look up a zone variable
    ///
    /// # Errors
    ///
    /// Returns `Uncached` if the zone or variable has not been seen.
    pub fn retrieve_zone(&self, zone: ZoneId, name: &str) -> Result<String, Uncached> {
        self.zones
            .retrieve(&zone, name)
            .ok_or_else(|| uncached(zone.device_str(), name))
    }

    /// Look up a source variable
    ///
    /// # Errors
    ///
    /// Returns `Uncached` if the source or variable has not been seen.
    pub fn retrieve_source(&self, source: SourceId, name: &str) -> Result<String, Uncached> {
        self.sources
            .retrieve(&source, name)
            .ok_or_else(|| uncached(source.device_str(), name))
    }

    /// Look up a preset variable
    ///
    /// # Errors
    ///
    /// Returns `Uncached` if the preset or variable has not been seen.
    pub fn retrieve_preset(&self, preset: PresetId, name: &str) -> Result<String, Uncached> {
        self.presets
            .retrieve(&preset, name)
            .ok_or_else(|| uncached(preset.device_str(), name))
    }

    /// All cached variables of a zone
    #[must_use]
    pub fn zone_variables(&self, zone: ZoneId) -> Option<Variables> {
        self.zones.snapshot(&zone)
    }

    /// All cached variables of a source
    #[must_use]
    pub fn source_variables(&self, source: SourceId) -> Option<Variables> {
        self.sources.snapshot(&source)
    }

    /// All cached variables of a preset
    #[must_use]
    pub fn preset_variables(&self, preset: PresetId) -> Option<Variables> {
        self.presets.snapshot(&preset)
    }

    /// Zones with at least one cached variable
    #[must_use]
    pub fn zones(&self) -> Vec<ZoneId> {
        self.zones.ids()
    }

    /// Sources with at least one cached variable
    #[must_use]
    pub fn sources(&self) -> Vec<SourceId> {
        self.sources.ids()
    }

    // === Observers ===

    /// Register a zone observer; observers fire in registration order
    pub fn add_zone_observer(&self, observer: impl ZoneObserver + 'static) -> ObserverId {
        let id = self.next_id();
        self.zones.add_observer(id, Arc::new(observer));
        id
    }

    /// Register a source observer
    pub fn add_source_observer(&self, observer: impl SourceObserver + 'static) -> ObserverId {
        let id = self.next_id();
        self.sources.add_observer(id, Arc::new(observer));
        id
    }

    /// Register a preset observer
    pub fn add_preset_observer(&self, observer: impl PresetObserver + 'static) -> ObserverId {
        let id = self.next_id();
        self.presets.add_observer(id, Arc::new(observer));
        id
    }

    /// Remove a zone observer, returning whether it was registered
    pub fn remove_zone_observer(&self, id: ObserverId) -> bool {
        self.zones.remove_observer(id)
    }

    /// Remove a source observer, returning whether it was registered
    pub fn remove_source_observer(&self, id: ObserverId) -> bool {
        self.sources.remove_observer(id)
    }

    /// Remove a preset observer, returning whether it was registered
    pub fn remove_preset_observer(&self, id: ObserverId) -> bool {
        self.presets.remove_observer(id)
    }
}

impl Default for VariableCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VariableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableCache")
            .field("zones", &self.zones.values.read().len())
            .field("sources", &self.sources.values.read().len())
            .field("presets", &self.presets.values.read().len())
            .finish_non_exhaustive()
    }
}

fn uncached(target: String, name: &str) -> Uncached {
    Uncached {
        target,
        variable: name.to_lowercase(),
    }
}
