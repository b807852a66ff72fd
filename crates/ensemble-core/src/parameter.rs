//! Parameter and property descriptors with normalized value storage.
//!
//! Parameter values are stored normalized in [0, 1] and converted to their
//! domain range through a preprocessor (linear, decibel or logarithmic
//! scaling). Values live in cache-line aligned atomics so the controller can
//! read and the realtime thread write without locks.
//!
//! # Example
//!
//! ```
//! use ensemble_core::parameter::{ParameterRange, ParameterScale};
//!
//! // Filter cutoff: 20 Hz to 20 kHz, logarithmic scaling
//! let cutoff = ParameterRange::new(20.0, 20_000.0, ParameterScale::Logarithmic);
//! let hz = cutoff.to_domain(0.5); // ~632 Hz (geometric mean)
//! let back = cutoff.to_normalized(hz); // ~0.5
//! # assert!((back - 0.5).abs() < 1e-4);
//! ```

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use atomic_float::AtomicF32;
use parking_lot::Mutex;

use crate::types::{next_object_id, ObjectId};

/// Value domain of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Float,
    Int,
    Bool,
}

/// How a normalized value maps to the parameter's domain range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ParameterScale {
    /// `domain = min + normalized * (max - min)`
    #[default]
    Linear,
    /// Domain expressed in dB; the processed value is the linear gain
    /// `10^(domain / 20)`.
    Decibel,
    /// `domain = min * (max / min)^normalized`. Requires `min > 0`.
    Logarithmic,
}

/// Domain range plus scaling for one parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParameterRange {
    pub min: f32,
    pub max: f32,
    pub scale: ParameterScale,
}

impl ParameterRange {
    pub fn new(min: f32, max: f32, scale: ParameterScale) -> Self {
        debug_assert!(max > min, "max must be greater than min");
        if scale == ParameterScale::Logarithmic {
            debug_assert!(min > 0.0, "logarithmic scale requires min > 0");
        }
        Self { min, max, scale }
    }

    pub fn linear(min: f32, max: f32) -> Self {
        Self::new(min, max, ParameterScale::Linear)
    }

    pub fn decibel(min: f32, max: f32) -> Self {
        Self::new(min, max, ParameterScale::Decibel)
    }

    /// Convert a normalized value (clamped to [0, 1]) into the domain range.
    #[inline]
    pub fn to_domain(&self, normalized: f32) -> f32 {
        let normalized = normalized.clamp(0.0, 1.0);
        match self.scale {
            ParameterScale::Linear | ParameterScale::Decibel => {
                self.min + normalized * (self.max - self.min)
            }
            ParameterScale::Logarithmic => {
                let log_min = self.min.ln();
                let log_max = self.max.ln();
                (log_min + normalized * (log_max - log_min)).exp()
            }
        }
    }

    /// Convert a domain value (clamped to the range) back to normalized.
    #[inline]
    pub fn to_normalized(&self, value: f32) -> f32 {
        let value = value.clamp(self.min, self.max);
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0.0;
        }
        match self.scale {
            ParameterScale::Linear | ParameterScale::Decibel => (value - self.min) / span,
            ParameterScale::Logarithmic => {
                let log_min = self.min.ln();
                let log_max = self.max.ln();
                (value.ln() - log_min) / (log_max - log_min)
            }
        }
    }

    /// The value the DSP consumes: linear gain for decibel scaling, the
    /// domain value otherwise.
    #[inline]
    pub fn to_processed(&self, normalized: f32) -> f32 {
        let domain = self.to_domain(normalized);
        match self.scale {
            ParameterScale::Decibel => 10.0_f32.powf(domain / 20.0),
            _ => domain,
        }
    }
}

impl Default for ParameterRange {
    fn default() -> Self {
        Self::linear(0.0, 1.0)
    }
}

/// Static description of one parameter.
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub unit: String,
    pub kind: ParameterType,
    pub range: ParameterRange,
    pub automatable: bool,
}

struct ParameterSlot {
    descriptor: ParameterDescriptor,
    // Normalized value, written by the realtime side and read anywhere.
    normalized: AtomicF32,
}

/// Static description of one string-valued property.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
}

struct PropertySlot {
    descriptor: PropertyDescriptor,
    value: Mutex<String>,
}

/// Parameter and property storage for one processor.
///
/// The set of parameters is fixed at construction time; only values change
/// afterwards, so the store can be shared across threads behind an `Arc`
/// without locking the descriptor tables.
#[derive(Default)]
pub struct ParameterStore {
    parameters: Vec<ParameterSlot>,
    parameter_index: HashMap<ObjectId, usize>,
    properties: Vec<PropertySlot>,
    property_index: HashMap<ObjectId, usize>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a float parameter, returning its id. `default` is a domain
    /// value.
    pub fn register_float(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default: f32,
        range: ParameterRange,
        automatable: bool,
    ) -> ObjectId {
        self.register(name, label, unit, ParameterType::Float, default, range, automatable)
    }

    /// Register an int parameter with an inclusive domain range.
    pub fn register_int(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default: i32,
        min: i32,
        max: i32,
        automatable: bool,
    ) -> ObjectId {
        self.register(
            name,
            label,
            unit,
            ParameterType::Int,
            default as f32,
            ParameterRange::linear(min as f32, max as f32),
            automatable,
        )
    }

    /// Register a bool parameter.
    pub fn register_bool(&mut self, name: &str, label: &str, default: bool, automatable: bool) -> ObjectId {
        self.register(
            name,
            label,
            "",
            ParameterType::Bool,
            if default { 1.0 } else { 0.0 },
            ParameterRange::linear(0.0, 1.0),
            automatable,
        )
    }

    fn register(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        kind: ParameterType,
        default_domain: f32,
        range: ParameterRange,
        automatable: bool,
    ) -> ObjectId {
        debug_assert!(
            !self.parameters.iter().any(|p| p.descriptor.name == name),
            "duplicate parameter name {name:?}"
        );
        let id = next_object_id();
        let descriptor = ParameterDescriptor {
            id,
            name: name.to_owned(),
            label: label.to_owned(),
            unit: unit.to_owned(),
            kind,
            range,
            automatable,
        };
        let normalized = AtomicF32::new(range.to_normalized(default_domain));
        self.parameter_index.insert(id, self.parameters.len());
        self.parameters.push(ParameterSlot { descriptor, normalized });
        id
    }

    /// Register a string property, returning its id.
    pub fn register_property(&mut self, name: &str, label: &str, default: &str) -> ObjectId {
        let id = next_object_id();
        let descriptor = PropertyDescriptor {
            id,
            name: name.to_owned(),
            label: label.to_owned(),
        };
        self.property_index.insert(id, self.properties.len());
        self.properties.push(PropertySlot {
            descriptor,
            value: Mutex::new(default.to_owned()),
        });
        id
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.parameters.iter().map(|p| &p.descriptor)
    }

    pub fn property_descriptors(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().map(|p| &p.descriptor)
    }

    pub fn descriptor(&self, id: ObjectId) -> Option<&ParameterDescriptor> {
        self.parameter_index.get(&id).map(|&i| &self.parameters[i].descriptor)
    }

    pub fn parameter_id(&self, name: &str) -> Option<ObjectId> {
        self.parameters
            .iter()
            .find(|p| p.descriptor.name == name)
            .map(|p| p.descriptor.id)
    }

    pub fn property_id(&self, name: &str) -> Option<ObjectId> {
        self.properties
            .iter()
            .find(|p| p.descriptor.name == name)
            .map(|p| p.descriptor.id)
    }

    /// Set a parameter from a normalized value. Clamped; returns false for an
    /// unknown id.
    pub fn set_normalized(&self, id: ObjectId, value: f32) -> bool {
        match self.parameter_index.get(&id) {
            Some(&i) => {
                self.parameters[i]
                    .normalized
                    .store(value.clamp(0.0, 1.0), Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn normalized(&self, id: ObjectId) -> Option<f32> {
        self.parameter_index
            .get(&id)
            .map(|&i| self.parameters[i].normalized.load(Ordering::Acquire))
    }

    /// Current value converted into the parameter's domain range.
    pub fn domain_value(&self, id: ObjectId) -> Option<f32> {
        self.parameter_index.get(&id).map(|&i| {
            let slot = &self.parameters[i];
            slot.descriptor.range.to_domain(slot.normalized.load(Ordering::Acquire))
        })
    }

    /// Value the DSP consumes (dB parameters report linear gain).
    pub fn processed_value(&self, id: ObjectId) -> Option<f32> {
        self.parameter_index.get(&id).map(|&i| {
            let slot = &self.parameters[i];
            slot.descriptor.range.to_processed(slot.normalized.load(Ordering::Acquire))
        })
    }

    /// Human-readable rendering of the current domain value.
    pub fn value_as_string(&self, id: ObjectId) -> Option<String> {
        self.parameter_index.get(&id).map(|&i| {
            let slot = &self.parameters[i];
            let domain = slot.descriptor.range.to_domain(slot.normalized.load(Ordering::Acquire));
            match slot.descriptor.kind {
                ParameterType::Float if slot.descriptor.unit.is_empty() => format!("{domain:.3}"),
                ParameterType::Float => format!("{domain:.3} {}", slot.descriptor.unit),
                ParameterType::Int => format!("{}", domain.round() as i64),
                ParameterType::Bool => if domain >= 0.5 { "on".into() } else { "off".into() },
            }
        })
    }

    pub fn set_property(&self, id: ObjectId, value: &str) -> bool {
        match self.property_index.get(&id) {
            Some(&i) => {
                *self.properties[i].value.lock() = value.to_owned();
                true
            }
            None => false,
        }
    }

    pub fn property_value(&self, id: ObjectId) -> Option<String> {
        self.property_index.get(&id).map(|&i| self.properties[i].value.lock().clone())
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_linear_round_trip() {
        let range = ParameterRange::linear(0.0, 2.0);
        assert!(approx_eq(range.to_domain(0.5), 1.0));
        assert!(approx_eq(range.to_normalized(1.0), 0.5));
        assert!(approx_eq(range.to_processed(0.5), 1.0));
    }

    #[test]
    fn test_logarithmic_midpoint_is_geometric_mean() {
        let range = ParameterRange::new(20.0, 20_000.0, ParameterScale::Logarithmic);
        let mid = range.to_domain(0.5);
        let expected = (20.0_f32 * 20_000.0).sqrt();
        assert!((mid - expected).abs() / expected < 1e-3);
        assert!(approx_eq(range.to_domain(0.0), 20.0));
        assert!((range.to_domain(1.0) - 20_000.0).abs() < 1.0);
    }

    #[test]
    fn test_decibel_processed_value() {
        let range = ParameterRange::decibel(-120.0, 24.0);
        // 0 dB maps to unity gain.
        let normalized = range.to_normalized(0.0);
        assert!(approx_eq(range.to_processed(normalized), 1.0));
        // -6 dB is roughly half amplitude.
        let normalized = range.to_normalized(-6.0);
        assert!((range.to_processed(normalized) - 0.501).abs() < 0.01);
    }

    #[test]
    fn test_set_then_get_is_clamped() {
        let mut store = ParameterStore::new();
        let id = store.register_float("gain", "Gain", "", 1.0, ParameterRange::linear(0.0, 2.0), true);

        assert!(store.set_normalized(id, 1.5));
        assert_eq!(store.normalized(id), Some(1.0));
        assert!(store.set_normalized(id, -0.25));
        assert_eq!(store.normalized(id), Some(0.0));
    }

    #[test]
    fn test_unknown_parameter_id() {
        let store = ParameterStore::new();
        assert!(!store.set_normalized(9999, 0.5));
        assert_eq!(store.normalized(9999), None);
        assert_eq!(store.domain_value(9999), None);
    }

    #[test]
    fn test_lookup_by_name() {
        let mut store = ParameterStore::new();
        let gain = store.register_float("gain", "Gain", "", 1.0, ParameterRange::linear(0.0, 2.0), true);
        let pan = store.register_float("pan", "Pan", "", 0.0, ParameterRange::linear(-1.0, 1.0), true);

        assert_eq!(store.parameter_id("gain"), Some(gain));
        assert_eq!(store.parameter_id("pan"), Some(pan));
        assert_eq!(store.parameter_id("missing"), None);
    }

    #[test]
    fn test_value_as_string() {
        let mut store = ParameterStore::new();
        let toggle = store.register_bool("mute", "Mute", false, true);
        let steps = store.register_int("mode", "Mode", "", 2, 0, 7, false);

        assert_eq!(store.value_as_string(toggle).as_deref(), Some("off"));
        store.set_normalized(toggle, 1.0);
        assert_eq!(store.value_as_string(toggle).as_deref(), Some("on"));
        assert_eq!(store.value_as_string(steps).as_deref(), Some("2"));
    }

    #[test]
    fn test_properties() {
        let mut store = ParameterStore::new();
        let id = store.register_property("program_name", "Program Name", "init");
        assert_eq!(store.property_value(id).as_deref(), Some("init"));
        assert!(store.set_property(id, "warm pad"));
        assert_eq!(store.property_value(id).as_deref(), Some("warm pad"));
        assert!(!store.set_property(9999, "x"));
    }
}
