//! Attribute bags attached to nodes.
//!
//! The graph construction collaborator stores whatever metadata it extracted
//! (source locations, metrics, flags) here. The reflexion engine never reads
//! these values; ordered maps keep iteration deterministic.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Typed attribute storage: strings, floats, ints and boolean toggles.
///
/// A toggle is either present (set) or absent (unset).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    strings: BTreeMap<String, String>,
    floats: BTreeMap<String, f32>,
    ints: BTreeMap<String, i64>,
    toggles: BTreeSet<String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.strings.insert(name.into(), value.into());
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.strings.get(name).map(String::as_str)
    }

    pub fn set_float(&mut self, name: impl Into<String>, value: f32) {
        self.floats.insert(name.into(), value);
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.floats.get(name).copied()
    }

    pub fn set_int(&mut self, name: impl Into<String>, value: i64) {
        self.ints.insert(name.into(), value);
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.ints.get(name).copied()
    }

    /// Sets or clears a toggle.
    pub fn set_toggle(&mut self, name: impl Into<String>, on: bool) {
        let name = name.into();
        if on {
            self.toggles.insert(name);
        } else {
            self.toggles.remove(&name);
        }
    }

    pub fn has_toggle(&self, name: &str) -> bool {
        self.toggles.contains(name)
    }

    /// Returns `true` if no attribute of any kind is set.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
            && self.floats.is_empty()
            && self.ints.is_empty()
            && self.toggles.is_empty()
    }
}
