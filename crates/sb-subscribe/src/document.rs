//! Ordered top-level configuration document.
//!
//! sing-box reads `endpoints` right after `outbounds`, so section order is
//! part of the output contract and is kept explicitly instead of relying on
//! map insertion order.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::model::{Result, SubsError};

/// Relative order of the well-known sections.
pub const SECTION_ORDER: &[&str] = &[
    "log",
    "dns",
    "ntp",
    "experimental",
    "inbounds",
    "outbounds",
    "endpoints",
    "route",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    sections: Vec<(String, Value)>,
}

impl ConfigDocument {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            sections: map.into_iter().collect(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(SubsError::Config(format!(
                "template must be an object, got {}",
                kind_of(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.sections.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.sections
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Replace in place, or append when absent.
    pub fn set(&mut self, key: &str, value: Value) {
        match self.get_mut(key) {
            Some(slot) => *slot = value,
            None => self.sections.push((key.to_string(), value)),
        }
    }

    /// Insert (or move) `key` directly after `anchor`; appends if `anchor` is missing.
    pub fn insert_after(&mut self, anchor: &str, key: &str, value: Value) {
        self.remove(key);
        let at = self
            .sections
            .iter()
            .position(|(k, _)| k == anchor)
            .map_or(self.sections.len(), |i| i + 1);
        self.sections.insert(at, (key.to_string(), value));
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.sections.iter().position(|(k, _)| k == key)?;
        Some(self.sections.remove(idx).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(k, _)| k.as_str())
    }

    /// Reorder well-known sections into [`SECTION_ORDER`] within the slots they
    /// already occupy; unknown sections keep their positions. `endpoints`, when
    /// present, is then pinned right after `outbounds`.
    pub fn canonicalize(&mut self) {
        let rank = |k: &str| SECTION_ORDER.iter().position(|s| *s == k);
        let slots: Vec<usize> = self
            .sections
            .iter()
            .enumerate()
            .filter(|(_, (k, _))| rank(k).is_some())
            .map(|(i, _)| i)
            .collect();
        let mut known: Vec<(String, Value)> = slots
            .iter()
            .map(|&i| std::mem::take(&mut self.sections[i]))
            .collect();
        known.sort_by_key(|(k, _)| rank(k));
        for (slot, entry) in slots.into_iter().zip(known) {
            self.sections[slot] = entry;
        }
        if self.get("outbounds").is_some() {
            if let Some(endpoints) = self.remove("endpoints") {
                self.insert_after("outbounds", "endpoints", endpoints);
            }
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.sections.into_iter().collect())
    }
}

impl Serialize for ConfigDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sections.len()))?;
        for (k, v) in &self.sections {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
