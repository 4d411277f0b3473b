//! Response envelope

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Root section of an envelope
#[derive(Debug, Clone, PartialEq)]
pub enum RootData {
    One(Value),
    Many(Vec<Value>),
}

/// Root entries, deduplicated related objects and metadata.
///
/// Serializes as `{"<root_key>": ..., "linked": {...}, "meta": {...},
/// "errors": [...]}`, leaving out empty sections.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub root_key: String,
    pub root: RootData,
    /// Type name to entries, in first-seen order
    pub linked: IndexMap<String, Vec<Value>>,
    pub meta: Map<String, Value>,
    pub errors: Vec<Value>,
}

impl Envelope {
    pub fn many(root_key: impl Into<String>, entries: Vec<Value>) -> Self {
        Self::new(root_key, RootData::Many(entries))
    }

    pub fn one(root_key: impl Into<String>, entry: Value) -> Self {
        Self::new(root_key, RootData::One(entry))
    }

    fn new(root_key: impl Into<String>, root: RootData) -> Self {
        Self {
            root_key: root_key.into(),
            root,
            linked: IndexMap::new(),
            meta: Map::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn with_errors(mut self, errors: Vec<Value>) -> Self {
        self.errors = errors;
        self
    }

    pub fn root_entries(&self) -> Vec<&Value> {
        match &self.root {
            RootData::One(v) => vec![v],
            RootData::Many(vs) => vs.iter().collect(),
        }
    }

    pub fn linked_of(&self, type_name: &str) -> &[Value] {
        self.linked.get(type_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.root {
            RootData::One(v) => map.serialize_entry(&self.root_key, v)?,
            RootData::Many(vs) => map.serialize_entry(&self.root_key, vs)?,
        }
        if !self.linked.is_empty() {
            map.serialize_entry("linked", &self.linked)?;
        }
        if !self.meta.is_empty() {
            map.serialize_entry("meta", &self.meta)?;
        }
        if !self.errors.is_empty() {
            map.serialize_entry("errors", &self.errors)?;
        }
        map.end()
    }
}
