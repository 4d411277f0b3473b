//! Records, record keys and the request-scoped record graph
//!
//! Records never own their related objects. A relation holds [`RecordKey`]s
//! and the [`RecordGraph`] maps keys to the records fetched for the current
//! request, so shared and cyclic references need no special handling.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl RecordId {
    /// Parse an identifier as it appears in a URL or query parameter
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => RecordId::Int(n),
            Err(_) => RecordId::Str(raw.to_string()),
        }
    }

    /// Read an identifier out of a JSON payload value
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) if !s.is_empty() => Some(RecordId::parse(s)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(n) => Value::from(*n),
            RecordId::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Int(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Str(s.to_string())
    }
}

/// Identity of a record: its type name plus its identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub type_name: String,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(type_name: impl Into<String>, id: impl Into<RecordId>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

/// A named relation on a record
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    One(Option<RecordKey>),
    Many(Vec<RecordKey>),
}

impl Relation {
    /// All keys referenced by this relation
    pub fn keys(&self) -> Vec<&RecordKey> {
        match self {
            Relation::One(key) => key.iter().collect(),
            Relation::Many(keys) => keys.iter().collect(),
        }
    }
}

/// A record as fetched from, or written to, the data store
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub type_name: String,
    pub id: Option<RecordId>,
    pub attributes: Map<String, Value>,
    pub relations: IndexMap<String, Relation>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            attributes: Map::new(),
            relations: IndexMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_one(mut self, name: impl Into<String>, target: Option<RecordKey>) -> Self {
        self.relations.insert(name.into(), Relation::One(target));
        self
    }

    pub fn with_many(mut self, name: impl Into<String>, targets: Vec<RecordKey>) -> Self {
        self.relations.insert(name.into(), Relation::Many(targets));
        self
    }

    /// The identity of this record, once it has been assigned an id
    pub fn key(&self) -> Option<RecordKey> {
        self.id.as_ref().map(|id| RecordKey {
            type_name: self.type_name.clone(),
            id: id.clone(),
        })
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    /// Apply one resolved write to this record
    pub fn apply(&mut self, source: &str, value: &WriteValue) {
        match value {
            WriteValue::Attribute(v) => {
                self.attributes.insert(source.to_string(), v.clone());
            }
            WriteValue::Relation(r) => {
                self.relations.insert(source.to_string(), r.clone());
            }
        }
    }
}

/// A value destined for a record attribute or relation
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Attribute(Value),
    Relation(Relation),
}

impl WriteValue {
    /// JSON form of the value, used when reporting attempted data
    pub fn to_json(&self) -> Value {
        match self {
            WriteValue::Attribute(v) => v.clone(),
            WriteValue::Relation(Relation::One(key)) => key
                .as_ref()
                .map(|k| k.id.to_value())
                .unwrap_or(Value::Null),
            WriteValue::Relation(Relation::Many(keys)) => {
                Value::Array(keys.iter().map(|k| k.id.to_value()).collect())
            }
        }
    }
}

/// Request-scoped arena of fetched records, keyed by identity
#[derive(Debug, Clone, Default)]
pub struct RecordGraph {
    records: IndexMap<RecordKey, Record>,
}

impl RecordGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; records without an id are ignored
    pub fn insert(&mut self, record: Record) {
        if let Some(key) = record.key() {
            self.records.insert(key, record);
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.insert(record);
        }
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolve a dotted source path against a record.
    ///
    /// Segments walk relations through the graph and then into attribute
    /// JSON. A to-many relation fans out into an array. Any segment that
    /// cannot be followed yields `null` rather than an error.
    pub fn resolve_path(&self, record: &Record, path: &str) -> Value {
        if path == "*" {
            return Value::Object(record.attributes.clone());
        }
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        self.resolve_segments(record, &segments)
    }

    fn resolve_segments(&self, record: &Record, segments: &[&str]) -> Value {
        let Some((head, rest)) = segments.split_first() else {
            return Value::Null;
        };

        if let Some(value) = record.attr(head) {
            return descend_json(value, rest);
        }

        if let Some(relation) = record.relation(head) {
            return match relation {
                Relation::One(None) => Value::Null,
                Relation::One(Some(key)) => {
                    if rest.is_empty() {
                        return key.id.to_value();
                    }
                    match self.get(key) {
                        Some(target) => self.resolve_segments(target, rest),
                        None => Value::Null,
                    }
                }
                Relation::Many(keys) => {
                    if rest.is_empty() {
                        return Value::Array(keys.iter().map(|k| k.id.to_value()).collect());
                    }
                    Value::Array(
                        keys.iter()
                            .filter_map(|k| self.get(k))
                            .map(|target| self.resolve_segments(target, rest))
                            .collect(),
                    )
                }
            };
        }

        if (*head == "id" || *head == "pk") && rest.is_empty() {
            return record.id.as_ref().map(RecordId::to_value).unwrap_or(Value::Null);
        }

        Value::Null
    }

    /// Follow a dotted relation path and return the keys it reaches
    pub fn follow(&self, record: &Record, path: &str) -> Option<Relation> {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let (last, prefix) = segments.split_last()?;

        let mut frontier: Vec<&Record> = vec![record];
        for segment in prefix {
            let mut next = Vec::new();
            for current in frontier {
                if let Some(relation) = current.relation(segment) {
                    next.extend(relation.keys().into_iter().filter_map(|k| self.get(k)));
                }
            }
            frontier = next;
        }

        if prefix.is_empty() {
            return record.relation(last).cloned();
        }

        let mut keys = Vec::new();
        for current in frontier {
            if let Some(relation) = current.relation(last) {
                keys.extend(relation.keys().into_iter().cloned());
            }
        }
        Some(Relation::Many(keys))
    }
}

fn descend_json(value: &Value, rest: &[&str]) -> Value {
    let mut current = value;
    for segment in rest {
        match current.get(*segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}
