//! Static field declarations
//!
//! A [`FieldSpec`] is declared once per resource at configuration time and
//! never changes afterwards. The resolver reads these tables to decide what a
//! request renders and what a write may touch.

use crate::core::record::{Record, RecordGraph};
use crate::core::validation::{InputFilter, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Source path meaning "the whole record"
pub const WILDCARD_SOURCE: &str = "*";

/// Computes a field value from a record and the fetched graph
pub type Getter = Arc<dyn Fn(&Record, &RecordGraph) -> Value + Send + Sync>;

/// Writes an input value onto a record (wildcard fields only)
pub type Setter = Arc<dyn Fn(&mut Record, Value) -> Result<(), String> + Send + Sync>;

/// How a field is rendered and written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Plain,
    Computed,
    RelationOne,
    RelationMany,
    GenericRelation,
    Count,
}

impl FieldKind {
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            FieldKind::RelationOne | FieldKind::RelationMany | FieldKind::GenericRelation
        )
    }
}

/// Declaration of one field of a resource
#[derive(Clone)]
pub struct FieldSpec {
    pub name: String,
    pub source: String,
    pub kind: FieldKind,
    pub deferred: Option<bool>,
    pub immutable: bool,
    pub read_only: bool,
    pub embed: bool,
    pub required: bool,
    pub requires: Vec<String>,
    pub related_type: Option<String>,
    pub getter: Option<Getter>,
    pub setter: Option<Setter>,
    pub validators: Vec<Validator>,
    pub filters: Vec<InputFilter>,
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("kind", &self.kind)
            .field("deferred", &self.deferred)
            .field("immutable", &self.immutable)
            .field("read_only", &self.read_only)
            .field("embed", &self.embed)
            .field("related_type", &self.related_type)
            .finish_non_exhaustive()
    }
}

impl FieldSpec {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            name,
            kind,
            deferred: None,
            immutable: false,
            read_only: false,
            embed: false,
            required: false,
            requires: Vec::new(),
            related_type: None,
            getter: None,
            setter: None,
            validators: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// A plain attribute field
    pub fn plain(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Plain)
    }

    /// A to-one relation to `related_type`
    pub fn relation_one(name: impl Into<String>, related_type: impl Into<String>) -> Self {
        let mut spec = Self::new(name, FieldKind::RelationOne);
        spec.related_type = Some(related_type.into());
        spec
    }

    /// A to-many relation to `related_type`
    pub fn relation_many(name: impl Into<String>, related_type: impl Into<String>) -> Self {
        let mut spec = Self::new(name, FieldKind::RelationMany);
        spec.related_type = Some(related_type.into());
        spec
    }

    /// A to-one relation whose target type is only known per record
    pub fn generic_relation(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::GenericRelation)
    }

    /// Number of distinct related objects (or list items) behind `source`
    pub fn count(name: impl Into<String>, source: impl Into<String>) -> Self {
        let mut spec = Self::new(name, FieldKind::Count);
        spec.source = source.into();
        spec.read_only = true;
        spec
    }

    /// A read-only value computed by `getter`
    pub fn computed<F>(name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Record, &RecordGraph) -> Value + Send + Sync + 'static,
    {
        let mut spec = Self::new(name, FieldKind::Computed);
        spec.getter = Some(Arc::new(getter));
        spec.read_only = true;
        spec
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = Some(deferred);
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn embed(mut self) -> Self {
        self.embed = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Declare a dotted path that must be prefetched for this field to render
    pub fn requires(mut self, path: impl Into<String>) -> Self {
        self.requires.push(path.into());
        self
    }

    /// Attach a custom getter; for wildcard sources this renders the field
    pub fn getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(&Record, &RecordGraph) -> Value + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Attach a setter, making a wildcard field writable
    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&mut Record, Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str, Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.source == WILDCARD_SOURCE
    }

    pub fn is_relation(&self) -> bool {
        self.kind.is_relation()
    }

    /// Whether the source walks through other records (`a.b`)
    pub fn is_dotted(&self) -> bool {
        !self.is_wildcard() && self.source.contains('.')
    }

    /// Effective deferral given the resource-level default for to-many relations
    pub fn is_deferred(&self, defer_many_relations: bool) -> bool {
        match self.deferred {
            Some(deferred) => deferred,
            None => self.kind == FieldKind::RelationMany && defer_many_relations,
        }
    }

    /// Run filters then validators over a supplied value
    pub fn clean(&self, value: Value) -> Result<Value, String> {
        let mut value = value;
        for filter in &self.filters {
            value = filter(&self.name, value)?;
        }
        for validator in &self.validators {
            validator(&self.name, &value)?;
        }
        Ok(value)
    }
}
