//! Input validation for writes
//!
//! Turns one JSON item into a [`ValidatedItem`]: the writes to apply keyed by
//! source path, with relation values already converted to record keys.

use crate::core::error::{FieldValidationError, ValidationError};
use crate::core::field::{FieldKind, FieldSpec, Setter};
use crate::core::record::{Record, RecordId, RecordKey, Relation, WriteValue};
use crate::core::resolver::{FieldResolver, WriteContext};
use crate::core::schema::{PK_FIELD, ResourceSchema};
use indexmap::IndexMap;
use serde_json::{Map, Value};

pub const REQUIRED_MESSAGE: &str = "This field is required.";

/// One field write
#[derive(Clone)]
pub struct FieldWrite {
    pub name: String,
    pub source: String,
    pub value: WriteValue,
    setter: Option<Setter>,
}

impl std::fmt::Debug for FieldWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldWrite")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("value", &self.value)
            .field("setter", &self.setter.is_some())
            .finish()
    }
}

/// A validated input item
#[derive(Debug, Clone, Default)]
pub struct ValidatedItem {
    /// The `id` carried by the item, if any
    pub id: Option<RecordId>,
    pub writes: Vec<FieldWrite>,
}

impl ValidatedItem {
    /// Apply every write to `record`
    pub fn apply_to(&self, record: &mut Record) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        for write in &self.writes {
            match &write.setter {
                Some(setter) => {
                    if let Err(message) = setter(record, write.value.to_json()) {
                        errors.push(FieldValidationError::new(&write.name, message));
                    }
                }
                None => record.apply(&write.source, &write.value),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::FieldErrors(errors))
        }
    }

    /// Source path to value, for bulk statements
    pub fn values(&self) -> IndexMap<String, WriteValue> {
        self.writes
            .iter()
            .map(|w| (w.source.clone(), w.value.clone()))
            .collect()
    }
}

/// Validates write payloads for one resource
pub struct ItemValidator<'s> {
    resolver: FieldResolver<'s>,
    schema: &'s ResourceSchema,
}

impl<'s> ItemValidator<'s> {
    pub fn new(resolver: FieldResolver<'s>, schema: &'s ResourceSchema) -> Self {
        Self { resolver, schema }
    }

    /// Validate a create or update item.
    ///
    /// Unknown and read-only keys are ignored. Unless `partial` is set,
    /// required fields missing from the item are reported.
    pub fn validate(
        &self,
        item: &Value,
        context: WriteContext,
        partial: bool,
    ) -> Result<ValidatedItem, ValidationError> {
        let object = as_object(item)?;
        let mut validated = ValidatedItem {
            id: object.get(PK_FIELD).and_then(RecordId::from_value),
            writes: Vec::new(),
        };
        let mut errors = Vec::new();

        for (name, value) in object {
            if name == PK_FIELD {
                continue;
            }
            let spec = match self.resolver.writable_field(self.schema, name, context) {
                Ok(Some(spec)) => spec,
                Ok(None) => continue,
                Err(e) => {
                    errors.push(FieldValidationError::new(name, e.to_string()));
                    continue;
                }
            };
            match convert(spec, value.clone()) {
                Ok(write) => validated.writes.push(write),
                Err(message) => errors.push(FieldValidationError::new(name, message)),
            }
        }

        if !partial {
            for spec in self.schema.fields().filter(|s| s.required) {
                if object.contains_key(&spec.name) {
                    continue;
                }
                if let Ok(Some(_)) = self.resolver.writable_field(self.schema, &spec.name, context)
                {
                    errors.push(FieldValidationError::new(&spec.name, REQUIRED_MESSAGE));
                }
            }
        }

        if errors.is_empty() {
            Ok(validated)
        } else {
            Err(ValidationError::FieldErrors(errors))
        }
    }

    /// Validate a patch-all payload, which must be an object of writable keys
    pub fn validate_patch_all(&self, payload: &Value) -> Result<ValidatedItem, ValidationError> {
        let Value::Object(object) = payload else {
            return Err(ValidationError::Invalid(
                "Patch-all data must be in object form".to_string(),
            ));
        };

        let mut validated = ValidatedItem::default();
        let mut errors = Vec::new();
        for (name, value) in object {
            let Some(spec) =
                self.resolver
                    .writable_field(self.schema, name, WriteContext::PatchAll)?
            else {
                continue;
            };
            match convert(spec, value.clone()) {
                Ok(write) => validated.writes.push(write),
                Err(message) => errors.push(FieldValidationError::new(name, message)),
            }
        }

        if errors.is_empty() {
            Ok(validated)
        } else {
            Err(ValidationError::FieldErrors(errors))
        }
    }
}

fn as_object(item: &Value) -> Result<&Map<String, Value>, ValidationError> {
    match item {
        Value::Object(object) => Ok(object),
        other => Err(ValidationError::Invalid(format!(
            "Invalid data. Expected an object, but got {}.",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn convert(spec: &FieldSpec, value: Value) -> Result<FieldWrite, String> {
    let value = spec.clean(value)?;
    let write = match spec.kind {
        FieldKind::RelationOne => WriteValue::Relation(Relation::One(related_key(spec, &value)?)),
        FieldKind::RelationMany => {
            let Value::Array(items) = &value else {
                return Err(format!(
                    "Expected a list of items but got type \"{}\".",
                    json_type(&value)
                ));
            };
            let keys = items
                .iter()
                .map(|item| {
                    related_key(spec, item)?.ok_or_else(|| "This field may not be null.".to_string())
                })
                .collect::<Result<Vec<_>, _>>()?;
            WriteValue::Relation(Relation::Many(keys))
        }
        FieldKind::GenericRelation => WriteValue::Relation(Relation::One(generic_key(&value)?)),
        _ => WriteValue::Attribute(value),
    };

    Ok(FieldWrite {
        name: spec.name.clone(),
        source: spec.source.clone(),
        value: write,
        setter: spec.setter.clone(),
    })
}

/// A pk value, or an object carrying one, for a typed relation
fn related_key(spec: &FieldSpec, value: &Value) -> Result<Option<RecordKey>, String> {
    if value.is_null() {
        return Ok(None);
    }
    let related = spec.related_type.as_deref().unwrap_or_default();
    let id = match value {
        Value::Object(object) => object.get(PK_FIELD).and_then(RecordId::from_value),
        other => RecordId::from_value(other),
    };
    match id {
        Some(id) => Ok(Some(RecordKey {
            type_name: related.to_string(),
            id,
        })),
        None => Err(format!(
            "Incorrect type. Expected pk value, received {}.",
            json_type(value)
        )),
    }
}

fn generic_key(value: &Value) -> Result<Option<RecordKey>, String> {
    if value.is_null() {
        return Ok(None);
    }
    let type_name = value.get("type").and_then(Value::as_str);
    let id = value.get(PK_FIELD).and_then(RecordId::from_value);
    match (type_name, id) {
        (Some(type_name), Some(id)) => Ok(Some(RecordKey::new(type_name, id))),
        _ => Err("Expected an object with \"type\" and \"id\".".to_string()),
    }
}
