//! Resource schemas and the registry that links them

use crate::core::field::{FieldKind, FieldSpec};
use crate::core::pluralize::Pluralizer;
use indexmap::IndexMap;
use std::sync::Arc;

/// Name of the implicit primary key field
pub const PK_FIELD: &str = "id";

/// Static field table of one resource type
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub name: String,
    pub plural: String,
    pub defer_many_relations: Option<bool>,
    fields: IndexMap<String, FieldSpec>,
}

impl ResourceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut fields = IndexMap::new();
        fields.insert(PK_FIELD.to_string(), FieldSpec::plain(PK_FIELD).read_only());
        Self {
            plural: Pluralizer::pluralize(&name),
            name,
            defer_many_relations: None,
            fields,
        }
    }

    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    pub fn defer_many_relations(mut self, defer: bool) -> Self {
        self.defer_many_relations = Some(defer);
        self
    }

    /// Declare a field. A repeated name replaces the earlier declaration.
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.add_field(spec);
        self
    }

    pub fn add_field(&mut self, spec: FieldSpec) {
        if spec.name != PK_FIELD && self.fields.contains_key(&spec.name) {
            tracing::warn!(
                "Field '{}' declared more than once on '{}'; keeping the last declaration",
                spec.name,
                self.name
            );
        }
        // keep the original position so rendering order stays stable
        self.fields.insert(spec.name.clone(), spec);
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Resource-level deferral default for to-many relations
    pub fn defers_many(&self, global_default: bool) -> bool {
        self.defer_many_relations.unwrap_or(global_default)
    }

    /// Relation fields, in declaration order
    pub fn relations(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values().filter(|f| f.kind.is_relation())
    }

    /// The field (if any) whose source is exactly `source`
    pub fn field_by_source(&self, source: &str) -> Option<&FieldSpec> {
        self.fields
            .values()
            .find(|f| f.source == source && f.kind != FieldKind::Count)
    }
}

/// Lookup of schemas by singular name and by plural
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: IndexMap<String, Arc<ResourceSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ResourceSchema) -> Arc<ResourceSchema> {
        if self.schemas.contains_key(&schema.name) {
            tracing::warn!("Resource '{}' registered twice; replacing", schema.name);
        }
        let schema = Arc::new(schema);
        self.schemas.insert(schema.name.clone(), schema.clone());
        schema
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ResourceSchema>> {
        self.schemas.get(name)
    }

    pub fn get_by_plural(&self, plural: &str) -> Option<&Arc<ResourceSchema>> {
        self.schemas.values().find(|s| s.plural == plural)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<ResourceSchema>> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pk_is_first_and_read_only() {
        let schema = ResourceSchema::new("dog").field(FieldSpec::plain("name"));
        let names: Vec<&str> = schema.field_names().collect();
        assert_eq!(names, vec!["id", "name"]);
        assert!(schema.get_field("id").unwrap().read_only);
        assert_eq!(schema.plural, "dogs");
    }

    #[test]
    fn test_duplicate_field_is_last_write_wins() {
        let schema = ResourceSchema::new("dog")
            .field(FieldSpec::plain("name"))
            .field(FieldSpec::plain("fur").source("fur_color"))
            .field(FieldSpec::plain("name").source("nickname"));
        let names: Vec<&str> = schema.field_names().collect();
        assert_eq!(names, vec!["id", "name", "fur"]);
        assert_eq!(schema.get_field("name").unwrap().source, "nickname");
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = SchemaRegistry::new();
        registry.register(ResourceSchema::new("category"));
        registry.register(ResourceSchema::new("person"));
        assert!(registry.get("category").is_some());
        assert_eq!(registry.get_by_plural("people").unwrap().name, "person");
        assert!(registry.get_by_plural("persons").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_defers_many_falls_back_to_global() {
        let schema = ResourceSchema::new("user");
        assert!(schema.defers_many(true));
        assert!(!schema.clone().defer_many_relations(false).defers_many(true));
    }
}
