//! Field resolution
//!
//! Merges a resource's static [`FieldSpec`] table with a request's
//! [`RequestFieldMap`] into an [`ActiveFieldSet`] tree: which fields render at
//! each position of the response and which relations expand into objects.
//!
//! The merge rule at every level is
//! (non-deferred fields not excluded) ∪ (deferred fields explicitly requested),
//! minus explicitly excluded fields. A relation expands only when it was
//! explicitly requested, so the tree is always finite even when schemas
//! reference each other.
//!
//! The resolver also answers the write-side questions (may this field be
//! written in this context?) and translates filter/sort names from API field
//! names to record source paths. It never touches the data store.

use crate::core::error::{ConfigError, DynRestError, DynRestResult, ValidationError};
use crate::core::field::{FieldKind, FieldSpec};
use crate::core::request::RequestFieldMap;
use crate::core::schema::{ResourceSchema, SchemaRegistry};
use crate::core::store::{FilterClause, FilterOp, SortKey};
use indexmap::{IndexMap, IndexSet};

/// Whether fields are resolved for reading or for rendering a write response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    Read,
    /// Every field is active regardless of deferral
    Write,
}

/// The kind of write a field is checked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteContext {
    Create,
    Update,
    PatchAll,
}

/// How a relation renders at one position
#[derive(Debug, Clone)]
pub enum Expansion<'s> {
    /// Identifier(s) only
    IdOnly,
    /// The related object(s), rendered with this field set
    Nested(Box<ActiveFieldSet<'s>>),
    /// A generic relation: one field set per possible target type
    Generic(IndexMap<String, ActiveFieldSet<'s>>),
}

#[derive(Debug, Clone)]
pub struct ActiveField<'s> {
    pub spec: &'s FieldSpec,
    pub expansion: Expansion<'s>,
}

impl ActiveField<'_> {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_expanded(&self) -> bool {
        !matches!(self.expansion, Expansion::IdOnly)
    }
}

/// Fields rendered for one type at one position in the response
#[derive(Debug, Clone)]
pub struct ActiveFieldSet<'s> {
    pub schema: &'s ResourceSchema,
    pub fields: Vec<ActiveField<'s>>,
}

impl<'s> ActiveFieldSet<'s> {
    pub fn type_name(&self) -> &str {
        &self.schema.name
    }

    pub fn get(&self, name: &str) -> Option<&ActiveField<'s>> {
        self.fields.iter().find(|f| f.spec.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.spec.name.as_str()).collect()
    }

    /// Dotted source paths the data store should prefetch to render this set
    pub fn prefetch_paths(&self) -> Vec<String> {
        let mut paths = IndexSet::new();
        self.collect_prefetch("", &mut paths);
        paths.into_iter().collect()
    }

    fn collect_prefetch(&self, prefix: &str, paths: &mut IndexSet<String>) {
        let join = |path: &str| {
            if prefix.is_empty() {
                path.to_string()
            } else {
                format!("{}.{}", prefix, path)
            }
        };

        for field in &self.fields {
            let spec = field.spec;
            for required in &spec.requires {
                paths.insert(join(required));
            }
            match spec.kind {
                FieldKind::Plain if spec.is_dotted() => {
                    if let Some((relation, _)) = spec.source.rsplit_once('.') {
                        paths.insert(join(relation));
                    }
                }
                FieldKind::Count => {
                    paths.insert(join(&spec.source));
                }
                _ => {}
            }

            match &field.expansion {
                Expansion::IdOnly => {}
                Expansion::Nested(nested) => {
                    let path = join(&spec.source);
                    paths.insert(path.clone());
                    nested.collect_prefetch(&path, paths);
                }
                Expansion::Generic(by_type) => {
                    let path = join(&spec.source);
                    paths.insert(path.clone());
                    for nested in by_type.values() {
                        nested.collect_prefetch(&path, paths);
                    }
                }
            }
        }
    }
}

/// Resolves field sets and write permissions against a schema registry
#[derive(Debug, Clone, Copy)]
pub struct FieldResolver<'s> {
    registry: &'s SchemaRegistry,
    defer_many_relations: bool,
}

impl<'s> FieldResolver<'s> {
    /// `defer_many_relations` is the global default used when a schema has none
    pub fn new(registry: &'s SchemaRegistry, defer_many_relations: bool) -> Self {
        Self {
            registry,
            defer_many_relations,
        }
    }

    pub fn registry(&self) -> &'s SchemaRegistry {
        self.registry
    }

    pub fn schema(&self, name: &str) -> DynRestResult<&'s ResourceSchema> {
        self.registry
            .get(name)
            .map(|s| s.as_ref())
            .ok_or_else(|| {
                DynRestError::Config(ConfigError::InvalidDeclaration {
                    name: name.to_string(),
                    message: "relation target is not a registered resource".to_string(),
                })
            })
    }

    /// Compute the active field set for `schema` under `request`
    pub fn resolve(
        &self,
        schema: &'s ResourceSchema,
        request: &RequestFieldMap,
        mode: ResolveMode,
    ) -> DynRestResult<ActiveFieldSet<'s>> {
        self.resolve_level(schema, request, mode, true, &[])
    }

    fn resolve_level(
        &self,
        schema: &'s ResourceSchema,
        request: &RequestFieldMap,
        mode: ResolveMode,
        strict: bool,
        embedding: &[&str],
    ) -> DynRestResult<ActiveFieldSet<'s>> {
        if strict && let Some(unknown) = request.names().find(|n| schema.get_field(n).is_none()) {
            return Err(ValidationError::UnknownField {
                resource: schema.name.clone(),
                field: unknown.to_string(),
            }
            .into());
        }

        let defer_many = schema.defers_many(self.defer_many_relations);
        let mut fields = Vec::new();

        for spec in schema.fields() {
            let name = spec.name.as_str();
            if request.is_excluded(name) {
                continue;
            }
            let requested = request.is_requested(name);
            let active = match mode {
                ResolveMode::Write => true,
                ResolveMode::Read => requested || !spec.is_deferred(defer_many),
            };
            if !active {
                continue;
            }

            let empty = RequestFieldMap::new();
            let expansion = if !spec.is_relation() {
                Expansion::IdOnly
            } else if requested {
                let nested = request.nested(name).unwrap_or(&empty);
                self.expand(spec, nested, embedding)?
            } else if spec.embed && !embeds_back(spec, embedding) {
                // embedded relations always render inline, with the target's defaults
                let mut chain = embedding.to_vec();
                chain.push(schema.name.as_str());
                self.expand(spec, &empty, &chain)?
            } else {
                Expansion::IdOnly
            };

            fields.push(ActiveField { spec, expansion });
        }

        tracing::debug!(
            "Resolved {} fields for '{}': {:?}",
            fields.len(),
            schema.name,
            fields.iter().map(|f| f.spec.name.as_str()).collect::<Vec<_>>()
        );
        Ok(ActiveFieldSet { schema, fields })
    }

    fn expand(
        &self,
        spec: &'s FieldSpec,
        nested: &RequestFieldMap,
        embedding: &[&str],
    ) -> DynRestResult<Expansion<'s>> {
        if spec.kind == FieldKind::GenericRelation {
            let mut by_type = IndexMap::new();
            for target in self.registry.schemas() {
                let set = self.resolve_level(target, nested, ResolveMode::Read, false, embedding)?;
                by_type.insert(target.name.clone(), set);
            }
            return Ok(Expansion::Generic(by_type));
        }

        let related = spec.related_type.as_deref().ok_or_else(|| {
            DynRestError::Config(ConfigError::InvalidDeclaration {
                name: spec.name.clone(),
                message: "relation field has no related type".to_string(),
            })
        })?;
        let target = self.schema(related)?;
        let set = self.resolve_level(target, nested, ResolveMode::Read, true, embedding)?;
        Ok(Expansion::Nested(Box::new(set)))
    }

    /// Decide whether `name` may be written in `context`.
    ///
    /// `Ok(None)` means the key is silently ignored (unknown or read-only keys
    /// in create/update input). Patch-all is strict about every key.
    pub fn writable_field(
        &self,
        schema: &'s ResourceSchema,
        name: &str,
        context: WriteContext,
    ) -> Result<Option<&'s FieldSpec>, ValidationError> {
        let strict = context == WriteContext::PatchAll;
        let not_writable = || ValidationError::NotWritable {
            field: name.to_string(),
        };

        let Some(spec) = schema.get_field(name) else {
            return if strict {
                Err(ValidationError::UnknownWriteField {
                    field: name.to_string(),
                })
            } else {
                Ok(None)
            };
        };

        if spec.is_wildcard() {
            return if strict || spec.setter.is_none() {
                Err(not_writable())
            } else {
                Ok(Some(spec))
            };
        }

        let derived = spec.read_only
            || spec.is_dotted()
            || matches!(spec.kind, FieldKind::Computed | FieldKind::Count);
        if derived {
            return if strict { Err(not_writable()) } else { Ok(None) };
        }

        match context {
            WriteContext::Create => Ok(Some(spec)),
            WriteContext::Update if spec.immutable => Err(not_writable()),
            WriteContext::Update => Ok(Some(spec)),
            WriteContext::PatchAll
                if spec.immutable || spec.kind == FieldKind::RelationMany =>
            {
                Err(not_writable())
            }
            WriteContext::PatchAll => Ok(Some(spec)),
        }
    }

    /// Translate a filter key (`[-]field[.field…][.op]`) and its values
    pub fn translate_filter(
        &self,
        schema: &'s ResourceSchema,
        key: &str,
        values: Vec<String>,
    ) -> Result<FilterClause, ValidationError> {
        let (negate, key) = match key.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, key),
        };

        let mut segments: Vec<&str> = key.split('.').collect();
        let op = match segments.last().and_then(|last| FilterOp::parse(last)) {
            Some(op) if segments.len() > 1 => {
                segments.pop();
                op
            }
            _ => FilterOp::Eq,
        };

        Ok(FilterClause {
            path: self.translate_path(schema, &segments)?,
            op,
            values,
            negate,
        })
    }

    /// Translate a sort key (`[-]field[.field…]`)
    pub fn translate_sort(
        &self,
        schema: &'s ResourceSchema,
        key: &str,
    ) -> Result<SortKey, ValidationError> {
        let (descending, key) = match key.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, key),
        };
        let segments: Vec<&str> = key.split('.').collect();
        Ok(SortKey {
            path: self.translate_path(schema, &segments)?,
            descending,
        })
    }

    /// Walk API field names through relations, producing a source path.
    ///
    /// Once a non-relation field is reached the remaining segments are kept
    /// verbatim, addressing nested attribute data.
    fn translate_path(
        &self,
        schema: &'s ResourceSchema,
        segments: &[&str],
    ) -> Result<String, ValidationError> {
        let mut current = schema;
        let mut parts: Vec<String> = Vec::new();

        for (i, segment) in segments.iter().enumerate() {
            let name = if *segment == "pk" { "id" } else { segment };
            let spec = current
                .get_field(name)
                .filter(|s| !s.is_wildcard() && s.kind != FieldKind::Computed)
                .ok_or_else(|| ValidationError::UnknownField {
                    resource: current.name.clone(),
                    field: segment.to_string(),
                })?;
            parts.push(spec.source.clone());

            let rest = &segments[i + 1..];
            if rest.is_empty() {
                break;
            }
            match spec.related_type.as_deref().and_then(|t| self.registry.get(t)) {
                Some(target) => current = target.as_ref(),
                None => {
                    parts.extend(rest.iter().map(|s| s.to_string()));
                    break;
                }
            }
        }

        Ok(parts.join("."))
    }
}

/// Whether embedding `spec` by default would re-enter a type already being embedded
fn embeds_back(spec: &FieldSpec, embedding: &[&str]) -> bool {
    match spec.related_type.as_deref() {
        Some(target) => embedding.contains(&target),
        None => !embedding.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ResourceSchema;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register(
            ResourceSchema::new("user")
                .field(FieldSpec::plain("name"))
                .field(FieldSpec::plain("last_name").deferred(true))
                .field(FieldSpec::relation_one("location", "location"))
                .field(FieldSpec::relation_many("groups", "group"))
                .field(FieldSpec::plain("city").source("location.name"))
                .field(FieldSpec::count("num_groups", "groups").deferred(true))
                .field(
                    FieldSpec::computed("display", |_, _| serde_json::Value::Null)
                        .requires("profile")
                        .deferred(true),
                ),
        );
        registry.register(
            ResourceSchema::new("group")
                .field(FieldSpec::plain("name"))
                .field(FieldSpec::relation_many("permissions", "permission"))
                .field(FieldSpec::relation_many("members", "user").deferred(true)),
        );
        registry.register(ResourceSchema::new("permission").field(FieldSpec::plain("code")));
        registry.register(
            ResourceSchema::new("location")
                .field(FieldSpec::plain("name"))
                .field(FieldSpec::plain("blob").deferred(true)),
        );
        registry.register(
            ResourceSchema::new("dog")
                .field(FieldSpec::plain("name"))
                .field(FieldSpec::plain("origin").immutable())
                .field(FieldSpec::plain("fur").source("fur_color"))
                .field(FieldSpec::relation_many("friends", "dog"))
                .field(FieldSpec::plain("whole").source("*"))
                .field(FieldSpec::plain("patchable").source("*").setter(|_, _| Ok(()))),
        );
        registry
    }

    fn fields(paths: &[&str], exclude: &[&str]) -> RequestFieldMap {
        RequestFieldMap::from_paths(paths.iter().copied(), exclude.iter().copied()).unwrap()
    }

    #[test]
    fn test_defaults_skip_deferred_fields() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, false);
        let user = registry.get("user").unwrap();
        let set = resolver
            .resolve(user, &RequestFieldMap::new(), ResolveMode::Read)
            .unwrap();
        assert_eq!(set.names(), vec!["id", "name", "location", "groups", "city"]);
        assert!(set.fields.iter().all(|f| !f.is_expanded()));
    }

    #[test]
    fn test_deferred_field_included_on_request() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, false);
        let user = registry.get("user").unwrap();
        let set = resolver
            .resolve(user, &fields(&["last_name"], &[]), ResolveMode::Read)
            .unwrap();
        assert!(set.contains("last_name"));
    }

    #[test]
    fn test_excluded_field_never_active() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, false);
        let user = registry.get("user").unwrap();
        let set = resolver
            .resolve(user, &fields(&["last_name"], &["last_name", "name"]), ResolveMode::Write)
            .unwrap();
        assert!(!set.contains("last_name"));
        assert!(!set.contains("name"));
    }

    #[test]
    fn test_defer_many_relations_setting() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, true);
        let user = registry.get("user").unwrap();
        let set = resolver
            .resolve(user, &RequestFieldMap::new(), ResolveMode::Read)
            .unwrap();
        assert!(!set.contains("groups"));

        let set = resolver
            .resolve(user, &RequestFieldMap::new(), ResolveMode::Write)
            .unwrap();
        assert!(set.contains("groups"));
        assert!(set.contains("last_name"));
    }

    #[test]
    fn test_requested_relation_expands_recursively() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, false);
        let user = registry.get("user").unwrap();
        let set = resolver
            .resolve(user, &fields(&["groups.permissions", "location."], &[]), ResolveMode::Read)
            .unwrap();

        let Expansion::Nested(groups) = &set.get("groups").unwrap().expansion else {
            panic!("groups should expand");
        };
        assert_eq!(groups.type_name(), "group");
        assert!(groups.get("permissions").unwrap().is_expanded());
        // deferred on the target type, and not requested
        assert!(!groups.contains("members"));

        let Expansion::Nested(location) = &set.get("location").unwrap().expansion else {
            panic!("location should expand");
        };
        assert_eq!(location.names(), vec!["id", "name"]);
    }

    #[test]
    fn test_cyclic_schema_resolution_is_finite() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, false);
        let dog = registry.get("dog").unwrap();
        let set = resolver
            .resolve(dog, &fields(&["friends.friends"], &[]), ResolveMode::Read)
            .unwrap();
        let Expansion::Nested(level1) = &set.get("friends").unwrap().expansion else {
            panic!("friends should expand");
        };
        let Expansion::Nested(level2) = &level1.get("friends").unwrap().expansion else {
            panic!("friends.friends should expand");
        };
        assert!(!level2.get("friends").unwrap().is_expanded());
    }

    #[test]
    fn test_mutually_embedded_types_stop_at_the_cycle() {
        let mut registry = SchemaRegistry::new();
        registry.register(
            ResourceSchema::new("user")
                .field(FieldSpec::relation_one("profile", "profile").embed()),
        );
        registry.register(
            ResourceSchema::new("profile")
                .field(FieldSpec::relation_one("owner", "user").embed()),
        );
        let resolver = FieldResolver::new(&registry, false);
        let user = registry.get("user").unwrap();
        let set = resolver
            .resolve(user, &RequestFieldMap::new(), ResolveMode::Read)
            .unwrap();

        let Expansion::Nested(profile) = &set.get("profile").unwrap().expansion else {
            panic!("embedded profile should expand by default");
        };
        assert!(!profile.get("owner").unwrap().is_expanded());
        assert_eq!(set.prefetch_paths(), vec!["profile"]);
    }

    #[test]
    fn test_unknown_requested_field() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, false);
        let user = registry.get("user").unwrap();
        let err = resolver
            .resolve(user, &fields(&["groups.nope"], &[]), ResolveMode::Read)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"nope\" is not a valid field name for \"group\"."
        );
    }

    #[test]
    fn test_prefetch_paths() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, false);
        let user = registry.get("user").unwrap();
        let set = resolver
            .resolve(
                user,
                &fields(&["groups.permissions", "num_groups", "display"], &[]),
                ResolveMode::Read,
            )
            .unwrap();
        assert_eq!(
            set.prefetch_paths(),
            vec!["groups", "groups.permissions", "location", "profile"]
        );
    }

    #[test]
    fn test_write_checks() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, false);
        let dog = registry.get("dog").unwrap();

        assert!(resolver.writable_field(dog, "origin", WriteContext::Create).unwrap().is_some());
        assert_eq!(
            resolver
                .writable_field(dog, "origin", WriteContext::Update)
                .unwrap_err()
                .to_string(),
            "Cannot update field: \"origin\""
        );
        assert!(resolver.writable_field(dog, "whole", WriteContext::Update).is_err());
        assert!(resolver.writable_field(dog, "patchable", WriteContext::Update).unwrap().is_some());
        assert!(resolver.writable_field(dog, "patchable", WriteContext::PatchAll).is_err());

        // ignored on ordinary writes, rejected by patch-all
        assert!(resolver.writable_field(dog, "id", WriteContext::Update).unwrap().is_none());
        assert!(resolver.writable_field(dog, "bogus", WriteContext::Create).unwrap().is_none());
        assert_eq!(
            resolver
                .writable_field(dog, "bogus", WriteContext::PatchAll)
                .unwrap_err()
                .to_string(),
            "Unknown field: \"bogus\""
        );
        assert!(resolver.writable_field(dog, "friends", WriteContext::PatchAll).is_err());
        assert_eq!(
            resolver
                .writable_field(dog, "fur", WriteContext::PatchAll)
                .unwrap()
                .map(|s| s.source.as_str()),
            Some("fur_color")
        );
    }

    #[test]
    fn test_translate_filter_and_sort() {
        let registry = registry();
        let resolver = FieldResolver::new(&registry, false);
        let dog = registry.get("dog").unwrap();
        let user = registry.get("user").unwrap();

        let clause = resolver
            .translate_filter(dog, "-fur.icontains", vec!["gold".into()])
            .unwrap();
        assert_eq!(clause.path, "fur_color");
        assert_eq!(clause.op, FilterOp::IContains);
        assert!(clause.negate);

        let clause = resolver
            .translate_filter(user, "groups.permissions.code.in", vec!["a".into()])
            .unwrap();
        assert_eq!(clause.path, "groups.permissions.code");
        assert_eq!(clause.op, FilterOp::In);

        let clause = resolver.translate_filter(user, "pk", vec!["1".into()]).unwrap();
        assert_eq!((clause.path.as_str(), clause.op), ("id", FilterOp::Eq));

        let clause = resolver
            .translate_filter(registry.get("location").unwrap(), "blob.street", vec![])
            .unwrap();
        assert_eq!(clause.path, "blob.street");

        assert!(resolver.translate_filter(dog, "nope", vec![]).is_err());

        let sort = resolver.translate_sort(dog, "-fur").unwrap();
        assert_eq!(sort.to_string(), "-fur_color");
    }
}
