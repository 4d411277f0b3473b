//! Configuration loading and management
//!
//! A [`DynamicRestConfig`] holds the global [`DynamicRestSettings`] and,
//! optionally, resource declarations that can be turned into
//! [`ResourceSchema`]s without writing Rust. Computed fields need a getter
//! and can only be declared in code.

use crate::core::error::ConfigError;
use crate::core::field::{FieldKind, FieldSpec};
use crate::core::schema::ResourceSchema;
use crate::core::validation::{filters, validators};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Global behavior switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicRestSettings {
    /// Query parameter carrying the page number
    pub page_query_param: String,

    /// Query parameter carrying the page size
    pub page_size_query_param: String,

    /// Default page size; `None` disables pagination unless a page size is requested
    pub page_size: Option<usize>,

    pub max_page_size: usize,

    /// Persist valid items of a bulk create even when others fail
    pub enable_bulk_partial_creation: bool,

    pub enable_bulk_update: bool,

    pub enable_patch_all: bool,

    /// Sideloading default when the request does not say
    pub enable_sideloading: bool,

    /// Whether to-many relations are deferred unless declared otherwise
    pub defer_many_relations: bool,
}

impl Default for DynamicRestSettings {
    fn default() -> Self {
        Self {
            page_query_param: "page".to_string(),
            page_size_query_param: "per_page".to_string(),
            page_size: None,
            max_page_size: 1000,
            enable_bulk_partial_creation: false,
            enable_bulk_update: true,
            enable_patch_all: false,
            enable_sideloading: true,
            defer_many_relations: false,
        }
    }
}

/// A validator declared in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidatorConfig {
    Required,
    NotBlank,
    Positive,
    StringLength { min: usize, max: usize },
    MaxValue { max: f64 },
    InList { values: Vec<String> },
    Pattern { regex: String },
}

/// An input filter declared in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterConfig {
    Trim,
    Lowercase,
    Uppercase,
}

/// Declaration of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,

    #[serde(default = "default_kind")]
    pub kind: FieldKind,

    /// Defaults to the field name
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub related_type: Option<String>,

    #[serde(default)]
    pub deferred: Option<bool>,

    #[serde(default)]
    pub immutable: bool,

    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub embed: bool,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,

    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

fn default_kind() -> FieldKind {
    FieldKind::Plain
}

/// Declaration of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Singular name (e.g., "dog")
    pub name: String,

    /// Plural name; derived from the singular when absent
    #[serde(default)]
    pub plural: Option<String>,

    #[serde(default)]
    pub defer_many_relations: Option<bool>,

    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

impl ResourceConfig {
    /// Build the schema this declaration describes
    pub fn to_schema(&self) -> Result<ResourceSchema, ConfigError> {
        let mut schema = ResourceSchema::new(&self.name);
        if let Some(plural) = &self.plural {
            schema = schema.plural(plural);
        }
        if let Some(defer) = self.defer_many_relations {
            schema = schema.defer_many_relations(defer);
        }
        for field in &self.fields {
            schema.add_field(self.field_spec(field)?);
        }
        Ok(schema)
    }

    fn field_spec(&self, field: &FieldConfig) -> Result<FieldSpec, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidDeclaration {
            name: format!("{}.{}", self.name, field.name),
            message: message.to_string(),
        };

        let mut spec = match field.kind {
            FieldKind::Plain => FieldSpec::plain(&field.name),
            FieldKind::RelationOne | FieldKind::RelationMany => {
                let related = field
                    .related_type
                    .as_deref()
                    .ok_or_else(|| invalid("relation fields need a related_type"))?;
                if field.kind == FieldKind::RelationOne {
                    FieldSpec::relation_one(&field.name, related)
                } else {
                    FieldSpec::relation_many(&field.name, related)
                }
            }
            FieldKind::GenericRelation => FieldSpec::generic_relation(&field.name),
            FieldKind::Count => {
                let source = field
                    .source
                    .as_deref()
                    .ok_or_else(|| invalid("count fields need a source"))?;
                FieldSpec::count(&field.name, source)
            }
            FieldKind::Computed => {
                return Err(invalid("computed fields must be declared in code"));
            }
        };

        if let Some(source) = &field.source {
            spec = spec.source(source);
        }
        if let Some(deferred) = field.deferred {
            spec = spec.deferred(deferred);
        }
        spec.immutable = field.immutable;
        spec.read_only = spec.read_only || field.read_only;
        spec.embed = field.embed;
        spec.required = field.required;
        spec.requires = field.requires.clone();

        for filter in &field.filters {
            spec = match filter {
                FilterConfig::Trim => spec.filter(filters::trim()),
                FilterConfig::Lowercase => spec.filter(filters::lowercase()),
                FilterConfig::Uppercase => spec.filter(filters::uppercase()),
            };
        }
        for validator in &field.validators {
            spec = match validator.clone() {
                ValidatorConfig::Required => spec.validate(validators::required()),
                ValidatorConfig::NotBlank => spec.validate(validators::not_blank()),
                ValidatorConfig::Positive => spec.validate(validators::positive()),
                ValidatorConfig::StringLength { min, max } => {
                    spec.validate(validators::string_length(min, max))
                }
                ValidatorConfig::MaxValue { max } => spec.validate(validators::max_value(max)),
                ValidatorConfig::InList { values } => spec.validate(validators::in_list(values)),
                ValidatorConfig::Pattern { regex } => {
                    regex::Regex::new(&regex).map_err(|e| invalid(&e.to_string()))?;
                    spec.validate(validators::pattern(&regex))
                }
            };
        }
        Ok(spec)
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicRestConfig {
    #[serde(default)]
    pub settings: DynamicRestSettings,

    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

impl DynamicRestConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        tracing::debug!(
            "Loaded configuration with {} resource(s)",
            config.resources.len()
        );
        Ok(config)
    }

    /// Build every declared resource schema
    pub fn schemas(&self) -> Result<Vec<ResourceSchema>, ConfigError> {
        self.resources.iter().map(ResourceConfig::to_schema).collect()
    }
}
