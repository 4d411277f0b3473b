//! Feature request parsing
//!
//! Turns flat query parameters into a [`FeatureRequest`]: which fields and
//! relations to render, filters, sorting, pagination and the debug,
//! sideloading and patch-all switches.
//!
//! Three parameter shapes are recognized:
//!
//! - array features, `name[]=a&name[]=b`
//! - object features, `name{sub}=v` or `name{sub}[]=v`
//! - scalar features, `name=v`

use crate::config::DynamicRestSettings;
use crate::core::error::ParseError;
use crate::core::query::QueryParams;
use indexmap::IndexMap;
use std::collections::HashSet;

pub const INCLUDE: &str = "include[]";
pub const EXCLUDE: &str = "exclude[]";
pub const FILTER: &str = "filter{}";
pub const SORT: &str = "sort[]";
pub const DEBUG: &str = "debug";
pub const SIDELOADING: &str = "sideloading";
pub const PATCH_ALL: &str = "patch-all";

/// A request feature an endpoint may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Include,
    Exclude,
    Filter,
    Sort,
    Page,
    PerPage,
    Debug,
    Sideloading,
    PatchAll,
}

/// Features enabled on an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    enabled: HashSet<Feature>,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FeatureSet {
    pub fn all() -> Self {
        Self {
            enabled: [
                Feature::Include,
                Feature::Exclude,
                Feature::Filter,
                Feature::Sort,
                Feature::Page,
                Feature::PerPage,
                Feature::Debug,
                Feature::Sideloading,
                Feature::PatchAll,
            ]
            .into_iter()
            .collect(),
        }
    }

    pub fn none() -> Self {
        Self {
            enabled: HashSet::new(),
        }
    }

    pub fn with(mut self, feature: Feature) -> Self {
        self.enabled.insert(feature);
        self
    }

    pub fn without(mut self, feature: Feature) -> Self {
        self.enabled.remove(&feature);
        self
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }
}

/// Patch-all mode requested via `patch-all`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchAllMode {
    #[default]
    Off,
    /// Mutate and save each matched record in one transaction
    Loop,
    /// One bulk update statement over the filtered set
    Query,
}

/// Truthiness of a query parameter value
pub fn is_truthy(value: &str) -> bool {
    !matches!(value.to_lowercase().as_str(), "0" | "false" | "")
}

/// Per-field request: a terminal include/exclude flag or a nested map
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRequest {
    Flag(bool),
    Nested(RequestFieldMap),
}

/// Tree of include/exclude decisions keyed by field name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFieldMap {
    fields: IndexMap<String, FieldRequest>,
}

impl RequestFieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from include then exclude paths; excludes win conflicts
    pub fn from_paths<I, E>(include: I, exclude: E) -> Result<Self, ParseError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let mut map = Self::new();
        for path in include {
            map.insert_path(path.as_ref(), true)?;
        }
        for path in exclude {
            map.insert_path(path.as_ref(), false)?;
        }
        Ok(map)
    }

    /// Record one dotted path.
    ///
    /// `a.b` marks `b` under `a`; a trailing dot (`a.`) selects `a` with its
    /// default nested fields; an empty segment anywhere else is an error.
    pub fn insert_path(&mut self, path: &str, include: bool) -> Result<(), ParseError> {
        let segments: Vec<&str> = path.split('.').collect();
        self.insert_segments(path, &segments, include)
    }

    fn insert_segments(
        &mut self,
        path: &str,
        segments: &[&str],
        include: bool,
    ) -> Result<(), ParseError> {
        let Some((head, rest)) = segments.split_first() else {
            return Ok(());
        };

        if head.is_empty() {
            return if rest.is_empty() {
                Ok(())
            } else {
                Err(ParseError::MalformedPath {
                    path: path.to_string(),
                })
            };
        }

        if rest.is_empty() {
            let keep_nested =
                include && matches!(self.fields.get(*head), Some(FieldRequest::Nested(_)));
            if !keep_nested {
                self.fields
                    .insert(head.to_string(), FieldRequest::Flag(include));
            }
            return Ok(());
        }

        let entry = self
            .fields
            .entry(head.to_string())
            .or_insert_with(|| FieldRequest::Nested(RequestFieldMap::new()));
        if let FieldRequest::Flag(_) = entry {
            *entry = FieldRequest::Nested(RequestFieldMap::new());
        }
        match entry {
            FieldRequest::Nested(nested) => nested.insert_segments(path, rest, include),
            FieldRequest::Flag(_) => Ok(()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldRequest> {
        self.fields.get(name)
    }

    /// Explicitly included, either as a flag or with nested selections
    pub fn is_requested(&self, name: &str) -> bool {
        matches!(
            self.fields.get(name),
            Some(FieldRequest::Flag(true)) | Some(FieldRequest::Nested(_))
        )
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        matches!(self.fields.get(name), Some(FieldRequest::Flag(false)))
    }

    /// Nested selections under `name`, if any
    pub fn nested(&self, name: &str) -> Option<&RequestFieldMap> {
        match self.fields.get(name) {
            Some(FieldRequest::Nested(nested)) => Some(nested),
            _ => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Everything a request asked for, parsed once and read-only afterwards
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRequest {
    /// Raw include paths; `None` when the feature is disabled
    pub include: Option<Vec<String>>,
    /// Raw exclude paths; `None` when the feature is disabled
    pub exclude: Option<Vec<String>>,
    pub fields: RequestFieldMap,
    /// Filter key (`[-]field[.field][.op]`) to values
    pub filters: IndexMap<String, Vec<String>>,
    pub sort: Option<Vec<String>>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub debug: Option<bool>,
    pub sideloading: Option<bool>,
    pub patch_all: PatchAllMode,
}

impl FeatureRequest {
    pub fn parse(
        params: &QueryParams,
        features: &FeatureSet,
        settings: &DynamicRestSettings,
    ) -> Result<Self, ParseError> {
        let include = array_feature(params, features, Feature::Include, INCLUDE);
        let exclude = array_feature(params, features, Feature::Exclude, EXCLUDE);
        let fields = RequestFieldMap::from_paths(
            include.iter().flatten(),
            exclude.iter().flatten(),
        )?;

        let filters = if features.contains(Feature::Filter) {
            extract_object_params(params, FILTER)?
        } else {
            IndexMap::new()
        };

        let page = if features.contains(Feature::Page) {
            number_feature(params, &settings.page_query_param)?
        } else {
            None
        };
        let per_page = if features.contains(Feature::PerPage) {
            number_feature(params, &settings.page_size_query_param)?
                .map(|n| n.min(settings.max_page_size))
        } else {
            None
        };

        let request = Self {
            include,
            exclude,
            fields,
            filters,
            sort: array_feature(params, features, Feature::Sort, SORT),
            page,
            per_page,
            debug: scalar_feature(params, features, Feature::Debug, DEBUG).map(is_truthy),
            sideloading: scalar_feature(params, features, Feature::Sideloading, SIDELOADING)
                .map(is_truthy),
            patch_all: parse_patch_all(scalar_feature(
                params,
                features,
                Feature::PatchAll,
                PATCH_ALL,
            ))?,
        };
        tracing::debug!("Parsed feature request: {:?}", request);
        Ok(request)
    }

    pub fn is_debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    /// Whether to sideload, falling back to the configured default
    pub fn sideloading_or(&self, default: bool) -> bool {
        self.sideloading.unwrap_or(default)
    }
}

fn array_feature(
    params: &QueryParams,
    features: &FeatureSet,
    feature: Feature,
    name: &str,
) -> Option<Vec<String>> {
    features.contains(feature).then(|| {
        params
            .get_all(name)
            .into_iter()
            .map(String::from)
            .collect()
    })
}

fn scalar_feature<'p>(
    params: &'p QueryParams,
    features: &FeatureSet,
    feature: Feature,
    name: &str,
) -> Option<&'p str> {
    if features.contains(feature) {
        params.get(name)
    } else {
        None
    }
}

fn number_feature(params: &QueryParams, name: &str) -> Result<Option<usize>, ParseError> {
    match params.get(name) {
        None | Some("") => Ok(None),
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(ParseError::InvalidNumber {
                param: name.to_string(),
                value: raw.to_string(),
            }),
        },
    }
}

fn parse_patch_all(value: Option<&str>) -> Result<PatchAllMode, ParseError> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(PatchAllMode::Off);
    };
    let lowered = value.to_lowercase();
    if lowered == "query" {
        Ok(PatchAllMode::Query)
    } else if is_truthy(&lowered) {
        Ok(PatchAllMode::Loop)
    } else {
        Err(ParseError::InvalidPatchAll { value: lowered })
    }
}

/// Collect `prefix{sub}` / `prefix{sub}[]` parameters into `sub -> values`.
///
/// `name` is the feature name including its braces (`filter{}`).
pub fn extract_object_params(
    params: &QueryParams,
    name: &str,
) -> Result<IndexMap<String, Vec<String>>, ParseError> {
    let prefix = name.trim_end_matches('}');
    let mut map: IndexMap<String, Vec<String>> = IndexMap::new();

    for (key, value) in params.iter() {
        if key == name || !key.starts_with(prefix) {
            continue;
        }

        let rest = &key[prefix.len()..];
        let subkey = if let Some(stripped) = rest.strip_suffix("}[]") {
            stripped
        } else if let Some(stripped) = rest.strip_suffix('}') {
            stripped
        } else {
            return Err(ParseError::MalformedFeatureKey {
                key: key.to_string(),
            });
        };

        let values = map.entry(subkey.to_string()).or_default();
        if subkey.ends_with(".in")
            && value.starts_with('[')
            && value.ends_with(']')
            && value.contains(',')
        {
            values.extend(value[1..value.len() - 1].split(',').map(String::from));
        } else {
            values.push(value.to_string());
        }
    }

    tracing::debug!("Extracted {} params: {:?}", name, map);
    Ok(map)
}
