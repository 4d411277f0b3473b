//! Raw query parameters and pagination metadata

use serde::Serialize;

/// Ordered multi-valued query parameters
///
/// Repeated keys keep every value in arrival order, which the
/// `include[]`/`sort[]` style features depend on.
///
/// # Example
/// ```
/// use dynrest::core::query::QueryParams;
///
/// let params = QueryParams::parse("include[]=groups.&include[]=location&page=2");
/// assert_eq!(params.get_all("include[]"), vec!["groups.", "location"]);
/// assert_eq!(params.get("page"), Some("2"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an `application/x-www-form-urlencoded` query string
    pub fn parse(query: &str) -> Self {
        let pairs = url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { pairs }
    }

    /// First value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in order
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }
}

/// Pagination metadata rendered under `meta`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationMeta {
    /// Current page number (starts at 1)
    pub page: usize,

    pub per_page: usize,

    pub total_pages: usize,

    /// Total number of records matching the filters
    pub total_results: usize,
}

impl PaginationMeta {
    pub fn new(page: usize, per_page: usize, total_results: usize) -> Self {
        // avoid division by zero
        let per_page = per_page.max(1);
        Self {
            page,
            per_page,
            total_pages: total_results.div_ceil(per_page),
            total_results,
        }
    }
}
