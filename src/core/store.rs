//! The data-access collaborator
//!
//! [`DataStore`] is everything the view set needs from persistence: paged
//! fetches with filters and sorting, key lookups for sideloading, a single
//! bulk update statement, and transactions for multi-record writes.

use crate::core::error::StorageError;
use crate::core::record::{Record, RecordGraph, RecordId, RecordKey, WriteValue};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use std::fmt;

/// Comparison applied by one filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
    IContains,
    Contains,
    IStartsWith,
    StartsWith,
    IExact,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
}

impl FilterOp {
    /// Parse an operator suffix (`icontains`, `in`, ...)
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "eq" => FilterOp::Eq,
            "in" => FilterOp::In,
            "icontains" => FilterOp::IContains,
            "contains" => FilterOp::Contains,
            "istartswith" => FilterOp::IStartsWith,
            "startswith" => FilterOp::StartsWith,
            "iexact" => FilterOp::IExact,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "isnull" => FilterOp::IsNull,
            _ => return None,
        };
        Some(op)
    }
}

/// One translated filter: a source path, an operator and raw string values
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub path: String,
    pub op: FilterOp,
    pub values: Vec<String>,
    pub negate: bool,
}

/// The filtered queryset: every clause must hold, and the id must be listed
/// when `ids` is set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub clauses: Vec<FilterClause>,
    pub ids: Option<Vec<RecordId>>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Narrow the spec to the given ids (intersecting any existing id list)
    pub fn with_ids(mut self, ids: Vec<RecordId>) -> Self {
        self.ids = Some(match self.ids.take() {
            Some(existing) => ids.into_iter().filter(|id| existing.contains(id)).collect(),
            None => ids,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based
    pub page: usize,
    pub per_page: usize,
}

impl PageRequest {
    /// Rows to skip before this page; pages past the end skip everything
    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1).saturating_mul(self.per_page)
    }
}

/// A paged, filtered, sorted fetch of one resource type
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub type_name: String,
    pub filter: FilterSpec,
    pub sort: Vec<SortKey>,
    pub page: Option<PageRequest>,
}

impl FetchQuery {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            filter: FilterSpec::new(),
            sort: Vec::new(),
            page: None,
        }
    }

    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, page: Option<PageRequest>) -> Self {
        self.page = page;
        self
    }
}

/// Records of one page plus the total count before paging
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPage {
    pub records: Vec<Record>,
    pub total: usize,
}

/// A unit of all-or-nothing writes.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait Transaction: Send {
    /// Insert a record, assigning an id when it has none
    async fn create(&mut self, record: Record) -> Result<Record, StorageError>;

    /// Replace an existing record, running per-record save hooks
    async fn save(&mut self, record: Record) -> Result<Record, StorageError>;

    async fn delete(&mut self, key: &RecordKey) -> Result<(), StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Persistence consumed by the view set and the mutation coordinator
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Short backend name used in logs and errors
    fn backend(&self) -> &str;

    async fn fetch(&self, query: &FetchQuery) -> Result<FetchPage, StorageError>;

    /// Look up records by key; missing keys are simply absent from the result
    async fn get_many(&self, keys: &[RecordKey]) -> Result<Vec<Record>, StorageError>;

    /// Fetch everything reachable from `roots` along the dotted relation
    /// `paths` and add it to `graph`.
    ///
    /// Purely a performance hint for backends that can batch; the default
    /// walks one relation level at a time through [`DataStore::get_many`].
    async fn prefetch_related(
        &self,
        graph: &mut RecordGraph,
        roots: &[RecordKey],
        paths: &[String],
    ) -> Result<(), StorageError> {
        for path in paths {
            let mut frontier: Vec<RecordKey> = roots.to_vec();
            for segment in path.split('.').filter(|s| !s.is_empty()) {
                let mut next: IndexSet<RecordKey> = IndexSet::new();
                for key in &frontier {
                    if let Some(record) = graph.get(key)
                        && let Some(relation) = record.relation(segment)
                    {
                        next.extend(relation.keys().into_iter().cloned());
                    }
                }
                let missing: Vec<RecordKey> = next
                    .iter()
                    .filter(|k| !graph.contains(k))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    graph.extend(self.get_many(&missing).await?);
                }
                frontier = next.into_iter().collect();
                if frontier.is_empty() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Apply `values` (source path to value) to every record matching
    /// `filter` in one statement. No per-record save hooks run.
    async fn bulk_update(
        &self,
        type_name: &str,
        filter: &FilterSpec,
        values: &IndexMap<String, WriteValue>,
    ) -> Result<usize, StorageError>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError>;

    /// Create a single record in its own transaction
    async fn create(&self, record: Record) -> Result<Record, StorageError> {
        let mut tx = self.begin().await?;
        match tx.create(record).await {
            Ok(created) => {
                tx.commit().await?;
                Ok(created)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!("Rollback after '{}' failed: {}", e, rollback);
                }
                Err(e)
            }
        }
    }

    /// Save a single record in its own transaction
    async fn save(&self, record: Record) -> Result<Record, StorageError> {
        let mut tx = self.begin().await?;
        match tx.save(record).await {
            Ok(saved) => {
                tx.commit().await?;
                Ok(saved)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!("Rollback after '{}' failed: {}", e, rollback);
                }
                Err(e)
            }
        }
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StorageError> {
        let mut tx = self.begin().await?;
        match tx.delete(key).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!("Rollback after '{}' failed: {}", e, rollback);
                }
                Err(e)
            }
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.path)
        } else {
            write!(f, "{}", self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_op_parse() {
        assert_eq!(FilterOp::parse("icontains"), Some(FilterOp::IContains));
        assert_eq!(FilterOp::parse("isnull"), Some(FilterOp::IsNull));
        assert_eq!(FilterOp::parse("name"), None);
    }

    #[test]
    fn test_with_ids_intersects() {
        let spec = FilterSpec::new()
            .with_ids(vec![RecordId::Int(1), RecordId::Int(2)])
            .with_ids(vec![RecordId::Int(2), RecordId::Int(3)]);
        assert_eq!(spec.ids, Some(vec![RecordId::Int(2)]));
    }

    #[test]
    fn test_sort_key_display() {
        let key = SortKey {
            path: "name".to_string(),
            descending: true,
        };
        assert_eq!(key.to_string(), "-name");
    }
}
