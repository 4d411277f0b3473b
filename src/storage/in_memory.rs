//! In-memory implementation of DataStore for testing and development

use crate::core::error::StorageError;
use crate::core::record::{Record, RecordId, RecordKey, WriteValue};
use crate::core::store::{DataStore, FetchPage, FetchQuery, FilterSpec, Transaction};
use crate::storage::filter::{RecordLookup, matches_spec, sort_records};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

const BACKEND: &str = "memory";

/// Runs before a record is created or saved inside a transaction.
///
/// Hooks may adjust the record or reject it. They do not run for
/// [`DataStore::bulk_update`].
pub type SaveHook = Arc<dyn Fn(&mut Record) -> Result<(), StorageError> + Send + Sync>;

/// How new ids are assigned for a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// 1, 2, 3, ...
    #[default]
    Sequential,
    /// Random v4 UUID strings
    Uuid,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, IndexMap<RecordId, Record>>,
    next_ids: HashMap<String, i64>,
    version: u64,
}

impl RecordLookup for Tables {
    fn lookup(&self, key: &RecordKey) -> Option<&Record> {
        self.rows.get(&key.type_name)?.get(&key.id)
    }
}

/// Constraints and hooks, fixed once the store is built
#[derive(Clone, Default)]
struct Rules {
    unique: HashMap<String, Vec<String>>,
    hooks: HashMap<String, Vec<SaveHook>>,
    ids: HashMap<String, IdStrategy>,
}

impl Rules {
    fn check_unique(&self, tables: &Tables, record: &Record) -> Result<(), StorageError> {
        let Some(fields) = self.unique.get(&record.type_name) else {
            return Ok(());
        };
        let Some(rows) = tables.rows.get(&record.type_name) else {
            return Ok(());
        };
        for field in fields {
            let Some(value) = record.attr(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = rows
                .values()
                .any(|other| other.id != record.id && other.attr(field) == Some(value));
            if clash {
                return Err(StorageError::ConstraintViolation {
                    message: format!(
                        "duplicate value {} for unique field '{}.{}'",
                        value, record.type_name, field
                    ),
                });
            }
        }
        Ok(())
    }

    fn run_hooks(&self, record: &mut Record) -> Result<(), StorageError> {
        if let Some(hooks) = self.hooks.get(&record.type_name) {
            for hook in hooks {
                hook(record)?;
            }
        }
        Ok(())
    }

    fn assign_id(&self, tables: &mut Tables, type_name: &str) -> RecordId {
        match self.ids.get(type_name).copied().unwrap_or_default() {
            IdStrategy::Uuid => RecordId::Str(Uuid::new_v4().to_string()),
            IdStrategy::Sequential => {
                let next = tables.next_ids.entry(type_name.to_string()).or_insert(0);
                *next += 1;
                RecordId::Int(*next)
            }
        }
    }
}

fn track_id(tables: &mut Tables, type_name: &str, id: &RecordId) {
    if let RecordId::Int(n) = id {
        let next = tables.next_ids.entry(type_name.to_string()).or_insert(0);
        *next = (*next).max(*n);
    }
}

/// In-memory data store
///
/// Thread-safe through `RwLock`; clones share the same tables. Transactions
/// stage their writes on a private copy and swap it in on commit.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    rules: Arc<Rules>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rules_mut(&mut self) -> &mut Rules {
        Arc::make_mut(&mut self.rules)
    }

    /// Reject writes that would duplicate a non-null `field` value
    pub fn with_unique(mut self, type_name: &str, field: &str) -> Self {
        self.rules_mut()
            .unique
            .entry(type_name.to_string())
            .or_default()
            .push(field.to_string());
        self
    }

    pub fn with_save_hook<F>(mut self, type_name: &str, hook: F) -> Self
    where
        F: Fn(&mut Record) -> Result<(), StorageError> + Send + Sync + 'static,
    {
        self.rules_mut()
            .hooks
            .entry(type_name.to_string())
            .or_default()
            .push(Arc::new(hook));
        self
    }

    pub fn with_id_strategy(mut self, type_name: &str, strategy: IdStrategy) -> Self {
        self.rules_mut().ids.insert(type_name.to_string(), strategy);
        self
    }

    /// Insert a record directly, bypassing hooks (fixtures and seeding)
    pub fn insert(&self, mut record: Record) -> Result<Record, StorageError> {
        let mut tables = self.write()?;
        let id = match record.id.clone() {
            Some(id) => id,
            None => self.rules.assign_id(&mut tables, &record.type_name),
        };
        track_id(&mut tables, &record.type_name, &id);
        record.id = Some(id.clone());
        self.rules.check_unique(&tables, &record)?;
        tables
            .rows
            .entry(record.type_name.clone())
            .or_default()
            .insert(id, record.clone());
        tables.version += 1;
        Ok(record)
    }

    /// Number of stored records of a type
    pub fn count(&self, type_name: &str) -> Result<usize, StorageError> {
        Ok(self
            .read()?
            .rows
            .get(type_name)
            .map(IndexMap::len)
            .unwrap_or(0))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables.read().map_err(|e| StorageError::TransactionError {
            message: format!("Failed to acquire read lock: {}", e),
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables.write().map_err(|e| StorageError::TransactionError {
            message: format!("Failed to acquire write lock: {}", e),
        })
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<FetchPage, StorageError> {
        let tables = self.read()?;
        let mut records: Vec<Record> = tables
            .rows
            .get(&query.type_name)
            .map(|rows| {
                rows.values()
                    .filter(|r| matches_spec(&*tables, r, &query.filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        sort_records(&*tables, &mut records, &query.sort);
        let total = records.len();

        if let Some(page) = query.page {
            records = records
                .into_iter()
                .skip(page.offset())
                .take(page.per_page)
                .collect();
        }

        tracing::debug!(
            "Fetched {} of {} '{}' record(s)",
            records.len(),
            total,
            query.type_name
        );
        Ok(FetchPage { records, total })
    }

    async fn get_many(&self, keys: &[RecordKey]) -> Result<Vec<Record>, StorageError> {
        let tables = self.read()?;
        Ok(keys
            .iter()
            .filter_map(|key| tables.lookup(key).cloned())
            .collect())
    }

    async fn bulk_update(
        &self,
        type_name: &str,
        filter: &FilterSpec,
        values: &IndexMap<String, WriteValue>,
    ) -> Result<usize, StorageError> {
        let mut tables = self.write()?;

        let updated: Vec<Record> = tables
            .rows
            .get(type_name)
            .map(|rows| {
                rows.values()
                    .filter(|r| matches_spec(&*tables, r, filter))
                    .cloned()
                    .map(|mut record| {
                        for (source, value) in values {
                            record.apply(source, value);
                        }
                        record
                    })
                    .collect()
            })
            .unwrap_or_default();

        // validate against the fully updated table before touching it
        let mut staged = tables.clone();
        for record in &updated {
            if let Some(id) = &record.id {
                staged
                    .rows
                    .entry(type_name.to_string())
                    .or_default()
                    .insert(id.clone(), record.clone());
            }
        }
        for record in &updated {
            self.rules.check_unique(&staged, record)?;
        }

        staged.version += 1;
        *tables = staged;
        Ok(updated.len())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let staged = self.read()?.clone();
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            base_version: staged.version,
            staged,
        }))
    }
}

/// Transaction over a private copy of the tables
pub struct MemoryTransaction {
    store: InMemoryStore,
    staged: Tables,
    base_version: u64,
}

impl MemoryTransaction {
    fn rows(&mut self, type_name: &str) -> &mut IndexMap<RecordId, Record> {
        self.staged.rows.entry(type_name.to_string()).or_default()
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn create(&mut self, mut record: Record) -> Result<Record, StorageError> {
        let rules = self.store.rules.clone();
        let id = match record.id.clone() {
            Some(id) => id,
            None => rules.assign_id(&mut self.staged, &record.type_name),
        };
        track_id(&mut self.staged, &record.type_name, &id);
        record.id = Some(id.clone());

        if self
            .staged
            .rows
            .get(&record.type_name)
            .is_some_and(|rows| rows.contains_key(&id))
        {
            return Err(StorageError::ConstraintViolation {
                message: format!("{} with id '{}' already exists", record.type_name, id),
            });
        }

        rules.run_hooks(&mut record)?;
        rules.check_unique(&self.staged, &record)?;
        self.rows(&record.type_name).insert(id, record.clone());
        Ok(record)
    }

    async fn save(&mut self, mut record: Record) -> Result<Record, StorageError> {
        let rules = self.store.rules.clone();
        let key = record.key().ok_or_else(|| StorageError::ConstraintViolation {
            message: format!("cannot save a {} without an id", record.type_name),
        })?;
        if self.staged.lookup(&key).is_none() {
            return Err(StorageError::Missing {
                type_name: key.type_name,
                id: key.id.to_string(),
            });
        }

        rules.run_hooks(&mut record)?;
        rules.check_unique(&self.staged, &record)?;
        self.rows(&key.type_name).insert(key.id, record.clone());
        Ok(record)
    }

    async fn delete(&mut self, key: &RecordKey) -> Result<(), StorageError> {
        let removed = self
            .staged
            .rows
            .get_mut(&key.type_name)
            .and_then(|rows| rows.shift_remove(&key.id));
        match removed {
            Some(_) => Ok(()),
            None => Err(StorageError::Missing {
                type_name: key.type_name.clone(),
                id: key.id.to_string(),
            }),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryTransaction {
            store,
            mut staged,
            base_version,
        } = *self;
        let mut tables = store.write()?;
        if tables.version != base_version {
            return Err(StorageError::TransactionError {
                message: "tables changed since the transaction began".to_string(),
            });
        }
        staged.version = tables.version + 1;
        *tables = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        tracing::debug!("Rolled back in-memory transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Relation;
    use crate::core::store::{FilterClause, FilterOp, PageRequest, SortKey};
    use serde_json::json;

    fn dog(name: &str) -> Record {
        Record::new("dog").with_attr("name", name)
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new().with_unique("dog", "name");
        for name in ["Fido", "Rex", "Spot"] {
            store.insert(dog(name)).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let store = seeded();
        let page = store.fetch(&FetchQuery::new("dog")).await.unwrap();
        let ids: Vec<_> = page.records.iter().map(|r| r.id.clone().unwrap()).collect();
        assert_eq!(ids, vec![RecordId::Int(1), RecordId::Int(2), RecordId::Int(3)]);
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn test_uuid_strategy() {
        let store = InMemoryStore::new().with_id_strategy("tag", IdStrategy::Uuid);
        let tag = store.insert(Record::new("tag")).unwrap();
        assert!(matches!(tag.id, Some(RecordId::Str(ref s)) if Uuid::parse_str(s).is_ok()));
    }

    #[tokio::test]
    async fn test_fetch_filter_sort_page() {
        let store = seeded();
        let query = FetchQuery::new("dog")
            .filter(FilterSpec {
                clauses: vec![FilterClause {
                    path: "name".to_string(),
                    op: FilterOp::In,
                    values: vec!["Rex".to_string(), "Spot".to_string(), "Fido".to_string()],
                    negate: false,
                }],
                ids: None,
            })
            .sort(vec![SortKey {
                path: "name".to_string(),
                descending: true,
            }])
            .page(Some(PageRequest {
                page: 1,
                per_page: 2,
            }));
        let page = store.fetch(&query).await.unwrap();
        assert_eq!(page.total, 3);
        let names: Vec<_> = page.records.iter().map(|r| r.attr("name").unwrap().clone()).collect();
        assert_eq!(names, vec![json!("Spot"), json!("Rex")]);
    }

    #[tokio::test]
    async fn test_page_far_past_the_end_is_empty() {
        let store = seeded();
        let query = FetchQuery::new("dog").page(Some(PageRequest {
            page: usize::MAX,
            per_page: 10,
        }));
        let page = store.fetch(&query).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let store = seeded();

        let mut tx = store.begin().await.unwrap();
        tx.create(dog("Buddy")).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.count("dog").unwrap(), 3);

        let mut tx = store.begin().await.unwrap();
        let buddy = tx.create(dog("Buddy")).await.unwrap();
        assert_eq!(buddy.id, Some(RecordId::Int(4)));
        tx.commit().await.unwrap();
        assert_eq!(store.count("dog").unwrap(), 4);
    }

    #[tokio::test]
    async fn test_unique_violation_in_transaction() {
        let store = seeded();
        let mut tx = store.begin().await.unwrap();
        let rex = dog("Rex").with_id(2).with_attr("name", "Fido");
        let err = tx.save(rex).await.unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[tokio::test]
    async fn test_concurrent_commit_is_rejected() {
        let store = seeded();
        let mut tx = store.begin().await.unwrap();
        tx.create(dog("Late")).await.unwrap();
        store.insert(dog("Early")).unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.count("dog").unwrap(), 4);
    }

    #[tokio::test]
    async fn test_hooks_run_on_save_not_bulk_update() {
        let store = seeded().with_save_hook("dog", |record| {
            record
                .attributes
                .insert("touched".to_string(), json!(true));
            Ok(())
        });

        let mut values = IndexMap::new();
        values.insert("fur_color".to_string(), WriteValue::Attribute(json!("gold")));
        let updated = store
            .bulk_update("dog", &FilterSpec::new(), &values)
            .await
            .unwrap();
        assert_eq!(updated, 3);
        let page = store.fetch(&FetchQuery::new("dog")).await.unwrap();
        assert!(page.records.iter().all(|r| r.attr("fur_color") == Some(&json!("gold"))));
        assert!(page.records.iter().all(|r| r.attr("touched").is_none()));

        let fido = page.records[0].clone();
        let saved = store.save(fido).await.unwrap();
        assert_eq!(saved.attr("touched"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_bulk_update_is_atomic_on_violation() {
        let store = seeded();
        let mut values = IndexMap::new();
        values.insert("name".to_string(), WriteValue::Attribute(json!("Same")));
        let err = store
            .bulk_update("dog", &FilterSpec::new(), &values)
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
        let page = store.fetch(&FetchQuery::new("dog")).await.unwrap();
        assert_eq!(page.records[0].attr("name"), Some(&json!("Fido")));
    }

    #[tokio::test]
    async fn test_prefetch_related_follows_paths() {
        let store = InMemoryStore::new();
        store
            .insert(Record::new("permission").with_id(1).with_attr("code", "read"))
            .unwrap();
        store
            .insert(
                Record::new("group")
                    .with_id(1)
                    .with_many("permissions", vec![RecordKey::new("permission", 1)]),
            )
            .unwrap();
        let user = store
            .insert(
                Record::new("user")
                    .with_id(1)
                    .with_many("groups", vec![RecordKey::new("group", 1)]),
            )
            .unwrap();

        let mut graph = crate::core::record::RecordGraph::new();
        graph.insert(user.clone());
        store
            .prefetch_related(
                &mut graph,
                &[user.key().unwrap()],
                &["groups.permissions".to_string()],
            )
            .await
            .unwrap();
        assert!(graph.contains(&RecordKey::new("group", 1)));
        assert!(graph.contains(&RecordKey::new("permission", 1)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_an_error() {
        let store = seeded();
        store.delete(&RecordKey::new("dog", 1)).await.unwrap();
        assert!(store.delete(&RecordKey::new("dog", 1)).await.is_err());
        assert_eq!(store.count("dog").unwrap(), 2);
    }

    #[test]
    fn test_relation_write_values_apply() {
        let mut record = dog("Fido").with_id(1);
        record.apply(
            "owner",
            &WriteValue::Relation(Relation::One(Some(RecordKey::new("user", 1)))),
        );
        assert!(record.relation("owner").is_some());
    }
}
