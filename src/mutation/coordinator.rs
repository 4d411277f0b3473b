//! Bulk mutation coordinator
//!
//! Runs validated writes against a [`DataStore`]. Every operation is scoped to
//! a queryset (the [`FilterSpec`] the caller may see) and multi-record writes
//! go through a single [`Transaction`] so they apply completely or not at all.
//! Partial bulk creation is the one exception: each valid item is persisted on
//! its own.

use crate::config::DynamicRestSettings;
use crate::core::error::{
    DynRestError, DynRestResult, RequestError, ResourceError, StorageError, ValidationError,
};
use crate::core::record::{Record, RecordId};
use crate::core::request::PatchAllMode;
use crate::core::resolver::{FieldResolver, WriteContext};
use crate::core::schema::{PK_FIELD, ResourceSchema};
use crate::core::store::{DataStore, FetchQuery, FilterSpec, Transaction};
use crate::mutation::validate::{ItemValidator, ValidatedItem};
use indexmap::{IndexMap, IndexSet};
use serde_json::{Value, json};

pub const UPDATE_MISSING_MESSAGE: &str = "Could not find all objects to update.";
pub const DUPLICATE_ID_MESSAGE: &str = "This id appears more than once.";
const BULK_UPDATE_FAILED: &str = "Failed to bulk-update records:";
const LOOP_UPDATE_FAILED: &str = "Failed to update records:";
const CREATE_FAILED: &str = "Failed to create records:";

/// Object-level permission check applied to each record before it is
/// changed or deleted
pub type Authorize<'a> = &'a (dyn Fn(&Record) -> bool + Send + Sync);

/// Items of a bulk payload: a bare JSON list, or an object whose only key is
/// the plural resource name holding a list.
///
/// Empty lists are not treated as bulk.
pub fn bulk_items<'v>(payload: &'v Value, plural: &str) -> Option<&'v [Value]> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(object) if object.len() == 1 => match object.get(plural) {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    (!items.is_empty()).then_some(items.as_slice())
}

/// A single-object payload, unwrapped from `{"<singular>": {...}}` if needed
pub fn single_item<'v>(payload: &'v Value, singular: &str) -> &'v Value {
    match payload {
        Value::Object(object) if object.len() == 1 => match object.get(singular) {
            Some(inner @ Value::Object(_)) => inner,
            _ => payload,
        },
        _ => payload,
    }
}

/// Result of a bulk create
#[derive(Debug, Default)]
pub struct CreateOutcome {
    pub created: Vec<Record>,
    /// `{"detail": message, "source": item}` per rejected item
    pub errors: Vec<Value>,
}

impl CreateOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

fn item_error(detail: impl ToString, source: &Value) -> Value {
    json!({ "detail": detail.to_string(), "source": source })
}

/// Coordinates writes for one resource within one request
pub struct MutationCoordinator<'a> {
    store: &'a dyn DataStore,
    schema: &'a ResourceSchema,
    validator: ItemValidator<'a>,
    settings: &'a DynamicRestSettings,
}

impl<'a> MutationCoordinator<'a> {
    pub fn new(
        store: &'a dyn DataStore,
        resolver: FieldResolver<'a>,
        schema: &'a ResourceSchema,
        settings: &'a DynamicRestSettings,
    ) -> Self {
        Self {
            store,
            schema,
            validator: ItemValidator::new(resolver, schema),
            settings,
        }
    }

    /// Look up one record inside the queryset
    pub async fn find(&self, queryset: &FilterSpec, id: &RecordId) -> DynRestResult<Record> {
        let query = FetchQuery::new(&self.schema.name)
            .filter(queryset.clone().with_ids(vec![id.clone()]));
        self.store
            .fetch(&query)
            .await?
            .records
            .into_iter()
            .next()
            .ok_or_else(|| {
                ResourceError::NotFound {
                    resource: self.schema.name.clone(),
                    id: id.to_string(),
                }
                .into()
            })
    }

    async fn fetch_ids(
        &self,
        queryset: &FilterSpec,
        ids: Vec<RecordId>,
    ) -> DynRestResult<IndexMap<RecordId, Record>> {
        let query = FetchQuery::new(&self.schema.name).filter(queryset.clone().with_ids(ids));
        Ok(self
            .store
            .fetch(&query)
            .await?
            .records
            .into_iter()
            .filter_map(|r| r.id.clone().map(|id| (id, r)))
            .collect())
    }

    fn new_record(&self, item: &ValidatedItem) -> Result<Record, ValidationError> {
        let mut record = Record::new(&self.schema.name);
        item.apply_to(&mut record)?;
        Ok(record)
    }

    pub async fn create_one(&self, payload: &Value) -> DynRestResult<Record> {
        let item = self.validator.validate(payload, WriteContext::Create, false)?;
        let record = self.new_record(&item)?;
        let created = self.store.create(record).await?;
        tracing::info!("Created {} {:?}", self.schema.name, created.id);
        Ok(created)
    }

    /// Create every item of a bulk payload.
    ///
    /// With partial creation enabled each valid item is persisted at once
    /// and a store constraint violation becomes that item's error. Otherwise
    /// nothing is persisted unless every item validates, and the batch is
    /// written in one transaction.
    pub async fn create_many(&self, items: &[Value]) -> DynRestResult<CreateOutcome> {
        let partial = self.settings.enable_bulk_partial_creation;
        let mut outcome = CreateOutcome::default();
        let mut pending = Vec::new();

        for source in items {
            let record = self
                .validator
                .validate(source, WriteContext::Create, false)
                .and_then(|item| self.new_record(&item));
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    outcome.errors.push(item_error(e, source));
                    continue;
                }
            };

            if !partial {
                pending.push(record);
                continue;
            }
            match self.store.create(record).await {
                Ok(created) => outcome.created.push(created),
                Err(e) if e.is_constraint_violation() => {
                    outcome.errors.push(item_error(e, source));
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !partial && outcome.errors.is_empty() {
            let mut tx = self.store.begin().await?;
            let mut created = Vec::with_capacity(pending.len());
            for record in pending {
                match tx.create(record).await {
                    Ok(record) => created.push(record),
                    Err(e) => {
                        abandon(tx).await;
                        return Err(persistence_error(CREATE_FAILED, e, json!(items)));
                    }
                }
            }
            tx.commit().await?;
            outcome.created = created;
        }

        tracing::info!(
            "Bulk create of {}: {} created, {} rejected",
            self.schema.name,
            outcome.created.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    pub async fn update_one(
        &self,
        queryset: &FilterSpec,
        id: &RecordId,
        payload: &Value,
        partial: bool,
        authorize: Authorize<'_>,
    ) -> DynRestResult<Record> {
        let mut record = self.find(queryset, id).await?;
        if !authorize(&record) {
            return Err(forbidden(&self.schema.name));
        }
        let item = self.validator.validate(payload, WriteContext::Update, partial)?;
        item.apply_to(&mut record)?;
        Ok(self.store.save(record).await?)
    }

    /// Update records identified by the `id` of each item.
    ///
    /// All ids must exist within the queryset, and all items must validate,
    /// before anything is written.
    pub async fn update_many(
        &self,
        queryset: &FilterSpec,
        items: &[Value],
        partial: bool,
        authorize: Authorize<'_>,
    ) -> DynRestResult<Vec<Record>> {
        let mut validated = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        let mut seen = IndexSet::new();
        for source in items {
            match self.validator.validate(source, WriteContext::Update, partial) {
                Ok(item) => match item.id.clone() {
                    None => errors.push(item_error("This item has no id.", source)),
                    Some(id) if seen.contains(&id) => {
                        errors.push(item_error(DUPLICATE_ID_MESSAGE, source))
                    }
                    Some(id) => {
                        seen.insert(id);
                        validated.push(item);
                    }
                },
                Err(e) => errors.push(item_error(e, source)),
            }
        }
        if !errors.is_empty() {
            return Err(ValidationError::Items(errors).into());
        }

        let ids: Vec<RecordId> = seen.into_iter().collect();
        let mut found = self.fetch_ids(queryset, ids.clone()).await?;
        if found.len() != ids.len() {
            return Err(ValidationError::Invalid(UPDATE_MISSING_MESSAGE.to_string()).into());
        }
        if let Some(denied) = found.values().find(|r| !authorize(*r)) {
            tracing::debug!("Update of {:?} denied", denied.key());
            return Err(forbidden(&self.schema.name));
        }

        let mut tx = self.store.begin().await?;
        let mut saved = Vec::with_capacity(validated.len());
        for item in &validated {
            let Some(mut record) = item.id.as_ref().and_then(|id| found.shift_remove(id)) else {
                abandon(tx).await;
                return Err(ValidationError::Invalid(UPDATE_MISSING_MESSAGE.to_string()).into());
            };
            let result = match item.apply_to(&mut record) {
                Ok(()) => tx.save(record).await.map_err(DynRestError::from),
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(record) => saved.push(record),
                Err(e) => {
                    abandon(tx).await;
                    return Err(match e {
                        DynRestError::Storage(e) if e.is_constraint_violation() => {
                            persistence_error(LOOP_UPDATE_FAILED, e, json!(items))
                        }
                        other => other,
                    });
                }
            }
        }
        tx.commit().await?;

        tracing::info!("Bulk update of {}: {} updated", self.schema.name, saved.len());
        Ok(saved)
    }

    /// Apply one object of values to every record of the queryset.
    ///
    /// [`PatchAllMode::Query`] issues a single bulk statement: fast, but
    /// per-record save hooks do not run and constraints they enforce are not
    /// checked. [`PatchAllMode::Loop`] loads every record and saves each one
    /// inside a transaction: hooks run, at the cost of one write per record.
    pub async fn patch_all(
        &self,
        queryset: &FilterSpec,
        payload: &Value,
        mode: PatchAllMode,
    ) -> DynRestResult<usize> {
        let item = self.validator.validate_patch_all(payload)?;
        let updated = match mode {
            PatchAllMode::Query => self
                .store
                .bulk_update(&self.schema.name, queryset, &item.values())
                .await
                .map_err(|e| persistence_error(BULK_UPDATE_FAILED, e, payload.clone()))?,
            PatchAllMode::Loop => self.patch_all_loop(queryset, &item, payload).await?,
            PatchAllMode::Off => {
                return Err(DynRestError::Internal(
                    "patch-all called without a mode".to_string(),
                ));
            }
        };
        tracing::info!(
            "Patch-all ({:?}) of {}: {} updated",
            mode,
            self.schema.name,
            updated
        );
        Ok(updated)
    }

    async fn patch_all_loop(
        &self,
        queryset: &FilterSpec,
        item: &ValidatedItem,
        payload: &Value,
    ) -> DynRestResult<usize> {
        let query = FetchQuery::new(&self.schema.name).filter(queryset.clone());
        let records = self.store.fetch(&query).await?.records;

        let mut tx = self.store.begin().await?;
        let mut updated = 0;
        for mut record in records {
            let result = match item.apply_to(&mut record) {
                Ok(()) => tx.save(record).await.map_err(DynRestError::from),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                abandon(tx).await;
                return Err(match e {
                    DynRestError::Storage(e) => {
                        persistence_error(LOOP_UPDATE_FAILED, e, payload.clone())
                    }
                    other => other,
                });
            }
            updated += 1;
        }
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn destroy_one(
        &self,
        queryset: &FilterSpec,
        id: &RecordId,
        authorize: Authorize<'_>,
    ) -> DynRestResult<()> {
        let record = self.find(queryset, id).await?;
        if !authorize(&record) {
            return Err(forbidden(&self.schema.name));
        }
        if let Some(key) = record.key() {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    /// Delete the listed records that fall within the queryset.
    ///
    /// Items are bare ids or objects carrying an `id`. Every record is
    /// permission-checked before the first deletion.
    pub async fn destroy_many(
        &self,
        queryset: &FilterSpec,
        items: &[Value],
        authorize: Authorize<'_>,
    ) -> DynRestResult<usize> {
        let ids = items
            .iter()
            .map(|item| {
                let raw = match item {
                    Value::Object(object) => object.get(PK_FIELD).unwrap_or(&Value::Null),
                    other => other,
                };
                RecordId::from_value(raw).ok_or_else(|| {
                    DynRestError::from(ValidationError::Invalid(format!(
                        "\"{}\" is not a valid id.",
                        raw
                    )))
                })
            })
            .collect::<DynRestResult<IndexSet<RecordId>>>()?;

        let records = self.fetch_ids(queryset, ids.into_iter().collect()).await?;
        if records.values().any(|r| !authorize(r)) {
            return Err(forbidden(&self.schema.name));
        }

        let mut tx = self.store.begin().await?;
        for record in records.values() {
            let Some(key) = record.key() else { continue };
            if let Err(e) = tx.delete(&key).await {
                abandon(tx).await;
                return Err(e.into());
            }
        }
        tx.commit().await?;

        tracing::info!("Bulk delete of {}: {} deleted", self.schema.name, records.len());
        Ok(records.len())
    }
}

fn persistence_error(message: &str, cause: StorageError, data: Value) -> DynRestError {
    ValidationError::Persistence {
        message: message.to_string(),
        cause: cause.to_string(),
        data,
    }
    .into()
}

/// Roll back after a failed write, keeping the failure that caused it
async fn abandon(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("Rollback failed: {}", e);
    }
}

fn forbidden(resource: &str) -> DynRestError {
    RequestError::Forbidden {
        message: format!("You do not have permission to modify this {}.", resource),
    }
    .into()
}
