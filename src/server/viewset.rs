//! The dynamic view set
//!
//! One [`DynamicViewSet`] serves one resource. Each operation parses the
//! request features, resolves the active field set, talks to the data store
//! and renders the result through the sideloading processor.

use crate::config::DynamicRestSettings;
use crate::core::auth::{Action, AuthContext, PermissionChecker};
use crate::core::error::{DynRestResult, RequestError, ValidationError};
use crate::core::query::{PaginationMeta, QueryParams};
use crate::core::record::{Record, RecordGraph, RecordId, Relation};
use crate::core::request::{EXCLUDE, FeatureRequest, FeatureSet, INCLUDE, PatchAllMode};
use crate::core::resolver::{ActiveFieldSet, Expansion, FieldResolver, ResolveMode};
use crate::core::schema::{ResourceSchema, SchemaRegistry};
use crate::core::store::{DataStore, FetchQuery, FilterSpec, PageRequest};
use crate::mutation::{MutationCoordinator, bulk_items, single_item};
use crate::sideload::{Envelope, SideloadProcessor};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::sync::Arc;

pub const RELATED_FILTER_MESSAGE: &str = "Filtering is not enabled on relation endpoints.";

/// Status plus optional JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            body: None,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

/// Read and write endpoints for one resource
#[derive(Clone)]
pub struct DynamicViewSet {
    schema: Arc<ResourceSchema>,
    registry: Arc<SchemaRegistry>,
    settings: Arc<DynamicRestSettings>,
    store: Arc<dyn DataStore>,
    permissions: Arc<dyn PermissionChecker>,
    features: FeatureSet,
}

impl DynamicViewSet {
    pub fn new(
        schema: Arc<ResourceSchema>,
        registry: Arc<SchemaRegistry>,
        settings: Arc<DynamicRestSettings>,
        store: Arc<dyn DataStore>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            schema,
            registry,
            settings,
            store,
            permissions,
            features: FeatureSet::all(),
        }
    }

    /// Restrict which request features this view set honors
    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn resolver(&self) -> FieldResolver<'_> {
        FieldResolver::new(&self.registry, self.settings.defer_many_relations)
    }

    fn coordinator(&self) -> MutationCoordinator<'_> {
        MutationCoordinator::new(
            self.store.as_ref(),
            self.resolver(),
            &self.schema,
            &self.settings,
        )
    }

    fn parse(&self, query: &QueryParams) -> DynRestResult<FeatureRequest> {
        Ok(FeatureRequest::parse(query, &self.features, &self.settings)?)
    }

    fn authorize_read(&self, context: &AuthContext, record: &Record) -> DynRestResult<()> {
        if self
            .permissions
            .has_object_permission(context, Action::Read, record)
        {
            return Ok(());
        }
        Err(RequestError::Forbidden {
            message: format!("You do not have permission to read this {}.", self.schema.name),
        }
        .into())
    }

    fn authorize(&self, context: &AuthContext, action: Action) -> DynRestResult<()> {
        if self
            .permissions
            .has_permission(context, action, &self.schema.name)
        {
            Ok(())
        } else {
            Err(RequestError::Forbidden {
                message: format!(
                    "You do not have permission to {} {}.",
                    action.as_str(),
                    self.schema.plural
                ),
            }
            .into())
        }
    }

    /// The filtered queryset for this request
    fn queryset(&self, request: &FeatureRequest) -> DynRestResult<FilterSpec> {
        let resolver = self.resolver();
        let mut spec = FilterSpec::new();
        for (key, values) in &request.filters {
            spec.clauses
                .push(resolver.translate_filter(&self.schema, key, values.clone())?);
        }
        Ok(spec)
    }

    fn page(&self, request: &FeatureRequest) -> Option<PageRequest> {
        request
            .per_page
            .or(self.settings.page_size)
            .map(|per_page| PageRequest {
                page: request.page.unwrap_or(1),
                per_page,
            })
    }

    /// Records plus everything the field set needs to render them
    async fn load_graph(
        &self,
        records: &[Record],
        set: &ActiveFieldSet<'_>,
    ) -> DynRestResult<RecordGraph> {
        let mut graph = RecordGraph::new();
        graph.extend(records.iter().cloned());
        let roots: Vec<_> = records.iter().filter_map(Record::key).collect();
        let paths = set.prefetch_paths();
        if !paths.is_empty() {
            self.store
                .prefetch_related(&mut graph, &roots, &paths)
                .await?;
        }
        Ok(graph)
    }

    fn processor<'g>(&self, graph: &'g RecordGraph, request: &FeatureRequest) -> SideloadProcessor<'g> {
        SideloadProcessor::new(graph)
            .sideloading(request.sideloading_or(self.settings.enable_sideloading))
            .debug(request.is_debug())
    }

    fn with_debug(envelope: Envelope, request: &FeatureRequest, set: &ActiveFieldSet<'_>) -> Envelope {
        if request.is_debug() {
            envelope.with_meta("debug", json!({ "prefetch": set.prefetch_paths() }))
        } else {
            envelope
        }
    }

    async fn render_many(
        &self,
        records: &[Record],
        request: &FeatureRequest,
        mode: ResolveMode,
    ) -> DynRestResult<Envelope> {
        let set = self.resolver().resolve(&self.schema, &request.fields, mode)?;
        let graph = self.load_graph(records, &set).await?;
        let envelope = self
            .processor(&graph, request)
            .flatten_many(&self.schema.plural, records, &set);
        Ok(Self::with_debug(envelope, request, &set))
    }

    async fn render_one(
        &self,
        record: &Record,
        request: &FeatureRequest,
        mode: ResolveMode,
    ) -> DynRestResult<Envelope> {
        let set = self.resolver().resolve(&self.schema, &request.fields, mode)?;
        let records = std::slice::from_ref(record);
        let graph = self.load_graph(records, &set).await?;
        let envelope = self
            .processor(&graph, request)
            .flatten_one(&self.schema.name, record, &set);
        Ok(Self::with_debug(envelope, request, &set))
    }

    pub async fn list(&self, context: &AuthContext, query: &QueryParams) -> DynRestResult<ApiResponse> {
        self.authorize(context, Action::Read)?;
        let request = self.parse(query)?;
        // unknown include/exclude names fail before the store is touched
        self.resolver()
            .resolve(&self.schema, &request.fields, ResolveMode::Read)?;

        let resolver = self.resolver();
        let sort = request
            .sort
            .iter()
            .flatten()
            .map(|key| resolver.translate_sort(&self.schema, key))
            .collect::<Result<Vec<_>, _>>()?;
        let page = self.page(&request);
        // row-level read rules are applied before paging
        let object_level = self.permissions.object_level(Action::Read);
        let fetch = FetchQuery::new(&self.schema.name)
            .filter(self.queryset(&request)?)
            .sort(sort)
            .page(if object_level { None } else { page });
        let mut result = self.store.fetch(&fetch).await?;
        if object_level {
            result
                .records
                .retain(|r| self.permissions.has_object_permission(context, Action::Read, r));
            result.total = result.records.len();
            if let Some(page) = page {
                result.records = std::mem::take(&mut result.records)
                    .into_iter()
                    .skip(page.offset())
                    .take(page.per_page)
                    .collect();
            }
        }

        let mut envelope = self
            .render_many(&result.records, &request, ResolveMode::Read)
            .await?;
        if let Some(page) = page {
            let meta = PaginationMeta::new(page.page, page.per_page, result.total);
            if let Value::Object(map) = serde_json::to_value(meta)? {
                envelope.meta.extend(map);
            }
        }
        Ok(ApiResponse::ok(envelope.to_json()))
    }

    pub async fn retrieve(
        &self,
        context: &AuthContext,
        query: &QueryParams,
        id: &str,
    ) -> DynRestResult<ApiResponse> {
        self.authorize(context, Action::Read)?;
        let request = self.parse(query)?;
        let queryset = self.queryset(&request)?;
        let record = self
            .coordinator()
            .find(&queryset, &RecordId::parse(id))
            .await?;
        self.authorize_read(context, &record)?;
        let envelope = self.render_one(&record, &request, ResolveMode::Read).await?;
        Ok(ApiResponse::ok(envelope.to_json()))
    }

    /// Create one object, or many when the payload is bulk shaped
    pub async fn create(
        &self,
        context: &AuthContext,
        query: &QueryParams,
        payload: &Value,
    ) -> DynRestResult<ApiResponse> {
        self.authorize(context, Action::Create)?;
        let request = self.parse(query)?;
        let coordinator = self.coordinator();

        if let Some(items) = bulk_items(payload, &self.schema.plural) {
            let outcome = coordinator.create_many(items).await?;
            let status = if outcome.is_success() {
                StatusCode::CREATED
            } else {
                StatusCode::BAD_REQUEST
            };
            let envelope = self
                .render_many(&outcome.created, &request, ResolveMode::Write)
                .await?
                .with_errors(outcome.errors);
            return Ok(ApiResponse::new(status, envelope.to_json()));
        }

        let record = coordinator
            .create_one(single_item(payload, &self.schema.name))
            .await?;
        let envelope = self.render_one(&record, &request, ResolveMode::Write).await?;
        Ok(ApiResponse::new(StatusCode::CREATED, envelope.to_json()))
    }

    /// Update one object by id, many objects by the ids in a bulk payload, or
    /// every object of the queryset with patch-all.
    ///
    /// Patch-all must be enabled in the settings and requested with the
    /// `patch-all` parameter; see
    /// [`MutationCoordinator::patch_all`] for the two modes.
    pub async fn update(
        &self,
        context: &AuthContext,
        query: &QueryParams,
        id: Option<&str>,
        payload: &Value,
        partial: bool,
    ) -> DynRestResult<ApiResponse> {
        self.authorize(context, Action::Update)?;
        let request = self.parse(query)?;
        let queryset = self.queryset(&request)?;
        let coordinator = self.coordinator();
        let can_update = |record: &Record| {
            self.permissions
                .has_object_permission(context, Action::Update, record)
        };

        if self.settings.enable_bulk_update {
            if self.settings.enable_patch_all && request.patch_all != PatchAllMode::Off {
                let updated = coordinator
                    .patch_all(&queryset, payload, request.patch_all)
                    .await?;
                return Ok(ApiResponse::ok(json!({ "meta": { "updated": updated } })));
            }
            if let Some(items) = bulk_items(payload, &self.schema.plural) {
                let saved = coordinator
                    .update_many(&queryset, items, partial, &can_update)
                    .await?;
                let envelope = self.render_many(&saved, &request, ResolveMode::Write).await?;
                return Ok(ApiResponse::ok(envelope.to_json()));
            }
        }

        let Some(id) = id else {
            return Err(ValidationError::Invalid(
                "Expected an id in the URL or a bulk payload.".to_string(),
            )
            .into());
        };
        let record = coordinator
            .update_one(
                &queryset,
                &RecordId::parse(id),
                single_item(payload, &self.schema.name),
                partial,
                &can_update,
            )
            .await?;
        let envelope = self.render_one(&record, &request, ResolveMode::Write).await?;
        Ok(ApiResponse::ok(envelope.to_json()))
    }

    /// Delete one object by id, or many by the ids in a bulk payload
    pub async fn destroy(
        &self,
        context: &AuthContext,
        query: &QueryParams,
        id: Option<&str>,
        payload: Option<&Value>,
    ) -> DynRestResult<ApiResponse> {
        self.authorize(context, Action::Delete)?;
        let request = self.parse(query)?;
        let queryset = self.queryset(&request)?;
        let coordinator = self.coordinator();
        let can_delete = |record: &Record| {
            self.permissions
                .has_object_permission(context, Action::Delete, record)
        };

        if let Some(items) = payload.and_then(|p| bulk_items(p, &self.schema.plural)) {
            coordinator
                .destroy_many(&queryset, items, &can_delete)
                .await?;
            return Ok(ApiResponse::no_content());
        }

        match id {
            Some(id) => {
                coordinator
                    .destroy_one(&queryset, &RecordId::parse(id), &can_delete)
                    .await?;
                Ok(ApiResponse::no_content())
            }
            None => Err(RequestError::MethodNotAllowed {
                method: "DELETE".to_string(),
                path: format!("/{}", self.schema.plural),
            }
            .into()),
        }
    }

    /// Render the object(s) behind one relation of one record, as if
    /// sideloaded.
    ///
    /// Include and exclude paths are taken relative to the relation.
    /// Filtering is rejected.
    pub async fn list_related(
        &self,
        context: &AuthContext,
        query: &QueryParams,
        id: &str,
        field: &str,
    ) -> DynRestResult<ApiResponse> {
        self.authorize(context, Action::Read)?;
        let request = self.parse(query)?;
        if !request.filters.is_empty() {
            return Err(ValidationError::Invalid(RELATED_FILTER_MESSAGE.to_string()).into());
        }

        let spec = self
            .schema
            .get_field(field)
            .filter(|spec| spec.is_relation())
            .ok_or_else(|| ValidationError::Invalid(format!("Unknown field: \"{}\".", field)))?;

        let request = self.parse(&rescope(query, field))?;
        let set = self
            .resolver()
            .resolve(&self.schema, &request.fields, ResolveMode::Read)?;

        let root = self
            .coordinator()
            .find(&FilterSpec::new(), &RecordId::parse(id))
            .await?;
        self.authorize_read(context, &root)?;
        let graph = self.load_graph(std::slice::from_ref(&root), &set).await?;

        let Some(expansion) = set.get(field).map(|f| &f.expansion) else {
            return Ok(ApiResponse::ok(json!({})));
        };
        let processor = self.processor(&graph, &request);

        let envelope = match graph.follow(&root, &spec.source) {
            Some(Relation::Many(keys)) => {
                let Expansion::Nested(target) = expansion else {
                    return Ok(ApiResponse::ok(json!({})));
                };
                let records: Vec<Record> =
                    keys.iter().filter_map(|k| graph.get(k)).cloned().collect();
                processor.flatten_many(&target.schema.plural, &records, target)
            }
            Some(Relation::One(Some(key))) => {
                let target = match expansion {
                    Expansion::Nested(target) => Some(target.as_ref()),
                    Expansion::Generic(by_type) => by_type.get(&key.type_name),
                    Expansion::IdOnly => None,
                };
                match (target, graph.get(&key)) {
                    (Some(target), Some(record)) => {
                        processor.flatten_one(&target.schema.name, record, target)
                    }
                    _ => return Ok(ApiResponse::ok(json!({}))),
                }
            }
            _ => return Ok(ApiResponse::ok(json!({}))),
        };
        Ok(ApiResponse::ok(envelope.to_json()))
    }
}

/// Prefix include/exclude paths with `field` and include the field itself
fn rescope(query: &QueryParams, field: &str) -> QueryParams {
    let mut scoped = QueryParams::new();
    for (key, value) in query.iter() {
        if key == INCLUDE || key == EXCLUDE {
            scoped.push(key, format!("{}.{}", field, value));
        } else {
            scoped.push(key, value);
        }
    }
    scoped.push(INCLUDE, format!("{}.", field));
    scoped
}
