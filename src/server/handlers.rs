//! HTTP handlers
//!
//! Thin adapters from axum extractors to [`DynamicViewSet`] operations. All
//! handlers are resource-agnostic: the resource is the first path segment.

use crate::core::auth::AuthContext;
use crate::core::error::{DynRestError, RequestError};
use crate::core::query::QueryParams;
use crate::server::host::ServerHost;
use crate::server::viewset::{ApiResponse, DynamicViewSet};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use serde_json::{Value, json};
use std::sync::Arc;

pub type AppState = Arc<ServerHost>;

type HandlerResult = Result<ApiResponse, DynRestError>;

async fn prepare(
    host: &ServerHost,
    plural: &str,
    headers: &HeaderMap,
    query: Option<String>,
) -> Result<(DynamicViewSet, AuthContext, QueryParams), DynRestError> {
    let viewset = host.viewset(plural)?;
    let context = host.auth_provider.extract_context(headers).await;
    let query = QueryParams::parse(query.as_deref().unwrap_or_default());
    Ok((viewset, context, query))
}

/// An empty body is `None`; anything else must be JSON
fn parse_body(body: &Bytes) -> Result<Option<Value>, DynRestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body).map(Some).map_err(|e| {
        RequestError::InvalidBody {
            message: e.to_string(),
        }
        .into()
    })
}

fn require_body(body: &Bytes) -> Result<Value, DynRestError> {
    parse_body(body)?.ok_or_else(|| {
        RequestError::InvalidBody {
            message: "a JSON body is required".to_string(),
        }
        .into()
    })
}

pub async fn list(
    State(host): State<AppState>,
    Path(plural): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    viewset.list(&context, &query).await
}

pub async fn create(
    State(host): State<AppState>,
    Path(plural): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    let payload = require_body(&body)?;
    viewset.create(&context, &query, &payload).await
}

pub async fn replace_many(
    State(host): State<AppState>,
    Path(plural): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    let payload = require_body(&body)?;
    viewset.update(&context, &query, None, &payload, false).await
}

pub async fn patch_many(
    State(host): State<AppState>,
    Path(plural): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    let payload = require_body(&body)?;
    viewset.update(&context, &query, None, &payload, true).await
}

pub async fn destroy_many(
    State(host): State<AppState>,
    Path(plural): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    let payload = parse_body(&body)?;
    viewset
        .destroy(&context, &query, None, payload.as_ref())
        .await
}

pub async fn retrieve(
    State(host): State<AppState>,
    Path((plural, id)): Path<(String, String)>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    viewset.retrieve(&context, &query, &id).await
}

pub async fn replace(
    State(host): State<AppState>,
    Path((plural, id)): Path<(String, String)>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    let payload = require_body(&body)?;
    viewset
        .update(&context, &query, Some(&id), &payload, false)
        .await
}

pub async fn patch(
    State(host): State<AppState>,
    Path((plural, id)): Path<(String, String)>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    let payload = require_body(&body)?;
    viewset
        .update(&context, &query, Some(&id), &payload, true)
        .await
}

pub async fn destroy(
    State(host): State<AppState>,
    Path((plural, id)): Path<(String, String)>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    let payload = parse_body(&body)?;
    viewset
        .destroy(&context, &query, Some(&id), payload.as_ref())
        .await
}

pub async fn list_related(
    State(host): State<AppState>,
    Path((plural, id, field)): Path<(String, String, String)>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> HandlerResult {
    let (viewset, context, query) = prepare(&host, &plural, &headers, query).await?;
    viewset.list_related(&context, &query, &id, &field).await
}

pub async fn health(State(host): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "dynrest",
        "backend": host.store.backend(),
        "resources": host.resource_names(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(&Bytes::from_static(b"")).unwrap(), None);
        assert_eq!(parse_body(&Bytes::from_static(b" \n")).unwrap(), None);
        assert_eq!(
            parse_body(&Bytes::from_static(b"[1, 2]")).unwrap(),
            Some(json!([1, 2]))
        );
        let err = parse_body(&Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_BODY");
        assert!(require_body(&Bytes::new()).is_err());
    }
}
