//! Route table

use crate::server::handlers::{self, AppState};
use axum::{Router, routing::get};

/// Build the resource routes:
/// - `GET|POST|PUT|PATCH|DELETE /{plural}`
/// - `GET|PUT|PATCH|DELETE /{plural}/{id}`
/// - `GET /{plural}/{id}/{field}` (related objects)
/// - `GET /health`
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/{plural}",
            get(handlers::list)
                .post(handlers::create)
                .put(handlers::replace_many)
                .patch(handlers::patch_many)
                .delete(handlers::destroy_many),
        )
        .route(
            "/{plural}/{id}",
            get(handlers::retrieve)
                .put(handlers::replace)
                .patch(handlers::patch)
                .delete(handlers::destroy),
        )
        .route("/{plural}/{id}/{field}", get(handlers::list_related))
        .with_state(state)
}
