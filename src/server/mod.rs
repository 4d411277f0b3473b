//! Server module for building HTTP servers with per-resource routes
//!
//! `ServerBuilder` registers every resource schema under `/{plural}`, with
//! single-object routes, related-object routes and a health check.

pub mod builder;
pub mod handlers;
pub mod host;
pub mod router;
pub mod viewset;

pub use builder::ServerBuilder;
pub use host::ServerHost;
pub use viewset::{ApiResponse, DynamicViewSet};
