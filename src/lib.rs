//! # dynrest
//!
//! Dynamic projection, sideloading and bulk mutation for JSON REST APIs.
//!
//! ## Features
//!
//! - **Field projection**: `include[]` / `exclude[]` with dotted paths and
//!   deferred fields
//! - **Sideloading**: related objects rendered once into a `linked` section,
//!   deduplicated by type and id, cycles included
//! - **Filtering, sorting, paging**: `filter{field.op}`, `sort[]`, `page`,
//!   `per_page`
//! - **Bulk writes**: create-many (partial or transactional), update-many by
//!   id, patch-all by query or loop, destroy-many
//! - **Configuration-Based**: declare settings and resources in YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dynrest::prelude::*;
//!
//! let app = ServerBuilder::new()
//!     .with_store(InMemoryStore::new())
//!     .register(
//!         ResourceSchema::new("dog")
//!             .field(FieldSpec::plain("name").required())
//!             .field(FieldSpec::relation_one("owner", "user")),
//!     )
//!     .register(ResourceSchema::new("user").field(FieldSpec::plain("name")))
//!     .build()?;
//! ```
//!
//! `GET /dogs?include[]=owner.` then renders each dog with its owner id and
//! every distinct owner once under `linked.user`.

pub mod config;
pub mod core;
pub mod mutation;
pub mod server;
pub mod sideload;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        auth::{
            Action, AllowAll, AuthContext, AuthPolicy, AuthProvider, HeaderAuthProvider,
            NoAuthProvider, PermissionChecker, PolicyPermissions,
        },
        error::{DynRestError, DynRestResult, StorageError, ValidationError},
        field::{FieldKind, FieldSpec},
        pluralize::Pluralizer,
        query::QueryParams,
        record::{Record, RecordGraph, RecordId, RecordKey, Relation, WriteValue},
        request::{Feature, FeatureRequest, FeatureSet, PatchAllMode},
        schema::{ResourceSchema, SchemaRegistry},
        store::{DataStore, FetchPage, FetchQuery, FilterSpec, Transaction},
        validation::{filters, validators},
    };

    // === Rendering and writes ===
    pub use crate::mutation::{CreateOutcome, MutationCoordinator};
    pub use crate::sideload::{Envelope, SideloadProcessor};

    // === Storage ===
    pub use crate::storage::{IdStrategy, InMemoryStore};

    // === Config ===
    pub use crate::config::{DynamicRestConfig, DynamicRestSettings, ResourceConfig};

    // === Server ===
    pub use crate::server::{ApiResponse, DynamicViewSet, ServerBuilder};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
}
