//! Core module containing the request model, field resolution and the
//! data-access contract

pub mod auth;
pub mod error;
pub mod field;
pub mod pluralize;
pub mod query;
pub mod record;
pub mod request;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod validation;

pub use auth::{AuthContext, AuthPolicy, AuthProvider, NoAuthProvider, PermissionChecker};
pub use error::{DynRestError, DynRestResult};
pub use field::{FieldKind, FieldSpec};
pub use pluralize::Pluralizer;
pub use query::QueryParams;
pub use record::{Record, RecordGraph, RecordId, RecordKey, Relation};
pub use request::{FeatureRequest, FeatureSet, RequestFieldMap};
pub use resolver::{ActiveFieldSet, FieldResolver, ResolveMode};
pub use schema::{ResourceSchema, SchemaRegistry};
pub use store::{DataStore, Transaction};
