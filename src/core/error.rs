//! Typed error handling for dynrest
//!
//! Every failure a request can hit is one of a small set of categories, each
//! carrying enough detail to point the client at the offending parameter,
//! field or item.
//!
//! # Error Categories
//!
//! - [`ParseError`]: malformed feature keys, dotted paths or patch-all modes
//! - [`ValidationError`]: unknown fields, write violations, per-item failures
//! - [`ResourceError`]: missing objects and unknown resource types
//! - [`StorageError`]: failures reported by the data-access collaborator
//! - [`RequestError`]: HTTP-level problems (bad body, forbidden, bad method)
//! - [`ConfigError`]: configuration loading and schema declaration problems
//!
//! # Example
//!
//! ```rust,ignore
//! match viewset.retrieve(&params, &id).await {
//!     Err(DynRestError::Resource(ResourceError::NotFound { resource, id })) => {
//!         println!("{} {} is gone", resource, id);
//!     }
//!     Err(e) => eprintln!("{} ({})", e, e.status_code()),
//!     Ok(response) => println!("{:?}", response.body),
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// The main error type for dynrest
#[derive(Debug, Error)]
pub enum DynRestError {
    /// Malformed request parameters
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Input rejected by field resolution or item validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Missing objects or resource types
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Data store failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// HTTP request errors
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl DynRestError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DynRestError::Parse(_) => StatusCode::BAD_REQUEST,
            DynRestError::Validation(_) => StatusCode::BAD_REQUEST,
            DynRestError::Resource(e) => e.status_code(),
            DynRestError::Storage(e) => e.status_code(),
            DynRestError::Request(e) => e.status_code(),
            DynRestError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DynRestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            DynRestError::Parse(_) => "PARSE_ERROR",
            DynRestError::Validation(_) => "VALIDATION_ERROR",
            DynRestError::Resource(e) => e.error_code(),
            DynRestError::Storage(e) => e.error_code(),
            DynRestError::Request(e) => e.error_code(),
            DynRestError::Config(_) => "CONFIG_ERROR",
            DynRestError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            DynRestError::Resource(ResourceError::NotFound { resource, id }) => Some(json!({
                "resource": resource,
                "id": id,
            })),
            DynRestError::Validation(ValidationError::FieldErrors(errors)) => {
                Some(json!({ "fields": errors }))
            }
            DynRestError::Validation(ValidationError::Items(items)) => {
                Some(json!({ "items": items }))
            }
            DynRestError::Validation(ValidationError::Persistence { data, .. }) => {
                Some(json!({ "data": data }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for DynRestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Parse Errors
// =============================================================================

/// Errors raised while turning query parameters into a feature request
#[derive(Debug, Error)]
pub enum ParseError {
    /// An object-feature key whose braces are not closed (`filter{name`)
    #[error("\"{key}\" is not a well-formed filter key.")]
    MalformedFeatureKey { key: String },

    /// A dotted include/exclude path with an empty interior segment
    #[error("\"{path}\" is not a valid field.")]
    MalformedPath { path: String },

    /// An unsupported patch-all value
    #[error("\"{value}\" is not valid for patch-all")]
    InvalidPatchAll { value: String },

    /// A pagination parameter that is not a positive integer
    #[error("\"{value}\" is not a valid value for {param}")]
    InvalidNumber { param: String, value: String },
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors related to input validation and field resolution
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A requested or written field the resource does not declare
    #[error("\"{field}\" is not a valid field name for \"{resource}\".")]
    UnknownField { resource: String, field: String },

    /// A patch-all key the resource does not declare
    #[error("Unknown field: \"{field}\"")]
    UnknownWriteField { field: String },

    /// A field that cannot be written in this context
    #[error("Cannot update field: \"{field}\"")]
    NotWritable { field: String },

    /// All field errors of a single item
    #[error("Validation errors: {}", format_field_errors(.0))]
    FieldErrors(Vec<FieldValidationError>),

    /// Per-item errors of a batch (index and detail of each failing item)
    #[error("Validation failed for {} item(s)", .0.len())]
    Items(Vec<Value>),

    /// A persistence-level failure re-raised with the attempted data
    #[error("{message}\n{cause}\nData: {data}")]
    Persistence {
        message: String,
        cause: String,
        data: Value,
    },

    /// Any other client-visible rule
    #[error("{0}")]
    Invalid(String),
}

/// A single field validation error
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldValidationError {
    pub field: String,
    pub message: String,
}

impl FieldValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn format_field_errors(errors: &[FieldValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Resource Errors
// =============================================================================

/// Errors related to addressing resources and objects
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Single object was not found within the current queryset
    #[error("{resource} with id '{id}' not found")]
    NotFound { resource: String, id: String },

    /// Resource type is not registered
    #[error("Unknown resource type: {resource}")]
    UnknownType { resource: String },
}

impl ResourceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ResourceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ResourceError::UnknownType { .. } => StatusCode::NOT_FOUND,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ResourceError::NotFound { .. } => "NOT_FOUND",
            ResourceError::UnknownType { .. } => "UNKNOWN_RESOURCE_TYPE",
        }
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors reported by a data store
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// A write conflicted with a store constraint (unique value, hook veto)
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// A referenced row does not exist
    #[error("{type_name} with id '{id}' does not exist")]
    Missing { type_name: String, id: String },

    /// Transaction error
    #[error("Transaction error: {message}")]
    TransactionError { message: String },

    /// Backend not available
    #[error("Storage backend '{backend}' is unavailable")]
    Unavailable { backend: String },
}

impl StorageError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::ConstraintViolation { .. } => StatusCode::BAD_REQUEST,
            StorageError::Missing { .. } => StatusCode::NOT_FOUND,
            StorageError::TransactionError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            StorageError::Missing { .. } => "NOT_FOUND",
            StorageError::TransactionError { .. } => "TRANSACTION_ERROR",
            StorageError::Unavailable { .. } => "STORAGE_UNAVAILABLE",
        }
    }

    /// Whether this is a constraint violation raised by a write
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StorageError::ConstraintViolation { .. })
    }
}

// =============================================================================
// Request Errors
// =============================================================================

/// Errors related to HTTP requests
#[derive(Debug, Error)]
pub enum RequestError {
    /// Invalid request body
    #[error("Invalid request body: {message}")]
    InvalidBody { message: String },

    /// Forbidden operation
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Method not allowed
    #[error("Method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            RequestError::Forbidden { .. } => StatusCode::FORBIDDEN,
            RequestError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RequestError::InvalidBody { .. } => "INVALID_BODY",
            RequestError::Forbidden { .. } => "FORBIDDEN",
            RequestError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
        }
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse configuration
    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    /// A field or resource declaration that cannot be honored
    #[error("Invalid declaration for '{name}': {message}")]
    InvalidDeclaration { name: String, message: String },
}

// =============================================================================
// Conversions from external errors
// =============================================================================

impl From<serde_json::Error> for DynRestError {
    fn from(err: serde_json::Error) -> Self {
        DynRestError::Request(RequestError::InvalidBody {
            message: err.to_string(),
        })
    }
}

// =============================================================================
// Result type alias
// =============================================================================

/// A specialized Result type for dynrest operations
pub type DynRestResult<T> = Result<T, DynRestError>;
