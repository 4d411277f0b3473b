//! Write paths: item validation and bulk mutation
//!
//! Bulk payloads are detected by shape (see [`bulk_items`]); everything else
//! goes through the single-object operations of [`MutationCoordinator`].

pub mod coordinator;
pub mod validate;

pub use coordinator::{
    Authorize, CreateOutcome, MutationCoordinator, UPDATE_MISSING_MESSAGE, bulk_items, single_item,
};
pub use validate::{FieldWrite, ItemValidator, REQUIRED_MESSAGE, ValidatedItem};
