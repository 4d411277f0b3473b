//! Field validators and input filters
//!
//! Validators and filters are attached to a [`FieldSpec`](crate::core::field::FieldSpec)
//! and run by the mutation coordinator on every supplied value, filters first.

pub mod filters;
pub mod validators;

use serde_json::Value;
use std::sync::Arc;

/// A field validator: receives the field name and the (filtered) value
pub type Validator = Arc<dyn Fn(&str, &Value) -> Result<(), String> + Send + Sync>;

/// An input filter: transforms a value before validation
pub type InputFilter = Arc<dyn Fn(&str, Value) -> Result<Value, String> + Send + Sync>;
