//! Reusable input filters
//!
//! Filters transform a supplied value before validators see it.

use serde_json::Value;

/// Filter: trim whitespace from string
pub fn trim() -> impl Fn(&str, Value) -> Result<Value, String> + Send + Sync + Clone {
    |_: &str, value: Value| match value {
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        other => Ok(other),
    }
}

/// Filter: convert string to uppercase
pub fn uppercase() -> impl Fn(&str, Value) -> Result<Value, String> + Send + Sync + Clone {
    |_: &str, value: Value| match value {
        Value::String(s) => Ok(Value::String(s.to_uppercase())),
        other => Ok(other),
    }
}

/// Filter: convert string to lowercase
pub fn lowercase() -> impl Fn(&str, Value) -> Result<Value, String> + Send + Sync + Clone {
    |_: &str, value: Value| match value {
        Value::String(s) => Ok(Value::String(s.to_lowercase())),
        other => Ok(other),
    }
}
