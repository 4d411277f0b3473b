//! Reusable field validators
//!
//! Each constructor returns a closure that can be attached to a field with
//! [`FieldSpec::validate`](crate::core::field::FieldSpec::validate).

use regex::Regex;
use serde_json::Value;

/// Validator: field is required (not null)
pub fn required() -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    |_: &str, value: &Value| {
        if value.is_null() {
            Err("This field may not be null.".to_string())
        } else {
            Ok(())
        }
    }
}

/// Validator: string must contain something other than whitespace
pub fn not_blank() -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    |_: &str, value: &Value| match value.as_str() {
        Some(s) if s.trim().is_empty() => Err("This field may not be blank.".to_string()),
        _ => Ok(()),
    }
}

/// Validator: number must be positive
pub fn positive() -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    |_: &str, value: &Value| match value.as_f64() {
        Some(num) if num <= 0.0 => Err(format!("Ensure this value is positive (got {}).", num)),
        // non-numbers are left to other validators
        _ => Ok(()),
    }
}

/// Validator: string length (in characters) must be within range
pub fn string_length(
    min: usize,
    max: usize,
) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |_: &str, value: &Value| {
        let Some(s) = value.as_str() else {
            return Ok(());
        };
        let len = s.chars().count();
        if len < min {
            Err(format!(
                "Ensure this field has at least {} characters (it has {}).",
                min, len
            ))
        } else if len > max {
            Err(format!(
                "Ensure this field has no more than {} characters (it has {}).",
                max, len
            ))
        } else {
            Ok(())
        }
    }
}

/// Validator: number must not exceed maximum
pub fn max_value(max: f64) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |_: &str, value: &Value| match value.as_f64() {
        Some(num) if num > max => Err(format!(
            "Ensure this value is less than or equal to {} (got {}).",
            max, num
        )),
        _ => Ok(()),
    }
}

/// Validator: value must be in allowed list
pub fn in_list(
    allowed: Vec<String>,
) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |_: &str, value: &Value| match value.as_str() {
        Some(s) if !allowed.iter().any(|a| a == s) => {
            Err(format!("\"{}\" is not a valid choice.", s))
        }
        _ => Ok(()),
    }
}

/// Validator: string must match a regular expression
///
/// An invalid pattern rejects every string value.
pub fn pattern(
    expr: &str,
) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone + use<> {
    let compiled = Regex::new(expr).ok();
    let expr = expr.to_string();
    move |_: &str, value: &Value| {
        let Some(s) = value.as_str() else {
            return Ok(());
        };
        match &compiled {
            Some(re) if re.is_match(s) => Ok(()),
            _ => Err(format!("\"{}\" does not match pattern {}.", s, expr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_rejects_null_only() {
        let v = required();
        assert!(v("name", &json!(null)).is_err());
        assert!(v("name", &json!("")).is_ok());
        assert!(v("age", &json!(0)).is_ok());
    }

    #[test]
    fn test_not_blank() {
        let v = not_blank();
        assert_eq!(
            v("name", &json!("")).unwrap_err(),
            "This field may not be blank."
        );
        assert!(v("name", &json!("   ")).is_err());
        assert!(v("name", &json!("Fido")).is_ok());
        assert!(v("name", &json!(null)).is_ok());
    }

    #[test]
    fn test_positive() {
        let v = positive();
        assert!(v("age", &json!(-1)).is_err());
        assert!(v("age", &json!(0)).is_err());
        assert!(v("age", &json!(3)).is_ok());
        assert!(v("age", &json!("three")).is_ok());
    }

    #[test]
    fn test_string_length_counts_characters() {
        let v = string_length(2, 4);
        assert!(v("name", &json!("a")).is_err());
        assert!(v("name", &json!("ab")).is_ok());
        assert!(v("name", &json!("éééé")).is_ok());
        assert!(v("name", &json!("abcde")).is_err());
        assert!(v("name", &json!(12345)).is_ok());
    }

    #[test]
    fn test_max_value() {
        let v = max_value(10.0);
        assert!(v("n", &json!(10)).is_ok());
        assert!(v("n", &json!(10.5)).is_err());
    }

    #[test]
    fn test_in_list() {
        let v = in_list(vec!["gold".to_string(), "black".to_string()]);
        assert!(v("fur", &json!("gold")).is_ok());
        let err = v("fur", &json!("pink")).unwrap_err();
        assert!(err.contains("pink"));
    }

    #[test]
    fn test_pattern() {
        let v = pattern(r"^[a-z]+$");
        assert!(v("slug", &json!("abc")).is_ok());
        assert!(v("slug", &json!("ABC")).is_err());

        let broken = pattern("(");
        assert!(broken("slug", &json!("abc")).is_err());
    }

    #[test]
    fn test_pattern_outlives_its_source() {
        let v = {
            let expr = String::from("^[0-9]{3}$");
            pattern(&expr)
        };
        assert!(v("code", &json!("123")).is_ok());
        assert_eq!(
            v("code", &json!("12")).unwrap_err(),
            "\"12\" does not match pattern ^[0-9]{3}$."
        );
    }
}
