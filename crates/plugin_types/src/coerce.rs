//! Value coercion between JSON payloads and Rust types
//!
//! Arguments and results travel as `serde_json::Value`. Conversion is lenient
//! in the same few ways everywhere: scalars convert to strings, and strings
//! holding JSON are parsed.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{PluginError, PluginResult, TypeInfo, ValueKind};

/// Convert a value into `T`
///
/// Tries a direct deserialize first, then a stringified scalar (so `123`
/// becomes `"123"` for string targets), then parses a string as JSON.
pub fn coerce_value<T: DeserializeOwned>(value: Value) -> PluginResult<T> {
    let found = describe(&value);

    let value = match serde_json::from_value::<T>(value.clone()) {
        Ok(v) => return Ok(v),
        Err(_) => value,
    };

    match &value {
        Value::Number(_) | Value::Bool(_) => {
            if let Ok(v) = serde_json::from_value::<T>(Value::String(value.to_string())) {
                return Ok(v);
            }
        }
        Value::String(s) => {
            if let Ok(v) = serde_json::from_str::<T>(s) {
                return Ok(v);
            }
        }
        _ => {}
    }

    Err(PluginError::Conversion {
        expected: std::any::type_name::<T>().to_string(),
        found,
    })
}

/// Serialize an argument or result
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> PluginResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Coerce a value to a declared parameter type
///
/// `Json`, `Optional` and `Sequence` parameters pass through; scalar kinds are
/// converted from their string or numeric forms.
pub fn coerce_to_type(value: Value, declared: &TypeInfo) -> PluginResult<Value> {
    let mismatch = |value: &Value| PluginError::Conversion {
        expected: declared.name.clone(),
        found: describe(value),
    };

    match declared.kind {
        ValueKind::Json | ValueKind::Optional | ValueKind::Sequence => Ok(value),
        ValueKind::Unit => Ok(Value::Null),
        ValueKind::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(_) | Value::Bool(_) => Ok(Value::String(value.to_string())),
            other => Err(mismatch(&other)),
        },
        ValueKind::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
        ValueKind::Integer => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(mismatch(&value)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        ValueKind::Unsigned => match &value {
            Value::Number(n) if n.is_u64() => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<u64>()
                .map(Value::from)
                .map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        ValueKind::Float => match &value {
            Value::Number(_) => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool ({})", b),
        Value::Number(n) => format!("number ({})", n),
        Value::String(s) => format!("string ({:?})", s),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_number_to_string() {
        let s: String = coerce_value(json!(123)).unwrap();
        assert_eq!(s, "123");

        let b: String = coerce_value(json!(true)).unwrap();
        assert_eq!(b, "true");
    }

    #[test]
    fn test_coerce_string_to_number() {
        let n: i64 = coerce_value(json!("42")).unwrap();
        assert_eq!(n, 42);

        let v: Vec<u8> = coerce_value(json!("[1,2]")).unwrap();
        assert_eq!(v, vec![1, 2]);
    }

    #[test]
    fn test_coerce_same_type_passes_through() {
        let v: Value = coerce_value(json!({"a": 1})).unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn test_coerce_failure_reports_conversion() {
        let err = coerce_value::<i32>(json!({"a": 1})).unwrap_err();
        assert!(matches!(err, PluginError::Conversion { .. }));
    }

    #[test]
    fn test_coerce_to_declared_types() {
        let int = TypeInfo::new("i32", ValueKind::Integer);
        assert_eq!(coerce_to_type(json!("7"), &int).unwrap(), json!(7));
        assert_eq!(coerce_to_type(json!(7.0), &int).unwrap(), json!(7));
        assert!(coerce_to_type(json!(7.5), &int).is_err());

        let string = TypeInfo::new("String", ValueKind::String);
        assert_eq!(coerce_to_type(json!(3.5), &string).unwrap(), json!("3.5"));
        assert!(coerce_to_type(Value::Null, &string).is_err());

        let flag = TypeInfo::new("bool", ValueKind::Bool);
        assert_eq!(coerce_to_type(json!("TRUE"), &flag).unwrap(), json!(true));

        let any = TypeInfo::json();
        assert_eq!(coerce_to_type(json!([1]), &any).unwrap(), json!([1]));
    }
}
