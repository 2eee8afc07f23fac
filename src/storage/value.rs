//! Conversions between SQLite values and their archive representations.
//!
//! Line-record files carry JSON values; delimited-text files carry strings.
//! Blobs are base64 in both, wrapped as `{"$base64": "..."}` in JSON so they
//! can be told apart from text on the way back.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rusqlite::types::Value;
use serde_json::{Map, Number};

const BLOB_KEY: &str = "$base64";

/// Convert a SQLite value to JSON.
#[must_use]
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::Number((*i).into()),
        Value::Real(f) => Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(bytes) => {
            let mut obj = Map::new();
            obj.insert(BLOB_KEY.to_string(), serde_json::Value::String(STANDARD.encode(bytes)));
            serde_json::Value::Object(obj)
        }
    }
}

/// Convert a JSON value back to a SQLite value.
///
/// Arrays and objects other than the blob wrapper are stored as their JSON text.
#[must_use]
pub fn from_json(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Real))
            .unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Object(obj) => {
            if obj.len() == 1 {
                if let Some(decoded) = obj
                    .get(BLOB_KEY)
                    .and_then(serde_json::Value::as_str)
                    .and_then(|s| STANDARD.decode(s).ok())
                {
                    return Value::Blob(decoded);
                }
            }
            Value::Text(value.to_string())
        }
        serde_json::Value::Array(_) => Value::Text(value.to_string()),
    }
}

/// Render a value as a delimited-text field. `NULL` becomes the empty string.
#[must_use]
pub fn to_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(bytes) => STANDARD.encode(bytes),
    }
}

/// Parse an unquoted delimited-text field. Empty means `NULL`; a quoted empty
/// field never reaches here. Column affinity in the destination table turns
/// numeric text back into numbers.
#[must_use]
pub fn from_field(field: &str) -> Value {
    if field.is_empty() {
        Value::Null
    } else {
        Value::Text(field.to_string())
    }
}
