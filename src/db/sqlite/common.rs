use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::db::error::{DbError, DbResult};

/// Convert a stored epoch-millis column back into a timestamp.
pub fn from_millis(ms: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Internal(format!("Invalid timestamp in database: {}", ms)))
}

/// Parse the JSON `fields` column, which must hold an object.
pub fn parse_fields(raw: &str) -> DbResult<Map<String, Value>> {
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(DbError::Internal(format!(
            "Document fields must be a JSON object, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
