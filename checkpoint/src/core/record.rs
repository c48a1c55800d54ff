//! Checkpoint record codec.
//!
//! A record is the ordered list of declared field values of a value, encoded as
//! a JSON array. Every store backend writes and reads this same encoding.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Extract the declared fields of `value`, in declared order.
///
/// `value` must serialize to a map containing every declared field.
pub fn field_values<T: Serialize>(value: &T, fields: &[&str]) -> Result<Vec<Value>> {
    if fields.is_empty() {
        return Err(anyhow!("declared field list must not be empty"));
    }
    let serialized = serde_json::to_value(value).context("serialize checkpoint fields")?;
    let Value::Object(mut map) = serialized else {
        return Err(anyhow!(
            "checkpointed values must serialize to a map, got {}",
            kind_of(&serialized)
        ));
    };
    fields
        .iter()
        .map(|field| {
            map.remove(*field)
                .ok_or_else(|| anyhow!("declared field '{field}' missing from serialized value"))
        })
        .collect()
}

/// Rebuild a value from declared field names and their stored values.
///
/// Fails when the number of values differs from the number of declared fields.
pub fn apply_field_values<T: DeserializeOwned>(fields: &[&str], values: Vec<Value>) -> Result<T> {
    if values.len() != fields.len() {
        return Err(anyhow!(
            "record has {} values but {} fields are declared",
            values.len(),
            fields.len()
        ));
    }
    let map: Map<String, Value> = fields
        .iter()
        .map(|field| (*field).to_string())
        .zip(values)
        .collect();
    serde_json::from_value(Value::Object(map)).context("deserialize checkpoint fields")
}

pub fn encode(values: &[Value]) -> Result<Vec<u8>> {
    serde_json::to_vec(values).context("encode checkpoint record")
}

pub fn decode(blob: &[u8]) -> Result<Vec<Value>> {
    serde_json::from_slice(blob).context("decode checkpoint record")
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}
