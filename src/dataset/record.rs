//! Dataset record parsing

use crate::error::{Error, Result};

/// One dataset record: field key to JSON value, in input order
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Parse a JSON dataset into records.
///
/// Accepts either a top-level array of record objects or an object with a
/// `records` array, so exports from different tools load unmodified.
pub fn parse_dataset(bytes: &[u8]) -> Result<Vec<Record>> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidDataset {
            reason: format!("not valid JSON: {}", e),
        })?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("records") {
            Some(serde_json::Value::Array(items)) => items,
            Some(_) => {
                return Err(Error::InvalidDataset {
                    reason: "\"records\" must be an array".to_string(),
                })
            }
            None => {
                return Err(Error::InvalidDataset {
                    reason: "expected an array of records or an object with a \"records\" array"
                        .to_string(),
                })
            }
        },
        _ => {
            return Err(Error::InvalidDataset {
                reason: "expected an array of records or an object with a \"records\" array"
                    .to_string(),
            })
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match item {
            serde_json::Value::Object(record) => records.push(record),
            other => {
                return Err(Error::InvalidDataset {
                    reason: format!("record {} is not an object: {}", i, type_name(&other)),
                })
            }
        }
    }

    Ok(records)
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
