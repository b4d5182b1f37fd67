//! JSON Schema validation and canonical rendering

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use crate::error::{RegistryError, Result};

fn parse_error(detail: impl ToString) -> RegistryError {
    RegistryError::Parse {
        format: "JSON".to_string(),
        detail: detail.to_string(),
    }
}

/// Validate a JSON Schema document and return its canonical text:
/// compact JSON with lexicographically sorted object keys.
pub fn canonicalize(raw: &str) -> Result<String> {
    let value: Value = serde_json::from_str(raw).map_err(parse_error)?;

    // Compiling validates the document against draft-7; the compiled
    // validator itself is discarded.
    if let Err(e) = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&value)
    {
        return Err(parse_error(e));
    }

    Ok(to_canonical_string(&value))
}

/// Render a JSON value compactly with sorted keys at every nesting level.
///
/// Key order in the input must not influence the fingerprint, so sorting
/// is done here rather than relying on the serializer's map ordering.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
