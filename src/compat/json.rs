//! JSON Schema compatibility rules
//!
//! Evaluated on property and required-set deltas: a reader can consume a
//! writer's documents when every property the reader requires is
//! guaranteed by the writer, property types only widen, and the reader
//! does not forbid properties the writer may emit.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::CheckedSchema;
use crate::error::Result;

/// Reasons documents valid under `writer` may be rejected by `reader`.
pub fn reader_compat(writer: &CheckedSchema, reader: &CheckedSchema) -> Result<Vec<String>> {
    let w: Value = serde_json::from_str(&writer.canonical)?;
    let r: Value = serde_json::from_str(&reader.canonical)?;

    let mut reasons = Vec::new();
    check_object(&w, &r, "$", &mut reasons);
    Ok(reasons)
}

fn properties(schema: &Value) -> BTreeMap<&str, &Value> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.as_str(), v)).collect())
        .unwrap_or_default()
}

fn required(schema: &Value) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn type_of(schema: &Value) -> Option<&str> {
    schema.get("type").and_then(Value::as_str)
}

fn forbids_additional(schema: &Value) -> bool {
    schema.get("additionalProperties") == Some(&Value::Bool(false))
}

/// Writer type `w` is readable as reader type `r` when equal or widened.
fn type_widens(w: &str, r: &str) -> bool {
    w == r || (w == "integer" && r == "number")
}

fn check_object(writer: &Value, reader: &Value, path: &str, reasons: &mut Vec<String>) {
    let w_props = properties(writer);
    let r_props = properties(reader);
    let w_required = required(writer);

    // Every property the reader requires must be guaranteed by the writer.
    for name in required(reader) {
        if !w_required.contains(name) {
            reasons.push(format!(
                "{}.{}: required by the reader but not guaranteed by the writer",
                path, name
            ));
        }
    }

    // Shared properties may only widen their type.
    for (name, r_prop) in &r_props {
        if let Some(w_prop) = w_props.get(name) {
            match (type_of(w_prop), type_of(r_prop)) {
                (Some(w_type), Some(r_type)) if !type_widens(w_type, r_type) => {
                    reasons.push(format!(
                        "{}.{}: type changed from {} to {}",
                        path, name, w_type, r_type
                    ));
                }
                (Some("object"), Some("object")) | (None, None) => {
                    let sub_path = format!("{}.{}", path, name);
                    check_object(w_prop, r_prop, &sub_path, reasons);
                }
                _ => {}
            }
        }
    }

    // A closed reader rejects any property the writer may still emit.
    if forbids_additional(reader) {
        if !forbids_additional(writer) {
            reasons.push(format!(
                "{}: reader forbids additional properties but the writer allows them",
                path
            ));
        }
        for name in w_props.keys() {
            if !r_props.contains_key(name) {
                reasons.push(format!(
                    "{}.{}: emitted by the writer but forbidden by the reader",
                    path, name
                ));
            }
        }
    }
}
