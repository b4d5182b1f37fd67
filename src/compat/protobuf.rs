//! Protobuf compatibility rules
//!
//! Wire-level rules: tags are the identity of a field, wire types must
//! stay within the same encoding family, and only `optional` fields may
//! disappear. Message removal is flagged because dependents may still
//! decode payloads of that type.

use std::collections::HashMap;

use super::CheckedSchema;
use crate::error::Result;
use crate::normalize::protobuf::{parse, FieldLabel, ProtoField, ProtoMessage};

/// Reasons payloads written with `writer` cannot be read with `reader`.
pub fn reader_compat(writer: &CheckedSchema, reader: &CheckedSchema) -> Result<Vec<String>> {
    let w = parse(&writer.canonical)?;
    let r = parse(&reader.canonical)?;

    let w_messages: HashMap<String, &ProtoMessage> = w.messages_by_path().into_iter().collect();
    let r_messages: HashMap<String, &ProtoMessage> = r.messages_by_path().into_iter().collect();

    let mut reasons = Vec::new();

    // Messages only the reader declares are harmless: the writer never
    // emits payloads of those types.
    for (path, r_msg) in r.messages_by_path() {
        if let Some(w_msg) = w_messages.get(&path) {
            check_message(w_msg, r_msg, &path, &mut reasons);
        }
    }

    // The writer may emit payloads of a message type the reader no longer
    // declares at all.
    for (path, _) in w.messages_by_path() {
        if !r_messages.contains_key(&path) {
            reasons.push(format!("message '{}' was removed by the reader", path));
        }
    }

    Ok(reasons)
}

fn check_message(
    w_msg: &ProtoMessage,
    r_msg: &ProtoMessage,
    path: &str,
    reasons: &mut Vec<String>,
) {
    let w_by_tag: HashMap<u32, &ProtoField> = w_msg.fields.iter().map(|f| (f.tag, f)).collect();
    let w_by_name: HashMap<&str, &ProtoField> =
        w_msg.fields.iter().map(|f| (f.name.as_str(), f)).collect();

    for r_field in &r_msg.fields {
        match w_by_tag.get(&r_field.tag) {
            Some(w_field) => {
                if !same_wire_family(&w_field.type_name, &r_field.type_name) {
                    reasons.push(format!(
                        "{}.{}: wire type changed from {} to {}",
                        path, r_field.name, w_field.type_name, r_field.type_name
                    ));
                }
                if w_field.label == FieldLabel::Repeated && r_field.label != FieldLabel::Repeated {
                    reasons.push(format!(
                        "{}.{}: repeated field became singular",
                        path, r_field.name
                    ));
                }
            }
            None => {
                // Same name under a different tag is a moved field, which
                // silently misdecodes; a genuinely new reader field just
                // reads as its default.
                if let Some(w_field) = w_by_name.get(r_field.name.as_str()) {
                    reasons.push(format!(
                        "{}.{}: field moved from tag {} to tag {}",
                        path, r_field.name, w_field.tag, r_field.tag
                    ));
                }
            }
        }
    }

    // Fields the writer still emits but the reader dropped: tolerated only
    // for explicit-presence (optional) fields.
    for w_field in &w_msg.fields {
        if !r_msg.fields.iter().any(|r| r.tag == w_field.tag)
            && w_field.label != FieldLabel::Optional
        {
            reasons.push(format!(
                "{}.{}: non-optional field (tag {}) was removed by the reader",
                path, w_field.name, w_field.tag
            ));
        }
    }
}

fn wire_family(type_name: &str) -> &'static str {
    match type_name {
        "int32" | "int64" | "uint32" | "uint64" | "sint32" | "sint64" | "bool" => "varint",
        "fixed64" | "sfixed64" | "double" => "fixed64",
        "fixed32" | "sfixed32" | "float" => "fixed32",
        "string" | "bytes" => "bytes",
        // Message, enum, and map types are length-delimited but only
        // interchangeable with themselves.
        _ => "named",
    }
}

fn same_wire_family(w_type: &str, r_type: &str) -> bool {
    if w_type == r_type {
        return true;
    }
    let (w_family, r_family) = (wire_family(w_type), wire_family(r_type));
    w_family == r_family && w_family != "named"
}
