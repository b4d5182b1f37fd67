//! Schema parsing and canonicalization
//!
//! Each format canonicalizes differently: Avro and JSON Schema documents
//! are re-rendered as compact JSON with lexicographically sorted keys
//! (after format-level validation), Protobuf definitions are re-rendered
//! from the parse tree with normalized whitespace. In every case the same
//! logical schema yields the same canonical text and therefore the same
//! fingerprint, regardless of the textual representation it arrived in.

pub mod avro;
pub mod json;
pub mod protobuf;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::schema::{CanonicalSchema, Reference, SchemaFormat};

/// Parse and canonicalize a schema definition.
///
/// Fails with [`RegistryError::Parse`](crate::error::RegistryError::Parse)
/// on syntactically invalid input, carrying the format parser's diagnostic.
pub fn normalize(
    raw: &str,
    format: SchemaFormat,
    references: Vec<Reference>,
) -> Result<CanonicalSchema> {
    normalize_with_dependencies(raw, format, references, &[])
}

/// Parse and canonicalize a schema whose named types may be defined by its
/// references.
///
/// `dependencies` holds the canonical texts of the transitive reference
/// closure in topological order, as produced by the
/// [resolver](crate::refgraph::ReferenceResolver). Only Avro needs them at
/// parse time (named type resolution); the other formats parse standalone.
pub fn normalize_with_dependencies(
    raw: &str,
    format: SchemaFormat,
    references: Vec<Reference>,
    dependencies: &[&str],
) -> Result<CanonicalSchema> {
    let canonical = match format {
        SchemaFormat::Avro => avro::canonicalize(raw, dependencies)?,
        SchemaFormat::JsonSchema => json::canonicalize(raw)?,
        SchemaFormat::Protobuf => protobuf::canonicalize(raw)?,
    };

    let fingerprint = Fingerprint::of(&canonical);
    Ok(CanonicalSchema {
        format,
        canonical,
        fingerprint,
        references,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_logical_schema_same_fingerprint() {
        // Field order and whitespace differ; the logical schema does not.
        let a = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;
        let b = r#"{ "name": "User", "type": "record", "fields": [ { "type": "long", "name": "id" } ] }"#;

        let ca = normalize(a, SchemaFormat::Avro, vec![]).unwrap();
        let cb = normalize(b, SchemaFormat::Avro, vec![]).unwrap();
        assert_eq!(ca.fingerprint, cb.fingerprint);
        assert_eq!(ca, cb);
    }

    #[test]
    fn test_invalid_input_is_a_parse_error() {
        let err = normalize("not a schema", SchemaFormat::Avro, vec![]).unwrap_err();
        assert!(matches!(err, crate::error::RegistryError::Parse { .. }));
    }
}
