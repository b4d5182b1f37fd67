//! Avro parsing and canonicalization
//!
//! The canonical text is the schema document re-rendered as compact JSON
//! with sorted keys, not Avro's Parsing Canonical Form: PCF strips field
//! defaults, which compatibility checking still needs when canonical
//! texts are re-parsed later. Key order and whitespace differences
//! disappear either way.

use apache_avro::Schema as AvroSchema;

use crate::error::{RegistryError, Result};
use crate::normalize::json::to_canonical_string;

fn parse_error(detail: impl ToString) -> RegistryError {
    RegistryError::Parse {
        format: "AVRO".to_string(),
        detail: detail.to_string(),
    }
}

/// Validate an Avro schema and return its canonical text.
///
/// `dependencies` are the canonical texts of referenced schemas in
/// topological order; they are parsed first so that named types resolve.
pub fn canonicalize(raw: &str, dependencies: &[&str]) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(parse_error)?;
    parse(raw, dependencies)?;
    Ok(to_canonical_string(&value))
}

/// Parse an Avro schema, resolving named types against `dependencies`.
pub fn parse(raw: &str, dependencies: &[&str]) -> Result<AvroSchema> {
    if dependencies.is_empty() {
        return AvroSchema::parse_str(raw).map_err(parse_error);
    }

    // parse_list resolves cross-schema name references; the candidate goes
    // last so every dependency is already in scope when it is reached.
    let mut inputs: Vec<&str> = dependencies.to_vec();
    inputs.push(raw);
    let mut parsed = AvroSchema::parse_list(&inputs).map_err(parse_error)?;
    parsed
        .pop()
        .ok_or_else(|| parse_error("empty parse result"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_erases_key_order_and_whitespace() {
        let a = r#"{"type":"record","name":"T","fields":[{"name":"x","type":"int"}]}"#;
        let b = r#"{ "fields": [ { "type": "int", "name": "x" } ], "name": "T", "type": "record" }"#;
        assert_eq!(
            canonicalize(a, &[]).unwrap(),
            canonicalize(b, &[]).unwrap()
        );
    }

    #[test]
    fn test_canonical_keeps_defaults() {
        let raw = r#"{"type":"record","name":"T","fields":[{"name":"x","type":"int","default":7}]}"#;
        assert!(canonicalize(raw, &[]).unwrap().contains("\"default\":7"));
    }

    #[test]
    fn test_named_reference_resolution() {
        let dep = r#"{"type":"record","name":"Address","fields":[{"name":"city","type":"string"}]}"#;
        let raw = r#"{"type":"record","name":"User","fields":[{"name":"home","type":"Address"}]}"#;

        // Without the dependency the named type is unknown.
        assert!(canonicalize(raw, &[]).is_err());
        assert!(canonicalize(raw, &[dep]).is_ok());
    }

    #[test]
    fn test_invalid_json_rejected() {
        let err = canonicalize("{not json", &[]).unwrap_err();
        assert!(matches!(err, RegistryError::Parse { ref format, .. } if format == "AVRO"));
    }

    #[test]
    fn test_structurally_invalid_schema_rejected() {
        // Valid JSON, invalid Avro: records need a fields array.
        let err = canonicalize(r#"{"type":"record","name":"T"}"#, &[]).unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
    }
}
