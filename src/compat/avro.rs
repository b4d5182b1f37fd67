//! Avro reader/writer compatibility rules
//!
//! Implements the schema resolution rules from the Avro specification:
//! a reader can consume a writer's data when every reader field is either
//! present in the writer or carries a default, writer enum symbols are
//! known to the reader, and primitive changes are limited to the
//! specification's promotion chain.

use apache_avro::schema::Schema as AvroSchema;
use std::collections::{HashMap, HashSet};

use super::CheckedSchema;
use crate::error::Result;
use crate::normalize::avro::parse;

/// Reasons data written with `writer` cannot be read with `reader`.
pub fn reader_compat(writer: &CheckedSchema, reader: &CheckedSchema) -> Result<Vec<String>> {
    let w_deps: Vec<&str> = writer.dependencies.iter().map(String::as_str).collect();
    let r_deps: Vec<&str> = reader.dependencies.iter().map(String::as_str).collect();
    let w = parse(&writer.canonical, &w_deps)?;
    let r = parse(&reader.canonical, &r_deps)?;

    let mut ctx = Ctx {
        writer_names: HashMap::new(),
        reader_names: HashMap::new(),
        in_progress: HashSet::new(),
    };
    collect_names(&w, &mut ctx.writer_names);
    collect_names(&r, &mut ctx.reader_names);

    let mut reasons = Vec::new();
    ctx.check(&w, &r, "$", &mut reasons);
    Ok(reasons)
}

struct Ctx {
    writer_names: HashMap<String, AvroSchema>,
    reader_names: HashMap<String, AvroSchema>,
    /// (writer fullname, reader fullname) pairs currently being checked,
    /// to terminate on recursive record types
    in_progress: HashSet<(String, String)>,
}

fn collect_names(schema: &AvroSchema, map: &mut HashMap<String, AvroSchema>) {
    match schema {
        AvroSchema::Record(record) => {
            map.insert(record.name.fullname(None), schema.clone());
            for field in &record.fields {
                collect_names(&field.schema, map);
            }
        }
        AvroSchema::Enum(e) => {
            map.insert(e.name.fullname(None), schema.clone());
        }
        AvroSchema::Fixed(f) => {
            map.insert(f.name.fullname(None), schema.clone());
        }
        AvroSchema::Array(inner) | AvroSchema::Map(inner) => collect_names(inner, map),
        AvroSchema::Union(union) => {
            for variant in union.variants() {
                collect_names(variant, map);
            }
        }
        _ => {}
    }
}

fn describe(schema: &AvroSchema) -> String {
    match schema {
        AvroSchema::Record(r) => format!("record {}", r.name.fullname(None)),
        AvroSchema::Enum(e) => format!("enum {}", e.name.fullname(None)),
        AvroSchema::Fixed(f) => format!("fixed {}", f.name.fullname(None)),
        AvroSchema::Array(_) => "array".to_string(),
        AvroSchema::Map(_) => "map".to_string(),
        AvroSchema::Union(_) => "union".to_string(),
        AvroSchema::Ref { name } => name.fullname(None),
        other => format!("{:?}", other).to_lowercase(),
    }
}

impl Ctx {
    fn resolve<'a>(&'a self, schema: &'a AvroSchema, writer_side: bool) -> &'a AvroSchema {
        if let AvroSchema::Ref { name } = schema {
            let map = if writer_side {
                &self.writer_names
            } else {
                &self.reader_names
            };
            if let Some(resolved) = map.get(&name.fullname(None)) {
                return resolved;
            }
        }
        schema
    }

    /// Silent variant used at union sites, where per-branch mismatches are
    /// expected and only the aggregate outcome matters.
    fn compatible(&mut self, writer: &AvroSchema, reader: &AvroSchema) -> bool {
        let mut reasons = Vec::new();
        self.check(writer, reader, "$", &mut reasons);
        reasons.is_empty()
    }

    fn check(
        &mut self,
        writer: &AvroSchema,
        reader: &AvroSchema,
        path: &str,
        reasons: &mut Vec<String>,
    ) {
        let writer = self.resolve(writer, true).clone();
        let reader = self.resolve(reader, false).clone();

        match (&writer, &reader) {
            // Union reader: every writer branch (or the writer itself) must
            // land in at least one reader branch.
            (AvroSchema::Union(w_union), AvroSchema::Union(r_union)) => {
                let r_variants: Vec<AvroSchema> = r_union.variants().to_vec();
                for w_variant in w_union.variants().to_vec() {
                    if !r_variants
                        .iter()
                        .any(|r_variant| self.compatible(&w_variant, r_variant))
                    {
                        reasons.push(format!(
                            "{}: writer union branch {} is not covered by the reader union",
                            path,
                            describe(&w_variant)
                        ));
                    }
                }
            }
            (_, AvroSchema::Union(r_union)) => {
                let r_variants: Vec<AvroSchema> = r_union.variants().to_vec();
                if !r_variants
                    .iter()
                    .any(|r_variant| self.compatible(&writer, r_variant))
                {
                    reasons.push(format!(
                        "{}: writer type {} is not covered by the reader union",
                        path,
                        describe(&writer)
                    ));
                }
            }
            (AvroSchema::Union(w_union), _) => {
                for w_variant in w_union.variants().to_vec() {
                    if !self.compatible(&w_variant, &reader) {
                        reasons.push(format!(
                            "{}: reader narrowed a union and cannot read writer branch {}",
                            path,
                            describe(&w_variant)
                        ));
                    }
                }
            }
            (AvroSchema::Record(w_record), AvroSchema::Record(r_record)) => {
                let w_name = w_record.name.fullname(None);
                let r_name = r_record.name.fullname(None);
                if w_name != r_name {
                    reasons.push(format!(
                        "{}: record name mismatch (writer {}, reader {})",
                        path, w_name, r_name
                    ));
                    return;
                }
                let key = (w_name, r_name);
                if !self.in_progress.insert(key.clone()) {
                    return;
                }

                let writer_fields: HashMap<&str, &apache_avro::schema::RecordField> = w_record
                    .fields
                    .iter()
                    .map(|f| (f.name.as_str(), f))
                    .collect();

                for r_field in &r_record.fields {
                    let field_path = format!("{}.{}", path, r_field.name);
                    match writer_fields.get(r_field.name.as_str()) {
                        Some(w_field) => {
                            self.check(&w_field.schema, &r_field.schema, &field_path, reasons);
                        }
                        None if r_field.default.is_some() => {}
                        None => {
                            reasons.push(format!(
                                "{}: field is missing from the writer and has no default",
                                field_path
                            ));
                        }
                    }
                }
                self.in_progress.remove(&key);
            }
            (AvroSchema::Enum(w_enum), AvroSchema::Enum(r_enum)) => {
                if w_enum.name.fullname(None) != r_enum.name.fullname(None) {
                    reasons.push(format!(
                        "{}: enum name mismatch (writer {}, reader {})",
                        path,
                        w_enum.name.fullname(None),
                        r_enum.name.fullname(None)
                    ));
                    return;
                }
                let known: HashSet<&String> = r_enum.symbols.iter().collect();
                for symbol in &w_enum.symbols {
                    if !known.contains(symbol) {
                        reasons.push(format!(
                            "{}: writer enum symbol '{}' is unknown to the reader",
                            path, symbol
                        ));
                    }
                }
            }
            (AvroSchema::Fixed(w_fixed), AvroSchema::Fixed(r_fixed)) => {
                if w_fixed.name.fullname(None) != r_fixed.name.fullname(None)
                    || w_fixed.size != r_fixed.size
                {
                    reasons.push(format!(
                        "{}: fixed type changed (writer {} size {}, reader {} size {})",
                        path,
                        w_fixed.name.fullname(None),
                        w_fixed.size,
                        r_fixed.name.fullname(None),
                        r_fixed.size
                    ));
                }
            }
            (AvroSchema::Array(w_items), AvroSchema::Array(r_items)) => {
                let item_path = format!("{}[]", path);
                self.check(w_items, r_items, &item_path, reasons);
            }
            (AvroSchema::Map(w_values), AvroSchema::Map(r_values)) => {
                let value_path = format!("{}{{}}", path);
                self.check(w_values, r_values, &value_path, reasons);
            }
            (w, r) => {
                if !primitive_readable(w, r) {
                    reasons.push(format!(
                        "{}: type narrowed from {} to {}",
                        path,
                        describe(w),
                        describe(r)
                    ));
                }
            }
        }
    }
}

/// Primitive resolution: identical types plus the promotion chain
/// int -> long -> float -> double and string <-> bytes.
fn primitive_readable(writer: &AvroSchema, reader: &AvroSchema) -> bool {
    use AvroSchema::*;
    match (writer, reader) {
        (Null, Null)
        | (Boolean, Boolean)
        | (Int, Int)
        | (Long, Long)
        | (Float, Float)
        | (Double, Double)
        | (Bytes, Bytes)
        | (String, String) => true,
        (Int, Long) | (Int, Float) | (Int, Double) => true,
        (Long, Float) | (Long, Double) => true,
        (Float, Double) => true,
        (String, Bytes) | (Bytes, String) => true,
        (Ref { name: w_name }, Ref { name: r_name }) => {
            w_name.fullname(None) == r_name.fullname(None)
        }
        (w, r) => {
            // Logical types resolve like their underlying primitive only
            // when identical; anything else is a narrowing.
            std::mem::discriminant(w) == std::mem::discriminant(r)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaFormat;

    fn checked(canonical: &str) -> CheckedSchema {
        CheckedSchema {
            label: "test".to_string(),
            format: SchemaFormat::Avro,
            canonical: canonical.to_string(),
            dependencies: Vec::new(),
        }
    }

    fn reasons(writer: &str, reader: &str) -> Vec<String> {
        reader_compat(&checked(writer), &checked(reader)).unwrap()
    }

    #[test]
    fn test_identical_schemas_compatible() {
        let s = r#"{"type":"record","name":"T","fields":[{"name":"a","type":"int"}]}"#;
        assert!(reasons(s, s).is_empty());
    }

    #[test]
    fn test_missing_reader_field_needs_default() {
        let writer = r#"{"type":"record","name":"T","fields":[{"name":"a","type":"int"}]}"#;
        let with_default =
            r#"{"type":"record","name":"T","fields":[{"name":"a","type":"int"},{"name":"b","type":"string","default":"x"}]}"#;
        let without_default =
            r#"{"type":"record","name":"T","fields":[{"name":"a","type":"int"},{"name":"b","type":"string"}]}"#;

        assert!(reasons(writer, with_default).is_empty());
        let rs = reasons(writer, without_default);
        assert_eq!(rs.len(), 1);
        assert!(rs[0].contains("$.b"));
    }

    #[test]
    fn test_int_widens_to_long_not_back() {
        let int_schema = r#"{"type":"record","name":"T","fields":[{"name":"a","type":"int"}]}"#;
        let long_schema = r#"{"type":"record","name":"T","fields":[{"name":"a","type":"long"}]}"#;
        assert!(reasons(int_schema, long_schema).is_empty());
        assert!(!reasons(long_schema, int_schema).is_empty());
    }

    #[test]
    fn test_union_widening_ok_narrowing_flagged() {
        let plain = r#"{"type":"record","name":"T","fields":[{"name":"a","type":"string"}]}"#;
        let nullable =
            r#"{"type":"record","name":"T","fields":[{"name":"a","type":["null","string"]}]}"#;
        assert!(reasons(plain, nullable).is_empty());
        assert!(!reasons(nullable, plain).is_empty());
    }

    #[test]
    fn test_enum_symbol_removal_flagged() {
        let full = r#"{"type":"record","name":"T","fields":[{"name":"s","type":{"type":"enum","name":"E","symbols":["A","B"]}}]}"#;
        let trimmed = r#"{"type":"record","name":"T","fields":[{"name":"s","type":{"type":"enum","name":"E","symbols":["A"]}}]}"#;
        let rs = reasons(full, trimmed);
        assert!(rs.iter().any(|r| r.contains("'B'")));
    }

    #[test]
    fn test_recursive_record_terminates() {
        let linked = r#"{"type":"record","name":"Node","fields":[{"name":"next","type":["null","Node"],"default":null}]}"#;
        assert!(reasons(linked, linked).is_empty());
    }

    #[test]
    fn test_multiple_reasons_accumulate() {
        let writer = r#"{"type":"record","name":"T","fields":[{"name":"a","type":"long"}]}"#;
        let reader = r#"{"type":"record","name":"T","fields":[{"name":"a","type":"int"},{"name":"b","type":"string"}]}"#;
        let rs = reasons(writer, reader);
        assert_eq!(rs.len(), 2);
    }
}
