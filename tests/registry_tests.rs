//! End-to-end registry tests over the in-memory log transport

use std::sync::Arc;
use std::thread;

use strata_registry::{
    CompatibilityMode, MemoryLog, Reference, RegistryConfig, RegistryError, SchemaFormat,
    SchemaRegistry,
};

fn start_registry(log: &MemoryLog) -> SchemaRegistry {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    SchemaRegistry::start(Arc::new(log.clone()), RegistryConfig::default()).unwrap()
}

const USER_V1: &str =
    r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"name","type":"string"}]}"#;
const USER_V2: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"name","type":"string"},{"name":"email","type":["null","string"],"default":null}]}"#;
// Drops "name", which has no default in v1.
const USER_INCOMPATIBLE: &str =
    r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;

#[test]
fn test_register_versions_are_contiguous_from_one() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    registry
        .register("users-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    registry
        .register("users-value", USER_V2, SchemaFormat::Avro, vec![])
        .unwrap();

    assert_eq!(registry.list_versions("users-value").unwrap(), vec![1, 2]);
    let v2 = registry.get_version("users-value", 2).unwrap();
    assert_eq!(v2.version, 2);
    assert!(v2.schema.canonical.contains("email"));
}

#[test]
fn test_duplicate_registration_is_idempotent() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    let first = registry
        .register("users-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    // Different whitespace, same logical schema.
    let reformatted = USER_V1.replace(",\"", ", \"");
    let second = registry
        .register("users-value", &reformatted, SchemaFormat::Avro, vec![])
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(registry.list_versions("users-value").unwrap(), vec![1]);
}

#[test]
fn test_identical_canonical_shares_id_across_subjects() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    let a = registry
        .register("orders-key", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    let b = registry
        .register("audit-key", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    assert_eq!(a, b);

    let by_id = registry.get_by_id(a).unwrap();
    assert_eq!(by_id.schema_id, a);
    assert!(matches!(
        registry.get_by_id(9999).unwrap_err(),
        RegistryError::SchemaIdNotFound(9999)
    ));
}

#[test]
fn test_backward_incompatible_change_rejected_with_reasons() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    registry
        .register("users-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();

    let err = registry
        .register("users-value", USER_INCOMPATIBLE, SchemaFormat::Avro, vec![])
        .unwrap_err();
    match err {
        RegistryError::Incompatible { reasons } => {
            assert!(!reasons.is_empty());
            assert!(reasons.iter().any(|r| r.contains("name")));
        }
        other => panic!("expected Incompatible, got {:?}", other),
    }

    // Nothing was committed.
    assert_eq!(registry.list_versions("users-value").unwrap(), vec![1]);
}

#[test]
fn test_check_compatibility_is_a_dry_run() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    registry
        .register("users-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();

    assert!(registry
        .check_compatibility("users-value", USER_V2, SchemaFormat::Avro, vec![])
        .is_ok());
    assert!(registry
        .check_compatibility("users-value", USER_INCOMPATIBLE, SchemaFormat::Avro, vec![])
        .is_err());
    assert_eq!(registry.list_versions("users-value").unwrap(), vec![1]);
}

#[test]
fn test_json_schema_and_protobuf_formats() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    let json = r#"{"type":"object","properties":{"id":{"type":"integer"}},"required":["id"]}"#;
    registry
        .register("events-value", json, SchemaFormat::JsonSchema, vec![])
        .unwrap();

    let proto = r#"
        syntax = "proto3";
        message Event {
            int64 id = 1;
            optional string note = 2;
        }
    "#;
    registry
        .register("audit-value", proto, SchemaFormat::Protobuf, vec![])
        .unwrap();

    assert_eq!(registry.list_versions("events-value").unwrap(), vec![1]);
    assert_eq!(
        registry.get_version("audit-value", 1).unwrap().schema.format,
        SchemaFormat::Protobuf
    );
}

#[test]
fn test_parse_failure_reports_format_diagnostic() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    let err = registry
        .register("users-value", "{ definitely not avro", SchemaFormat::Avro, vec![])
        .unwrap_err();
    assert!(matches!(err, RegistryError::Parse { ref format, .. } if format == "AVRO"));
    assert!(matches!(
        registry.list_versions("users-value").unwrap_err(),
        RegistryError::SubjectNotFound(_)
    ));
}

#[test]
fn test_concurrent_next_version_race_resolved_by_offset_order() {
    let log = MemoryLog::new();
    let registry = Arc::new(start_registry(&log));

    registry
        .set_compatibility(Some("users-value"), CompatibilityMode::None)
        .unwrap();
    registry
        .register("users-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();

    let contenders = [USER_V2, USER_INCOMPATIBLE];
    let mut handles = Vec::new();
    for schema in contenders {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            registry.register("users-value", schema, SchemaFormat::Avro, vec![])
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => succeeded += 1,
            Err(RegistryError::ConcurrentModification { .. }) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert!(succeeded >= 1);

    // Never two versions with the same number: active numbering stays
    // contiguous from 1 regardless of who won.
    let versions = registry.list_versions("users-value").unwrap();
    let expected: Vec<u32> = (1..=versions.len() as u32).collect();
    assert_eq!(versions, expected);
    assert_eq!(versions.len(), 1 + succeeded);
}

#[test]
fn test_reference_resolution_and_cycle_rejection() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    let address =
        r#"{"type":"record","name":"Address","fields":[{"name":"city","type":"string"}]}"#;
    registry
        .register("address-value", address, SchemaFormat::Avro, vec![])
        .unwrap();

    let customer = r#"{"type":"record","name":"Customer","fields":[{"name":"home","type":"Address"}]}"#;
    registry
        .register(
            "customer-value",
            customer,
            SchemaFormat::Avro,
            vec![Reference::new("address-value", 1)],
        )
        .unwrap();

    // address-value referencing customer-value would close the loop.
    let looping =
        r#"{"type":"record","name":"AddressV2","fields":[{"name":"owner","type":"Customer"}]}"#;
    let err = registry
        .register(
            "address-value",
            looping,
            SchemaFormat::Avro,
            vec![Reference::new("customer-value", 1)],
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::CyclicReference { .. }));
    assert_eq!(registry.list_versions("address-value").unwrap(), vec![1]);

    // Dangling references are rejected outright.
    let err = registry
        .register(
            "invoice-value",
            USER_V1,
            SchemaFormat::Avro,
            vec![Reference::new("address-value", 9)],
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::DanglingReference { version: 9, .. }));
}

#[test]
fn test_referenced_version_cannot_be_deleted_until_referrer_goes() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    let address =
        r#"{"type":"record","name":"Address","fields":[{"name":"city","type":"string"}]}"#;
    registry
        .register("address-value", address, SchemaFormat::Avro, vec![])
        .unwrap();
    let customer = r#"{"type":"record","name":"Customer","fields":[{"name":"home","type":"Address"}]}"#;
    registry
        .register(
            "customer-value",
            customer,
            SchemaFormat::Avro,
            vec![Reference::new("address-value", 1)],
        )
        .unwrap();

    let err = registry.delete_version("address-value", 1).unwrap_err();
    match err {
        RegistryError::ReferencedSchema { referrers, .. } => {
            assert_eq!(referrers, vec!["customer-value@1"]);
        }
        other => panic!("expected ReferencedSchema, got {:?}", other),
    }

    registry.delete_version("customer-value", 1).unwrap();
    registry.delete_version("address-value", 1).unwrap();

    // Soft-deleted: the subject survives with no active versions, and
    // version numbers are never reused.
    assert!(registry.list_versions("address-value").unwrap().is_empty());
    registry
        .register("address-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    assert_eq!(registry.list_versions("address-value").unwrap(), vec![2]);
}

#[test]
fn test_per_subject_mode_overrides_global() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    registry
        .set_compatibility(None, CompatibilityMode::FullTransitive)
        .unwrap();
    registry
        .set_compatibility(Some("loose-value"), CompatibilityMode::None)
        .unwrap();
    assert_eq!(
        registry.state().global_mode(),
        CompatibilityMode::FullTransitive
    );

    registry
        .register("loose-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    // Incompatible change sails through under the per-subject override.
    registry
        .register("loose-value", USER_INCOMPATIBLE, SchemaFormat::Avro, vec![])
        .unwrap();

    // Other subjects stay on the global mode.
    registry
        .register("strict-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    assert!(registry
        .register("strict-value", USER_INCOMPATIBLE, SchemaFormat::Avro, vec![])
        .is_err());
}

#[test]
fn test_replay_from_zero_reproduces_state() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    registry
        .set_compatibility(None, CompatibilityMode::Forward)
        .unwrap();
    registry
        .register("users-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    registry
        .register("users-value", USER_V2, SchemaFormat::Avro, vec![])
        .unwrap();
    registry
        .register("orders-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    registry.delete_version("users-value", 1).unwrap();

    // A fresh process replaying the same log lands on the identical
    // snapshot, watermark included.
    let replica = start_registry(&log);
    assert_eq!(*replica.state(), *registry.state());
    assert_eq!(replica.watermark(), registry.watermark());
}

#[test]
fn test_get_version_distinguishes_missing_from_deleted() {
    let log = MemoryLog::new();
    let registry = start_registry(&log);

    registry
        .register("users-value", USER_V1, SchemaFormat::Avro, vec![])
        .unwrap();
    registry
        .register("users-value", USER_V2, SchemaFormat::Avro, vec![])
        .unwrap();
    registry.delete_version("users-value", 1).unwrap();

    assert!(matches!(
        registry.get_version("users-value", 1).unwrap_err(),
        RegistryError::VersionNotFound { version: 1, .. }
    ));
    assert!(registry.get_version("users-value", 2).is_ok());
    assert!(matches!(
        registry.get_version("ghosts-value", 1).unwrap_err(),
        RegistryError::SubjectNotFound(_)
    ));
    // Deleting an already-deleted version is an error, not a no-op.
    assert!(matches!(
        registry.delete_version("users-value", 1).unwrap_err(),
        RegistryError::VersionNotFound { version: 1, .. }
    ));
}
