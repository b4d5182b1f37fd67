//! Producer-side mutation coordination
//!
//! All pre-checks run against the current snapshot, the mutation is
//! appended to the log, and the caller blocks until the state machine's
//! watermark passes the produced offset. The log's offset order is the
//! only synchronization primitive: a coordinator that finds its proposal
//! missing after the wait lost a race and retries against the new state.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::compat::{CheckedSchema, CompatibilityChecker, CompatibilityMode};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::log::record::{ConfigRecord, DeleteRecord, RecordValue, RegisterRecord};
use crate::log::replay::LogStateMachine;
use crate::log::transport::LogTransport;
use crate::normalize;
use crate::refgraph::ReferenceResolver;
use crate::retry::RetryPolicy;
use crate::schema::{Reference, SchemaFormat, SchemaId};
use crate::state::GlobalState;

/// Accepts registration, deletion, and configuration requests and turns
/// them into log records with read-after-write semantics.
pub struct MutationCoordinator {
    transport: Arc<dyn LogTransport>,
    machine: Arc<LogStateMachine>,
    retry: RetryPolicy,
    topic: String,
    wait_timeout: Duration,
    max_register_attempts: u32,
}

impl MutationCoordinator {
    pub fn new(
        transport: Arc<dyn LogTransport>,
        machine: Arc<LogStateMachine>,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            transport,
            machine,
            retry: RetryPolicy::from_config(&config.retry),
            topic: config.log.topic.clone(),
            wait_timeout: config.wait_timeout(),
            max_register_attempts: config.coordinator.max_register_attempts.max(1),
        }
    }

    /// Register a schema as the subject's next version.
    ///
    /// Idempotent: if the canonical form is already active for the
    /// subject, the existing id is returned without a log write.
    pub fn register(
        &self,
        subject: &str,
        raw_schema: &str,
        format: SchemaFormat,
        references: Vec<Reference>,
    ) -> Result<SchemaId> {
        for attempt in 1..=self.max_register_attempts {
            self.machine.ensure_not_failed()?;
            let state = self.machine.state();

            let dependencies = ReferenceResolver::resolve(subject, &references, &state)?;
            let dep_texts: Vec<&str> = dependencies
                .iter()
                .map(|v| v.schema.canonical.as_str())
                .collect();
            let canonical = normalize::normalize_with_dependencies(
                raw_schema,
                format,
                references.clone(),
                &dep_texts,
            )?;

            if let Some(existing) = state.find_active_by_fingerprint(subject, &canonical.fingerprint)
            {
                debug!(
                    subject,
                    version = existing.version,
                    schema_id = existing.schema_id,
                    "schema already registered, returning existing id"
                );
                return Ok(existing.schema_id);
            }

            let candidate = CheckedSchema {
                label: "candidate".to_string(),
                format,
                canonical: canonical.canonical.clone(),
                dependencies: dep_texts.iter().map(|s| s.to_string()).collect(),
            };
            let history = self.history_for(subject, &state)?;
            CompatibilityChecker::check(&candidate, &history, state.mode_for(subject))?;

            let proposed_version = state.next_version(subject);
            let record = RecordValue::Register(RegisterRecord {
                subject: subject.to_string(),
                version: proposed_version,
                schema_id: None,
                canonical_schema: canonical.canonical.clone(),
                format,
                references: references.clone(),
                registered_at: Utc::now(),
            });

            let offset = self.produce(&record)?;
            self.machine.await_applied(offset, self.wait_timeout)?;

            // Confirm the applied effect matches the proposal. Matching by
            // fingerprint also covers the race where another producer
            // registered the identical canonical schema first.
            let after = self.machine.state();
            if let Some(version) = after.find_active_by_fingerprint(subject, &canonical.fingerprint)
            {
                info!(
                    subject,
                    version = version.version,
                    schema_id = version.schema_id,
                    offset,
                    "schema registered"
                );
                return Ok(version.schema_id);
            }

            warn!(
                subject,
                attempt,
                proposed_version,
                "registration lost a concurrent race, retrying against new state"
            );
        }

        Err(RegistryError::ConcurrentModification {
            subject: subject.to_string(),
            attempts: self.max_register_attempts,
        })
    }

    /// Soft-delete one version, guarded by the reverse-dependency check.
    pub fn delete_version(&self, subject: &str, version: u32) -> Result<()> {
        for attempt in 1..=self.max_register_attempts {
            self.machine.ensure_not_failed()?;
            let state = self.machine.state();

            let existing = state.version(subject, version).ok_or_else(|| {
                if state.all_versions(subject).is_empty() {
                    RegistryError::SubjectNotFound(subject.to_string())
                } else {
                    RegistryError::VersionNotFound {
                        subject: subject.to_string(),
                        version,
                    }
                }
            })?;
            if existing.deleted {
                return Err(RegistryError::VersionNotFound {
                    subject: subject.to_string(),
                    version,
                });
            }

            let referrers = ReferenceResolver::referrers(subject, version, &state);
            if !referrers.is_empty() {
                return Err(RegistryError::ReferencedSchema {
                    subject: subject.to_string(),
                    version,
                    referrers,
                });
            }

            let record = RecordValue::Delete(DeleteRecord {
                subject: subject.to_string(),
                version,
            });
            let offset = self.produce(&record)?;
            self.machine.await_applied(offset, self.wait_timeout)?;

            let after = self.machine.state();
            if after
                .version(subject, version)
                .map(|v| v.deleted)
                .unwrap_or(false)
            {
                info!(subject, version, offset, "schema version deleted");
                return Ok(());
            }

            // A racing registration started referencing this version
            // between the pre-check and the apply.
            warn!(subject, version, attempt, "deletion lost a race, retrying");
        }

        Err(RegistryError::ConcurrentModification {
            subject: subject.to_string(),
            attempts: self.max_register_attempts,
        })
    }

    /// Update the compatibility mode, globally or for one subject.
    pub fn set_compatibility(
        &self,
        subject: Option<&str>,
        mode: CompatibilityMode,
    ) -> Result<()> {
        self.machine.ensure_not_failed()?;
        let record = RecordValue::ConfigUpdate(ConfigRecord {
            subject: subject.map(str::to_string),
            compatibility_mode: mode,
        });
        let offset = self.produce(&record)?;
        self.machine.await_applied(offset, self.wait_timeout)?;
        info!(subject = ?subject, %mode, offset, "compatibility mode updated");
        Ok(())
    }

    /// Dry-run compatibility check: identical pre-checks, no log write.
    pub fn check_compatibility(
        &self,
        subject: &str,
        raw_schema: &str,
        format: SchemaFormat,
        references: Vec<Reference>,
    ) -> Result<()> {
        self.machine.ensure_not_failed()?;
        let state = self.machine.state();

        let dependencies = ReferenceResolver::resolve(subject, &references, &state)?;
        let dep_texts: Vec<&str> = dependencies
            .iter()
            .map(|v| v.schema.canonical.as_str())
            .collect();
        let canonical =
            normalize::normalize_with_dependencies(raw_schema, format, references, &dep_texts)?;

        let candidate = CheckedSchema {
            label: "candidate".to_string(),
            format,
            canonical: canonical.canonical,
            dependencies: dep_texts.iter().map(|s| s.to_string()).collect(),
        };
        let history = self.history_for(subject, &state)?;
        CompatibilityChecker::check(&candidate, &history, state.mode_for(subject))
    }

    /// Active history of a subject as checker inputs, oldest first, each
    /// with its own dependency closure.
    fn history_for(&self, subject: &str, state: &GlobalState) -> Result<Vec<CheckedSchema>> {
        state
            .active_versions(subject)
            .into_iter()
            .map(|version| {
                let closure =
                    ReferenceResolver::dependency_closure(&version.schema.references, state)?;
                Ok(CheckedSchema {
                    label: format!("version {}", version.version),
                    format: version.schema.format,
                    canonical: version.schema.canonical.clone(),
                    dependencies: closure
                        .into_iter()
                        .map(|dep| dep.schema.canonical)
                        .collect(),
                })
            })
            .collect()
    }

    fn produce(&self, record: &RecordValue) -> Result<u64> {
        let key = record.key().encode()?;
        let value = record.encode()?;
        self.retry.run("produce mutation record", || {
            self.transport.produce(&self.topic, &key, Some(&value))
        })
    }
}
