//! Materialized registry state
//!
//! `GlobalState` is an immutable snapshot: the apply loop produces a new
//! snapshot per applied record and swaps it in atomically, so readers
//! work on a consistent view without locks. Versions live in an
//! append-only arena indexed through per-subject slot lists, which keeps
//! the structure flat and cheap to rebuild from a replayed log.

use std::collections::{BTreeMap, HashMap};

use crate::compat::CompatibilityMode;
use crate::error::{RegistryError, Result};
use crate::fingerprint::Fingerprint;
use crate::log::record::{ConfigRecord, DeleteRecord, RecordValue, RegisterRecord};
use crate::refgraph::ReferenceResolver;
use crate::schema::{CanonicalSchema, SchemaId, SchemaVersion};

/// What applying one record did to the state.
///
/// The coordinator compares this against its proposal to detect lost
/// races; discarded records are no-ops by design, never failures.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedEffect {
    Registered {
        subject: String,
        version: u32,
        schema_id: SchemaId,
    },
    /// The canonical schema was already active for the subject; no new
    /// version was written.
    AlreadyRegistered {
        subject: String,
        version: u32,
        schema_id: SchemaId,
    },
    Deleted {
        subject: String,
        version: u32,
    },
    ConfigUpdated {
        subject: Option<String>,
        mode: CompatibilityMode,
    },
    /// The record lost a race and was skipped
    Discarded { reason: String },
}

/// Per-subject bookkeeping: slots into the version arena, oldest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectState {
    slots: Vec<usize>,
}

/// The materialized view of the whole registry at one watermark
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalState {
    /// Append-only arena of every version ever applied
    versions: Vec<SchemaVersion>,
    /// Subject name -> slots into `versions`
    subjects: BTreeMap<String, SubjectState>,
    /// Canonical-form identity -> global schema id
    ids_by_fingerprint: HashMap<Fingerprint, SchemaId>,
    next_schema_id: SchemaId,
    /// Highest applied offset, `None` before the first record
    watermark: Option<u64>,
    global_mode: CompatibilityMode,
    subject_modes: BTreeMap<String, CompatibilityMode>,
}

impl GlobalState {
    pub fn new(default_mode: CompatibilityMode) -> Self {
        Self {
            versions: Vec::new(),
            subjects: BTreeMap::new(),
            ids_by_fingerprint: HashMap::new(),
            next_schema_id: 1,
            watermark: None,
            global_mode: default_mode,
            subject_modes: BTreeMap::new(),
        }
    }

    // ----- read API ------------------------------------------------------

    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    /// All subject names, including subjects whose versions are all deleted
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    /// Every version of a subject, deleted ones included, oldest first
    pub fn all_versions(&self, subject: &str) -> Vec<&SchemaVersion> {
        self.subjects
            .get(subject)
            .map(|s| s.slots.iter().map(|&i| &self.versions[i]).collect())
            .unwrap_or_default()
    }

    /// Active versions of a subject, oldest first
    pub fn active_versions(&self, subject: &str) -> Vec<&SchemaVersion> {
        self.all_versions(subject)
            .into_iter()
            .filter(|v| v.is_active())
            .collect()
    }

    /// Look up one version, deleted or not
    pub fn version(&self, subject: &str, version: u32) -> Option<&SchemaVersion> {
        self.all_versions(subject)
            .into_iter()
            .find(|v| v.version == version)
    }

    /// Latest version a schema id was registered under, if any
    pub fn schema_by_id(&self, schema_id: SchemaId) -> Option<&SchemaVersion> {
        self.versions.iter().rev().find(|v| v.schema_id == schema_id)
    }

    /// The active version of `subject` carrying this fingerprint, if any
    pub fn find_active_by_fingerprint(
        &self,
        subject: &str,
        fingerprint: &Fingerprint,
    ) -> Option<&SchemaVersion> {
        self.active_versions(subject)
            .into_iter()
            .find(|v| &v.schema.fingerprint == fingerprint)
    }

    pub fn schema_id_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<SchemaId> {
        self.ids_by_fingerprint.get(fingerprint).copied()
    }

    /// Next version number for a subject: one past the highest ever
    /// assigned, so deleted numbers are never reused
    pub fn next_version(&self, subject: &str) -> u32 {
        self.all_versions(subject)
            .last()
            .map(|v| v.version + 1)
            .unwrap_or(1)
    }

    /// Effective compatibility mode: per-subject override or global
    pub fn mode_for(&self, subject: &str) -> CompatibilityMode {
        self.subject_modes
            .get(subject)
            .copied()
            .unwrap_or(self.global_mode)
    }

    pub fn global_mode(&self) -> CompatibilityMode {
        self.global_mode
    }

    /// Advance the watermark for a record that was skipped rather than
    /// applied (NOOP keys, tombstones), so waiters on its offset resolve.
    pub(crate) fn force_watermark(&mut self, offset: u64) {
        self.watermark = Some(offset);
    }

    // ----- apply ---------------------------------------------------------

    /// Apply one record, producing the successor snapshot and the effect.
    ///
    /// `Err` means corruption: the record cannot be explained by an
    /// ordinary producer race and the state machine must fail. Race-lost
    /// records come back as `Ok` with [`AppliedEffect::Discarded`].
    pub fn apply(&self, offset: u64, value: &RecordValue) -> Result<(GlobalState, AppliedEffect)> {
        if let Some(w) = self.watermark {
            if offset <= w {
                return Err(RegistryError::StateFailed(format!(
                    "offset {} applied after watermark {}",
                    offset, w
                )));
            }
        }

        let mut next = self.clone();
        next.watermark = Some(offset);

        let effect = match value {
            RecordValue::Register(r) => next.apply_register(r)?,
            RecordValue::Delete(d) => next.apply_delete(d)?,
            RecordValue::ConfigUpdate(c) => next.apply_config(c),
        };
        Ok((next, effect))
    }

    fn apply_register(&mut self, record: &RegisterRecord) -> Result<AppliedEffect> {
        if record.version == 0 {
            return Err(RegistryError::StateFailed(format!(
                "register record for '{}' carries version 0",
                record.subject
            )));
        }

        let expected = self.next_version(&record.subject);
        if record.version > expected {
            // A gap cannot come from a race: racing producers only propose
            // stale (lower) numbers.
            return Err(RegistryError::StateFailed(format!(
                "register record for '{}' skips from version {} to {}",
                record.subject,
                expected - 1,
                record.version
            )));
        }

        let schema = CanonicalSchema {
            format: record.format,
            canonical: record.canonical_schema.clone(),
            fingerprint: Fingerprint::of(&record.canonical_schema),
            references: record.references.clone(),
        };

        // Identical active schema: the registration is a no-op regardless
        // of the proposed version number.
        if let Some(existing) = self.find_active_by_fingerprint(&record.subject, &schema.fingerprint)
        {
            return Ok(AppliedEffect::AlreadyRegistered {
                subject: record.subject.clone(),
                version: existing.version,
                schema_id: existing.schema_id,
            });
        }

        if record.version < expected {
            return Ok(AppliedEffect::Discarded {
                reason: format!(
                    "'{}' version {} already taken (next is {})",
                    record.subject, record.version, expected
                ),
            });
        }

        // References are re-validated against the state as of this offset:
        // a referenced version may have been deleted, or a racing
        // registration may have closed a cycle, since the pre-check ran.
        if let Err(e) = ReferenceResolver::resolve(&record.subject, &record.references, self) {
            return Ok(AppliedEffect::Discarded {
                reason: format!("references no longer valid for '{}': {}", record.subject, e),
            });
        }

        let schema_id = match self.ids_by_fingerprint.get(&schema.fingerprint) {
            Some(&id) => id,
            None => {
                let id = self.next_schema_id;
                self.next_schema_id += 1;
                self.ids_by_fingerprint.insert(schema.fingerprint.clone(), id);
                id
            }
        };

        let slot = self.versions.len();
        self.versions.push(SchemaVersion {
            subject: record.subject.clone(),
            version: record.version,
            schema_id,
            schema,
            deleted: false,
            registered_at: record.registered_at,
        });
        self.subjects
            .entry(record.subject.clone())
            .or_default()
            .slots
            .push(slot);

        Ok(AppliedEffect::Registered {
            subject: record.subject.clone(),
            version: record.version,
            schema_id,
        })
    }

    fn apply_delete(&mut self, record: &DeleteRecord) -> Result<AppliedEffect> {
        let Some(subject_state) = self.subjects.get(&record.subject) else {
            return Err(RegistryError::StateFailed(format!(
                "delete record for unknown subject '{}'",
                record.subject
            )));
        };
        if record.version >= self.next_version(&record.subject) {
            return Err(RegistryError::StateFailed(format!(
                "delete record for '{}' names unassigned version {}",
                record.subject, record.version
            )));
        }

        let Some(&slot) = subject_state
            .slots
            .iter()
            .find(|&&i| self.versions[i].version == record.version)
        else {
            return Err(RegistryError::StateFailed(format!(
                "delete record for '{}' names unknown version {}",
                record.subject, record.version
            )));
        };

        if self.versions[slot].deleted {
            return Ok(AppliedEffect::Discarded {
                reason: format!(
                    "'{}' version {} already deleted",
                    record.subject, record.version
                ),
            });
        }

        // A registration referencing this version may have won the race.
        let referrers = ReferenceResolver::referrers(&record.subject, record.version, self);
        if !referrers.is_empty() {
            return Ok(AppliedEffect::Discarded {
                reason: format!(
                    "'{}' version {} is still referenced by {}",
                    record.subject,
                    record.version,
                    referrers.join(", ")
                ),
            });
        }

        self.versions[slot].deleted = true;
        Ok(AppliedEffect::Deleted {
            subject: record.subject.clone(),
            version: record.version,
        })
    }

    fn apply_config(&mut self, record: &ConfigRecord) -> AppliedEffect {
        match &record.subject {
            Some(subject) => {
                self.subject_modes
                    .insert(subject.clone(), record.compatibility_mode);
            }
            None => self.global_mode = record.compatibility_mode,
        }
        AppliedEffect::ConfigUpdated {
            subject: record.subject.clone(),
            mode: record.compatibility_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Reference, SchemaFormat};
    use chrono::Utc;

    fn register_record(subject: &str, version: u32, canonical: &str) -> RecordValue {
        RecordValue::Register(RegisterRecord {
            subject: subject.to_string(),
            version,
            schema_id: None,
            canonical_schema: canonical.to_string(),
            format: SchemaFormat::Avro,
            references: Vec::new(),
            registered_at: Utc::now(),
        })
    }

    fn apply_all(records: &[(u64, RecordValue)]) -> GlobalState {
        let mut state = GlobalState::new(CompatibilityMode::Backward);
        for (offset, record) in records {
            let (next, _) = state.apply(*offset, record).unwrap();
            state = next;
        }
        state
    }

    #[test]
    fn test_register_assigns_sequential_versions_and_ids() {
        let state = apply_all(&[
            (0, register_record("a", 1, r#""string""#)),
            (1, register_record("a", 2, r#""long""#)),
            (2, register_record("b", 1, r#""int""#)),
        ]);
        assert_eq!(
            state.active_versions("a").iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(state.version("b", 1).unwrap().schema_id, 3);
        assert_eq!(state.watermark(), Some(2));
    }

    #[test]
    fn test_identical_canonical_shares_schema_id_across_subjects() {
        let state = apply_all(&[
            (0, register_record("a", 1, r#""string""#)),
            (1, register_record("b", 1, r#""string""#)),
        ]);
        assert_eq!(
            state.version("a", 1).unwrap().schema_id,
            state.version("b", 1).unwrap().schema_id
        );
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let state = GlobalState::new(CompatibilityMode::Backward);
        let (state, _) = state.apply(0, &register_record("a", 1, r#""string""#)).unwrap();
        let (state, effect) = state.apply(1, &register_record("a", 2, r#""string""#)).unwrap();
        assert!(matches!(effect, AppliedEffect::AlreadyRegistered { version: 1, .. }));
        assert_eq!(state.active_versions("a").len(), 1);
    }

    #[test]
    fn test_lost_race_discarded() {
        let state = GlobalState::new(CompatibilityMode::Backward);
        let (state, _) = state.apply(0, &register_record("a", 1, r#""string""#)).unwrap();
        // Two producers proposed version 2; the second record arrives with
        // a stale number once the first has been applied.
        let (state, first) = state.apply(1, &register_record("a", 2, r#""long""#)).unwrap();
        let (state, second) = state.apply(2, &register_record("a", 2, r#""int""#)).unwrap();
        assert!(matches!(first, AppliedEffect::Registered { version: 2, .. }));
        assert!(matches!(second, AppliedEffect::Discarded { .. }));
        assert_eq!(state.active_versions("a").len(), 2);
    }

    #[test]
    fn test_version_gap_is_corruption() {
        let state = GlobalState::new(CompatibilityMode::Backward);
        let err = state.apply(0, &register_record("a", 5, r#""string""#)).unwrap_err();
        assert!(matches!(err, RegistryError::StateFailed(_)));
    }

    #[test]
    fn test_watermark_must_increase() {
        let state = GlobalState::new(CompatibilityMode::Backward);
        let (state, _) = state.apply(3, &register_record("a", 1, r#""string""#)).unwrap();
        let err = state.apply(3, &register_record("a", 2, r#""long""#)).unwrap_err();
        assert!(matches!(err, RegistryError::StateFailed(_)));
        assert_eq!(state.watermark(), Some(3));
    }

    #[test]
    fn test_delete_is_soft_and_numbers_not_reused() {
        let state = apply_all(&[
            (0, register_record("a", 1, r#""string""#)),
            (1, register_record("a", 2, r#""long""#)),
            (
                2,
                RecordValue::Delete(DeleteRecord {
                    subject: "a".to_string(),
                    version: 2,
                }),
            ),
        ]);
        assert_eq!(state.active_versions("a").len(), 1);
        assert!(state.version("a", 2).unwrap().deleted);
        assert_eq!(state.next_version("a"), 3);
    }

    #[test]
    fn test_delete_still_referenced_is_discarded() {
        let state = apply_all(&[(0, register_record("dep", 1, r#""string""#))]);
        let referencing = RecordValue::Register(RegisterRecord {
            subject: "top".to_string(),
            version: 1,
            schema_id: None,
            canonical_schema: r#""long""#.to_string(),
            format: SchemaFormat::Avro,
            references: vec![Reference::new("dep", 1)],
            registered_at: Utc::now(),
        });
        let (state, _) = state.apply(1, &referencing).unwrap();
        let (state, effect) = state
            .apply(
                2,
                &RecordValue::Delete(DeleteRecord {
                    subject: "dep".to_string(),
                    version: 1,
                }),
            )
            .unwrap();
        assert!(matches!(effect, AppliedEffect::Discarded { .. }));
        assert!(state.version("dep", 1).unwrap().is_active());
    }

    #[test]
    fn test_config_update_scopes() {
        let state = apply_all(&[(
            0,
            RecordValue::ConfigUpdate(ConfigRecord {
                subject: None,
                compatibility_mode: CompatibilityMode::Full,
            }),
        ), (
            1,
            RecordValue::ConfigUpdate(ConfigRecord {
                subject: Some("a".to_string()),
                compatibility_mode: CompatibilityMode::None,
            }),
        )]);
        assert_eq!(state.mode_for("a"), CompatibilityMode::None);
        assert_eq!(state.mode_for("b"), CompatibilityMode::Full);
    }
}
