//! Mutation record wire shape
//!
//! Records are compact JSON, keyed by record type and subject so that a
//! compacted log retains the latest record per key. Decoding tolerates
//! unknown key types (NOOP records from older deployments) by skipping
//! them rather than failing replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compat::CompatibilityMode;
use crate::error::Result;
use crate::schema::{Reference, SchemaFormat, SchemaId};

/// Key of a log record; determines compaction identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordKey {
    #[serde(rename = "keytype")]
    pub record_type: RecordType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

/// Kind of mutation a record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "REGISTER")]
    Register,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "CONFIG_UPDATE")]
    ConfigUpdate,
    #[serde(rename = "NOOP")]
    Noop,
}

/// Mutation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type")]
pub enum RecordValue {
    #[serde(rename = "REGISTER")]
    Register(RegisterRecord),
    #[serde(rename = "DELETE")]
    Delete(DeleteRecord),
    #[serde(rename = "CONFIG_UPDATE")]
    ConfigUpdate(ConfigRecord),
}

/// Proposed registration of a subject's next version.
///
/// `schema_id` is omitted by the producer; the state machine assigns it
/// deterministically at apply time so that replays agree on ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRecord {
    pub subject: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<SchemaId>,
    pub canonical_schema: String,
    pub format: SchemaFormat,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    pub registered_at: DateTime<Utc>,
}

/// Soft-deletion of one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRecord {
    pub subject: String,
    pub version: u32,
}

/// Compatibility mode change, global when `subject` is absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub compatibility_mode: CompatibilityMode,
}

impl RecordValue {
    /// The key this record compacts under
    pub fn key(&self) -> RecordKey {
        match self {
            RecordValue::Register(r) => RecordKey {
                record_type: RecordType::Register,
                subject: Some(r.subject.clone()),
                version: Some(r.version),
            },
            RecordValue::Delete(d) => RecordKey {
                record_type: RecordType::Delete,
                subject: Some(d.subject.clone()),
                version: Some(d.version),
            },
            RecordValue::ConfigUpdate(c) => RecordKey {
                record_type: RecordType::ConfigUpdate,
                subject: c.subject.clone(),
                version: None,
            },
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl RecordKey {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
