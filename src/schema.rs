//! Schema types and structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RegistryError;
use crate::fingerprint::Fingerprint;

/// Global schema identifier, shared by byte-identical canonical schemas
/// across subjects.
pub type SchemaId = u64;

/// Format of a registered schema definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaFormat {
    /// Apache Avro record/enum/fixed definitions
    #[serde(rename = "AVRO")]
    Avro,
    /// JSON Schema (draft-7)
    #[serde(rename = "JSON")]
    JsonSchema,
    /// Protocol Buffers (proto3)
    #[serde(rename = "PROTOBUF")]
    Protobuf,
}

impl SchemaFormat {
    /// Parse a format tag as it appears on the wire
    pub fn parse(tag: &str) -> Result<Self, RegistryError> {
        match tag {
            "AVRO" => Ok(SchemaFormat::Avro),
            "JSON" => Ok(SchemaFormat::JsonSchema),
            "PROTOBUF" => Ok(SchemaFormat::Protobuf),
            other => Err(RegistryError::UnsupportedFormat(other.to_string())),
        }
    }

    /// The wire tag for this format
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaFormat::Avro => "AVRO",
            SchemaFormat::JsonSchema => "JSON",
            SchemaFormat::Protobuf => "PROTOBUF",
        }
    }
}

impl fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pointer from one schema version to another.
///
/// References are relationship edges, never ownership: the referenced
/// version keeps its own lifecycle and may be shared by many referrers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Subject the referenced schema lives under
    pub subject: String,
    /// Version number within that subject
    pub version: u32,
}

impl Reference {
    pub fn new(subject: impl Into<String>, version: u32) -> Self {
        Self {
            subject: subject.into(),
            version,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.subject, self.version)
    }
}

/// A schema in canonical form.
///
/// Produced by [`normalize`](crate::normalize::normalize); the canonical
/// text is the identity of the schema. Structurally equivalent definitions
/// with different textual representation canonicalize to the same text and
/// therefore the same fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalSchema {
    /// Source format
    pub format: SchemaFormat,
    /// Canonical schema text
    pub canonical: String,
    /// Fingerprint of the canonical text, computed once at normalization
    pub fingerprint: Fingerprint,
    /// Ordered list of schemas this one references
    pub references: Vec<Reference>,
}

impl PartialEq for CanonicalSchema {
    fn eq(&self, other: &Self) -> bool {
        self.format == other.format && self.canonical == other.canonical
    }
}

impl Eq for CanonicalSchema {}

/// A single immutable schema version within a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Subject this version belongs to
    pub subject: String,
    /// Version number, starting at 1, never reused after deletion
    pub version: u32,
    /// Global schema id
    pub schema_id: SchemaId,
    /// The canonical schema
    pub schema: CanonicalSchema,
    /// Soft-delete marker; deleted versions stay in the arena but are
    /// excluded from active queries
    pub deleted: bool,
    /// When this version was applied from the log
    pub registered_at: DateTime<Utc>,
}

impl SchemaVersion {
    /// Whether this version participates in compatibility checks,
    /// reference resolution, and reads
    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}
