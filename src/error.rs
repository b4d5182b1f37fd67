//! Error types for the schema registry

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors produced by the log transport.
///
/// The split matters for retry behavior: transient errors are retried with
/// backoff by the [`RetryPolicy`](crate::retry::RetryPolicy), fatal errors
/// are surfaced immediately.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("transient transport failure: {0}")]
    Transient(String),

    #[error("fatal transport failure: {0}")]
    Fatal(String),
}

impl TransportError {
    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Schema registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid {format} schema: {detail}")]
    Parse { format: String, detail: String },

    #[error("unsupported schema format: {0}")]
    UnsupportedFormat(String),

    #[error("incompatible schema: {}", .reasons.join("; "))]
    Incompatible { reasons: Vec<String> },

    #[error("reference to unknown schema: {subject} version {version}")]
    DanglingReference { subject: String, version: u32 },

    #[error("reference cycle through subject '{subject}': {}", .path.join(" -> "))]
    CyclicReference { subject: String, path: Vec<String> },

    #[error("schema {subject} version {version} is referenced by: {}", .referrers.join(", "))]
    ReferencedSchema {
        subject: String,
        version: u32,
        referrers: Vec<String>,
    },

    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("version not found: {subject} version {version}")]
    VersionNotFound { subject: String, version: u32 },

    #[error("no schema registered under id {0}")]
    SchemaIdNotFound(u64),

    #[error("lost registration race on '{subject}' after {attempts} attempts")]
    ConcurrentModification { subject: String, attempts: u32 },

    #[error("log transport unavailable after {attempts} attempts: {detail}")]
    Unavailable { attempts: u32, detail: String },

    #[error("timed out waiting for offset {offset} to be applied")]
    WatermarkTimeout { offset: u64 },

    #[error("wait for offset {offset} was cancelled")]
    WaitCancelled { offset: u64 },

    #[error("state machine has failed and requires restart: {0}")]
    StateFailed(String),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RegistryError {
    /// Build an [`Incompatible`](RegistryError::Incompatible) error from a
    /// reason list collected by the compatibility checker.
    pub fn incompatible(reasons: Vec<String>) -> Self {
        RegistryError::Incompatible { reasons }
    }
}
