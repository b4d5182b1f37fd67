//! Schema compatibility checking
//!
//! The mode table and transitive-check protocol live here; the per-format
//! reader/writer rule tables live in the format submodules. The checker is
//! a pure function of its inputs and accumulates every incompatibility
//! reason rather than stopping at the first, so clients get actionable
//! diagnostics in one round trip.

pub mod avro;
pub mod json;
pub mod protobuf;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RegistryError, Result};
use crate::schema::SchemaFormat;

/// Policy governing which schema changes a subject accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    /// Accept everything
    None,
    /// Consumers on the predecessor can read data written with the candidate
    Backward,
    /// Consumers on the candidate can read data written with the predecessor
    Forward,
    /// Both directions against the immediate predecessor
    Full,
    /// Backward against every prior active version
    BackwardTransitive,
    /// Forward against every prior active version
    ForwardTransitive,
    /// Both directions against every prior active version
    FullTransitive,
}

impl Default for CompatibilityMode {
    fn default() -> Self {
        CompatibilityMode::Backward
    }
}

impl CompatibilityMode {
    fn checks_backward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Backward
                | CompatibilityMode::Full
                | CompatibilityMode::BackwardTransitive
                | CompatibilityMode::FullTransitive
        )
    }

    fn checks_forward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Forward
                | CompatibilityMode::Full
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::FullTransitive
        )
    }

    fn is_transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::BackwardTransitive
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::FullTransitive
        )
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            CompatibilityMode::None => "NONE",
            CompatibilityMode::Backward => "BACKWARD",
            CompatibilityMode::Forward => "FORWARD",
            CompatibilityMode::Full => "FULL",
            CompatibilityMode::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityMode::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityMode::FullTransitive => "FULL_TRANSITIVE",
        };
        write!(f, "{}", tag)
    }
}

/// One side of a compatibility check: canonical text plus the dependency
/// texts (topological order) needed to parse it.
#[derive(Debug, Clone)]
pub struct CheckedSchema {
    /// Display label used in incompatibility reasons, e.g. "version 3"
    pub label: String,
    pub format: SchemaFormat,
    pub canonical: String,
    pub dependencies: Vec<String>,
}

/// Stateless compatibility checker
pub struct CompatibilityChecker;

impl CompatibilityChecker {
    /// Check `candidate` against the ordered active history of a subject
    /// (oldest first) under `mode`.
    ///
    /// Returns `Ok(())` on acceptance, otherwise
    /// [`RegistryError::Incompatible`] carrying every violated rule.
    pub fn check(
        candidate: &CheckedSchema,
        history: &[CheckedSchema],
        mode: CompatibilityMode,
    ) -> Result<()> {
        if mode == CompatibilityMode::None || history.is_empty() {
            return Ok(());
        }

        let scope: &[CheckedSchema] = if mode.is_transitive() {
            history
        } else {
            &history[history.len() - 1..]
        };

        let mut reasons = Vec::new();
        for prior in scope {
            if prior.format != candidate.format {
                reasons.push(format!(
                    "{}: format changed from {} to {}",
                    prior.label, prior.format, candidate.format
                ));
                continue;
            }
            if mode.checks_backward() {
                for reason in pair_reasons(candidate, prior)? {
                    reasons.push(format!("backward vs {}: {}", prior.label, reason));
                }
            }
            if mode.checks_forward() {
                for reason in pair_reasons(prior, candidate)? {
                    reasons.push(format!("forward vs {}: {}", prior.label, reason));
                }
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::incompatible(reasons))
        }
    }
}

/// Reasons data written with `writer` cannot be read with `reader`.
/// Empty means the pair is compatible in that direction.
fn pair_reasons(writer: &CheckedSchema, reader: &CheckedSchema) -> Result<Vec<String>> {
    debug_assert_eq!(writer.format, reader.format);
    match writer.format {
        SchemaFormat::Avro => avro::reader_compat(writer, reader),
        SchemaFormat::JsonSchema => json::reader_compat(writer, reader),
        SchemaFormat::Protobuf => protobuf::reader_compat(writer, reader),
    }
}
