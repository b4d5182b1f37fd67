//! Strata Schema Registry
//!
//! A log-replicated schema registry core for streaming platforms:
//! versioned Avro, JSON Schema, and Protobuf definitions with enforced
//! compatibility between successive versions, cross-schema references,
//! and an append-only compacted log as the only source of truth.
//!
//! ## Features
//!
//! - **Log-Backed State**: every mutation is a log record; replay
//!   reconstructs the registry bit-for-bit on any node
//! - **Read-After-Write**: producers wait for the replay watermark to
//!   pass their record's offset, making registration linearizable
//! - **Compatibility Checking**: BACKWARD/FORWARD/FULL and transitive
//!   variants, per format, with complete reason reporting
//! - **Schema References**: dependency graphs with cycle rejection and
//!   deletion guards
//! - **Fingerprint Deduplication**: byte-identical canonical schemas
//!   share one global id across subjects
//!
//! ## Architecture
//!
//! ```text
//!  register/delete/config           subscribe (offset order)
//!        │                                   │
//!        ▼                                   ▼
//!  MutationCoordinator ──produce──▶ log ──▶ LogStateMachine
//!        │                                   │
//!        └──── await watermark ◀── snapshot swap (GlobalState)
//! ```
//!
//! The REST layer, process bootstrap, and the broker client are external
//! collaborators; [`log::transport::MemoryLog`] ships for tests and
//! embedded use.

pub mod compat;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod log;
pub mod normalize;
pub mod refgraph;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod state;

pub use compat::{CompatibilityChecker, CompatibilityMode};
pub use config::RegistryConfig;
pub use error::{RegistryError, Result, TransportError};
pub use fingerprint::Fingerprint;
pub use log::replay::ReplayState;
pub use log::transport::{LogEntry, LogTransport, MemoryLog};
pub use refgraph::ReferenceResolver;
pub use registry::SchemaRegistry;
pub use schema::{CanonicalSchema, Reference, SchemaFormat, SchemaId, SchemaVersion};
pub use state::{AppliedEffect, GlobalState};
