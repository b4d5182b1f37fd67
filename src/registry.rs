//! Schema Registry
//!
//! The facade consumed by the network layer: wires the log transport,
//! replay state machine, and mutation coordinator together and exposes
//! the registry operations.

use std::sync::Arc;
use std::thread;
use tracing::debug;

use crate::compat::CompatibilityMode;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::log::coordinator::MutationCoordinator;
use crate::log::replay::{LogStateMachine, ReplayState};
use crate::log::transport::LogTransport;
use crate::schema::{Reference, SchemaFormat, SchemaId, SchemaVersion};
use crate::state::GlobalState;

/// The main schema registry
pub struct SchemaRegistry {
    transport: Arc<dyn LogTransport>,
    machine: Arc<LogStateMachine>,
    coordinator: MutationCoordinator,
    apply_thread: Option<thread::JoinHandle<()>>,
}

impl SchemaRegistry {
    /// Start a registry over the given transport: replay the log, wait
    /// for catch-up, then accept mutations.
    pub fn start(transport: Arc<dyn LogTransport>, config: RegistryConfig) -> Result<Self> {
        let initial = GlobalState::new(config.compatibility.default_mode);
        let (machine, apply_thread) =
            LogStateMachine::start(Arc::clone(&transport), config.log.topic.clone(), initial)?;
        if let Err(e) = machine.wait_live(config.wait_timeout()) {
            transport.close();
            let _ = apply_thread.join();
            return Err(e);
        }

        let coordinator =
            MutationCoordinator::new(Arc::clone(&transport), Arc::clone(&machine), &config);

        Ok(Self {
            transport,
            machine,
            coordinator,
            apply_thread: Some(apply_thread),
        })
    }

    /// Register a schema under a subject, returning its global id.
    pub fn register(
        &self,
        subject: &str,
        raw_schema: &str,
        format: SchemaFormat,
        references: Vec<Reference>,
    ) -> Result<SchemaId> {
        self.coordinator
            .register(subject, raw_schema, format, references)
    }

    /// Fetch one active version of a subject.
    pub fn get_version(&self, subject: &str, version: u32) -> Result<SchemaVersion> {
        let state = self.machine.state();
        match state.version(subject, version) {
            Some(v) if v.is_active() => Ok(v.clone()),
            Some(_) => Err(RegistryError::VersionNotFound {
                subject: subject.to_string(),
                version,
            }),
            None if state.all_versions(subject).is_empty() => {
                Err(RegistryError::SubjectNotFound(subject.to_string()))
            }
            None => Err(RegistryError::VersionNotFound {
                subject: subject.to_string(),
                version,
            }),
        }
    }

    /// Fetch the schema registered under a global id.
    pub fn get_by_id(&self, schema_id: SchemaId) -> Result<SchemaVersion> {
        let state = self.machine.state();
        state
            .schema_by_id(schema_id)
            .cloned()
            .ok_or(RegistryError::SchemaIdNotFound(schema_id))
    }

    /// Active version numbers of a subject, oldest first. Empty when all
    /// versions are soft-deleted.
    pub fn list_versions(&self, subject: &str) -> Result<Vec<u32>> {
        let state = self.machine.state();
        if state.all_versions(subject).is_empty() {
            return Err(RegistryError::SubjectNotFound(subject.to_string()));
        }
        Ok(state
            .active_versions(subject)
            .iter()
            .map(|v| v.version)
            .collect())
    }

    /// Soft-delete one version.
    pub fn delete_version(&self, subject: &str, version: u32) -> Result<()> {
        self.coordinator.delete_version(subject, version)
    }

    /// Set the compatibility mode globally (`None`) or per subject.
    pub fn set_compatibility(
        &self,
        subject: Option<&str>,
        mode: CompatibilityMode,
    ) -> Result<()> {
        self.coordinator.set_compatibility(subject, mode)
    }

    /// Check a candidate against a subject's history without committing.
    pub fn check_compatibility(
        &self,
        subject: &str,
        raw_schema: &str,
        format: SchemaFormat,
        references: Vec<Reference>,
    ) -> Result<()> {
        self.coordinator
            .check_compatibility(subject, raw_schema, format, references)
    }

    /// Current materialized snapshot
    pub fn state(&self) -> Arc<GlobalState> {
        self.machine.state()
    }

    /// Highest applied log offset
    pub fn watermark(&self) -> Option<u64> {
        self.machine.watermark()
    }

    /// Replay lifecycle state
    pub fn status(&self) -> ReplayState {
        self.machine.status()
    }

    /// Close the transport and join the apply thread.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(handle) = self.apply_thread.take() {
            debug!("shutting down registry");
            self.transport.close();
            let _ = handle.join();
        }
    }
}

impl Drop for SchemaRegistry {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
