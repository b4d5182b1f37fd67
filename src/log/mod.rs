//! Log-backed replication
//!
//! The append-only, compacted log is the registry's source of truth:
//! producers append mutation records, the replay state machine
//! materializes them into [`GlobalState`](crate::state::GlobalState)
//! snapshots, and the watermark handshake between the two makes
//! registration linearizable.

pub mod coordinator;
pub mod record;
pub mod replay;
pub mod transport;
