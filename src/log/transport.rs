//! Log transport abstraction
//!
//! The registry treats the append-only log as its only durable store.
//! The broker client proper lives outside this crate; [`MemoryLog`] is a
//! fully in-process implementation with the same observable contract,
//! used by tests and embedded deployments.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TransportError;

/// One consumed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub offset: u64,
    pub key: String,
    /// `None` is a compaction tombstone
    pub value: Option<String>,
}

/// Append-only, offset-addressed record log.
///
/// Offsets are assigned by the transport, strictly increasing per topic
/// and never reused. Subscriptions are infinite and restartable from any
/// previously seen offset; they end only when the transport is closed.
pub trait LogTransport: Send + Sync {
    /// Append a record, returning its assigned offset
    fn produce(
        &self,
        topic: &str,
        key: &str,
        value: Option<&str>,
    ) -> std::result::Result<u64, TransportError>;

    /// Stream records from `from_offset` onward, blocking for new ones
    fn subscribe(&self, topic: &str, from_offset: u64) -> Box<dyn Iterator<Item = LogEntry> + Send>;

    /// One past the last assigned offset (0 for an empty topic)
    fn end_offset(&self, topic: &str) -> u64;

    /// Stop all subscriptions; they drain buffered records and end
    fn close(&self);
}

#[derive(Default)]
struct Topics {
    records: HashMap<String, Vec<(String, Option<String>)>>,
    closed: bool,
}

struct Shared {
    topics: Mutex<Topics>,
    wakeup: Condvar,
}

/// In-process log transport backed by per-topic vectors
#[derive(Clone)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                topics: Mutex::new(Topics::default()),
                wakeup: Condvar::new(),
            }),
        }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogTransport for MemoryLog {
    fn produce(
        &self,
        topic: &str,
        key: &str,
        value: Option<&str>,
    ) -> std::result::Result<u64, TransportError> {
        let mut topics = self.shared.topics.lock();
        if topics.closed {
            return Err(TransportError::Fatal("log is closed".to_string()));
        }
        let records = topics.records.entry(topic.to_string()).or_default();
        records.push((key.to_string(), value.map(str::to_string)));
        let offset = (records.len() - 1) as u64;
        self.shared.wakeup.notify_all();
        Ok(offset)
    }

    fn subscribe(&self, topic: &str, from_offset: u64) -> Box<dyn Iterator<Item = LogEntry> + Send> {
        Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            next_offset: from_offset,
        })
    }

    fn end_offset(&self, topic: &str) -> u64 {
        let topics = self.shared.topics.lock();
        topics
            .records
            .get(topic)
            .map(|r| r.len() as u64)
            .unwrap_or(0)
    }

    fn close(&self) {
        let mut topics = self.shared.topics.lock();
        topics.closed = true;
        self.shared.wakeup.notify_all();
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    next_offset: u64,
}

impl Iterator for MemorySubscription {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        let mut topics = self.shared.topics.lock();
        loop {
            let available = topics
                .records
                .get(&self.topic)
                .map(|r| r.len() as u64)
                .unwrap_or(0);
            if self.next_offset < available {
                let (key, value) =
                    topics.records[&self.topic][self.next_offset as usize].clone();
                let entry = LogEntry {
                    offset: self.next_offset,
                    key,
                    value,
                };
                self.next_offset += 1;
                return Some(entry);
            }
            if topics.closed {
                return None;
            }
            self.shared.wakeup.wait(&mut topics);
        }
    }
}
