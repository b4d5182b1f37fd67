//! Log replay state machine
//!
//! The single writer of [`GlobalState`]: one apply thread consumes the
//! log in strict offset order and swaps in a fresh snapshot per record.
//! Producers never touch the state; they wait for the watermark to pass
//! their produced offset through a per-offset completion-signal table fed
//! by the apply loop, then re-read the snapshot.

use arc_swap::ArcSwap;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{RegistryError, Result};
use crate::log::record::{RecordKey, RecordType, RecordValue};
use crate::log::transport::{LogEntry, LogTransport};
use crate::state::{AppliedEffect, GlobalState};

/// Replay lifecycle. `Failed` is terminal: the process must restart and
/// replay from a known-good offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayState {
    CatchingUp,
    Live,
    Failed(String),
}

enum WaitOutcome {
    Applied,
    Failed(String),
}

/// The consumer side of the registry: owns the materialized state
pub struct LogStateMachine {
    state: ArcSwap<GlobalState>,
    status: Mutex<ReplayState>,
    status_changed: Condvar,
    waiters: Mutex<BTreeMap<u64, Vec<Sender<WaitOutcome>>>>,
}

impl LogStateMachine {
    /// Spawn the apply thread and start replaying from the snapshot's
    /// watermark (the beginning, for a fresh state).
    pub fn start(
        transport: Arc<dyn LogTransport>,
        topic: String,
        initial: GlobalState,
    ) -> Result<(Arc<Self>, thread::JoinHandle<()>)> {
        let machine = Arc::new(Self {
            state: ArcSwap::from_pointee(initial),
            status: Mutex::new(ReplayState::CatchingUp),
            status_changed: Condvar::new(),
            waiters: Mutex::new(BTreeMap::new()),
        });

        let runner = Arc::clone(&machine);
        let handle = thread::Builder::new()
            .name("registry-apply".to_string())
            .spawn(move || runner.run(transport, topic))
            .map_err(|e| RegistryError::StateFailed(format!("spawning apply thread: {}", e)))?;

        Ok((machine, handle))
    }

    /// Current snapshot; cheap, lock-free, consistent
    pub fn state(&self) -> Arc<GlobalState> {
        self.state.load_full()
    }

    pub fn watermark(&self) -> Option<u64> {
        self.state.load().watermark()
    }

    pub fn status(&self) -> ReplayState {
        self.status.lock().clone()
    }

    /// Fail fast when the machine is dead
    pub fn ensure_not_failed(&self) -> Result<()> {
        match &*self.status.lock() {
            ReplayState::Failed(reason) => Err(RegistryError::StateFailed(reason.clone())),
            _ => Ok(()),
        }
    }

    /// Block until catch-up completes (the log observed at startup has
    /// been fully drained).
    pub fn wait_live(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock();
        loop {
            match &*status {
                ReplayState::Live => return Ok(()),
                ReplayState::Failed(reason) => {
                    return Err(RegistryError::StateFailed(reason.clone()))
                }
                ReplayState::CatchingUp => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RegistryError::Unavailable {
                            attempts: 1,
                            detail: "replay did not reach live before the deadline".to_string(),
                        });
                    }
                    self.status_changed.wait_for(&mut status, deadline - now);
                }
            }
        }
    }

    /// Block until the watermark passes `offset`.
    ///
    /// Dropping out of this call (timeout or caller abandonment) never
    /// affects the produced record; it is already durable and will be
    /// applied regardless.
    pub fn await_applied(&self, offset: u64, timeout: Duration) -> Result<()> {
        let receiver = {
            let mut waiters = self.waiters.lock();
            // The apply loop swaps the snapshot before taking this lock,
            // so checking the watermark under it cannot miss a wakeup.
            if self.watermark().map(|w| w >= offset).unwrap_or(false) {
                return Ok(());
            }
            if let ReplayState::Failed(reason) = &*self.status.lock() {
                return Err(RegistryError::StateFailed(reason.clone()));
            }
            let (tx, rx) = bounded(1);
            waiters.entry(offset).or_default().push(tx);
            rx
        };

        match receiver.recv_timeout(timeout) {
            Ok(WaitOutcome::Applied) => Ok(()),
            Ok(WaitOutcome::Failed(reason)) => Err(RegistryError::StateFailed(reason)),
            Err(RecvTimeoutError::Timeout) => Err(RegistryError::WatermarkTimeout { offset }),
            Err(RecvTimeoutError::Disconnected) => Err(RegistryError::WaitCancelled { offset }),
        }
    }

    fn run(self: Arc<Self>, transport: Arc<dyn LogTransport>, topic: String) {
        let replay_from = self
            .state
            .load()
            .watermark()
            .map(|w| w + 1)
            .unwrap_or(0);
        let end_at_start = transport.end_offset(&topic);
        info!(
            topic = %topic,
            replay_from,
            end_at_start,
            "starting log replay"
        );

        if replay_from >= end_at_start {
            self.set_live();
        }

        for entry in transport.subscribe(&topic, replay_from) {
            if !self.process(&entry) {
                return;
            }
            if entry.offset + 1 >= end_at_start {
                self.set_live();
            }
        }

        debug!(topic = %topic, "log subscription ended, apply thread exiting");
        // Unblock anyone still waiting; their receivers disconnect.
        self.waiters.lock().clear();
    }

    /// Handle one consumed record. Returns `false` when the machine has
    /// transitioned to FAILED and the loop must stop.
    fn process(&self, entry: &LogEntry) -> bool {
        match RecordKey::decode(&entry.key) {
            Ok(key) if key.record_type == RecordType::Noop => {
                debug!(offset = entry.offset, "skipping NOOP record");
                self.advance_past(entry.offset);
                return true;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(offset = entry.offset, error = %e, "skipping record with unknown key");
                self.advance_past(entry.offset);
                return true;
            }
        }

        let Some(raw_value) = entry.value.as_deref() else {
            debug!(offset = entry.offset, "skipping tombstone");
            self.advance_past(entry.offset);
            return true;
        };

        let value = match RecordValue::decode(raw_value) {
            Ok(value) => value,
            Err(e) => {
                self.fail(format!("undecodable record at offset {}: {}", entry.offset, e));
                return false;
            }
        };

        match self.state.load().apply(entry.offset, &value) {
            Ok((next, effect)) => {
                match &effect {
                    AppliedEffect::Discarded { reason } => {
                        debug!(offset = entry.offset, %reason, "record discarded")
                    }
                    other => debug!(offset = entry.offset, effect = ?other, "record applied"),
                }
                self.state.store(Arc::new(next));
                self.complete_up_to(entry.offset);
                true
            }
            Err(e) => {
                self.fail(format!("apply failed at offset {}: {}", entry.offset, e));
                false
            }
        }
    }

    /// Skipped records still advance the watermark so waiters on their
    /// offsets resolve.
    fn advance_past(&self, offset: u64) {
        let current = self.state.load_full();
        if current.watermark().map(|w| w < offset).unwrap_or(true) {
            let mut next = (*current).clone();
            next.force_watermark(offset);
            self.state.store(Arc::new(next));
        }
        self.complete_up_to(offset);
    }

    fn set_live(&self) {
        let mut status = self.status.lock();
        if *status == ReplayState::CatchingUp {
            *status = ReplayState::Live;
            info!(watermark = ?self.state.load().watermark(), "replay caught up, registry is live");
            self.status_changed.notify_all();
        }
    }

    fn fail(&self, reason: String) {
        error!(%reason, "log state machine failed; restart and replay required");
        {
            let mut status = self.status.lock();
            *status = ReplayState::Failed(reason.clone());
            self.status_changed.notify_all();
        }
        let mut waiters = self.waiters.lock();
        for (_, senders) in std::mem::take(&mut *waiters) {
            for sender in senders {
                let _ = sender.try_send(WaitOutcome::Failed(reason.clone()));
            }
        }
    }

    fn complete_up_to(&self, offset: u64) {
        let mut waiters = self.waiters.lock();
        let rest = waiters.split_off(&(offset + 1));
        let done = std::mem::replace(&mut *waiters, rest);
        for (_, senders) in done {
            for sender in senders {
                let _ = sender.try_send(WaitOutcome::Applied);
            }
        }
    }
}
