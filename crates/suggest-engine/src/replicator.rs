//! Replays primary-index change logs into the ingestion pipeline.
//!
//! Logs are queued as handles; one background task drains them in order,
//! then waits (bounded by the idle interval) for more.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use suggest_core::error::{Result, SuggestError};

use crate::pipeline::IngestionPipeline;
use crate::translog::{LogEntry, Operation, Translog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorState {
    Idle,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Entries dispatched to the pipeline.
    pub entries: u64,
    /// Entries skipped: unknown op codes or unreadable payloads.
    pub anomalies: u64,
    /// Logs fully drained and released.
    pub logs: u64,
}

struct Shared {
    logs: Mutex<VecDeque<Arc<dyn Translog>>>,
    state: Mutex<ReplicatorState>,
    wake: Notify,
    closed: AtomicBool,
    entries: AtomicU64,
    anomalies: AtomicU64,
    drained_logs: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: ReplicatorState) {
        let mut state = self.state.lock();
        if *state != ReplicatorState::Closed {
            *state = next;
        }
    }
}

pub struct LogReplicator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LogReplicator {
    pub fn start(pipeline: Arc<IngestionPipeline>, idle_wait: Duration) -> Self {
        let shared = Arc::new(Shared {
            logs: Mutex::new(VecDeque::new()),
            state: Mutex::new(ReplicatorState::Idle),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            entries: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            drained_logs: AtomicU64::new(0),
        });
        let handle = tokio::spawn(run(shared.clone(), pipeline, idle_wait));
        info!(?idle_wait, "log replicator started");
        Self { shared, worker: Mutex::new(Some(handle)) }
    }

    /// Queue a log for replay. The replicator holds a reference until the
    /// log has been drained or the replicator is closed.
    pub fn enqueue(&self, log: Arc<dyn Translog>) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SuggestError::Closed("log replicator"));
        }
        log.acquire();
        debug!(log = %log.name(), "queued translog");
        self.shared.logs.lock().push_back(log);
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn state(&self) -> ReplicatorState {
        *self.shared.state.lock()
    }

    pub fn queued(&self) -> usize {
        self.shared.logs.lock().len()
    }

    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            entries: self.shared.entries.load(Ordering::Acquire),
            anomalies: self.shared.anomalies.load(Ordering::Acquire),
            logs: self.shared.drained_logs.load(Ordering::Acquire),
        }
    }

    /// Stop the worker and release every queued log without reading it. A
    /// log being drained is released as the worker unwinds.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.shared.state.lock() = ReplicatorState::Closed;
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
        let dropped: Vec<_> = self.shared.logs.lock().drain(..).collect();
        for log in &dropped {
            log.release();
        }
        self.shared.wake.notify_waiters();
        info!(dropped = dropped.len(), "log replicator closed");
    }
}

impl Drop for LogReplicator {
    fn drop(&mut self) {
        self.close();
    }
}

/// Releases the log it holds when dropped, including when the worker is
/// aborted mid-drain.
struct Held(Arc<dyn Translog>);

impl Drop for Held {
    fn drop(&mut self) {
        self.0.release();
    }
}

async fn run(shared: Arc<Shared>, pipeline: Arc<IngestionPipeline>, idle_wait: Duration) {
    while !shared.closed.load(Ordering::Acquire) {
        let next = shared.logs.lock().pop_front();
        let Some(log) = next else {
            shared.set_state(ReplicatorState::Idle);
            tokio::select! {
                _ = shared.wake.notified() => {}
                _ = tokio::time::sleep(idle_wait) => {}
            }
            continue;
        };
        shared.set_state(ReplicatorState::Draining);
        let held = Held(log);
        drain(&shared, &pipeline, held.0.as_ref()).await;
        drop(held);
        shared.drained_logs.fetch_add(1, Ordering::AcqRel);
    }
}

async fn drain(shared: &Shared, pipeline: &IngestionPipeline, log: &dyn Translog) {
    let mut cursor = match log.cursor() {
        Ok(cursor) => cursor,
        Err(e) => {
            warn!(log = %log.name(), error = %e, "cannot open translog");
            return;
        }
    };
    let mut replayed = 0u64;
    loop {
        let entry = match cursor.next_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(log = %log.name(), error = %e, "translog read failed, abandoning the rest of it");
                break;
            }
        };
        match dispatch(pipeline, &entry).await {
            Ok(true) => {
                replayed += 1;
                shared.entries.fetch_add(1, Ordering::AcqRel);
            }
            Ok(false) => {
                shared.anomalies.fetch_add(1, Ordering::AcqRel);
            }
            Err(SuggestError::Closed(what)) => {
                warn!(log = %log.name(), closed = what, "pipeline closed during replay");
                break;
            }
            Err(e) => {
                warn!(log = %log.name(), version = entry.version, error = %e, "skipping unreadable translog entry");
                shared.anomalies.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
    debug!(log = %log.name(), replayed, "translog drained");
}

/// `Ok(false)` for an op code this consumer does not understand.
async fn dispatch(pipeline: &IngestionPipeline, entry: &LogEntry) -> Result<bool> {
    match entry.operation() {
        Some(Operation::Add) => pipeline.add(entry.document()?).await?,
        Some(Operation::DeleteByQuery) => pipeline.delete_by_query(entry.filter()?.into_query()?).await?,
        Some(Operation::Commit) => pipeline.commit().await?,
        None => {
            warn!(op = entry.op, version = entry.version, "unknown translog operation");
            return Ok(false);
        }
    }
    Ok(true)
}
