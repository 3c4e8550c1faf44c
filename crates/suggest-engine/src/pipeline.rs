//! Ingestion pipeline: a request queue drained by one background task.
//!
//! Producers call [`IngestionPipeline::submit`] (or the `add`/`commit`/
//! `delete_by_query` shorthands). While the queue or the writer's buffer is
//! over its ceiling the call waits, woken each time the worker takes a
//! request or after the backoff interval, whichever comes first. A stopped
//! worker never blocks producers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use suggest_core::config::{DocumentFields, PipelineConfig};
use suggest_core::error::{Result, SuggestError};
use suggest_core::query::QueryExpr;
use suggest_core::types::Record;

use crate::parser::ContentsParser;
use crate::writer::SuggestWriter;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Add(Record),
    Commit,
    DeleteByQuery(QueryExpr),
}

impl Request {
    fn label(&self) -> &'static str {
        match self {
            Request::Add(_) => "add",
            Request::Commit => "commit",
            Request::DeleteByQuery(_) => "delete_by_query",
        }
    }
}

struct Shared {
    queue: Mutex<VecDeque<Request>>,
    work: Notify,
    drained: Notify,
    alive: AtomicBool,
    closed: AtomicBool,
    processed: AtomicU64,
}

/// Clears `alive` however the worker exits, including on panic or abort.
struct AliveGuard(Arc<Shared>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.alive.store(false, Ordering::Release);
        self.0.drained.notify_waiters();
    }
}

pub struct IngestionPipeline {
    shared: Arc<Shared>,
    writer: Arc<SuggestWriter>,
    config: PipelineConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionPipeline {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(
        parser: ContentsParser,
        writer: Arc<SuggestWriter>,
        families: Vec<DocumentFields>,
        config: PipelineConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            work: Notify::new(),
            drained: Notify::new(),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            processed: AtomicU64::new(0),
        });
        let worker = Worker { shared: shared.clone(), parser, writer: writer.clone(), families, config: config.clone() };
        let handle = tokio::spawn(worker.run());
        info!(
            max_queued_requests = config.max_queued_requests,
            max_queued_terms = config.max_queued_terms,
            "ingestion pipeline started"
        );
        Self { shared, writer, config, worker: Mutex::new(Some(handle)) }
    }

    /// Enqueue a request, waiting while either ceiling is exceeded and the
    /// worker is alive. Nothing is dropped while the worker runs.
    pub async fn submit(&self, request: Request) -> Result<()> {
        loop {
            if !self.shared.alive.load(Ordering::Acquire) || !self.over_ceiling() {
                break;
            }
            let drained = self.shared.drained.notified();
            tokio::pin!(drained);
            // Register before the re-check so a wakeup in between is not lost.
            drained.as_mut().enable();
            if !self.over_ceiling() {
                break;
            }
            let _ = tokio::time::timeout(self.config.backoff(), drained).await;
        }
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SuggestError::Closed("ingestion pipeline"));
        }
        debug!(request = request.label(), "submitting ingestion request");
        self.shared.queue.lock().push_back(request);
        self.shared.work.notify_one();
        Ok(())
    }

    pub async fn add(&self, doc: Record) -> Result<()> {
        self.submit(Request::Add(doc)).await
    }

    pub async fn commit(&self) -> Result<()> {
        self.submit(Request::Commit).await
    }

    pub async fn delete_by_query(&self, query: QueryExpr) -> Result<()> {
        self.submit(Request::DeleteByQuery(query)).await
    }

    fn over_ceiling(&self) -> bool {
        self.queued() >= self.config.max_queued_requests || self.writer.pending_terms() >= self.config.max_queued_terms
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Requests the worker has finished handling.
    pub fn processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Stop the worker and discard whatever is still queued. Blocked
    /// producers wake up and get [`SuggestError::Closed`].
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
        let dropped = {
            let mut queue = self.shared.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        self.shared.alive.store(false, Ordering::Release);
        self.shared.drained.notify_waiters();
        info!(dropped, "ingestion pipeline closed");
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    parser: ContentsParser,
    writer: Arc<SuggestWriter>,
    families: Vec<DocumentFields>,
    config: PipelineConfig,
}

impl Worker {
    async fn run(self) {
        let _guard = AliveGuard(self.shared.clone());
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                break;
            }
            let next = self.shared.queue.lock().pop_front();
            match next {
                Some(request) => {
                    self.shared.drained.notify_waiters();
                    self.handle(request).await;
                    self.shared.processed.fetch_add(1, Ordering::AcqRel);
                }
                None => {
                    tokio::select! {
                        _ = self.shared.work.notified() => {}
                        _ = tokio::time::sleep(self.config.interval()) => self.flush_idle().await,
                    }
                }
            }
        }
    }

    async fn handle(&self, request: Request) {
        match request {
            Request::Add(doc) => {
                for family in &self.families {
                    let items = match self.parser.parse_document(&doc, family) {
                        Ok(items) => items,
                        Err(e) => {
                            warn!(error = %e, "skipping document that failed to parse");
                            continue;
                        }
                    };
                    if let Err(e) = self.writer.add(items).await {
                        warn!(error = %e, "failed to buffer suggest items");
                    }
                }
            }
            Request::Commit => match self.writer.commit().await {
                Ok(response) if !response.failures.is_empty() => {
                    warn!(failed = response.failures.len(), succeeded = response.succeeded, "commit finished with failures");
                }
                Ok(response) => debug!(written = response.succeeded, "commit finished"),
                Err(e) => warn!(error = %e, "commit failed"),
            },
            Request::DeleteByQuery(query) => match self.writer.delete_by_query(&query).await {
                Ok(deleted) => debug!(deleted, "delete by query finished"),
                Err(e) => warn!(error = %e, "delete by query failed"),
            },
        }
    }

    async fn flush_idle(&self) {
        if self.writer.pending_terms() == 0 {
            return;
        }
        if let Err(e) = self.writer.flush().await {
            warn!(error = %e, "idle flush failed");
        }
    }
}
