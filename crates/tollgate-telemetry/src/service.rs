//! Store-and-forward audit sink
//!
//! Entries go to durable storage through an [`AuditStore`]. Each entry moves
//! through [`DeliveryState`]: bounded retries with exponential backoff, then
//! the local [`FallbackLog`] if storage stays unavailable. Nothing here is
//! ever surfaced to the caller that submitted the record.
//!
//! Two delivery modes:
//! - `compliance`: every submission is delivered on its own task.
//! - `performance`: submissions go into a bounded queue drained by a fixed
//!   pool of workers. A full queue spools straight to the fallback file.

use crate::audit::{AuditEntry, AuditRecord};
use crate::fallback::FallbackLog;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tollgate_core::{Error, Result};
use tracing::{debug, error, info, warn};

/// Durable destination for audit entries
#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    /// Persist one entry. Must be idempotent on `entry.id`, since recovery
    /// may replay an entry whose first write actually landed.
    async fn persist(&self, entry: &AuditEntry) -> Result<()>;
}

/// How submissions reach the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    /// Direct retried write per entry
    #[default]
    Compliance,
    /// Bounded queue drained by background workers
    Performance,
}

impl AuditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliance => "compliance",
            Self::Performance => "performance",
        }
    }
}

/// Audit sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub mode: AuditMode,
    pub fallback_path: PathBuf,
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub attempt_timeout_ms: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            mode: AuditMode::Compliance,
            fallback_path: PathBuf::from("/var/lib/tollgate/audit/audit_fallback.jsonl"),
            queue_capacity: 10_000,
            workers: 3,
            max_attempts: 3,
            initial_backoff_ms: 100,
            attempt_timeout_ms: 2_000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl AuditConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Where one entry is in its delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// About to make the given (1-based) storage attempt
    Pending { attempt: u32 },
    /// Written to storage
    Persisted,
    /// Storage gave up; the entry is in the fallback file
    Spooled,
    /// Neither storage nor the fallback file accepted the entry
    Lost,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Persisted => "persisted",
            Self::Spooled => "spooled",
            Self::Lost => "lost",
        }
    }
}

/// Outcome of replaying the fallback file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Entries written to storage and removed from the file
    pub recovered: usize,
    /// Entries left in the file because storage rejected them
    pub failed: usize,
    /// Lines that did not parse or verify
    pub corrupt: usize,
}

/// Counters exposed to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub mode: AuditMode,
    /// Entries accepted into the queue
    pub queued: u64,
    /// Entries written to storage
    pub processed: u64,
    /// Entries whose storage attempts were exhausted
    pub failed: u64,
    /// Entries written to the fallback file
    pub spooled: u64,
    /// Entries that could not be stored anywhere
    pub lost: u64,
    /// Lines currently waiting in the fallback file
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    spooled: AtomicU64,
    lost: AtomicU64,
}

struct SinkInner {
    store: Arc<dyn AuditStore>,
    fallback: Arc<FallbackLog>,
    config: AuditConfig,
    counters: Counters,
    handle: Handle,
    tracker: TaskTracker,
    cancel: CancellationToken,
    accepting: AtomicBool,
    sender: RwLock<Option<mpsc::Sender<AuditEntry>>>,
    receiver: Option<Arc<AsyncMutex<mpsc::Receiver<AuditEntry>>>>,
}

/// Cloneable handle to the audit pipeline.
///
/// Call [`shutdown`](Self::shutdown) before dropping the last handle in
/// performance mode; the workers hold the queue open until then.
#[derive(Clone)]
pub struct AuditSink {
    inner: Arc<SinkInner>,
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("mode", &self.inner.config.mode)
            .field("fallback", &self.inner.fallback.path())
            .finish()
    }
}

impl AuditSink {
    /// Build a sink and, in performance mode, start its workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(store: Arc<dyn AuditStore>, config: AuditConfig) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|_| Error::internal("audit sink must be created inside a Tokio runtime"))?;

        let (sender, receiver) = match config.mode {
            AuditMode::Performance => {
                let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
                (Some(tx), Some(Arc::new(AsyncMutex::new(rx))))
            }
            AuditMode::Compliance => (None, None),
        };

        let inner = Arc::new(SinkInner {
            store,
            fallback: Arc::new(FallbackLog::new(config.fallback_path.clone())),
            config,
            counters: Counters::default(),
            handle,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            sender: RwLock::new(sender),
            receiver,
        });

        if let Some(receiver) = inner.receiver.clone() {
            spawn_workers(&inner, receiver);
        }

        info!(
            mode = inner.config.mode.as_str(),
            fallback = %inner.config.fallback_path.display(),
            "Audit sink started"
        );

        Ok(Self { inner })
    }

    pub fn mode(&self) -> AuditMode {
        self.inner.config.mode
    }

    pub fn fallback(&self) -> &FallbackLog {
        &self.inner.fallback
    }

    /// Hand a record to the pipeline without waiting for it
    pub fn submit(&self, record: AuditRecord) {
        let entry = AuditEntry::new(record);

        let (entry, spool) = if !self.inner.accepting.load(Ordering::Acquire) {
            debug!(entry_id = %entry.id, "Audit sink is shut down, spooling");
            (entry, true)
        } else {
            let sender = self.inner.sender.read();
            match sender.as_ref() {
                Some(tx) => match tx.try_send(entry) {
                    Ok(()) => {
                        self.inner.counters.queued.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    Err(TrySendError::Full(entry)) => {
                        warn!(entry_id = %entry.id, "Audit queue full, spooling to fallback file");
                        (entry, true)
                    }
                    Err(TrySendError::Closed(entry)) => (entry, true),
                },
                None => (entry, false),
            }
        };

        let inner = self.inner.clone();
        if spool {
            self.inner.tracker.spawn_on(
                async move {
                    inner.spool(entry).await;
                },
                &self.inner.handle,
            );
        } else {
            self.inner.tracker.spawn_on(
                async move {
                    inner.deliver(entry).await;
                },
                &self.inner.handle,
            );
        }
    }

    /// Deliver a record inline and report where it ended up
    pub async fn record(&self, record: AuditRecord) -> DeliveryState {
        self.inner.deliver(AuditEntry::new(record)).await
    }

    /// Replay the fallback file into storage.
    ///
    /// Stops at the first storage failure; only entries that were written
    /// are removed from the file.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let fallback = self.inner.fallback.clone();
        let contents = tokio::task::spawn_blocking(move || fallback.read())
            .await
            .map_err(|e| Error::internal(format!("fallback read task failed: {e}")))??;

        let mut report = RecoveryReport {
            corrupt: contents.corrupt,
            ..RecoveryReport::default()
        };
        if contents.entries.is_empty() && contents.corrupt == 0 {
            return Ok(report);
        }

        let total = contents.entries.len();
        let mut replayed = HashSet::new();
        for entry in contents.entries {
            match self.inner.attempt(&entry).await {
                Ok(()) => {
                    replayed.insert(entry.id);
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "Audit recovery interrupted by storage failure");
                    break;
                }
            }
        }
        report.recovered = replayed.len();
        report.failed = total - replayed.len();

        let fallback = self.inner.fallback.clone();
        let remaining = tokio::task::spawn_blocking(move || fallback.remove(&replayed))
            .await
            .map_err(|e| Error::internal(format!("fallback rewrite task failed: {e}")))??;

        ::metrics::counter!("tollgate_audit_entries_total", "outcome" => "recovered")
            .increment(report.recovered as u64);
        info!(
            recovered = report.recovered,
            failed = report.failed,
            corrupt = report.corrupt,
            remaining,
            "Audit fallback recovery finished"
        );
        Ok(report)
    }

    /// Stop intake, let workers finish, and spool whatever is left.
    ///
    /// Returns `true` if everything drained within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.accepting.store(false, Ordering::Release);
        // Dropping the sender lets workers exit once the queue is empty.
        self.inner.sender.write().take();
        self.inner.tracker.close();

        if time::timeout(timeout, self.inner.tracker.wait()).await.is_ok() {
            info!("Audit sink drained");
            return true;
        }

        warn!(
            timeout_ms = timeout.as_millis() as u64,
            "Audit sink did not drain in time, spooling remaining queue"
        );
        self.inner.cancel.cancel();

        if let Some(receiver) = &self.inner.receiver {
            let mut rx = receiver.lock().await;
            while let Ok(entry) = rx.try_recv() {
                self.inner.spool(entry).await;
            }
        }

        if time::timeout(self.inner.config.attempt_timeout(), self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!("Audit writes still in flight after shutdown");
        }
        false
    }

    pub fn stats(&self) -> AuditStats {
        let counters = &self.inner.counters;
        let pending = self.inner.fallback.pending().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read audit fallback file");
            0
        });

        AuditStats {
            mode: self.inner.config.mode,
            queued: counters.queued.load(Ordering::Relaxed),
            processed: counters.processed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            spooled: counters.spooled.load(Ordering::Relaxed),
            lost: counters.lost.load(Ordering::Relaxed),
            pending,
        }
    }
}

impl SinkInner {
    /// One bounded storage attempt
    async fn attempt(&self, entry: &AuditEntry) -> Result<()> {
        match time::timeout(self.config.attempt_timeout(), self.store.persist(entry)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Drive one entry to a terminal state
    async fn deliver(&self, entry: AuditEntry) -> DeliveryState {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff();
        let mut state = DeliveryState::Pending { attempt: 1 };

        while let DeliveryState::Pending { attempt } = state {
            state = match self.attempt(&entry).await {
                Ok(()) => {
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                    DeliveryState::Persisted
                }
                Err(e) if attempt < max_attempts => {
                    debug!(
                        entry_id = %entry.id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Audit write failed, retrying"
                    );
                    time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    DeliveryState::Pending {
                        attempt: attempt + 1,
                    }
                }
                Err(e) => {
                    warn!(
                        entry_id = %entry.id,
                        kind = entry.record.kind(),
                        attempts = attempt,
                        error = %e,
                        "Audit write failed, falling back to local file"
                    );
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.spool(entry.clone()).await
                }
            };
        }

        if state == DeliveryState::Persisted {
            ::metrics::counter!("tollgate_audit_entries_total", "outcome" => state.outcome())
                .increment(1);
        }
        state
    }

    async fn spool(&self, entry: AuditEntry) -> DeliveryState {
        let fallback = self.fallback.clone();
        let result = tokio::task::spawn_blocking(move || {
            let result = fallback.append(&entry);
            (entry, result)
        })
        .await;

        match result {
            Ok((entry, result)) => self.finish_spool(&entry, result),
            Err(e) => {
                error!(error = %e, "Audit spool task failed");
                self.counters.lost.fetch_add(1, Ordering::Relaxed);
                ::metrics::counter!("tollgate_audit_entries_total", "outcome" => "lost").increment(1);
                DeliveryState::Lost
            }
        }
    }

    fn finish_spool(&self, entry: &AuditEntry, result: Result<()>) -> DeliveryState {
        let state = match result {
            Ok(()) => {
                self.counters.spooled.fetch_add(1, Ordering::Relaxed);
                DeliveryState::Spooled
            }
            Err(e) => {
                error!(
                    entry_id = %entry.id,
                    kind = entry.record.kind(),
                    error = %e,
                    "Audit entry lost: fallback file unavailable"
                );
                self.counters.lost.fetch_add(1, Ordering::Relaxed);
                DeliveryState::Lost
            }
        };
        ::metrics::counter!("tollgate_audit_entries_total", "outcome" => state.outcome()).increment(1);
        state
    }
}

fn spawn_workers(inner: &Arc<SinkInner>, receiver: Arc<AsyncMutex<mpsc::Receiver<AuditEntry>>>) {
    let workers = inner.config.workers.max(1);
    for worker in 0..workers {
        let sink = inner.clone();
        let receiver = receiver.clone();
        inner.tracker.spawn_on(
            async move {
                loop {
                    let next = {
                        let mut rx = receiver.lock().await;
                        tokio::select! {
                            biased;
                            _ = sink.cancel.cancelled() => None,
                            entry = rx.recv() => entry,
                        }
                    };
                    let Some(entry) = next else { break };
                    sink.deliver(entry).await;
                }
                debug!(worker, "Audit worker stopped");
            },
            &inner.handle,
        );
    }
}
