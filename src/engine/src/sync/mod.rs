//! Asynchronous reconciliation of claim payloads with the identity
//! provider
//!
//! Version bumps are enqueued as `(subject, version)` jobs and served by a
//! bounded worker pool. The mutation path never blocks on provider I/O: a
//! full queue degrades to a pending marker, the same state retry
//! exhaustion leaves behind, and the read path reconciles pending subjects
//! later. Workers re-read the current effective set at push time, so a
//! superseded job naturally pushes the newest state or is dropped.

pub mod provider;

pub use provider::{IdentityProvider, InMemoryIdentityProvider};

use crate::audit::{AuditEntry, AuditLogger, AuditOutcome};
use crate::claims::ClaimSynthesizer;
use crate::error::EngineError;
use crate::resolver::PermissionResolver;
use crate::types::UserDirectory;
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sync service configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of worker tasks
    pub workers: usize,

    /// Bounded job queue depth
    pub queue_capacity: usize,

    /// Push attempts before degrading to pending
    pub max_attempts: u32,

    /// First backoff delay; doubles per attempt
    pub base_backoff: Duration,

    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
            max_attempts: 4,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Outcome of one push, including how many attempts it took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncResult {
    /// Whether the provider accepted the claim document
    pub success: bool,

    /// Attempts consumed (0 when the job was superseded and skipped)
    pub attempts: u32,
}

#[derive(Debug, Clone)]
struct SyncJob {
    subject_id: String,
    version: u64,
}

struct SyncShared {
    provider: Arc<dyn IdentityProvider>,
    resolver: Arc<PermissionResolver>,
    directory: Arc<dyn UserDirectory>,
    synthesizer: Arc<ClaimSynthesizer>,
    audit: Arc<AuditLogger>,
    config: SyncConfig,

    /// Last version successfully pushed per subject; one entry per subject
    /// ever synced, bounded by the directory population
    synced: DashMap<String, u64>,

    /// Subjects whose latest state is not yet on the provider
    pending: DashMap<String, u64>,

    /// Per-subject push gates: pushes for one subject are serialized so an
    /// older job can never overwrite a newer successful push. Grows with
    /// the subject population, like `synced`.
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl SyncShared {
    /// Push the subject's *current* state to the provider
    async fn push(&self, subject_id: &str, job_version: u64) -> SyncResult {
        let gate = self
            .gates
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let _guard = gate.lock().await;

        // Superseded: an equal-or-newer version is already on the provider.
        if self.last_synced(subject_id) >= Some(job_version) {
            debug!(subject_id, job_version, "sync job superseded, dropping");
            return SyncResult {
                success: true,
                attempts: 0,
            };
        }

        // Re-read current state at push time rather than trusting the job.
        let user = match self.directory.get(subject_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(subject_id, "subject vanished before sync; dropping job");
                self.pending.remove(subject_id);
                return SyncResult {
                    success: false,
                    attempts: 0,
                };
            }
            Err(e) => {
                warn!(subject_id, error = %e, "directory lookup failed during sync");
                self.pending.insert(subject_id.to_string(), job_version);
                return SyncResult {
                    success: false,
                    attempts: 0,
                };
            }
        };

        let set = match self.resolver.resolve(subject_id).await {
            Ok(set) => set,
            Err(e) => {
                warn!(subject_id, error = %e, "resolution failed during sync");
                self.pending.insert(subject_id.to_string(), job_version);
                return SyncResult {
                    success: false,
                    attempts: 0,
                };
            }
        };

        if self.last_synced(subject_id) >= Some(set.version) {
            return SyncResult {
                success: true,
                attempts: 0,
            };
        }

        let payload = match self.synthesizer.synthesize(&user, &set) {
            Ok(payload) => payload,
            Err(e @ EngineError::PayloadTooLarge { .. }) => {
                // Configuration/data error: alert and leave pending so a
                // fixed ceiling can be reconciled later.
                warn!(subject_id, error = %e, "claim synthesis exceeded ceiling");
                self.audit
                    .record(
                        AuditEntry::new("sync-service", "sync.synthesize", "claims", AuditOutcome::Failure)
                            .resource(subject_id),
                    )
                    .await;
                self.pending.insert(subject_id.to_string(), set.version);
                return SyncResult {
                    success: false,
                    attempts: 0,
                };
            }
            Err(e) => {
                warn!(subject_id, error = %e, "claim synthesis failed");
                self.pending.insert(subject_id.to_string(), set.version);
                return SyncResult {
                    success: false,
                    attempts: 0,
                };
            }
        };

        let mut attempts = 0;
        let mut last_error = String::new();
        while attempts < self.config.max_attempts {
            attempts += 1;

            match self.provider.upsert_claims(subject_id, &payload).await {
                Ok(()) => {
                    self.record_synced(subject_id, set.version);
                    self.pending.remove(subject_id);
                    debug!(subject_id, version = set.version, attempts, "claims synced");
                    return SyncResult {
                        success: true,
                        attempts,
                    };
                }
                Err(e) => {
                    warn!(
                        subject_id,
                        version = set.version,
                        attempt = attempts,
                        error = %e,
                        "provider push failed"
                    );
                    last_error = e.to_string();
                    if attempts < self.config.max_attempts {
                        tokio::time::sleep(self.backoff(attempts)).await;
                    }
                }
            }
        }

        // Retry exhaustion degrades to pending rather than failing the
        // mutation that produced the version bump.
        let err = EngineError::SyncFailed {
            subject_id: subject_id.to_string(),
            attempts,
            message: last_error,
        };
        warn!(error = %err, "claim sync retries exhausted");
        self.audit
            .record(
                AuditEntry::new("sync-service", "sync.push", "claims", AuditOutcome::Failure)
                    .resource(subject_id)
                    .after(serde_json::json!({
                        "version": set.version,
                        "attempts": attempts,
                        "error": err.to_string(),
                    })),
            )
            .await;
        self.pending.insert(subject_id.to_string(), set.version);

        SyncResult {
            success: false,
            attempts,
        }
    }

    fn last_synced(&self, subject_id: &str) -> Option<u64> {
        self.synced.get(subject_id).map(|v| *v)
    }

    fn record_synced(&self, subject_id: &str, version: u64) {
        let mut entry = self.synced.entry(subject_id.to_string()).or_insert(0);
        if version > *entry {
            *entry = version;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_backoff
            .saturating_mul(1u32 << (attempt - 1).min(16));
        let capped = exp.min(self.config.max_backoff);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.config.base_backoff.as_millis() as u64);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Asynchronous claim sync service with a bounded worker pool
pub struct SyncService {
    tx: mpsc::Sender<SyncJob>,
    shared: Arc<SyncShared>,
    workers: Vec<JoinHandle<()>>,
}

impl SyncService {
    /// Spawn the worker pool
    pub fn spawn(
        provider: Arc<dyn IdentityProvider>,
        resolver: Arc<PermissionResolver>,
        directory: Arc<dyn UserDirectory>,
        synthesizer: Arc<ClaimSynthesizer>,
        audit: Arc<AuditLogger>,
        config: SyncConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<SyncJob>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let shared = Arc::new(SyncShared {
            provider,
            resolver,
            directory,
            synthesizer,
            audit,
            config: config.clone(),
            synced: DashMap::new(),
            pending: DashMap::new(),
            gates: DashMap::new(),
        });

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let shared = shared.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        match job {
                            Some(job) => {
                                let _ = shared.push(&job.subject_id, job.version).await;
                            }
                            None => {
                                debug!(worker, "sync worker shutting down");
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        info!(workers = config.workers, "sync service started");

        Self {
            tx,
            shared,
            workers,
        }
    }

    /// Enqueue a sync job; never blocks the caller
    ///
    /// A full queue leaves a pending marker instead of waiting, the same
    /// degraded state retry exhaustion produces.
    pub fn enqueue(&self, subject_id: &str, version: u64) {
        let job = SyncJob {
            subject_id: subject_id.to_string(),
            version,
        };
        if let Err(e) = self.tx.try_send(job) {
            warn!(subject_id, version, error = %e, "sync queue full, marking pending");
            self.shared.pending.insert(subject_id.to_string(), version);
        }
    }

    /// Re-enqueue a subject left pending by a failed or skipped push
    ///
    /// Called from the read path; returns whether a retry was scheduled.
    pub fn reconcile(&self, subject_id: &str) -> bool {
        let Some(version) = self.shared.pending.get(subject_id).map(|v| *v) else {
            return false;
        };
        debug!(subject_id, version, "reconciling pending sync");
        self.enqueue(subject_id, version);
        true
    }

    /// Push a subject's current state inline (bypassing the queue)
    pub async fn push_now(&self, subject_id: &str) -> SyncResult {
        let version = self.shared.resolver.version(subject_id);
        self.shared.push(subject_id, version).await
    }

    /// Last version successfully pushed for a subject
    pub fn last_synced(&self, subject_id: &str) -> Option<u64> {
        self.shared.last_synced(subject_id)
    }

    /// Whether a subject has provider state older than its current version
    pub fn is_pending(&self, subject_id: &str) -> bool {
        self.shared.pending.contains_key(subject_id)
    }

    /// Close the queue and wait for workers to drain it
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
