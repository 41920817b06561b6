//! Append-only audit log of permission changes and authorization decisions
//!
//! Logging is best-effort relative to the primary operation: a sink
//! failure is reported on the error channel and counted, never propagated
//! to the caller whose operation triggered it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;
use uuid::Uuid;

use crate::error::Result;

/// Outcome of the audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Operation succeeded
    Success,
    /// Operation was denied (validation or authorization)
    Denied,
    /// Operation failed for another reason
    Failure,
}

/// One append-only audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record id
    pub id: String,

    /// Who performed (or attempted) the operation
    pub actor_id: String,

    /// Operation name (e.g., "override.create", "sync.push")
    pub action: String,

    /// Kind of resource acted upon
    pub resource_type: String,

    /// Identifier of the resource, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// State snapshot before the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,

    /// State snapshot after the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,

    /// Outcome
    pub outcome: AuditOutcome,

    /// When the operation happened
    pub timestamp: DateTime<Utc>,
}

/// Parameters for one audit entry; ids and timestamps are filled in by the
/// logger
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub outcome: AuditOutcome,
}

impl AuditEntry {
    /// Start an entry with the required fields
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            before: None,
            after: None,
            outcome,
        }
    }

    /// Attach the resource id
    pub fn resource(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Attach a before snapshot
    pub fn before(mut self, value: serde_json::Value) -> Self {
        self.before = Some(value);
        self
    }

    /// Attach an after snapshot
    pub fn after(mut self, value: serde_json::Value) -> Self {
        self.after = Some(value);
        self
    }
}

/// Append-only audit record sink
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a record
    async fn append(&self, record: AuditRecord) -> Result<()>;
}

/// In-memory audit sink implementation
pub struct InMemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of every record appended so far
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    /// Records matching an action name
    pub async fn records_for_action(&self, action: &str) -> Vec<AuditRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Audit logger wrapping a sink with never-fails semantics
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,

    /// Primary operations that proceeded without an audit record
    missed_records: AtomicU64,
}

impl AuditLogger {
    /// Create a logger over a sink
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            missed_records: AtomicU64::new(0),
        }
    }

    /// Record an entry; sink failures are counted and reported, never
    /// returned
    pub async fn record(&self, entry: AuditEntry) {
        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            actor_id: entry.actor_id,
            action: entry.action,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            before: entry.before,
            after: entry.after,
            outcome: entry.outcome,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.sink.append(record).await {
            self.missed_records.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "audit write failed; primary operation unaffected");
        }
    }

    /// Number of operations whose audit record was lost
    pub fn missed_records(&self) -> u64 {
        self.missed_records.load(Ordering::Relaxed)
    }
}
