//! External identity provider interface
//!
//! The provider is the system of record for authentication; the engine
//! only tells it the target claim state per subject. Upserts must be
//! idempotent on the provider side.

use crate::claims::ClaimPayload;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Identity provider accepting full target-state claim documents
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Upsert the claim document for a subject (idempotent)
    async fn upsert_claims(&self, subject_id: &str, payload: &ClaimPayload) -> Result<()>;
}

/// In-memory identity provider with failure injection for tests
pub struct InMemoryIdentityProvider {
    claims: RwLock<HashMap<String, ClaimPayload>>,
    pushes: AtomicU64,
    fail_next: AtomicU64,
}

impl InMemoryIdentityProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self {
            claims: RwLock::new(HashMap::new()),
            pushes: AtomicU64::new(0),
            fail_next: AtomicU64::new(0),
        }
    }

    /// Current claim document for a subject
    pub async fn claims_for(&self, subject_id: &str) -> Option<ClaimPayload> {
        self.claims.read().await.get(subject_id).cloned()
    }

    /// Total accepted pushes
    pub fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Make the next `n` pushes fail with a transient error
    pub fn fail_next(&self, n: u64) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn upsert_claims(&self, subject_id: &str, payload: &ClaimPayload) -> Result<()> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::Provider("injected transient failure".to_string()));
        }

        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.claims
            .write()
            .await
            .insert(subject_id.to_string(), payload.clone());
        Ok(())
    }
}
