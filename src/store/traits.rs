//! `Database` trait: the single async interface for persistence.
//!
//! Persisted records mirror the in-memory entities field for field, so
//! rehydration needs no translation.

use async_trait::async_trait;

use crate::calls::CallJob;
use crate::error::DatabaseError;
use crate::safety::EscalationEvent;
use crate::transfer::WarmTransferSession;

/// Backend-agnostic storage for jobs, transfers, escalations, and blocked numbers.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Call jobs ───────────────────────────────────────────────────

    /// Insert or replace a job with all of its attempts.
    async fn upsert_call_job(&self, job: &CallJob) -> Result<(), DatabaseError>;

    /// Most recently updated jobs first, up to `limit`.
    async fn load_call_jobs(&self, limit: usize) -> Result<Vec<CallJob>, DatabaseError>;

    // ── Warm transfers ──────────────────────────────────────────────

    async fn upsert_warm_transfer(&self, session: &WarmTransferSession) -> Result<(), DatabaseError>;

    async fn load_warm_transfers(&self, limit: usize) -> Result<Vec<WarmTransferSession>, DatabaseError>;

    // ── Escalations ─────────────────────────────────────────────────

    /// Insert an escalation. Existing ids are left untouched.
    async fn insert_escalation(&self, event: &EscalationEvent) -> Result<(), DatabaseError>;

    /// Newest first, up to `limit`.
    async fn load_escalations(&self, limit: usize) -> Result<Vec<EscalationEvent>, DatabaseError>;

    // ── Blocked numbers ─────────────────────────────────────────────

    /// Store a canonical number. Idempotent.
    async fn add_blocked_number(&self, phone: &str) -> Result<(), DatabaseError>;

    async fn remove_blocked_number(&self, phone: &str) -> Result<(), DatabaseError>;

    /// Sorted ascending.
    async fn load_blocked_numbers(&self) -> Result<Vec<String>, DatabaseError>;
}
