//! Fire-and-forget write-through to the database.
//!
//! In-memory registries are authoritative. Writes are spawned onto the
//! runtime so request handling never waits on storage, and failures are
//! logged, never surfaced.

use std::sync::Arc;

use tracing::warn;

use crate::calls::CallJob;
use crate::safety::EscalationEvent;
use crate::store::Database;
use crate::transfer::WarmTransferSession;

/// Optional persistence handle. A disabled sink drops every write.
#[derive(Clone, Default)]
pub struct PersistenceSink {
    db: Option<Arc<dyn Database>>,
}

impl PersistenceSink {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db: Some(db) }
    }

    pub fn disabled() -> Self {
        Self { db: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.db.is_some()
    }

    pub fn database(&self) -> Option<Arc<dyn Database>> {
        self.db.clone()
    }

    pub fn job(&self, job: &CallJob) {
        let Some(db) = self.db.clone() else { return };
        let job = job.clone();
        tokio::spawn(async move {
            if let Err(e) = db.upsert_call_job(&job).await {
                warn!(job_id = %job.job_id, error = %e, "Failed to persist call job");
            }
        });
    }

    pub fn transfer(&self, session: &WarmTransferSession) {
        let Some(db) = self.db.clone() else { return };
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = db.upsert_warm_transfer(&session).await {
                warn!(transfer_id = %session.transfer_id, error = %e, "Failed to persist warm transfer");
            }
        });
    }

    pub fn escalation(&self, event: &EscalationEvent) {
        let Some(db) = self.db.clone() else { return };
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = db.insert_escalation(&event).await {
                warn!(escalation_id = %event.escalation_id, error = %e, "Failed to persist escalation");
            }
        });
    }

    pub fn block(&self, phone: &str) {
        let Some(db) = self.db.clone() else { return };
        let phone = phone.to_string();
        tokio::spawn(async move {
            if let Err(e) = db.add_blocked_number(&phone).await {
                warn!(number = %phone, error = %e, "Failed to persist blocked number");
            }
        });
    }

    pub fn unblock(&self, phone: &str) {
        let Some(db) = self.db.clone() else { return };
        let phone = phone.to_string();
        tokio::spawn(async move {
            if let Err(e) = db.remove_blocked_number(&phone).await {
                warn!(number = %phone, error = %e, "Failed to remove blocked number");
            }
        });
    }
}
