//! Job registry: owns call jobs and the provider SID reverse index.
//!
//! Unknown job, attempt, or SID references are no-ops, never errors: provider
//! callbacks arrive unordered, duplicated, and possibly after a reset.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{AttemptPatch, CallAttempt, CallJob, CallMode, CallTarget, NewCallJob};
use super::sid_index::{Rebind, SidIndex};

/// Points at one attempt inside one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptRef {
    pub job_id: Uuid,
    pub attempt_id: Uuid,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, CallJob>,
    sids: SidIndex<AttemptRef>,
}

impl Inner {
    /// Patch an attempt and recompute its job. Returns the updated job.
    fn patch(&mut self, job_id: Uuid, attempt_id: Uuid, patch: AttemptPatch) -> Option<&CallJob> {
        let job = self.jobs.get_mut(&job_id)?;
        let attempt = job.attempt_mut(attempt_id)?;
        attempt.apply(patch);
        job.recompute_status();
        Some(job)
    }
}

/// In-memory store of call jobs.
#[derive(Default)]
pub struct JobRegistry {
    inner: RwLock<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a job with one queued attempt per target. The attempt set is fixed.
    pub fn create_job(&self, mode: CallMode, input: NewCallJob, targets: &[CallTarget]) -> CallJob {
        self.insert_job(CallJob::new(mode, input, targets))
    }

    /// Register a freshly built job whose id was allocated up front.
    pub fn insert_job(&self, job: CallJob) -> CallJob {
        info!(
            job_id = %job.job_id,
            mode = %job.mode,
            attempts = job.attempts.len(),
            "Call job created"
        );
        self.write().jobs.insert(job.job_id, job.clone());
        job
    }

    pub fn get_job(&self, job_id: Uuid) -> Option<CallJob> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .get(&job_id)
            .cloned()
    }

    /// All jobs, most recent first.
    pub fn list_jobs(&self) -> Vec<CallJob> {
        let mut jobs: Vec<CallJob> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }

    /// Merge `patch` into an attempt and recompute the job status.
    ///
    /// Returns the updated job, or `None` (with no state change) when the job
    /// or attempt is unknown.
    pub fn mark_attempt(&self, job_id: Uuid, attempt_id: Uuid, patch: AttemptPatch) -> Option<CallJob> {
        let mut inner = self.write();
        match inner.patch(job_id, attempt_id, patch) {
            Some(job) => {
                debug!(job_id = %job_id, attempt_id = %attempt_id, status = %job.status, "Attempt updated");
                Some(job.clone())
            }
            None => {
                debug!(job_id = %job_id, attempt_id = %attempt_id, "Ignoring update for unknown attempt");
                None
            }
        }
    }

    /// Index `sid` for the attempt and record it on the attempt.
    ///
    /// Rebinding is last-bind-wins and logged as an anomaly. Unknown references
    /// are a no-op and leave the index untouched.
    pub fn bind_provider_sid(&self, job_id: Uuid, attempt_id: Uuid, sid: &str) -> Option<CallJob> {
        let mut inner = self.write();
        let known = inner
            .jobs
            .get(&job_id)
            .is_some_and(|job| job.attempt(attempt_id).is_some());
        if !known {
            debug!(job_id = %job_id, attempt_id = %attempt_id, sid = sid, "Ignoring bind for unknown attempt");
            return None;
        }

        let owner = AttemptRef { job_id, attempt_id };
        let rebind = inner.sids.bind(sid, owner);
        if rebind.is_anomaly() {
            warn!(job_id = %job_id, attempt_id = %attempt_id, sid = sid, rebind = ?rebind, "Provider SID rebound");
        }
        if let Rebind::MovedFrom { previous_owner } = &rebind {
            if let Some(previous) = inner
                .jobs
                .get_mut(&previous_owner.job_id)
                .and_then(|job| job.attempt_mut(previous_owner.attempt_id))
            {
                previous.provider_call_sid = None;
            }
        }

        let patch = AttemptPatch {
            provider_call_sid: Some(sid.to_string()),
            ..AttemptPatch::default()
        };
        inner.patch(job_id, attempt_id, patch).cloned()
    }

    /// Reverse lookup. `None` for unrecognized SIDs.
    pub fn find_by_provider_sid(&self, sid: &str) -> Option<(CallJob, CallAttempt)> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let owner = inner.sids.owner_of(sid)?;
        let job = inner.jobs.get(&owner.job_id)?;
        let attempt = job.attempt(owner.attempt_id)?;
        Some((job.clone(), attempt.clone()))
    }

    /// Insert a previously persisted job, re-indexing its SIDs.
    ///
    /// In-memory state wins: a job already present is left as is.
    pub fn restore_job(&self, job: CallJob) -> bool {
        let mut inner = self.write();
        if inner.jobs.contains_key(&job.job_id) {
            return false;
        }
        for attempt in &job.attempts {
            if let Some(sid) = &attempt.provider_call_sid {
                let owner = AttemptRef {
                    job_id: job.job_id,
                    attempt_id: attempt.attempt_id,
                };
                inner.sids.bind(sid, owner);
            }
        }
        inner.jobs.insert(job.job_id, job);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every job and SID binding.
    pub fn reset(&self) {
        let mut inner = self.write();
        let dropped = inner.jobs.len();
        inner.jobs.clear();
        inner.sids.clear();
        info!(dropped, "Job registry reset");
    }
}
