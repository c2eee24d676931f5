//! Transfer registry: warm-transfer sessions and the per-leg SID index.
//!
//! Status is last-write-wins. A failure on one leg after the other leg bridged
//! flips the whole session to `failed`; legs are never merged.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{NewTransfer, TransferLeg, TransferStatus, WarmTransferSession};
use crate::calls::{CallMode, Rebind, SidIndex};

/// Points at one leg of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LegRef {
    pub transfer_id: Uuid,
    pub leg: TransferLeg,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, WarmTransferSession>,
    sids: SidIndex<LegRef>,
}

#[derive(Default)]
pub struct TransferRegistry {
    inner: RwLock<Inner>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_session(&self, mode: CallMode, input: NewTransfer) -> WarmTransferSession {
        let session = WarmTransferSession::new(mode, input);
        info!(
            transfer_id = %session.transfer_id,
            job_id = %session.job_id,
            conference = %session.conference_name,
            "Warm transfer created"
        );
        self.write()
            .sessions
            .insert(session.transfer_id, session.clone());
        session
    }

    pub fn get(&self, transfer_id: Uuid) -> Option<WarmTransferSession> {
        self.read().sessions.get(&transfer_id).cloned()
    }

    /// Most recent first.
    pub fn list(&self) -> Vec<WarmTransferSession> {
        let mut sessions: Vec<WarmTransferSession> = self.read().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.transfer_id.cmp(&b.transfer_id))
        });
        sessions
    }

    /// Overwrite the status. Transition legality is the caller's concern.
    pub fn set_status(&self, transfer_id: Uuid, status: TransferStatus) -> Option<WarmTransferSession> {
        let mut inner = self.write();
        let Some(session) = inner.sessions.get_mut(&transfer_id) else {
            debug!(transfer_id = %transfer_id, "Ignoring status for unknown transfer");
            return None;
        };
        session.status = status;
        session.updated_at = Utc::now();
        debug!(transfer_id = %transfer_id, status = %status, "Transfer status set");
        Some(session.clone())
    }

    /// Record a leg's SID and index it. Unknown sessions are a no-op.
    pub fn bind_call_sid(&self, transfer_id: Uuid, leg: TransferLeg, sid: &str) -> Option<WarmTransferSession> {
        let mut inner = self.write();
        if !inner.sessions.contains_key(&transfer_id) {
            debug!(transfer_id = %transfer_id, sid = sid, "Ignoring bind for unknown transfer");
            return None;
        }

        let rebind = inner.sids.bind(sid, LegRef { transfer_id, leg });
        if rebind.is_anomaly() {
            warn!(transfer_id = %transfer_id, leg = %leg, sid = sid, rebind = ?rebind, "Transfer SID rebound");
        }
        if let Rebind::MovedFrom { previous_owner } = rebind {
            if let Some(previous) = inner.sessions.get_mut(&previous_owner.transfer_id) {
                *previous.call_sids.slot_mut(previous_owner.leg) = None;
            }
        }

        let session = inner.sessions.get_mut(&transfer_id)?;
        *session.call_sids.slot_mut(leg) = Some(sid.to_string());
        session.updated_at = Utc::now();
        Some(session.clone())
    }

    pub fn find_by_sid(&self, sid: &str) -> Option<(WarmTransferSession, TransferLeg)> {
        let inner = self.read();
        let owner = inner.sids.owner_of(sid)?;
        let session = inner.sessions.get(&owner.transfer_id)?;
        Some((session.clone(), owner.leg))
    }

    /// Insert a persisted session and re-index its legs. Existing sessions win.
    pub fn restore(&self, session: WarmTransferSession) -> bool {
        let mut inner = self.write();
        if inner.sessions.contains_key(&session.transfer_id) {
            return false;
        }
        for leg in [TransferLeg::Survivor, TransferLeg::Shelter] {
            if let Some(sid) = session.call_sids.get(leg) {
                inner.sids.bind(
                    sid,
                    LegRef {
                        transfer_id: session.transfer_id,
                        leg,
                    },
                );
            }
        }
        inner.sessions.insert(session.transfer_id, session);
        true
    }

    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        let mut inner = self.write();
        let dropped = inner.sessions.len();
        inner.sessions.clear();
        inner.sids.clear();
        info!(dropped, "Transfer registry reset");
    }
}
