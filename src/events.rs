//! Event bus: in-process fan-out of job, transfer, and escalation updates to
//! WebSocket clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::calls::CallJob;
use crate::safety::EscalationEvent;
use crate::transfer::WarmTransferSession;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Messages sent over WebSocket (server → client).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutreachEvent {
    /// Full state (sent on connect and after a lagged receiver).
    Snapshot {
        jobs: Vec<CallJob>,
        transfers: Vec<WarmTransferSession>,
        escalations: Vec<EscalationEvent>,
    },
    JobUpdated { job: CallJob },
    TransferUpdated { transfer: WarmTransferSession },
    EscalationRecorded { escalation: EscalationEvent },
}

pub struct EventBus {
    tx: broadcast::Sender<OutreachEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutreachEvent> {
        self.tx.subscribe()
    }

    /// Ok if no receivers are listening.
    pub fn publish(&self, event: OutreachEvent) {
        let _ = self.tx.send(event);
    }

    pub fn job_updated(&self, job: &CallJob) {
        self.publish(OutreachEvent::JobUpdated { job: job.clone() });
    }

    pub fn transfer_updated(&self, transfer: &WarmTransferSession) {
        self.publish(OutreachEvent::TransferUpdated {
            transfer: transfer.clone(),
        });
    }

    pub fn escalation_recorded(&self, escalation: &EscalationEvent) {
        self.publish(OutreachEvent::EscalationRecorded {
            escalation: escalation.clone(),
        });
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::EscalationSource;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let event = EscalationEvent::new(EscalationSource::Transcript, "a1", "follow-up", None);
        bus.escalation_recorded(&event);

        match rx.recv().await.unwrap() {
            OutreachEvent::EscalationRecorded { escalation } => {
                assert_eq!(escalation.escalation_id, event.escalation_id)
            }
            other => panic!("Expected EscalationRecorded, got {other:?}"),
        }
    }

    #[test]
    fn publish_without_receivers_is_fine() {
        let bus = EventBus::new();
        assert_eq!(bus.receiver_count(), 0);
        bus.publish(OutreachEvent::Snapshot {
            jobs: vec![],
            transfers: vec![],
            escalations: vec![],
        });
    }

    #[test]
    fn events_are_tagged_snake_case() {
        let json = serde_json::to_string(&OutreachEvent::Snapshot {
            jobs: vec![],
            transfers: vec![],
            escalations: vec![],
        })
        .unwrap();
        assert!(json.contains("\"type\":\"snapshot\""));
    }
}
