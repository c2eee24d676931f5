//! Transport that never leaves the process.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{PlaceCallRequest, Telephony};
use crate::error::TelephonyError;

/// Prefix of every synthetic SID.
pub const DRY_RUN_SID_PREFIX: &str = "DRY";

/// Returns synthetic SIDs and records nothing externally.
#[derive(Debug, Default)]
pub struct DryRunTelephony {
    calls: AtomicU64,
    messages: AtomicU64,
}

impl DryRunTelephony {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls_placed(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    fn synthetic_sid(kind: &str) -> String {
        format!("{DRY_RUN_SID_PREFIX}{kind}{}", Uuid::new_v4().simple())
    }
}

#[async_trait]
impl Telephony for DryRunTelephony {
    fn name(&self) -> &str {
        "dry_run"
    }

    async fn place_call(&self, request: PlaceCallRequest) -> Result<String, TelephonyError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let sid = Self::synthetic_sid("CA");
        info!(to = %request.to, sid = %sid, "Dry-run call simulated");
        Ok(sid)
    }

    async fn send_message(&self, to: &str, _body: &str) -> Result<String, TelephonyError> {
        self.messages.fetch_add(1, Ordering::Relaxed);
        let sid = Self::synthetic_sid("SM");
        info!(to = %to, sid = %sid, "Dry-run message simulated");
        Ok(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_sids_are_unique() {
        let transport = DryRunTelephony::new();
        let a = transport
            .place_call(PlaceCallRequest {
                to: "+15105550100".into(),
                ..PlaceCallRequest::default()
            })
            .await
            .unwrap();
        let b = transport
            .place_call(PlaceCallRequest::default())
            .await
            .unwrap();
        assert!(a.starts_with("DRYCA"));
        assert_ne!(a, b);
        assert_eq!(transport.calls_placed(), 2);

        let sms = transport.send_message("+15105550100", "hi").await.unwrap();
        assert!(sms.starts_with("DRYSM"));
        assert_eq!(transport.messages_sent(), 1);
    }
}
