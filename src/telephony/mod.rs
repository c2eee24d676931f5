//! Telephony transport: placing calls and sending SMS.
//!
//! The orchestrator only sees the [`Telephony`] trait. `TwilioTelephony`
//! talks to the real provider; `DryRunTelephony` returns synthetic SIDs so
//! dry-run jobs follow the same webhook-driven lifecycle.

pub mod dry_run;
pub mod twilio;
pub mod twiml;

pub use dry_run::DryRunTelephony;
pub use twilio::TwilioTelephony;

use async_trait::async_trait;

use crate::calls::CallAttemptStatus;
use crate::error::TelephonyError;
use crate::transfer::TransferStatus;

/// Parameters for one outbound call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceCallRequest {
    pub to: String,
    /// Inline TwiML the provider executes when the call connects.
    pub twiml: String,
    pub status_callback_url: Option<String>,
    pub record: bool,
    pub recording_callback_url: Option<String>,
}

/// Outbound telephony primitives.
#[async_trait]
pub trait Telephony: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Place a call and return the provider call SID.
    async fn place_call(&self, request: PlaceCallRequest) -> Result<String, TelephonyError>;

    /// Send an SMS and return the provider message SID.
    async fn send_message(&self, to: &str, body: &str) -> Result<String, TelephonyError>;
}

/// Map a provider `CallStatus` to an attempt status.
///
/// Unrecognized values map to `None` and leave the attempt untouched.
pub fn map_attempt_status(provider_status: &str) -> Option<CallAttemptStatus> {
    match provider_status.trim().to_ascii_lowercase().as_str() {
        "queued" | "initiated" | "ringing" | "in-progress" | "answered" => {
            Some(CallAttemptStatus::Initiated)
        }
        "completed" => Some(CallAttemptStatus::Completed),
        "busy" | "failed" | "no-answer" | "canceled" => Some(CallAttemptStatus::Failed),
        _ => None,
    }
}

/// Map a provider `CallStatus` on one transfer leg to a session status.
pub fn map_transfer_status(provider_status: &str) -> Option<TransferStatus> {
    match provider_status.trim().to_ascii_lowercase().as_str() {
        "answered" | "in-progress" => Some(TransferStatus::Bridged),
        "completed" => Some(TransferStatus::Completed),
        "busy" | "failed" | "no-answer" | "canceled" => Some(TransferStatus::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_status_mapping() {
        for s in ["queued", "initiated", "ringing", "in-progress", "answered"] {
            assert_eq!(map_attempt_status(s), Some(CallAttemptStatus::Initiated), "{s}");
        }
        assert_eq!(map_attempt_status("completed"), Some(CallAttemptStatus::Completed));
        for s in ["busy", "failed", "no-answer", "canceled"] {
            assert_eq!(map_attempt_status(s), Some(CallAttemptStatus::Failed), "{s}");
        }
        assert_eq!(map_attempt_status("Completed"), Some(CallAttemptStatus::Completed));
        assert_eq!(map_attempt_status("something-new"), None);
    }

    #[test]
    fn transfer_status_mapping() {
        assert_eq!(map_transfer_status("answered"), Some(TransferStatus::Bridged));
        assert_eq!(map_transfer_status("in-progress"), Some(TransferStatus::Bridged));
        assert_eq!(map_transfer_status("completed"), Some(TransferStatus::Completed));
        assert_eq!(map_transfer_status("no-answer"), Some(TransferStatus::Failed));
        assert_eq!(map_transfer_status("ringing"), None);
        assert_eq!(map_transfer_status("initiated"), None);
    }
}
