//! Inputs and outcomes of orchestrator operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calls::{CallMode, CallTarget};

/// Request to dial a set of shelters on behalf of one survivor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCallJob {
    #[serde(default)]
    pub mode: CallMode,
    pub survivor_context: String,
    #[serde(default)]
    pub callback_number: Option<String>,
    #[serde(default)]
    pub anonymous_mode: bool,
    #[serde(default)]
    pub escalation_approved: bool,
    pub targets: Vec<CallTarget>,
}

/// Request to bridge the survivor with the shelter reached by one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWarmTransfer {
    #[serde(default)]
    pub mode: CallMode,
    pub job_id: Uuid,
    pub attempt_id: Uuid,
    pub survivor_phone: String,
    #[serde(default)]
    pub survivor_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub escalation_approved: bool,
}

/// Provider status event for any placed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub call_sid: String,
    pub call_status: String,
    pub recording_url: Option<String>,
}

/// Whether a webhook changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Ignored => "ignored",
        }
    }
}

/// Counts restored from persistence at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RehydrateSummary {
    pub jobs: usize,
    pub transfers: usize,
    pub escalations: usize,
    pub blocked_numbers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_call_job_defaults() {
        let req: StartCallJob = serde_json::from_str(
            r#"{"survivor_context":"one adult","targets":[{"shelter_id":1,"shelter_name":"Harbor House"}]}"#,
        )
        .unwrap();
        assert_eq!(req.mode, CallMode::DryRun);
        assert!(!req.anonymous_mode);
        assert!(!req.escalation_approved);
        assert_eq!(req.targets[0].intake_phone, None);
    }
}
