//! Call job data model: jobs, per-target attempts, statuses, patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Simulated vs. real execution of telephony actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    DryRun,
    Live,
}

impl CallMode {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl Default for CallMode {
    fn default() -> Self {
        Self::DryRun
    }
}

impl std::fmt::Display for CallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DryRun => write!(f, "dry_run"),
            Self::Live => write!(f, "live"),
        }
    }
}

impl std::str::FromStr for CallMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dry_run" => Ok(Self::DryRun),
            "live" => Ok(Self::Live),
            _ => Err(format!("Unknown call mode: {s}")),
        }
    }
}

/// Status of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAttemptStatus {
    Queued,
    Initiated,
    Completed,
    Failed,
}

impl CallAttemptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for CallAttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Initiated => "initiated",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Aggregate status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallJobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for CallJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CallJobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown job status: {s}")),
        }
    }
}

/// Aggregate attempt statuses into a job status.
///
/// Completed if all completed; else in progress if any initiated; else failed
/// if any failed and none queued; else queued. Progress dominates failure while
/// work is outstanding.
pub fn aggregate_status<I>(statuses: I) -> CallJobStatus
where
    I: IntoIterator<Item = CallAttemptStatus>,
{
    let mut all_completed = true;
    let mut any_initiated = false;
    let mut any_failed = false;
    let mut any_queued = false;
    for status in statuses {
        match status {
            CallAttemptStatus::Completed => {}
            CallAttemptStatus::Initiated => {
                all_completed = false;
                any_initiated = true;
            }
            CallAttemptStatus::Failed => {
                all_completed = false;
                any_failed = true;
            }
            CallAttemptStatus::Queued => {
                all_completed = false;
                any_queued = true;
            }
        }
    }

    if all_completed {
        CallJobStatus::Completed
    } else if any_initiated {
        CallJobStatus::InProgress
    } else if any_failed && !any_queued {
        CallJobStatus::Failed
    } else {
        CallJobStatus::Queued
    }
}

/// Where a generated script came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSource {
    Ai,
    Fallback,
}

/// Shelter availability as interpreted from a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Waitlist,
    Unknown,
}

/// Structured outcome extracted from a call transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTranscript {
    pub availability_status: Availability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_available_beds: Option<u32>,
    #[serde(default)]
    pub intake_requirements: Vec<String>,
    #[serde(default)]
    pub needs_human_followup: bool,
    pub summary: String,
}

/// A shelter to dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTarget {
    pub shelter_id: i64,
    pub shelter_name: String,
    /// `None` means the shelter cannot be dialed.
    #[serde(default)]
    pub intake_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Immutable snapshot of what was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub survivor_context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_number: Option<String>,
    #[serde(default)]
    pub anonymous_mode: bool,
    #[serde(default)]
    pub escalation_approved: bool,
    pub shelter_ids: Vec<i64>,
}

/// Unit of work and state for one target within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAttempt {
    pub attempt_id: Uuid,
    pub job_id: Uuid,
    pub shelter_id: i64,
    pub shelter_name: String,
    pub to_phone: Option<String>,
    pub status: CallAttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_call_sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_source: Option<ScriptSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_transcript: Option<ParsedTranscript>,
    pub updated_at: DateTime<Utc>,
}

impl CallAttempt {
    fn queued(job_id: Uuid, target: &CallTarget, now: DateTime<Utc>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            job_id,
            shelter_id: target.shelter_id,
            shelter_name: target.shelter_name.clone(),
            to_phone: target.intake_phone.clone(),
            status: CallAttemptStatus::Queued,
            provider_call_sid: None,
            generated_script: None,
            script_source: None,
            recording_url: None,
            error: None,
            transcript_excerpt: None,
            parsed_transcript: None,
            updated_at: now,
        }
    }

    /// Merge the set fields of `patch` and stamp `updated_at`.
    pub fn apply(&mut self, patch: AttemptPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(sid) = patch.provider_call_sid {
            self.provider_call_sid = Some(sid);
        }
        if let Some(script) = patch.generated_script {
            self.generated_script = Some(script);
        }
        if let Some(source) = patch.script_source {
            self.script_source = Some(source);
        }
        if let Some(url) = patch.recording_url {
            self.recording_url = Some(url);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(excerpt) = patch.transcript_excerpt {
            self.transcript_excerpt = Some(excerpt);
        }
        if let Some(parsed) = patch.parsed_transcript {
            self.parsed_transcript = Some(parsed);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update for an attempt. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptPatch {
    pub status: Option<CallAttemptStatus>,
    pub provider_call_sid: Option<String>,
    pub generated_script: Option<String>,
    pub script_source: Option<ScriptSource>,
    pub recording_url: Option<String>,
    pub error: Option<String>,
    pub transcript_excerpt: Option<String>,
    pub parsed_transcript: Option<ParsedTranscript>,
}

impl AttemptPatch {
    pub fn status(status: CallAttemptStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// `failed` with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(CallAttemptStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_script(mut self, script: impl Into<String>, source: ScriptSource) -> Self {
        self.generated_script = Some(script.into());
        self.script_source = Some(source);
        self
    }

    pub fn with_recording_url(mut self, url: impl Into<String>) -> Self {
        self.recording_url = Some(url.into());
        self
    }
}

/// One coordinated outreach request over a fixed list of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallJob {
    pub job_id: Uuid,
    pub mode: CallMode,
    pub status: CallJobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub request: CallRequest,
    pub attempts: Vec<CallAttempt>,
}

/// Input for a new job, minus the target list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCallJob {
    pub survivor_context: String,
    pub callback_number: Option<String>,
    pub anonymous_mode: bool,
    pub escalation_approved: bool,
}

impl CallJob {
    /// Build a queued job with one queued attempt per target.
    pub fn new(mode: CallMode, input: NewCallJob, targets: &[CallTarget]) -> Self {
        let now = Utc::now();
        let job_id = Uuid::new_v4();
        let attempts = targets
            .iter()
            .map(|t| CallAttempt::queued(job_id, t, now))
            .collect();
        Self {
            job_id,
            mode,
            status: CallJobStatus::Queued,
            created_at: now,
            updated_at: now,
            request: CallRequest {
                survivor_context: input.survivor_context,
                callback_number: input.callback_number,
                anonymous_mode: input.anonymous_mode,
                escalation_approved: input.escalation_approved,
                shelter_ids: targets.iter().map(|t| t.shelter_id).collect(),
            },
            attempts,
        }
    }

    pub fn attempt(&self, attempt_id: Uuid) -> Option<&CallAttempt> {
        self.attempts.iter().find(|a| a.attempt_id == attempt_id)
    }

    pub fn attempt_mut(&mut self, attempt_id: Uuid) -> Option<&mut CallAttempt> {
        self.attempts.iter_mut().find(|a| a.attempt_id == attempt_id)
    }

    /// Recompute `status` from attempts and stamp `updated_at`.
    pub fn recompute_status(&mut self) {
        self.status = aggregate_status(self.attempts.iter().map(|a| a.status));
        self.updated_at = Utc::now();
    }
}
