//! Error types for the outreach service.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Telephony error: {0}")]
    Telephony(#[from] TelephonyError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Safety error: {0}")]
    Safety(#[from] SafetyError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Live telephony is not configured: {hint}")]
    LiveTelephonyUnavailable { hint: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the telephony provider (call placement, SMS).
#[derive(Debug, thiserror::Error)]
pub enum TelephonyError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rejected the request ({status}): {body}")]
    Rejected {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// LLM provider errors. These never escape the scripting boundary.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Policy denials. Always distinct from transport failures.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("Destination number is blocked: {number}")]
    BlockedDestination { number: String },

    #[error("Callback number is blocked: {number}")]
    BlockedCallback { number: String },

    #[error("High-risk content requires approved escalation before live action (escalation {escalation_id})")]
    EscalationRequired {
        escalation_id: Uuid,
        matched_keywords: Vec<String>,
    },
}

impl SafetyError {
    /// Escalation event paired with this denial, if risk-based.
    pub fn escalation_id(&self) -> Option<Uuid> {
        match self {
            Self::EscalationRequired { escalation_id, .. } => Some(*escalation_id),
            _ => None,
        }
    }
}

/// Orchestration errors surfaced to request callers.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Call job {id} not found")]
    JobNotFound { id: Uuid },

    #[error("Attempt {attempt_id} not found in job {job_id}")]
    AttemptNotFound { job_id: Uuid, attempt_id: Uuid },

    #[error("Policy denied: {0}")]
    PolicyDenied(#[from] SafetyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
