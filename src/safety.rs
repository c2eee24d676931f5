//! Safety gate: blocked destinations, risk classification, escalation log,
//! and the live-action policy decision.
//!
//! Every mutation here is a short synchronous critical section. Nothing in
//! this module awaits while holding a lock.

use std::collections::BTreeSet;
use std::sync::{LazyLock, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SafetyConfig;
use crate::error::SafetyError;

/// Maximum number of escalation events retained in memory.
pub const MAX_ESCALATIONS: usize = 1000;

/// Default page size for `list_escalations`.
pub const DEFAULT_ESCALATION_LIMIT: usize = 100;

/// High-severity phrases. Any match means `High`; false positives are acceptable.
pub const RISK_KEYWORDS: &[&str] = &[
    "immediate danger",
    "weapon",
    "homicide",
    "suicide",
    "life threatening",
    "child in danger",
    "trafficking",
];

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("email pattern compiles")
});

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("phone pattern compiles"));

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2,}\b").expect("number pattern compiles"));

/// Canonicalize a phone number. Best effort, not validation.
///
/// Keeps digits and a leading `+`. Ten bare digits are assumed domestic (`+1`);
/// any other bare digit string gets a `+` prefix. Returns `None` when no digits
/// remain. Idempotent.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if has_plus {
        Some(format!("+{digits}"))
    } else if digits.len() == 10 {
        Some(format!("+1{digits}"))
    } else {
        Some(format!("+{digits}"))
    }
}

/// Replace emails, then phone-like runs, then bare multi-digit runs.
///
/// Order matters: phone redaction must run before generic digits.
pub fn redact_for_anonymous_mode(text: &str) -> String {
    let redacted = EMAIL_PATTERN.replace_all(text, "[REDACTED_EMAIL]");
    let redacted = PHONE_PATTERN.replace_all(&redacted, "[REDACTED_PHONE]");
    NUMBER_PATTERN
        .replace_all(&redacted, "[REDACTED_NUMBER]")
        .into_owned()
}

/// Risk level of free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    High,
}

/// Transient result of `assess_risk`. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub matched_keywords: Vec<String>,
    pub summary: String,
}

impl RiskAssessment {
    pub fn is_high(&self) -> bool {
        self.level == RiskLevel::High
    }
}

/// Classify text against [`RISK_KEYWORDS`] (case-insensitive substring match).
pub fn assess_risk(text: &str) -> RiskAssessment {
    let lower = text.to_lowercase();
    let matched: Vec<String> = RISK_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .map(|k| k.to_string())
        .collect();

    if matched.is_empty() {
        RiskAssessment {
            level: RiskLevel::Low,
            matched_keywords: matched,
            summary: "No high-risk terms detected.".to_string(),
        }
    } else {
        RiskAssessment {
            level: RiskLevel::High,
            matched_keywords: matched,
            summary: "High-risk language detected. Human escalation recommended.".to_string(),
        }
    }
}

/// What produced an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationSource {
    CallJob,
    WarmTransfer,
    Transcript,
}

impl std::fmt::Display for EscalationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CallJob => write!(f, "call_job"),
            Self::WarmTransfer => write!(f, "warm_transfer"),
            Self::Transcript => write!(f, "transcript"),
        }
    }
}

impl std::str::FromStr for EscalationSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call_job" => Ok(Self::CallJob),
            "warm_transfer" => Ok(Self::WarmTransfer),
            "transcript" => Ok(Self::Transcript),
            _ => Err(format!("Unknown escalation source: {s}")),
        }
    }
}

/// A logged event saying a human must review or approve something.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub escalation_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub source: EscalationSource,
    pub reference_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl EscalationEvent {
    pub fn new(
        source: EscalationSource,
        reference_id: impl Into<String>,
        reason: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            escalation_id: Uuid::new_v4(),
            created_at: Utc::now(),
            source,
            reference_id: reference_id.into(),
            reason: reason.into(),
            details,
        }
    }
}

/// Outcome of a blocked-set mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedNumberUpdate {
    /// Whether membership actually changed.
    pub changed: bool,
    /// Canonical form, `None` if the input had no digits.
    pub normalized: Option<String>,
}

/// Read-only view of the active policy.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyPolicySummary {
    pub require_escalation_for_live: bool,
    pub blocked_numbers_count: usize,
    pub risk_keywords: Vec<String>,
}

/// Blocked-number registry, risk classifier, and escalation log.
pub struct SafetyGate {
    require_escalation_for_live: bool,
    blocked: RwLock<BTreeSet<String>>,
    escalations: RwLock<Vec<EscalationEvent>>,
}

impl SafetyGate {
    /// Create a gate from policy settings; configured numbers are normalized.
    pub fn new(config: &SafetyConfig) -> Self {
        let blocked: BTreeSet<String> = config
            .blocked_numbers
            .iter()
            .filter_map(|raw| normalize_phone(raw))
            .collect();
        info!(
            blocked = blocked.len(),
            require_escalation_for_live = config.require_escalation_for_live,
            "Safety gate initialized"
        );
        Self {
            require_escalation_for_live: config.require_escalation_for_live,
            blocked: RwLock::new(blocked),
            escalations: RwLock::new(Vec::new()),
        }
    }

    pub fn normalize_phone(&self, raw: &str) -> Option<String> {
        normalize_phone(raw)
    }

    /// Normalize then test membership. Unnormalizable input is not blocked.
    pub fn is_blocked_number(&self, raw: &str) -> bool {
        match normalize_phone(raw) {
            Some(normalized) => self
                .blocked
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&normalized),
            None => false,
        }
    }

    /// Sorted canonical blocked numbers.
    pub fn list_blocked_numbers(&self) -> Vec<String> {
        self.blocked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn add_blocked_number(&self, raw: &str) -> BlockedNumberUpdate {
        let Some(normalized) = normalize_phone(raw) else {
            return BlockedNumberUpdate {
                changed: false,
                normalized: None,
            };
        };
        let changed = self
            .blocked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalized.clone());
        if changed {
            info!(number = %normalized, "Number blocked");
        }
        BlockedNumberUpdate {
            changed,
            normalized: Some(normalized),
        }
    }

    pub fn remove_blocked_number(&self, raw: &str) -> BlockedNumberUpdate {
        let Some(normalized) = normalize_phone(raw) else {
            return BlockedNumberUpdate {
                changed: false,
                normalized: None,
            };
        };
        let changed = self
            .blocked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&normalized);
        if changed {
            info!(number = %normalized, "Number unblocked");
        }
        BlockedNumberUpdate {
            changed,
            normalized: Some(normalized),
        }
    }

    pub fn assess_risk(&self, text: &str) -> RiskAssessment {
        assess_risk(text)
    }

    /// True only when policy requires escalation, risk is high, and no approval was given.
    pub fn should_block_live_action(&self, risk: &RiskAssessment, escalation_approved: bool) -> bool {
        self.require_escalation_for_live && risk.is_high() && !escalation_approved
    }

    /// Gate a live action on `risk`.
    ///
    /// High risk always records an escalation. The returned error carries that
    /// escalation's id when the action is denied.
    pub fn gate_live_action(
        &self,
        risk: &RiskAssessment,
        escalation_approved: bool,
        live: bool,
        source: EscalationSource,
        reference_id: &str,
    ) -> Result<Option<EscalationEvent>, SafetyError> {
        if !risk.is_high() {
            return Ok(None);
        }
        let blocked = live && self.should_block_live_action(risk, escalation_approved);
        let reason = if blocked {
            "High-risk content; live action blocked pending human approval"
        } else {
            "High-risk content detected"
        };
        let event = self.record_escalation(EscalationEvent::new(
            source,
            reference_id,
            reason,
            Some(format!("matched: {}", risk.matched_keywords.join(", "))),
        ));
        if blocked {
            warn!(
                reference_id = reference_id,
                escalation_id = %event.escalation_id,
                "Live action blocked by safety policy"
            );
            return Err(SafetyError::EscalationRequired {
                escalation_id: event.escalation_id,
                matched_keywords: risk.matched_keywords.clone(),
            });
        }
        Ok(Some(event))
    }

    pub fn redact_for_anonymous_mode(&self, text: &str) -> String {
        redact_for_anonymous_mode(text)
    }

    /// Prepend an event to the log and return it.
    pub fn record_escalation(&self, event: EscalationEvent) -> EscalationEvent {
        let mut log = self.escalations.write().unwrap_or_else(PoisonError::into_inner);
        log.insert(0, event.clone());
        log.truncate(MAX_ESCALATIONS);
        info!(
            escalation_id = %event.escalation_id,
            source = %event.source,
            reference_id = %event.reference_id,
            reason = %event.reason,
            "Escalation recorded"
        );
        event
    }

    /// Most recent first.
    pub fn list_escalations(&self, limit: usize) -> Vec<EscalationEvent> {
        self.escalations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Merge persisted history into the log, newest first, capped.
    pub fn seed_escalations(&self, events: Vec<EscalationEvent>) {
        let mut log = self.escalations.write().unwrap_or_else(PoisonError::into_inner);
        let mut merged: Vec<EscalationEvent> = events;
        merged.append(&mut log);
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut seen = std::collections::HashSet::new();
        merged.retain(|e| seen.insert(e.escalation_id));
        merged.truncate(MAX_ESCALATIONS);
        debug!(count = merged.len(), "Escalations seeded");
        *log = merged;
    }

    pub fn config(&self) -> SafetyPolicySummary {
        SafetyPolicySummary {
            require_escalation_for_live: self.require_escalation_for_live,
            blocked_numbers_count: self.blocked.read().unwrap_or_else(PoisonError::into_inner).len(),
            risk_keywords: RISK_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new(&SafetyConfig::default())
    }
}
