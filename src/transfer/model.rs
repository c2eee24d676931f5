//! Warm transfer data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calls::CallMode;

/// Prefix for derived conference room names.
pub const CONFERENCE_PREFIX: &str = "outreach-transfer-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Queued,
    Connecting,
    Bridged,
    Completed,
    Failed,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Connecting => "connecting",
            Self::Bridged => "bridged",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "connecting" => Ok(Self::Connecting),
            "bridged" => Ok(Self::Bridged),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown transfer status: {s}")),
        }
    }
}

/// One of the two parties in a warm transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferLeg {
    Survivor,
    Shelter,
}

impl std::fmt::Display for TransferLeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Survivor => write!(f, "survivor"),
            Self::Shelter => write!(f, "shelter"),
        }
    }
}

/// Provider call SIDs per leg, filled independently as each leg is dialed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegCallSids {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survivor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shelter: Option<String>,
}

impl LegCallSids {
    pub fn get(&self, leg: TransferLeg) -> Option<&str> {
        match leg {
            TransferLeg::Survivor => self.survivor.as_deref(),
            TransferLeg::Shelter => self.shelter.as_deref(),
        }
    }

    pub fn slot_mut(&mut self, leg: TransferLeg) -> &mut Option<String> {
        match leg {
            TransferLeg::Survivor => &mut self.survivor,
            TransferLeg::Shelter => &mut self.shelter,
        }
    }
}

/// A live bridge between the requester and a shelter via a shared conference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmTransferSession {
    pub transfer_id: Uuid,
    pub mode: CallMode,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub conference_name: String,
    pub job_id: Uuid,
    pub attempt_id: Uuid,
    pub shelter_name: String,
    pub shelter_phone: String,
    pub survivor_phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survivor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub call_sids: LegCallSids,
}

/// Input for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub job_id: Uuid,
    pub attempt_id: Uuid,
    pub shelter_name: String,
    pub shelter_phone: String,
    pub survivor_phone: String,
    pub survivor_name: Option<String>,
    pub notes: Option<String>,
}

/// Conference room name for a transfer; stable and unique per id.
pub fn conference_name(transfer_id: Uuid) -> String {
    format!("{CONFERENCE_PREFIX}{}", transfer_id.simple())
}

impl WarmTransferSession {
    pub fn new(mode: CallMode, input: NewTransfer) -> Self {
        let now = Utc::now();
        let transfer_id = Uuid::new_v4();
        Self {
            transfer_id,
            mode,
            status: TransferStatus::Queued,
            created_at: now,
            updated_at: now,
            conference_name: conference_name(transfer_id),
            job_id: input.job_id,
            attempt_id: input.attempt_id,
            shelter_name: input.shelter_name,
            shelter_phone: input.shelter_phone,
            survivor_phone: input.survivor_phone,
            survivor_name: input.survivor_name,
            notes: input.notes,
            call_sids: LegCallSids::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conference_name_is_derived_from_id() {
        let id = Uuid::new_v4();
        assert_eq!(conference_name(id), conference_name(id));
        assert_ne!(conference_name(id), conference_name(Uuid::new_v4()));
        assert!(conference_name(id).starts_with(CONFERENCE_PREFIX));
    }

    #[test]
    fn leg_sids_serialize_by_leg_name() {
        let mut sids = LegCallSids::default();
        *sids.slot_mut(TransferLeg::Shelter) = Some("CA2".into());
        let json = serde_json::to_value(&sids).unwrap();
        assert_eq!(json, serde_json::json!({ "shelter": "CA2" }));
        assert_eq!(sids.get(TransferLeg::Survivor), None);
    }
}
