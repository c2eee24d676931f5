//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Nested collections (attempts,
//! shelter ids, per-leg SIDs) are stored as JSON text columns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calls::{CallAttempt, CallJob, CallRequest};
use crate::error::DatabaseError;
use crate::safety::EscalationEvent;
use crate::store::migrations;
use crate::store::traits::Database;
use crate::transfer::{LegCallSids, WarmTransferSession};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Fixed-width UTC text, so stored timestamps compare correctly as strings.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn parse_uuid(column: &str, raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn parse_enum<T: std::str::FromStr<Err = String>>(raw: &str) -> Result<T, DatabaseError> {
    raw.parse().map_err(DatabaseError::Serialization)
}

fn col(row: &libsql::Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("column {idx}: {e}")))
}

/// Integer column stored as 0/1.
fn flag(row: &libsql::Row, idx: i32) -> Result<bool, DatabaseError> {
    row.get::<i64>(idx)
        .map(|v| v != 0)
        .map_err(|e| DatabaseError::Query(format!("column {idx}: {e}")))
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

const JOB_COLUMNS: &str = "job_id, mode, status, created_at, updated_at, survivor_context, callback_number, anonymous_mode, escalation_approved, shelter_ids, attempts";

const TRANSFER_COLUMNS: &str = "transfer_id, mode, status, created_at, updated_at, conference_name, job_id, attempt_id, shelter_name, shelter_phone, survivor_phone, survivor_name, notes, call_sids";

const ESCALATION_COLUMNS: &str = "escalation_id, created_at, source, reference_id, reason, details";

/// Column order matches JOB_COLUMNS.
fn row_to_job(row: &libsql::Row) -> Result<CallJob, DatabaseError> {
    let job_id: String = col(row, 0)?;
    let mode: String = col(row, 1)?;
    let status: String = col(row, 2)?;
    let created: String = col(row, 3)?;
    let updated: String = col(row, 4)?;
    let shelter_ids: String = col(row, 9)?;
    let attempts: String = col(row, 10)?;

    Ok(CallJob {
        job_id: parse_uuid("job_id", &job_id)?,
        mode: parse_enum(&mode)?,
        status: parse_enum(&status)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
        request: CallRequest {
            survivor_context: col(row, 5)?,
            callback_number: row.get(6).ok(),
            anonymous_mode: flag(row, 7)?,
            escalation_approved: flag(row, 8)?,
            shelter_ids: from_json("shelter_ids", &shelter_ids)?,
        },
        attempts: from_json::<Vec<CallAttempt>>("attempts", &attempts)?,
    })
}

/// Column order matches TRANSFER_COLUMNS.
fn row_to_transfer(row: &libsql::Row) -> Result<WarmTransferSession, DatabaseError> {
    let transfer_id: String = col(row, 0)?;
    let mode: String = col(row, 1)?;
    let status: String = col(row, 2)?;
    let created: String = col(row, 3)?;
    let updated: String = col(row, 4)?;
    let job_id: String = col(row, 6)?;
    let attempt_id: String = col(row, 7)?;
    let call_sids: String = col(row, 13)?;

    Ok(WarmTransferSession {
        transfer_id: parse_uuid("transfer_id", &transfer_id)?,
        mode: parse_enum(&mode)?,
        status: parse_enum(&status)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
        conference_name: col(row, 5)?,
        job_id: parse_uuid("job_id", &job_id)?,
        attempt_id: parse_uuid("attempt_id", &attempt_id)?,
        shelter_name: col(row, 8)?,
        shelter_phone: col(row, 9)?,
        survivor_phone: col(row, 10)?,
        survivor_name: row.get(11).ok(),
        notes: row.get(12).ok(),
        call_sids: from_json::<LegCallSids>("call_sids", &call_sids)?,
    })
}

/// Column order matches ESCALATION_COLUMNS.
fn row_to_escalation(row: &libsql::Row) -> Result<EscalationEvent, DatabaseError> {
    let escalation_id: String = col(row, 0)?;
    let created: String = col(row, 1)?;
    let source: String = col(row, 2)?;

    Ok(EscalationEvent {
        escalation_id: parse_uuid("escalation_id", &escalation_id)?,
        created_at: parse_datetime(&created),
        source: parse_enum(&source)?,
        reference_id: col(row, 3)?,
        reason: col(row, 4)?,
        details: row.get(5).ok(),
    })
}

/// Drain rows through `map`, skipping (and logging) rows that fail to decode.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    kind: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(Some(row)) = rows.next().await {
        match map(&row) {
            Ok(item) => out.push(item),
            Err(e) => warn!("Skipping {kind} row: {e}"),
        }
    }
    out
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::init_schema(self.conn()).await
    }

    // ── Call jobs ───────────────────────────────────────────────────

    async fn upsert_call_job(&self, job: &CallJob) -> Result<(), DatabaseError> {
        let shelter_ids = to_json(&job.request.shelter_ids)?;
        let attempts = to_json(&job.attempts)?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO call_jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT (job_id) DO UPDATE SET
                        mode = excluded.mode,
                        status = excluded.status,
                        updated_at = excluded.updated_at,
                        survivor_context = excluded.survivor_context,
                        callback_number = excluded.callback_number,
                        anonymous_mode = excluded.anonymous_mode,
                        escalation_approved = excluded.escalation_approved,
                        shelter_ids = excluded.shelter_ids,
                        attempts = excluded.attempts
                     WHERE excluded.updated_at >= call_jobs.updated_at"
                ),
                params![
                    job.job_id.to_string(),
                    job.mode.to_string(),
                    job.status.to_string(),
                    timestamp(&job.created_at),
                    timestamp(&job.updated_at),
                    job.request.survivor_context.clone(),
                    opt_text(job.request.callback_number.as_deref()),
                    i64::from(job.request.anonymous_mode),
                    i64::from(job.request.escalation_approved),
                    shelter_ids,
                    attempts,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_call_job: {e}")))?;

        debug!(job_id = %job.job_id, status = %job.status, "Call job persisted");
        Ok(())
    }

    async fn load_call_jobs(&self, limit: usize) -> Result<Vec<CallJob>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM call_jobs ORDER BY updated_at DESC LIMIT ?1"),
                params![clamp_limit(limit)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_call_jobs: {e}")))?;
        Ok(collect_rows(rows, "call job", row_to_job).await)
    }

    // ── Warm transfers ──────────────────────────────────────────────

    async fn upsert_warm_transfer(&self, session: &WarmTransferSession) -> Result<(), DatabaseError> {
        let call_sids = to_json(&session.call_sids)?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO warm_transfers ({TRANSFER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                     ON CONFLICT (transfer_id) DO UPDATE SET
                        mode = excluded.mode,
                        status = excluded.status,
                        updated_at = excluded.updated_at,
                        conference_name = excluded.conference_name,
                        shelter_name = excluded.shelter_name,
                        shelter_phone = excluded.shelter_phone,
                        survivor_phone = excluded.survivor_phone,
                        survivor_name = excluded.survivor_name,
                        notes = excluded.notes,
                        call_sids = excluded.call_sids
                     WHERE excluded.updated_at >= warm_transfers.updated_at"
                ),
                params![
                    session.transfer_id.to_string(),
                    session.mode.to_string(),
                    session.status.to_string(),
                    timestamp(&session.created_at),
                    timestamp(&session.updated_at),
                    session.conference_name.clone(),
                    session.job_id.to_string(),
                    session.attempt_id.to_string(),
                    session.shelter_name.clone(),
                    session.shelter_phone.clone(),
                    session.survivor_phone.clone(),
                    opt_text(session.survivor_name.as_deref()),
                    opt_text(session.notes.as_deref()),
                    call_sids,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_warm_transfer: {e}")))?;

        debug!(transfer_id = %session.transfer_id, status = %session.status, "Warm transfer persisted");
        Ok(())
    }

    async fn load_warm_transfers(&self, limit: usize) -> Result<Vec<WarmTransferSession>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TRANSFER_COLUMNS} FROM warm_transfers ORDER BY updated_at DESC LIMIT ?1"
                ),
                params![clamp_limit(limit)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_warm_transfers: {e}")))?;
        Ok(collect_rows(rows, "warm transfer", row_to_transfer).await)
    }

    // ── Escalations ─────────────────────────────────────────────────

    async fn insert_escalation(&self, event: &EscalationEvent) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO escalation_events ({ESCALATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (escalation_id) DO NOTHING"
                ),
                params![
                    event.escalation_id.to_string(),
                    timestamp(&event.created_at),
                    event.source.to_string(),
                    event.reference_id.clone(),
                    event.reason.clone(),
                    opt_text(event.details.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_escalation: {e}")))?;
        Ok(())
    }

    async fn load_escalations(&self, limit: usize) -> Result<Vec<EscalationEvent>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ESCALATION_COLUMNS} FROM escalation_events ORDER BY created_at DESC LIMIT ?1"
                ),
                params![clamp_limit(limit)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_escalations: {e}")))?;
        Ok(collect_rows(rows, "escalation", row_to_escalation).await)
    }

    // ── Blocked numbers ─────────────────────────────────────────────

    async fn add_blocked_number(&self, phone: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO blocked_numbers (phone, created_at) VALUES (?1, ?2) ON CONFLICT (phone) DO NOTHING",
                params![phone, timestamp(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_blocked_number: {e}")))?;
        Ok(())
    }

    async fn remove_blocked_number(&self, phone: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM blocked_numbers WHERE phone = ?1", params![phone])
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_blocked_number: {e}")))?;
        Ok(())
    }

    async fn load_blocked_numbers(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT phone FROM blocked_numbers ORDER BY phone ASC", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load_blocked_numbers: {e}")))?;

        let mut numbers = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row.get::<String>(0) {
                Ok(phone) => numbers.push(phone),
                Err(e) => warn!("Skipping blocked number row: {e}"),
            }
        }
        Ok(numbers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::{
        AttemptPatch, CallAttemptStatus, CallJobStatus, CallMode, CallTarget, JobRegistry, NewCallJob,
    };
    use crate::safety::EscalationSource;
    use crate::transfer::{NewTransfer, TransferLeg, TransferRegistry, TransferStatus};

    fn target(id: i64) -> CallTarget {
        CallTarget {
            shelter_id: id,
            shelter_name: format!("Shelter {id}"),
            intake_phone: Some(format!("+1510555010{id}")),
            city: Some("Oakland".into()),
            state: Some("CA".into()),
        }
    }

    #[tokio::test]
    async fn call_job_round_trips_with_attempts() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let registry = JobRegistry::new();
        let job = registry.create_job(
            CallMode::Live,
            NewCallJob {
                survivor_context: "two adults".into(),
                callback_number: Some("+14155550199".into()),
                anonymous_mode: true,
                escalation_approved: false,
            },
            &[target(1), target(2)],
        );
        let attempt_id = job.attempts[0].attempt_id;
        registry.bind_provider_sid(job.job_id, attempt_id, "CA100");
        let job = registry
            .mark_attempt(job.job_id, attempt_id, AttemptPatch::status(CallAttemptStatus::Initiated))
            .unwrap();

        db.upsert_call_job(&job).await.unwrap();
        db.upsert_call_job(&job).await.unwrap();

        let loaded = db.load_call_jobs(10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].job_id, job.job_id);
        assert_eq!(loaded[0].status, job.status);
        assert_eq!(loaded[0].request, job.request);
        assert_eq!(loaded[0].attempts, job.attempts);
    }

    #[tokio::test]
    async fn older_job_snapshot_does_not_overwrite_newer() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let registry = JobRegistry::new();
        let job = registry.create_job(
            CallMode::DryRun,
            NewCallJob {
                survivor_context: "one adult".into(),
                callback_number: None,
                anonymous_mode: false,
                escalation_approved: false,
            },
            &[target(1)],
        );
        let attempt_id = job.attempts[0].attempt_id;
        let in_progress = registry
            .mark_attempt(job.job_id, attempt_id, AttemptPatch::status(CallAttemptStatus::Initiated))
            .unwrap();
        let mut completed = registry
            .mark_attempt(job.job_id, attempt_id, AttemptPatch::status(CallAttemptStatus::Completed))
            .unwrap();
        completed.updated_at = in_progress.updated_at + chrono::Duration::seconds(1);

        // Spawned writes may land in either order.
        db.upsert_call_job(&completed).await.unwrap();
        db.upsert_call_job(&in_progress).await.unwrap();

        let loaded = db.load_call_jobs(10).await.unwrap();
        assert_eq!(loaded[0].status, CallJobStatus::Completed);
        assert_eq!(loaded[0].attempts[0].status, CallAttemptStatus::Completed);

        // A same-timestamp write still applies.
        let mut retried = completed.clone();
        retried.request.survivor_context = "one adult, one child".into();
        db.upsert_call_job(&retried).await.unwrap();
        let loaded = db.load_call_jobs(10).await.unwrap();
        assert_eq!(loaded[0].request.survivor_context, "one adult, one child");
    }

    #[tokio::test]
    async fn older_transfer_snapshot_does_not_overwrite_newer() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let registry = TransferRegistry::new();
        let session = registry.create_session(
            CallMode::DryRun,
            NewTransfer {
                job_id: Uuid::new_v4(),
                attempt_id: Uuid::new_v4(),
                shelter_name: "Harbor House".into(),
                shelter_phone: "+15105550100".into(),
                survivor_phone: "+14155550199".into(),
                survivor_name: None,
                notes: None,
            },
        );
        let connecting = registry
            .set_status(session.transfer_id, TransferStatus::Connecting)
            .unwrap();
        let mut bridged = registry
            .set_status(session.transfer_id, TransferStatus::Bridged)
            .unwrap();
        bridged.updated_at = connecting.updated_at + chrono::Duration::seconds(1);

        db.upsert_warm_transfer(&bridged).await.unwrap();
        db.upsert_warm_transfer(&connecting).await.unwrap();

        let loaded = db.load_warm_transfers(10).await.unwrap();
        assert_eq!(loaded[0].status, TransferStatus::Bridged);
    }

    #[test]
    fn timestamps_sort_as_text() {
        let whole = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let fractional = whole + chrono::Duration::milliseconds(250);
        assert!(timestamp(&whole) < timestamp(&fractional));
        assert_eq!(timestamp(&whole), "2026-01-01T10:00:00.000000Z");
        assert_eq!(parse_datetime(&timestamp(&fractional)), fractional);
    }

    #[tokio::test]
    async fn warm_transfer_round_trips_leg_sids() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let registry = TransferRegistry::new();
        let session = registry.create_session(
            CallMode::DryRun,
            NewTransfer {
                job_id: Uuid::new_v4(),
                attempt_id: Uuid::new_v4(),
                shelter_name: "Harbor House".into(),
                shelter_phone: "+15105550100".into(),
                survivor_phone: "+14155550199".into(),
                survivor_name: Some("J".into()),
                notes: None,
            },
        );
        registry.bind_call_sid(session.transfer_id, TransferLeg::Survivor, "DRYCA1");
        let session = registry
            .set_status(session.transfer_id, TransferStatus::Connecting)
            .unwrap();

        db.upsert_warm_transfer(&session).await.unwrap();
        let loaded = db.load_warm_transfers(10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, TransferStatus::Connecting);
        assert_eq!(loaded[0].call_sids.survivor.as_deref(), Some("DRYCA1"));
        assert_eq!(loaded[0].conference_name, session.conference_name);
        assert!(loaded[0].notes.is_none());
    }

    #[tokio::test]
    async fn escalations_newest_first_and_deduped() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let mut older = EscalationEvent::new(EscalationSource::CallJob, "j1", "older", None);
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = EscalationEvent::new(
            EscalationSource::Transcript,
            "a1",
            "newer",
            Some("details".into()),
        );

        db.insert_escalation(&older).await.unwrap();
        db.insert_escalation(&newer).await.unwrap();
        db.insert_escalation(&newer).await.unwrap();

        let loaded = db.load_escalations(10).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].escalation_id, newer.escalation_id);
        assert_eq!(loaded[0].details.as_deref(), Some("details"));
        assert_eq!(loaded[1].source, EscalationSource::CallJob);
        assert_eq!(db.load_escalations(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blocked_numbers_add_remove() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.add_blocked_number("+14155550000").await.unwrap();
        db.add_blocked_number("+12125550100").await.unwrap();
        db.add_blocked_number("+12125550100").await.unwrap();
        assert_eq!(
            db.load_blocked_numbers().await.unwrap(),
            vec!["+12125550100", "+14155550000"]
        );

        db.remove_blocked_number("+12125550100").await.unwrap();
        assert_eq!(db.load_blocked_numbers().await.unwrap(), vec!["+14155550000"]);
    }

    #[tokio::test]
    async fn file_backed_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outreach.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.add_blocked_number("+14155550000").await.unwrap();
        }
        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(reopened.load_blocked_numbers().await.unwrap(), vec!["+14155550000"]);
    }
}
