//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `init_schema()` checks the
//! current version in `_migrations` and applies only the new ones in order.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS call_jobs (
                job_id TEXT PRIMARY KEY,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                survivor_context TEXT NOT NULL,
                callback_number TEXT,
                anonymous_mode INTEGER NOT NULL DEFAULT 0,
                escalation_approved INTEGER NOT NULL DEFAULT 0,
                shelter_ids TEXT NOT NULL DEFAULT '[]',
                attempts TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS warm_transfers (
                transfer_id TEXT PRIMARY KEY,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                conference_name TEXT NOT NULL,
                job_id TEXT NOT NULL,
                attempt_id TEXT NOT NULL,
                shelter_name TEXT NOT NULL,
                shelter_phone TEXT NOT NULL,
                survivor_phone TEXT NOT NULL,
                survivor_name TEXT,
                notes TEXT,
                call_sids TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS escalation_events (
                escalation_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                source TEXT NOT NULL,
                reference_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                details TEXT
            );

            CREATE TABLE IF NOT EXISTS blocked_numbers (
                phone TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
    },
    Migration {
        version: 2,
        name: "recency_indexes",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_call_jobs_updated_at ON call_jobs(updated_at DESC);
            CREATE INDEX IF NOT EXISTS idx_warm_transfers_updated_at ON warm_transfers(updated_at DESC);
            CREATE INDEX IF NOT EXISTS idx_escalation_events_created_at ON escalation_events(created_at DESC);
        "#,
    },
];

/// Create the `_migrations` table if needed and apply pending migrations.
pub async fn init_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_run_on_a_spawned_task() {
        // `tokio::spawn` needs the migration future to be `Send`.
        let handle = tokio::spawn(async move {
            let conn = test_conn().await;
            init_schema(&conn).await
        });
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        init_schema(&conn).await.unwrap();

        for table in &[
            "call_jobs",
            "warm_transfers",
            "escalation_events",
            "blocked_numbers",
            "_migrations",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        init_schema(&conn).await.unwrap();
        init_schema(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        init_schema(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row1 = rows.next().await.unwrap().unwrap();
        let v1: i64 = row1.get(0).unwrap();
        let n1: String = row1.get(1).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(n1, "initial_schema");

        let row2 = rows.next().await.unwrap().unwrap();
        let n2: String = row2.get(1).unwrap();
        assert_eq!(n2, "recency_indexes");
        assert!(rows.next().await.unwrap().is_none());
    }
}
