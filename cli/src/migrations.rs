//! Versioned schema for the local store.
//!
//! Every step is idempotent (`IF NOT EXISTS`, column probing, tolerated
//! duplicate-column errors) so two processes racing on a fresh store both
//! succeed. Migrations only add; existing rows are never rewritten.

use sqlx::SqlitePool;

use crate::store::StoreError;

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    description: &'static str,
}

const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        description: "command events and sync queue",
    },
    Migration {
        version: 2,
        description: "prediction columns on command events",
    },
];

const V1_STATEMENTS: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS command_events (
        id TEXT PRIMARY KEY,
        agent_id TEXT,
        executed_at REAL NOT NULL,
        command_hash TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        exit_code INTEGER NOT NULL,
        timed_out INTEGER NOT NULL DEFAULT 0,
        files_touched_count INTEGER NOT NULL DEFAULT 0,
        lines_added INTEGER NOT NULL DEFAULT 0,
        lines_deleted INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_queue (
        event_id TEXT PRIMARY KEY REFERENCES command_events(id),
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_attempt_at REAL,
        last_error TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_command_events_executed_at ON command_events(executed_at)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status)",
];

const PREDICTION_COLUMNS: [(&str, &str); 4] = [
    ("predicted_productivity", "REAL"),
    ("top_contribution_feature", "TEXT"),
    ("top_contribution_value", "REAL"),
    ("model_ref", "TEXT"),
];

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`].
pub async fn run(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at REAL NOT NULL,
            description TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await?;
    if current > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: current,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(pool, migration.version)
            .await
            .map_err(|source| StoreError::Migration {
                version: migration.version,
                source,
            })?;
        sqlx::query(
            "INSERT OR IGNORE INTO schema_version (version, applied_at, description) VALUES (?, ?, ?)",
        )
        .bind(migration.version)
        .bind(crate::store::now_ts())
        .bind(migration.description)
        .execute(pool)
        .await?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }
    Ok(())
}

async fn apply(pool: &SqlitePool, version: i64) -> Result<(), sqlx::Error> {
    match version {
        1 => {
            for statement in V1_STATEMENTS {
                sqlx::query(statement).execute(pool).await?;
            }
            Ok(())
        }
        2 => add_missing_columns(pool, "command_events", &PREDICTION_COLUMNS).await,
        other => Err(sqlx::Error::Protocol(format!(
            "no migration defined for schema version {other}"
        ))),
    }
}

async fn add_missing_columns(
    pool: &SqlitePool,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<(), sqlx::Error> {
    let existing: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(pool)
        .await?;

    for (name, sql_type) in columns {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        let statement = format!("ALTER TABLE {table} ADD COLUMN {name} {sql_type}");
        match sqlx::query(&statement).execute(pool).await {
            Ok(_) => tracing::debug!(table, column = name, "added column"),
            // another process got there first
            Err(e) if e.to_string().contains("duplicate column name") => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;

    async fn columns(pool: &SqlitePool, table: &str) -> Vec<String> {
        sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_store_reaches_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();
        store.ensure_storage().await.unwrap();

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
        let cols = columns(store.pool(), "command_events").await;
        for (name, _) in PREDICTION_COLUMNS {
            assert!(cols.iter().any(|c| c == name), "missing {name}");
        }
    }

    #[tokio::test]
    async fn running_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();
        store.ensure_storage().await.unwrap();
        store.ensure_storage().await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn legacy_table_gains_columns_and_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE command_events (
                id TEXT PRIMARY KEY,
                agent_id TEXT,
                executed_at REAL NOT NULL,
                command_hash TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                exit_code INTEGER NOT NULL,
                timed_out INTEGER NOT NULL DEFAULT 0,
                files_touched_count INTEGER NOT NULL DEFAULT 0,
                lines_added INTEGER NOT NULL DEFAULT 0,
                lines_deleted INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO command_events VALUES ('evt_old', NULL, 1700000000.5, 'abc', 10, 0, 0, 1, 4, 1)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        store.ensure_storage().await.unwrap();

        let cols = columns(store.pool(), "command_events").await;
        assert!(cols.iter().any(|c| c == "predicted_productivity"));
        assert!(cols.iter().any(|c| c == "model_ref"));

        let events = store.list(None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "evt_old");
        assert_eq!(events[0].metrics.lines_added, 4);
        assert!(events[0].prediction.is_none());
    }

    #[tokio::test]
    async fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();
        store.ensure_storage().await.unwrap();
        sqlx::query("INSERT INTO schema_version VALUES (99, 0, 'future')")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.ensure_storage().await.unwrap_err();
        assert!(matches!(err, StoreError::SchemaTooNew { found: 99, .. }));
    }
}
