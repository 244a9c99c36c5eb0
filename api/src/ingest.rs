//! Central event table. Ingestion is idempotent per event id: a retried id
//! that is already stored is ignored, not duplicated and not an error.

use devtrace_core::telemetry::SyncEvent;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub async fn connect(path: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingested_events (
            id TEXT PRIMARY KEY,
            agent_id TEXT,
            executed_at REAL NOT NULL,
            command_hash TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            exit_code INTEGER NOT NULL,
            timed_out INTEGER NOT NULL,
            files_touched_count INTEGER NOT NULL,
            lines_added INTEGER NOT NULL,
            lines_deleted INTEGER NOT NULL,
            received_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Validate loosely-typed batch entries, dropping malformed ones.
pub fn validate(entries: &[serde_json::Value]) -> Vec<SyncEvent> {
    entries.iter().filter_map(SyncEvent::from_value).collect()
}

/// Store a batch in one transaction. Returns how many rows were new; the
/// accepted count reported to clients is the number of valid events.
pub async fn insert_batch(pool: &SqlitePool, events: &[SyncEvent]) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for event in events {
        inserted += sqlx::query(
            r#"
            INSERT OR IGNORE INTO ingested_events (
                id, agent_id, executed_at, command_hash, duration_ms, exit_code, timed_out,
                files_touched_count, lines_added, lines_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.agent_id)
        .bind(event.executed_at)
        .bind(&event.command_hash)
        .bind(event.duration_ms)
        .bind(event.exit_code)
        .bind(i64::from(event.timed_out))
        .bind(event.files_touched_count)
        .bind(event.lines_added)
        .bind(event.lines_deleted)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // one connection: every connection to :memory: is a separate database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    ensure_schema(&pool).await.unwrap();
    pool
}
