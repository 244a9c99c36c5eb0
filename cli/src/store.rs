//! Durable local store: one SQLite file per storage directory holding the
//! command events and their sync queue.
//!
//! Each operation is its own transaction, so concurrent CLI invocations on
//! the same directory serialize on SQLite's lock (WAL plus a busy timeout).

use std::path::{Path, PathBuf};
use std::time::Duration;

use devtrace_core::metrics::{CommandMetrics, Prediction};
use devtrace_core::telemetry::SyncEvent;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::export::{self, ExportError, ExportFormat};
use crate::migrations;

pub const DB_FILE: &str = "devtrace.db";

/// Sync errors are truncated to this many characters before storage.
pub const MAX_ERROR_CHARS: usize = 500;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ids bound per `IN (...)` list, well under SQLite's variable limit.
const IDS_PER_STATEMENT: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot create storage directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema migration {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("store schema version {found} is newer than this build supports ({supported})")]
    SchemaTooNew { found: i64, supported: i64 },
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// A stored command event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandEvent {
    pub id: String,
    pub agent_id: Option<String>,
    pub executed_at: f64,
    #[serde(flatten)]
    pub metrics: CommandMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncQueueEntry {
    pub event_id: String,
    pub status: String,
    pub attempts: i64,
    pub last_attempt_at: Option<f64>,
    pub last_error: Option<String>,
}

/// A pending queue entry joined with its event, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub event: SyncEvent,
    /// Failed delivery attempts so far
    pub attempts: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub total_events: i64,
    pub pending: i64,
    pub synced: i64,
    /// Pending entries that have failed at least once
    pub retrying: i64,
    /// Delivery attempts recorded across the whole queue
    pub total_attempts: i64,
    pub last_error: Option<String>,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    agent_id: Option<String>,
    executed_at: f64,
    command_hash: String,
    duration_ms: i64,
    exit_code: i64,
    timed_out: i64,
    files_touched_count: i64,
    lines_added: i64,
    lines_deleted: i64,
    predicted_productivity: Option<f64>,
    top_contribution_feature: Option<String>,
    top_contribution_value: Option<f64>,
    model_ref: Option<String>,
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    #[sqlx(flatten)]
    event: EventRow,
    attempts: i64,
}

impl EventRow {
    fn metrics(&self) -> CommandMetrics {
        CommandMetrics {
            command_hash: self.command_hash.clone(),
            duration_ms: self.duration_ms,
            exit_code: i32::try_from(self.exit_code).unwrap_or(i32::MAX),
            timed_out: self.timed_out != 0,
            files_touched_count: self.files_touched_count,
            lines_added: self.lines_added,
            lines_deleted: self.lines_deleted,
        }
    }

    fn into_event(self) -> CommandEvent {
        let metrics = self.metrics();
        let prediction = match (self.predicted_productivity, self.top_contribution_feature) {
            (Some(predicted), Some(feature)) => Some(Prediction {
                predicted_productivity: predicted,
                top_contribution_feature: feature,
                top_contribution_value: self.top_contribution_value.unwrap_or(0.0),
                model_ref: self.model_ref.unwrap_or_default(),
            }),
            _ => None,
        };
        CommandEvent {
            id: self.id,
            agent_id: self.agent_id,
            executed_at: self.executed_at,
            metrics,
            prediction,
        }
    }

    fn into_sync_event(self) -> SyncEvent {
        let metrics = self.metrics();
        SyncEvent::from_metrics(self.id, self.agent_id, self.executed_at, &metrics)
    }
}

const EVENT_COLUMNS: &str = "e.id, e.agent_id, e.executed_at, e.command_hash, e.duration_ms, \
     e.exit_code, e.timed_out, e.files_touched_count, e.lines_added, e.lines_deleted, \
     e.predicted_productivity, e.top_contribution_feature, e.top_contribution_value, e.model_ref";

#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl LocalStore {
    /// Open (creating if needed) the store under `base`. Call
    /// [`LocalStore::ensure_storage`] before use.
    pub async fn open(base: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(base).map_err(|source| StoreError::Io {
            path: base.display().to_string(),
            source,
        })?;
        let db_path = base.join(DB_FILE);
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool, db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create or upgrade the schema. Idempotent.
    pub async fn ensure_storage(&self) -> Result<(), StoreError> {
        migrations::run(&self.pool).await
    }

    /// Persist an event and its pending queue entry atomically. No-op
    /// metrics are skipped and yield `None`.
    pub async fn insert(
        &self,
        agent_id: Option<&str>,
        metrics: &CommandMetrics,
        prediction: Option<&Prediction>,
    ) -> Result<Option<String>, StoreError> {
        if metrics.is_noop() {
            tracing::debug!(command_hash = %metrics.command_hash, "no file changes, skipping event");
            return Ok(None);
        }

        let id = new_event_id();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO command_events (
                id, agent_id, executed_at, command_hash, duration_ms, exit_code, timed_out,
                files_touched_count, lines_added, lines_deleted,
                predicted_productivity, top_contribution_feature, top_contribution_value, model_ref
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(agent_id)
        .bind(now_ts())
        .bind(&metrics.command_hash)
        .bind(metrics.duration_ms)
        .bind(metrics.exit_code)
        .bind(i64::from(metrics.timed_out))
        .bind(metrics.files_touched_count)
        .bind(metrics.lines_added)
        .bind(metrics.lines_deleted)
        .bind(prediction.map(|p| p.predicted_productivity))
        .bind(prediction.map(|p| p.top_contribution_feature.as_str()))
        .bind(prediction.map(|p| p.top_contribution_value))
        .bind(prediction.map(|p| p.model_ref.as_str()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO sync_queue (event_id, status, attempts) VALUES (?, 'pending', 0)")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(event_id = %id, "stored command event");
        Ok(Some(id))
    }

    /// Events oldest first, at most `limit` when given.
    pub async fn list(&self, limit: Option<u32>) -> Result<Vec<CommandEvent>, StoreError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM command_events e \
             ORDER BY e.executed_at ASC, e.rowid ASC LIMIT ?"
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(limit.map_or(-1, i64::from))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EventRow::into_event).collect())
    }

    /// Oldest pending entries with their attempt counts, up to `batch_size`.
    pub async fn pending_sync(&self, batch_size: u32) -> Result<Vec<PendingEntry>, StoreError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS}, q.attempts FROM sync_queue q \
             JOIN command_events e ON e.id = q.event_id \
             WHERE q.status = 'pending' \
             ORDER BY e.executed_at ASC, e.rowid ASC LIMIT ?"
        );
        let rows: Vec<PendingRow> = sqlx::query_as(&sql)
            .bind(i64::from(batch_size))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| PendingEntry {
                event: row.event.into_sync_event(),
                attempts: row.attempts,
            })
            .collect())
    }

    /// Mark delivered and stamp the delivery time. Attempts and the last
    /// error are left as they were.
    pub async fn mark_synced(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = now_ts();
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for chunk in ids.chunks(IDS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE sync_queue SET status = 'synced', last_attempt_at = ");
            qb.push_bind(now).push(" WHERE event_id IN (");
            push_ids(&mut qb, chunk);
            updated += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// Record a failed delivery attempt. Entries stay pending.
    pub async fn mark_sync_failed(&self, ids: &[String], error: &str) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = now_ts();
        let error = truncate_error(error);
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for chunk in ids.chunks(IDS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "UPDATE sync_queue SET status = 'pending', attempts = attempts + 1, last_attempt_at = ",
            );
            qb.push_bind(now)
                .push(", last_error = ")
                .push_bind(error.clone())
                .push(" WHERE event_id IN (");
            push_ids(&mut qb, chunk);
            updated += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn queue_entries(&self) -> Result<Vec<SyncQueueEntry>, StoreError> {
        let rows: Vec<(String, String, i64, Option<f64>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT q.event_id, q.status, q.attempts, q.last_attempt_at, q.last_error
            FROM sync_queue q
            JOIN command_events e ON e.id = q.event_id
            ORDER BY e.executed_at ASC, e.rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(event_id, status, attempts, last_attempt_at, last_error)| SyncQueueEntry {
                event_id,
                status,
                attempts,
                last_attempt_at,
                last_error,
            })
            .collect())
    }

    /// Write every event's metrics to `path`. Returns the row count.
    pub async fn export(&self, path: &Path, format: ExportFormat) -> Result<usize, StoreError> {
        let rows: Vec<CommandMetrics> = self
            .list(None)
            .await?
            .into_iter()
            .map(|event| event.metrics)
            .collect();
        Ok(export::write_export(path, &rows, format)?)
    }

    pub async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        let total_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM command_events")
            .fetch_one(&self.pool)
            .await?;
        let (pending, synced, retrying, total_attempts): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'synced' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'pending' AND attempts > 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(attempts), 0)
            FROM sync_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let last_error: Option<String> = sqlx::query_scalar(
            r#"
            SELECT last_error FROM sync_queue
            WHERE status = 'pending' AND last_error IS NOT NULL
            ORDER BY last_attempt_at DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        Ok(SyncStatus {
            total_events,
            pending,
            synced,
            retrying,
            total_attempts,
            last_error,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn push_ids(qb: &mut QueryBuilder<Sqlite>, ids: &[String]) {
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
}

pub fn new_event_id() -> String {
    format!("evt_{}", Uuid::now_v7().simple())
}

/// Current time as fractional Unix seconds.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

pub fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_CHARS).collect()
}
