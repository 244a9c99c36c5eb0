//! At-least-once delivery of pending events to the ingest service.
//!
//! A batch is delivered whole or not at all: any transport error, non-2xx
//! status, or accepted-count mismatch fails every id in the batch, which
//! stays pending for the next run. The ingestor deduplicates on event id.

use std::time::Duration;

use devtrace_core::telemetry::{BatchAccepted, HealthResponse, SyncBatch, SyncEvent};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::store::{LocalStore, StoreError};

pub const BATCH_PATH: &str = "/v1/telemetry/batch";
pub const HEALTH_PATH: &str = "/v1/health";
pub const DEFAULT_BATCH_SIZE: u32 = 100;
pub const MAX_BATCH_SIZE: u32 = 5_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid ingest url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ingest returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unreadable ingest response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("ingest accepted {accepted} of {sent} events")]
    PartialAccept { accepted: u64, sent: usize },
}

/// Outcome of one sync run, as counts of batch entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    batch_url: Url,
    health_url: Url,
    batch_size: u32,
}

impl SyncClient {
    pub fn new(api_url: &str, batch_size: u32, timeout: Duration) -> Result<Self, SyncError> {
        let base = api_url.trim_end_matches('/');
        let parse = |path: &str| {
            let url = format!("{base}{path}");
            Url::parse(&url).map_err(|source| SyncError::InvalidUrl { url, source })
        };
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            batch_url: parse(BATCH_PATH)?,
            health_url: parse(HEALTH_PATH)?,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        })
    }

    /// Deliver the oldest pending batch. Delivery failures are recorded on
    /// the queue and reported in the returned counts; only local storage
    /// failures surface as errors.
    pub async fn sync_pending(&self, store: &LocalStore) -> Result<SyncReport, StoreError> {
        let pending = store.pending_sync(self.batch_size).await?;
        if pending.is_empty() {
            tracing::debug!("nothing pending, skipping sync request");
            return Ok(SyncReport::default());
        }
        let retried = pending.iter().filter(|p| p.attempts > 0).count();
        let batch: Vec<SyncEvent> = pending.into_iter().map(|p| p.event).collect();
        let ids: Vec<String> = batch.iter().map(|e| e.id.clone()).collect();
        tracing::debug!(count = ids.len(), retried, "sending sync batch");

        match self.deliver(&batch).await {
            Ok(()) => {
                store.mark_synced(&ids).await?;
                tracing::info!(count = ids.len(), "synced events");
                Ok(SyncReport {
                    synced: ids.len(),
                    failed: 0,
                    error: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(count = ids.len(), error = %message, "sync batch failed, will retry");
                store.mark_sync_failed(&ids, &message).await?;
                Ok(SyncReport {
                    synced: 0,
                    failed: ids.len(),
                    error: Some(message),
                })
            }
        }
    }

    async fn deliver(&self, events: &[SyncEvent]) -> Result<(), SyncError> {
        let response = self
            .http
            .post(self.batch_url.clone())
            .json(&SyncBatch { events })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let accepted: BatchAccepted = serde_json::from_str(&body)?;
        if accepted.accepted != events.len() as u64 {
            return Err(SyncError::PartialAccept {
                accepted: accepted.accepted,
                sent: events.len(),
            });
        }
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthResponse, SyncError> {
        let response = self.http.get(self.health_url.clone()).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
