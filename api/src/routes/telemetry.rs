use axum::extract::State;
use axum::{Json, Router, routing::post};
use devtrace_core::telemetry::{BatchAccepted, IngestBatchRequest};

use crate::error::AppError;
use crate::extract::AppJson;
use crate::ingest;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/telemetry/batch", post(ingest_batch))
}

/// Accept a batch of command events
///
/// Each event is validated on its own; malformed events are dropped and
/// not counted. Events whose id was already ingested count as accepted,
/// so a client retrying a whole batch sees `accepted` equal to the batch
/// size.
#[utoipa::path(
    post,
    path = "/v1/telemetry/batch",
    request_body = IngestBatchRequest,
    responses(
        (status = 200, description = "Batch stored", body = BatchAccepted),
        (status = 400, description = "Body is not an events batch", body = devtrace_core::error::ApiError),
        (status = 500, description = "Storage failure", body = devtrace_core::error::ApiError)
    ),
    tag = "telemetry"
)]
pub async fn ingest_batch(
    State(state): State<AppState>,
    AppJson(req): AppJson<IngestBatchRequest>,
) -> Result<Json<BatchAccepted>, AppError> {
    let events = ingest::validate(&req.events);
    let dropped = req.events.len() - events.len();
    let inserted = ingest::insert_batch(&state.db, &events).await?;

    tracing::info!(
        received = req.events.len(),
        accepted = events.len(),
        inserted,
        dropped,
        "ingested telemetry batch"
    );

    Ok(Json(BatchAccepted {
        accepted: events.len() as u64,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::ingest::memory_pool;
    use crate::state::AppState;

    fn event(id: &str) -> Value {
        json!({
            "id": id,
            "agent_id": null,
            "executed_at": 1_700_000_000.0,
            "command_hash": "abc",
            "duration_ms": 40,
            "exit_code": 1,
            "timed_out": false,
            "files_touched_count": 2,
            "lines_added": 5,
            "lines_deleted": 0
        })
    }

    async fn post_batch(app: axum::Router, body: String) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/telemetry/batch")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn app() -> (axum::Router, sqlx::SqlitePool) {
        let pool = memory_pool().await;
        let app = crate::app(AppState { db: pool.clone() });
        (app, pool)
    }

    #[tokio::test]
    async fn counts_valid_events_only() {
        let (app, pool) = app().await;
        let mut broken = event("evt_3");
        broken.as_object_mut().unwrap().remove("lines_added");
        let body = json!({"events": [event("evt_1"), event("evt_2"), broken]}).to_string();

        let (status, json) = post_batch(app, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"accepted": 2}));

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingested_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, 2);
    }

    #[tokio::test]
    async fn retried_batch_is_fully_accepted_without_duplicates() {
        let (app, pool) = app().await;
        let body = json!({"events": [event("evt_1"), event("evt_2")]}).to_string();

        let (_, first) = post_batch(app.clone(), body.clone()).await;
        let (_, second) = post_batch(app, body).await;
        assert_eq!(first["accepted"], 2);
        assert_eq!(second["accepted"], 2);

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingested_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, 2);
    }

    #[tokio::test]
    async fn body_without_events_is_a_validation_error() {
        let (app, _pool) = app().await;
        let (status, json) = post_batch(app, "{}".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_failed");
        assert_eq!(json["field"], "events");
        assert!(json["request_id"].is_string());
    }

    #[tokio::test]
    async fn empty_batch_accepts_nothing() {
        let (app, _pool) = app().await;
        let (status, json) = post_batch(app, json!({"events": []}).to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["accepted"], 0);
    }
}
