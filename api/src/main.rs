use std::net::SocketAddr;

use axum::http::Uri;
use axum::{Json, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

mod error;
mod extract;
mod ingest;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DevTrace Ingest API",
        version = "0.1.0",
        description = "Collects command telemetry batches synced from DevTrace clients."
    ),
    paths(
        routes::health::health_check,
        routes::telemetry::ingest_batch,
        routes::model::active_model,
    ),
    components(schemas(
        devtrace_core::error::ApiError,
        devtrace_core::telemetry::SyncEvent,
        devtrace_core::telemetry::IngestBatchRequest,
        devtrace_core::telemetry::BatchAccepted,
        devtrace_core::telemetry::HealthResponse,
        devtrace_core::telemetry::ActiveModelResponse,
    ))
)]
struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn not_found(uri: Uri) -> error::AppError {
    error::AppError::NotFound {
        path: uri.path().to_string(),
    }
}

pub(crate) fn app(app_state: state::AppState) -> Router {
    Router::new()
        .route("/api-doc/openapi.json", get(openapi_json))
        .merge(routes::health::router())
        .merge(routes::telemetry::router())
        .merge(routes::model::router())
        .fallback(not_found)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devtrace_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let db_path =
        std::env::var("DEVTRACE_INGEST_DB").unwrap_or_else(|_| "devtrace-ingest.db".to_string());
    let pool = match ingest::connect(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(path = %db_path, error = %e, "failed to open ingest database");
            std::process::exit(1);
        }
    };
    if let Err(e) = ingest::ensure_schema(&pool).await {
        tracing::error!(path = %db_path, error = %e, "failed to create ingest schema");
        std::process::exit(1);
    }

    let app = app(state::AppState { db: pool });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("DevTrace ingest listening on {}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let app = app(state::AppState {
            db: ingest::memory_pool().await,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_routes_report_ok() {
        for uri in ["/health", "/v1/health"] {
            let (status, json) = get_json(uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(json["status"], "ok");
        }
    }

    #[tokio::test]
    async fn active_model_is_empty() {
        let (status, json) = get_json("/v1/model/active").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["model_version"].is_null());
        assert_eq!(json["message"], "no active model registered");
    }

    #[tokio::test]
    async fn openapi_document_lists_batch_route() {
        let (status, json) = get_json("/api-doc/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["paths"]["/v1/telemetry/batch"]["post"].is_object());
        assert!(json["components"]["schemas"]["SyncEvent"].is_object());
    }

    #[tokio::test]
    async fn unknown_route_uses_error_envelope() {
        let (status, json) = get_json("/v2/nothing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");
    }
}
