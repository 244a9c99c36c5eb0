use axum::{Json, Router, routing::get};
use devtrace_core::telemetry::ActiveModelResponse;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/model/active", get(active_model))
}

/// Model registry lookup. No registry is wired up yet, so this always
/// reports that no model is active.
#[utoipa::path(
    get,
    path = "/v1/model/active",
    responses(
        (status = 200, description = "Active model, if any", body = ActiveModelResponse)
    ),
    tag = "model"
)]
pub async fn active_model() -> Json<ActiveModelResponse> {
    Json(ActiveModelResponse {
        model_version: None,
        message: "no active model registered".to_string(),
    })
}
