//! `AppJson<T>` replaces `axum::Json<T>` in handlers so that a body which
//! does not deserialize yields the structured validation error instead of
//! axum's plain-text rejection.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let field = extract_field_from_serde_message(&body_text).unwrap_or_else(|| "body".to_string());

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field),
        received: None,
        docs_hint: Some(
            "Send a JSON object of the form {\"events\": [...]} with Content-Type: application/json."
                .to_string(),
        ),
    }
}

/// Pull the field name out of serde's "missing field `x`" /
/// "unknown field `x`" messages.
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `"].iter().find_map(|pattern| {
        let start = msg.find(pattern)? + pattern.len();
        let after = &msg[start..];
        after.find('`').map(|end| after[..end].to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_missing_field_name() {
        let msg = "Failed to deserialize the JSON body: missing field `events` at line 1 column 2";
        assert_eq!(extract_field_from_serde_message(msg), Some("events".to_string()));
    }

    #[test]
    fn extracts_unknown_field_name() {
        let msg = "unknown field `evnts`, expected `events`";
        assert_eq!(extract_field_from_serde_message(msg), Some("evnts".to_string()));
    }

    #[test]
    fn returns_none_for_type_errors() {
        let msg = "invalid type: string \"x\", expected a sequence";
        assert_eq!(extract_field_from_serde_message(msg), None);
    }
}
