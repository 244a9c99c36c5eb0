use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Structured error response returned by the ingest service.
/// Sync clients log it verbatim, so every error carries enough context
/// to tell a malformed batch from a server-side failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// One of the `codes` constants
    pub error: String,
    /// Readable description, safe to show to a developer
    pub message: String,
    /// Offending request field, when one can be named
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Correlates with the service's `request_id` log field
    pub request_id: String,
    /// What a valid request looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
