use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

use crate::metrics::CommandMetrics;

/// Fields every event in a batch must carry. `agent_id` is optional.
pub const REQUIRED_EVENT_FIELDS: [&str; 9] = [
    "id",
    "executed_at",
    "command_hash",
    "duration_ms",
    "exit_code",
    "timed_out",
    "files_touched_count",
    "lines_added",
    "lines_deleted",
];

/// One command event as it travels from a local store to the ingestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncEvent {
    /// Event id, unique per local store; the ingestor deduplicates on it
    pub id: String,
    pub agent_id: Option<String>,
    /// Unix timestamp in seconds (fractional)
    pub executed_at: f64,
    pub command_hash: String,
    pub duration_ms: i64,
    pub exit_code: i32,
    #[serde(deserialize_with = "bool_or_int")]
    pub timed_out: bool,
    pub files_touched_count: i64,
    pub lines_added: i64,
    pub lines_deleted: i64,
}

impl SyncEvent {
    pub fn from_metrics(
        id: impl Into<String>,
        agent_id: Option<String>,
        executed_at: f64,
        metrics: &CommandMetrics,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id,
            executed_at,
            command_hash: metrics.command_hash.clone(),
            duration_ms: metrics.duration_ms,
            exit_code: metrics.exit_code,
            timed_out: metrics.timed_out,
            files_touched_count: metrics.files_touched_count,
            lines_added: metrics.lines_added,
            lines_deleted: metrics.lines_deleted,
        }
    }

    /// Validate a loosely-typed batch entry. Returns `None` when a required
    /// field is missing or has an unusable type.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        if REQUIRED_EVENT_FIELDS
            .iter()
            .any(|field| object.get(*field).is_none_or(|v| v.is_null()))
        {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn metrics(&self) -> CommandMetrics {
        CommandMetrics {
            command_hash: self.command_hash.clone(),
            duration_ms: self.duration_ms,
            exit_code: self.exit_code,
            timed_out: self.timed_out,
            files_touched_count: self.files_touched_count,
            lines_added: self.lines_added,
            lines_deleted: self.lines_deleted,
        }
    }
}

fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(i) => Ok(i != 0),
    }
}

/// Outgoing batch body: `{"events": [...]}`
#[derive(Debug, Serialize)]
pub struct SyncBatch<'a> {
    pub events: &'a [SyncEvent],
}

/// Incoming batch body. Entries are validated one by one so a malformed
/// event is dropped instead of failing the whole request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestBatchRequest {
    #[schema(value_type = Vec<SyncEvent>)]
    pub events: Vec<serde_json::Value>,
}

/// Response for batch ingestion
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchAccepted {
    /// Number of valid events in the batch, including ids already ingested
    pub accepted: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActiveModelResponse {
    pub model_version: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn valid() -> serde_json::Value {
        json!({
            "id": "evt_1",
            "agent_id": null,
            "executed_at": 1_700_000_000.25,
            "command_hash": "abc",
            "duration_ms": 25,
            "exit_code": 0,
            "timed_out": false,
            "files_touched_count": 1,
            "lines_added": 10,
            "lines_deleted": 2
        })
    }

    #[test]
    fn accepts_complete_event_without_agent() {
        let event = SyncEvent::from_value(&valid()).expect("event should validate");
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.agent_id, None);
        assert_eq!(event.lines_added, 10);
    }

    #[test]
    fn accepts_integer_timed_out_flag() {
        let mut value = valid();
        value["timed_out"] = json!(1);
        assert!(SyncEvent::from_value(&value).unwrap().timed_out);
    }

    #[test]
    fn rejects_missing_or_null_required_field() {
        for field in REQUIRED_EVENT_FIELDS {
            let mut value = valid();
            value.as_object_mut().unwrap().remove(field);
            assert!(SyncEvent::from_value(&value).is_none(), "missing {field}");

            let mut value = valid();
            value[field] = serde_json::Value::Null;
            assert!(SyncEvent::from_value(&value).is_none(), "null {field}");
        }
    }

    #[test]
    fn rejects_wrong_types_and_non_objects() {
        let mut value = valid();
        value["duration_ms"] = json!("slow");
        assert!(SyncEvent::from_value(&value).is_none());
        assert!(SyncEvent::from_value(&json!([1, 2])).is_none());
    }

    #[test]
    fn batch_serializes_agent_id_as_null() {
        let event = SyncEvent::from_value(&valid()).unwrap();
        let body = serde_json::to_value(SyncBatch {
            events: std::slice::from_ref(&event),
        })
        .unwrap();
        assert!(body["events"][0]["agent_id"].is_null());
        assert_eq!(body["events"][0]["timed_out"], json!(false));
    }
}
