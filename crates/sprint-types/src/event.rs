use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One occurrence broadcast over the event bus and appended to the event log.
///
/// `timestamp` is milliseconds since epoch. `new` stamps the current time;
/// callers reconstructing an event from a stored row use `with_timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub timestamp: i64,
}

impl EngineEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_timestamp(event_type: impl Into<String>, payload: Value, timestamp: i64) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp,
        }
    }
}
