use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

pub const STATE_FAILED: &str = "failed";
pub const EVENT_TYPE_ERROR: &str = "error";
/// Kafka offsets are not tracked per event yet, every event is recorded at offset "0".
pub const DEFAULT_MESSAGE_OFFSET: &str = "0";

/// A report event as it arrives on the report events topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEvent {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default, rename = "event_message")]
    pub event_msg: String,
    #[serde(default)]
    pub service_name: String,
}

/// The dedup slot of a report event. The message text is left out on purpose, so
/// repeated events of the same kind from the same service share one slot.
#[derive(Debug, Serialize)]
struct CacheKey<'a> {
    instance_id: &'a str,
    service_name: &'a str,
    event_type: &'a str,
}

impl ReportEvent {
    /// Returns the serialized cache key and value for this event. The key is derived
    /// from the instance id, event type and service name, all of which must be non empty.
    pub fn generate_cache_key_and_value(&self) -> Result<(Vec<u8>, Vec<u8>), ValidationError> {
        if self.instance_id.is_empty() {
            return Err(ValidationError::MissingInstanceId);
        }
        if self.event_type.is_empty() {
            return Err(ValidationError::MissingEventType);
        }
        if self.service_name.is_empty() {
            return Err(ValidationError::MissingServiceName);
        }

        let key = serde_json::to_vec(&CacheKey {
            instance_id: &self.instance_id,
            service_name: &self.service_name,
            event_type: &self.event_type,
        })?;
        let value = serde_json::to_vec(self)?;

        Ok((key, value))
    }
}

/// A dataset instance as returned by the dataset API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(rename = "id", default)]
    pub instance_id: String,
    #[serde(rename = "total_observations", default)]
    pub number_of_observations: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_inserted_observations: i64,
    #[serde(default)]
    pub state: String,
    #[serde(
        default,
        deserialize_with = "skip_nulls",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub events: Vec<Event>,
}

impl Instance {
    /// True if any recorded event matches `candidate` ignoring the time each was recorded.
    pub fn contains_event(&self, candidate: &Event) -> bool {
        self.events.iter().any(|e| e.equals_ignore_time(candidate))
    }
}

/// An event recorded against a dataset instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_offset: String,
}

impl Event {
    /// Builds the instance event recording `report` at `time`.
    pub fn from_report(report: &ReportEvent, time: DateTime<Utc>) -> Self {
        Event {
            event_type: report.event_type.clone(),
            service: report.service_name.clone(),
            time: Some(time),
            message: report.event_msg.clone(),
            message_offset: DEFAULT_MESSAGE_OFFSET.to_owned(),
        }
    }

    /// Compares type, message and message offset. Time and service are not compared.
    pub fn equals_ignore_time(&self, other: &Event) -> bool {
        self.event_type == other.event_type
            && self.message == other.message
            && self.message_offset == other.message_offset
    }
}

/// Body of an instance status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub state: String,
}

impl State {
    pub fn failed() -> Self {
        State {
            state: STATE_FAILED.to_owned(),
        }
    }
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// A null list decodes as empty, null entries are dropped.
fn skip_nulls<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let entries = Option::<Vec<Option<T>>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn report_event() -> ReportEvent {
        ReportEvent {
            instance_id: "666".to_string(),
            event_type: "error".to_string(),
            event_msg: "its all gone wrong".to_string(),
            service_name: "myService".to_string(),
        }
    }

    #[test]
    fn cache_key_requires_instance_id() {
        let event = ReportEvent::default();
        let err = event.generate_cache_key_and_value().unwrap_err();
        assert!(matches!(err, ValidationError::MissingInstanceId));
        assert!(err.to_string().contains("InstanceID"));
    }

    #[test]
    fn cache_key_requires_event_type() {
        let event = ReportEvent {
            instance_id: "666".to_string(),
            ..Default::default()
        };
        let err = event.generate_cache_key_and_value().unwrap_err();
        assert!(matches!(err, ValidationError::MissingEventType));
        assert!(err.to_string().contains("EventType"));
    }

    #[test]
    fn cache_key_requires_service_name() {
        let event = ReportEvent {
            instance_id: "666".to_string(),
            event_type: "error".to_string(),
            ..Default::default()
        };
        let err = event.generate_cache_key_and_value().unwrap_err();
        assert!(matches!(err, ValidationError::MissingServiceName));
        assert!(err.to_string().contains("ServiceName"));
    }

    #[test]
    fn cache_key_and_value_for_valid_event() {
        let event = report_event();
        let (key, value) = event.generate_cache_key_and_value().unwrap();

        let key: serde_json::Value = serde_json::from_slice(&key).unwrap();
        assert_eq!(
            key,
            json!({"instance_id": "666", "service_name": "myService", "event_type": "error"})
        );

        let value: ReportEvent = serde_json::from_slice(&value).unwrap();
        assert_eq!(value, event);
    }

    #[test]
    fn cache_key_ignores_event_message() {
        let first = report_event();
        let second = ReportEvent {
            event_msg: "something else entirely".to_string(),
            ..report_event()
        };

        let (first_key, first_value) = first.generate_cache_key_and_value().unwrap();
        let (second_key, second_value) = second.generate_cache_key_and_value().unwrap();
        assert_eq!(first_key, second_key);
        assert_ne!(first_value, second_value);
    }

    #[test]
    fn events_differing_only_in_time_are_equal() {
        let now = Utc::now();
        let a = Event::from_report(&report_event(), now);
        let b = Event::from_report(&report_event(), now - Duration::hours(3));
        assert!(a.equals_ignore_time(&b));

        let untimed = Event {
            time: None,
            ..a.clone()
        };
        assert!(a.equals_ignore_time(&untimed));
    }

    #[test]
    fn events_with_different_message_or_offset_are_not_equal() {
        let a = Event::from_report(&report_event(), Utc::now());

        let other_message = Event {
            message: "different".to_string(),
            ..a.clone()
        };
        assert!(!a.equals_ignore_time(&other_message));

        let other_offset = Event {
            message_offset: "12".to_string(),
            ..a.clone()
        };
        assert!(!a.equals_ignore_time(&other_offset));

        let other_type = Event {
            event_type: "info".to_string(),
            ..a.clone()
        };
        assert!(!a.equals_ignore_time(&other_type));
    }

    #[test]
    fn instance_contains_event() {
        let existing = Event::from_report(&report_event(), Utc::now() - Duration::days(1));
        let instance = Instance {
            instance_id: "666".to_string(),
            state: "pending".to_string(),
            events: vec![existing],
            ..Default::default()
        };

        let candidate = Event::from_report(&report_event(), Utc::now());
        assert!(instance.contains_event(&candidate));

        let unrelated = Event {
            message: "nope".to_string(),
            ..candidate
        };
        assert!(!instance.contains_event(&unrelated));
        assert!(!Instance::default().contains_event(&unrelated));
    }

    #[test]
    fn new_event_uses_default_offset() {
        let event = Event::from_report(&report_event(), Utc::now());
        assert_eq!(event.message_offset, DEFAULT_MESSAGE_OFFSET);
        assert_eq!(event.service, "myService");
        assert_eq!(event.event_type, "error");
        assert_eq!(event.message, "its all gone wrong");
        assert!(event.time.is_some());
    }

    #[test]
    fn instance_decodes_dataset_api_body() {
        let body = json!({
            "id": "666",
            "total_observations": 1000,
            "state": "completed",
            "events": null
        });
        let instance: Instance = serde_json::from_value(body).unwrap();
        assert_eq!(instance.instance_id, "666");
        assert_eq!(instance.number_of_observations, 1000);
        assert_eq!(instance.state, "completed");
        assert!(instance.events.is_empty());

        let body = json!({
            "id": "666",
            "state": "failed",
            "events": [{"type": "error", "service": "svc", "time": "2024-01-01T10:00:00Z", "message": "boom", "message_offset": "0"}]
        });
        let instance: Instance = serde_json::from_value(body).unwrap();
        assert_eq!(instance.events.len(), 1);
        assert_eq!(instance.events[0].service, "svc");
    }

    #[test]
    fn instance_skips_null_events() {
        let body = json!({
            "id": "666",
            "state": "pending",
            "events": [null, {"type": "error", "service": "svc", "message": "boom", "message_offset": "0"}, null]
        });
        let instance: Instance = serde_json::from_value(body).unwrap();

        assert_eq!(instance.events.len(), 1);
        let candidate = Event {
            event_type: "error".to_string(),
            message: "boom".to_string(),
            message_offset: "0".to_string(),
            ..Default::default()
        };
        assert!(instance.contains_event(&candidate));
    }
}
