use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Identifier of the user an event belongs to. Clients send either a number or
/// a string and get the same representation back on the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Int(i64),
    Text(String),
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UserId::Int(id) => write!(f, "{}", id),
            UserId::Text(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId::Int(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId::Text(id.to_string())
    }
}

/// A user-activity event as it travels from the API to the store.
///
/// Fields are private: an `Event` is built once, either by [`Event::from_json`]
/// at the API boundary or by deserializing a queue message, and is never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    user_id: UserId,
    event_type: String,
    timestamp: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    metadata: Map<String, Value>,
}

/// `"metadata": null` on the wire means the same as no metadata at all.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid event: {}", summarize(.details))]
pub struct ValidationError {
    pub details: Vec<FieldError>,
}

fn summarize(details: &[FieldError]) -> String {
    details
        .iter()
        .map(|d| format!("{}: {}", d.field, d.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        Self {
            details: vec![FieldError::new(field, message)],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.details.iter().any(|d| d.field == field)
    }
}

impl Event {
    pub fn new(
        user_id: impl Into<UserId>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_type: event_type.into(),
            timestamp: format_timestamp(&timestamp),
            metadata,
        }
    }

    /// Checks a raw request body against the event contract.
    ///
    /// Every violated field is reported, not only the first one. On success
    /// the timestamp is normalized to RFC 3339 in UTC.
    pub fn from_json(body: &Value) -> Result<Self, ValidationError> {
        let Some(object) = body.as_object() else {
            return Err(ValidationError::single("body", "expected a JSON object"));
        };

        let mut details = Vec::new();

        let user_id = match object.get("user_id") {
            None | Some(Value::Null) => {
                details.push(FieldError::new("user_id", "field required"));
                None
            }
            Some(Value::Number(n)) => match n.as_i64() {
                Some(id) => Some(UserId::Int(id)),
                None => {
                    details.push(FieldError::new("user_id", "must be an integer or a string"));
                    None
                }
            },
            Some(Value::String(s)) if s.trim().is_empty() => {
                details.push(FieldError::new("user_id", "must not be empty"));
                None
            }
            Some(Value::String(s)) => Some(UserId::Text(s.clone())),
            Some(_) => {
                details.push(FieldError::new("user_id", "must be an integer or a string"));
                None
            }
        };

        let event_type = match object.get("event_type") {
            None | Some(Value::Null) => {
                details.push(FieldError::new("event_type", "field required"));
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                details.push(FieldError::new("event_type", "must not be empty"));
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                details.push(FieldError::new("event_type", "must be a string"));
                None
            }
        };

        let timestamp = match object.get("timestamp") {
            None | Some(Value::Null) => {
                details.push(FieldError::new("timestamp", "field required"));
                None
            }
            Some(Value::String(s)) => match parse_timestamp(s) {
                Some(ts) => Some(ts),
                None => {
                    details.push(FieldError::new(
                        "timestamp",
                        format!("'{}' is not a valid date-time", s),
                    ));
                    None
                }
            },
            Some(_) => {
                details.push(FieldError::new("timestamp", "must be an ISO-8601 date-time string"));
                None
            }
        };

        let metadata = match object.get("metadata") {
            None | Some(Value::Null) => Some(Map::new()),
            Some(Value::Object(map)) => Some(map.clone()),
            Some(_) => {
                details.push(FieldError::new("metadata", "must be an object"));
                None
            }
        };

        match (user_id, event_type, timestamp, metadata) {
            (Some(user_id), Some(event_type), Some(timestamp), Some(metadata))
                if details.is_empty() =>
            {
                Ok(Self::new(user_id, event_type, timestamp, metadata))
            }
            _ => Err(ValidationError { details }),
        }
    }

    /// Decodes a queue message body. No contract validation happens here.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The timestamp exactly as carried on the wire.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses the date-time shapes clients are known to send. Values without an
/// offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_offset_and_naive_timestamps_to_the_same_instant() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 17, 15, 10, 0).unwrap();

        assert_eq!(parse_timestamp("2026-02-17T15:10:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-02-17T17:10:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-02-17 15:10:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-02-17T15:10:00.000"), Some(expected));
    }

    #[test]
    fn date_only_is_midnight_utc() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 17, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-02-17"), Some(expected));
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert_eq!(parse_timestamp("not-a-date"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn null_metadata_on_the_wire_is_empty() {
        let event = Event::from_payload(
            br#"{"user_id": 1, "event_type": "x", "timestamp": "2026-02-17T15:10:00Z", "metadata": null}"#,
        )
        .unwrap();

        assert!(event.metadata().is_empty());
    }

    #[test]
    fn user_id_keeps_its_json_type() {
        let int: UserId = serde_json::from_str("42").unwrap();
        let text: UserId = serde_json::from_str("\"42\"").unwrap();

        assert_eq!(int, UserId::Int(42));
        assert_eq!(text, UserId::Text("42".to_string()));
        assert_eq!(serde_json::to_string(&int).unwrap(), "42");
        assert_eq!(serde_json::to_string(&text).unwrap(), "\"42\"");
    }
}
