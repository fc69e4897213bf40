//! Event record types for the classified event stream.
//!
//! Frames arrive as loosely shaped JSON documents. Every field is optional on
//! the wire: parsing fills defaults instead of rejecting the frame, and only a
//! frame that is not a JSON object at all is an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Source name used when a frame does not say where it came from.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Namespace for ids minted from record content.
const RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_1e2b_8a4d_4c1f_9e37_d2a6_b1c0_7e44);

/// Stable identity of a record.
///
/// Taken from the frame's `id` when the producer supplied one, otherwise a
/// UUIDv5 over source, timestamp and payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint an id from record content.
    pub fn derive(source: &str, timestamp: DateTime<Utc>, payload: &Value) -> Self {
        let name = format!("{source}|{}|{payload}", timestamp.to_rfc3339());
        Self(Uuid::new_v5(&RECORD_NAMESPACE, name.as_bytes()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sentiment label assigned upstream by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    /// Exact, case-sensitive match on the classifier's label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Positive" => Some(Sentiment::Positive),
            "Negative" => Some(Sentiment::Negative),
            "Neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
            Sentiment::Neutral => "Neutral",
        }
    }
}

/// Free-form content of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub text: Option<String>,
    pub user_id: Option<i64>,
    pub meta: Option<String>,
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key).filter(|v| !v.is_null());

        Self {
            text: field("text").map(lossy_string),
            user_id: field("user_id").and_then(|v| {
                v.as_i64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            }),
            meta: field("meta").map(lossy_string),
        }
    }
}

/// Precomputed classification of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub sentiment: Option<Sentiment>,
    pub score: Option<f64>,
}

impl Analysis {
    pub fn new(sentiment: Sentiment, score: f64) -> Self {
        Self {
            sentiment: Some(sentiment),
            score: Some(score),
        }
    }

    fn from_value(value: &Value) -> Self {
        Self {
            sentiment: value
                .get("sentiment")
                .and_then(Value::as_str)
                .and_then(Sentiment::from_label),
            score: value
                .get("score")
                .and_then(Value::as_f64)
                .filter(|s| s.is_finite()),
        }
    }
}

/// One ingested unit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: RecordId,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
    pub analysis: Analysis,
}

impl EventRecord {
    /// Build a record, minting its id from content.
    pub fn new(
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: Payload,
        analysis: Analysis,
    ) -> Self {
        let source = source.into();
        let payload_value = serde_json::to_value(&payload).unwrap_or(Value::Null);
        Self {
            id: RecordId::derive(&source, timestamp, &payload_value),
            source,
            timestamp,
            payload,
            analysis,
        }
    }

    /// Replace the minted id with a producer-assigned one.
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = id;
        self
    }

    /// Parse one frame, using the current time for a missing timestamp.
    pub fn parse(data: &str) -> Result<Self, FrameError> {
        Self::parse_at(data, Utc::now())
    }

    /// Parse one frame. `received_at` stands in for a missing or
    /// unparseable timestamp.
    pub fn parse_at(data: &str, received_at: DateTime<Utc>) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(data).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(FrameError::NotAnObject);
        }

        let source = value
            .get("source")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SOURCE)
            .to_string();

        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(received_at);

        let raw_payload = value.get("payload").cloned().unwrap_or(Value::Null);
        let payload = Payload::from_value(&raw_payload);
        let analysis = value
            .get("analysis")
            .map(Analysis::from_value)
            .unwrap_or_default();

        let id = match value.get("id") {
            Some(Value::String(s)) if !s.is_empty() => RecordId::new(s.clone()),
            Some(Value::Number(n)) => RecordId::new(n.to_string()),
            _ => RecordId::derive(&source, timestamp, &raw_payload),
        };

        Ok(Self {
            id,
            source,
            timestamp,
            payload,
            analysis,
        })
    }

    /// Score with absent treated as zero.
    pub fn score(&self) -> f64 {
        self.analysis.score.unwrap_or(0.0)
    }

    pub fn sentiment(&self) -> Option<Sentiment> {
        self.analysis.sentiment
    }
}

/// Why a frame could not become a record.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    InvalidJson(String),
    NotAnObject,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::InvalidJson(e) => write!(f, "Invalid JSON frame: {e}"),
            FrameError::NotAnObject => write!(f, "Frame is not a JSON object"),
        }
    }
}

impl std::error::Error for FrameError {}

fn lossy_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 22, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_full_frame() {
        let frame = r#"{
            "id": "c1b1b8f0-0000-4000-8000-000000000001",
            "source": "twitter",
            "payload": {"text": "Deployment successful", "user_id": 4242, "meta": "trace_123"},
            "analysis": {"sentiment": "Positive", "score": 0.8, "processing_time_ms": 1.2},
            "timestamp": "2024-01-22T10:00:01Z"
        }"#;

        let record = EventRecord::parse_at(frame, received()).unwrap();
        assert_eq!(record.id.as_str(), "c1b1b8f0-0000-4000-8000-000000000001");
        assert_eq!(record.source, "twitter");
        assert_eq!(record.payload.text.as_deref(), Some("Deployment successful"));
        assert_eq!(record.payload.user_id, Some(4242));
        assert_eq!(record.payload.meta.as_deref(), Some("trace_123"));
        assert_eq!(record.sentiment(), Some(Sentiment::Positive));
        assert!((record.score() - 0.8).abs() < 1e-9);
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 1).unwrap()
        );
    }

    #[test]
    fn test_missing_fields_degrade_to_defaults() {
        let record = EventRecord::parse_at("{}", received()).unwrap();
        assert_eq!(record.source, UNKNOWN_SOURCE);
        assert_eq!(record.timestamp, received());
        assert_eq!(record.payload, Payload::default());
        assert_eq!(record.analysis, Analysis::default());
        assert_eq!(record.score(), 0.0);
    }

    #[test]
    fn test_sentiment_is_case_sensitive() {
        let frame = r#"{"analysis": {"sentiment": "positive", "score": "high"}}"#;
        let record = EventRecord::parse_at(frame, received()).unwrap();
        assert_eq!(record.sentiment(), None);
        assert_eq!(record.analysis.score, None);
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(matches!(
            EventRecord::parse_at("not json", received()),
            Err(FrameError::InvalidJson(_))
        ));
        assert_eq!(
            EventRecord::parse_at("[1, 2]", received()),
            Err(FrameError::NotAnObject)
        );
    }

    #[test]
    fn test_derived_id_is_stable() {
        let frame = r#"{"source": "sensor-7", "timestamp": "2024-01-22T10:00:01Z", "payload": {"text": "hi"}}"#;
        let a = EventRecord::parse_at(frame, received()).unwrap();
        let b = EventRecord::parse_at(frame, received()).unwrap();
        assert_eq!(a.id, b.id);

        let other = r#"{"source": "sensor-8", "timestamp": "2024-01-22T10:00:01Z", "payload": {"text": "hi"}}"#;
        let c = EventRecord::parse_at(other, received()).unwrap();
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_non_string_meta_is_kept_as_json() {
        let frame = r#"{"payload": {"meta": {"region": "us-east-1"}, "user_id": "77"}}"#;
        let record = EventRecord::parse_at(frame, received()).unwrap();
        assert_eq!(
            record.payload.meta.as_deref(),
            Some(r#"{"region":"us-east-1"}"#)
        );
        assert_eq!(record.payload.user_id, Some(77));
    }
}
