use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Open key/value payload carried by every envelope.
pub type Payload = Map<String, Value>;

/// Wrap an arbitrary JSON value as a payload. Objects are used as-is,
/// anything else lands under a `value` key.
pub fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Streaming,
    Complete,
    Error,
    Stopped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "streaming" => Some(Self::Streaming),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Map a backend-specific event type (`task_streaming`, `crew_complete`,
    /// `graph_error`, ...) onto one of the four kinds.
    pub fn normalize(raw: &str) -> Option<Self> {
        if let Some(kind) = Self::parse(raw) {
            return Some(kind);
        }

        let lower = raw.to_lowercase();
        if lower.contains("stream") {
            Some(Self::Streaming)
        } else if lower.contains("complete") || lower.contains("done") {
            Some(Self::Complete)
        } else if lower.contains("error") || lower.contains("fail") {
            Some(Self::Error)
        } else if lower.contains("stop") || lower.contains("cancel") {
            Some(Self::Stopped)
        } else {
            None
        }
    }

    /// Whether this kind ends a unit's sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// Classification carried in the `error_type` field of `error` envelopes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The unit reported a problem itself.
    PluginError,
    /// The unit crashed or failed in a way it did not report.
    UnexpectedError,
    /// The runner feeding the unit's events failed.
    TaskError,
    /// The unit finished without emitting a terminal envelope.
    IncompleteStream,
    /// The request was rejected before any unit started.
    ValidationError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PluginError => "plugin_error",
            Self::UnexpectedError => "unexpected_error",
            Self::TaskError => "task_error",
            Self::IncompleteStream => "incomplete_stream",
            Self::ValidationError => "validation_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plugin_error" => Some(Self::PluginError),
            "unexpected_error" => Some(Self::UnexpectedError),
            "task_error" => Some(Self::TaskError),
            "incomplete_stream" => Some(Self::IncompleteStream),
            "validation_error" => Some(Self::ValidationError),
            _ => None,
        }
    }
}

/// Normalized progress record emitted by units of work and forwarded
/// unchanged to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Unit of work that emitted (or was the subject of) the event
    pub unit_name: String,
    pub kind: EventKind,
    /// Sub-task the event belongs to
    pub granularity: String,
    pub payload: Payload,
    pub emitted_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Create a new envelope with auto-generated ID and timestamp
    pub fn new(
        unit_name: impl Into<String>,
        kind: EventKind,
        granularity: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            unit_name: unit_name.into(),
            kind,
            granularity: granularity.into(),
            payload,
            emitted_at: Utc::now(),
        }
    }

    pub fn streaming(
        unit_name: impl Into<String>,
        granularity: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::new(unit_name, EventKind::Streaming, granularity, payload)
    }

    pub fn complete(
        unit_name: impl Into<String>,
        granularity: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::new(unit_name, EventKind::Complete, granularity, payload)
    }

    /// Error envelope with the standard `error` / `error_type` / `component`
    /// payload fields.
    pub fn error(
        unit_name: impl Into<String>,
        granularity: impl Into<String>,
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> Self {
        let granularity = granularity.into();
        let mut payload = Payload::new();
        payload.insert("error".to_string(), Value::String(message.into()));
        payload.insert(
            "error_type".to_string(),
            Value::String(error_type.as_str().to_string()),
        );
        payload.insert("component".to_string(), Value::String(granularity.clone()));
        Self::new(unit_name, EventKind::Error, granularity, payload)
    }

    pub fn stopped(
        unit_name: impl Into<String>,
        granularity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut payload = Payload::new();
        payload.insert("message".to_string(), Value::String(message.into()));
        Self::new(unit_name, EventKind::Stopped, granularity, payload)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// `error_type` of an error envelope.
    pub fn error_type(&self) -> Option<ErrorType> {
        self.payload
            .get("error_type")
            .and_then(Value::as_str)
            .and_then(ErrorType::parse)
    }

    /// Human-readable message: `error` for error envelopes, `message` otherwise.
    pub fn message(&self) -> Option<&str> {
        let key = match self.kind {
            EventKind::Error => "error",
            _ => "message",
        };
        self.payload.get(key).and_then(Value::as_str)
    }
}
