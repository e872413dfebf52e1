//! Command, query and response envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Params = Map<String, Value>;

/// A request to change coordinator state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub params: Params,
}

/// A read-only request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    pub query: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessage {
    pub message_id: String,
    /// The inbound `message_id`, when there was one.
    pub correlation_id: Option<String>,
    pub status: ResponseStatus,
    pub payload: Value,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ResponseMessage {
    pub fn success(payload: Value) -> Self {
        Self::new(ResponseStatus::Success, payload)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::new(
            ResponseStatus::Failed,
            serde_json::json!({ "error": error.into() }),
        )
    }

    fn new(status: ResponseStatus, payload: Value) -> Self {
        Self {
            message_id: ulid::Ulid::new().to_string(),
            correlation_id: None,
            status,
            payload,
            sender_id: String::new(),
            receiver_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn correlated(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn from_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    pub fn to_receiver(mut self, receiver_id: Option<String>) -> Self {
        self.receiver_id = receiver_id;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// The `"error"` string of a failed response.
    pub fn error(&self) -> Option<&str> {
        self.payload.get("error").and_then(Value::as_str)
    }
}

/// A decoded inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Command(CommandMessage),
    Query(QueryMessage),
}

/// Identity of a message that could not be decoded, salvaged for the reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Salvaged {
    pub message_id: Option<String>,
    pub sender_id: Option<String>,
}

impl InboundMessage {
    /// A `command` key makes a command, otherwise a `query` key makes a query.
    pub fn decode(raw: &Value) -> Result<Self, Salvaged> {
        let salvaged = || Salvaged {
            message_id: raw.get("message_id").and_then(Value::as_str).map(String::from),
            sender_id: raw.get("sender_id").and_then(Value::as_str).map(String::from),
        };

        let Some(object) = raw.as_object() else {
            return Err(Salvaged::default());
        };
        if object.contains_key("command") {
            serde_json::from_value(raw.clone())
                .map(InboundMessage::Command)
                .map_err(|e| {
                    tracing::debug!("Undecodable command envelope: {}", e);
                    salvaged()
                })
        } else if object.contains_key("query") {
            serde_json::from_value(raw.clone())
                .map(InboundMessage::Query)
                .map_err(|e| {
                    tracing::debug!("Undecodable query envelope: {}", e);
                    salvaged()
                })
        } else {
            Err(salvaged())
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            InboundMessage::Command(c) => c.message_id.as_deref(),
            InboundMessage::Query(q) => q.message_id.as_deref(),
        }
    }

    pub fn sender_id(&self) -> Option<&str> {
        match self {
            InboundMessage::Command(c) => c.sender_id.as_deref(),
            InboundMessage::Query(q) => q.sender_id.as_deref(),
        }
    }
}
