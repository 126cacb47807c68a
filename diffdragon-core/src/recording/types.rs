use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header used to propagate a delivery's correlation id to outbound requests.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// One line of the recording log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// RFC 3339
    pub timestamp: String,
    pub correlation_id: String,
    pub event_type: EventType,
    pub direction: Direction,
    /// e.g. `webhook`, `GET /repos/o/r/pulls/1/files`, `response_200`
    pub operation: String,
    /// Already sanitised.
    pub data: serde_json::Value,
    pub metadata: HashMap<String, String>,
}

impl RecordedEvent {
    pub fn now(
        correlation_id: &CorrelationId,
        event_type: EventType,
        direction: Direction,
        operation: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.0.clone(),
            event_type,
            direction,
            operation: operation.into(),
            data,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    WebhookReceived,
    GitHubApiCall,
    OpenAiApiCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Request,
    Response,
}

/// Which upstream a recorded HTTP client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    GitHub,
    OpenAi,
}

impl ServiceType {
    pub fn event_type(self) -> EventType {
        match self {
            Self::GitHub => EventType::GitHubApiCall,
            Self::OpenAi => EventType::OpenAiApiCall,
        }
    }
}

/// Identifies every log line and outbound request belonging to one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
