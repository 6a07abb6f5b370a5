//! Wire format of correlated queue messages (JSON, camelCase)
//!
//! ```json
//! {"correlationId": "…", "payload": {"query": "ping"}, "createdAt": "2025-01-01T00:00:00Z", "requester": "cli"}
//! {"correlationId": "…", "payload": "pong", "createdAt": "…", "status": "ok", "processingMs": 12}
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DeployError, Result};

/// Request sent by a `Requester`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub correlation_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

impl RequestEnvelope {
    /// New request with a fresh UUID v4 correlation id
    pub fn new(payload: Value) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            payload,
            created_at: Utc::now(),
            requester: None,
        }
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn to_json(&self) -> Result<String> {
        to_json(self)
    }

    pub fn from_json(body: &str) -> Result<Self> {
        let request: Self = from_json(body)?;
        require_correlation_id(&request.correlation_id)?;
        Ok(request)
    }
}

/// Outcome reported by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Response sent by a `Worker`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub correlation_id: String,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<u64>,
}

impl ResponseEnvelope {
    pub fn ok(correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload,
            created_at: Utc::now(),
            status: ResponseStatus::Ok,
            error: None,
            processing_ms: None,
        }
    }

    pub fn error(correlation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: Value::Null,
            created_at: Utc::now(),
            status: ResponseStatus::Error,
            error: Some(error.into()),
            processing_ms: None,
        }
    }

    pub fn with_processing_ms(mut self, processing_ms: u64) -> Self {
        self.processing_ms = Some(processing_ms);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Payload of an ok response, or a `Handler` error
    pub fn into_result(self) -> Result<Value> {
        match self.status {
            ResponseStatus::Ok => Ok(self.payload),
            ResponseStatus::Error => Err(DeployError::Handler {
                correlation_id: self.correlation_id,
                reason: self.error.unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        to_json(self)
    }

    pub fn from_json(body: &str) -> Result<Self> {
        let response: Self = from_json(body)?;
        require_correlation_id(&response.correlation_id)?;
        Ok(response)
    }
}

fn to_json<T: Serialize>(message: &T) -> Result<String> {
    serde_json::to_string(message).map_err(|e| DeployError::InvalidMessage {
        reason: e.to_string(),
    })
}

fn from_json<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| DeployError::InvalidMessage {
        reason: e.to_string(),
    })
}

fn require_correlation_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(DeployError::InvalidMessage {
            reason: "empty correlationId".to_string(),
        });
    }
    Ok(())
}
