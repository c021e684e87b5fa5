use reqwest::StatusCode;
use serde::ser::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{operation} failed with status {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to parse response: {0}")]
    Serialization(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    /// Whether retrying the same call has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Network(_) => true,
            BackendError::Api { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            BackendError::Serialization(_)
            | BackendError::NotFound(_)
            | BackendError::InvalidRequest(_) => false,
        }
    }
}

impl Serialize for BackendError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return BackendError::Api {
                operation: "backend request".to_string(),
                status: status.as_u16(),
                message: error.to_string(),
            };
        }

        if error.is_timeout() {
            return BackendError::Network("request timed out".to_string());
        }

        if error.is_connect() {
            return BackendError::Network("failed to connect to backend".to_string());
        }

        if error.is_decode() {
            return BackendError::Serialization(error.to_string());
        }

        BackendError::Network(error.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(error: serde_json::Error) -> Self {
        BackendError::Serialization(error.to_string())
    }
}

/// Turns a non-success response into a `BackendError`, preferring the
/// backend's `detail` field over `error` and `message`.
pub(crate) async fn map_api_error(response: reqwest::Response, operation: &str) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_message(&body);

    if status == StatusCode::NOT_FOUND {
        BackendError::NotFound(message)
    } else {
        warn!(
            operation = %operation,
            status = %status,
            message = %message,
            "received error response from backend"
        );
        BackendError::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            message,
        }
    }
}

fn extract_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "error", "message"].iter().find_map(|key| {
                value
                    .get(*key)
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
            })
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "unknown error".to_string()
            } else {
                body.to_string()
            }
        })
}
