use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body used by the backend for both `{"action": "error"}` frames and non-2xx
/// HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("server error: {message}")]
pub struct ApiException {
    pub status: Option<u16>,
    pub message: String,
}

impl ApiException {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ApiException> for ApiError {
    fn from(value: ApiException) -> Self {
        Self {
            message: value.message,
        }
    }
}
