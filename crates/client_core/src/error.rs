use shared::error::ApiException;
use thiserror::Error;

use crate::connection::ConnectionState;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("dispatch channel is not connected (state: {0})")]
    NotConnected(ConnectionState),
    #[error("no access token in session; sign in first")]
    MissingToken,
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write to dispatch channel: {0}")]
    Transport(String),
    #[error("failed to connect dispatch channel: {0}")]
    Connect(String),
}

#[derive(Debug, Error)]
pub enum ApiCallError {
    #[error(transparent)]
    Server(#[from] ApiException),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("not signed in")]
    Unauthenticated,
    #[error("session expired; sign in again")]
    SessionExpired,
}

impl ApiCallError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server(exception) => exception.status,
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read session file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write session file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("session file {path} is not valid json: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
}
