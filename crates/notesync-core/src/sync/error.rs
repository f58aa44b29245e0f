//! Transport-level sync failures.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::util::compact_text;

/// Failure talking to the remote store.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync is not configured: {0}")]
    NotConfigured(String),
    #[error("Sync HTTP request failed: {0}")]
    Network(String),
    #[error("Remote store rejected the credentials: {0}")]
    Unauthorized(String),
    #[error("Remote note not found: {0}")]
    NotFound(String),
    #[error("Remote store error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Malformed sync payload: {0}")]
    InvalidPayload(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Whether a later retry of the same request may succeed
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Classify a non-success response.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let message = parse_api_error(body).unwrap_or_else(|| {
            let trimmed = compact_text(body);
            if trimmed.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                trimmed
            }
        });

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(message),
            StatusCode::NOT_FOUND => Self::NotFound(message),
            _ => Self::Api {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidPayload(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(body: &str) -> Option<String> {
    let payload = serde_json::from_str::<ApiErrorBody>(body).ok()?;
    payload
        .message
        .or(payload.error)
        .map(|message| compact_text(&message))
        .filter(|message| !message.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert!(matches!(
            SyncError::from_response(StatusCode::UNAUTHORIZED, r#"{"message":"Invalid token"}"#),
            SyncError::Unauthorized(message) if message == "Invalid token"
        ));
        assert!(matches!(
            SyncError::from_response(StatusCode::NOT_FOUND, ""),
            SyncError::NotFound(message) if message == "HTTP 404"
        ));
        assert!(matches!(
            SyncError::from_response(StatusCode::BAD_GATEWAY, "upstream down"),
            SyncError::Api { status: 502, message } if message == "upstream down"
        ));
    }

    #[test]
    fn transient_errors() {
        assert!(SyncError::Network("reset".to_string()).is_transient());
        assert!(SyncError::Api {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!SyncError::Unauthorized(String::new()).is_transient());
        assert!(!SyncError::InvalidPayload(String::new()).is_transient());
    }
}
