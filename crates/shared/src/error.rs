use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
    Unavailable,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorCode::Validation,
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            429 => ErrorCode::RateLimited,
            502..=504 => ErrorCode::Unavailable,
            _ => ErrorCode::Internal,
        }
    }
}

/// Failure surfaced by the remote collection client. Carries whatever the
/// server told us so the view can show something better than "it failed".
#[derive(Debug, Clone, Error)]
pub enum FetchFailure {
    #[error("server responded {status} {status_text}")]
    Status {
        status: u16,
        status_text: String,
        body: Option<Value>,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl FetchFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchFailure::Status { status, .. } => Some(*status),
            FetchFailure::Transport(_) | FetchFailure::Decode(_) => None,
        }
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            FetchFailure::Status { body, .. } => body.as_ref(),
            FetchFailure::Transport(_) | FetchFailure::Decode(_) => None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            FetchFailure::Status { status, .. } => ErrorCode::from_status(*status),
            FetchFailure::Transport(_) => ErrorCode::Unavailable,
            FetchFailure::Decode(_) => ErrorCode::Internal,
        }
    }

    /// Text suitable for a user-facing notification. Prefers the server's
    /// `detail` message, then a wording picked by [`ErrorCode`].
    pub fn notification(&self, context: &str) -> String {
        let detail = self
            .body()
            .and_then(|body| body.get("detail"))
            .and_then(Value::as_str);
        if let Some(detail) = detail {
            return format!("{context}: {detail}");
        }
        match self.code() {
            ErrorCode::Unauthorized => format!("{context}: you are not logged in"),
            ErrorCode::Forbidden => format!("{context}: you do not have permission"),
            ErrorCode::NotFound => format!("{context}: not found"),
            ErrorCode::RateLimited => format!("{context}: too many requests, try again later"),
            ErrorCode::Unavailable => format!("{context}: server unavailable ({self})"),
            ErrorCode::Validation | ErrorCode::Internal => format!("{context}: {self}"),
        }
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
