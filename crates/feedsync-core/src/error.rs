//! Error types for feedsync.
//!
//! Most engine operations are deliberately non-failing (see the session
//! crate); these errors cover caller mistakes, host failures and setup.

use thiserror::Error;

use crate::model::{ModelError, TokenId};
use crate::session::SessionId;

/// Result type alias using the feedsync [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for feedsync.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fetch error with structured details
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// The session is unknown or has been invalidated
    #[error("Session {0} is invalidated")]
    SessionInvalidated(SessionId),

    /// The session has not finished initializing
    #[error("Session {0} is not ready")]
    SessionNotReady(SessionId),

    /// The token was already consumed or never belonged to the session
    #[error("Unknown token {token} for session {session}")]
    UnknownToken { session: SessionId, token: TokenId },

    /// Reported to an observer instead of a page
    #[error("{0}")]
    Model(ModelError),

    /// Payload store error
    #[error("Store error: {0}")]
    Store(String),

    /// The engine's task queue has shut down
    #[error("Engine is shut down")]
    EngineShutDown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/feedsync/config.toml"),
            Error::Fetch(e) => e.recovery_suggestion(),
            Error::SessionInvalidated(_) => Some("Create a new session; invalidated sessions cannot resume"),
            Error::SessionNotReady(_) => Some("Wait for on_session_start before reading the session"),
            Error::UnknownToken { .. } => Some("Tokens are single-use; take the next token from the latest cursor"),
            Error::EngineShutDown => Some("The engine was dropped; start a new one"),
            _ => None,
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Error::Store(message.into())
    }
}

/// Failures reported by a [`crate::host::ContentFetcher`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network failure
    #[error("Network error: {message}")]
    Network { message: String },

    /// The server answered with an error status
    #[error("Server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// Request timed out
    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The response could not be turned into a mutation batch
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The fetcher has nothing to serve for this request
    #[error("No content available: {0}")]
    Unavailable(String),
}

impl FetchError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
            FetchError::Server { status, .. } => *status == 429 || (500..=599).contains(status),
            FetchError::Malformed(_) | FetchError::Unavailable(_) => false,
        }
    }

    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            FetchError::Network { .. } => Some("Check your internet connection"),
            FetchError::Server { status: 429, .. } => Some("Rate limited. Wait a moment and try again"),
            FetchError::Server {
                status: 500..=599, ..
            } => Some("The feed service is having issues. Try again later"),
            FetchError::Timeout { .. } => Some("Try again or raise refresh.timeout_ms"),
            _ => None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        FetchError::Network {
            message: message.into(),
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::network("reset").is_retryable());
        assert!(FetchError::Server { status: 503, message: "down".into() }.is_retryable());
        assert!(!FetchError::Server { status: 404, message: "gone".into() }.is_retryable());
        assert!(!FetchError::Malformed("bad".into()).is_retryable());
    }

    #[test]
    fn test_unknown_token_message() {
        let err = Error::UnknownToken {
            session: SessionId::from("abc"),
            token: TokenId::Real(crate::content::ContentId::token("s", 1)),
        };
        assert!(err.to_string().contains("token::s::1"));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_format_with_suggestion() {
        let err: Error = FetchError::Server { status: 429, message: "slow down".into() }.into();
        let text = format_error_with_suggestion(&err);
        assert!(text.contains("429"));
        assert!(text.contains("Suggestion"));
    }
}
