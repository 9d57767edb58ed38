//! Error taxonomy for the session engine.
//!
//! Every rejected operation carries a stable [`ErrorKind`] alongside a
//! human-readable message. `Unauthorized` is never folded into `NotFound`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{SessionId, UserId};

/// Stable, machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    UserAlreadyActive,
    NotActive,
    NotPaused,
    SessionTerminal,
    SessionInterrupted,
    TemplateNotFound,
    InvalidTemplate,
    InvalidDuration,
    NoRuntime,
    Io,
    Json,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::UserAlreadyActive => "user_already_active",
            ErrorKind::NotActive => "not_active",
            ErrorKind::NotPaused => "not_paused",
            ErrorKind::SessionTerminal => "session_terminal",
            ErrorKind::SessionInterrupted => "session_interrupted",
            ErrorKind::TemplateNotFound => "template_not_found",
            ErrorKind::InvalidTemplate => "invalid_template",
            ErrorKind::InvalidDuration => "invalid_duration",
            ErrorKind::NoRuntime => "no_runtime",
            ErrorKind::Io => "io",
            ErrorKind::Json => "json",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session {session_id} does not belong to user {user_id}")]
    Unauthorized {
        session_id: SessionId,
        user_id: UserId,
    },

    #[error("User {user_id} already has an active session: {existing}")]
    UserAlreadyActive {
        user_id: UserId,
        existing: SessionId,
    },

    #[error("Session is not active: {0}")]
    NotActive(SessionId),

    #[error("Session is not paused: {0}")]
    NotPaused(SessionId),

    #[error("Session has already finished: {0}")]
    SessionTerminal(SessionId),

    #[error("Session was stopped by its interrupt token: {0}")]
    SessionInterrupted(SessionId),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("No tokio runtime available to drive session timers")]
    NoRuntime,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Unauthorized { .. } => ErrorKind::Unauthorized,
            EngineError::UserAlreadyActive { .. } => ErrorKind::UserAlreadyActive,
            EngineError::NotActive(_) => ErrorKind::NotActive,
            EngineError::NotPaused(_) => ErrorKind::NotPaused,
            EngineError::SessionTerminal(_) => ErrorKind::SessionTerminal,
            EngineError::SessionInterrupted(_) => ErrorKind::SessionInterrupted,
            EngineError::TemplateNotFound(_) => ErrorKind::TemplateNotFound,
            EngineError::InvalidTemplate(_) => ErrorKind::InvalidTemplate,
            EngineError::InvalidDuration(_) => ErrorKind::InvalidDuration,
            EngineError::NoRuntime => ErrorKind::NoRuntime,
            EngineError::Io(_) => ErrorKind::Io,
            EngineError::Json(_) => ErrorKind::Json,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_and_unauthorized_are_distinct_kinds() {
        let not_found = EngineError::NotFound(SessionId("s-1".to_string()));
        let unauthorized = EngineError::Unauthorized {
            session_id: SessionId("s-1".to_string()),
            user_id: UserId("mallory".to_string()),
        };
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(unauthorized.kind(), ErrorKind::Unauthorized);
        assert_ne!(not_found.kind(), unauthorized.kind());
    }

    #[test]
    fn messages_name_the_offending_ids() {
        let error = EngineError::UserAlreadyActive {
            user_id: UserId("alice".to_string()),
            existing: SessionId("s-42".to_string()),
        };
        let message = error.to_string();
        assert!(message.contains("alice"));
        assert!(message.contains("s-42"));
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UserAlreadyActive).unwrap();
        assert_eq!(json, "\"user_already_active\"");
        assert_eq!(ErrorKind::SessionInterrupted.to_string(), "session_interrupted");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: EngineError = io.into();
        assert_eq!(error.kind(), ErrorKind::Io);
    }
}
