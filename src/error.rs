//! Error taxonomy shared by every stage of the acquisition pipeline.
//!
//! Stages pattern-match on [`ErrorKind`] to decide whether a failure goes
//! through retry scheduling or is escalated for human attention.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of failure, independent of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,     // Host unreachable or timeout - retry
    Authentication, // Bad credentials - attention, NO automatic retry
    NotConfigured,  // Missing configuration - attention, no network I/O attempted
    Client,         // Upstream application-level error - attention
    Validation,     // Bad configuration value - rejected at load time
    Storage,        // Local persistence failure
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::Client => "client",
            ErrorKind::Validation => "validation",
            ErrorKind::Storage => "storage",
        }
    }
}

/// Error returned by providers, download clients and pipeline stages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Client(String),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Connection(_) => ErrorKind::Connection,
            EngineError::Authentication(_) => ErrorKind::Authentication,
            EngineError::NotConfigured(_) => ErrorKind::NotConfigured,
            EngineError::Client(_) => ErrorKind::Client,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Returns true if the normal scheduling cycle should retry the work.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection)
    }

    /// Classify a transport-level reqwest error.
    ///
    /// `service` names the remote side for the message, e.g. "qBittorrent".
    pub fn from_reqwest(service: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Connection(format!("{} timed out: {}", service, err))
        } else if err.is_connect() || err.is_request() {
            EngineError::Connection(format!("Could not reach {}: {}", service, err))
        } else if err.is_decode() {
            EngineError::Client(format!("{} returned an unreadable response: {}", service, err))
        } else if let Some(status) = err.status() {
            Self::from_status(service, status, &err.to_string())
        } else {
            EngineError::Connection(format!("{} request failed: {}", service, err))
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let body = body.trim();
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            format!("{} ({})", status, truncate(body, 200))
        };
        match status.as_u16() {
            401 | 403 => EngineError::Authentication(format!("{} rejected credentials: {}", service, detail)),
            408 | 502 | 503 | 504 => EngineError::Connection(format!("{} unavailable: {}", service, detail)),
            _ => EngineError::Client(format!("{} returned an error: {}", service, detail)),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Storage(format!("{:#}", err))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
