// DME Collector - Telemetry collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the DME collector

use crate::transport::TransportKind;
use dme::{ErrorStatus, SecurityError, SessionError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to read from a transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// No answer in time
    #[error("{transport} transport timed out after {after:?}")]
    Timeout {
        transport: TransportKind,
        after: Duration,
    },

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host name did not resolve
    #[error("Could not resolve {0}")]
    Resolve(String),

    /// HTTP client failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unsuccessful HTTP status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Agent answered with a security report
    #[error("Rejected by agent: {0}")]
    Rejected(SecurityError),

    /// Agent answered with an error status
    #[error("Agent returned {status:?} at index {index}")]
    ErrorStatus { status: ErrorStatus, index: u16 },

    /// Answer could not be understood
    #[error("Malformed answer: {0}")]
    Malformed(String),

    /// Local protocol failure
    #[error("Session error: {0}")]
    Session(SessionError),
}

impl TransportError {
    /// Whether another attempt may succeed
    ///
    /// Timeouts, I/O, 5xx/429 and rejections fixed by rediscovery are
    /// transient; everything else is a protocol rejection.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout { .. }
            | TransportError::Io(_)
            | TransportError::Resolve(_) => true,
            TransportError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().map_or(false, |s| s.is_server_error())
            }
            TransportError::Status(code) => *code == 429 || (500..600).contains(code),
            TransportError::Rejected(error) => matches!(
                error,
                SecurityError::NotInTimeWindow | SecurityError::UnknownEngineId
            ),
            TransportError::ErrorStatus { .. }
            | TransportError::Malformed(_)
            | TransportError::Session(_) => false,
        }
    }
}

impl From<SessionError> for TransportError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Report(e) => TransportError::Rejected(e),
            SessionError::Decode(e) => TransportError::Malformed(e.to_string()),
            other => TransportError::Session(other),
        }
    }
}

/// Failure to append to the durable log
#[derive(Error, Debug)]
pub enum PersistError {
    /// File system failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Row could not be rendered
    #[error("Encoding error: {0}")]
    Encode(String),
}

/// Failure to deliver to the streaming sink
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Connect or write did not finish in time
    #[error("Sink timed out after {0:?}")]
    Timeout(Duration),

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be serialized
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Invalid collector configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an unusable value
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Main error type for collector operations
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Transport could not be set up
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;
