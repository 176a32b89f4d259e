// DME Agent - Telemetry simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the DME agent

use std::net::SocketAddr;
use thiserror::Error;

/// Invalid agent configuration
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

/// Main error type for agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A server could not bind its port
    #[error("Failed to bind {transport} server on {addr}: {source}")]
    Bind {
        transport: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while serving
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
