//! Error types for the DME telemetry model
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for DME operations
pub type Result<T> = std::result::Result<T, DmeError>;

/// Main error type for DME operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DmeError {
    /// Schema construction error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Metric store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Wire decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Security processing error
    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    /// Client session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Errors while building a metric set
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// OID text could not be parsed
    #[error("Invalid OID: {0:?}")]
    InvalidOid(String),

    /// Two metrics share an OID
    #[error("Duplicate OID: {0}")]
    DuplicateOid(String),

    /// Two metrics share a name
    #[error("Duplicate metric name: {0}")]
    DuplicateName(String),

    /// Declared range is empty
    #[error("Empty range for {name}: [{min}, {max}]")]
    EmptyRange { name: String, min: i64, max: i64 },

    /// Initial value lies outside the declared range
    #[error("Initial value {value} of {name} outside [{min}, {max}]")]
    InitialOutOfRange {
        name: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// Random-walk step bound is negative
    #[error("Negative step {step} for {name}")]
    NegativeStep { name: String, step: i64 },
}

/// Errors from the metric store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No metric with this identifier
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
}

/// Errors during decoding of secured-transport messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer too short
    #[error("Buffer too short: need at least {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Unsupported envelope version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Unknown PDU tag
    #[error("Unknown PDU type: 0x{0:02x}")]
    UnknownPduType(u8),

    /// Unknown value tag
    #[error("Unknown value type: 0x{0:02x}")]
    UnknownValueType(u8),

    /// Unknown error status
    #[error("Unknown error status: {0}")]
    UnknownErrorStatus(u8),

    /// Malformed content
    #[error("Malformed message at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    /// Bytes left over after a complete message
    #[error("Trailing data: {0} bytes")]
    TrailingData(usize),
}

/// Security rejections, mirroring the usmStats counters of an SNMPv3 engine
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityError {
    /// Message security level below what the principal requires
    #[error("Unsupported security level")]
    UnsupportedSecLevel,

    /// Message arrived outside the engine time window
    #[error("Message not in time window")]
    NotInTimeWindow,

    /// Principal is not configured on the engine
    #[error("Unknown user name")]
    UnknownUserName,

    /// Engine id does not match (also used for discovery)
    #[error("Unknown engine id")]
    UnknownEngineId,

    /// Authentication digest mismatch
    #[error("Wrong digest")]
    WrongDigest,

    /// Privacy layer failed to decrypt
    #[error("Decryption error")]
    DecryptionError,

    /// Privacy layer failed to encrypt an outgoing message
    #[error("Encryption error")]
    EncryptionError,

    /// A header field does not fit its length prefix
    #[error("{field} longer than {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },

    /// An engine cannot own the empty id reserved for discovery
    #[error("Empty engine id")]
    EmptyEngineId,
}

/// Errors of a client session on the secured transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Request attempted before engine discovery
    #[error("Engine not discovered")]
    NotDiscovered,

    /// Answer could not be decoded
    #[error("Undecodable answer: {0}")]
    Decode(#[from] DecodeError),

    /// Agent rejected the request with a report
    #[error("Rejected by agent: {0}")]
    Report(SecurityError),

    /// Answer failed local security checks
    #[error("Answer failed security checks: {0}")]
    Security(SecurityError),

    /// Answer does not belong to the outstanding request
    #[error("Unexpected message: {0}")]
    Unexpected(String),
}
