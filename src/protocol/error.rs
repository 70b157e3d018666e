//! Error types for the OVSDB client.
//!
//! Errors fall into four classes:
//!
//! 1. local validation (schema drift, type and constraint checks), raised
//!    before anything touches the network and always recoverable by the caller
//! 2. operation errors, which are *data* carried inside an
//!    [`OperationResult`](crate::operations::OperationResult), never a variant here
//! 3. transport errors (connection loss, timeouts, malformed frames)
//! 4. protocol violations, which are logged and dropped by the transport and
//!    therefore never surface as an error value

use serde::{Deserialize, Serialize};

/// OVSDB client error type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum OvsdbError {
    // Local validation errors
    /// A table or column the caller expects is absent from the live schema,
    /// or the live schema version is outside the range a typed field supports.
    #[error("Schema version mismatch on {}: {detail}", describe_target(.table, .column.as_deref()))]
    SchemaVersionMismatch {
        table: String,
        column: Option<String>,
        detail: String,
    },

    /// Value shape or base type does not match the column type
    #[error("Type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    /// Value has the right type but violates a column constraint (enum, range, length, cardinality)
    #[error("Constraint violation for column '{column}': {message}")]
    ConstraintViolation { column: String, message: String },

    /// Schema document could not be interpreted
    #[error("Invalid schema: {message}")]
    InvalidSchema { message: String },

    // Transport errors
    /// The transport is closed; no new calls are accepted
    #[error("Transport is closed")]
    TransportClosed,

    /// The connection dropped while the call was pending
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// Connection could not be established
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },

    /// No response arrived within the configured request timeout
    #[error("Call '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// Inbound bytes or a response payload could not be interpreted
    #[error("Malformed message: {message}")]
    MalformedMessage { message: String },

    /// The server answered the call with a JSON-RPC error
    #[error("Server rejected '{method}': {error}{}", .details.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Rpc {
        method: String,
        error: String,
        details: Option<String>,
    },

    // Serialization Errors
    /// Outbound message could not be encoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// IO error on the underlying stream
    #[error("IO error: {message}")]
    Io { message: String },
}

/// Result alias used throughout the crate.
pub type OvsdbResult<T> = Result<T, OvsdbError>;

fn describe_target(table: &str, column: Option<&str>) -> String {
    match column {
        Some(column) => format!("column '{column}' of table '{table}'"),
        None => format!("table '{table}'"),
    }
}

impl OvsdbError {
    /// Shorthand for a missing table.
    pub fn missing_table(table: &str, schema_version: &str) -> Self {
        OvsdbError::SchemaVersionMismatch {
            table: table.to_string(),
            column: None,
            detail: format!("not present in schema version {schema_version}"),
        }
    }

    /// Shorthand for a missing column.
    pub fn missing_column(table: &str, column: &str, schema_version: &str) -> Self {
        OvsdbError::SchemaVersionMismatch {
            table: table.to_string(),
            column: Some(column.to_string()),
            detail: format!("not present in schema version {schema_version}"),
        }
    }

    /// Local validation errors: raised before any network call and safe to
    /// handle by skipping the offending mutation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OvsdbError::SchemaVersionMismatch { .. }
                | OvsdbError::TypeMismatch { .. }
                | OvsdbError::ConstraintViolation { .. }
        )
    }

    /// Errors that mean the connection is unusable (or the call's fate is unknown).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            OvsdbError::TransportClosed
                | OvsdbError::ConnectionLost { .. }
                | OvsdbError::ConnectionFailed { .. }
                | OvsdbError::Timeout { .. }
                | OvsdbError::MalformedMessage { .. }
                | OvsdbError::Io { .. }
        )
    }
}

impl From<serde_json::Error> for OvsdbError {
    fn from(e: serde_json::Error) -> Self {
        OvsdbError::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for OvsdbError {
    fn from(e: std::io::Error) -> Self {
        OvsdbError::Io {
            message: e.to_string(),
        }
    }
}
