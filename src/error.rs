//! # Error Types
//!
//! Error taxonomy for the connector core and the protocol bindings.
//!
//! This module defines all error kinds that can surface from connector
//! operations, from parameter validation to acknowledgment timeouts.
//!
//! ## Error Categories
//! - **Configuration**: bad parameters, ambiguous adapter selection
//! - **Connection**: handshake and subscription failures during `connect()`
//! - **I/O**: send/receive failures on an established connection
//! - **Timeout**: bounded acknowledgment waits that expired
//! - **Serialization**: missing serializers, encode/decode failures
//!
//! Protocol-library-specific errors are caught at the binding boundary and
//! re-wrapped into one of these kinds before reaching the generic core; the
//! core never inspects library error types.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common cases.
pub mod constants {
    /// Pipeline construction errors
    pub const ERR_NO_ADAPTER: &str = "at least one protocol adapter must be given";
    pub const ERR_AMBIGUOUS_ADAPTER: &str =
        "multiple adapters configured but no selector supplied";

    /// Connection errors
    pub const ERR_NOT_CONNECTED: &str = "connector is not connected";
    pub const ERR_INBOUND_CLOSED: &str = "inbound dispatch queue closed";
    pub const ERR_ACK_CHANNEL_CLOSED: &str = "acknowledgment channel closed before resolution";

    /// Channel validation errors
    pub const ERR_EMPTY_CHANNEL: &str = "channel name must not be empty";
}

/// The primary error type for all connector operations.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Bad parameters or ambiguous adapter selection without a selector.
    /// Fatal, raised at construction/connect time, not retried.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Handshake or subscription failure. Surfaced to the caller of
    /// `connect()`; the connector remains disconnected and may be retried.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Send/receive failure on an established connection. Surfaced
    /// per-operation; does not change connection state.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport-level failure reported by a protocol binding.
    #[error("transport error: {0}")]
    Transport(String),

    /// An acknowledgment wait exceeded the configured action timeout.
    /// Surfaced to the blocking caller only.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// No serializer registered for a type. Raised on the outbound path,
    /// logged and dropped on the inbound path.
    #[error("no serializer registered for type {0}")]
    NotRegistered(&'static str),

    #[error("serialize error: {0}")]
    Serialize(String),

    #[error("deserialize error: {0}")]
    Deserialize(String),

    /// TLS setup failure. Bindings treat this as a soft failure during
    /// `connect()` and fall back to an unencrypted connection.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl ConnectorError {
    /// Wraps an arbitrary binding-level error into a [`ConnectorError::Connect`].
    pub fn connect(err: impl std::fmt::Display) -> Self {
        ConnectorError::Connect(err.to_string())
    }

    /// Wraps an arbitrary binding-level error into a [`ConnectorError::Transport`].
    pub fn transport(err: impl std::fmt::Display) -> Self {
        ConnectorError::Transport(err.to_string())
    }
}

/// Type alias for Results using ConnectorError
pub type Result<T> = std::result::Result<T, ConnectorError>;
