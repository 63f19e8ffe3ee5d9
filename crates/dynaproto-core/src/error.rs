//! Error types for the dynaproto-core library.
//!
//! Every failure mode of loading, marshalling and calling is a variant of
//! [`Error`]. Load-time errors (parse, duplicate, unresolved) are collected
//! into a report instead of aborting the batch; marshalling and wire errors
//! are the outcome of a single call.

use std::time::Duration;
use thiserror::Error;

use crate::transport::status::Code;

/// Result type alias for dynaproto operations
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong below the protocol layer.
///
/// Callers use this to suggest distinct remediation: a connect failure
/// points at connectivity, an HTTP status at the server or a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportFailure {
    /// The request could not be built (bad URL, bad header)
    Request,
    /// The connection could not be established
    Connect,
    /// The HTTP client gave up waiting
    Timeout,
    /// The server answered with a non-success HTTP status
    HttpStatus(u16),
    /// The response body could not be read
    Body,
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportFailure::Request => f.write_str("request"),
            TransportFailure::Connect => f.write_str("connect"),
            TransportFailure::Timeout => f.write_str("timeout"),
            TransportFailure::HttpStatus(code) => write!(f, "http status {}", code),
            TransportFailure::Body => f.write_str("body"),
        }
    }
}

/// Comprehensive error type for all dynaproto operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed IDL in one source unit
    #[error("{unit}:{line}:{column}: {message}")]
    Parse {
        /// Identity of the source unit
        unit: String,
        /// 1-based line, 0 when unknown
        line: usize,
        /// 1-based column, 0 when unknown
        column: usize,
        /// Description of the problem
        message: String,
    },

    /// A fully-qualified name was declared twice
    #[error("{unit}: '{name}' is already declared in '{existing}'")]
    DuplicateDeclaration {
        /// Identity of the rejected source unit
        unit: String,
        /// The colliding fully-qualified name
        name: String,
        /// Identity of the unit that declared it first
        existing: String,
    },

    /// A field or method type never resolved
    #[error("unresolved type '{type_name}' referenced by '{scope}.{member}'")]
    UnresolvedReference {
        /// Fully-qualified name of the enclosing message or service
        scope: String,
        /// Field or method name
        member: String,
        /// The type token as written
        type_name: String,
    },

    /// Input value does not match a message shape
    #[error("invalid value at '{path}': {message}")]
    Validation {
        /// Dotted/indexed path of the offending field
        path: String,
        /// Description of the mismatch
        message: String,
    },

    /// Non-zero grpc status in response headers or trailers
    #[error("{}: {message}", .code.name())]
    Status {
        /// Status code as received
        code: Code,
        /// Percent-decoded status message
        message: String,
    },

    /// Response body could not be split into frames
    #[error("malformed response: {details}")]
    MalformedResponse {
        /// Description of the framing problem
        details: String,
    },

    /// Network or HTTP failure below the protocol layer
    #[error("transport error ({kind}): {message}")]
    Transport {
        /// Failure classification
        kind: TransportFailure,
        /// Description from the HTTP client
        message: String,
    },

    /// The caller's cancellation token fired
    #[error("call cancelled")]
    Cancelled,

    /// The per-call timeout elapsed
    #[error("call exceeded deadline of {timeout:?}")]
    DeadlineExceeded {
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// Invalid protobuf wire format
    #[error("invalid protobuf wire format at offset {offset}: {details}")]
    InvalidWireFormat {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Message name not present in the schema
    #[error("unknown message type '{0}'")]
    UnknownMessage(String),

    /// Method path not present in the schema
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    /// Failed to build a descriptor set or pool
    #[error("failed to build file descriptor: {0}")]
    DescriptorBuild(String),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new parse error
    pub fn parse(
        unit: impl Into<String>,
        (line, column): (usize, usize),
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            unit: unit.into(),
            line,
            column,
            message: message.into(),
        }
    }

    /// Creates a new validation error
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new status error
    pub fn status(code: impl Into<Code>, message: impl Into<String>) -> Self {
        Self::Status {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a new malformed response error
    pub fn malformed_response(details: impl Into<String>) -> Self {
        Self::MalformedResponse {
            details: details.into(),
        }
    }

    /// Creates a new transport error
    pub fn transport(kind: TransportFailure, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Creates a new wire format error
    pub fn invalid_wire_format(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidWireFormat {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new descriptor build error
    pub fn descriptor_build(msg: impl Into<String>) -> Self {
        Self::DescriptorBuild(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true for errors raised by the grpc-web protocol layer
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::MalformedResponse { .. })
    }

    /// Returns true for network/HTTP failures
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns true for load-time errors that only affect one unit or field
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::DuplicateDeclaration { .. } | Self::UnresolvedReference { .. }
        )
    }

    /// Canonical status name for protocol errors
    pub fn status_name(&self) -> Option<String> {
        match self {
            Self::Status { code, .. } => Some(code.name().into_owned()),
            _ => None,
        }
    }
}
