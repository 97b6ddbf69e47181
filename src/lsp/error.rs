//! JSON-RPC error codes and the error types raised by the peer.

use std::fmt;
use std::io;
use thiserror::Error;

/// Numeric error codes defined by JSON-RPC 2.0 and the LSP extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerNotInitialized,
    RequestCancelled,
    ContentModified,
    RequestFailed,
    /// Any code outside the table, usually chosen by the application.
    Other(i64),
}

impl ErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerNotInitialized => -32002,
            ErrorCode::RequestCancelled => -32800,
            ErrorCode::ContentModified => -32801,
            ErrorCode::RequestFailed => -32803,
            ErrorCode::Other(code) => *code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32002 => ErrorCode::ServerNotInitialized,
            -32800 => ErrorCode::RequestCancelled,
            -32801 => ErrorCode::ContentModified,
            -32803 => ErrorCode::RequestFailed,
            other => ErrorCode::Other(other),
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ServerNotInitialized => "Server not initialized",
            ErrorCode::RequestCancelled => "Request cancelled",
            ErrorCode::ContentModified => "Content modified",
            ErrorCode::RequestFailed => "Request failed",
            ErrorCode::Other(_) => "Server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// A JSON-RPC error signal: a code plus a human readable message.
///
/// Raised for protocol violations while receiving, and used by the dispatch
/// layer to describe the `error` member of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} ({})", .message, .code.code())]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method '{}' not found", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequestFailed, message)
    }

    pub fn code(&self) -> i64 {
        self.code.code()
    }
}

impl From<ErrorCode> for RpcError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code, code.message())
    }
}

/// Errors surfaced by [`Peer`](crate::lsp::Peer) operations.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Framing, envelope or decode failure. Carries a JSON-RPC code.
    #[error("protocol error: {0}")]
    Rpc(#[from] RpcError),

    /// The underlying stream failed for reasons unrelated to framing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PeerError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            PeerError::Rpc(err) => Some(err.code),
            PeerError::Io(_) => None,
        }
    }
}
