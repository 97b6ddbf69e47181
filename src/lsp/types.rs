use serde::{Serialize, Serializer};
use std::fmt;

/// Version string every envelope carries in its `jsonrpc` member.
pub const JSONRPC_VERSION: &str = "2.0";

/// Header name that delimits the body of each framed message.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Content type announced on every outgoing message.
pub const CONTENT_TYPE: &str = "application/vscode-jsonrpc; charset=utf-8";

/// A JSON-RPC `id`, kept exactly as it was read off the wire.
///
/// Integer ids stay integers and string ids stay strings, so echoing one back
/// in a response reproduces the original token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RequestId {
    String(String),
    Integer(i64),
    #[default]
    Null,
}

impl RequestId {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RequestId::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RequestId::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RequestId::Null)
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Integer(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::String(value)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestId::String(s) => serializer.serialize_str(s),
            RequestId::Integer(n) => serializer.serialize_i64(*n),
            RequestId::Null => serializer.serialize_unit(),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "\"{}\"", s),
            RequestId::Integer(n) => write!(f, "{}", n),
            RequestId::Null => f.write_str("null"),
        }
    }
}
