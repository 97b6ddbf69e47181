//! JSON-RPC 2.0 peer over a Content-Length framed byte stream, as spoken by
//! the Language Server Protocol.
//!
//! [`lsp::Peer::receive`] yields decoded [`lsp::Request`]s whose `params` are
//! left undecoded for the dispatcher; [`lsp::OutgoingMessage`] builds replies,
//! server-initiated requests and notifications that [`lsp::Peer::send`]
//! frames onto the output.

pub mod lsp;

pub use lsp::{
    ErrorCode, LogConfig, MessageKind, OutgoingMessage, Peer, PeerConfig, PeerError, Request,
    RequestId, RpcError,
};
