pub mod error;
pub mod log;
pub mod message;
pub mod peer;
pub mod request;
pub mod stdio_transport;
pub mod transport;
pub mod types;
pub mod writer;

pub use error::{ErrorCode, PeerError, RpcError};
pub use log::LogConfig;
pub use message::{MessageKind, OutgoingMessage};
pub use peer::{Peer, PeerConfig, PeerReader, PeerWriter};
pub use request::Request;
pub use transport::LineReader;
pub use types::{RequestId, JSONRPC_VERSION};
pub use writer::JsonWriter;
