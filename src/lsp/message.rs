//! Outgoing messages, built incrementally and finalized exactly once.
use crate::lsp::error::{ErrorCode, RpcError};
use crate::lsp::log::render_payload;
use crate::lsp::types::{RequestId, JSONRPC_VERSION};
use crate::lsp::writer::JsonWriter;
use serde::Serialize;
use std::borrow::Cow;

/// Envelope shape of an [`OutgoingMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `{jsonrpc, id, result}`; the caller supplies the result value.
    Response,
    /// `{jsonrpc, id, error: {code, message}}`, complete on construction.
    ErrorResponse,
    /// `{jsonrpc, id, method}`, a request initiated by this side.
    Request,
    /// `{jsonrpc, method}`, never carries an id.
    Notification,
}

/// One outbound JSON object under construction.
///
/// Every constructor opens the object and writes the envelope members, so
/// anything the caller writes through [`writer`](Self::writer) lands inside
/// the object and after them. [`finalize`](Self::finalize) closes the object
/// and is a no-op after its first call.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    kind: MessageKind,
    writer: JsonWriter,
    finalized: bool,
}

impl OutgoingMessage {
    fn open(kind: MessageKind) -> Self {
        let mut writer = JsonWriter::with_capacity(128);
        writer.open_object().key("jsonrpc").string(JSONRPC_VERSION);
        OutgoingMessage {
            kind,
            writer,
            finalized: false,
        }
    }

    /// A result reply. The writer is left right after the `result` key,
    /// waiting for the value.
    pub fn response(id: &RequestId) -> Self {
        let mut message = Self::open(MessageKind::Response);
        message.writer.key("id").id(id).key("result");
        message
    }

    /// A result reply carrying an already serializable value.
    pub fn response_with<T: Serialize + ?Sized>(
        id: &RequestId,
        result: &T,
    ) -> Result<Self, serde_json::Error> {
        let mut message = Self::response(id);
        message.writer.value(result)?;
        Ok(message)
    }

    pub fn error_response(id: &RequestId, code: ErrorCode, message: &str) -> Self {
        let mut reply = Self::open(MessageKind::ErrorResponse);
        reply
            .writer
            .key("id")
            .id(id)
            .key("error")
            .open_object()
            .key("code")
            .number(code.code())
            .key("message")
            .string(message)
            .close_object();
        reply
    }

    pub fn from_error(id: &RequestId, err: &RpcError) -> Self {
        Self::error_response(id, err.code, &err.message)
    }

    /// An error reply with an additional `data` member.
    pub fn error_response_with_data<T: Serialize + ?Sized>(
        id: &RequestId,
        err: &RpcError,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        let mut reply = Self::open(MessageKind::ErrorResponse);
        reply
            .writer
            .key("id")
            .id(id)
            .key("error")
            .open_object()
            .key("code")
            .number(err.code())
            .key("message")
            .string(&err.message)
            .key("data");
        reply.writer.value(data)?;
        reply.writer.close_object();
        Ok(reply)
    }

    /// A request sent to the remote side, which will answer with `id`.
    pub fn request(method: &str, id: &RequestId) -> Self {
        let mut message = Self::open(MessageKind::Request);
        message.writer.key("id").id(id).key("method").string(method);
        message
    }

    pub fn notification(method: &str) -> Self {
        let mut message = Self::open(MessageKind::Notification);
        message.writer.key("method").string(method);
        message
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Writer for the caller's content (`result` value, `params`, ...).
    pub fn writer(&mut self) -> &mut JsonWriter {
        &mut self.writer
    }

    /// Closes the outer object. Calling it again changes nothing.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.writer.finish();
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Bytes written so far; the complete body once finalized.
    pub fn as_bytes(&self) -> &[u8] {
        self.writer.as_bytes()
    }

    pub fn render(&self, limit: Option<usize>) -> Cow<'_, str> {
        render_payload(self.writer.as_bytes(), limit)
    }
}
