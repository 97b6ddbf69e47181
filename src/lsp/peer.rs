//! The protocol engine: Content-Length framing on top of a duplex stream.
//!
//! ```text
//! Content-Length:<n>\r\n
//! [other headers]\r\n
//! \r\n
//! <n bytes of JSON>
//! ```
//!
//! Receiving and sending touch disjoint streams. A [`Peer`] can be split into
//! a [`PeerReader`] and a [`PeerWriter`] so each direction runs on its own
//! task; each half still expects a single caller at a time.

use crate::lsp::error::{PeerError, RpcError};
use crate::lsp::log::LogConfig;
use crate::lsp::message::OutgoingMessage;
use crate::lsp::request::Request;
use crate::lsp::transport::LineReader;
use crate::lsp::types::{RequestId, CONTENT_LENGTH, CONTENT_TYPE};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Bodies larger than this are rejected before any allocation.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerConfig {
    pub log: LogConfig,
    pub max_content_length: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            log: LogConfig::default(),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }
}

/// Receiving half: turns framed bytes into [`Request`]s.
pub struct PeerReader<R> {
    input: R,
    config: PeerConfig,
    // Set after a frame whose body length was unknown; input is discarded
    // until the next `Content-Length` header.
    resync: bool,
}

impl<R: LineReader> PeerReader<R> {
    pub fn new(input: R, config: PeerConfig) -> Self {
        PeerReader {
            input,
            config,
            resync: false,
        }
    }

    /// Reads the next request.
    ///
    /// Returns `Ok(None)` when the stream ends before a new message starts.
    /// A failure consumes the whole offending frame when its body length is
    /// known, oversize bodies included. When it is not (missing or
    /// unparsable `Content-Length`), the body's extent is unknown and the
    /// stream can no longer be trusted: the next call discards input up to
    /// the next `Content-Length` header and carries on from there.
    pub async fn receive(&mut self) -> Result<Option<Request>, PeerError> {
        let Some(len) = self.read_headers().await? else {
            return Ok(None);
        };

        let payload = self.input.read_exact(len).await.map_err(|err| {
            framing_error(err, || {
                format!("stream ended before {} byte body was complete", len)
            })
        })?;

        let request = match Request::decode(payload) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!("Rejected incoming message: {}", err);
                return Err(err.into());
            }
        };

        tracing::debug!(
            "<- {} id={}: {}",
            request.method(),
            request.id(),
            request.render(self.config.log.limit())
        );
        Ok(Some(request))
    }

    /// Reads header lines up to the blank separator and returns the body length.
    ///
    /// A bad header does not stop the loop; the first one is reported once
    /// the separator is reached and the body, if its length is known, skipped.
    async fn read_headers(&mut self) -> Result<Option<usize>, PeerError> {
        let mut content_length = None;
        let mut error: Option<RpcError> = None;
        let mut first = true;

        loop {
            let mut line = match self.input.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) if first => return Ok(None),
                Ok(None) => {
                    let err = error.unwrap_or_else(|| {
                        RpcError::parse_error("stream ended inside header block")
                    });
                    return Err(err.into());
                }
                Err(err) => {
                    match framing_error(err, || "unreadable header line".to_string()) {
                        PeerError::Rpc(err) => {
                            error.get_or_insert(err);
                        }
                        err => return Err(err),
                    }
                    first = false;
                    continue;
                }
            };

            if self.resync {
                let Some(start) = find_content_length(&line) else {
                    tracing::debug!("Discarding unframed input: {:?}", line);
                    continue;
                };
                line.replace_range(..start, "");
                self.resync = false;
            }
            first = false;

            if line.is_empty() {
                break;
            }

            let Some((name, value)) = line.split_once(':') else {
                error.get_or_insert_with(|| {
                    RpcError::parse_error(format!("malformed header line \"{}\"", line))
                });
                continue;
            };
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                match value.trim().parse::<usize>() {
                    Ok(len) => content_length = Some(len),
                    Err(_) => {
                        content_length = None;
                        error.get_or_insert_with(|| {
                            RpcError::parse_error(format!(
                                "invalid Content-Length \"{}\"",
                                value.trim()
                            ))
                        });
                    }
                }
            }
        }

        let max = self.config.max_content_length;
        match (error, content_length) {
            (None, Some(len)) if len > 0 && len <= max => Ok(Some(len)),
            (error, Some(len)) if len > 0 => {
                let err = error.unwrap_or_else(|| {
                    RpcError::parse_error(format!(
                        "Content-Length {} exceeds limit of {} bytes",
                        len, max
                    ))
                });
                self.input.skip(len).await.map_err(|err| {
                    framing_error(err, || format!("discarding {} byte body", len))
                })?;
                Err(err.into())
            }
            (error, _) => {
                self.resync = true;
                let err = error
                    .unwrap_or_else(|| RpcError::parse_error("missing Content-Length header"));
                Err(err.into())
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.input
    }
}

/// Sending half: finalizes outgoing messages and frames them.
pub struct PeerWriter<W> {
    output: W,
    config: PeerConfig,
}

impl<W> PeerWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(output: W, config: PeerConfig) -> Self {
        PeerWriter { output, config }
    }

    /// Finalizes `message` and writes it as one frame, then flushes.
    pub async fn send(&mut self, message: &mut OutgoingMessage) -> Result<(), PeerError> {
        message.finalize();
        let body = message.as_bytes();

        let header = format!(
            "Content-Type: {}\r\n{}:{}\r\n\r\n",
            CONTENT_TYPE,
            CONTENT_LENGTH,
            body.len()
        );
        let mut frame = Vec::with_capacity(header.len() + body.len());
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(body);

        self.output.write_all(&frame).await?;
        self.output.flush().await?;

        tracing::debug!("-> {}", message.render(self.config.log.limit()));
        Ok(())
    }

    /// Builds, finalizes and sends an error reply for `id`.
    pub async fn reply_error(&mut self, id: &RequestId, err: &RpcError) -> Result<(), PeerError> {
        let mut reply = OutgoingMessage::from_error(id, err);
        self.send(&mut reply).await
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

/// A JSON-RPC peer over an input and an output stream it does not close.
pub struct Peer<R, W> {
    reader: PeerReader<R>,
    writer: PeerWriter<W>,
}

impl<R, W> Peer<R, W>
where
    R: LineReader,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self::with_config(input, output, PeerConfig::default())
    }

    pub fn with_config(input: R, output: W, config: PeerConfig) -> Self {
        Peer {
            reader: PeerReader::new(input, config),
            writer: PeerWriter::new(output, config),
        }
    }

    pub async fn receive(&mut self) -> Result<Option<Request>, PeerError> {
        self.reader.receive().await
    }

    pub async fn send(&mut self, message: &mut OutgoingMessage) -> Result<(), PeerError> {
        self.writer.send(message).await
    }

    pub async fn reply_error(&mut self, id: &RequestId, err: &RpcError) -> Result<(), PeerError> {
        self.writer.reply_error(id, err).await
    }

    pub fn into_split(self) -> (PeerReader<R>, PeerWriter<W>) {
        (self.reader, self.writer)
    }
}

// Offset of a `Content-Length` header name inside `line`. While
// resynchronizing, the header usually follows the tail of a skipped body.
fn find_content_length(line: &str) -> Option<usize> {
    let needle = format!("{}:", CONTENT_LENGTH.to_ascii_lowercase());
    line.to_ascii_lowercase().rfind(&needle)
}

// Truncated or undecodable framing is a protocol violation; anything else
// is a transport failure.
fn framing_error(err: io::Error, context: impl FnOnce() -> String) -> PeerError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
            RpcError::parse_error(format!("{}: {}", context(), err)).into()
        }
        _ => PeerError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::error::ErrorCode;
    use crate::lsp::transport::MAX_HEADER_LINE;
    use proptest::prelude::*;
    use tokio::io::{duplex, BufReader};

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length:{}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn peer(input: &[u8]) -> Peer<&[u8], Vec<u8>> {
        Peer::new(input, Vec::new())
    }

    async fn receive_err(input: &[u8]) -> PeerError {
        peer(input).receive().await.unwrap_err()
    }

    #[tokio::test]
    async fn test_end_to_end_ping() {
        let input = b"Content-Length:40\r\n\r\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}";
        let mut peer = peer(input);

        let request = peer.receive().await.unwrap().expect("one request");
        assert_eq!(request.method(), "ping");
        assert_eq!(request.id(), &RequestId::Integer(1));
        assert_eq!(request.raw_params(), b"null");

        let mut reply = OutgoingMessage::response(request.id());
        reply.writer().bool(true);
        peer.send(&mut reply).await.unwrap();

        assert!(peer.receive().await.unwrap().is_none());

        let (_, writer) = peer.into_split();
        let body = r#"{"jsonrpc":"2.0","id":1,"result":true}"#;
        let expected = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length:{}\r\n\r\n{}",
            body.len(),
            body
        );
        assert_eq!(String::from_utf8(writer.into_inner()).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_headers_are_flexible() {
        let body = r#"{"jsonrpc":"2.0","method":"a"}"#;
        let input = format!(
            "content-length:  {}  \nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{}",
            body.len(),
            body
        );
        let request = peer(input.as_bytes()).receive().await.unwrap().unwrap();
        assert_eq!(request.method(), "a");
    }

    #[tokio::test]
    async fn test_sequence_of_messages() {
        let mut input = frame(r#"{"jsonrpc":"2.0","method":"first","id":"a"}"#);
        input.extend(frame(r#"{"jsonrpc":"2.0","method":"second","params":[1]}"#));
        let mut peer = peer(&input);

        let first = peer.receive().await.unwrap().unwrap();
        let second = peer.receive().await.unwrap().unwrap();
        assert_eq!(first.method(), "first");
        assert_eq!(first.id(), &RequestId::from("a"));
        assert_eq!(second.method(), "second");
        assert!(second.is_notification());
        assert_eq!(second.raw_params(), b"[1]");
        assert!(peer.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_framing_failures_are_parse_errors() {
        let cases: [&[u8]; 7] = [
            b"X-Other: 1\r\n\r\n{}",
            b"Content-Length: 2\xff\r\n\r\n{}",
            b"Content-Length: abc\r\n\r\n{}",
            b"Content-Length: 0\r\n\r\n",
            b"no colon here\r\n\r\n",
            b"Content-Length: 10\r\n",
            b"Content-Length: 10\r\n\r\n{\"a\":",
        ];
        for input in cases {
            let err = receive_err(input).await;
            assert_eq!(
                err.code(),
                Some(ErrorCode::ParseError),
                "{:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[tokio::test]
    async fn test_envelope_failures_propagate_codes() {
        let err = receive_err(&frame(r#"{"jsonrpc":"1.0","method":"m"}"#)).await;
        assert_eq!(err.code(), Some(ErrorCode::InvalidRequest));

        let err = receive_err(&frame(r#"{"jsonrpc":"2.0","id":1}"#)).await;
        assert_eq!(err.code(), Some(ErrorCode::InvalidRequest));

        let err = receive_err(&frame(r#"{"jsonrpc":"2.0","method":"m""#)).await;
        assert_eq!(err.code(), Some(ErrorCode::ParseError));
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_failed_message_does_not_poison_stream() {
        let mut input = frame(r#"{"jsonrpc":"1.0","method":"bad"}"#);
        input.extend(frame(r#"{"jsonrpc":"2.0","method":"good"}"#));
        let mut peer = peer(&input);

        assert!(peer.receive().await.is_err());
        let request = peer.receive().await.unwrap().unwrap();
        assert_eq!(request.method(), "good");
    }

    const GOOD: &str = r#"{"jsonrpc":"2.0","method":"good"}"#;

    async fn receive_all(peer: &mut Peer<&[u8], Vec<u8>>) -> Vec<Result<String, ErrorCode>> {
        let mut seen = Vec::new();
        loop {
            match peer.receive().await {
                Ok(Some(request)) => seen.push(Ok(request.method().to_string())),
                Ok(None) => return seen,
                Err(err) => seen.push(Err(err.code().unwrap())),
            }
        }
    }

    #[tokio::test]
    async fn test_oversize_frame_is_skipped_whole() {
        let config = PeerConfig {
            max_content_length: 40,
            ..PeerConfig::default()
        };
        let mut input = frame(&format!(r#"{{"jsonrpc":"2.0","method":"{}"}}"#, "x".repeat(34)));
        input.extend(frame(GOOD));
        let mut peer = Peer::with_config(input.as_slice(), Vec::new(), config);

        assert_eq!(
            receive_all(&mut peer).await,
            [Err(ErrorCode::ParseError), Ok("good".to_string())]
        );
    }

    #[tokio::test]
    async fn test_bad_header_line_still_skips_body() {
        let body = r#"{"jsonrpc":"2.0","method":"bad"}"#;
        let mut input =
            format!("Content-Length: {}\r\nno colon\r\n\r\n{}", body.len(), body).into_bytes();
        input.extend(frame(GOOD));
        let mut peer = peer(&input);

        assert_eq!(
            receive_all(&mut peer).await,
            [Err(ErrorCode::ParseError), Ok("good".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unparsable_length_resyncs_on_next_header() {
        let mut input = b"Content-Length: abc\r\n\r\n{}".to_vec();
        input.extend(frame(GOOD));
        input.extend(b"X-Junk: 1\r\n\r\n{\"a\":1}".iter());
        input.extend(frame(GOOD));
        let mut peer = peer(&input);

        assert_eq!(
            receive_all(&mut peer).await,
            [
                Err(ErrorCode::ParseError),
                Ok("good".to_string()),
                Err(ErrorCode::ParseError),
                Ok("good".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_overlong_header_line_then_good_frame() {
        let mut input = format!("X-Junk: {}\r\n\r\n", "j".repeat(MAX_HEADER_LINE)).into_bytes();
        input.extend(frame(GOOD));
        let mut peer = peer(&input);

        assert_eq!(
            receive_all(&mut peer).await,
            [Err(ErrorCode::ParseError), Ok("good".to_string())]
        );
    }

    #[tokio::test]
    async fn test_content_length_limit() {
        let config = PeerConfig {
            max_content_length: 8,
            ..PeerConfig::default()
        };
        let input = frame(r#"{"jsonrpc":"2.0","method":"m"}"#);
        let mut peer = Peer::with_config(input.as_slice(), Vec::new(), config);
        let err = peer.receive().await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ParseError));
    }

    #[tokio::test]
    async fn test_send_twice_emits_same_body() {
        let mut peer = peer(b"");
        let mut message = OutgoingMessage::notification("exit");
        peer.send(&mut message).await.unwrap();
        peer.send(&mut message).await.unwrap();

        let (_, writer) = peer.into_split();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        let one = format!(
            "Content-Type: {}\r\nContent-Length:{}\r\n\r\n{}",
            CONTENT_TYPE,
            r#"{"jsonrpc":"2.0","method":"exit"}"#.len(),
            r#"{"jsonrpc":"2.0","method":"exit"}"#
        );
        assert_eq!(out, format!("{}{}", one, one));
    }

    #[tokio::test]
    async fn test_reply_error() {
        let mut peer = peer(b"");
        peer.reply_error(&RequestId::from(4), &RpcError::method_not_found("nope"))
            .await
            .unwrap();

        let (_, writer) = peer.into_split();
        let out = writer.into_inner();
        let text = String::from_utf8(out).unwrap();
        let body = text.split("\r\n\r\n").nth(1).unwrap();
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(value["id"], 4);
        assert_eq!(value["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_split_halves_over_duplex() {
        let (client, server) = duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let peer = Peer::new(BufReader::new(server_read), server_write);
        let (mut reader, mut writer) = peer.into_split();

        let (client_read, client_write) = tokio::io::split(client);
        let mut client = Peer::new(BufReader::new(client_read), client_write);

        let server = tokio::spawn(async move {
            let request = reader.receive().await.unwrap().unwrap();
            let mut reply = OutgoingMessage::response(request.id());
            reply.writer().value(&request.method()).unwrap();
            writer.send(&mut reply).await.unwrap();
        });

        let mut request = OutgoingMessage::request("echo", &RequestId::from(11));
        client.send(&mut request).await.unwrap();

        // A response has no method, so read the raw frame back.
        let (mut client_reader, _) = client.into_split();
        let header = client_reader.read_headers().await.unwrap().unwrap();
        let body = client_reader.input.read_exact(header).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["id"], 11);
        assert_eq!(value["result"], "echo");

        server.await.unwrap();
    }

    fn ordered_body(order: &[usize], id: &str, params: &str) -> String {
        let members = [
            r#""jsonrpc":"2.0""#.to_string(),
            r#""method":"textDocument/hover""#.to_string(),
            format!(r#""id":{}"#, id),
            format!(r#""params":{}"#, params),
        ];
        let parts: Vec<&str> = order.iter().map(|i| members[*i].as_str()).collect();
        format!("{{{}}}", parts.join(","))
    }

    proptest! {
        #[test]
        fn prop_key_order_does_not_matter(
            order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
            id in prop_oneof![
                any::<i64>().prop_map(|n| n.to_string()),
                "[a-z0-9]{0,8}".prop_map(|s| format!("\"{}\"", s)),
                Just("null".to_string()),
            ],
            params in prop_oneof![
                Just("null".to_string()),
                Just(r#"{"position":{"line":1,"character":2}}"#.to_string()),
                Just(r#"[1,"two",{"method":"x","id":9}]"#.to_string()),
            ],
        ) {
            let body = ordered_body(&order, &id, &params);
            let input = frame(&body);
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let request = runtime
                .block_on(async { peer(&input).receive().await })
                .unwrap()
                .unwrap();

            prop_assert_eq!(request.method(), "textDocument/hover");
            let mut echoed = crate::lsp::writer::JsonWriter::new();
            echoed.id(request.id());
            prop_assert_eq!(echoed.as_bytes(), id.as_bytes());
            prop_assert_eq!(request.raw_params(), params.as_bytes());
        }
    }
}
