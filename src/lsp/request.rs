//! Incoming requests and the two passes that decode them.
//!
//! The body is buffered once. A first pass reads only the envelope members
//! (`jsonrpc`, `method`, `id`) and skips everything else without
//! materializing it. Once the envelope is known to be valid, a second pass
//! over the same bytes locates the `params` value and records where it sits,
//! so the caller gets a cursor positioned on an unread `params` regardless of
//! key order in the object.

use crate::lsp::error::RpcError;
use crate::lsp::log::render_payload;
use crate::lsp::types::{RequestId, JSONRPC_VERSION};
use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::de::SliceRead;
use serde_json::value::RawValue;
use std::borrow::Cow;
use std::fmt;
use std::ops::Range;

const NULL_PARAMS: &[u8] = b"null";

/// A request (or notification) received from the remote peer.
///
/// Owns the raw body. `method` is non-empty and the version was `"2.0"`;
/// both are checked before a `Request` can exist.
pub struct Request {
    method: String,
    id: RequestId,
    payload: Vec<u8>,
    // Location of the params value inside `payload`; `None` reads as `null`.
    params: Option<Range<usize>>,
}

impl Request {
    /// Decodes one buffered message body.
    pub fn decode(payload: Vec<u8>) -> Result<Self, RpcError> {
        let envelope = Envelope::scan(&payload)?;

        match envelope.jsonrpc.as_deref() {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(RpcError::invalid_request(format!(
                    "unsupported jsonrpc version \"{}\"",
                    other
                )))
            }
            None => return Err(RpcError::invalid_request("missing jsonrpc version")),
        }
        let method = match envelope.method {
            Some(method) if !method.is_empty() => method,
            _ => return Err(RpcError::invalid_request("missing method")),
        };

        let params = locate_params(&payload)?;

        Ok(Request {
            method,
            id: envelope.id,
            payload,
            params,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// True when no reply is expected (absent or `null` id).
    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }

    /// Whether the body carried a `params` member at all.
    pub fn has_params(&self) -> bool {
        self.params.is_some()
    }

    /// Raw JSON text of `params`, `null` when the member was absent.
    pub fn raw_params(&self) -> &[u8] {
        match &self.params {
            Some(range) => &self.payload[range.clone()],
            None => NULL_PARAMS,
        }
    }

    /// A streaming deserializer positioned on the `params` value.
    pub fn params_deserializer(&self) -> serde_json::Deserializer<SliceRead<'_>> {
        serde_json::Deserializer::from_slice(self.raw_params())
    }

    /// Decodes `params` into a domain type.
    pub fn params<'a, T>(&'a self) -> Result<T, RpcError>
    where
        T: Deserialize<'a>,
    {
        let mut de = self.params_deserializer();
        let value = T::deserialize(&mut de)
            .and_then(|value| de.end().map(|()| value))
            .map_err(|err| RpcError::invalid_params(format!("invalid params: {}", err)))?;
        Ok(value)
    }

    /// The whole body as received.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Body rendered as text for diagnostics, cut after `limit` characters.
    pub fn render(&self, limit: Option<usize>) -> Cow<'_, str> {
        render_payload(&self.payload, limit)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("id", &self.id)
            .field("params", &String::from_utf8_lossy(self.raw_params()))
            .finish()
    }
}

/// Envelope members gathered by the first pass.
#[derive(Debug, Default)]
struct Envelope {
    jsonrpc: Option<String>,
    method: Option<String>,
    id: RequestId,
}

impl Envelope {
    fn scan(payload: &[u8]) -> Result<Self, RpcError> {
        serde_json::from_slice(payload).map_err(|err| decode_error(payload, &err))
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(EnvelopeVisitor)
    }
}

struct EnvelopeVisitor;

impl EnvelopeVisitor {
    // Anything but an object carries no envelope; validation rejects it later.
    fn empty<E>(self) -> Result<Envelope, E> {
        Ok(Envelope::default())
    }
}

impl<'de> Visitor<'de> for EnvelopeVisitor {
    type Value = Envelope;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON-RPC message")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Envelope, A::Error> {
        let mut envelope = Envelope::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "jsonrpc" => envelope.jsonrpc = map.next_value::<Probe>()?.into_string(),
                "method" => envelope.method = map.next_value::<Probe>()?.into_string(),
                "id" => envelope.id = map.next_value::<Probe>()?.into_id(),
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(envelope)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Envelope, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        self.empty()
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Envelope, E> {
        self.empty()
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Envelope, E> {
        self.empty()
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Envelope, E> {
        self.empty()
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Envelope, E> {
        self.empty()
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<Envelope, E> {
        self.empty()
    }

    fn visit_unit<E: de::Error>(self) -> Result<Envelope, E> {
        self.empty()
    }
}

/// A member value probed for the types an envelope field may take.
///
/// String, integer and null are tried in that order; the first match decides
/// the result and anything else is skipped as `Other`.
enum Probe {
    Str(String),
    Int(i64),
    Null,
    Other,
}

impl Probe {
    fn into_string(self) -> Option<String> {
        match self {
            Probe::Str(s) => Some(s),
            _ => None,
        }
    }

    fn into_id(self) -> RequestId {
        match self {
            Probe::Str(s) => RequestId::String(s),
            Probe::Int(n) => RequestId::Integer(n),
            Probe::Null | Probe::Other => RequestId::Null,
        }
    }
}

impl<'de> Deserialize<'de> for Probe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ProbeVisitor)
    }
}

struct ProbeVisitor;

impl<'de> Visitor<'de> for ProbeVisitor {
    type Value = Probe;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Probe, E> {
        Ok(Probe::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Probe, E> {
        Ok(Probe::Str(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Probe, E> {
        Ok(Probe::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Probe, E> {
        Ok(i64::try_from(v).map(Probe::Int).unwrap_or(Probe::Other))
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Probe, E> {
        Ok(Probe::Other)
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Probe, E> {
        Ok(Probe::Other)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Probe, E> {
        Ok(Probe::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Probe, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(Probe::Other)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Probe, A::Error> {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(Probe::Other)
    }
}

/// Second pass: reopens the body and finds the first `params` member.
fn locate_params(payload: &[u8]) -> Result<Option<Range<usize>>, RpcError> {
    let seek: ParamsSeek<'_> =
        serde_json::from_slice(payload).map_err(|err| decode_error(payload, &err))?;
    Ok(seek.0.map(|raw| {
        let text = raw.get();
        // The raw value borrows straight from `payload`.
        let start = text.as_ptr() as usize - payload.as_ptr() as usize;
        start..start + text.len()
    }))
}

struct ParamsSeek<'de>(Option<&'de RawValue>);

impl<'de> Deserialize<'de> for ParamsSeek<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ParamsSeekVisitor)
    }
}

struct ParamsSeekVisitor;

impl<'de> Visitor<'de> for ParamsSeekVisitor {
    type Value = ParamsSeek<'de>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON-RPC message object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut params = None;
        while let Some(key) = map.next_key::<String>()? {
            if params.is_none() && key == "params" {
                params = Some(map.next_value::<&'de RawValue>()?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(ParamsSeek(params))
    }
}

fn decode_error(payload: &[u8], err: &serde_json::Error) -> RpcError {
    let offset = byte_offset(payload, err.line(), err.column());
    RpcError::parse_error(format!("JSON parse error at byte {}: {}", offset, err))
}

// serde_json reports 1-based line/column positions; translate to a byte offset.
fn byte_offset(payload: &[u8], line: usize, column: usize) -> usize {
    let line_start = payload
        .split_inclusive(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(|l| l.len())
        .sum::<usize>();
    (line_start + column.saturating_sub(1)).min(payload.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::error::ErrorCode;
    use serde::Deserialize;

    fn decode(body: &str) -> Result<Request, RpcError> {
        Request::decode(body.as_bytes().to_vec())
    }

    #[test]
    fn test_envelope_before_params() {
        let req = decode(r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{"a":[1,2]}}"#)
            .unwrap();
        assert_eq!(req.method(), "ping");
        assert_eq!(req.id(), &RequestId::Integer(1));
        assert_eq!(req.raw_params(), br#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_envelope_after_params() {
        let req = decode(
            r#"{"params":[true,{"x":"y"}],"method":"late","id":"abc","jsonrpc":"2.0"}"#,
        )
        .unwrap();
        assert_eq!(req.method(), "late");
        assert_eq!(req.id(), &RequestId::String("abc".into()));
        assert_eq!(req.raw_params(), br#"[true,{"x":"y"}]"#);
    }

    #[test]
    fn test_missing_params_reads_as_null() {
        let req = decode(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).unwrap();
        assert!(!req.has_params());
        assert_eq!(req.raw_params(), b"null");
        let value: serde_json::Value = req.params().unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_id_kinds() {
        let cases = [
            (r#""abc""#, RequestId::String("abc".into())),
            ("42", RequestId::Integer(42)),
            ("-7", RequestId::Integer(-7)),
            ("null", RequestId::Null),
            ("1.5", RequestId::Null),
            ("{\"nested\":1}", RequestId::Null),
        ];
        for (token, expected) in cases {
            let body = format!(r#"{{"jsonrpc":"2.0","method":"m","id":{}}}"#, token);
            assert_eq!(decode(&body).unwrap().id(), &expected, "id {}", token);
        }

        let req = decode(r#"{"jsonrpc":"2.0","method":"note"}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_wrong_version_is_invalid_request() {
        let err = decode(r#"{"jsonrpc":"1.0","method":"ping","id":1}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        let err = decode(r#"{"method":"ping","id":1}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        let err = decode(r#"{"jsonrpc":2.0,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_missing_or_empty_method_is_invalid_request() {
        let err = decode(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        let err = decode(r#"{"jsonrpc":"2.0","method":"","id":1}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_non_object_body_is_invalid_request() {
        for body in ["[1,2]", "\"2.0\"", "null", "3"] {
            let err = decode(body).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidRequest, "body {}", body);
        }
    }

    #[test]
    fn test_invalid_json_is_parse_error_with_offset() {
        let err = decode(r#"{"jsonrpc":"2.0","method":}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        assert!(
            err.message.starts_with("JSON parse error at byte "),
            "{}",
            err.message
        );

        let err = decode("").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_decode_error_wins_over_envelope_checks() {
        let err = decode(r#"{"jsonrpc":"1.0","method":"m","params":[1,}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
    }

    #[test]
    fn test_escaped_key_and_first_params_wins() {
        let req = decode(r#"{"jsonrpc":"2.0","method":"m","par\u0061ms":1,"params":2}"#).unwrap();
        assert_eq!(req.raw_params(), b"1");
    }

    #[test]
    fn test_typed_params() {
        #[derive(Deserialize)]
        struct Position {
            line: u32,
            character: u32,
        }

        let req =
            decode(r#"{"jsonrpc":"2.0","method":"m","params":{"line":3,"character":9}}"#).unwrap();
        let pos: Position = req.params().unwrap();
        assert_eq!((pos.line, pos.character), (3, 9));

        let err = req.params::<Vec<u32>>().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }

    #[test]
    fn test_params_deserializer_reads_value() {
        let req = decode(r#"{"jsonrpc":"2.0","method":"m","params":"text"}"#).unwrap();
        let mut de = req.params_deserializer();
        let value = String::deserialize(&mut de).unwrap();
        assert_eq!(value, "text");
    }

    #[test]
    fn test_render_truncates() {
        let req = decode(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert_eq!(req.render(None), r#"{"jsonrpc":"2.0","method":"ping"}"#);
        assert!(req.render(Some(5)).starts_with("{\"jso..."));
    }
}
