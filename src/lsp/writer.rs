//! Push-style JSON encoder writing into an owned, growable buffer.
//!
//! Outgoing messages are built token by token so the envelope can be written
//! first and the caller's content appended afterwards. Separators are tracked
//! per open container, so callers only ever issue keys and values.

use crate::lsp::types::RequestId;
use serde::Serialize;

#[derive(Debug, Default, Clone)]
pub struct JsonWriter {
    buf: Vec<u8>,
    open: Vec<Container>,
    after_key: bool,
}

#[derive(Debug, Clone, Copy)]
struct Container {
    closer: u8,
    has_member: bool,
}

impl JsonWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn open_object(&mut self) -> &mut Self {
        self.begin_value();
        self.buf.push(b'{');
        self.open.push(Container {
            closer: b'}',
            has_member: false,
        });
        self
    }

    pub fn close_object(&mut self) -> &mut Self {
        self.close()
    }

    pub fn open_array(&mut self) -> &mut Self {
        self.begin_value();
        self.buf.push(b'[');
        self.open.push(Container {
            closer: b']',
            has_member: false,
        });
        self
    }

    pub fn close_array(&mut self) -> &mut Self {
        self.close()
    }

    /// Closes every container still open, innermost first. A key left
    /// without a value gets `null`.
    pub fn finish(&mut self) -> &mut Self {
        while !self.open.is_empty() {
            self.close();
        }
        self
    }

    pub fn key(&mut self, key: &str) -> &mut Self {
        self.begin_value();
        write_escaped(&mut self.buf, key);
        self.buf.push(b':');
        self.after_key = true;
        self
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.begin_value();
        write_escaped(&mut self.buf, value);
        self
    }

    pub fn number(&mut self, value: i64) -> &mut Self {
        self.begin_value();
        self.buf.extend_from_slice(value.to_string().as_bytes());
        self
    }

    /// Non-finite values have no JSON form and are written as `null`.
    pub fn float(&mut self, value: f64) -> &mut Self {
        match serde_json::Number::from_f64(value) {
            Some(n) => {
                self.begin_value();
                self.buf.extend_from_slice(n.to_string().as_bytes());
                self
            }
            None => self.null(),
        }
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.begin_value();
        self.buf
            .extend_from_slice(if value { b"true" as &[u8] } else { b"false" });
        self
    }

    pub fn null(&mut self) -> &mut Self {
        self.begin_value();
        self.buf.extend_from_slice(b"null");
        self
    }

    pub fn id(&mut self, id: &RequestId) -> &mut Self {
        match id {
            RequestId::String(s) => self.string(s),
            RequestId::Integer(n) => self.number(*n),
            RequestId::Null => self.null(),
        }
    }

    /// Writes any serializable value as a single token.
    ///
    /// The value is encoded before anything is appended, so a failing
    /// `Serialize` impl leaves the buffer untouched.
    pub fn value<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> Result<&mut Self, serde_json::Error> {
        let encoded = serde_json::to_vec(value)?;
        self.begin_value();
        self.buf.extend_from_slice(&encoded);
        Ok(self)
    }

    /// Number of containers still open.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    // A key still waiting for its value is completed with `null` first.
    fn close(&mut self) -> &mut Self {
        if self.open.is_empty() {
            return self;
        }
        if self.after_key {
            self.null();
        }
        if let Some(container) = self.open.pop() {
            self.buf.push(container.closer);
        }
        self
    }

    fn begin_value(&mut self) {
        if self.after_key {
            self.after_key = false;
            return;
        }
        if let Some(container) = self.open.last_mut() {
            if container.has_member {
                self.buf.push(b',');
            }
            container.has_member = true;
        }
    }
}

fn write_escaped(buf: &mut Vec<u8>, value: &str) {
    // Writing into a Vec cannot fail.
    let _ = serde_json::to_writer(buf, value);
}
