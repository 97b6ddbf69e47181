//! Payload diagnostics for the tracing output.
use std::borrow::Cow;

/// Characters of payload kept in a log line unless full payloads are enabled.
pub const DEFAULT_TRUNCATE_AT: usize = 2000;

/// How message payloads are rendered into log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub full_payloads: bool,
    pub truncate_at: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            full_payloads: false,
            truncate_at: DEFAULT_TRUNCATE_AT,
        }
    }
}

impl LogConfig {
    pub fn full() -> Self {
        LogConfig {
            full_payloads: true,
            ..LogConfig::default()
        }
    }

    /// Character limit to apply, `None` when payloads are logged whole.
    pub fn limit(&self) -> Option<usize> {
        if self.full_payloads {
            None
        } else {
            Some(self.truncate_at)
        }
    }
}

/// Renders raw payload bytes as text, cut after `limit` characters.
///
/// Invalid UTF-8 is replaced rather than rejected; this is for humans only.
pub fn render_payload(bytes: &[u8], limit: Option<usize>) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(bytes);
    let Some(limit) = limit else {
        return text;
    };
    match text.char_indices().nth(limit) {
        Some((cut, _)) => Cow::Owned(format!(
            "{}... ({} more bytes)",
            &text[..cut],
            text.len() - cut
        )),
        None => text,
    }
}
