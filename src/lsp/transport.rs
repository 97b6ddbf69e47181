//! Line-oriented input used by the framing layer.
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest header line accepted, terminator included.
pub const MAX_HEADER_LINE: usize = 8 * 1024;

/// Minimal async contract the peer needs from its input stream.
/// - `read_line` returns one header line with the CRLF/LF terminator stripped,
///   or `None` once the stream has ended. Lines longer than
///   [`MAX_HEADER_LINE`] or not valid UTF-8 fail with `InvalidData`; the
///   whole line is consumed either way.
/// - `read_exact` returns exactly `len` bytes of body, failing with
///   `UnexpectedEof` if the stream ends first.
/// - `skip` discards `len` bytes without buffering them.
#[async_trait]
pub trait LineReader: Send {
    async fn read_line(&mut self) -> io::Result<Option<String>>;
    async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>>;
    async fn skip(&mut self, len: usize) -> io::Result<()>;
}

#[async_trait]
impl<R> LineReader for R
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let read = (&mut *self)
            .take(MAX_HEADER_LINE as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if read == MAX_HEADER_LINE && !buf.ends_with(b"\n") {
            discard_line(self).await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("header line longer than {} bytes", MAX_HEADER_LINE),
            ));
        }

        let mut line =
            String::from_utf8(buf).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(len);
        Ok(Some(line))
    }

    async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut body = vec![0u8; len];
        AsyncReadExt::read_exact(self, &mut body).await?;
        Ok(body)
    }

    async fn skip(&mut self, len: usize) -> io::Result<()> {
        let mut body = (&mut *self).take(len as u64);
        let skipped = tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
        if skipped < len as u64 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }
}

// Consumes input up to and including the next newline, or to the end.
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let (used, done) = {
            let buf = reader.fill_buf().await?;
            match buf.iter().position(|&b| b == b'\n') {
                Some(at) => (at + 1, true),
                None => (buf.len(), buf.is_empty()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}
