use bytes::{Buf, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::ClientError;
use crate::http::StreamingResponse;

/// Splits a chunked byte stream into lines.
///
/// Lines end at `\n`; a trailing `\r` is stripped. A final line without a
/// terminator is returned when the source ends.
pub struct LineReader {
    source: BoxStream<'static, Result<bytes::Bytes, ClientError>>,
    buffer: BytesMut,
    // Prefix of `buffer` already known to hold no `\n`.
    scanned: usize,
    finished: bool,
}

impl LineReader {
    pub fn new(source: BoxStream<'static, Result<bytes::Bytes, ClientError>>) -> Self {
        Self {
            source,
            buffer: BytesMut::new(),
            scanned: 0,
            finished: false,
        }
    }

    pub fn from_response(response: StreamingResponse) -> Self {
        Self::new(response.body)
    }

    /// Next line, or `None` once the source is exhausted.
    pub async fn next_line(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            if let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
                let line = self.buffer.split_to(self.scanned + offset);
                self.buffer.advance(1);
                self.scanned = 0;
                return Ok(Some(decode_line(&line)));
            }
            self.scanned = self.buffer.len();
            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let line = self.buffer.split();
                self.scanned = 0;
                return Ok(Some(decode_line(&line)));
            }
            match self.source.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => self.finished = true,
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
