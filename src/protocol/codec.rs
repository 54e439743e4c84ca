//! Line framing for the RIO stream

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::RioError;

/// Default maximum accepted line length (64KB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Line codec for the RIO stream
///
/// Decodes newline-terminated lines (an optional trailing `\r` is dropped,
/// invalid UTF-8 is replaced rather than rejected) and encodes commands with
/// the carriage return the controller expects.
#[derive(Debug, Clone)]
pub struct RioCodec {
    /// Maximum line length before the stream is considered corrupt
    max_line_length: usize,
    /// Where to resume scanning for a newline in the buffer
    next_index: usize,
}

impl RioCodec {
    /// Create a new codec
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            next_index: 0,
        }
    }

    /// Set maximum line length
    #[must_use]
    pub fn with_max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    fn to_text(line: &[u8]) -> String {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        String::from_utf8_lossy(line).into_owned()
    }
}

impl Default for RioCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RioCodec {
    type Item = String;
    type Error = RioError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let scan_from = self.next_index.min(buf.len());
        if let Some(offset) = buf[scan_from..].iter().position(|b| *b == b'\n') {
            let end = scan_from + offset;
            self.next_index = 0;
            let line = buf.split_to(end + 1);
            return Ok(Some(Self::to_text(&line[..end])));
        }

        if buf.len() > self.max_line_length {
            return Err(RioError::Codec {
                message: format!(
                    "line exceeds {} bytes without a terminator",
                    self.max_line_length
                ),
            });
        }

        self.next_index = buf.len();
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        // Unterminated final line
        self.next_index = 0;
        let line = buf.split();
        Ok(Some(Self::to_text(&line)))
    }
}

impl<T: AsRef<str>> Encoder<T> for RioCodec {
    type Error = RioError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = item.as_ref();
        if text.contains(['\r', '\n']) {
            return Err(RioError::Codec {
                message: format!("command contains a line terminator: {text:?}"),
            });
        }

        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        dst.put_u8(b'\r');
        Ok(())
    }
}
