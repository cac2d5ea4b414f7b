use crate::error::McpShotError;
use serde::Serialize;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound for a single protocol line
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// Newline-delimited JSON framing.
///
/// Decoding yields one UTF-8 line per item with the terminator stripped and
/// blank lines skipped. Encoding writes any serializable value compactly,
/// followed by `\n`.
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    max_length: usize,
    /// Bytes already scanned for a newline in the current buffer
    next_index: usize,
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn take_line(&mut self, src: &mut BytesMut, end: usize, consumed: usize) -> Result<Option<String>, McpShotError> {
        self.next_index = 0;
        let line = src.split_to(end);
        src.advance(consumed - end);

        let line = match line.strip_suffix(b"\r") {
            Some(stripped) => stripped,
            None => &line[..],
        };
        let text = std::str::from_utf8(line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(text.to_owned()))
    }
}

impl Decoder for JsonLineCodec {
    type Item = String;
    type Error = McpShotError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let scan_from = self.next_index.min(src.len());
            let newline = src[scan_from..].iter().position(|b| *b == b'\n');

            match newline {
                Some(offset) => {
                    let end = scan_from + offset;
                    if end > self.max_length {
                        return Err(McpShotError::LineTooLong(self.max_length));
                    }
                    if let Some(line) = self.take_line(src, end, end + 1)? {
                        return Ok(Some(line));
                    }
                    // blank line, keep scanning what is left
                }
                None => {
                    if src.len() > self.max_length {
                        return Err(McpShotError::LineTooLong(self.max_length));
                    }
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let len = src.len();
        self.take_line(src, len, len)
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec {
    type Error = McpShotError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_vec(&item)?;
        dst.reserve(line.len() + 1);
        dst.put_slice(&line);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    #[test]
    fn test_decode_splits_lines_and_skips_blanks() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::from("{\"a\":1}\r\n\n  \n{\"b\":2}\n{\"c\"");

        assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"a\":1}".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"b\":2}".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b":3}");
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("{\"c\":3}".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_overlong_lines() {
        let mut codec = JsonLineCodec::with_max_length(8);
        let mut buf = BytesMut::from("0123456789");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(McpShotError::LineTooLong(8))
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe\n"[..]);
        match codec.decode(&mut buf) {
            Err(McpShotError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
            other => panic!("expected InvalidData, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_writes_one_line() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Request::tool_call(2, "export_session", serde_json::json!({"note": "a\nb"})), &mut buf)
            .unwrap();

        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
    }
}
