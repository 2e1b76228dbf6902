//! Incremental decoder for the master's length-prefixed event stream.
//!
//! Framing is a decimal byte count terminated by `\n`, then exactly that
//! many bytes of JSON. Frames may themselves contain newlines, so the
//! decoder counts bytes after the prefix instead of reading lines.

use bytes::{Bytes, BytesMut};
use stevedore_types::Event;

/// A length prefix is a short decimal number; anything longer is garbage.
const MAX_PREFIX_LEN: usize = 16;

/// Upper bound on a single frame. Offer batches are the largest events and
/// stay far below this.
const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid length prefix {0:?}")]
    InvalidPrefix(String),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte cap")]
    Oversize(usize),
}

#[derive(Default)]
pub struct RecordIoDecoder {
    buf: BytesMut,
    pending: Option<usize>,
}

impl RecordIoDecoder {
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pull the next complete frame out of the buffer, or `None` until more
    /// bytes arrive. Chunk boundaries are arbitrary: a call may complete a
    /// prefix, a frame, both, or neither.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, CodecError> {
        loop {
            match self.pending {
                None => {
                    let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                        if self.buf.len() > MAX_PREFIX_LEN {
                            return Err(CodecError::InvalidPrefix(
                                String::from_utf8_lossy(&self.buf).into_owned(),
                            ));
                        }
                        return Ok(None);
                    };
                    let prefix = self.buf.split_to(pos + 1);
                    let text = std::str::from_utf8(&prefix[..pos])
                        .map_err(|_| {
                            CodecError::InvalidPrefix(
                                String::from_utf8_lossy(&prefix[..pos]).into_owned(),
                            )
                        })?
                        .trim();
                    let len: usize = text
                        .parse()
                        .map_err(|_| CodecError::InvalidPrefix(text.to_string()))?;
                    if len > MAX_FRAME_LEN {
                        return Err(CodecError::Oversize(len));
                    }
                    self.pending = Some(len);
                }
                Some(len) => {
                    if self.buf.len() < len {
                        return Ok(None);
                    }
                    let frame = self.buf.split_to(len).freeze();
                    self.pending = None;
                    return Ok(Some(frame));
                }
            }
        }
    }
}

pub fn decode_event(frame: &[u8]) -> Result<Event, serde_json::Error> {
    serde_json::from_slice(frame)
}

#[cfg(test)]
mod tests {
    use stevedore_types::EventKind;

    use super::*;

    fn frame(payload: &str) -> Vec<u8> {
        format!("{}\n{}", payload.len(), payload).into_bytes()
    }

    #[test]
    fn decodes_a_single_frame() {
        let mut decoder = RecordIoDecoder::default();
        decoder.extend(&frame(r#"{"type":"HEARTBEAT"}"#));
        let out = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&out[..], br#"{"type":"HEARTBEAT"}"#);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn decodes_frames_containing_newlines() {
        // A pretty-printed event spans lines; byte counting must not care.
        let payload = "{\n  \"type\": \"HEARTBEAT\"\n}";
        let mut decoder = RecordIoDecoder::default();
        decoder.extend(&frame(payload));
        let out = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&out[..], payload.as_bytes());
        let event = decode_event(&out).unwrap();
        assert_eq!(event.kind(), EventKind::Heartbeat);
    }

    #[test]
    fn reassembles_across_arbitrary_chunk_boundaries() {
        let payload = r#"{"type":"UPDATE","update":{"status":{"task_id":{"value":"t"},"state":"TASK_RUNNING"}}}"#;
        let bytes = frame(payload);
        // Feed one byte at a time; the frame must come out exactly once.
        let mut decoder = RecordIoDecoder::default();
        let mut frames = Vec::new();
        for b in &bytes {
            decoder.extend(std::slice::from_ref(b));
            while let Some(out) = decoder.next_frame().unwrap() {
                frames.push(out);
            }
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], payload.as_bytes());
    }

    #[test]
    fn decodes_multiple_frames_from_one_chunk() {
        let mut bytes = frame(r#"{"type":"HEARTBEAT"}"#);
        bytes.extend(frame(r#"{"type":"HEARTBEAT"}"#));
        bytes.extend(frame(r#"{"type":"HEARTBEAT"}"#));
        let mut decoder = RecordIoDecoder::default();
        decoder.extend(&bytes);
        let mut count = 0;
        while let Some(out) = decoder.next_frame().unwrap() {
            assert_eq!(decode_event(&out).unwrap().kind(), EventKind::Heartbeat);
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn rejects_a_non_numeric_prefix() {
        let mut decoder = RecordIoDecoder::default();
        decoder.extend(b"xyz\n{}");
        assert!(matches!(
            decoder.next_frame(),
            Err(CodecError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn rejects_an_unterminated_prefix_past_the_cap() {
        let mut decoder = RecordIoDecoder::default();
        decoder.extend(b"123456789012345678901234567890");
        assert!(matches!(
            decoder.next_frame(),
            Err(CodecError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn rejects_an_oversized_frame_before_buffering_it() {
        let mut decoder = RecordIoDecoder::default();
        decoder.extend(b"999999999\n");
        assert!(matches!(decoder.next_frame(), Err(CodecError::Oversize(_))));
    }

    #[test]
    fn tolerates_a_carriage_return_in_the_prefix() {
        let mut decoder = RecordIoDecoder::default();
        decoder.extend(b"2\r\n{}");
        let out = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&out[..], b"{}");
    }
}
