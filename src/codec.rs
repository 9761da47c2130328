//! Line codec: frames a TCP byte stream into protocol lines.
//!
//! Outgoing lines are terminated with `\r\n`. Incoming lines are split on
//! `\n` with an optional preceding `\r`, so peers that send bare line feeds
//! still work. Lines longer than the configured limit are dropped whole and
//! the stream keeps going.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// A tokio codec yielding one `String` per line, terminator removed.
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    /// Inside an overlong line; drop bytes until the next `\n`.
    discarding: bool,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            discarding: false,
        }
    }
}

fn trim_cr(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                // Room for a pending '\r' on top of the limit.
                if src.len() > self.max_length + 1 {
                    debug!("discarding overlong line ({} bytes so far)", src.len());
                    src.clear();
                    self.discarding = true;
                }
                return Ok(None);
            };

            let raw = src.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }

            let line = trim_cr(&raw[..pos]);
            if line.len() > self.max_length {
                debug!("discarding overlong line ({} bytes)", line.len());
                continue;
            }

            return Ok(Some(String::from_utf8_lossy(line).into_owned()));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        // Unterminated tail at end of stream still counts as a line.
        let tail = src.split();
        if tail.is_empty() || std::mem::take(&mut self.discarding) {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(trim_cr(&tail)).into_owned()))
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
