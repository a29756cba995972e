//! Line framing for the hub socket.
//!
//! The hub terminates lines with `\r`, `\n` or both. A read may end in the
//! middle of a line; the unterminated tail stays in the buffer until the
//! rest arrives.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Splits inbound bytes into lines and terminates outbound lines with `\r\n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec;

impl LineCodec {
    pub fn new() -> Self {
        Self
    }
}

fn is_terminator(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            // Drop leading terminators so "\r\n" and blank lines yield nothing.
            let skip = buf.iter().take_while(|b| is_terminator(**b)).count();
            buf.advance(skip);

            let Some(end) = buf.iter().position(|b| is_terminator(*b)) else {
                return Ok(None);
            };

            let line = buf.split_to(end);
            buf.advance(1);
            let line = String::from_utf8_lossy(&line).into_owned();
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        let line = String::from_utf8_lossy(&rest).into_owned();
        Ok((!line.trim().is_empty()).then_some(line))
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), io::Error> {
        let line = line.trim_end_matches(['\r', '\n']);
        buf.reserve(line.len() + 2);
        buf.put_slice(line.as_bytes());
        buf.put_slice(b"\r\n");
        Ok(())
    }
}
