//! Wire codec for the management port.
//!
//! Requests are single lines (`<command>\n`). Responses are framed as a
//! status line `<code> <body-length>\n` followed by exactly one body line.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Longest line accepted before the peer is considered broken.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A framed response from the management port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    /// Body length announced by the status line.
    pub length: usize,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ManagementCodec;

impl ManagementCodec {
    pub fn new() -> Self {
        Self
    }
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|b| *b == b'\n')
}

fn parse_status(line: &[u8]) -> Result<(u16, usize), ProtocolError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches('\r');
    let mut parts = text.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(code), Some(length), None) => match (code.parse(), length.parse()) {
            (Ok(code), Ok(length)) => Ok((code, length)),
            _ => Err(ProtocolError::MalformedStatus(text.to_string())),
        },
        _ => Err(ProtocolError::MalformedStatus(text.to_string())),
    }
}

impl Decoder for ManagementCodec {
    type Item = Response;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
        let Some(status_end) = find_newline(src) else {
            if src.len() > MAX_LINE_LENGTH {
                return Err(ProtocolError::LineTooLong(MAX_LINE_LENGTH));
            }
            return Ok(None);
        };
        // Reject a bad status line without waiting for its body.
        let (code, length) = parse_status(&src[..status_end])?;

        let body_start = status_end + 1;
        let Some(body_len) = find_newline(&src[body_start..]) else {
            if src.len() - body_start > MAX_LINE_LENGTH {
                return Err(ProtocolError::LineTooLong(MAX_LINE_LENGTH));
            }
            return Ok(None);
        };

        let frame = src.split_to(body_start + body_len + 1);
        let body = String::from_utf8_lossy(&frame[body_start..body_start + body_len])
            .trim_end_matches('\r')
            .to_string();
        Ok(Some(Response { code, length, body }))
    }
}

impl Encoder<String> for ManagementCodec {
    type Error = ProtocolError;

    fn encode(&mut self, command: String, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if command.contains('\n') {
            return Err(ProtocolError::InvalidCommand);
        }
        dst.reserve(command.len() + 1);
        dst.put_slice(command.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
