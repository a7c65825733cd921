//! Chunked transfer codec (RFC 9112 §7.1).
//!
//! The decoder is incremental: it consumes whatever is buffered and reports
//! `Incomplete` when it needs more input, so bodies stream through without
//! ever being assembled in memory. The encoder is its mirror.

use bytes::{Buf, Bytes, BytesMut};

use crate::buffer::{find_head_end, find_line};
use crate::error::{Error, ParseError};
use crate::headers::HeaderMap;
use crate::parser::parse_trailer_fields;

/// Chunk-size line cap: hex size plus any extensions we ignore.
const MAX_SIZE_LINE: usize = 256;

#[derive(Debug)]
pub enum Decoded {
    /// More input is needed before progress can be made.
    Incomplete,
    /// A run of decoded body data.
    Data(Bytes),
    /// Terminal chunk and trailer section consumed; the body is complete.
    Complete(HeaderMap),
}

#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    max_chunk_size: u64,
    max_trailer_bytes: usize,
    max_trailer_fields: usize,
    strict_crlf: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// At a chunk-size line.
    Size,
    /// Inside chunk data.
    Data { remaining: u64 },
    /// At the CRLF that closes a data chunk.
    DataEnd,
    /// Past the zero chunk, reading the trailer section.
    Trailers,
    Done,
}

impl ChunkedDecoder {
    pub fn new(
        max_chunk_size: u64,
        max_trailer_bytes: usize,
        max_trailer_fields: usize,
        strict_crlf: bool,
    ) -> Self {
        Self {
            state: State::Size,
            max_chunk_size,
            max_trailer_bytes,
            max_trailer_fields,
            strict_crlf,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decodes as much as possible from `buf`, consuming what it uses.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, Error> {
        loop {
            match self.state {
                State::Size => {
                    let (content_end, total) = match find_line(buf, self.strict_crlf) {
                        Some(found) => found,
                        None if buf.len() > MAX_SIZE_LINE => {
                            return Err(ParseError::LineTooLong.into());
                        }
                        None => return Ok(Decoded::Incomplete),
                    };
                    if total > MAX_SIZE_LINE {
                        return Err(ParseError::LineTooLong.into());
                    }
                    let size = parse_size_line(&buf[..content_end])?;
                    buf.advance(total);
                    if size > self.max_chunk_size {
                        return Err(Error::payload_too_large(format!(
                            "chunk of {size} bytes exceeds limit",
                        )));
                    }
                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::Data { remaining: size }
                    };
                }
                State::Data { remaining } => {
                    if buf.is_empty() {
                        return Ok(Decoded::Incomplete);
                    }
                    let take = remaining.min(buf.len() as u64) as usize;
                    let data = buf.split_to(take).freeze();
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        State::DataEnd
                    } else {
                        State::Data { remaining }
                    };
                    return Ok(Decoded::Data(data));
                }
                State::DataEnd => {
                    match buf.first() {
                        None => return Ok(Decoded::Incomplete),
                        Some(b'\r') => match buf.get(1) {
                            None => return Ok(Decoded::Incomplete),
                            Some(b'\n') => buf.advance(2),
                            Some(_) => return Err(ParseError::BadChunk.into()),
                        },
                        Some(b'\n') if !self.strict_crlf => buf.advance(1),
                        Some(_) => return Err(ParseError::BadChunk.into()),
                    }
                    self.state = State::Size;
                }
                State::Trailers => {
                    // empty trailer section: just the final CRLF
                    if buf.starts_with(b"\r\n") {
                        buf.advance(2);
                        self.state = State::Done;
                        return Ok(Decoded::Complete(HeaderMap::new()));
                    }
                    if !self.strict_crlf && buf.starts_with(b"\n") {
                        buf.advance(1);
                        self.state = State::Done;
                        return Ok(Decoded::Complete(HeaderMap::new()));
                    }
                    let end = match find_head_end(buf, self.strict_crlf) {
                        Some(end) => end,
                        None if buf.len() > self.max_trailer_bytes => {
                            return Err(Error::payload_too_large("trailer section exceeds limit"));
                        }
                        None => return Ok(Decoded::Incomplete),
                    };
                    if end > self.max_trailer_bytes {
                        return Err(Error::payload_too_large("trailer section exceeds limit"));
                    }
                    let block = buf.split_to(end);
                    let trailers =
                        parse_trailer_fields(&block, self.max_trailer_fields, self.strict_crlf)?;
                    self.state = State::Done;
                    return Ok(Decoded::Complete(trailers));
                }
                State::Done => return Ok(Decoded::Complete(HeaderMap::new())),
            }
        }
    }
}

/// `chunk-size [ ";" chunk-ext ]`, size in hex. Extensions are ignored but
/// already length-bounded by the size-line cap.
fn parse_size_line(line: &[u8]) -> Result<u64, ParseError> {
    let digits_end = line
        .iter()
        .position(|b| !b.is_ascii_hexdigit())
        .unwrap_or(line.len());
    if digits_end == 0 {
        return Err(ParseError::BadChunk);
    }
    match line.get(digits_end) {
        None | Some(b';') => {}
        Some(_) => return Err(ParseError::BadChunk),
    }
    // hex digits only, checked above
    let digits = std::str::from_utf8(&line[..digits_end]).map_err(|_| ParseError::BadChunk)?;
    u64::from_str_radix(digits, 16).map_err(|_| ParseError::BadChunk)
}

/// Emits one non-empty data chunk. Empty input emits nothing, since a
/// zero-size chunk would terminate the body.
pub fn encode_chunk(data: &[u8], buf: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    buf.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// Emits the terminal zero chunk, trailer fields, and final empty line.
pub fn encode_end(trailers: &HeaderMap, buf: &mut BytesMut) {
    buf.extend_from_slice(b"0\r\n");
    for field in trailers {
        buf.extend_from_slice(field.name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(&field.value);
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
}
