//! Incremental, look-ahead read buffer over an inbound byte stream.
//!
//! All inspection is done against buffered bytes; `fill` is the only point
//! that touches the transport. Memory stays bounded because every scan is
//! capped: a missing line or head terminator past the configured limit is an
//! error, not an invitation to keep buffering.
//!
//! In strict mode (the default) a line terminator is CRLF only and a bare LF
//! simply never terminates anything; the lenient mode of the strictness flag
//! also accepts bare LF.

use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ParseError;

#[derive(Debug)]
pub struct ReadBuffer<R> {
    io: R,
    buf: BytesMut,
    strict_crlf: bool,
}

impl<R> ReadBuffer<R> {
    pub fn new(io: R, strict_crlf: bool) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(4 * 1024),
            strict_crlf,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// The transport itself, for callers that also write to it.
    pub fn io_mut(&mut self) -> &mut R {
        &mut self.io
    }

    /// Consumes at most one empty line before a start-line (RFC 9112 §2.2
    /// robustness). Unbounded skipping would be a DoS vector, so one only.
    pub fn skip_one_leading_crlf(&mut self) {
        if self.buf.starts_with(b"\r\n") {
            self.buf.advance(2);
        } else if !self.strict_crlf && self.buf.starts_with(b"\n") {
            self.buf.advance(1);
        }
    }

    /// Next terminated line without consuming it, terminator excluded.
    ///
    /// `Ok(None)` means no terminator is buffered yet; once more than `max`
    /// bytes are buffered without one, the line is rejected.
    pub fn peek_line(&self, max: usize) -> Result<Option<Line<'_>>, ParseError> {
        match find_line(&self.buf, self.strict_crlf) {
            Some((end, total)) => {
                if total > max {
                    return Err(ParseError::LineTooLong);
                }
                Ok(Some(Line {
                    content: &self.buf[..end],
                    total,
                }))
            }
            None => {
                if self.buf.len() > max {
                    return Err(ParseError::LineTooLong);
                }
                Ok(None)
            }
        }
    }

    /// Advances past `n` already-inspected bytes.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// Splits off a complete head block, final empty line included.
    ///
    /// `Ok(None)` means the terminator is not buffered yet; buffering more
    /// than `max` bytes without finding it is `HeaderTooLarge`.
    pub fn head_block(&mut self, max: usize) -> Result<Option<Bytes>, ParseError> {
        match find_head_end(&self.buf, self.strict_crlf) {
            Some(end) => {
                if end > max {
                    return Err(ParseError::HeaderTooLarge);
                }
                Ok(Some(self.buf.split_to(end).freeze()))
            }
            None => {
                if self.buf.len() > max {
                    return Err(ParseError::HeaderTooLarge);
                }
                Ok(None)
            }
        }
    }

    /// Takes up to `n` buffered bytes for a fixed-length body.
    pub fn take(&mut self, n: usize) -> Bytes {
        let n = n.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }
}

impl<R: AsyncRead + Unpin> ReadBuffer<R> {
    /// Reads more bytes from the transport into the buffer. Returns the
    /// number of bytes read; `0` means EOF.
    pub async fn fill(&mut self) -> io::Result<usize> {
        self.io.read_buf(&mut self.buf).await
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Line<'a> {
    /// Line content, terminator excluded.
    pub content: &'a [u8],
    /// Bytes the line occupies on the wire, terminator included.
    pub total: usize,
}

/// Finds the next line terminator: `(content_end, total_len)`.
pub(crate) fn find_line(buf: &[u8], strict_crlf: bool) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(i) = memchr(b'\n', &buf[from..]) {
        let nl = from + i;
        if nl > 0 && buf[nl - 1] == b'\r' {
            return Some((nl - 1, nl + 1));
        }
        if !strict_crlf {
            return Some((nl, nl + 1));
        }
        from = nl + 1;
    }
    None
}

/// Finds the end of a head block (offset just past the blank line).
pub(crate) fn find_head_end(buf: &[u8], strict_crlf: bool) -> Option<usize> {
    if strict_crlf {
        buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
    } else {
        // any line terminator followed immediately by another
        let mut from = 0;
        while let Some((_, total)) = find_line(&buf[from..], false) {
            let next = from + total;
            match buf.get(next) {
                Some(b'\n') => return Some(next + 1),
                Some(b'\r') if buf.get(next + 1) == Some(&b'\n') => return Some(next + 2),
                Some(_) => from = next,
                None => return None,
            }
        }
        None
    }
}

fn memchr(needle: u8, haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}
