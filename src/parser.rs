//! Message head parsing.
//!
//! Operates on a complete head block extracted by
//! [`ReadBuffer::head_block`](crate::buffer::ReadBuffer::head_block), so
//! every function here is synchronous and total: a head either parses into a
//! structured value or fails with a typed [`ParseError`] that is terminal
//! for the connection.
//!
//! Obsolete line folding is rejected outright, per the security guidance
//! superseding the original grammar.

use crate::error::ParseError;
use crate::headers::{is_token, trim_ows, HeaderMap};
use crate::message::{RequestHead, RequestTarget, ResponseHead, Version};

pub fn parse_request_head(block: &[u8], max_fields: usize, strict_crlf: bool) -> Result<RequestHead, ParseError> {
    let mut lines = Lines::new(block, strict_crlf);
    let start = lines.next_line()?.ok_or(ParseError::BadStartLine)?;
    if start.is_empty() {
        return Err(ParseError::BadStartLine);
    }

    let mut parts = start.split(|&b| b == b' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) => (m, t, v),
        _ => return Err(ParseError::BadStartLine),
    };

    if !is_token(method) {
        return Err(ParseError::BadStartLine);
    }
    let method = std::str::from_utf8(method)
        .map_err(|_| ParseError::BadStartLine)?
        .to_string();
    let version = parse_version(version)?;
    let target = parse_target(target, &method)?;
    let headers = parse_fields(&mut lines, max_fields)?;

    // RFC 9112 §3.2: exactly one Host field on HTTP/1.1.
    let hosts = headers.count("host");
    if hosts > 1 || (hosts == 0 && version == Version::Http11) {
        return Err(ParseError::BadHost);
    }

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}

pub fn parse_response_head(block: &[u8], max_fields: usize, strict_crlf: bool) -> Result<ResponseHead, ParseError> {
    let mut lines = Lines::new(block, strict_crlf);
    let start = lines.next_line()?.ok_or(ParseError::BadStartLine)?;

    let (version, rest) = match start.iter().position(|&b| b == b' ') {
        Some(sp) => (&start[..sp], &start[sp + 1..]),
        None => return Err(ParseError::BadStartLine),
    };
    let version = parse_version(version)?;

    // reason-phrase may be empty; some peers omit the space before it too
    let (status, reason) = match rest.iter().position(|&b| b == b' ') {
        Some(sp) => (&rest[..sp], &rest[sp + 1..]),
        None => (rest, &b""[..]),
    };
    let status = parse_status(status)?;
    if !reason.iter().all(|&b| is_field_octet(b)) {
        return Err(ParseError::BadStartLine);
    }
    let reason = String::from_utf8_lossy(reason).into_owned();

    let headers = parse_fields(&mut lines, max_fields)?;

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
    })
}

/// Parses a trailer section (same grammar as the header section).
pub fn parse_trailer_fields(block: &[u8], max_fields: usize, strict_crlf: bool) -> Result<HeaderMap, ParseError> {
    let mut lines = Lines::new(block, strict_crlf);
    parse_fields(&mut lines, max_fields)
}

fn parse_fields(lines: &mut Lines<'_>, max_fields: usize) -> Result<HeaderMap, ParseError> {
    let mut headers = HeaderMap::with_capacity(16);
    loop {
        let line = lines.next_line()?.ok_or(ParseError::BadHeaderField)?;
        if line.is_empty() {
            return Ok(headers);
        }
        if line[0] == b' ' || line[0] == b'\t' {
            // obs-fold continuation line
            return Err(ParseError::BadHeaderField);
        }
        if headers.len() >= max_fields {
            return Err(ParseError::TooManyHeaders);
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::BadHeaderField)?;
        let name = &line[..colon];
        // a token can contain no whitespace, so "name :" is rejected here
        if !is_token(name) {
            return Err(ParseError::BadHeaderField);
        }
        let value = trim_ows(&line[colon + 1..]);
        if !value.iter().all(|&b| is_field_octet(b)) {
            return Err(ParseError::BadHeaderField);
        }

        let name = std::str::from_utf8(name).map_err(|_| ParseError::BadHeaderField)?;
        headers.append(name, value);
    }
}

fn parse_version(raw: &[u8]) -> Result<Version, ParseError> {
    match raw {
        b"HTTP/1.1" => Ok(Version::Http11),
        b"HTTP/1.0" => Ok(Version::Http10),
        _ => Err(ParseError::BadStartLine),
    }
}

fn parse_status(raw: &[u8]) -> Result<u16, ParseError> {
    if raw.len() != 3 || !raw.iter().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::BadStartLine);
    }
    let status = (raw[0] - b'0') as u16 * 100 + (raw[1] - b'0') as u16 * 10 + (raw[2] - b'0') as u16;
    if !(100..=599).contains(&status) {
        return Err(ParseError::BadStartLine);
    }
    Ok(status)
}

fn parse_target(raw: &[u8], method: &str) -> Result<RequestTarget, ParseError> {
    if raw.is_empty() || !raw.iter().all(|&b| (0x21..=0x7e).contains(&b)) {
        return Err(ParseError::BadStartLine);
    }
    // visible ASCII only, checked above
    let s = std::str::from_utf8(raw).map_err(|_| ParseError::BadStartLine)?;

    if s == "*" {
        if !method.eq_ignore_ascii_case("OPTIONS") {
            return Err(ParseError::BadStartLine);
        }
        return Ok(RequestTarget::Asterisk);
    }

    if method.eq_ignore_ascii_case("CONNECT") {
        return parse_authority_target(s);
    }

    if s.starts_with('/') {
        return Ok(RequestTarget::Origin(s.to_string()));
    }

    if s.starts_with("http://") || s.starts_with("https://") {
        return Ok(RequestTarget::Absolute(s.to_string()));
    }

    Err(ParseError::BadStartLine)
}

/// `host:port`, port mandatory, for CONNECT.
fn parse_authority_target(s: &str) -> Result<RequestTarget, ParseError> {
    let (host, port) = s.rsplit_once(':').ok_or(ParseError::BadStartLine)?;
    if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::BadStartLine);
    }
    Ok(RequestTarget::Authority(s.to_string()))
}

/// Octets legal inside a field value or reason phrase: HTAB, SP, visible
/// ASCII, and obs-text. Bare control characters are rejected.
fn is_field_octet(b: u8) -> bool {
    b == b'\t' || (0x20..=0x7e).contains(&b) || b >= 0x80
}

struct Lines<'a> {
    rest: &'a [u8],
    strict_crlf: bool,
}

impl<'a> Lines<'a> {
    fn new(block: &'a [u8], strict_crlf: bool) -> Self {
        Self {
            rest: block,
            strict_crlf,
        }
    }

    /// Next terminated line, terminator stripped. `Ok(None)` at end of block.
    fn next_line(&mut self) -> Result<Option<&'a [u8]>, ParseError> {
        if self.rest.is_empty() {
            return Ok(None);
        }
        let nl = match self.rest.iter().position(|&b| b == b'\n') {
            Some(nl) => nl,
            // head blocks always end in a terminator; anything else is malformed
            None => return Err(ParseError::BadHeaderField),
        };
        let (content, total) = if nl > 0 && self.rest[nl - 1] == b'\r' {
            (&self.rest[..nl - 1], nl + 1)
        } else if self.strict_crlf {
            // a bare LF does not terminate; the stray byte fails grammar checks
            return Err(ParseError::BadHeaderField);
        } else {
            (&self.rest[..nl], nl + 1)
        };
        self.rest = &self.rest[total..];
        Ok(Some(content))
    }
}
