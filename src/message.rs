//! Request and response heads and their wire serialization.

use bytes::BytesMut;
use std::fmt;

use crate::headers::HeaderMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four request-target forms of RFC 9112 §3.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// `/path?query` — the common case.
    Origin(String),
    /// Full URI, as sent to forward proxies.
    Absolute(String),
    /// `host:port`, only valid for CONNECT.
    Authority(String),
    /// `*`, only valid for OPTIONS.
    Asterisk,
}

impl RequestTarget {
    pub fn as_str(&self) -> &str {
        match self {
            RequestTarget::Origin(s) | RequestTarget::Absolute(s) | RequestTarget::Authority(s) => s,
            RequestTarget::Asterisk => "*",
        }
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: RequestTarget,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.method.as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.target.as_str().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.version.as_str().as_bytes());
        buf.extend_from_slice(b"\r\n");
        encode_fields(&self.headers, buf);
        buf.extend_from_slice(b"\r\n");
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            version: Version::Http11,
            status,
            reason: canonical_reason(status).to_string(),
            headers: HeaderMap::new(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.version.as_str().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.status.to_string().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.reason.as_bytes());
        buf.extend_from_slice(b"\r\n");
        encode_fields(&self.headers, buf);
        buf.extend_from_slice(b"\r\n");
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }
}

fn encode_fields(headers: &HeaderMap, buf: &mut BytesMut) {
    for field in headers {
        buf.extend_from_slice(field.name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(&field.value);
        buf.extend_from_slice(b"\r\n");
    }
}

pub fn canonical_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Content Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_request_head() {
        let mut head = RequestHead {
            method: "GET".to_string(),
            target: RequestTarget::Origin("/index.html?q=1".to_string()),
            version: Version::Http11,
            headers: HeaderMap::new(),
        };
        head.headers.append("Host", "example.com");
        head.headers.append("Accept", "*/*");

        let mut buf = BytesMut::new();
        head.encode(&mut buf);
        assert_eq!(
            &buf[..],
            b"GET /index.html?q=1 HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n" as &[u8],
        );
    }

    #[test]
    fn encode_response_head() {
        let mut head = ResponseHead::new(200);
        head.headers.append("Content-Length", "0");

        let mut buf = BytesMut::new();
        head.encode(&mut buf);
        assert_eq!(&buf[..], b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n" as &[u8]);
    }

    #[test]
    fn target_forms_display() {
        assert_eq!(RequestTarget::Asterisk.as_str(), "*");
        assert_eq!(RequestTarget::Origin("/".into()).as_str(), "/");
        assert_eq!(RequestTarget::Authority("h:443".into()).as_str(), "h:443");
    }

    #[test]
    fn reasons() {
        assert_eq!(canonical_reason(200), "OK");
        assert_eq!(canonical_reason(502), "Bad Gateway");
        assert_eq!(canonical_reason(599), "");
    }
}
