use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Parser-level errors.
///
/// Every variant is terminal for its connection: once the framing of the
/// byte stream is in doubt, no further bytes on it can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed start line")]
    BadStartLine,

    #[error("malformed header field")]
    BadHeaderField,

    #[error("header block exceeds configured limit")]
    HeaderTooLarge,

    #[error("too many header fields")]
    TooManyHeaders,

    #[error("line exceeds configured limit")]
    LineTooLong,

    #[error("malformed chunked encoding")]
    BadChunk,

    #[error("missing or duplicated Host header")]
    BadHost,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("ambiguous message framing: {0}")]
    AmbiguousFraming(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn ambiguous_framing<T: fmt::Display>(msg: T) -> Self {
        Error::AmbiguousFraming(msg.to_string())
    }

    pub fn payload_too_large<T: fmt::Display>(msg: T) -> Self {
        Error::PayloadTooLarge(msg.to_string())
    }

    pub fn upstream<T: fmt::Display>(msg: T) -> Self {
        Error::Upstream(msg.to_string())
    }

    pub fn upstream_timeout<T: fmt::Display>(msg: T) -> Self {
        Error::UpstreamTimeout(msg.to_string())
    }

    pub fn internal<T: fmt::Display>(msg: T) -> Self {
        Error::Internal(msg.to_string())
    }

    /// Status code for the best-effort error response, if one applies.
    ///
    /// `None` means the connection is closed without writing anything,
    /// e.g. after a timeout or an IO failure.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Protocol(
                ParseError::HeaderTooLarge | ParseError::TooManyHeaders | ParseError::LineTooLong,
            ) => Some(431),
            Error::Protocol(_) => Some(400),
            Error::AmbiguousFraming(_) => Some(400),
            Error::PayloadTooLarge(_) => Some(413),
            Error::Upstream(_) => Some(502),
            Error::UpstreamTimeout(_) => Some(504),
            Error::Internal(_) => Some(500),
            Error::Io(_) | Error::Timeout(_) | Error::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_map_to_4xx() {
        assert_eq!(Error::from(ParseError::BadStartLine).status_code(), Some(400));
        assert_eq!(Error::from(ParseError::HeaderTooLarge).status_code(), Some(431));
        assert_eq!(Error::from(ParseError::TooManyHeaders).status_code(), Some(431));
        assert_eq!(Error::payload_too_large("chunk").status_code(), Some(413));
    }

    #[test]
    fn upstream_errors_map_to_gateway_codes() {
        assert_eq!(Error::upstream("connect refused").status_code(), Some(502));
        assert_eq!(Error::upstream_timeout("connect").status_code(), Some(504));
    }

    #[test]
    fn timeouts_produce_no_response() {
        assert_eq!(Error::Timeout("reading head").status_code(), None);
    }
}
