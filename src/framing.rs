//! Body-framing resolution.
//!
//! The decision order here is the smuggling-resistance boundary: conflicting
//! or malformed framing headers are a hard error, never resolved by
//! guessing. The resolver runs once per message, before any body byte is
//! exposed, and its result is immutable for that message's lifetime.

use crate::error::Error;
use crate::headers::HeaderMap;
use crate::message::{RequestHead, ResponseHead};

/// Body length discipline for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Absent,
    FixedLength(u64),
    Chunked,
    /// Response body delimited by connection close.
    ToConnectionClose,
}

impl BodyFraming {
    pub fn is_absent(&self) -> bool {
        matches!(self, BodyFraming::Absent) || matches!(self, BodyFraming::FixedLength(0))
    }
}

pub fn resolve_request(head: &RequestHead) -> Result<BodyFraming, Error> {
    resolve(&head.headers, Direction::Request, false)
}

/// Resolves a response's framing. Needs the associated request's method and
/// whether the connection is already expected to close after this message.
pub fn resolve_response(
    head: &ResponseHead,
    request_method: &str,
    connection_will_close: bool,
) -> Result<BodyFraming, Error> {
    // responses to HEAD and 1xx/204/304 never carry a body, whatever the
    // headers claim
    if request_method.eq_ignore_ascii_case("HEAD")
        || matches!(head.status, 100..=199 | 204 | 304)
    {
        return Ok(BodyFraming::Absent);
    }
    resolve(&head.headers, Direction::Response, connection_will_close)
}

#[derive(Clone, Copy, PartialEq)]
enum Direction {
    Request,
    Response,
}

fn resolve(
    headers: &HeaderMap,
    direction: Direction,
    connection_will_close: bool,
) -> Result<BodyFraming, Error> {
    let has_te = headers.contains("transfer-encoding");
    let has_cl = headers.contains("content-length");

    if has_te {
        if has_cl {
            return Err(Error::ambiguous_framing(
                "Content-Length present alongside Transfer-Encoding",
            ));
        }
        let codings = headers.token_list("transfer-encoding");
        let chunked = codings.iter().filter(|c| c.as_str() == "chunked").count();
        if codings.last().map(String::as_str) != Some("chunked") || chunked != 1 {
            return Err(Error::ambiguous_framing(
                "Transfer-Encoding does not end in a single chunked coding",
            ));
        }
        return Ok(BodyFraming::Chunked);
    }

    if has_cl {
        return Ok(BodyFraming::FixedLength(parse_content_length(headers)?));
    }

    match direction {
        Direction::Request => Ok(BodyFraming::Absent),
        Direction::Response if connection_will_close => Ok(BodyFraming::ToConnectionClose),
        Direction::Response => Ok(BodyFraming::Absent),
    }
}

/// A single valid non-negative integer. Repeated identical values are
/// collapsed (RFC 9110 §8.6); anything differing or malformed is rejected.
fn parse_content_length(headers: &HeaderMap) -> Result<u64, Error> {
    let mut resolved: Option<u64> = None;
    for value in headers.get_all("content-length") {
        for member in value.split(|&b| b == b',') {
            let member = crate::headers::trim_ows(member);
            if member.is_empty() || !member.iter().all(|b| b.is_ascii_digit()) {
                return Err(Error::ambiguous_framing("malformed Content-Length value"));
            }
            let parsed = std::str::from_utf8(member)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| Error::ambiguous_framing("Content-Length out of range"))?;
            match resolved {
                None => resolved = Some(parsed),
                Some(prev) if prev == parsed => {}
                Some(_) => {
                    return Err(Error::ambiguous_framing(
                        "multiple differing Content-Length values",
                    ))
                }
            }
        }
    }
    resolved.ok_or_else(|| Error::ambiguous_framing("empty Content-Length value"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{RequestTarget, Version};

    fn request_with(fields: &[(&str, &str)]) -> RequestHead {
        let mut headers = HeaderMap::new();
        headers.append("Host", "a");
        for (name, value) in fields {
            headers.append(*name, *value);
        }
        RequestHead {
            method: "POST".to_string(),
            target: RequestTarget::Origin("/".to_string()),
            version: Version::Http11,
            headers,
        }
    }

    fn response_with(status: u16, fields: &[(&str, &str)]) -> ResponseHead {
        let mut head = ResponseHead::new(status);
        for (name, value) in fields {
            head.headers.append(*name, *value);
        }
        head
    }

    #[test]
    fn request_defaults_to_absent() {
        let head = request_with(&[]);
        assert_eq!(resolve_request(&head).unwrap(), BodyFraming::Absent);
    }

    #[test]
    fn content_length_gives_fixed() {
        let head = request_with(&[("Content-Length", "5")]);
        assert_eq!(resolve_request(&head).unwrap(), BodyFraming::FixedLength(5));
    }

    #[test]
    fn final_chunked_coding_gives_chunked() {
        let head = request_with(&[("Transfer-Encoding", "gzip, chunked")]);
        assert_eq!(resolve_request(&head).unwrap(), BodyFraming::Chunked);
    }

    #[test]
    fn cl_with_te_is_ambiguous_in_any_order() {
        // tested across header-order permutations: this is the classic
        // request-smuggling disagreement
        let permutations: &[&[(&str, &str)]] = &[
            &[("Content-Length", "5"), ("Transfer-Encoding", "chunked")],
            &[("Transfer-Encoding", "chunked"), ("Content-Length", "5")],
            &[("Transfer-Encoding", "chunked"), ("X-Pad", "1"), ("Content-Length", "5")],
            &[("Content-Length", "5"), ("X-Pad", "1"), ("Transfer-Encoding", "chunked")],
        ];
        for fields in permutations {
            let head = request_with(fields);
            assert!(
                matches!(resolve_request(&head), Err(Error::AmbiguousFraming(_))),
                "accepted ambiguous framing for {fields:?}",
            );
        }
    }

    #[test]
    fn te_not_ending_in_chunked_is_rejected() {
        for value in ["gzip", "chunked, gzip"] {
            let head = request_with(&[("Transfer-Encoding", value)]);
            assert!(matches!(resolve_request(&head), Err(Error::AmbiguousFraming(_))));
        }
    }

    #[test]
    fn double_chunked_is_rejected() {
        let head = request_with(&[("Transfer-Encoding", "chunked, chunked")]);
        assert!(matches!(resolve_request(&head), Err(Error::AmbiguousFraming(_))));
        let head = request_with(&[
            ("Transfer-Encoding", "chunked"),
            ("Transfer-Encoding", "chunked"),
        ]);
        assert!(matches!(resolve_request(&head), Err(Error::AmbiguousFraming(_))));
    }

    #[test]
    fn repeated_identical_content_length_is_collapsed() {
        let head = request_with(&[("Content-Length", "7"), ("Content-Length", "7")]);
        assert_eq!(resolve_request(&head).unwrap(), BodyFraming::FixedLength(7));
        let head = request_with(&[("Content-Length", "7, 7")]);
        assert_eq!(resolve_request(&head).unwrap(), BodyFraming::FixedLength(7));
    }

    #[test]
    fn conflicting_or_malformed_content_length_is_rejected() {
        for fields in [
            vec![("Content-Length", "7"), ("Content-Length", "8")],
            vec![("Content-Length", "7, 8")],
            vec![("Content-Length", "-1")],
            vec![("Content-Length", "4x")],
            vec![("Content-Length", "")],
            vec![("Content-Length", "99999999999999999999999999")],
        ] {
            let head = request_with(&fields);
            assert!(
                matches!(resolve_request(&head), Err(Error::AmbiguousFraming(_))),
                "accepted {fields:?}",
            );
        }
    }

    #[test]
    fn bodyless_statuses_ignore_framing_headers() {
        for status in [100, 101, 204, 304] {
            let head = response_with(status, &[("Content-Length", "10")]);
            assert_eq!(
                resolve_response(&head, "GET", false).unwrap(),
                BodyFraming::Absent
            );
        }
    }

    #[test]
    fn head_responses_never_have_a_body() {
        let head = response_with(200, &[("Content-Length", "10")]);
        assert_eq!(
            resolve_response(&head, "HEAD", false).unwrap(),
            BodyFraming::Absent
        );
    }

    #[test]
    fn unframed_response_reads_to_close_when_closing() {
        let head = response_with(200, &[]);
        assert_eq!(
            resolve_response(&head, "GET", true).unwrap(),
            BodyFraming::ToConnectionClose
        );
        assert_eq!(
            resolve_response(&head, "GET", false).unwrap(),
            BodyFraming::Absent
        );
    }
}
