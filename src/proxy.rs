//! Reverse-proxy handler: relays each client exchange to the configured
//! upstream over a pooled HTTP/1.1 connection.
//!
//! Hop-by-hop fields never cross the relay in either direction, and framing
//! headers are re-derived from the resolved body tag rather than forwarded,
//! so a message that survived the parser cannot smuggle a second framing
//! opinion through the proxy.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::framing::{self, BodyFraming};
use crate::handler::{Body, BodyFrame, Handler, Request, Response, ResponseBody};
use crate::headers::HeaderMap;
use crate::message::{RequestHead, Version};
use crate::pool::UpstreamPool;
use crate::upstream::UpstreamConn;

/// Fields that bind to one connection and must not cross the relay
/// (RFC 9110 §7.6.1). Framing fields are listed too: they are re-derived,
/// never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "content-length",
];

const VIA_TOKEN: &str = "1.1 smoky";

#[derive(Debug)]
pub struct ProxyHandler {
    upstream: String,
    pool: Arc<UpstreamPool>,
    config: Arc<Config>,
}

impl ProxyHandler {
    pub fn new(upstream: String, config: Arc<Config>) -> Self {
        Self {
            upstream,
            pool: Arc::new(UpstreamPool::new(&config)),
            config,
        }
    }

    async fn acquire(&self) -> Result<UpstreamConn> {
        if let Some(conn) = self.pool.checkout(&self.upstream) {
            return Ok(conn);
        }
        UpstreamConn::connect(&self.upstream, Arc::clone(&self.config)).await
    }

    /// Drains the upstream response body into a client-facing stream,
    /// returning the connection to the pool once the body ends cleanly.
    fn spawn_relay(&self, mut conn: UpstreamConn, resolved: BodyFraming) -> Body {
        let (tx, body) = Body::channel(8);
        let pool = Arc::clone(&self.pool);
        conn.begin_body(resolved);
        tokio::spawn(async move {
            relay_body(&mut conn, tx).await;
            pool.checkin(conn);
        });
        body
    }
}

async fn relay_body(conn: &mut UpstreamConn, tx: mpsc::Sender<Result<BodyFrame>>) {
    loop {
        match conn.next_frame().await {
            Ok(Some(frame)) => {
                if tx.send(Ok(frame)).await.is_err() {
                    // the client side went away mid-body
                    conn.mark_broken();
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                debug!("upstream body relay failed: {err}");
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}

#[async_trait]
impl Handler for ProxyHandler {
    async fn handle(&self, mut request: Request) -> Result<Response> {
        if request.head.method.eq_ignore_ascii_case("CONNECT") {
            let mut response = Response::new(501);
            response.headers.append("Content-Type", "text/plain");
            response.body = ResponseBody::Full(Bytes::from_static(b"tunneling is not supported\n"));
            return Ok(response);
        }

        let request_framing = framing::resolve_request(&request.head)?;
        let outbound = outbound_request_head(&request.head, &self.upstream, request_framing);

        let mut conn = self.acquire().await?;
        conn.send_head(&outbound).await?;
        forward_request_body(&mut conn, &mut request.body, request_framing).await?;
        conn.flush().await?;

        let upstream_head = conn.read_final_response_head().await?;
        let resolved =
            framing::resolve_response(&upstream_head, &request.head.method, conn.close_hinted())
                .map_err(|err| Error::upstream(format!("upstream framing rejected: {err}")))?;
        trace!(
            status = upstream_head.status,
            framing = ?resolved,
            "relaying upstream response",
        );

        let mut response = Response::new(upstream_head.status);
        response.headers = relayed_headers(&upstream_head.headers);
        // A HEAD response has no body the writer could derive a length
        // from; the origin's declaration is the answer, so carry it through.
        if request.head.is_head() {
            if let Some(len) = upstream_head.headers.get("content-length") {
                response.headers.append("Content-Length", len.to_vec());
            }
        }

        response.body = match resolved {
            BodyFraming::Absent | BodyFraming::FixedLength(0) => {
                conn.begin_body(BodyFraming::Absent);
                self.pool.checkin(conn);
                ResponseBody::Empty
            }
            BodyFraming::FixedLength(len) => ResponseBody::Stream {
                body: self.spawn_relay(conn, resolved),
                len: Some(len),
            },
            BodyFraming::Chunked | BodyFraming::ToConnectionClose => ResponseBody::Stream {
                body: self.spawn_relay(conn, resolved),
                len: None,
            },
        };
        Ok(response)
    }
}

/// Streams the (already decoded) request body upstream, re-encoded in the
/// framing the outbound head declares.
async fn forward_request_body(
    conn: &mut UpstreamConn,
    body: &mut Body,
    request_framing: BodyFraming,
) -> Result<()> {
    let chunked = request_framing == BodyFraming::Chunked;
    let mut trailers = HeaderMap::new();
    while let Some(frame) = body.frame().await {
        match frame? {
            BodyFrame::Data(data) => {
                if chunked {
                    conn.send_chunk(&data).await?;
                } else {
                    conn.send_raw(&data).await?;
                }
            }
            BodyFrame::Trailers(fields) => trailers = fields,
        }
    }
    if chunked {
        conn.send_end(&trailers).await?;
    }
    Ok(())
}

/// Copies `headers` minus hop-by-hop fields, including any field the
/// `Connection` header names. Order is preserved.
fn strip_connection_headers(headers: &HeaderMap) -> HeaderMap {
    let named = headers.token_list("connection");
    headers
        .iter()
        .filter(|field| {
            let name = field.name.to_ascii_lowercase();
            !HOP_BY_HOP.contains(&name.as_str()) && !named.contains(&name)
        })
        .cloned()
        .collect()
}

/// The head sent upstream: target preserved, `Host` rewritten to the
/// upstream authority, hop-by-hop fields dropped, framing re-declared from
/// the resolved tag, and our `Via` entry appended.
fn outbound_request_head(
    head: &RequestHead,
    authority: &str,
    request_framing: BodyFraming,
) -> RequestHead {
    let mut headers = HeaderMap::new();
    headers.append("Host", authority.to_string());
    for field in strip_connection_headers(&head.headers) {
        if field.name.eq_ignore_ascii_case("host") {
            continue;
        }
        headers.append(field.name, field.value);
    }
    match request_framing {
        BodyFraming::FixedLength(len) if len > 0 => {
            headers.append("Content-Length", len.to_string());
        }
        BodyFraming::Chunked => headers.append("Transfer-Encoding", "chunked"),
        _ => {}
    }
    headers.append("Via", VIA_TOKEN);

    RequestHead {
        method: head.method.clone(),
        target: head.target.clone(),
        version: Version::Http11,
        headers,
    }
}

/// Response headers as relayed to the client. Framing fields are dropped
/// here and re-derived by the connection writer.
fn relayed_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = strip_connection_headers(headers);
    out.append("Via", VIA_TOKEN);
    out
}
