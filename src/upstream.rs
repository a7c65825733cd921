//! Client-side HTTP/1.1 connection to an upstream origin.
//!
//! The relay drives this by hand: send the rewritten head, forward the
//! request body in whichever framing the head declares, read the final
//! response head (interim 1xx responses are consumed here, never relayed),
//! then pull response body frames until the framing says the message is
//! over. A connection that ends a message cleanly and was not told to close
//! can go back to the pool.

use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::buffer::ReadBuffer;
use crate::chunked::{self, ChunkedDecoder, Decoded};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::framing::BodyFraming;
use crate::handler::BodyFrame;
use crate::headers::HeaderMap;
use crate::message::{RequestHead, ResponseHead, Version};
use crate::parser;

#[derive(Debug)]
pub struct UpstreamConn {
    authority: String,
    cursor: ReadBuffer<TcpStream>,
    config: Arc<Config>,
    body: BodyState,
    /// Framing on this connection can no longer be trusted.
    broken: bool,
    /// The upstream asked for (or implied) closing after this response.
    close_hinted: bool,
}

#[derive(Debug)]
enum BodyState {
    /// Between messages.
    Done,
    Fixed { remaining: u64 },
    Chunked(ChunkedDecoder),
    ToClose,
}

impl UpstreamConn {
    pub async fn connect(authority: &str, config: Arc<Config>) -> Result<UpstreamConn> {
        // a bare host dials the default http port
        let addr = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{authority}:80")
        };
        let stream = timeout(config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::upstream_timeout(format!("connecting to {authority}")))?
            .map_err(|err| Error::upstream(format!("connect to {authority} failed: {err}")))?;
        let _ = stream.set_nodelay(true);
        trace!(%authority, "connected to upstream");
        Ok(Self {
            authority: authority.to_string(),
            cursor: ReadBuffer::new(stream, true),
            config,
            body: BodyState::Done,
            broken: false,
            close_hinted: false,
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn close_hinted(&self) -> bool {
        self.close_hinted
    }

    /// The last message ended cleanly and nothing asked for a close.
    pub fn is_reusable(&self) -> bool {
        !self.broken && !self.close_hinted && matches!(self.body, BodyState::Done)
    }

    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub async fn send_head(&mut self, head: &RequestHead) -> Result<()> {
        let mut buf = BytesMut::with_capacity(256);
        head.encode(&mut buf);
        self.write(&buf).await
    }

    /// Raw body bytes, for a `Content-Length`-framed outbound body.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.write(data).await
    }

    /// One re-encoded chunk of an outbound chunked body.
    pub async fn send_chunk(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(data.len() + 16);
        chunked::encode_chunk(data, &mut buf);
        self.write(&buf).await
    }

    /// Terminal chunk and trailer section of an outbound chunked body.
    pub async fn send_end(&mut self, trailers: &HeaderMap) -> Result<()> {
        let mut buf = BytesMut::with_capacity(64);
        chunked::encode_end(trailers, &mut buf);
        self.write(&buf).await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        match timeout(self.config.write_timeout(), self.cursor.io_mut().flush()).await {
            Err(_) => {
                self.broken = true;
                Err(Error::upstream_timeout("writing to upstream"))
            }
            Ok(Err(err)) => {
                self.broken = true;
                Err(Error::upstream(format!("write to upstream failed: {err}")))
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match timeout(self.config.write_timeout(), self.cursor.io_mut().write_all(data)).await {
            Err(_) => {
                self.broken = true;
                Err(Error::upstream_timeout("writing to upstream"))
            }
            Ok(Err(err)) => {
                self.broken = true;
                Err(Error::upstream(format!("write to upstream failed: {err}")))
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Reads response heads until a final (non-1xx) one arrives. Interim
    /// responses are discarded; relaying them mid-pipeline would desync the
    /// client.
    pub async fn read_final_response_head(&mut self) -> Result<ResponseHead> {
        loop {
            let block = loop {
                let found = self.cursor.head_block(self.config.max_header_bytes).map_err(|err| {
                    self.broken = true;
                    Error::upstream(format!("bad response head: {err}"))
                })?;
                if let Some(block) = found {
                    break block;
                }
                self.fill("waiting for upstream response head").await?;
            };

            let head = parser::parse_response_head(&block, self.config.max_header_fields, true)
                .map_err(|err| {
                    self.broken = true;
                    Error::upstream(format!("unparseable response head: {err}"))
                })?;

            if head.is_informational() {
                debug!(status = head.status, "discarding upstream interim response");
                continue;
            }

            if head.version == Version::Http10 || head.headers.has_token("connection", "close") {
                self.close_hinted = true;
            }
            return Ok(head);
        }
    }

    /// Arms the body reader with the resolved framing of the current
    /// response.
    pub fn begin_body(&mut self, framing: BodyFraming) {
        self.body = match framing {
            BodyFraming::Absent | BodyFraming::FixedLength(0) => BodyState::Done,
            BodyFraming::FixedLength(len) => BodyState::Fixed { remaining: len },
            BodyFraming::Chunked => BodyState::Chunked(ChunkedDecoder::new(
                self.config.max_chunk_size,
                self.config.max_header_bytes,
                self.config.max_header_fields,
                true,
            )),
            BodyFraming::ToConnectionClose => {
                self.close_hinted = true;
                BodyState::ToClose
            }
        };
    }

    /// Next response body frame, or `None` once the body is complete.
    pub async fn next_frame(&mut self) -> Result<Option<BodyFrame>> {
        loop {
            // move the state out so filling does not fight the borrow
            match std::mem::replace(&mut self.body, BodyState::Done) {
                BodyState::Done => return Ok(None),
                BodyState::Fixed { remaining } => {
                    if self.cursor.is_empty() {
                        self.body = BodyState::Fixed { remaining };
                        self.fill("reading upstream response body").await?;
                        continue;
                    }
                    let take = remaining.min(usize::MAX as u64) as usize;
                    let data = self.cursor.take(take);
                    let remaining = remaining - data.len() as u64;
                    if remaining > 0 {
                        self.body = BodyState::Fixed { remaining };
                    }
                    return Ok(Some(BodyFrame::Data(data)));
                }
                BodyState::Chunked(mut decoder) => match decoder.decode(self.cursor.buf_mut()) {
                    Ok(Decoded::Data(data)) => {
                        self.body = BodyState::Chunked(decoder);
                        return Ok(Some(BodyFrame::Data(data)));
                    }
                    Ok(Decoded::Complete(trailers)) => {
                        if trailers.is_empty() {
                            return Ok(None);
                        }
                        return Ok(Some(BodyFrame::Trailers(trailers)));
                    }
                    Ok(Decoded::Incomplete) => {
                        self.body = BodyState::Chunked(decoder);
                        self.fill("reading upstream response body").await?;
                    }
                    Err(err) => {
                        self.broken = true;
                        return Err(Error::upstream(format!("bad chunked response body: {err}")));
                    }
                },
                BodyState::ToClose => {
                    if self.cursor.is_empty() {
                        match timeout(self.config.read_timeout(), self.cursor.fill()).await {
                            Err(_) => {
                                self.broken = true;
                                return Err(Error::upstream_timeout(
                                    "reading upstream response body",
                                ));
                            }
                            // close IS the delimiter here
                            Ok(Ok(0)) => {
                                self.broken = true;
                                return Ok(None);
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(err)) => {
                                self.broken = true;
                                return Err(Error::upstream(format!(
                                    "read from upstream failed: {err}"
                                )));
                            }
                        }
                    }
                    self.body = BodyState::ToClose;
                    let buffered = self.cursor.buffered();
                    return Ok(Some(BodyFrame::Data(self.cursor.take(buffered))));
                }
            }
        }
    }

    /// One fill where EOF and failure both poison the connection.
    async fn fill(&mut self, what: &'static str) -> Result<()> {
        match timeout(self.config.read_timeout(), self.cursor.fill()).await {
            Err(_) => {
                self.broken = true;
                Err(Error::upstream_timeout(what))
            }
            Ok(Ok(0)) => {
                self.broken = true;
                Err(Error::upstream("upstream closed mid-message"))
            }
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => {
                self.broken = true;
                Err(Error::upstream(format!("read from upstream failed: {err}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot upstream that answers every accepted connection with a
    /// canned response after seeing a complete request head.
    async fn canned_upstream(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let authority = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut byte = [0u8; 1];
                    while !head.ends_with(b"\r\n\r\n") {
                        if socket.read_exact(&mut byte).await.is_err() {
                            return;
                        }
                        head.push(byte[0]);
                    }
                    let _ = socket.write_all(response).await;
                });
            }
        });
        authority
    }

    fn get_request(authority: &str) -> RequestHead {
        let mut headers = HeaderMap::new();
        headers.append("Host", authority.to_string());
        RequestHead {
            method: "GET".to_string(),
            target: crate::message::RequestTarget::Origin("/".to_string()),
            version: Version::Http11,
            headers,
        }
    }

    #[tokio::test]
    async fn round_trips_a_fixed_length_response() {
        let authority =
            canned_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        let mut conn = UpstreamConn::connect(&authority, Arc::new(Config::default()))
            .await
            .unwrap();

        conn.send_head(&get_request(&authority)).await.unwrap();
        conn.flush().await.unwrap();
        let head = conn.read_final_response_head().await.unwrap();
        assert_eq!(head.status, 200);

        let resolved = framing::resolve_response(&head, "GET", conn.close_hinted()).unwrap();
        assert_eq!(resolved, BodyFraming::FixedLength(5));
        conn.begin_body(resolved);

        let mut body = Vec::new();
        while let Some(frame) = conn.next_frame().await.unwrap() {
            if let BodyFrame::Data(data) = frame {
                body.extend_from_slice(&data);
            }
        }
        assert_eq!(body, b"hello");
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn interim_responses_are_discarded() {
        let authority = canned_upstream(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n",
        )
        .await;
        let mut conn = UpstreamConn::connect(&authority, Arc::new(Config::default()))
            .await
            .unwrap();

        conn.send_head(&get_request(&authority)).await.unwrap();
        let head = conn.read_final_response_head().await.unwrap();
        assert_eq!(head.status, 204);
    }

    #[tokio::test]
    async fn connection_close_poisons_reuse() {
        let authority = canned_upstream(
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let mut conn = UpstreamConn::connect(&authority, Arc::new(Config::default()))
            .await
            .unwrap();

        conn.send_head(&get_request(&authority)).await.unwrap();
        let head = conn.read_final_response_head().await.unwrap();
        conn.begin_body(framing::resolve_response(&head, "GET", true).unwrap());
        assert!(conn.close_hinted());
        assert!(!conn.is_reusable());
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_upstream_error() {
        // a freshly bound-then-dropped listener leaves the port closed
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = UpstreamConn::connect(
            &format!("127.0.0.1:{port}"),
            Arc::new(Config::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), Some(502));
    }
}
