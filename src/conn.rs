//! Per-connection state machine.
//!
//! Each accepted connection is served by a reader/writer task pair joined at
//! a bounded FIFO queue of exchanges. The reader parses heads, spawns the
//! handler, and streams the request body to it; the next head may be parsed
//! while earlier handlers are still running (pipelining), bounded by the
//! queue capacity. The writer emits responses strictly in queue order: a
//! handler that finishes out of order sits buffered in its oneshot slot
//! until it reaches the head of the queue.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::buffer::ReadBuffer;
use crate::chunked::{self, ChunkedDecoder, Decoded};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::framing::{self, BodyFraming};
use crate::handler::{Body, BodyFrame, Handler, Request, Response, ResponseBody};
use crate::message::{RequestHead, ResponseHead, Version};
use crate::parser;

/// Frames buffered between the connection and a handler.
const BODY_CHANNEL_DEPTH: usize = 8;

/// Connection states, traced as the reader and writer move through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Idle,
    AwaitingHead,
    BodyStreaming,
    Dispatching,
    WritingResponse,
    Closing,
}

enum WriteOp {
    /// An interim 1xx head, written as soon as it reaches the queue head.
    Interim(ResponseHead),
    Exchange(Exchange),
}

/// One queued exchange: the slot its response will arrive in, plus what the
/// writer needs to frame that response.
struct Exchange {
    response: oneshot::Receiver<Result<Response>>,
    request_is_head: bool,
    version: Version,
    /// The request side already demanded closing after this exchange.
    close_after: bool,
}

/// Serves one accepted transport connection to completion.
pub async fn serve<S>(stream: S, handler: Arc<dyn Handler>, config: Arc<Config>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (ops_tx, ops_rx) = mpsc::channel(config.max_pipeline_depth);

    let writer = tokio::spawn(write_loop(write_half, ops_rx, Arc::clone(&config)));
    let read_result = read_loop(read_half, ops_tx, handler, config).await;

    if let Err(err) = writer.await {
        debug!("writer task failed: {err}");
    }
    read_result
}

async fn read_loop<R>(
    io: R,
    ops: mpsc::Sender<WriteOp>,
    handler: Arc<dyn Handler>,
    config: Arc<Config>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let strict = !config.allow_bare_lf;
    let mut cursor = ReadBuffer::new(io, strict);

    loop {
        // Idle until the first byte of the next request arrives.
        if cursor.is_empty() {
            trace!(state = ?ConnState::Idle, "waiting for request");
            match timeout(config.idle_timeout(), cursor.fill()).await {
                Err(_) => {
                    debug!("idle timeout, closing");
                    break;
                }
                Ok(Ok(0)) => break, // peer closed between requests
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    debug!("read failed while idle: {err}");
                    break;
                }
            }
        }

        trace!(state = ?ConnState::AwaitingHead, "reading request head");
        let block = match timeout(config.read_timeout(), read_head_block(&mut cursor, &config)).await
        {
            Err(_) => {
                debug!("timed out reading request head");
                break;
            }
            Ok(Ok(Some(block))) => block,
            Ok(Ok(None)) => break, // EOF before a complete head
            Ok(Err(err)) => {
                reject(&ops, err).await;
                break;
            }
        };

        let head = match parser::parse_request_head(&block, config.max_header_fields, strict) {
            Ok(head) => head,
            Err(err) => {
                reject(&ops, err.into()).await;
                break;
            }
        };

        let body_framing = match framing::resolve_request(&head) {
            Ok(body_framing) => body_framing,
            Err(err) => {
                reject(&ops, err).await;
                break;
            }
        };

        let close_after = request_wants_close(&head);
        trace!(
            method = %head.method,
            target = %head.target,
            framing = ?body_framing,
            close_after,
            "request head parsed",
        );

        // Answer Expect: 100-continue before touching the body. The interim
        // head sits in the same FIFO queue, so it is still written after
        // every earlier response.
        if head.version == Version::Http11
            && head.headers.has_token("expect", "100-continue")
            && !body_framing.is_absent()
        {
            if ops.send(WriteOp::Interim(ResponseHead::new(100))).await.is_err() {
                break;
            }
        }

        // Enqueue the exchange before the body finishes streaming, so the
        // next head can be read while the handler runs.
        let (response_tx, response_rx) = oneshot::channel();
        let exchange = Exchange {
            response: response_rx,
            request_is_head: head.is_head(),
            version: head.version,
            close_after,
        };
        if ops.send(WriteOp::Exchange(exchange)).await.is_err() {
            break; // writer is gone
        }

        trace!(state = ?ConnState::Dispatching, "dispatching to handler");
        let (body_tx, body) = Body::channel(BODY_CHANNEL_DEPTH);
        let request = Request { head, body };
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let result = handler.handle(request).await;
            let _ = response_tx.send(result);
        });

        trace!(state = ?ConnState::BodyStreaming, "streaming request body");
        if !stream_request_body(&mut cursor, body_framing, body_tx, &config).await {
            break; // framing is no longer trustworthy
        }

        if close_after {
            break;
        }
    }

    trace!(state = ?ConnState::Closing, "reader done");
    Ok(())
}

/// Buffers until a complete head block is available. `None` means the peer
/// closed before completing one.
///
/// RFC 9112 robustness: at most one empty line before the start-line. The
/// empty line may arrive split across reads, so the skip is re-attempted
/// after each fill until it can be decided.
async fn read_head_block<R>(cursor: &mut ReadBuffer<R>, config: &Config) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut may_skip_empty_line = true;
    loop {
        // A lone buffered `\r` is undecidable: it is either half of the
        // tolerated empty line or garbage. Wait for the next byte.
        if may_skip_empty_line
            && !(cursor.buffered() == 1 && cursor.buf_mut().first() == Some(&b'\r'))
        {
            cursor.skip_one_leading_crlf();
            may_skip_empty_line = false;
        }
        if let Some(block) = cursor.head_block(config.max_header_bytes)? {
            return Ok(Some(block));
        }
        if cursor.fill().await? == 0 {
            if !cursor.is_empty() {
                debug!("peer closed mid-head with {} bytes buffered", cursor.buffered());
            }
            return Ok(None);
        }
    }
}

/// Queues a pre-resolved error exchange so the failure is still answered in
/// FIFO order, then the connection closes.
async fn reject(ops: &mpsc::Sender<WriteOp>, err: Error) {
    warn!("rejecting request: {err}");
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(Err(err));
    let exchange = Exchange {
        response: rx,
        request_is_head: false,
        version: Version::Http11,
        close_after: true,
    };
    let _ = ops.send(WriteOp::Exchange(exchange)).await;
}

fn request_wants_close(head: &RequestHead) -> bool {
    if head.headers.has_token("connection", "close") {
        return true;
    }
    head.version == Version::Http10 && !head.headers.has_token("connection", "keep-alive")
}

/// Streams the request body into the handler's channel, always draining the
/// wire even if the handler stopped listening. Returns `false` when the
/// connection can no longer be trusted and must close.
async fn stream_request_body<R>(
    cursor: &mut ReadBuffer<R>,
    body_framing: BodyFraming,
    body_tx: mpsc::Sender<Result<BodyFrame>>,
    config: &Config,
) -> bool
where
    R: AsyncRead + Unpin,
{
    let mut sink = BodySink::new(body_tx);

    match body_framing {
        BodyFraming::Absent => true,
        // requests are never close-delimited (RFC 9112 §6.3)
        BodyFraming::ToConnectionClose => true,
        BodyFraming::FixedLength(mut remaining) => {
            while remaining > 0 {
                if cursor.is_empty() && !fill_body(cursor, &mut sink, config).await {
                    return false;
                }
                let take = remaining.min(usize::MAX as u64) as usize;
                let data = cursor.take(take);
                remaining -= data.len() as u64;
                sink.send(BodyFrame::Data(data)).await;
            }
            true
        }
        BodyFraming::Chunked => {
            let mut decoder = ChunkedDecoder::new(
                config.max_chunk_size,
                config.max_header_bytes,
                config.max_header_fields,
                !config.allow_bare_lf,
            );
            loop {
                match decoder.decode(cursor.buf_mut()) {
                    Ok(Decoded::Data(data)) => sink.send(BodyFrame::Data(data)).await,
                    Ok(Decoded::Complete(trailers)) => {
                        if !trailers.is_empty() {
                            sink.send(BodyFrame::Trailers(trailers)).await;
                        }
                        return true;
                    }
                    Ok(Decoded::Incomplete) => {
                        if !fill_body(cursor, &mut sink, config).await {
                            return false;
                        }
                    }
                    Err(err) => {
                        debug!("request body failed: {err}");
                        sink.fail(err).await;
                        return false;
                    }
                }
            }
        }
    }
}

/// One body-directed fill with the per-operation timeout applied.
async fn fill_body<R>(cursor: &mut ReadBuffer<R>, sink: &mut BodySink, config: &Config) -> bool
where
    R: AsyncRead + Unpin,
{
    match timeout(config.read_timeout(), cursor.fill()).await {
        Err(_) => {
            debug!("timed out reading request body");
            sink.fail(Error::Timeout("reading request body")).await;
            false
        }
        Ok(Ok(0)) => {
            debug!("peer closed mid-body");
            sink.fail(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
                .await;
            false
        }
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            debug!("read failed mid-body: {err}");
            sink.fail(err.into()).await;
            false
        }
    }
}

/// Send-or-discard wrapper: once the handler drops its body receiver, the
/// remaining frames are drained into the void to keep the wire in sync.
struct BodySink {
    tx: Option<mpsc::Sender<Result<BodyFrame>>>,
}

impl BodySink {
    fn new(tx: mpsc::Sender<Result<BodyFrame>>) -> Self {
        Self { tx: Some(tx) }
    }

    async fn send(&mut self, frame: BodyFrame) {
        if let Some(tx) = &self.tx {
            if tx.send(Ok(frame)).await.is_err() {
                self.tx = None;
            }
        }
    }

    async fn fail(&mut self, err: Error) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err)).await;
        }
    }
}

async fn write_loop<W>(mut io: W, mut ops: mpsc::Receiver<WriteOp>, config: Arc<Config>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(op) = ops.recv().await {
        match op {
            WriteOp::Interim(head) => {
                let mut buf = BytesMut::with_capacity(64);
                head.encode(&mut buf);
                if write_timed(&mut io, &buf, &config).await.is_err() {
                    break;
                }
            }
            WriteOp::Exchange(exchange) => {
                trace!(state = ?ConnState::WritingResponse, "awaiting queue head");
                let Exchange {
                    response: response_rx,
                    request_is_head,
                    version,
                    close_after,
                } = exchange;
                let result = response_rx
                    .await
                    .unwrap_or_else(|_| Err(Error::internal("handler dropped without responding")));

                let mut close = close_after;
                let response = match result {
                    Ok(response) => response,
                    Err(err) => {
                        close = true;
                        match error_response(&err) {
                            Some(response) => response,
                            // nothing sensible to say; just close
                            None => break,
                        }
                    }
                };

                match write_response(&mut io, response, request_is_head, version, close, &config)
                    .await
                {
                    Ok(closed) => {
                        if closed {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!("write failed: {err}");
                        break;
                    }
                }
            }
        }
    }

    // dropping the queue releases any buffered-but-unwritten responses
    drop(ops);
    let _ = io.shutdown().await;
}

/// Builds the best-effort error response, if the error maps to one.
fn error_response(err: &Error) -> Option<Response> {
    let status = err.status_code()?;
    let mut response = Response::new(status);
    let reason = crate::message::canonical_reason(status);
    response.headers.append("Content-Type", "text/plain");
    response.body = ResponseBody::Full(Bytes::from(format!("{status} {reason}\n")));
    Some(response)
}

/// Serializes and writes one response, deriving the framing headers from the
/// resolved body tag. Returns whether the connection is now closing.
async fn write_response<W>(
    io: &mut W,
    response: Response,
    request_is_head: bool,
    version: Version,
    close_hint: bool,
    config: &Config,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let mut close = close_hint || response.headers.has_token("connection", "close");

    let mut head = ResponseHead::new(response.status);
    head.headers = response.headers;

    enum BodyPlan {
        None,
        Full(Bytes),
        Raw(Body),
        Chunked(Body),
    }

    let bodyless_status = matches!(response.status, 100..=199 | 204 | 304);
    // A HEAD response describes the entity a GET would have returned; when
    // the handler declared its length explicitly, that declaration stands
    // instead of being re-derived from the (suppressed) body.
    let plan = if request_is_head && head.headers.contains("content-length") {
        BodyPlan::None
    } else {
        // framing is derived from the body tag, never taken from the handler
        head.headers.remove_all("content-length");
        head.headers.remove_all("transfer-encoding");
        match response.body {
            ResponseBody::Empty => {
                if !bodyless_status {
                    head.headers.append("Content-Length", "0");
                }
                BodyPlan::None
            }
            ResponseBody::Full(bytes) => {
                head.headers.append("Content-Length", bytes.len().to_string());
                BodyPlan::Full(bytes)
            }
            ResponseBody::Stream { body, len: Some(len) } => {
                head.headers.append("Content-Length", len.to_string());
                BodyPlan::Raw(body)
            }
            ResponseBody::Stream { body, len: None } => {
                if version == Version::Http11 {
                    head.headers.append("Transfer-Encoding", "chunked");
                    BodyPlan::Chunked(body)
                } else {
                    // a 1.0 client cannot parse chunked; delimit by close
                    close = true;
                    BodyPlan::Raw(body)
                }
            }
        }
    };

    if close && !head.headers.has_token("connection", "close") {
        head.headers.append("Connection", "close");
    }

    let mut buf = BytesMut::with_capacity(256);
    head.encode(&mut buf);
    write_timed(io, &buf, config).await?;

    // a HEAD response carries the framing headers but no body bytes
    if !request_is_head {
        match plan {
            BodyPlan::None => {}
            BodyPlan::Full(bytes) => write_timed(io, &bytes, config).await?,
            BodyPlan::Raw(mut body) => {
                while let Some(frame) = body.frame().await {
                    match frame? {
                        BodyFrame::Data(data) => write_timed(io, &data, config).await?,
                        BodyFrame::Trailers(_) => {}
                    }
                }
            }
            BodyPlan::Chunked(mut body) => {
                let mut trailers = None;
                while let Some(frame) = body.frame().await {
                    match frame? {
                        BodyFrame::Data(data) => {
                            let mut chunk = BytesMut::with_capacity(data.len() + 16);
                            chunked::encode_chunk(&data, &mut chunk);
                            write_timed(io, &chunk, config).await?;
                        }
                        BodyFrame::Trailers(t) => trailers = Some(t),
                    }
                }
                let mut end = BytesMut::with_capacity(64);
                chunked::encode_end(&trailers.unwrap_or_default(), &mut end);
                write_timed(io, &end, config).await?;
            }
        }
    }

    timeout(config.write_timeout(), io.flush())
        .await
        .map_err(|_| Error::Timeout("flushing write buffer"))??;
    Ok(close)
}

async fn write_timed<W>(io: &mut W, data: &[u8], config: &Config) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    timeout(config.write_timeout(), io.write_all(data))
        .await
        .map_err(|_| Error::Timeout("flushing write buffer"))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Feeds `input` to a served connection and returns everything written
    /// back, after the client half-closes.
    async fn drive(input: &[u8], handler: Arc<dyn Handler>) -> Vec<u8> {
        drive_with(input, handler, Config::default()).await
    }

    async fn drive_with(input: &[u8], handler: Arc<dyn Handler>, config: Config) -> Vec<u8> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(serve(server, handler, Arc::new(config)));

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        client_wr.write_all(input).await.unwrap();
        client_wr.shutdown().await.unwrap();

        let mut output = Vec::new();
        client_rd.read_to_end(&mut output).await.unwrap();
        task.await.unwrap().unwrap();
        output
    }

    #[tokio::test]
    async fn echo_of_minimal_get() {
        let output = drive(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n", Arc::new(EchoHandler)).await;
        assert_eq!(output, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn echo_of_fixed_length_body() {
        let output = drive(
            b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello",
            Arc::new(EchoHandler),
        )
        .await;
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn echo_of_chunked_body() {
        let output = drive(
            b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n",
            Arc::new(EchoHandler),
        )
        .await;
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("abcde"));
    }

    #[tokio::test]
    async fn keep_alive_serves_sequential_requests() {
        let output = drive(
            b"GET / HTTP/1.1\r\nHost: a\r\n\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\n",
            Arc::new(EchoHandler),
        )
        .await;
        let expected: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n\
                                HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn one_leading_crlf_is_tolerated() {
        let output = drive(b"\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\n", Arc::new(EchoHandler)).await;
        assert_eq!(output, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn leading_crlf_split_across_reads_is_tolerated() {
        let (client, server) = tokio::io::duplex(4 * 1024);
        let task = tokio::spawn(serve(
            server,
            Arc::new(EchoHandler) as Arc<dyn Handler>,
            Arc::new(Config::default()),
        ));

        // the empty line fragments at the read boundary: `\r` arrives alone
        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        client_wr.write_all(b"\r").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client_wr.write_all(b"\nGET / HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();
        client_wr.shutdown().await.unwrap();

        let mut output = Vec::new();
        client_rd.read_to_end(&mut output).await.unwrap();
        assert_eq!(output, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_start_line_gets_400_and_close() {
        let output = drive(b"NONSENSE\r\n\r\n", Arc::new(EchoHandler)).await;
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");
        assert!(text.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn ambiguous_framing_gets_400() {
        let output = drive(
            b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n",
            Arc::new(EchoHandler),
        )
        .await;
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 "), "{text}");
    }

    #[tokio::test]
    async fn oversized_head_gets_431() {
        let mut input = b"GET / HTTP/1.1\r\nHost: a\r\n".to_vec();
        input.extend_from_slice(b"X-Filler: ");
        input.extend(std::iter::repeat(b'x').take(9000));
        input.extend_from_slice(b"\r\n\r\n");
        let output = drive(&input, Arc::new(EchoHandler)).await;
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("HTTP/1.1 431 "), "{text}");
    }

    #[tokio::test]
    async fn connection_close_is_honored() {
        let output = drive(
            b"GET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n",
            Arc::new(EchoHandler),
        )
        .await;
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
        assert!(text.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn http10_without_keep_alive_closes() {
        let output = drive(b"GET / HTTP/1.0\r\n\r\n", Arc::new(EchoHandler)).await;
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Connection: close\r\n"), "{text}");
    }

    #[tokio::test]
    async fn expect_100_continue_gets_interim_response() {
        let output = drive(
            b"POST / HTTP/1.1\r\nHost: a\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nok",
            Arc::new(EchoHandler),
        )
        .await;
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"), "{text}");
        assert!(text.ends_with("ok"));
    }

    struct FixedBody;

    #[async_trait]
    impl Handler for FixedBody {
        async fn handle(&self, _request: Request) -> Result<Response> {
            let mut response = Response::new(200);
            response.body = ResponseBody::Full(Bytes::from_static(b"data"));
            Ok(response)
        }
    }

    #[tokio::test]
    async fn head_response_has_framing_but_no_body() {
        let output = drive(b"HEAD / HTTP/1.1\r\nHost: a\r\n\r\n", Arc::new(FixedBody)).await;
        assert_eq!(output, b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n");
    }

    /// Answers with no body but an explicit length, the way a relay reports
    /// an origin entity it never fetched.
    struct DeclaredLength;

    #[async_trait]
    impl Handler for DeclaredLength {
        async fn handle(&self, _request: Request) -> Result<Response> {
            let mut response = Response::new(200);
            response.headers.append("Content-Length", "1234");
            Ok(response)
        }
    }

    #[tokio::test]
    async fn head_response_keeps_declared_content_length() {
        let output = drive(b"HEAD / HTTP/1.1\r\nHost: a\r\n\r\n", Arc::new(DeclaredLength)).await;
        assert_eq!(output, b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\n\r\n");
    }

    #[tokio::test]
    async fn declared_content_length_is_still_rederived_for_get() {
        let output = drive(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n", Arc::new(DeclaredLength)).await;
        assert_eq!(output, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    /// Sleeps on `/a` so its handler finishes after `/b` and `/c`.
    struct SlowA;

    #[async_trait]
    impl Handler for SlowA {
        async fn handle(&self, request: Request) -> Result<Response> {
            if request.head.target.as_str() == "/a" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            let mut response = Response::new(200);
            response.body = ResponseBody::Full(Bytes::from(
                request.head.target.as_str().trim_start_matches('/').to_string(),
            ));
            Ok(response)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pipelined_responses_keep_request_order() {
        let output = drive(
            b"GET /a HTTP/1.1\r\nHost: h\r\n\r\n\
              GET /b HTTP/1.1\r\nHost: h\r\n\r\n\
              GET /c HTTP/1.1\r\nHost: h\r\n\r\n",
            Arc::new(SlowA),
        )
        .await;
        let text = String::from_utf8(output).unwrap();
        let pos = |needle: &str| text.find(needle).unwrap_or_else(|| panic!("missing {needle}"));
        assert!(pos("\r\n\r\na") < pos("\r\n\r\nb"));
        assert!(pos("\r\n\r\nb") < pos("\r\n\r\nc"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_times_out_silently() {
        let (client, server) = tokio::io::duplex(4 * 1024);
        let task = tokio::spawn(serve(server, Arc::new(EchoHandler) as Arc<dyn Handler>, {
            let mut config = Config::default();
            config.idle_timeout_secs = 1;
            Arc::new(config)
        }));

        // write nothing; the server must close on its own without a response
        let (mut client_rd, client_wr) = tokio::io::split(client);
        let mut output = Vec::new();
        client_rd.read_to_end(&mut output).await.unwrap();
        assert!(output.is_empty());
        drop(client_wr);
        task.await.unwrap().unwrap();
    }
}
