//! Application boundary: a fully framed request head plus a lazy body
//! reader in, a response head plus a body producer out.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::headers::HeaderMap;
use crate::message::RequestHead;

/// One piece of a streamed message body.
#[derive(Debug)]
pub enum BodyFrame {
    Data(Bytes),
    /// Trailer fields of a chunked body; the final frame when present.
    Trailers(HeaderMap),
}

/// Lazy reader over a message body, delivered frame by frame as the
/// connection decodes it. Dropping it is allowed; the connection keeps the
/// wire in sync by draining the remainder itself.
#[derive(Debug)]
pub struct Body {
    rx: mpsc::Receiver<Result<BodyFrame>>,
}

impl Body {
    pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<Result<BodyFrame>>, Body) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Body { rx })
    }

    pub fn empty() -> Body {
        let (_tx, body) = Self::channel(1);
        body
    }

    /// Next frame, or `None` once the body is complete.
    pub async fn frame(&mut self) -> Option<Result<BodyFrame>> {
        self.rx.recv().await
    }

    /// Collects the remaining data frames into one buffer.
    pub async fn collect(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(frame) = self.frame().await {
            match frame? {
                BodyFrame::Data(data) => out.extend_from_slice(&data),
                BodyFrame::Trailers(_) => {}
            }
        }
        Ok(out.freeze())
    }
}

/// Response body producer.
#[derive(Debug)]
pub enum ResponseBody {
    Empty,
    Full(Bytes),
    /// Streamed body. When `len` is known the writer emits `Content-Length`
    /// and raw bytes; otherwise it re-chunks (or close-delimits for 1.0).
    Stream { body: Body, len: Option<u64> },
}

#[derive(Debug)]
pub struct Request {
    pub head: RequestHead,
    pub body: Body,
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }
}

/// The single-method capability the connection state machine dispatches to.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Result<Response>;
}

/// Echoes the request payload back to the sender.
#[derive(Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, mut request: Request) -> Result<Response> {
        let payload = request.body.collect().await?;
        let mut response = Response::new(200);
        if !payload.is_empty() {
            let content_type = request
                .head
                .headers
                .get("content-type")
                .map(<[u8]>::to_vec)
                .unwrap_or_else(|| b"application/octet-stream".to_vec());
            response.headers.append("Content-Type", content_type);
            response.body = ResponseBody::Full(payload);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::message::{RequestTarget, Version};

    fn request(method: &str, body: Body) -> Request {
        let mut headers = HeaderMap::new();
        headers.append("Host", "a");
        Request {
            head: RequestHead {
                method: method.to_string(),
                target: RequestTarget::Origin("/".to_string()),
                version: Version::Http11,
                headers,
            },
            body,
        }
    }

    #[tokio::test]
    async fn echo_without_body_is_empty_200() {
        let response = EchoHandler.handle(request("GET", Body::empty())).await.unwrap();
        assert_eq!(response.status, 200);
        assert!(matches!(response.body, ResponseBody::Empty));
        assert!(response.headers.is_empty());
    }

    #[tokio::test]
    async fn echo_returns_payload() {
        let (tx, body) = Body::channel(4);
        tx.send(Ok(BodyFrame::Data(Bytes::from_static(b"hel"))))
            .await
            .unwrap();
        tx.send(Ok(BodyFrame::Data(Bytes::from_static(b"lo"))))
            .await
            .unwrap();
        drop(tx);

        let response = EchoHandler.handle(request("POST", body)).await.unwrap();
        assert_eq!(response.status, 200);
        match response.body {
            ResponseBody::Full(bytes) => assert_eq!(&bytes[..], b"hello"),
            other => panic!("expected full body, got {other:?}"),
        }
        assert_eq!(
            response.headers.get_str("content-type"),
            Some("application/octet-stream")
        );
    }

    #[tokio::test]
    async fn collect_propagates_body_errors() {
        let (tx, body) = Body::channel(1);
        tx.send(Err(Error::Timeout("reading body"))).await.unwrap();
        drop(tx);
        let err = EchoHandler.handle(request("POST", body)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
