//! Smoky: an RFC 9112 HTTP/1.1 origin server and reverse proxy.
//!
//! The framing layer (`buffer`, `parser`, `framing`, `chunked`) turns a byte
//! stream into strictly validated messages; `conn` drives a persistent,
//! pipelined connection over that layer and dispatches each exchange to a
//! [`handler::Handler`]. Two handlers ship in the box: an echo origin and a
//! pooled reverse-proxy relay.

pub mod buffer;
pub mod chunked;
pub mod config;
pub mod conn;
pub mod error;
pub mod framing;
pub mod handler;
pub mod headers;
pub mod message;
pub mod parser;
pub mod pool;
pub mod proxy;
pub mod server;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
pub use handler::{EchoHandler, Handler, Request, Response};
pub use proxy::ProxyHandler;
pub use server::SmokyServer;
