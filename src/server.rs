use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info};

use crate::config::{Config, Mode};
use crate::conn;
use crate::handler::{EchoHandler, Handler};
use crate::proxy::ProxyHandler;
use crate::{Error, Result};

/// The listener: accepts connections and hands each one to the connection
/// state machine with the mode-appropriate handler.
pub struct SmokyServer {
    config: Arc<Config>,
    handler: Arc<dyn Handler>,
}

impl SmokyServer {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let handler: Arc<dyn Handler> = match config.mode {
            Mode::Echo => Arc::new(EchoHandler),
            Mode::Proxy => {
                let upstream = config
                    .upstream
                    .clone()
                    .ok_or_else(|| Error::internal("proxy mode requires an upstream authority"))?;
                Arc::new(ProxyHandler::new(upstream, Arc::clone(&config)))
            }
        };
        Ok(Self { config, handler })
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        info!(
            "listening on {} ({:?} mode)",
            self.config.listen_addr(),
            self.config.mode,
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("accept failed: {e}");
                            continue;
                        }
                    };
                    debug!("accepted connection from {peer}");
                    let handler = Arc::clone(&self.handler);
                    let config = Arc::clone(&self.config);
                    tokio::spawn(async move {
                        if let Err(e) = conn::serve(stream, handler, config).await {
                            debug!("connection from {peer} ended with error: {e}");
                        }
                    });
                }
                _ = signal::ctrl_c() => {
                    info!("received shutdown signal");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_server_creation() {
        assert!(SmokyServer::new(Config::default()).is_ok());
    }

    #[test]
    fn proxy_mode_requires_an_upstream() {
        let mut config = Config::default();
        config.mode = Mode::Proxy;
        assert!(SmokyServer::new(config).is_err());

        config = Config::default();
        config.mode = Mode::Proxy;
        config.upstream = Some("origin.internal:8080".to_string());
        assert!(SmokyServer::new(config).is_ok());
    }
}
