use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Result;

/// Operating mode: answer requests locally or relay them upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Echo,
    Proxy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub mode: Mode,
    /// Upstream authority (`host:port`) for proxy mode.
    pub upstream: Option<String>,

    /// Maximum size of a request or response head, start line included.
    pub max_header_bytes: usize,
    pub max_header_fields: usize,
    pub max_chunk_size: u64,
    /// Maximum exchanges in flight on one connection before reads back off.
    pub max_pipeline_depth: usize,

    pub idle_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub connect_timeout_secs: u64,

    pub pool_max_idle_secs: u64,
    pub pool_max_idle_per_authority: usize,

    /// Accept bare LF line terminators where the grammar expects CRLF.
    pub allow_bare_lf: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 9999,
            mode: Mode::Echo,
            upstream: None,
            max_header_bytes: 8 * 1024,
            max_header_fields: 100,
            max_chunk_size: 1024 * 1024,
            max_pipeline_depth: 8,
            idle_timeout_secs: 60,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            connect_timeout_secs: 10,
            pool_max_idle_secs: 30,
            pool_max_idle_per_authority: 8,
            allow_bare_lf: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn pool_max_idle(&self) -> Duration {
        Duration::from_secs(self.pool_max_idle_secs)
    }
}
