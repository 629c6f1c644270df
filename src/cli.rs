//! Command-line interface parsing.
//!
//! Turns the raw clap arguments into a [`Mode`]: either a one-shot cache
//! clear or a fully validated [`ProxyConfig`] for serving.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::cache::{DEFAULT_CACHE_FILE, FileStore, ResponseCache};
use crate::origin::{self, OriginClient, OriginConfig, OriginError};
use crate::proxy::CachingProxy;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// Serving needs both a port and an origin
    #[error("--port and --origin are required if not using --clear-cache")]
    MissingServeArgs,

    /// Serving was asked for on port 0
    #[error("--port must be between 1 and 65535")]
    InvalidPort,

    /// The origin is not an absolute http(s) URL
    #[error("invalid --origin: {0}")]
    InvalidOrigin(#[from] OriginError),
}

/// Caching Proxy Server
#[derive(Parser, Debug)]
#[command(name = "caching-proxy")]
#[command(about = "Caching Proxy Server: forwards GET requests to an origin and caches the responses on disk")]
#[command(version)]
pub struct Cli {
    /// Port on which the proxy will run
    #[arg(long)]
    pub port: Option<u16>,

    /// Origin server URL, e.g. http://localhost:9000
    #[arg(long, value_name = "URL")]
    pub origin: Option<String>,

    /// Clear the cache and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// File the cache is persisted to
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CACHE_FILE)]
    pub cache_file: PathBuf,

    /// Address to listen on
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0")]
    pub bind: String,

    /// Seconds to wait for the origin before answering 504
    #[arg(long, value_name = "SECS", default_value_t = 30, conflicts_with = "no_origin_timeout")]
    pub origin_timeout: u64,

    /// Wait for the origin indefinitely
    #[arg(long)]
    pub no_origin_timeout: bool,
}

/// What the process should do, derived from [`Cli`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Delete the persisted cache and exit. Port and origin are ignored.
    ClearCache { cache_file: PathBuf },
    /// Run the proxy.
    Serve(ProxyConfig),
}

/// Everything needed to start serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Listening port, never 0.
    pub port: u16,
    /// Origin base URL, validated as absolute http(s).
    pub origin: String,
    /// Listening address without the port.
    pub bind: String,
    /// Where the cache is persisted.
    pub cache_file: PathBuf,
    /// `None` disables the origin timeout.
    pub origin_timeout: Option<Duration>,
}

impl Mode {
    /// Validates parsed arguments.
    ///
    /// # Returns
    /// * `Ok(Mode::ClearCache)` whenever `--clear-cache` is given
    /// * `Ok(Mode::Serve)` when both a non-zero `--port` and a valid `--origin` are given
    /// * `Err(CliError)` otherwise
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.clear_cache {
            return Ok(Mode::ClearCache {
                cache_file: cli.cache_file.clone(),
            });
        }

        let (Some(port), Some(origin)) = (cli.port, cli.origin.as_deref()) else {
            return Err(CliError::MissingServeArgs);
        };
        if port == 0 {
            return Err(CliError::InvalidPort);
        }
        origin::validate_origin(origin)?;

        let origin_timeout =
            (!cli.no_origin_timeout).then(|| Duration::from_secs(cli.origin_timeout));

        Ok(Mode::Serve(ProxyConfig {
            port,
            origin: origin.to_owned(),
            bind: cli.bind.clone(),
            cache_file: cli.cache_file.clone(),
            origin_timeout,
        }))
    }
}

impl ProxyConfig {
    /// Socket address string for the listener, bracketing IPv6 literals.
    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }

    /// Builds the proxy with a file-backed cache and an origin client.
    pub fn build_proxy(&self) -> Result<CachingProxy<FileStore>, OriginError> {
        let client = OriginClient::new(OriginConfig {
            timeout: self.origin_timeout,
            ..OriginConfig::default()
        })?;
        let cache = ResponseCache::new(FileStore::new(&self.cache_file));
        Ok(CachingProxy::new(self.origin.clone(), cache, client))
    }
}
