//! # caching-proxy
//!
//! A small HTTP caching proxy. GET requests are forwarded to a single origin on
//! a cache miss; successful bodies are kept in memory, mirrored to a file on
//! disk, and served from there on every later request for the same path.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use caching_proxy::cache::{FileStore, ResponseCache};
//! use caching_proxy::origin::{OriginClient, OriginConfig};
//! use caching_proxy::proxy::CachingProxy;
//! use caching_proxy::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = ResponseCache::new(FileStore::new("proxy_cache.json"));
//!     let client = OriginClient::new(OriginConfig::default())?;
//!     let proxy = CachingProxy::new("http://localhost:9000", cache, client);
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(proxy, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod http;
pub mod origin;
pub mod proxy;
pub mod server;

pub use cache::{CacheStore, FileStore, ResponseCache};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use proxy::CachingProxy;
pub use server::{Server, ServerError};
