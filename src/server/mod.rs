//! Sequential TCP server using Tokio.
//!
//! Accepts one connection at a time, reads a single HTTP/1.x request from it,
//! hands the request to a [`Service`] and writes the response back before the
//! next connection is accepted. Every response carries `Connection: close`,
//! and a client that does not finish its request head within the read timeout
//! gets `408 Request Timeout`, so an idle client cannot hold the listener.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a request head we will buffer before rejecting it (64 KiB).
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Default time a client gets to send its complete request head.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that turns a [`Request`] into a [`Response`].
///
/// Takes `&mut self` because requests are handled strictly one after another;
/// implementors may mutate their state without synchronization.
pub trait Service: Send {
    fn call(&mut self, request: Request) -> impl Future<Output = Response> + Send;
}

/// A [`Service`] built from a closure. See [`service_fn`].
pub struct ServiceFn<F> {
    f: F,
}

/// Wraps `f` so it can be passed to [`Server::run`].
///
/// # Examples
///
/// ```rust,no_run
/// use caching_proxy::http::{Response, StatusCode};
/// use caching_proxy::server::{Server, service_fn};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:9000").await?;
///     let hello = service_fn(|_req| async { Response::new(StatusCode::OK).body("hi") });
///     server.run(hello, std::future::pending()).await?;
///     Ok(())
/// }
/// ```
pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: FnMut(Request) -> Fut,
{
    ServiceFn { f }
}

impl<F, Fut> Service for ServiceFn<F>
where
    F: FnMut(Request) -> Fut + Send,
    Fut: Future<Output = Response> + Send,
{
    fn call(&mut self, request: Request) -> impl Future<Output = Response> + Send {
        (self.f)(request)
    }
}

/// A listening HTTP server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    read_timeout: Duration,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Sets how long a client may take to send its request head.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves connections until `shutdown` resolves, then hands the service back.
    ///
    /// Shutdown is observed between connections and while waiting for a
    /// request head. Once a request has been read it runs to completion.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and skipped, so this currently always
    /// returns `Ok`.
    pub async fn run<S, F>(self, mut service: S, shutdown: F) -> Result<S, ServerError>
    where
        S: Service,
        F: Future<Output = ()>,
    {
        info!(address = %self.local_addr, "listening");
        tokio::pin!(shutdown);

        loop {
            let (mut stream, peer_addr) = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };
            debug!(peer = %peer_addr, "connection accepted");

            let request = tokio::select! {
                () = &mut shutdown => break,
                read = read_request(&mut stream, peer_addr, self.read_timeout) => match read {
                    Ok(Some(request)) => request,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(peer = %peer_addr, error = %e, "connection closed with error");
                        continue;
                    }
                },
            };

            if let Err(e) = dispatch(&mut stream, peer_addr, request, &mut service).await {
                warn!(peer = %peer_addr, error = %e, "connection closed with error");
            }
        }

        info!(address = %self.local_addr, "shutting down");
        Ok(service)
    }
}

/// Reads one request head from `stream`.
///
/// Returns `Ok(None)` when the connection was already answered (400, 408 or
/// 413) or closed by the peer.
async fn read_request(
    stream: &mut TcpStream,
    peer_addr: SocketAddr,
    read_timeout: Duration,
) -> Result<Option<Request>, std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let deadline = Instant::now() + read_timeout;

    loop {
        let bytes_read = match timeout_at(deadline, stream.read_buf(&mut buf)).await {
            Ok(read) => read?,
            Err(_) => {
                warn!(peer = %peer_addr, timeout = ?read_timeout, "request head not received in time, sending 408");
                let response = Response::new(StatusCode::REQUEST_TIMEOUT)
                    .body("Request timed out")
                    .keep_alive(false);
                write_response(stream, response).await?;
                return Ok(None);
            }
        };
        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed before a full request arrived");
            return Ok(None);
        }

        match Request::parse(&buf) {
            Ok(request) => return Ok(Some(request)),
            Err(RequestError::Incomplete) if buf.len() > MAX_REQUEST_SIZE => {
                warn!(peer = %peer_addr, "request head too large, sending 413");
                let response = Response::new(StatusCode::PAYLOAD_TOO_LARGE)
                    .body("Request head too large")
                    .keep_alive(false);
                write_response(stream, response).await?;
                return Ok(None);
            }
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BAD_REQUEST)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                write_response(stream, response).await?;
                return Ok(None);
            }
        }
    }
}

/// Hands `request` to the service and writes its response.
async fn dispatch<S: Service>(
    stream: &mut TcpStream,
    peer_addr: SocketAddr,
    request: Request,
    service: &mut S,
) -> Result<(), std::io::Error> {
    debug!(
        peer = %peer_addr,
        method = %request.method(),
        path = %request.path(),
        minor_version = request.version(),
        host = request.headers().get("host").unwrap_or("-"),
        "dispatching request"
    );

    let response = service.call(request).await.keep_alive(false);
    info!(peer = %peer_addr, status = response.status().as_u16(), "request served");
    write_response(stream, response).await
}

async fn write_response(stream: &mut TcpStream, response: Response) -> Result<(), std::io::Error> {
    stream.write_all(&response.into_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    async fn roundtrip(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn serves_requests_sequentially_and_returns_service() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();

        let mut hits = 0usize;
        let counter = service_fn(move |req: Request| {
            hits += 1;
            let body = format!("{} #{hits}", req.path());
            async move { Response::new(StatusCode::OK).body(body) }
        });
        let handle = tokio::spawn(server.run(counter, async {
            let _ = rx.await;
        }));

        let first = roundtrip(addr, b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let second = roundtrip(addr, b"GET /two HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(first.ends_with("/one #1"));
        assert!(first.contains("Connection: close\r\n"));
        assert!(second.ends_with("/two #2"));

        tx.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        let ok = service_fn(|_req| async { Response::new(StatusCode::OK) });
        let handle = tokio::spawn(server.run(ok, async {
            let _ = rx.await;
        }));

        let reply = roundtrip(addr, b"\x01\x02 junk\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn idle_client_times_out_and_next_request_is_served() {
        let server = Server::bind("127.0.0.1:0")
            .await
            .unwrap()
            .read_timeout(Duration::from_millis(200));
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        let ok = service_fn(|_req: Request| async { Response::new(StatusCode::OK).body("served") });
        let handle = tokio::spawn(server.run(ok, async {
            let _ = rx.await;
        }));

        let mut idle = TcpStream::connect(addr).await.unwrap();
        let reply = tokio::time::timeout(
            Duration::from_secs(3),
            roundtrip(addr, b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n"),
        )
        .await
        .expect("second client should not wait on the idle one");
        assert!(reply.ends_with("served"));

        let mut out = Vec::new();
        idle.read_to_end(&mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 408 Request Timeout\r\n"));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_not_blocked_by_idle_client() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        let ok = service_fn(|_req: Request| async { Response::new(StatusCode::OK) });
        let handle = tokio::spawn(server.run(ok, async {
            let _ = rx.await;
        }));

        let _idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(3), handle).await;
        assert!(stopped.expect("server should stop while a client idles").unwrap().is_ok());
    }

    #[tokio::test]
    async fn bind_failure_reports_address() {
        let first = Server::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().to_string();
        match Server::bind(&taken).await {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, taken),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("second bind on {taken} should fail"),
        }
    }
}
