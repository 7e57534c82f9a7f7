//! Event-loop driver.
//!
//! Owns exactly `connections` raw TCP sockets on one dedicated OS thread
//! running a current-thread runtime. Each socket's session is a local task
//! that pipelines one in-flight response: serialize and write the request,
//! feed read chunks to a streaming parser, record the completed message,
//! reset the parser in place, and immediately send the next request on the
//! same socket. Session tasks never block the loop thread; waits (rate
//! permits, socket readiness, timeouts) all park on the timer wheel or the
//! reactor.
//!
//! Parse and socket errors close the affected socket for the rest of the
//! run; the driver never reconnects. Failing to establish even one socket
//! up-front is the only fatal outcome.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::LocalSet;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::asserts::{AssertSet, ResponseSnapshot};
use crate::config::Config;
use crate::driver::Driver;
use crate::errors::{EngineError, ErrorCategory};
use crate::httpparse::{MessageState, ParseError, ResponseParser};
use crate::limiter::{RateLimiter, TryAcquire};
use crate::pool::RequestPool;
use crate::stats::{Claim, Stats};

const READ_BUF_SIZE: usize = 16 * 1024;

pub struct EventDriver {
    config: Config,
    asserts: Option<Arc<AssertSet>>,
}

impl EventDriver {
    pub fn new(config: Config, asserts: Option<Arc<AssertSet>>) -> Self {
        Self { config, asserts }
    }
}

#[async_trait]
impl Driver for EventDriver {
    async fn run(
        &self,
        ctx: CancellationToken,
        pool: Arc<RequestPool>,
        limiter: Arc<RateLimiter>,
        stats: Arc<Stats>,
    ) -> Result<(), EngineError> {
        // All pool entries share one host:port; sockets are not dialed per
        // request.
        let target = Target::from_pool(&pool)?;
        let connector = if target.tls {
            Some(tls_connector()?)
        } else {
            None
        };

        let config = self.config.clone();
        let asserts = self.asserts.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();

        std::thread::Builder::new()
            .name("gust-event-loop".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(EngineError::EventLoop(e.to_string())));
                        return;
                    }
                };

                let local = LocalSet::new();
                let result = rt.block_on(local.run_until(event_loop(
                    ctx, pool, limiter, stats, config, asserts, target, connector,
                )));
                let _ = tx.send(result);
            })
            .map_err(|e| EngineError::EventLoop(e.to_string()))?;

        rx.await.unwrap_or_else(|_| {
            Err(EngineError::EventLoop(
                "event loop thread terminated unexpectedly".to_string(),
            ))
        })
    }

    fn name(&self) -> &'static str {
        "event"
    }
}

struct Target {
    host: String,
    port: u16,
    tls: bool,
}

impl Target {
    fn from_pool(pool: &RequestPool) -> Result<Self, EngineError> {
        let url = &pool.first().request.url;
        let host = url
            .host_str()
            .ok_or_else(|| EngineError::InvalidConfig("request URL has no host".to_string()))?
            .to_string();
        let tls = url.scheme() == "https";
        let port = url
            .port_or_known_default()
            .unwrap_or(if tls { 443 } else { 80 });

        Ok(Self { host, port, tls })
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn tls_connector() -> Result<TlsConnector, EngineError> {
    let mut roots = rustls::RootCertStore::empty();
    let certs =
        rustls_native_certs::load_native_certs().map_err(|e| EngineError::Tls(e.to_string()))?;
    for cert in certs {
        // Unparsable platform certificates are skipped.
        let _ = roots.add(cert);
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

struct SessionShared {
    ctx: CancellationToken,
    pool: Arc<RequestPool>,
    limiter: Arc<RateLimiter>,
    stats: Arc<Stats>,
    asserts: Option<Arc<AssertSet>>,
    /// Request ceiling; 0 means unbounded.
    requests: u64,
    timeout: Duration,
    track_endpoints: bool,
}

#[allow(clippy::too_many_arguments)]
async fn event_loop(
    ctx: CancellationToken,
    pool: Arc<RequestPool>,
    limiter: Arc<RateLimiter>,
    stats: Arc<Stats>,
    config: Config,
    asserts: Option<Arc<AssertSet>>,
    target: Target,
    connector: Option<TlsConnector>,
) -> Result<(), EngineError> {
    let mut streams = Vec::with_capacity(config.connections);
    let mut last_err: Option<io::Error> = None;

    for id in 0..config.connections {
        match dial(&target, connector.as_ref(), config.timeout).await {
            Ok(stream) => streams.push((id, stream)),
            Err(e) => {
                warn!(socket = id, addr = %target.addr(), error = %e, "connect failed");
                last_err = Some(e);
            }
        }
    }

    if streams.is_empty() {
        return Err(EngineError::Connect {
            addr: target.addr(),
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no sockets requested")),
        });
    }

    debug!(established = streams.len(), requested = config.connections, "event loop started");

    let shared = Arc::new(SessionShared {
        ctx,
        limiter,
        stats,
        asserts,
        requests: config.requests,
        timeout: config.timeout,
        track_endpoints: pool.url_count() > 1,
        pool,
    });

    let mut sessions = Vec::with_capacity(streams.len());
    for (id, stream) in streams {
        let shared = shared.clone();
        sessions.push(tokio::task::spawn_local(session_loop(id, stream, shared)));
    }

    for session in sessions {
        let _ = session.await;
    }

    Ok(())
}

async fn dial(
    target: &Target,
    connector: Option<&TlsConnector>,
    deadline: Duration,
) -> io::Result<SessionStream> {
    let tcp = timeout(
        deadline,
        TcpStream::connect((target.host.as_str(), target.port)),
    )
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    tcp.set_nodelay(true)?;

    match connector {
        None => Ok(SessionStream::Plain(tcp)),
        Some(connector) => {
            let name = ServerName::try_from(target.host.clone())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid TLS name"))?;
            let tls = timeout(deadline, connector.connect(name, tcp))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))??;
            Ok(SessionStream::Tls(Box::new(tls)))
        }
    }
}

enum SessionStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl SessionStream {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            SessionStream::Plain(s) => s.write_all(buf).await,
            SessionStream::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SessionStream::Plain(s) => s.read(buf).await,
            SessionStream::Tls(s) => s.read(buf).await,
        }
    }
}

#[derive(Error, Debug)]
enum ExchangeError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("{0}")]
    Parse(#[from] ParseError),
}

impl ExchangeError {
    fn category(&self) -> ErrorCategory {
        match self {
            ExchangeError::Io(e) => ErrorCategory::from_io_error(e),
            ExchangeError::Closed => ErrorCategory::Network,
            ExchangeError::Parse(_) => ErrorCategory::Parse,
        }
    }
}

/// One pipelined request/response cycle on the socket.
async fn exchange(
    stream: &mut SessionStream,
    wire: &[u8],
    parser: &mut ResponseParser,
    buf: &mut [u8],
) -> Result<(), ExchangeError> {
    stream.write_all(wire).await?;

    loop {
        let n = stream.read(buf).await?;
        if n == 0 {
            return Err(ExchangeError::Closed);
        }

        let consumed = parser.execute(&buf[..n])?;
        if parser.message().complete {
            // Nothing further was requested on this socket yet, so any
            // leftover bytes are protocol garbage.
            if consumed < n {
                return Err(ExchangeError::Parse(ParseError::TrailingData));
            }
            return Ok(());
        }
    }
}

async fn session_loop(id: usize, mut stream: SessionStream, shared: Arc<SessionShared>) {
    let collecting = shared.asserts.is_some();
    let mut parser = ResponseParser::new(collecting);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let bounded = shared.requests > 0;

    debug!(socket = id, "session started");

    'run: loop {
        if shared.ctx.is_cancelled() {
            break;
        }

        // Bounded mode claims its slot before sending; a successful claim
        // commits this send even when the claim itself ends the run.
        let committed = if bounded {
            match shared.stats.claim_request(shared.requests) {
                Claim::Exhausted => {
                    shared.ctx.cancel();
                    break;
                }
                Claim::Claimed { last } => {
                    if last {
                        shared.ctx.cancel();
                    }
                    true
                }
            }
        } else {
            false
        };

        // Rate permits must not block the loop thread: on contention the
        // session parks on the timer wheel until its retry slot.
        loop {
            match shared.limiter.try_acquire() {
                TryAcquire::Ready => break,
                TryAcquire::NotUntil(at) => {
                    tokio::select! {
                        _ = sleep_until(at) => {}
                        _ = shared.ctx.cancelled() => {
                            if committed {
                                break;
                            }
                            break 'run;
                        }
                    }
                }
            }
        }

        let (entry, size) = shared.pool.next();
        let started = Instant::now();
        let outcome = timeout(
            shared.timeout,
            exchange(&mut stream, &entry.wire, &mut parser, &mut buf),
        )
        .await;

        match outcome {
            Err(_) => {
                shared
                    .stats
                    .record_error(ErrorCategory::Timeout.message("request timed out"));
                if shared.track_endpoints {
                    shared.stats.record_endpoint_error(entry.request.endpoint());
                }
                if !bounded {
                    shared.stats.add_request();
                }
                debug!(socket = id, "request timed out, closing socket");
                break;
            }
            Ok(Err(err)) => {
                shared.stats.record_error(err.category().message(&err));
                if shared.track_endpoints {
                    shared.stats.record_endpoint_error(entry.request.endpoint());
                }
                if !bounded {
                    shared.stats.add_request();
                }
                debug!(socket = id, error = %err, "socket error, closing socket");
                break;
            }
            Ok(Ok(())) => {
                let latency = started.elapsed();
                let status = parser.message().status;
                let read_bytes = parser.message().body_bytes;

                shared.stats.record_latency(latency);
                shared.stats.record_status(status);
                shared.stats.record_read_bytes(read_bytes);
                shared.stats.record_write_bytes(size as u64);
                if shared.track_endpoints {
                    shared.stats.record_endpoint(
                        entry.request.endpoint(),
                        latency,
                        status,
                        read_bytes,
                        size as u64,
                    );
                }
                if !bounded {
                    shared.stats.add_request();
                }

                if let Some(asserts) = &shared.asserts {
                    let snapshot = snapshot_from(parser.message_mut(), status, latency);
                    if let Err(failure) = asserts.eval(&snapshot) {
                        shared
                            .stats
                            .record_error(ErrorCategory::Assert.message(&failure));
                    }
                }

                parser.reset();
            }
        }
    }

    debug!(socket = id, "session closed");
}

fn snapshot_from(msg: &mut MessageState, status: u16, latency: Duration) -> ResponseSnapshot {
    let mut headers = HeaderMap::new();
    for (name, value) in &msg.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }

    ResponseSnapshot {
        status,
        headers,
        body: msg.take_body(),
        duration: latency,
    }
}
