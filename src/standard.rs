//! Standard-client driver.
//!
//! Fans out `threads` worker schedulers; worker `i` owns
//! `connections / threads` logical connections plus one extra for the first
//! `connections % threads` workers. Every logical connection is its own
//! task looping over a shared `reqwest` client whose idle pool is sized to
//! the connection count, so sockets stay warm across requests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::asserts::{AssertSet, ResponseSnapshot, MAX_BODY_SIZE};
use crate::config::Config;
use crate::driver::Driver;
use crate::errors::{EngineError, ErrorCategory};
use crate::limiter::RateLimiter;
use crate::pool::RequestPool;
use crate::request::PreparedRequest;
use crate::stats::{Claim, Stats};

pub struct StandardDriver {
    config: Config,
    asserts: Option<Arc<AssertSet>>,
}

struct Shared {
    ctx: CancellationToken,
    pool: Arc<RequestPool>,
    limiter: Arc<RateLimiter>,
    stats: Arc<Stats>,
    client: reqwest::Client,
    asserts: Option<Arc<AssertSet>>,
    /// Request ceiling; 0 means unbounded.
    requests: u64,
    track_endpoints: bool,
}

impl StandardDriver {
    pub fn new(config: Config, asserts: Option<Arc<AssertSet>>) -> Self {
        Self { config, asserts }
    }
}

#[async_trait]
impl Driver for StandardDriver {
    async fn run(
        &self,
        ctx: CancellationToken,
        pool: Arc<RequestPool>,
        limiter: Arc<RateLimiter>,
        stats: Arc<Stats>,
    ) -> Result<(), EngineError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(self.config.connections)
            .timeout(self.config.timeout)
            .build()?;

        let track_endpoints = pool.url_count() > 1;
        let shared = Arc::new(Shared {
            ctx,
            pool,
            limiter,
            stats,
            client,
            asserts: self.asserts.clone(),
            requests: self.config.requests,
            track_endpoints,
        });

        let mut workers = Vec::with_capacity(self.config.threads);
        for thread_id in 0..self.config.threads {
            let mut connections = self.config.connections / self.config.threads;
            if thread_id < self.config.connections % self.config.threads {
                connections += 1;
            }
            if connections == 0 {
                continue;
            }

            let shared = shared.clone();
            workers.push(tokio::spawn(run_worker(thread_id, connections, shared)));
        }

        for worker in workers {
            let _ = worker.await;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "standard"
    }
}

async fn run_worker(thread_id: usize, connections: usize, shared: Arc<Shared>) {
    debug!(thread_id, connections, "worker starting");

    let mut tasks = Vec::with_capacity(connections);
    for _ in 0..connections {
        let shared = shared.clone();
        tasks.push(tokio::spawn(connection_loop(shared)));
    }

    for task in tasks {
        let _ = task.await;
    }

    debug!(thread_id, "worker stopped");
}

/// One logical connection: sequential request/response cycles until the
/// run cancels or the bounded ceiling is exhausted.
async fn connection_loop(shared: Arc<Shared>) {
    let bounded = shared.requests > 0;

    loop {
        if shared.ctx.is_cancelled() {
            break;
        }

        // Bounded mode claims its slot before sending so the counter can
        // never pass the ceiling; a successful claim commits this send.
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

        if !shared.limiter.acquire(&shared.ctx).await && !committed {
            break;
        }

        let (entry, size) = shared.pool.next();
        let request = entry.request.clone();
        perform_request(&shared, &request, size as u64, bounded).await;
    }
}

async fn perform_request(
    shared: &Shared,
    request: &Arc<PreparedRequest>,
    write_bytes: u64,
    bounded: bool,
) {
    let collecting = shared.asserts.is_some();
    let started = tokio::time::Instant::now();

    // Body bytes are cloned into each send; workers never share a reader.
    let send = shared
        .client
        .request(request.method.clone(), request.url.clone())
        .headers(request.headers.clone())
        .body(request.body.clone())
        .send();

    let mut response = match send.await {
        Ok(response) => response,
        Err(e) => {
            let category = ErrorCategory::from_reqwest_error(&e);
            error!(url = %request.url, error = %e, category = category.label(), "request failed");
            shared.stats.record_error(category.message(&e));
            if shared.track_endpoints {
                shared.stats.record_endpoint_error(request.endpoint());
            }
            if !bounded {
                shared.stats.add_request();
            }
            return;
        }
    };

    let status = response.status().as_u16();
    let headers = collecting.then(|| response.headers().clone());

    // Without assertions the body is drained into a counting sink and
    // discarded; with assertions it is buffered up to the hard cap.
    let mut read_bytes = 0u64;
    let mut body = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        read_bytes += chunk.len() as u64;
        if collecting && body.len() < MAX_BODY_SIZE {
            let take = chunk.len().min(MAX_BODY_SIZE - body.len());
            body.extend_from_slice(&chunk[..take]);
        }
    }

    let latency = started.elapsed();

    shared.stats.record_latency(latency);
    shared.stats.record_status(status);
    shared.stats.record_read_bytes(read_bytes);
    shared.stats.record_write_bytes(write_bytes);
    if shared.track_endpoints {
        shared
            .stats
            .record_endpoint(request.endpoint(), latency, status, read_bytes, write_bytes);
    }
    if !bounded {
        shared.stats.add_request();
    }

    if let Some(asserts) = &shared.asserts {
        let snapshot = ResponseSnapshot {
            status,
            headers: headers.unwrap_or_default(),
            body,
            duration: latency,
        };
        if let Err(failure) = asserts.eval(&snapshot) {
            debug!(url = %request.url, %failure, "assertion failed");
            shared
                .stats
                .record_error(ErrorCategory::Assert.message(&failure));
        }
    }
}
