//! Benchmark orchestrator.
//!
//! Wires configuration and prepared requests into a run: one cancellation
//! scope governs the deadline, OS signals, the request-count ceiling, and
//! UI-initiated stops; the chosen driver and the sampler share the same
//! stats instance; and the final harvest seals those stats into an
//! immutable [`Results`] carrying the actual elapsed wall clock.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::asserts::AssertSet;
use crate::config::Config;
use crate::driver::select_driver;
use crate::errors::EngineError;
use crate::limiter::RateLimiter;
use crate::pool::RequestPool;
use crate::request::PreparedRequest;
use crate::sampler;
use crate::stats::{Results, Stats};
use crate::ui::ProgressSink;

/// One configured benchmark run.
pub struct Benchmark {
    config: Config,
    requests: Vec<PreparedRequest>,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl Benchmark {
    pub fn new(config: Config, request: PreparedRequest) -> Self {
        Self::with_requests(config, vec![request])
    }

    pub fn with_requests(config: Config, requests: Vec<PreparedRequest>) -> Self {
        Self {
            config,
            requests,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Runs the benchmark to completion and returns sealed results.
    ///
    /// Only configuration errors and the event driver failing to establish
    /// a single socket surface here; per-request failures are data in the
    /// results.
    pub async fn run(&self) -> Result<Results, EngineError> {
        self.config.validate()?;
        if self.requests.is_empty() {
            return Err(EngineError::InvalidConfig(
                "at least one request is required".to_string(),
            ));
        }

        let asserts = match &self.config.asserts_text {
            Some(text) => {
                let set = AssertSet::parse(text)?;
                (!set.is_empty()).then(|| Arc::new(set))
            }
            None => None,
        };

        let ctx = CancellationToken::new();
        let pool = Arc::new(RequestPool::new(
            self.requests.clone(),
            self.config.load_strategy,
        ));
        let limiter = Arc::new(RateLimiter::new(self.config.rate));
        let stats = Arc::new(Stats::new());
        let track_endpoints = pool.url_count() > 1;

        let deadline = spawn_deadline(ctx.clone(), self.config.duration);
        let signals = spawn_signal_handler(ctx.clone());

        let start = Instant::now();
        let sampling = sampler::spawn(
            ctx.clone(),
            stats.clone(),
            self.sink.clone(),
            track_endpoints,
            start,
        );

        let driver = select_driver(&self.config, &pool, asserts);
        info!(
            driver = driver.name(),
            connections = self.config.connections,
            threads = self.config.threads,
            duration_secs = self.config.duration.as_secs_f64(),
            rate = self.config.rate,
            requests = self.config.requests,
            "starting benchmark"
        );

        let driver_result = driver
            .run(ctx.clone(), pool.clone(), limiter, stats.clone())
            .await;

        // The driver may have finished early (bounded ceiling); make the
        // sampler and helper tasks wind down before harvesting.
        ctx.cancel();
        let _ = sampling.await;
        deadline.abort();
        signals.abort();

        driver_result?;

        let results = stats.seal(start.elapsed());
        debug!(
            total_requests = results.total_requests,
            total_errors = results.total_errors,
            duration_secs = results.duration.as_secs_f64(),
            "benchmark complete"
        );
        Ok(results)
    }
}

fn spawn_deadline(ctx: CancellationToken, duration: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                debug!("duration reached, cancelling run");
                ctx.cancel();
            }
            _ = ctx.cancelled() => {}
        }
    })
}

fn spawn_signal_handler(ctx: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(_) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("interrupt received, stopping");
                            ctx.cancel();
                        }
                        _ = ctx.cancelled() => {}
                    }
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, stopping");
                    ctx.cancel();
                }
                _ = term.recv() => {
                    info!("terminate received, stopping");
                    ctx.cancel();
                }
                _ = ctx.cancelled() => {}
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, stopping");
                    ctx.cancel();
                }
                _ = ctx.cancelled() => {}
            }
        }
    })
}
