//! Per-second sampler.
//!
//! One task observes the shared counters every second of wall clock: it
//! records the instantaneous request rate, pushes a snapshot to the UI sink
//! when one is present, and relays a sink-reported stop into the run's
//! cancellation scope. Snapshot data is copied out of `Stats` first; no
//! stats lock is ever held across a sink call.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stats::Stats;
use crate::ui::{EndpointRow, ProgressSink, ProgressSnapshot};

/// Spawns the sampling task. It exits when `ctx` cancels, recording one
/// final partial sample if the counter advanced since the last tick.
pub fn spawn(
    ctx: CancellationToken,
    stats: Arc<Stats>,
    sink: Option<Arc<dyn ProgressSink>>,
    track_endpoints: bool,
    start: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so samples cover full
        // seconds.
        ticker.tick().await;

        let mut last = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let current = stats.total_requests();
                    let this_second = current - last;
                    last = current;
                    stats.record_rps_sample(this_second);

                    if let Some(sink) = &sink {
                        let snapshot = build_snapshot(
                            &stats,
                            current,
                            this_second,
                            track_endpoints,
                            start.elapsed(),
                        );
                        sink.update(&snapshot);

                        if sink.stop_requested() {
                            debug!("stop requested by sink, cancelling run");
                            ctx.cancel();
                            break;
                        }
                    }
                }
                _ = ctx.cancelled() => {
                    let current = stats.total_requests();
                    if current > last {
                        stats.record_rps_sample(current - last);
                    }
                    break;
                }
            }
        }
    })
}

fn build_snapshot(
    stats: &Stats,
    total: u64,
    this_second: u64,
    track_endpoints: bool,
    elapsed: Duration,
) -> ProgressSnapshot {
    let endpoints = track_endpoints.then(|| {
        let elapsed_secs = elapsed.as_secs_f64().max(1.0);
        let mut rows: Vec<EndpointRow> = stats
            .endpoints_snapshot()
            .into_iter()
            .map(|(url, ep)| EndpointRow {
                requests_per_sec: ep.requests as f64 / elapsed_secs,
                avg_latency: ep.average_latency(),
                min_latency: ep.min_latency,
                max_latency: ep.max_latency,
                requests: ep.requests,
                errors: ep.errors,
                url,
            })
            .collect();
        rows.sort_by(|a, b| a.url.cmp(&b.url));
        rows
    });

    ProgressSnapshot {
        total_requests: total,
        requests_per_sec: this_second,
        status_codes: stats.status_codes(),
        avg_latency: stats.average_latency(),
        min_latency: stats.min_latency(),
        max_latency: stats.max_latency(),
        percentiles: stats.latency_percentiles(),
        errors: stats.total_errors(),
        endpoints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        updates: AtomicU64,
        last_total: AtomicU64,
        stop: AtomicBool,
        snapshots: Mutex<Vec<ProgressSnapshot>>,
    }

    impl ProgressSink for RecordingSink {
        fn update(&self, snapshot: &ProgressSnapshot) {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.last_total.store(snapshot.total_requests, Ordering::SeqCst);
            self.snapshots.lock().unwrap().push(snapshot.clone());
        }

        fn stop_requested(&self) -> bool {
            self.stop.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_records_per_second_deltas() {
        let ctx = CancellationToken::new();
        let stats = Arc::new(Stats::new());
        let handle = spawn(ctx.clone(), stats.clone(), None, false, Instant::now());

        for _ in 0..7 {
            stats.add_request();
        }
        tokio::time::advance(Duration::from_millis(1100)).await;

        for _ in 0..3 {
            stats.add_request();
        }
        tokio::time::advance(Duration::from_millis(1000)).await;

        ctx.cancel();
        handle.await.unwrap();

        let samples = stats.rps_samples_snapshot();
        assert_eq!(samples, vec![7, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_final_partial_sample() {
        let ctx = CancellationToken::new();
        let stats = Arc::new(Stats::new());
        let handle = spawn(ctx.clone(), stats.clone(), None, false, Instant::now());

        stats.add_request();
        stats.add_request();
        tokio::time::advance(Duration::from_millis(1100)).await;

        // Mid-second progress is flushed as a final partial sample.
        stats.add_request();
        ctx.cancel();
        handle.await.unwrap();

        let samples = stats.rps_samples_snapshot();
        assert_eq!(samples, vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_pushes_snapshots_to_sink() {
        let ctx = CancellationToken::new();
        let stats = Arc::new(Stats::new());
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn(
            ctx.clone(),
            stats.clone(),
            Some(sink.clone() as Arc<dyn ProgressSink>),
            false,
            Instant::now(),
        );

        stats.add_request();
        stats.record_status(200);
        stats.record_latency(Duration::from_millis(5));
        tokio::time::advance(Duration::from_millis(1100)).await;

        ctx.cancel();
        handle.await.unwrap();

        assert_eq!(sink.updates.load(Ordering::SeqCst), 1);
        assert_eq!(sink.last_total.load(Ordering::SeqCst), 1);
        let snapshots = sink.snapshots.lock().unwrap();
        assert_eq!(snapshots[0].requests_per_sec, 1);
        assert_eq!(snapshots[0].status_codes[&200], 1);
        assert!(snapshots[0].endpoints.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_stop_cancels_run() {
        let ctx = CancellationToken::new();
        let stats = Arc::new(Stats::new());
        let sink = Arc::new(RecordingSink::default());
        sink.stop.store(true, Ordering::SeqCst);

        let handle = spawn(
            ctx.clone(),
            stats.clone(),
            Some(sink as Arc<dyn ProgressSink>),
            false,
            Instant::now(),
        );

        tokio::time::advance(Duration::from_millis(1100)).await;
        handle.await.unwrap();
        assert!(ctx.is_cancelled());
    }
}
