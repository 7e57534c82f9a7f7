//! Concurrency-safe run statistics.
//!
//! A single [`Stats`] instance is shared by every worker and the sampler.
//! High-frequency counters are monotone atomics; each collection (latency
//! vector, status map, error list, per-second samples, endpoint map) is
//! guarded by its own lock, and no lock is ever held across I/O or UI
//! calls. Readers take copies.
//!
//! At the end of the run the orchestrator seals the aggregate into an
//! owned [`Results`] snapshot; nothing mutates it afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Percentile queries sort at most this many trailing samples.
pub const PERCENTILE_WINDOW: usize = 10_000;

/// Percentile levels reported by [`Stats::latency_percentiles`].
pub const PERCENTILE_LEVELS: [u8; 5] = [50, 75, 90, 95, 99];

const MIN_UNSET: u64 = u64::MAX;

/// Outcome of claiming a send slot in bounded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// A slot was claimed; `last` marks the final slot under the ceiling.
    Claimed { last: bool },
    /// The ceiling is already reached; nothing may be sent.
    Exhausted,
}

/// Per-URL statistics, kept when the request pool spans multiple URLs.
#[derive(Debug, Clone, Default)]
pub struct EndpointStats {
    pub requests: u64,
    pub errors: u64,
    pub latencies: Vec<Duration>,
    pub status_codes: HashMap<u16, u64>,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub min_latency: Duration,
    pub max_latency: Duration,
}

impl EndpointStats {
    pub fn average_latency(&self) -> Duration {
        average(&self.latencies)
    }
}

/// Shared, mutable statistics for one run.
#[derive(Debug)]
pub struct Stats {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
    min_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,

    latencies: Mutex<Vec<Duration>>,
    status_codes: Mutex<HashMap<u16, u64>>,
    errors: Mutex<Vec<String>>,
    rps_samples: Mutex<Vec<u64>>,
    endpoints: Mutex<HashMap<String, EndpointStats>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            read_bytes: AtomicU64::new(0),
            write_bytes: AtomicU64::new(0),
            min_latency_ns: AtomicU64::new(MIN_UNSET),
            max_latency_ns: AtomicU64::new(0),
            latencies: Mutex::new(Vec::new()),
            status_codes: Mutex::new(HashMap::new()),
            errors: Mutex::new(Vec::new()),
            rps_samples: Mutex::new(Vec::new()),
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    // --- request accounting ---

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    /// Post-response increment for unbounded runs.
    pub fn add_request(&self) -> u64 {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Pre-send claim for bounded runs. The counter is strictly monotone
    /// and never exceeds `limit`, which is why this is a compare-and-swap
    /// rather than a fetch-and-add.
    pub fn claim_request(&self, limit: u64) -> Claim {
        let mut cur = self.total_requests.load(Ordering::Relaxed);
        loop {
            if cur >= limit {
                return Claim::Exhausted;
            }
            match self.total_requests.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Claim::Claimed {
                        last: cur + 1 == limit,
                    }
                }
                Err(actual) => cur = actual,
            }
        }
    }

    // --- hot-path recording ---

    pub fn record_latency(&self, latency: Duration) {
        let ns = latency.as_nanos() as u64;
        self.min_latency_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(ns, Ordering::Relaxed);
        self.latencies.lock().unwrap().push(latency);
    }

    pub fn record_status(&self, code: u16) {
        *self.status_codes.lock().unwrap().entry(code).or_insert(0) += 1;
    }

    /// Records an error message and counts it toward `total_errors`.
    pub fn record_error(&self, message: String) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.errors.lock().unwrap().push(message);
    }

    pub fn record_read_bytes(&self, n: u64) {
        self.read_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_write_bytes(&self, n: u64) {
        self.write_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Records a delivered response against its endpoint.
    pub fn record_endpoint(
        &self,
        url: &str,
        latency: Duration,
        status: u16,
        read_bytes: u64,
        write_bytes: u64,
    ) {
        let mut endpoints = self.endpoints.lock().unwrap();
        let entry = endpoints.entry(url.to_string()).or_default();
        entry.requests += 1;
        entry.latencies.push(latency);
        *entry.status_codes.entry(status).or_insert(0) += 1;
        entry.read_bytes += read_bytes;
        entry.write_bytes += write_bytes;
        if entry.min_latency.is_zero() || latency < entry.min_latency {
            entry.min_latency = latency;
        }
        if latency > entry.max_latency {
            entry.max_latency = latency;
        }
    }

    /// Records a transport failure against its endpoint.
    pub fn record_endpoint_error(&self, url: &str) {
        let mut endpoints = self.endpoints.lock().unwrap();
        let entry = endpoints.entry(url.to_string()).or_default();
        entry.requests += 1;
        entry.errors += 1;
    }

    pub fn record_rps_sample(&self, requests_this_second: u64) {
        self.rps_samples.lock().unwrap().push(requests_this_second);
    }

    // --- reads (copies; safe alongside concurrent appenders) ---

    pub fn total_read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    pub fn total_write_bytes(&self) -> u64 {
        self.write_bytes.load(Ordering::Relaxed)
    }

    /// Zero until the first successful response is recorded.
    pub fn min_latency(&self) -> Duration {
        match self.min_latency_ns.load(Ordering::Relaxed) {
            MIN_UNSET => Duration::ZERO,
            ns => Duration::from_nanos(ns),
        }
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_nanos(self.max_latency_ns.load(Ordering::Relaxed))
    }

    pub fn average_latency(&self) -> Duration {
        average(&self.latencies.lock().unwrap())
    }

    pub fn status_codes(&self) -> HashMap<u16, u64> {
        self.status_codes.lock().unwrap().clone()
    }

    pub fn errors_snapshot(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn endpoints_snapshot(&self) -> HashMap<String, EndpointStats> {
        self.endpoints.lock().unwrap().clone()
    }

    pub fn rps_samples_snapshot(&self) -> Vec<u64> {
        self.rps_samples.lock().unwrap().clone()
    }

    /// Percentile latencies for the levels in [`PERCENTILE_LEVELS`].
    ///
    /// To bound work in long runs only the last [`PERCENTILE_WINDOW`]
    /// samples are sorted; the sort is out-of-place so concurrent
    /// appenders are never disturbed.
    pub fn latency_percentiles(&self) -> HashMap<u8, Duration> {
        let window = {
            let latencies = self.latencies.lock().unwrap();
            let start = latencies.len().saturating_sub(PERCENTILE_WINDOW);
            latencies[start..].to_vec()
        };
        percentiles_of(window)
    }

    /// Promotes the aggregate to an immutable [`Results`] snapshot.
    pub fn seal(&self, duration: Duration) -> Results {
        Results {
            total_requests: self.total_requests(),
            total_errors: self.total_errors(),
            total_read_bytes: self.total_read_bytes(),
            total_write_bytes: self.total_write_bytes(),
            duration,
            min_latency: self.min_latency(),
            max_latency: self.max_latency(),
            latencies: self.latencies.lock().unwrap().clone(),
            status_codes: self.status_codes(),
            errors: self.errors_snapshot(),
            rps_samples: self.rps_samples_snapshot(),
            endpoints: self.endpoints_snapshot(),
        }
    }
}

/// Sealed results of one run.
#[derive(Debug, Clone)]
pub struct Results {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_read_bytes: u64,
    pub total_write_bytes: u64,
    /// Actual wall-clock elapsed from first worker start to termination.
    pub duration: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub latencies: Vec<Duration>,
    pub status_codes: HashMap<u16, u64>,
    pub errors: Vec<String>,
    pub rps_samples: Vec<u64>,
    pub endpoints: HashMap<String, EndpointStats>,
}

/// Aggregate statistics over the per-second request samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpsStats {
    pub avg: f64,
    pub stdev: f64,
    pub max: f64,
    /// Percentage of samples within one standard deviation of the mean.
    pub within_one_stdev: f64,
}

impl Results {
    pub fn average_latency(&self) -> Duration {
        average(&self.latencies)
    }

    pub fn latency_std_dev(&self) -> Duration {
        if self.latencies.len() <= 1 {
            return Duration::ZERO;
        }

        let avg = self.average_latency().as_nanos() as f64;
        let sum_squares: f64 = self
            .latencies
            .iter()
            .map(|l| {
                let diff = l.as_nanos() as f64 - avg;
                diff * diff
            })
            .sum();
        let variance = sum_squares / (self.latencies.len() - 1) as f64;
        Duration::from_nanos(variance.sqrt() as u64)
    }

    /// Percentage of latencies within one standard deviation of the mean.
    pub fn latency_within_one_stdev(&self) -> f64 {
        let stdev = self.latency_std_dev();
        if self.latencies.is_empty() || stdev.is_zero() {
            return 0.0;
        }

        let avg = self.average_latency();
        let lower = avg.saturating_sub(stdev);
        let upper = avg + stdev;
        let count = self
            .latencies
            .iter()
            .filter(|l| **l >= lower && **l <= upper)
            .count();
        count as f64 / self.latencies.len() as f64 * 100.0
    }

    pub fn latency_percentiles(&self) -> HashMap<u8, Duration> {
        let start = self.latencies.len().saturating_sub(PERCENTILE_WINDOW);
        percentiles_of(self.latencies[start..].to_vec())
    }

    pub fn requests_per_sec(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        self.total_requests as f64 / self.duration.as_secs_f64()
    }

    pub fn transfer_per_sec(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        self.total_read_bytes as f64 / self.duration.as_secs_f64()
    }

    pub fn rps_stats(&self) -> RpsStats {
        if self.rps_samples.is_empty() {
            return RpsStats {
                avg: 0.0,
                stdev: 0.0,
                max: 0.0,
                within_one_stdev: 0.0,
            };
        }

        let sum: u64 = self.rps_samples.iter().sum();
        let max = self.rps_samples.iter().copied().max().unwrap_or(0) as f64;
        let avg = sum as f64 / self.rps_samples.len() as f64;

        if self.rps_samples.len() <= 1 {
            return RpsStats {
                avg,
                stdev: 0.0,
                max,
                within_one_stdev: 0.0,
            };
        }

        let sum_squares: f64 = self
            .rps_samples
            .iter()
            .map(|v| {
                let diff = *v as f64 - avg;
                diff * diff
            })
            .sum();
        let stdev = (sum_squares / (self.rps_samples.len() - 1) as f64).sqrt();

        let lower = avg - stdev;
        let upper = avg + stdev;
        let count = self
            .rps_samples
            .iter()
            .filter(|v| {
                let v = **v as f64;
                v >= lower && v <= upper
            })
            .count();
        let within_one_stdev = count as f64 / self.rps_samples.len() as f64 * 100.0;

        RpsStats {
            avg,
            stdev,
            max,
            within_one_stdev,
        }
    }
}

fn average(latencies: &[Duration]) -> Duration {
    if latencies.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = latencies.iter().sum();
    total / latencies.len() as u32
}

/// Deterministic percentile computation over an owned sample window.
fn percentiles_of(mut samples: Vec<Duration>) -> HashMap<u8, Duration> {
    let mut out = HashMap::new();
    if samples.is_empty() {
        return out;
    }

    samples.sort_unstable();
    for p in PERCENTILE_LEVELS {
        let idx = (samples.len() - 1) * p as usize / 100;
        out.insert(p, samples[idx]);
    }
    out
}
