//! Progress sink interface.
//!
//! The core pushes one [`ProgressSnapshot`] per second into an opaque sink
//! and polls it for a user-initiated stop. The full-screen renderer lives
//! outside the engine; [`TermSink`] here is a minimal single-line writer so
//! the binary has a live view, and [`NullSink`] keeps headless runs cheap.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::config::UiTheme;

/// Per-endpoint row in a snapshot, present when the pool spans multiple
/// URLs.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointRow {
    pub url: String,
    pub requests: u64,
    pub requests_per_sec: f64,
    pub avg_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub errors: u64,
}

/// One second of live progress.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub total_requests: u64,
    /// Requests completed in the last sample second.
    pub requests_per_sec: u64,
    pub status_codes: HashMap<u16, u64>,
    pub avg_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub percentiles: HashMap<u8, Duration>,
    pub errors: u64,
    pub endpoints: Option<Vec<EndpointRow>>,
}

/// Receives progress snapshots and may request an early stop.
pub trait ProgressSink: Send + Sync {
    fn update(&self, snapshot: &ProgressSnapshot);

    /// Polled by the sampler once per tick; `true` cancels the run.
    fn stop_requested(&self) -> bool {
        false
    }
}

/// Sink that ignores everything. The engine runs correctly without a UI.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn update(&self, _snapshot: &ProgressSnapshot) {}
}

/// Resolved terminal theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Dark,
    Light,
}

/// Resolves `auto` from the environment: `GUST_THEME` wins, then the
/// `COLORFGBG` background convention, then `TERM_PROGRAM`, else dark.
pub fn detect_theme(theme: UiTheme) -> Theme {
    match theme {
        UiTheme::Dark => Theme::Dark,
        UiTheme::Light => Theme::Light,
        UiTheme::Auto => detect_from_env(),
    }
}

fn detect_from_env() -> Theme {
    if let Ok(value) = std::env::var("GUST_THEME") {
        match value.to_lowercase().as_str() {
            "light" => return Theme::Light,
            "dark" => return Theme::Dark,
            _ => {}
        }
    }

    // COLORFGBG is "<fg>;<bg>"; background 7 and 15 are light.
    if let Ok(value) = std::env::var("COLORFGBG") {
        if let Some(bg) = value.rsplit(';').next() {
            if bg == "7" || bg == "15" {
                return Theme::Light;
            }
            return Theme::Dark;
        }
    }

    if let Ok(value) = std::env::var("TERM_PROGRAM") {
        if value == "Apple_Terminal" {
            return Theme::Light;
        }
    }

    Theme::Dark
}

/// Minimal live view: rewrites one status line per snapshot on stderr.
pub struct TermSink {
    theme: Theme,
    stop: AtomicBool,
}

impl TermSink {
    pub fn new(theme: UiTheme) -> Self {
        Self {
            theme: detect_theme(theme),
            stop: AtomicBool::new(false),
        }
    }

    /// Marks the run for early termination at the next sampler tick.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn accent(&self) -> &'static str {
        match self.theme {
            Theme::Dark => "\x1b[96m",
            Theme::Light => "\x1b[34m",
        }
    }
}

impl ProgressSink for TermSink {
    fn update(&self, snapshot: &ProgressSnapshot) {
        let p99 = snapshot
            .percentiles
            .get(&99)
            .copied()
            .unwrap_or(Duration::ZERO);

        let mut stderr = std::io::stderr().lock();
        let _ = write!(
            stderr,
            "\r{}{:>10}{} req  {:>8} req/s  avg {:>9.2?}  p99 {:>9.2?}  errors {}\x1b[K",
            self.accent(),
            snapshot.total_requests,
            "\x1b[0m",
            snapshot.requests_per_sec,
            snapshot.avg_latency,
            p99,
            snapshot.errors,
        );
        let _ = stderr.flush();
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}
