//! Run configuration.
//!
//! A [`Config`] is immutable for the lifetime of one benchmark run. It is
//! produced by the CLI (or any embedding front-end) and validated once
//! before the run starts; per-request failures never touch it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::EngineError;

/// How a multi-request pool dispatches the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// Walk the pool in order using a monotone counter.
    RoundRobin,
    /// Draw uniformly from the pool.
    #[default]
    Random,
}

impl FromStr for LoadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "round-robin" => Ok(LoadStrategy::RoundRobin),
            "random" => Ok(LoadStrategy::Random),
            _ => Err(format!(
                "invalid load strategy: '{}'. Use 'round-robin' or 'random'.",
                s
            )),
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStrategy::RoundRobin => write!(f, "round-robin"),
            LoadStrategy::Random => write!(f, "random"),
        }
    }
}

/// Terminal color theme for the live UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiTheme {
    Dark,
    Light,
    /// Detect from the environment, falling back to dark.
    #[default]
    Auto,
}

impl FromStr for UiTheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dark" => Ok(UiTheme::Dark),
            "light" => Ok(UiTheme::Light),
            "auto" => Ok(UiTheme::Auto),
            _ => Err(format!(
                "invalid theme: '{}'. Use 'dark', 'light', or 'auto'.",
                s
            )),
        }
    }
}

/// Configuration for a single benchmark run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of persistent outbound connections to hold open.
    pub connections: usize,

    /// Number of worker schedulers (standard driver only). Connections are
    /// distributed as `connections / threads`, with one extra for the first
    /// `connections % threads` workers.
    pub threads: usize,

    /// Hard deadline for the run.
    pub duration: Duration,

    /// Optional total-request ceiling; `0` means unbounded, duration-limited.
    pub requests: u64,

    /// Target requests/second aggregated across all connections; `0` means
    /// unlimited.
    pub rate: u32,

    /// Per-request deadline covering connect, write, and read.
    pub timeout: Duration,

    /// Dispatch strategy for multi-request pools.
    pub load_strategy: LoadStrategy,

    /// Force the standard driver even when the event driver would apply.
    pub use_standard_driver: bool,

    /// Optional multi-line assertion block evaluated against each response.
    pub asserts_text: Option<String>,

    /// Render live progress to the terminal.
    pub live_ui: bool,

    /// Theme for the live UI.
    pub ui_theme: UiTheme,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connections: 10,
            threads: 2,
            duration: Duration::from_secs(10),
            requests: 0,
            rate: 0,
            timeout: Duration::from_secs(30),
            load_strategy: LoadStrategy::default(),
            use_standard_driver: false,
            asserts_text: None,
            live_ui: false,
            ui_theme: UiTheme::default(),
        }
    }
}

impl Config {
    /// Checks the configuration before a run. Violations are fatal.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.connections == 0 {
            return Err(EngineError::InvalidConfig(
                "connections must be greater than 0".to_string(),
            ));
        }

        if self.threads == 0 {
            return Err(EngineError::InvalidConfig(
                "threads must be greater than 0".to_string(),
            ));
        }

        if self.duration.is_zero() {
            return Err(EngineError::InvalidConfig(
                "duration must be greater than 0".to_string(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(EngineError::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// True when a total-request ceiling is configured.
    pub fn bounded(&self) -> bool {
        self.requests > 0
    }
}
