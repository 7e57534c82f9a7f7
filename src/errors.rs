//! Error taxonomy.
//!
//! Only two kinds of failure abort a run: configuration errors and the
//! event driver establishing zero sockets. Everything else (transport
//! failures, malformed responses, assertion misses) is recorded in the
//! run's statistics and the run continues.

use std::io;

use thiserror::Error;

use crate::asserts::AssertParseError;

/// Fatal errors surfaced to the caller of a benchmark run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid assertions: {0}")]
    InvalidAsserts(#[from] AssertParseError),

    /// The event driver could not establish a single socket.
    #[error("failed to establish any connection to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to load TLS roots: {0}")]
    Tls(String),

    #[error("event loop failed: {0}")]
    EventLoop(String),
}

/// Classification of a per-request failure, for error-class reporting.
///
/// Status codes are never categorized here: a parsed 4xx/5xx is a delivered
/// response, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection establishment, DNS, or mid-stream socket failures.
    Network,

    /// The per-request deadline elapsed.
    Timeout,

    /// TLS handshake or certificate failures.
    Tls,

    /// Malformed HTTP response on a raw socket.
    Parse,

    /// An assertion line rejected the response.
    Assert,

    /// Anything else.
    Other,
}

impl ErrorCategory {
    /// Classify a reqwest error from the standard driver.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ErrorCategory::Timeout
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode() {
            ErrorCategory::Network
        } else {
            let message = error.to_string().to_lowercase();
            if message.contains("certificate") || message.contains("tls") || message.contains("ssl")
            {
                ErrorCategory::Tls
            } else if message.contains("timeout") {
                ErrorCategory::Timeout
            } else if message.contains("dns")
                || message.contains("resolve")
                || message.contains("connection")
            {
                ErrorCategory::Network
            } else {
                ErrorCategory::Other
            }
        }
    }

    /// Classify an I/O error from the event driver.
    pub fn from_io_error(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorCategory::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => ErrorCategory::Network,
            _ => ErrorCategory::Other,
        }
    }

    /// Short label used when recording the error message.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Tls => "tls",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Assert => "assert",
            ErrorCategory::Other => "other",
        }
    }

    /// Format a recorded error string for the stats error list.
    pub fn message(&self, detail: impl std::fmt::Display) -> String {
        format!("[{}] {}", self.label(), detail)
    }
}
