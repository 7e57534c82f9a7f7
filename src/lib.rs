//! HTTP load-generation engine.
//!
//! `gust` drives a fleet of persistent HTTP/1.1 connections at a target
//! service, samples live throughput once per second, honors a global
//! request-rate ceiling, optionally evaluates per-response assertions, and
//! produces consolidated statistics.
//!
//! Two interchangeable drivers implement the same [`driver::Driver`]
//! contract: [`standard::StandardDriver`] fans out worker tasks over a
//! conventional HTTP client, while [`event::EventDriver`] owns raw TCP
//! sockets on a single event-loop thread and pipelines one in-flight
//! response per socket through a streaming parser.
//!
//! Typical usage:
//!
//! ```no_run
//! use gust::bench::Benchmark;
//! use gust::config::Config;
//! use gust::request::PreparedRequest;
//!
//! # async fn demo() -> Result<(), gust::errors::EngineError> {
//! let config = Config::default();
//! let request = PreparedRequest::get("http://localhost:8080/".parse().unwrap());
//! let results = Benchmark::new(config, request).run().await?;
//! println!("{} requests in {:?}", results.total_requests, results.duration);
//! # Ok(())
//! # }
//! ```

pub mod asserts;
pub mod bench;
pub mod config;
pub mod driver;
pub mod errors;
pub mod event;
pub mod httpparse;
pub mod limiter;
pub mod output;
pub mod pool;
pub mod request;
pub mod sampler;
pub mod standard;
pub mod stats;
pub mod ui;
pub mod utils;

pub use bench::Benchmark;
pub use config::Config;
pub use errors::EngineError;
pub use request::PreparedRequest;
pub use stats::Results;
