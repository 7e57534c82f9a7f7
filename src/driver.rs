//! Driver contract and selection.
//!
//! Both drivers produce the same `Results` shape through the shared
//! [`Stats`]; they differ only in how they move bytes. Selection prefers
//! the event-loop driver for plain `http`/`https` targets unless the
//! configuration forces the standard client.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::asserts::AssertSet;
use crate::config::Config;
use crate::errors::EngineError;
use crate::event::EventDriver;
use crate::limiter::RateLimiter;
use crate::pool::RequestPool;
use crate::standard::StandardDriver;
use crate::stats::Stats;

/// A benchmark driver: moves requests until the cancellation scope fires or
/// the bounded request ceiling is exhausted.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn run(
        &self,
        ctx: CancellationToken,
        pool: Arc<RequestPool>,
        limiter: Arc<RateLimiter>,
        stats: Arc<Stats>,
    ) -> Result<(), EngineError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Picks the driver for this run.
pub fn select_driver(
    config: &Config,
    pool: &RequestPool,
    asserts: Option<Arc<AssertSet>>,
) -> Box<dyn Driver> {
    if config.use_standard_driver {
        return Box::new(StandardDriver::new(config.clone(), asserts));
    }

    if pool.all_http() {
        Box::new(EventDriver::new(config.clone(), asserts))
    } else {
        Box::new(StandardDriver::new(config.clone(), asserts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadStrategy;
    use crate::request::PreparedRequest;

    fn pool(urls: &[&str]) -> RequestPool {
        let requests = urls
            .iter()
            .map(|u| PreparedRequest::get(u.parse().unwrap()))
            .collect();
        RequestPool::new(requests, LoadStrategy::Random)
    }

    #[test]
    fn test_http_targets_pick_event_driver() {
        let config = Config::default();
        let driver = select_driver(&config, &pool(&["http://example.com/"]), None);
        assert_eq!(driver.name(), "event");

        let driver = select_driver(&config, &pool(&["https://example.com/"]), None);
        assert_eq!(driver.name(), "event");
    }

    #[test]
    fn test_forced_standard_driver() {
        let config = Config {
            use_standard_driver: true,
            ..Config::default()
        };
        let driver = select_driver(&config, &pool(&["http://example.com/"]), None);
        assert_eq!(driver.name(), "standard");
    }

    #[test]
    fn test_multi_request_http_pool_still_uses_event_driver() {
        let config = Config::default();
        let driver = select_driver(
            &config,
            &pool(&["http://example.com/a", "http://example.com/b"]),
            None,
        );
        assert_eq!(driver.name(), "event");
    }
}
