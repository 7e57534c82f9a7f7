//! Request pool with load strategies.
//!
//! The pool owns the prepared requests for the run along with their
//! serialized wire form, so every dispatch returns both the request and its
//! precomputed size without re-serializing on the hot path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::LoadStrategy;
use crate::request::PreparedRequest;

/// One pool slot: the shared request plus its canonical serialized bytes.
#[derive(Debug)]
pub struct PoolEntry {
    pub request: Arc<PreparedRequest>,
    pub wire: Vec<u8>,
}

/// Fixed list of prepared requests dispatched by strategy.
pub struct RequestPool {
    entries: Vec<PoolEntry>,
    strategy: LoadStrategy,
    counter: AtomicU64,
    rng: Mutex<StdRng>,
    url_count: usize,
}

impl RequestPool {
    pub fn new(requests: Vec<PreparedRequest>, strategy: LoadStrategy) -> Self {
        let entries: Vec<PoolEntry> = requests
            .into_iter()
            .map(|request| {
                let wire = request.serialize();
                PoolEntry {
                    request: Arc::new(request),
                    wire,
                }
            })
            .collect();

        let url_count = entries
            .iter()
            .map(|e| e.request.url.as_str())
            .collect::<HashSet<_>>()
            .len();

        Self {
            entries,
            strategy,
            counter: AtomicU64::new(0),
            rng: Mutex::new(StdRng::from_entropy()),
            url_count,
        }
    }

    /// Returns the next entry per the load strategy together with its
    /// serialized-request length.
    pub fn next(&self) -> (&PoolEntry, usize) {
        debug_assert!(!self.entries.is_empty());

        if self.entries.len() == 1 {
            let entry = &self.entries[0];
            return (entry, entry.wire.len());
        }

        let idx = match self.strategy {
            LoadStrategy::RoundRobin => {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                (n % self.entries.len() as u64) as usize
            }
            LoadStrategy::Random => self.rng.lock().unwrap().gen_range(0..self.entries.len()),
        };

        let entry = &self.entries[idx];
        (entry, entry.wire.len())
    }

    pub fn first(&self) -> &PoolEntry {
        &self.entries[0]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct target URLs. Per-endpoint statistics are kept
    /// only when this is greater than 1.
    pub fn url_count(&self) -> usize {
        self.url_count
    }

    /// True when every request uses an `http` or `https` URL (the event
    /// driver's precondition).
    pub fn all_http(&self) -> bool {
        self.entries
            .iter()
            .all(|e| matches!(e.request.url.scheme(), "http" | "https"))
    }
}
