use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use log::trace;

use super::GitUrl;

/// Amount of time before a remote is fetched again.
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(60);

/// Source of wall-clock time for [`FetchCache`].
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Remembers when each remote was last cloned or fetched, so callers can skip fetches that
/// happened within [`FetchCache::interval`].
///
/// The cache is advisory: fetching regardless of [`FetchCache::needs_fetch`] is always correct.
pub struct FetchCache {
    interval: Duration,
    clock: Arc<dyn Clock>,
    last_fetch: DashMap<GitUrl, SystemTime>,
}

impl FetchCache {
    pub fn new(interval: Duration) -> FetchCache {
        FetchCache::with_clock(interval, Arc::new(SystemClock))
    }

    pub fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> FetchCache {
        FetchCache {
            interval,
            clock,
            last_fetch: DashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True when `url` was never fetched, or its last fetch is older than the interval.
    ///
    /// A last fetch in the future (clock moved backwards) counts as fresh.
    pub fn needs_fetch(&self, url: &GitUrl) -> bool {
        let Some(last_fetch) = self.last_fetch.get(url).map(|entry| *entry.value()) else {
            return true;
        };
        match self.clock.now().duration_since(last_fetch) {
            Ok(elapsed) => elapsed > self.interval,
            Err(_) => false,
        }
    }

    pub fn record_fetch(&self, url: &GitUrl) {
        trace!("Recording fetch of {}", url);
        self.last_fetch.insert(url.clone(), self.clock.now());
    }

    pub fn clear(&self) {
        self.last_fetch.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.last_fetch.is_empty()
    }
}

impl Default for FetchCache {
    fn default() -> Self {
        FetchCache::new(DEFAULT_FETCH_INTERVAL)
    }
}
