//! Advisory caching for quotes and series.
//!
//! [`CacheBackend`] is the storage seam, [`InMemoryCache`] the default
//! backend and [`Cache`] the fail-open wrapper the facade talks to: a backend
//! error or a slow backend call is logged and treated as a miss.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;
use crate::{Interval, MarketClass, Symbol, UtcDateTime};

/// TTL of the canonical daily series.
pub const DAILY_SERIES_TTL: Duration = Duration::from_secs(300);
/// TTL of weekly/monthly series derived from the daily one.
pub const DERIVED_SERIES_TTL: Duration = Duration::from_secs(300);
/// Default budget for a single backend call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(250);

/// Typed cache key. [`Display`] is the only place keys are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Quote {
        symbol: Symbol,
        market: MarketClass,
    },
    /// Unformatted daily bars as fetched, independent of the requested range.
    DailyCanonical {
        symbol: Symbol,
        market: MarketClass,
    },
    /// Formatted series for an exact (interval, range) request.
    Historical {
        symbol: Symbol,
        market: MarketClass,
        interval: Interval,
        range_days: u32,
    },
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quote { symbol, market } => write!(f, "quote:{market}:{symbol}"),
            Self::DailyCanonical { symbol, market } => write!(f, "daily:{market}:{symbol}"),
            Self::Historical {
                symbol,
                market,
                interval,
                range_days,
            } => write!(f, "history:{market}:{symbol}:{interval}:{range_days}d"),
        }
    }
}

pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Key-value store with per-key TTL.
pub trait CacheBackend: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: String, value: String, ttl: Duration) -> CacheFuture<'a, ()>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    body: String,
    expires_at: UtcDateTime,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, CacheEntry>,
    /// Earliest expiry in `map`. A write at or after it sweeps the map.
    next_expiry: Option<UtcDateTime>,
}

impl Entries {
    fn sweep(&mut self, now: UtcDateTime) {
        self.map.retain(|_, entry| entry.expires_at > now);
        self.next_expiry = self.map.values().map(|entry| entry.expires_at).min();
    }
}

/// Thread-safe in-memory backend with clock-driven expiry.
///
/// Expired entries are dropped on the first write after the earliest of them
/// lapses, so the map only holds what is live plus what expired since.
#[derive(Debug, Clone)]
pub struct InMemoryCache {
    entries: Arc<tokio::sync::RwLock<Entries>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(tokio::sync::RwLock::new(Entries::default())),
            clock,
        }
    }

    /// Remove expired entries.
    pub async fn clear_expired(&self) {
        let now = self.clock.now();
        self.entries.write().await.sweep(now);
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.map.clear();
        entries.next_expiry = None;
    }

    /// Number of entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CacheBackend for InMemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async move {
            let now = self.clock.now();
            let entries = self.entries.read().await;
            Ok(entries
                .map
                .get(key)
                .filter(|entry| now < entry.expires_at)
                .map(|entry| entry.body.clone()))
        })
    }

    fn set<'a>(&'a self, key: String, value: String, ttl: Duration) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            if ttl.is_zero() {
                return Ok(());
            }
            let now = self.clock.now();
            let step = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
            let Some(expires_at) = now.checked_add(step) else {
                return Err(CacheError::Unavailable(format!(
                    "ttl of {}s overflows the clock",
                    ttl.as_secs()
                )));
            };

            let mut entries = self.entries.write().await;
            if entries.next_expiry.is_some_and(|next| next <= now) {
                entries.sweep(now);
            }
            let next_expiry = entries.next_expiry.map_or(expires_at, |next| next.min(expires_at));
            entries.next_expiry = Some(next_expiry);
            entries.map.insert(
                key,
                CacheEntry {
                    body: value,
                    expires_at,
                },
            );
            Ok(())
        })
    }
}

/// Fail-open typed facade over a [`CacheBackend`].
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    op_timeout: Duration,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Cached value for `key`, or `None` on miss, expiry, backend failure or
    /// an undecodable entry.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let rendered = key.to_string();
        let body = match tokio::time::timeout(self.op_timeout, self.backend.get(&rendered)).await {
            Ok(Ok(Some(body))) => body,
            Ok(Ok(None)) => {
                debug!(key = %rendered, "cache miss");
                return None;
            }
            Ok(Err(error)) => {
                warn!(key = %rendered, error = %error, "cache get failed, treating as miss");
                return None;
            }
            Err(_) => {
                warn!(
                    key = %rendered,
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "cache get timed out, treating as miss"
                );
                return None;
            }
        };

        match serde_json::from_str(&body) {
            Ok(value) => {
                debug!(key = %rendered, "cache hit");
                Some(value)
            }
            Err(error) => {
                warn!(key = %rendered, error = %error, "cache entry undecodable, treating as miss");
                None
            }
        }
    }

    /// Best-effort write; failures are logged and dropped.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        let rendered = key.to_string();
        let body = match serde_json::to_string(value) {
            Ok(body) => body,
            Err(error) => {
                warn!(
                    key = %rendered,
                    error = %error,
                    "cache value not serializable, skipping write"
                );
                return;
            }
        };

        let write = self.backend.set(rendered.clone(), body, ttl);
        match tokio::time::timeout(self.op_timeout, write).await {
            Ok(Ok(())) => debug!(key = %rendered, ttl_secs = ttl.as_secs(), "cache write"),
            Ok(Err(error)) => {
                warn!(key = %rendered, error = %error, "cache set failed, dropping write")
            }
            Err(_) => warn!(key = %rendered, "cache set timed out, dropping write"),
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}
