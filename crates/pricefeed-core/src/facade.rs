//! Public entry point.
//!
//! [`MarketDataFacade`] answers quote and history requests from the cache
//! when it can, otherwise through the [`SourceRouter`]. Precision is applied
//! once here. The canonical daily series is cached unformatted and every
//! weekly/monthly series is derived from it locally.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapters::{
    AlphaVantageAdapter, BinanceAdapter, CoinGeckoAdapter, FinnhubAdapter, PolygonAdapter,
    YahooAdapter,
};
use crate::aggregation::aggregate;
use crate::cache::{
    Cache, CacheBackend, CacheKey, InMemoryCache, DAILY_SERIES_TTL, DERIVED_SERIES_TTL,
};
use crate::clock::{Clock, SystemClock};
use crate::config::MarketDataConfig;
use crate::data_source::{DataSource, QuoteRequest, SeriesRequest};
use crate::error::{MarketDataError, ProviderFailure};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::precision::{PrecisionFormatter, PrecisionRules};
use crate::provider_policy::ProviderPolicy;
use crate::rate_limit::RateLimitTracker;
use crate::retry::RetryConfig;
use crate::routing::{SourceRouter, SourceSnapshot};
use crate::{
    BarSeries, Interval, MarketClass, ProviderId, Quote, Symbol, UtcDateTime, ValidationError,
};

/// A facade result with how it was obtained.
#[derive(Debug, Clone)]
pub struct Served<T> {
    pub data: T,
    pub cache_hit: bool,
    /// Providers visited for this request; empty on a cache hit.
    pub source_chain: Vec<ProviderId>,
    /// Providers skipped or failed before one served.
    pub failures: Vec<ProviderFailure>,
    pub latency_ms: u64,
}

/// Daily bars as fetched, with the window they were fetched for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalDaily {
    series: BarSeries,
    range_days: u32,
    fetched_at: UtcDateTime,
    source: ProviderId,
}

impl CanonicalDaily {
    fn window_start(&self) -> UtcDateTime {
        window_start(self.fetched_at, self.range_days)
    }
}

fn window_start(at: UtcDateTime, range_days: u32) -> UtcDateTime {
    at.saturating_sub(time::Duration::days(i64::from(range_days)))
        .start_of_day()
}

/// Quotes and historical series across all configured providers.
#[derive(Debug)]
pub struct MarketDataFacade {
    router: SourceRouter,
    cache: Cache,
    formatter: PrecisionFormatter,
    clock: Arc<dyn Clock>,
}

impl MarketDataFacade {
    pub fn builder() -> MarketDataBuilder {
        MarketDataBuilder::new()
    }

    pub fn router(&self) -> &SourceRouter {
        &self.router
    }

    pub fn sources(&self) -> Vec<SourceSnapshot> {
        self.router.snapshots()
    }

    pub async fn get_quote(
        &self,
        symbol: &Symbol,
        market: MarketClass,
    ) -> Result<Quote, MarketDataError> {
        self.quote_served(symbol, market).await.map(|served| served.data)
    }

    pub async fn get_historical(
        &self,
        symbol: &Symbol,
        market: MarketClass,
        range_days: u32,
        interval: Interval,
    ) -> Result<BarSeries, MarketDataError> {
        self.historical_served(symbol, market, range_days, interval)
            .await
            .map(|served| served.data)
    }

    /// [`Self::get_quote`] for external string input (`"AAPL"`, `"equity"`).
    pub async fn get_quote_str(
        &self,
        symbol: &str,
        market: &str,
    ) -> Result<Quote, MarketDataError> {
        let symbol = Symbol::parse(symbol)?;
        let market = MarketClass::from_str(market)?;
        self.get_quote(&symbol, market).await
    }

    /// [`Self::get_historical`] for external string input; `interval` is one
    /// of `1d`, `1w`, `1M`.
    pub async fn get_historical_str(
        &self,
        symbol: &str,
        market: &str,
        range_days: u32,
        interval: &str,
    ) -> Result<BarSeries, MarketDataError> {
        let symbol = Symbol::parse(symbol)?;
        let market = MarketClass::from_str(market)?;
        let interval = Interval::from_str(interval)?;
        self.get_historical(&symbol, market, range_days, interval).await
    }

    pub async fn quote_served(
        &self,
        symbol: &Symbol,
        market: MarketClass,
    ) -> Result<Served<Quote>, MarketDataError> {
        let started = Instant::now();
        let key = CacheKey::Quote {
            symbol: symbol.clone(),
            market,
        };

        if let Some(quote) = self.cache.get::<Quote>(&key).await {
            debug!(symbol = %symbol, market = %market, "quote served from cache");
            return Ok(Served {
                data: quote,
                cache_hit: true,
                source_chain: Vec::new(),
                failures: Vec::new(),
                latency_ms: elapsed_ms(started),
            });
        }

        let routed = self
            .router
            .route_quote(&QuoteRequest::new(symbol.clone(), market))
            .await?;
        let quote = self.formatter.format_quote(routed.data);
        let ttl = self.router.policy(routed.source).quote_ttl();
        self.cache.set(&key, &quote, ttl).await;

        info!(
            symbol = %symbol,
            provider = %routed.source,
            ttl_secs = ttl.as_secs(),
            "quote fetched"
        );
        Ok(Served {
            data: quote,
            cache_hit: false,
            source_chain: routed.source_chain,
            failures: routed.failures,
            latency_ms: elapsed_ms(started),
        })
    }

    pub async fn historical_served(
        &self,
        symbol: &Symbol,
        market: MarketClass,
        range_days: u32,
        interval: Interval,
    ) -> Result<Served<BarSeries>, MarketDataError> {
        let started = Instant::now();
        if !Interval::HISTORICAL.contains(&interval) {
            return Err(ValidationError::InvalidInterval {
                value: interval.to_string(),
            }
            .into());
        }
        let request = SeriesRequest::new(symbol.clone(), market, range_days)?;

        let key = CacheKey::Historical {
            symbol: symbol.clone(),
            market,
            interval,
            range_days,
        };
        if let Some(series) = self.cache.get::<BarSeries>(&key).await {
            debug!(symbol = %symbol, interval = %interval, "series served from cache");
            return Ok(Served {
                data: series,
                cache_hit: true,
                source_chain: Vec::new(),
                failures: Vec::new(),
                latency_ms: elapsed_ms(started),
            });
        }

        let start = window_start(self.clock.now(), range_days);
        let canonical_key = CacheKey::DailyCanonical {
            symbol: symbol.clone(),
            market,
        };

        let cached = self
            .cache
            .get::<CanonicalDaily>(&canonical_key)
            .await
            .filter(|daily| daily.window_start() <= start);
        let cache_hit = cached.is_some();

        let (daily, source_chain, failures) = match cached {
            Some(daily) => {
                debug!(symbol = %symbol, interval = %interval, "deriving from cached daily series");
                (daily.series, Vec::new(), Vec::new())
            }
            None => {
                let routed = self.router.route_daily_series(&request).await?;
                let canonical = CanonicalDaily {
                    series: routed.data,
                    range_days,
                    fetched_at: self.clock.now(),
                    source: routed.source,
                };
                self.cache.set(&canonical_key, &canonical, DAILY_SERIES_TTL).await;
                info!(
                    symbol = %symbol,
                    provider = %routed.source,
                    bars = canonical.series.len(),
                    "daily series fetched"
                );
                (canonical.series, routed.source_chain, routed.failures)
            }
        };

        let window = daily.trimmed_from(start);
        let derived = aggregate(&window, interval)?;
        let formatted = self.formatter.format_series(derived, market);
        let ttl = if interval.is_derived() {
            DERIVED_SERIES_TTL
        } else {
            DAILY_SERIES_TTL
        };
        self.cache.set(&key, &formatted, ttl).await;

        Ok(Served {
            data: formatted,
            cache_hit,
            source_chain,
            failures,
            latency_ms: elapsed_ms(started),
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Wires adapters, cool-down tracking, cache and precision into a facade.
///
/// Without explicit adapters, one adapter per usable provider in the
/// configuration is created over a shared HTTP client.
#[derive(Default)]
pub struct MarketDataBuilder {
    config: MarketDataConfig,
    adapters: Option<Vec<Arc<dyn DataSource>>>,
    http_client: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    retry: Option<RetryConfig>,
    precision: PrecisionRules,
    policies: Vec<ProviderPolicy>,
}

impl MarketDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: MarketDataConfig) -> Self {
        self.config = config;
        self
    }

    /// Use these adapters instead of building them from the configuration.
    pub fn with_adapters(mut self, adapters: Vec<Arc<dyn DataSource>>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_precision(mut self, rules: PrecisionRules) -> Self {
        self.precision = rules;
        self
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.policies.retain(|existing| existing.provider_id != policy.provider_id);
        self.policies.push(policy);
        self
    }

    pub fn build(self) -> MarketDataFacade {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let policy_for = |provider: ProviderId| {
            self.policies
                .iter()
                .find(|policy| policy.provider_id == provider)
                .cloned()
                .unwrap_or_else(|| ProviderPolicy::default_for(provider))
        };

        let adapters = match self.adapters {
            Some(adapters) => adapters,
            None => {
                let http_client = self
                    .http_client
                    .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
                configured_adapters(&self.config, &http_client, &clock, &policy_for)
            }
        };

        let tracker = Arc::new(RateLimitTracker::with_providers(
            clock.clone(),
            adapters.iter().map(|adapter| adapter.id()),
        ));
        let retry = self.retry.unwrap_or_else(|| self.config.retry_config());
        let mut router = SourceRouter::new(adapters, tracker).with_retry(retry);
        for policy in &self.policies {
            router = router.with_policy(policy.clone());
        }

        let backend = self
            .cache_backend
            .unwrap_or_else(|| Arc::new(InMemoryCache::new(clock.clone())));
        let cache = Cache::new(backend).with_op_timeout(self.config.cache_timeout);

        info!(providers = ?router.registered(), "market data facade ready");
        MarketDataFacade {
            router,
            cache,
            formatter: PrecisionFormatter::new(self.precision),
            clock,
        }
    }
}

fn configured_adapters(
    config: &MarketDataConfig,
    http_client: &Arc<dyn HttpClient>,
    clock: &Arc<dyn Clock>,
    policy_for: &dyn Fn(ProviderId) -> ProviderPolicy,
) -> Vec<Arc<dyn DataSource>> {
    let mut adapters: Vec<Arc<dyn DataSource>> = Vec::new();

    for provider in ProviderId::ALL {
        if !config.is_usable(provider) {
            debug!(provider = %provider, "provider not registered (disabled or missing key)");
            continue;
        }
        let http = http_client.clone();
        let policy = policy_for(provider);
        let key = config.api_key(provider).unwrap_or_default().to_owned();

        let adapter: Arc<dyn DataSource> = match provider {
            ProviderId::Yahoo => Arc::new(
                YahooAdapter::new(http)
                    .with_clock(clock.clone())
                    .with_policy(&policy),
            ),
            ProviderId::Finnhub => Arc::new(
                FinnhubAdapter::new(http, key)
                    .with_clock(clock.clone())
                    .with_policy(&policy),
            ),
            ProviderId::Polygon => Arc::new(
                PolygonAdapter::new(http, key)
                    .with_clock(clock.clone())
                    .with_policy(&policy),
            ),
            ProviderId::Alphavantage => Arc::new(
                AlphaVantageAdapter::new(http, key)
                    .with_clock(clock.clone())
                    .with_policy(&policy),
            ),
            ProviderId::Binance => Arc::new(
                BinanceAdapter::new(http)
                    .with_clock(clock.clone())
                    .with_policy(&policy),
            ),
            ProviderId::Coingecko => {
                let adapter = CoinGeckoAdapter::new(http)
                    .with_clock(clock.clone())
                    .with_policy(&policy);
                Arc::new(match config.api_key(provider) {
                    Some(key) => adapter.with_api_key(key),
                    None => adapter,
                })
            }
        };
        adapters.push(adapter);
    }

    adapters
}
