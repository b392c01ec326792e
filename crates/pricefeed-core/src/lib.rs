//! Market data aggregation core for pricefeed.
//!
//! This crate contains:
//! - Canonical domain models and validation
//! - Provider adapters behind the [`DataSource`] trait
//! - Fixed-priority fallback routing with retries and provider cool-downs
//! - A fail-open TTL cache, OHLC aggregation and display precision
//! - [`MarketDataFacade`], the entry point that wires it all together

pub mod adapters;
pub mod aggregation;
pub mod cache;
pub mod clock;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod http_client;
pub mod precision;
pub mod provider_policy;
pub mod rate_limit;
pub mod retry;
pub mod routing;
pub mod source;
pub mod throttling;

pub use adapters::{
    AlphaVantageAdapter, BinanceAdapter, CoinGeckoAdapter, FinnhubAdapter, PolygonAdapter,
    YahooAdapter,
};
pub use aggregation::aggregate;
pub use cache::{Cache, CacheBackend, CacheKey, InMemoryCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MarketDataConfig;
pub use data_source::{
    Coverage, DataSource, Endpoint, QuoteRequest, SeriesRequest, SourceError, SourceErrorKind,
    SourceFuture,
};
pub use domain::{Bar, BarSeries, Interval, MarketClass, Quote, Symbol, UtcDateTime};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta};
pub use error::{CacheError, ConfigError, MarketDataError, ProviderFailure, ValidationError};
pub use facade::{MarketDataBuilder, MarketDataFacade, Served};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse, ReqwestHttpClient,
};
pub use precision::{PrecisionFormatter, PrecisionRules};
pub use provider_policy::{ProviderPolicy, ReliabilityTier};
pub use rate_limit::{ProviderState, RateLimitTracker};
pub use retry::{with_retry, Backoff, RetryConfig, RetryFailure};
pub use routing::{RouteSuccess, SourceRouter, SourceSnapshot};
pub use source::ProviderId;
pub use throttling::QuotaGate;
