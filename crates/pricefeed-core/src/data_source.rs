//! Data source trait and request types.
//!
//! Every provider adapter implements [`DataSource`]. Adapters only translate
//! between the canonical request types and one provider's HTTP API; retry,
//! cool-down and caching policy live in the router and facade.
//!
//! | Endpoint | Request | Response |
//! |----------|---------|----------|
//! | Quote | [`QuoteRequest`] | [`Quote`] |
//! | DailySeries | [`SeriesRequest`] | [`BarSeries`] |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BarSeries, MarketClass, ProviderId, Quote, Symbol, ValidationError};

/// Longest daily history a single request may ask for.
pub const MAX_RANGE_DAYS: u32 = 3_650;

/// Transport deadline used when the caller does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Data endpoint type used for routing and coverage checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Quote,
    DailySeries,
}

impl Endpoint {
    pub const ALL: [Self; 2] = [Self::Quote, Self::DailySeries];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::DailySeries => "daily_series",
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market classes a source serves, per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub quote: &'static [MarketClass],
    pub daily_series: &'static [MarketClass],
}

impl Coverage {
    pub const fn new(
        quote: &'static [MarketClass],
        daily_series: &'static [MarketClass],
    ) -> Self {
        Self {
            quote,
            daily_series,
        }
    }

    /// Same market set for both endpoints.
    pub const fn uniform(markets: &'static [MarketClass]) -> Self {
        Self::new(markets, markets)
    }

    pub const fn markets(self, endpoint: Endpoint) -> &'static [MarketClass] {
        match endpoint {
            Endpoint::Quote => self.quote,
            Endpoint::DailySeries => self.daily_series,
        }
    }

    pub fn supports(self, endpoint: Endpoint, market: MarketClass) -> bool {
        self.markets(endpoint).contains(&market)
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    Unauthenticated,
    NotFound,
    RateLimited,
    Timeout,
    Malformed,
    Upstream,
    UnsupportedMarket,
    InvalidRequest,
}

impl SourceErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Unauthenticated => "provider.unauthenticated",
            Self::NotFound => "provider.not_found",
            Self::RateLimited => "provider.rate_limited",
            Self::Timeout => "provider.timeout",
            Self::Malformed => "provider.malformed_response",
            Self::Upstream => "provider.upstream",
            Self::UnsupportedMarket => "provider.unsupported_market",
            Self::InvalidRequest => "provider.invalid_request",
        }
    }

    /// Transient failures worth another attempt against the same provider.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Upstream)
    }
}

/// Structured source error consumed by router fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unauthenticated, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Malformed, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Upstream, message)
    }

    pub fn unsupported_market(
        provider: ProviderId,
        endpoint: Endpoint,
        market: MarketClass,
    ) -> Self {
        Self::new(
            SourceErrorKind::UnsupportedMarket,
            format!("{provider} does not serve {endpoint} data for {market} symbols"),
        )
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidRequest, message)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Provider payloads that fail domain validation are malformed responses.
impl From<ValidationError> for SourceError {
    fn from(value: ValidationError) -> Self {
        Self::malformed(value.to_string())
    }
}

/// Request payload for quote endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub symbol: Symbol,
    pub market: MarketClass,
    /// Transport deadline for the outgoing HTTP call.
    pub timeout: Duration,
}

impl QuoteRequest {
    pub fn new(symbol: Symbol, market: MarketClass) -> Self {
        Self {
            symbol,
            market,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Request payload for daily series endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub symbol: Symbol,
    pub market: MarketClass,
    pub range_days: u32,
    pub timeout: Duration,
}

impl SeriesRequest {
    pub fn new(
        symbol: Symbol,
        market: MarketClass,
        range_days: u32,
    ) -> Result<Self, ValidationError> {
        if range_days == 0 || range_days > MAX_RANGE_DAYS {
            return Err(ValidationError::InvalidRange {
                value: range_days,
                max: MAX_RANGE_DAYS,
            });
        }
        Ok(Self {
            symbol,
            market,
            range_days,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Source adapter contract.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// concurrent request. Adapters never touch the cache or cool-down state.
pub trait DataSource: Send + Sync {
    fn id(&self) -> ProviderId;

    fn coverage(&self) -> Coverage;

    /// Fetch the latest quote.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] classified by [`SourceErrorKind`]; a market
    /// outside [`coverage`](DataSource::coverage) yields `UnsupportedMarket`.
    fn quote<'a>(&'a self, req: QuoteRequest) -> SourceFuture<'a, Quote>;

    /// Fetch ascending daily bars covering at least `range_days` calendar days.
    fn daily_series<'a>(&'a self, req: SeriesRequest) -> SourceFuture<'a, BarSeries>;
}
