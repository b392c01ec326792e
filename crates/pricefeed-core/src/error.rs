use std::fmt::{Display, Formatter};

use serde::Serialize;
use thiserror::Error;

use crate::data_source::{Endpoint, SourceError, SourceErrorKind};
use crate::{MarketClass, ProviderId};

/// Validation and contract errors for domain construction and input parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter or digit: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid interval '{value}', expected one of 1d, 1w, 1M or an intraday Nm/Nh")]
    InvalidInterval { value: String },
    #[error("invalid market class '{value}', expected one of equity, crypto, forex, index")]
    InvalidMarketClass { value: String },
    #[error("invalid provider '{value}'")]
    InvalidProvider { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp out of range: {value}")]
    TimestampOutOfRange { value: i64 },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("field '{field}' must be greater than zero")]
    NonPositiveValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,
    #[error("series timestamps must be strictly increasing (violation at index {index})")]
    UnorderedSeries { index: usize },

    #[error("range_days must be between 1 and {max}, got {value}")]
    InvalidRange { value: u32, max: u32 },

    #[error("request_id must be at least 8 characters")]
    InvalidRequestId,
    #[error("error code and message cannot be empty")]
    EmptyErrorPayload,
}

/// One provider's contribution to a failed fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub code: &'static str,
    pub message: String,
    /// Number of adapter calls made; zero when the provider was skipped.
    pub attempts: u32,
}

impl ProviderFailure {
    pub fn from_source_error(provider: ProviderId, error: &SourceError, attempts: u32) -> Self {
        Self {
            provider,
            code: error.code(),
            message: error.message().to_owned(),
            attempts,
        }
    }

    pub fn skipped(provider: ProviderId, reason: impl Into<String>) -> Self {
        Self {
            provider,
            code: SourceErrorKind::RateLimited.code(),
            message: reason.into(),
            attempts: 0,
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.attempts == 0
    }
}

impl Display for ProviderFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} ({}, attempts={})",
            self.provider, self.message, self.code, self.attempts
        )
    }
}

/// Errors that cross the market data boundary.
///
/// Individual provider failures never surface on their own; they are folded
/// into [`MarketDataError::AllProvidersFailed`].
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no provider is configured for {endpoint} requests on {market} symbols")]
    NoProviders {
        endpoint: Endpoint,
        market: MarketClass,
    },

    #[error("all {} provider(s) failed: {}", failures.len(), summarize(failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    #[error("aggregation error: {0}")]
    Aggregation(String),
}

impl MarketDataError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "market_data.validation",
            Self::InvalidRequest(_) => "market_data.invalid_request",
            Self::NoProviders { .. } => "market_data.no_providers",
            Self::AllProvidersFailed { .. } => "market_data.all_providers_failed",
            Self::Aggregation(_) => "market_data.aggregation",
        }
    }

    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            Self::AllProvidersFailed { failures } => failures,
            _ => &[],
        }
    }
}

fn summarize(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Invalid environment configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    InvalidValue {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{name} lists an unknown provider: {source}")]
    UnknownProvider {
        name: &'static str,
        source: ValidationError,
    },
}

/// Cache backend failure. Always absorbed by the caller and treated as a miss.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}
