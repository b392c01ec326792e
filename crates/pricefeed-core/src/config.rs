//! Environment-driven configuration.
//!
//! Every variable is read as `PRICEFEED_<NAME>` first; API keys fall back to
//! the provider's conventional name (`FINNHUB_API_KEY`, ...).

use std::collections::BTreeSet;
use std::env;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::time::Duration;

use crate::cache::DEFAULT_OP_TIMEOUT;
use crate::data_source::DEFAULT_REQUEST_TIMEOUT;
use crate::error::ConfigError;
use crate::retry::RetryConfig;
use crate::ProviderId;

const DISABLED_PROVIDERS: &str = "PRICEFEED_DISABLED_PROVIDERS";
const REQUEST_TIMEOUT_MS: &str = "PRICEFEED_REQUEST_TIMEOUT_MS";
const MAX_ATTEMPTS: &str = "PRICEFEED_MAX_ATTEMPTS";
const CACHE_TIMEOUT_MS: &str = "PRICEFEED_CACHE_TIMEOUT_MS";

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Provider credentials and request budgets.
#[derive(Clone, PartialEq, Eq)]
pub struct MarketDataConfig {
    pub finnhub_api_key: Option<String>,
    pub polygon_api_key: Option<String>,
    pub alphavantage_api_key: Option<String>,
    pub coingecko_api_key: Option<String>,
    pub disabled_providers: BTreeSet<ProviderId>,
    /// Deadline of the first attempt against a provider.
    pub request_timeout: Duration,
    pub max_attempts: u32,
    /// Budget for a single cache backend call.
    pub cache_timeout: Duration,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            finnhub_api_key: None,
            polygon_api_key: None,
            alphavantage_api_key: None,
            coingecko_api_key: None,
            disabled_providers: BTreeSet::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cache_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

impl MarketDataConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let key = |provider: &str| {
            read(&format!("PRICEFEED_{provider}_API_KEY"))
                .or_else(|| read(&format!("{provider}_API_KEY")))
        };

        let mut config = Self {
            finnhub_api_key: key("FINNHUB"),
            polygon_api_key: key("POLYGON"),
            alphavantage_api_key: key("ALPHAVANTAGE"),
            coingecko_api_key: key("COINGECKO"),
            ..Self::default()
        };

        if let Some(raw) = read(DISABLED_PROVIDERS) {
            config.disabled_providers = parse_provider_list(&raw)?;
        }
        if let Some(raw) = read(REQUEST_TIMEOUT_MS) {
            config.request_timeout =
                Duration::from_millis(parse_positive(REQUEST_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = read(MAX_ATTEMPTS) {
            config.max_attempts = u32::try_from(parse_positive(MAX_ATTEMPTS, &raw)?).map_err(|_| {
                ConfigError::InvalidValue {
                    name: MAX_ATTEMPTS,
                    value: raw.clone(),
                    expected: "a positive 32-bit integer",
                }
            })?;
        }
        if let Some(raw) = read(CACHE_TIMEOUT_MS) {
            config.cache_timeout = Duration::from_millis(parse_positive(CACHE_TIMEOUT_MS, &raw)?);
        }

        Ok(config)
    }

    pub fn with_api_key(mut self, provider: ProviderId, key: impl Into<String>) -> Self {
        let key = Some(key.into());
        match provider {
            ProviderId::Finnhub => self.finnhub_api_key = key,
            ProviderId::Polygon => self.polygon_api_key = key,
            ProviderId::Alphavantage => self.alphavantage_api_key = key,
            ProviderId::Coingecko => self.coingecko_api_key = key,
            ProviderId::Yahoo | ProviderId::Binance => {}
        }
        self
    }

    pub fn with_disabled(mut self, provider: ProviderId) -> Self {
        self.disabled_providers.insert(provider);
        self
    }

    pub fn api_key(&self, provider: ProviderId) -> Option<&str> {
        match provider {
            ProviderId::Finnhub => self.finnhub_api_key.as_deref(),
            ProviderId::Polygon => self.polygon_api_key.as_deref(),
            ProviderId::Alphavantage => self.alphavantage_api_key.as_deref(),
            ProviderId::Coingecko => self.coingecko_api_key.as_deref(),
            ProviderId::Yahoo | ProviderId::Binance => None,
        }
    }

    /// Enabled, and keyed if the provider requires a key.
    pub fn is_usable(&self, provider: ProviderId) -> bool {
        !self.disabled_providers.contains(&provider)
            && (!provider.requires_api_key() || self.api_key(provider).is_some())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::exponential(self.max_attempts).with_attempt_timeout(self.request_timeout)
    }
}

impl Debug for MarketDataConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("MarketDataConfig")
            .field("finnhub_api_key", &redact(&self.finnhub_api_key))
            .field("polygon_api_key", &redact(&self.polygon_api_key))
            .field("alphavantage_api_key", &redact(&self.alphavantage_api_key))
            .field("coingecko_api_key", &redact(&self.coingecko_api_key))
            .field("disabled_providers", &self.disabled_providers)
            .field("request_timeout", &self.request_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("cache_timeout", &self.cache_timeout)
            .finish()
    }
}

fn parse_provider_list(raw: &str) -> Result<BTreeSet<ProviderId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            ProviderId::from_str(item).map_err(|source| ConfigError::UnknownProvider {
                name: DISABLED_PROVIDERS,
                source,
            })
        })
        .collect()
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw.to_owned(),
            expected: "a positive integer",
        }),
    }
}
