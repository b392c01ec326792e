use std::time::Duration;

use serde::Serialize;

use crate::ProviderId;

/// How fresh a provider's quotes are; drives the quote cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityTier {
    /// Streaming-grade or exchange-direct prices.
    Realtime,
    /// Prices delayed by minutes.
    Delayed,
    /// Previous close or heavily throttled free tiers.
    EndOfDay,
}

impl ReliabilityTier {
    pub const fn quote_ttl(self) -> Duration {
        match self {
            Self::Realtime => Duration::from_secs(60),
            Self::Delayed => Duration::from_secs(300),
            Self::EndOfDay => Duration::from_secs(900),
        }
    }
}

/// Static per-provider limits: cool-down after a throttle signal, local
/// request quota and quote freshness tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub tier: ReliabilityTier,
    pub cooldown: Duration,
    pub quota_window: Duration,
    pub quota_limit: u32,
}

impl ProviderPolicy {
    pub fn yahoo_default() -> Self {
        Self {
            provider_id: ProviderId::Yahoo,
            tier: ReliabilityTier::Realtime,
            cooldown: Duration::from_secs(300),
            quota_window: Duration::from_secs(60),
            quota_limit: 100,
        }
    }

    pub fn finnhub_default() -> Self {
        Self {
            provider_id: ProviderId::Finnhub,
            tier: ReliabilityTier::Realtime,
            cooldown: Duration::from_secs(60),
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
        }
    }

    pub fn polygon_default() -> Self {
        Self {
            provider_id: ProviderId::Polygon,
            tier: ReliabilityTier::EndOfDay,
            cooldown: Duration::from_secs(120),
            quota_window: Duration::from_secs(60),
            quota_limit: 5,
        }
    }

    pub fn alphavantage_default() -> Self {
        Self {
            provider_id: ProviderId::Alphavantage,
            tier: ReliabilityTier::EndOfDay,
            cooldown: Duration::from_secs(600),
            quota_window: Duration::from_secs(60),
            quota_limit: 5,
        }
    }

    pub fn binance_default() -> Self {
        Self {
            provider_id: ProviderId::Binance,
            tier: ReliabilityTier::Realtime,
            cooldown: Duration::from_secs(120),
            quota_window: Duration::from_secs(60),
            quota_limit: 1_200,
        }
    }

    pub fn coingecko_default() -> Self {
        Self {
            provider_id: ProviderId::Coingecko,
            tier: ReliabilityTier::Delayed,
            cooldown: Duration::from_secs(300),
            quota_window: Duration::from_secs(60),
            quota_limit: 30,
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Yahoo => Self::yahoo_default(),
            ProviderId::Finnhub => Self::finnhub_default(),
            ProviderId::Polygon => Self::polygon_default(),
            ProviderId::Alphavantage => Self::alphavantage_default(),
            ProviderId::Binance => Self::binance_default(),
            ProviderId::Coingecko => Self::coingecko_default(),
        }
    }

    pub const fn quote_ttl(&self) -> Duration {
        self.tier.quote_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphavantage_policy_matches_free_tier() {
        let policy = ProviderPolicy::alphavantage_default();

        assert_eq!(policy.provider_id, ProviderId::Alphavantage);
        assert_eq!(policy.quota_window, Duration::from_secs(60));
        assert_eq!(policy.quota_limit, 5);
        assert_eq!(policy.quote_ttl(), Duration::from_secs(900));
    }

    #[test]
    fn quote_ttls_stay_within_cache_window() {
        for provider in ProviderId::ALL {
            let policy = ProviderPolicy::default_for(provider);
            assert_eq!(policy.provider_id, provider);
            assert!(policy.quote_ttl() >= Duration::from_secs(60));
            assert!(policy.quote_ttl() <= Duration::from_secs(900));
        }
    }
}
