//! Fixed-priority fallback across provider adapters.
//!
//! For every request the router walks the provider chain of its
//! (endpoint, market) pair in order. Providers in a cool-down are skipped,
//! transient failures are retried, a throttle signal parks the provider and
//! the first success wins. When the chain runs dry the caller gets one
//! [`ProviderFailure`] per chain entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::data_source::{
    Coverage, DataSource, Endpoint, QuoteRequest, SeriesRequest, SourceErrorKind, SourceFuture,
};
use crate::error::{MarketDataError, ProviderFailure};
use crate::provider_policy::ProviderPolicy;
use crate::rate_limit::{ProviderState, RateLimitTracker};
use crate::retry::{with_retry, RetryConfig, RetryFailure};
use crate::{BarSeries, MarketClass, ProviderId, Quote};

/// Provider order for each (endpoint, market) pair.
pub const fn priority(endpoint: Endpoint, market: MarketClass) -> &'static [ProviderId] {
    use ProviderId::{Alphavantage, Binance, Coingecko, Finnhub, Polygon, Yahoo};

    match (endpoint, market) {
        (Endpoint::Quote, MarketClass::Equity) => &[Yahoo, Finnhub, Polygon, Alphavantage],
        (Endpoint::DailySeries, MarketClass::Equity) => &[Yahoo, Polygon, Alphavantage, Finnhub],
        (_, MarketClass::Index) => &[Yahoo, Polygon],
        (_, MarketClass::Crypto) => &[Binance, Coingecko, Yahoo],
        (_, MarketClass::Forex) => &[Yahoo],
    }
}

/// Successful routed call.
#[derive(Debug, Clone)]
pub struct RouteSuccess<T> {
    pub data: T,
    pub source: ProviderId,
    /// Adapter calls made against the serving provider.
    pub attempts: u32,
    /// Providers visited, in order, ending with `source`.
    pub source_chain: Vec<ProviderId>,
    /// Providers that were skipped or failed before `source` served.
    pub failures: Vec<ProviderFailure>,
    pub latency_ms: u64,
}

/// Registered provider with its coverage, policy and cool-down state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnapshot {
    pub id: ProviderId,
    pub coverage: Coverage,
    pub policy: ProviderPolicy,
    pub state: ProviderState,
}

impl SourceSnapshot {
    pub fn status_label(&self) -> &'static str {
        if self.state.rate_limited {
            "cooling_down"
        } else {
            "available"
        }
    }
}

/// Adapter registry and fallback engine.
pub struct SourceRouter {
    adapters: HashMap<ProviderId, Arc<dyn DataSource>>,
    tracker: Arc<RateLimitTracker>,
    retry: RetryConfig,
    policies: HashMap<ProviderId, ProviderPolicy>,
}

impl SourceRouter {
    pub fn new(adapters: Vec<Arc<dyn DataSource>>, tracker: Arc<RateLimitTracker>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.id(), adapter))
            .collect();
        Self {
            adapters,
            tracker,
            retry: RetryConfig::default(),
            policies: HashMap::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the built-in policy of one provider.
    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.policies.insert(policy.provider_id, policy);
        self
    }

    pub fn policy(&self, provider: ProviderId) -> ProviderPolicy {
        self.policies
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| ProviderPolicy::default_for(provider))
    }

    pub fn tracker(&self) -> &Arc<RateLimitTracker> {
        &self.tracker
    }

    /// Registered providers in declaration order.
    pub fn registered(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|provider| self.adapters.contains_key(provider))
            .collect()
    }

    /// Planned chain: the priority order restricted to registered adapters
    /// whose coverage includes the request.
    pub fn source_chain(&self, endpoint: Endpoint, market: MarketClass) -> Vec<ProviderId> {
        priority(endpoint, market)
            .iter()
            .copied()
            .filter(|provider| {
                self.adapters
                    .get(provider)
                    .is_some_and(|adapter| adapter.coverage().supports(endpoint, market))
            })
            .collect()
    }

    pub fn snapshots(&self) -> Vec<SourceSnapshot> {
        self.registered()
            .into_iter()
            .filter_map(|provider| {
                let adapter = self.adapters.get(&provider)?;
                Some(SourceSnapshot {
                    id: provider,
                    coverage: adapter.coverage(),
                    policy: self.policy(provider),
                    state: self.tracker.snapshot(provider),
                })
            })
            .collect()
    }

    pub async fn route_quote(
        &self,
        req: &QuoteRequest,
    ) -> Result<RouteSuccess<Quote>, MarketDataError> {
        let req = req.clone();
        self.route_endpoint(Endpoint::Quote, req.market, move |source, timeout| {
            source.quote(req.clone().with_timeout(timeout))
        })
        .await
    }

    pub async fn route_daily_series(
        &self,
        req: &SeriesRequest,
    ) -> Result<RouteSuccess<BarSeries>, MarketDataError> {
        let req = req.clone();
        self.route_endpoint(Endpoint::DailySeries, req.market, move |source, timeout| {
            source.daily_series(req.clone().with_timeout(timeout))
        })
        .await
    }

    async fn route_endpoint<T, F>(
        &self,
        endpoint: Endpoint,
        market: MarketClass,
        mut invoke: F,
    ) -> Result<RouteSuccess<T>, MarketDataError>
    where
        F: for<'a> FnMut(&'a dyn DataSource, Duration) -> SourceFuture<'a, T>,
    {
        let started = Instant::now();
        let chain = self.source_chain(endpoint, market);
        if chain.is_empty() {
            warn!(endpoint = %endpoint, market = %market, "no provider covers request");
            return Err(MarketDataError::NoProviders { endpoint, market });
        }

        let mut visited = Vec::with_capacity(chain.len());
        let mut failures = Vec::with_capacity(chain.len());

        for provider in chain {
            visited.push(provider);
            let Some(adapter) = self.adapters.get(&provider) else {
                continue;
            };

            if !self.tracker.is_available(provider) {
                let until = self
                    .tracker
                    .snapshot(provider)
                    .cooldown_until
                    .map_or_else(|| String::from("unknown"), |until| until.format_rfc3339());
                debug!(provider = %provider, until = %until, "skipping provider in cool-down");
                failures.push(ProviderFailure::skipped(
                    provider,
                    format!("provider is cooling down until {until}"),
                ));
                continue;
            }

            let retry = &self.retry;
            let attempt_call =
                |attempt: u32| invoke(adapter.as_ref(), retry.timeout_for_attempt(attempt));
            match with_retry(retry, attempt_call).await {
                Ok((data, attempts)) => {
                    info!(
                        provider = %provider,
                        endpoint = %endpoint,
                        attempts,
                        skipped_or_failed = failures.len(),
                        "provider served request"
                    );
                    return Ok(RouteSuccess {
                        data,
                        source: provider,
                        attempts,
                        source_chain: visited,
                        failures,
                        latency_ms: elapsed_ms(started),
                    });
                }
                Err(RetryFailure { error, attempts }) => {
                    if error.kind() == SourceErrorKind::RateLimited {
                        self.tracker
                            .mark_rate_limited(provider, self.policy(provider).cooldown);
                    }
                    warn!(
                        provider = %provider,
                        endpoint = %endpoint,
                        code = error.code(),
                        attempts,
                        error = %error,
                        "provider failed, falling back"
                    );
                    failures.push(ProviderFailure::from_source_error(provider, &error, attempts));
                }
            }
        }

        Err(MarketDataError::AllProvidersFailed { failures })
    }
}

impl std::fmt::Debug for SourceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRouter")
            .field("adapters", &self.registered())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
