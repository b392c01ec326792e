//! Process-wide provider cool-down state.
//!
//! A provider that signalled throttling is parked until its cool-down
//! expires. Only the router writes here; the CLI reads snapshots.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::{ProviderId, UtcDateTime};

/// Cool-down state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderState {
    pub provider: ProviderId,
    pub rate_limited: bool,
    pub cooldown_until: Option<UtcDateTime>,
}

impl ProviderState {
    fn healthy(provider: ProviderId) -> Self {
        Self {
            provider,
            rate_limited: false,
            cooldown_until: None,
        }
    }
}

/// Tracks which providers are cooling down after a throttle signal.
#[derive(Debug)]
pub struct RateLimitTracker {
    states: Mutex<BTreeMap<ProviderId, ProviderState>>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RateLimitTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Seed a healthy state for every configured provider.
    pub fn with_providers(
        clock: Arc<dyn Clock>,
        providers: impl IntoIterator<Item = ProviderId>,
    ) -> Self {
        let tracker = Self::new(clock);
        {
            let mut states = tracker.lock_states();
            for provider in providers {
                states.insert(provider, ProviderState::healthy(provider));
            }
        }
        tracker
    }

    fn lock_states(&self) -> MutexGuard<'_, BTreeMap<ProviderId, ProviderState>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.states.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// True unless a cool-down is active. An expired cool-down is cleared.
    pub fn is_available(&self, provider: ProviderId) -> bool {
        let now = self.clock.now();
        let mut states = self.lock_states();
        let Some(state) = states.get_mut(&provider) else {
            return true;
        };

        match state.cooldown_until {
            Some(until) if now < until => false,
            Some(_) => {
                debug!(provider = %provider, "cool-down expired");
                *state = ProviderState::healthy(provider);
                true
            }
            None => true,
        }
    }

    /// Park `provider` until `now + cooldown`.
    pub fn mark_rate_limited(&self, provider: ProviderId, cooldown: Duration) {
        let now = self.clock.now();
        let step = time::Duration::try_from(cooldown).unwrap_or(time::Duration::MAX);
        let until = now.checked_add(step);

        info!(
            provider = %provider,
            cooldown_secs = cooldown.as_secs(),
            "provider rate limited, cooling down"
        );

        self.lock_states().insert(
            provider,
            ProviderState {
                provider,
                rate_limited: true,
                cooldown_until: until,
            },
        );
    }

    pub fn mark_healthy(&self, provider: ProviderId) {
        self.lock_states()
            .insert(provider, ProviderState::healthy(provider));
    }

    /// Current state with the same read-and-expire rule as [`Self::is_available`].
    pub fn snapshot(&self, provider: ProviderId) -> ProviderState {
        let _ = self.is_available(provider);
        self.lock_states()
            .get(&provider)
            .copied()
            .unwrap_or_else(|| ProviderState::healthy(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (RateLimitTracker, ManualClock) {
        let clock = ManualClock::new(UtcDateTime::parse("2024-01-01T00:00:00Z").expect("ts"));
        let tracker = RateLimitTracker::with_providers(Arc::new(clock.clone()), ProviderId::ALL);
        (tracker, clock)
    }

    #[test]
    fn unknown_and_fresh_providers_are_available() {
        let (tracker, _) = tracker();
        assert!(tracker.is_available(ProviderId::Yahoo));
        assert!(RateLimitTracker::default().is_available(ProviderId::Binance));
    }

    #[test]
    fn cooldown_blocks_until_expiry() {
        let (tracker, clock) = tracker();
        tracker.mark_rate_limited(ProviderId::Finnhub, Duration::from_secs(300));
        assert!(!tracker.is_available(ProviderId::Finnhub));

        clock.advance(Duration::from_secs(299));
        assert!(!tracker.is_available(ProviderId::Finnhub));

        clock.advance(Duration::from_secs(2));
        assert!(tracker.is_available(ProviderId::Finnhub));
        assert!(!tracker.snapshot(ProviderId::Finnhub).rate_limited);
    }

    #[test]
    fn mark_healthy_clears_cooldown() {
        let (tracker, _) = tracker();
        tracker.mark_rate_limited(ProviderId::Polygon, Duration::from_secs(600));
        assert!(tracker.snapshot(ProviderId::Polygon).rate_limited);

        tracker.mark_healthy(ProviderId::Polygon);
        assert!(tracker.is_available(ProviderId::Polygon));
    }
}
