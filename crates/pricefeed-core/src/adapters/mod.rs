//! Provider adapters.
//!
//! Each adapter maps the canonical requests onto one provider's HTTP API and
//! normalizes the JSON it gets back. Shared transport plumbing (status
//! classification, JSON decoding, local quota) lives here so every adapter
//! reports failures with the same [`SourceErrorKind`] semantics.

mod alphavantage;
mod binance;
mod coingecko;
mod finnhub;
mod polygon;
mod yahoo;

pub use alphavantage::AlphaVantageAdapter;
pub use binance::BinanceAdapter;
pub use coingecko::CoinGeckoAdapter;
pub use finnhub::FinnhubAdapter;
pub use polygon::PolygonAdapter;
pub use yahoo::YahooAdapter;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::data_source::{Coverage, Endpoint, SourceError};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::throttling::QuotaGate;
use crate::{MarketClass, ProviderId, UtcDateTime};

/// Reject requests outside the adapter's coverage before any I/O.
fn ensure_covered(
    provider: ProviderId,
    coverage: Coverage,
    endpoint: Endpoint,
    market: MarketClass,
) -> Result<(), SourceError> {
    if coverage.supports(endpoint, market) {
        Ok(())
    } else {
        Err(SourceError::unsupported_market(provider, endpoint, market))
    }
}

fn acquire_quota(provider: ProviderId, quota: &QuotaGate) -> Result<(), SourceError> {
    quota.try_acquire().map_err(|wait| {
        SourceError::rate_limited(format!(
            "{provider} local request quota exhausted; retry in {:.2}s",
            wait.as_secs_f64()
        ))
    })
}

/// Execute a request and map transport failures. The status is not checked.
async fn send(
    provider: ProviderId,
    http_client: &dyn HttpClient,
    request: HttpRequest,
) -> Result<HttpResponse, SourceError> {
    debug!(provider = %provider, "sending provider request");
    http_client.execute(request).await.map_err(|error| {
        if error.timed_out() {
            SourceError::timeout(format!("{provider} request timed out: {}", error.message()))
        } else {
            SourceError::upstream(format!("{provider} transport error: {}", error.message()))
        }
    })
}

/// Classify a non-success HTTP status.
fn check_status(provider: ProviderId, response: &HttpResponse) -> Result<(), SourceError> {
    if response.is_success() {
        return Ok(());
    }

    let status = response.status;
    let detail = snippet(&response.body);
    Err(match status {
        401 | 403 => SourceError::unauthenticated(format!(
            "{provider} rejected credentials (status {status}): {detail}"
        )),
        404 => SourceError::not_found(format!("{provider} returned 404: {detail}")),
        408 => SourceError::timeout(format!("{provider} returned 408")),
        418 | 429 => SourceError::rate_limited(format!(
            "{provider} is throttling requests (status {status})"
        )),
        500..=599 => SourceError::upstream(format!("{provider} returned status {status}")),
        _ => SourceError::invalid_request(format!(
            "{provider} returned status {status}: {detail}"
        )),
    })
}

/// [`send`] followed by [`check_status`], returning the body.
async fn fetch_body(
    provider: ProviderId,
    http_client: &dyn HttpClient,
    request: HttpRequest,
) -> Result<String, SourceError> {
    let response = send(provider, http_client, request).await?;
    check_status(provider, &response)?;
    Ok(response.body)
}

fn parse_json<T: DeserializeOwned>(provider: ProviderId, body: &str) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|error| {
        SourceError::malformed(format!("failed to parse {provider} response: {error}"))
    })
}

/// `[start, end]` of a daily history window ending at `now`.
fn history_window(now: UtcDateTime, range_days: u32) -> (UtcDateTime, UtcDateTime) {
    let start = now.saturating_sub(time::Duration::days(i64::from(range_days)));
    (start.start_of_day(), now)
}

/// Saturating float to volume conversion; providers report volume as floats.
fn volume_from_f64(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round().min(u64::MAX as f64) as u64
    } else {
        0
    }
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(160)
        .map_or(body.len(), |(index, _)| index);
    body[..end].trim()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::http_client::{HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse};

    /// Replays canned responses in order and records every request.
    #[derive(Debug, Default)]
    pub struct RecordingHttpClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        pub fn replying(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn json(body: &str) -> Self {
            Self::replying(vec![Ok(HttpResponse::ok_json(body))])
        }

        pub fn status(status: u16, body: &str) -> Self {
            Self::replying(vec![Ok(HttpResponse::with_status(status, body))])
        }

        pub fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = self
                .responses
                .lock()
                .expect("response queue should not be poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(HttpError::new("no scripted response left")));
            Box::pin(async move { response })
        }
    }
}
