use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::{
    acquire_quota, ensure_covered, fetch_body, history_window, parse_json, volume_from_f64,
};
use crate::clock::{Clock, SystemClock};
use crate::data_source::{
    Coverage, DataSource, Endpoint, QuoteRequest, SeriesRequest, SourceError, SourceFuture,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::QuotaGate;
use crate::{Bar, BarSeries, Interval, MarketClass, ProviderId, Quote, Symbol, UtcDateTime};

const BASE_URL: &str = "https://api.polygon.io";

const COVERAGE: Coverage = Coverage::uniform(&[MarketClass::Equity, MarketClass::Index]);

/// Polygon.io aggregates adapter. Quotes come from the previous-day
/// aggregate, so this source sits in the end-of-day tier.
#[derive(Clone)]
pub struct PolygonAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    clock: Arc<dyn Clock>,
    throttling: QuotaGate,
    base_url: String,
}

impl PolygonAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            auth: HttpAuth::BearerToken(api_key.into()),
            clock: Arc::new(SystemClock),
            throttling: QuotaGate::from_policy(&ProviderPolicy::polygon_default()),
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: &ProviderPolicy) -> Self {
        self.throttling = QuotaGate::from_policy(policy);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_aggregates(
        &self,
        path_and_query: String,
        timeout: Duration,
    ) -> Result<Vec<PolygonAggregate>, SourceError> {
        acquire_quota(ProviderId::Polygon, &self.throttling)?;
        let request = HttpRequest::get(format!("{}{}", self.base_url, path_and_query))
            .with_auth(&self.auth)
            .with_timeout(timeout);
        let body = fetch_body(ProviderId::Polygon, self.http_client.as_ref(), request).await?;
        let payload: PolygonAggregatesResponse = parse_json(ProviderId::Polygon, &body)?;

        match payload.status.as_str() {
            "OK" | "DELAYED" => Ok(payload.results.unwrap_or_default()),
            "NOT_AUTHORIZED" => Err(SourceError::unauthenticated(
                payload
                    .error
                    .or(payload.message)
                    .unwrap_or_else(|| String::from("polygon: not authorized")),
            )),
            other => Err(SourceError::upstream(format!(
                "polygon returned status '{other}': {}",
                payload.error.or(payload.message).unwrap_or_default()
            ))),
        }
    }

    async fn fetch_quote(&self, req: &QuoteRequest) -> Result<Quote, SourceError> {
        let ticker = polygon_ticker(&req.symbol, req.market);
        let path = format!("/v2/aggs/ticker/{}/prev?adjusted=true", urlencoding::encode(&ticker));
        let aggregates = self.fetch_aggregates(path, req.timeout).await?;
        let Some(bar) = aggregates.into_iter().last() else {
            return Err(SourceError::not_found(format!("polygon has no data for {ticker}")));
        };

        // The previous-day aggregate carries no prior close; change is measured
        // over the session (open to close).
        let change = bar.close - bar.open;
        let change_percent = if bar.open > 0.0 { change / bar.open * 100.0 } else { 0.0 };

        Quote::new(
            req.symbol.clone(),
            req.market,
            bar.close,
            ProviderId::Polygon,
            UtcDateTime::from_unix_millis(bar.timestamp_ms)?,
        )?
        .with_session(Some(bar.open), Some(bar.high), Some(bar.low))?
        .with_volume(bar.volume.map_or(0, volume_from_f64))
        .with_change(change, change_percent)
        .map_err(SourceError::from)
    }

    async fn fetch_daily(&self, req: &SeriesRequest) -> Result<BarSeries, SourceError> {
        let ticker = polygon_ticker(&req.symbol, req.market);
        let (start, end) = history_window(self.clock.now(), req.range_days);
        let path = format!(
            "/v2/aggs/ticker/{}/range/1/day/{}/{}?adjusted=true&sort=asc&limit=50000",
            urlencoding::encode(&ticker),
            start.format_date(),
            end.format_date()
        );
        let aggregates = self.fetch_aggregates(path, req.timeout).await?;

        if aggregates.is_empty() {
            return Err(SourceError::not_found(format!(
                "polygon returned no daily aggregates for {ticker}"
            )));
        }

        let bars = aggregates
            .into_iter()
            .map(|aggregate| {
                Bar::new(
                    UtcDateTime::from_unix_millis(aggregate.timestamp_ms)?.start_of_day(),
                    aggregate.open,
                    aggregate.high,
                    aggregate.low,
                    aggregate.close,
                    aggregate.volume.map_or(0, volume_from_f64),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BarSeries::from_unsorted(req.symbol.clone(), Interval::Daily, bars))
    }
}

impl DataSource for PolygonAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Polygon
    }

    fn coverage(&self) -> Coverage {
        COVERAGE
    }

    fn quote<'a>(&'a self, req: QuoteRequest) -> SourceFuture<'a, Quote> {
        Box::pin(async move {
            ensure_covered(ProviderId::Polygon, COVERAGE, Endpoint::Quote, req.market)?;
            self.fetch_quote(&req).await
        })
    }

    fn daily_series<'a>(&'a self, req: SeriesRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            ensure_covered(ProviderId::Polygon, COVERAGE, Endpoint::DailySeries, req.market)?;
            self.fetch_daily(&req).await
        })
    }
}

/// Index tickers use the `I:` namespace (`^SPX` -> `I:SPX`).
fn polygon_ticker(symbol: &Symbol, market: MarketClass) -> String {
    let raw = symbol.as_str();
    match market {
        MarketClass::Index if !raw.starts_with("I:") => {
            format!("I:{}", raw.trim_start_matches('^'))
        }
        _ => raw.to_owned(),
    }
}

#[derive(Debug, Deserialize)]
struct PolygonAggregatesResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Option<Vec<PolygonAggregate>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolygonAggregate {
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v", default)]
    volume: Option<f64>,
    #[serde(rename = "t")]
    timestamp_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::RecordingHttpClient;
    use crate::clock::ManualClock;
    use crate::data_source::SourceErrorKind;

    fn adapter(client: Arc<RecordingHttpClient>) -> PolygonAdapter {
        let clock = ManualClock::new(UtcDateTime::parse("2024-03-31T08:00:00Z").expect("ts"));
        PolygonAdapter::new(client, "poly-key").with_clock(Arc::new(clock))
    }

    #[tokio::test]
    async fn previous_day_aggregate_becomes_quote() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"ticker":"AAPL","status":"OK","resultsCount":1,
            "results":[{"T":"AAPL","v":5.2e7,"vw":171.2,"o":170.0,"c":171.7,"h":172.1,"l":169.5,"t":1711656000000,"n":1}]}"#,
        ));
        let quote = adapter(client.clone())
            .quote(QuoteRequest::new(Symbol::parse("AAPL").expect("symbol"), MarketClass::Equity))
            .await
            .expect("quote");

        assert_eq!(quote.price, 171.7);
        assert_eq!(quote.volume, 52_000_000);
        assert_eq!(quote.source, ProviderId::Polygon);

        let requests = client.recorded_requests();
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer poly-key")
        );
        assert!(requests[0].url.contains("/v2/aggs/ticker/AAPL/prev"));
    }

    #[tokio::test]
    async fn index_range_uses_namespaced_ticker_and_dates() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"status":"OK","results":[{"o":5200,"h":5260,"l":5190,"c":5254,"t":1711584000000}]}"#,
        ));
        let series = adapter(client.clone())
            .daily_series(
                SeriesRequest::new(Symbol::parse("^SPX").expect("symbol"), MarketClass::Index, 30)
                    .expect("req"),
            )
            .await
            .expect("series");

        assert_eq!(series.len(), 1);
        assert_eq!(series.bars[0].volume, 0);
        assert!(client.recorded_requests()[0]
            .url
            .contains("/ticker/I%3ASPX/range/1/day/2024-03-01/2024-03-31"));
    }

    #[tokio::test]
    async fn empty_results_are_not_found() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"ticker":"ZZZZ","status":"OK","resultsCount":0}"#,
        ));
        let error = adapter(client)
            .quote(QuoteRequest::new(Symbol::parse("ZZZZ").expect("symbol"), MarketClass::Equity))
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn throttled_response_is_rate_limited() {
        let client = Arc::new(RecordingHttpClient::status(
            429,
            r#"{"status":"ERROR","error":"You've exceeded the maximum requests per minute"}"#,
        ));
        let error = adapter(client)
            .quote(QuoteRequest::new(Symbol::parse("AAPL").expect("symbol"), MarketClass::Equity))
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::RateLimited);
    }
}
