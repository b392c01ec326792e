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
use crate::{Bar, BarSeries, Interval, MarketClass, ProviderId, Quote, UtcDateTime};

const BASE_URL: &str = "https://finnhub.io/api/v1";

const COVERAGE: Coverage = Coverage::uniform(&[MarketClass::Equity]);

/// Finnhub REST adapter (equities only). Authenticates with the
/// `X-Finnhub-Token` header.
#[derive(Clone)]
pub struct FinnhubAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    clock: Arc<dyn Clock>,
    throttling: QuotaGate,
    base_url: String,
}

impl FinnhubAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            auth: HttpAuth::Header {
                name: String::from("X-Finnhub-Token"),
                value: api_key.into(),
            },
            clock: Arc::new(SystemClock),
            throttling: QuotaGate::from_policy(&ProviderPolicy::finnhub_default()),
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

    async fn get(&self, path_and_query: String, timeout: Duration) -> Result<String, SourceError> {
        acquire_quota(ProviderId::Finnhub, &self.throttling)?;
        let request = HttpRequest::get(format!("{}{}", self.base_url, path_and_query))
            .with_auth(&self.auth)
            .with_timeout(timeout);
        let body = fetch_body(ProviderId::Finnhub, self.http_client.as_ref(), request).await?;

        // Errors can also arrive in a 200 body.
        if let Ok(FinnhubError {
            error: Some(message),
        }) = serde_json::from_str::<FinnhubError>(&body)
        {
            let lowered = message.to_ascii_lowercase();
            return Err(if lowered.contains("api key") || lowered.contains("access") {
                SourceError::unauthenticated(format!("finnhub: {message}"))
            } else if lowered.contains("limit") {
                SourceError::rate_limited(format!("finnhub: {message}"))
            } else {
                SourceError::upstream(format!("finnhub: {message}"))
            });
        }
        Ok(body)
    }

    async fn fetch_quote(&self, req: &QuoteRequest) -> Result<Quote, SourceError> {
        let path = format!("/quote?symbol={}", urlencoding::encode(req.symbol.as_str()));
        let body = self.get(path, req.timeout).await?;
        let payload: FinnhubQuote = parse_json(ProviderId::Finnhub, &body)?;

        // Finnhub answers unknown symbols with an all-zero quote.
        if payload.current <= 0.0 {
            return Err(SourceError::not_found(format!(
                "finnhub has no quote for {}",
                req.symbol
            )));
        }

        let as_of = match payload.timestamp {
            Some(seconds) if seconds > 0 => UtcDateTime::from_unix_timestamp(seconds)?,
            _ => self.clock.now(),
        };

        let quote = Quote::new(
            req.symbol.clone(),
            req.market,
            payload.current,
            ProviderId::Finnhub,
            as_of,
        )?
        .with_session(payload.open, payload.high, payload.low)?;
        match (payload.change, payload.change_percent) {
            (Some(change), Some(percent)) => Ok(quote.with_change(change, percent)?),
            _ => Ok(quote.with_previous_close(payload.previous_close.unwrap_or(0.0))),
        }
    }

    async fn fetch_daily(&self, req: &SeriesRequest) -> Result<BarSeries, SourceError> {
        let (start, end) = history_window(self.clock.now(), req.range_days);
        let path = format!(
            "/stock/candle?symbol={}&resolution=D&from={}&to={}",
            urlencoding::encode(req.symbol.as_str()),
            start.unix_timestamp(),
            end.unix_timestamp()
        );
        let body = self.get(path, req.timeout).await?;
        let payload: FinnhubCandles = parse_json(ProviderId::Finnhub, &body)?;

        if payload.status != "ok" {
            return Err(SourceError::not_found(format!(
                "finnhub returned status '{}' for {} candles",
                payload.status, req.symbol
            )));
        }

        let columns = [
            payload.open.len(),
            payload.high.len(),
            payload.low.len(),
            payload.close.len(),
        ];
        if columns.iter().any(|len| *len != payload.timestamp.len()) {
            return Err(SourceError::malformed("finnhub candle columns differ in length"));
        }

        let mut bars = Vec::with_capacity(payload.timestamp.len());
        for (index, &seconds) in payload.timestamp.iter().enumerate() {
            let volume = payload.volume.get(index).copied().map_or(0, volume_from_f64);
            bars.push(Bar::new(
                UtcDateTime::from_unix_timestamp(seconds)?.start_of_day(),
                payload.open[index],
                payload.high[index],
                payload.low[index],
                payload.close[index],
                volume,
            )?);
        }

        Ok(BarSeries::from_unsorted(req.symbol.clone(), Interval::Daily, bars))
    }
}

impl DataSource for FinnhubAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Finnhub
    }

    fn coverage(&self) -> Coverage {
        COVERAGE
    }

    fn quote<'a>(&'a self, req: QuoteRequest) -> SourceFuture<'a, Quote> {
        Box::pin(async move {
            ensure_covered(ProviderId::Finnhub, COVERAGE, Endpoint::Quote, req.market)?;
            self.fetch_quote(&req).await
        })
    }

    fn daily_series<'a>(&'a self, req: SeriesRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            ensure_covered(ProviderId::Finnhub, COVERAGE, Endpoint::DailySeries, req.market)?;
            self.fetch_daily(&req).await
        })
    }
}

#[derive(Debug, Deserialize)]
struct FinnhubError {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    #[serde(rename = "c")]
    current: f64,
    #[serde(rename = "d", default)]
    change: Option<f64>,
    #[serde(rename = "dp", default)]
    change_percent: Option<f64>,
    #[serde(rename = "h", default)]
    high: Option<f64>,
    #[serde(rename = "l", default)]
    low: Option<f64>,
    #[serde(rename = "o", default)]
    open: Option<f64>,
    #[serde(rename = "pc", default)]
    previous_close: Option<f64>,
    #[serde(rename = "t", default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FinnhubCandles {
    #[serde(rename = "s")]
    status: String,
    #[serde(rename = "t", default)]
    timestamp: Vec<i64>,
    #[serde(rename = "o", default)]
    open: Vec<f64>,
    #[serde(rename = "h", default)]
    high: Vec<f64>,
    #[serde(rename = "l", default)]
    low: Vec<f64>,
    #[serde(rename = "c", default)]
    close: Vec<f64>,
    #[serde(rename = "v", default)]
    volume: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::RecordingHttpClient;
    use crate::data_source::SourceErrorKind;
    use crate::Symbol;

    fn adapter(client: Arc<RecordingHttpClient>) -> FinnhubAdapter {
        FinnhubAdapter::new(client, "finnhub-key")
    }

    fn request() -> QuoteRequest {
        QuoteRequest::new(Symbol::parse("AAPL").expect("symbol"), MarketClass::Equity)
    }

    #[tokio::test]
    async fn quote_sends_token_header_and_normalizes_payload() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"c":185.5,"d":1.5,"dp":0.8152,"h":186.4,"l":183.9,"o":184.0,"pc":184.0,"t":1704488400}"#,
        ));
        let quote = adapter(client.clone()).quote(request()).await.expect("quote");

        assert_eq!(quote.price, 185.5);
        assert_eq!(quote.change_percent, 0.8152);
        assert_eq!(quote.source, ProviderId::Finnhub);
        assert_eq!(quote.as_of.format_rfc3339(), "2024-01-05T21:00:00Z");

        let requests = client.recorded_requests();
        assert_eq!(
            requests[0].headers.get("x-finnhub-token").map(String::as_str),
            Some("finnhub-key")
        );
        assert!(requests[0].url.ends_with("/quote?symbol=AAPL"));
    }

    #[tokio::test]
    async fn all_zero_quote_is_not_found() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"c":0,"d":null,"dp":null,"h":0,"l":0,"o":0,"pc":0,"t":0}"#,
        ));
        let error = adapter(client).quote(request()).await.expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn invalid_key_is_unauthenticated() {
        let client = Arc::new(RecordingHttpClient::status(401, r#"{"error":"Invalid API key"}"#));
        let error = adapter(client).quote(request()).await.expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn rejects_crypto_requests_without_io() {
        let client = Arc::new(RecordingHttpClient::default());
        let error = adapter(client.clone())
            .quote(QuoteRequest::new(Symbol::parse("BTC").expect("symbol"), MarketClass::Crypto))
            .await
            .expect_err("must fail");

        assert_eq!(error.kind(), SourceErrorKind::UnsupportedMarket);
        assert!(client.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn candles_become_daily_bars() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"s":"ok","t":[1704240000,1704326400],"o":[10,11],"h":[12,13],"l":[9,10],"c":[11,12],"v":[100,200]}"#,
        ));
        let series = adapter(client)
            .daily_series(
                SeriesRequest::new(Symbol::parse("AAPL").expect("symbol"), MarketClass::Equity, 30)
                    .expect("req"),
            )
            .await
            .expect("series");

        assert_eq!(series.len(), 2);
        assert_eq!(series.bars[1].volume, 200);
    }

    #[tokio::test]
    async fn no_data_candles_are_not_found() {
        let client = Arc::new(RecordingHttpClient::json(r#"{"s":"no_data"}"#));
        let error = adapter(client)
            .daily_series(
                SeriesRequest::new(Symbol::parse("AAPL").expect("symbol"), MarketClass::Equity, 30)
                    .expect("req"),
            )
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::NotFound);
    }
}
