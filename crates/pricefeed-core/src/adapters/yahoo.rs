use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::{acquire_quota, ensure_covered, fetch_body, history_window, parse_json};
use crate::clock::{Clock, SystemClock};
use crate::data_source::{
    Coverage, DataSource, Endpoint, QuoteRequest, SeriesRequest, SourceError, SourceFuture,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::QuotaGate;
use crate::{Bar, BarSeries, Interval, MarketClass, ProviderId, Quote, Symbol, UtcDateTime};

const BASE_URL: &str = "https://query1.finance.yahoo.com";

const COVERAGE: Coverage = Coverage::uniform(&[
    MarketClass::Equity,
    MarketClass::Index,
    MarketClass::Crypto,
    MarketClass::Forex,
]);

/// Yahoo Finance chart API. Keyless; the broadest coverage of all sources.
#[derive(Clone)]
pub struct YahooAdapter {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    throttling: QuotaGate,
    base_url: String,
}

impl YahooAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            clock: Arc::new(SystemClock),
            throttling: QuotaGate::from_policy(&ProviderPolicy::yahoo_default()),
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

    async fn fetch_chart(
        &self,
        symbol: &Symbol,
        market: MarketClass,
        query: &str,
        timeout: Duration,
    ) -> Result<YahooChartResult, SourceError> {
        acquire_quota(ProviderId::Yahoo, &self.throttling)?;

        let endpoint = format!(
            "{}/v8/finance/chart/{}?{}",
            self.base_url,
            urlencoding::encode(&yahoo_symbol(symbol, market)),
            query
        );
        let request = HttpRequest::get(endpoint)
            .with_header("accept", "application/json")
            .with_timeout(timeout);
        let body = fetch_body(ProviderId::Yahoo, self.http_client.as_ref(), request).await?;
        let response: YahooChartResponse = parse_json(ProviderId::Yahoo, &body)?;

        if let Some(error) = response.chart.error {
            let message = format!("yahoo chart error {}: {}", error.code, error.description);
            return Err(if error.code.eq_ignore_ascii_case("Not Found") {
                SourceError::not_found(message)
            } else {
                SourceError::upstream(message)
            });
        }

        response
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| SourceError::not_found(format!("yahoo has no chart data for {symbol}")))
    }

    async fn fetch_quote(&self, req: &QuoteRequest) -> Result<Quote, SourceError> {
        let chart = self
            .fetch_chart(&req.symbol, req.market, "range=5d&interval=1d", req.timeout)
            .await?;
        let meta = &chart.meta;

        let price = meta
            .regular_market_price
            .ok_or_else(|| SourceError::malformed("yahoo chart meta lacks regularMarketPrice"))?;
        let as_of = match meta.regular_market_time {
            Some(seconds) => UtcDateTime::from_unix_timestamp(seconds)?,
            None => self.clock.now(),
        };

        let last_session = chart.rows().last().copied();
        let open = meta
            .regular_market_open
            .or_else(|| last_session.and_then(|row| row.open));
        let volume = meta
            .regular_market_volume
            .or_else(|| last_session.and_then(|row| row.volume))
            .unwrap_or(0);

        let mut quote = Quote::new(req.symbol.clone(), req.market, price, ProviderId::Yahoo, as_of)?
            .with_session(open, meta.regular_market_day_high, meta.regular_market_day_low)?
            .with_volume(volume);
        if let Some(previous_close) = meta.chart_previous_close.or(meta.previous_close) {
            quote = quote.with_previous_close(previous_close);
        }
        Ok(quote)
    }

    async fn fetch_daily(&self, req: &SeriesRequest) -> Result<BarSeries, SourceError> {
        let (start, end) = history_window(self.clock.now(), req.range_days);
        let query = format!(
            "period1={}&period2={}&interval=1d&events=history",
            start.unix_timestamp(),
            end.unix_timestamp()
        );
        let chart = self
            .fetch_chart(&req.symbol, req.market, &query, req.timeout)
            .await?;

        let mut bars = Vec::new();
        for row in chart.rows() {
            // Holidays and halted sessions come back as null rows.
            let (Some(open), Some(high), Some(low), Some(close)) =
                (row.open, row.high, row.low, row.close)
            else {
                continue;
            };
            let ts = UtcDateTime::from_unix_timestamp(row.timestamp)?.start_of_day();
            bars.push(Bar::new(ts, open, high, low, close, row.volume.unwrap_or(0))?);
        }

        if bars.is_empty() {
            return Err(SourceError::not_found(format!(
                "yahoo returned no daily bars for {}",
                req.symbol
            )));
        }

        Ok(BarSeries::from_unsorted(req.symbol.clone(), Interval::Daily, bars))
    }
}

impl DataSource for YahooAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn coverage(&self) -> Coverage {
        COVERAGE
    }

    fn quote<'a>(&'a self, req: QuoteRequest) -> SourceFuture<'a, Quote> {
        Box::pin(async move {
            ensure_covered(ProviderId::Yahoo, COVERAGE, Endpoint::Quote, req.market)?;
            self.fetch_quote(&req).await
        })
    }

    fn daily_series<'a>(&'a self, req: SeriesRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            ensure_covered(ProviderId::Yahoo, COVERAGE, Endpoint::DailySeries, req.market)?;
            self.fetch_daily(&req).await
        })
    }
}

/// Yahoo spelling of a symbol: crypto pairs quote against USD with a dash,
/// forex pairs carry the `=X` suffix.
fn yahoo_symbol(symbol: &Symbol, market: MarketClass) -> String {
    match market {
        MarketClass::Crypto => format!("{}-USD", symbol.crypto_base()),
        MarketClass::Forex if !symbol.as_str().ends_with("=X") => {
            format!("{}=X", symbol.as_str().replace(['/', '-'], ""))
        }
        _ => symbol.as_str().to_owned(),
    }
}

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChartData,
}

#[derive(Debug, Deserialize)]
struct YahooChartData {
    #[serde(default)]
    result: Option<Vec<YahooChartResult>>,
    #[serde(default)]
    error: Option<YahooChartError>,
}

#[derive(Debug, Deserialize)]
struct YahooChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooChartResult {
    meta: YahooMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooChartIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooMeta {
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
    regular_market_open: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_volume: Option<u64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YahooChartIndicators {
    #[serde(default)]
    quote: Vec<YahooChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct YahooChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Clone, Copy)]
struct ChartRow {
    timestamp: i64,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<u64>,
}

impl YahooChartResult {
    /// Zip the column-oriented indicator arrays into rows.
    fn rows(&self) -> Vec<ChartRow> {
        let Some(quote) = self.indicators.quote.first() else {
            return Vec::new();
        };
        let column = |values: &[Option<f64>], index: usize| values.get(index).copied().flatten();

        self.timestamp
            .iter()
            .enumerate()
            .map(|(index, &timestamp)| ChartRow {
                timestamp,
                open: column(&quote.open, index),
                high: column(&quote.high, index),
                low: column(&quote.low, index),
                close: column(&quote.close, index),
                volume: quote.volume.get(index).copied().flatten(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::RecordingHttpClient;
    use crate::clock::ManualClock;
    use crate::data_source::SourceErrorKind;

    const CHART: &str = r#"{"chart":{"result":[{"meta":{"currency":"USD","symbol":"AAPL",
        "regularMarketPrice":185.5,"regularMarketTime":1704488400,
        "regularMarketDayHigh":186.4,"regularMarketDayLow":183.9,"regularMarketVolume":6200000,
        "chartPreviousClose":181.0},
        "timestamp":[1704292200,1704378600,1704465000,1704551400],
        "indicators":{"quote":[{"open":[184.2,182.1,null,181.9],"high":[185.9,183.1,null,186.4],
        "low":[183.4,180.9,null,181.5],"close":[184.3,181.2,null,185.5],
        "volume":[58414500,71983600,null,6200000]}]}}],"error":null}}"#;

    fn adapter(client: Arc<RecordingHttpClient>) -> YahooAdapter {
        let clock = ManualClock::new(UtcDateTime::parse("2024-01-06T12:00:00Z").expect("ts"));
        YahooAdapter::new(client).with_clock(Arc::new(clock))
    }

    fn symbol(value: &str) -> Symbol {
        Symbol::parse(value).expect("symbol")
    }

    #[tokio::test]
    async fn normalizes_chart_meta_into_quote() {
        let client = Arc::new(RecordingHttpClient::json(CHART));
        let quote = adapter(client.clone())
            .quote(QuoteRequest::new(symbol("AAPL"), MarketClass::Equity))
            .await
            .expect("quote");

        assert_eq!(quote.price, 185.5);
        assert_eq!(quote.source, ProviderId::Yahoo);
        assert_eq!(quote.open, Some(181.9));
        assert_eq!(quote.volume, 6_200_000);
        assert!((quote.change - 4.5).abs() < 1e-9);

        let requests = client.recorded_requests();
        assert!(requests[0].url.contains("/v8/finance/chart/AAPL?range=5d"));
    }

    #[tokio::test]
    async fn daily_series_skips_null_rows_and_aligns_to_midnight() {
        let client = Arc::new(RecordingHttpClient::json(CHART));
        let series = adapter(client.clone())
            .daily_series(SeriesRequest::new(symbol("AAPL"), MarketClass::Equity, 5).expect("req"))
            .await
            .expect("series");

        assert_eq!(series.len(), 3);
        assert_eq!(series.bars[0].ts.format_rfc3339(), "2024-01-03T00:00:00Z");
        assert_eq!(series.interval, Interval::Daily);
        assert!(client.recorded_requests()[0].url.contains("period1=1704067200"));
    }

    #[tokio::test]
    async fn maps_crypto_and_forex_symbols() {
        let client = Arc::new(RecordingHttpClient::replying(vec![
            Ok(crate::http_client::HttpResponse::ok_json(CHART)),
            Ok(crate::http_client::HttpResponse::ok_json(CHART)),
        ]));
        let adapter = adapter(client.clone());

        adapter
            .quote(QuoteRequest::new(symbol("BTCUSDT"), MarketClass::Crypto))
            .await
            .expect("crypto");
        adapter
            .quote(QuoteRequest::new(symbol("EURUSD"), MarketClass::Forex))
            .await
            .expect("forex");

        let requests = client.recorded_requests();
        assert!(requests[0].url.contains("/chart/BTC-USD?"));
        assert!(requests[1].url.contains("/chart/EURUSD%3DX?"));
    }

    #[tokio::test]
    async fn unknown_symbol_is_not_found() {
        let client = Arc::new(RecordingHttpClient::status(
            404,
            r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#,
        ));
        let error = adapter(client)
            .quote(QuoteRequest::new(symbol("NOPE"), MarketClass::Equity))
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn missing_price_is_malformed() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"chart":{"result":[{"meta":{},"indicators":{"quote":[]}}],"error":null}}"#,
        ));
        let error = adapter(client)
            .quote(QuoteRequest::new(symbol("AAPL"), MarketClass::Equity))
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::Malformed);
    }
}
