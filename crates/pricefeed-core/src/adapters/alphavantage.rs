use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use super::{acquire_quota, ensure_covered, fetch_body, parse_json};
use crate::clock::{Clock, SystemClock};
use crate::data_source::{
    Coverage, DataSource, Endpoint, QuoteRequest, SeriesRequest, SourceError, SourceFuture,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::QuotaGate;
use crate::{Bar, BarSeries, Interval, MarketClass, ProviderId, Quote, UtcDateTime};

const BASE_URL: &str = "https://www.alphavantage.co";

const COVERAGE: Coverage = Coverage::uniform(&[MarketClass::Equity]);

/// Compact responses hold roughly the last 100 sessions.
const COMPACT_MAX_DAYS: u32 = 100;

/// Alpha Vantage adapter (equities). The API key travels as the `apikey`
/// query parameter, and throttling is reported inside 200 responses.
#[derive(Clone)]
pub struct AlphaVantageAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    clock: Arc<dyn Clock>,
    throttling: QuotaGate,
    base_url: String,
}

impl AlphaVantageAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            auth: HttpAuth::QueryParam {
                name: String::from("apikey"),
                value: api_key.into(),
            },
            clock: Arc::new(SystemClock),
            throttling: QuotaGate::from_policy(&ProviderPolicy::alphavantage_default()),
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

    async fn query(&self, params: &str, timeout: Duration) -> Result<String, SourceError> {
        acquire_quota(ProviderId::Alphavantage, &self.throttling)?;
        let request = HttpRequest::get(format!("{}/query?{}", self.base_url, params))
            .with_auth(&self.auth)
            .with_timeout(timeout);
        let body = fetch_body(ProviderId::Alphavantage, self.http_client.as_ref(), request).await?;

        let notice: AlphaVantageNotice = parse_json(ProviderId::Alphavantage, &body)?;
        notice.check()?;
        Ok(body)
    }

    async fn fetch_quote(&self, req: &QuoteRequest) -> Result<Quote, SourceError> {
        let params = format!(
            "function=GLOBAL_QUOTE&symbol={}",
            urlencoding::encode(req.symbol.as_str())
        );
        let body = self.query(&params, req.timeout).await?;
        let payload: AlphaVantageQuoteResponse = parse_json(ProviderId::Alphavantage, &body)?;

        let Some(data) = payload.quote.filter(|data| data.price.is_some()) else {
            return Err(SourceError::not_found(format!(
                "alphavantage has no quote for {}",
                req.symbol
            )));
        };

        let price = parse_number("05. price", data.price.as_deref())?;
        let as_of = match data.latest_trading_day.as_deref() {
            Some(day) => UtcDateTime::parse_date(day)?,
            None => self.clock.now(),
        };

        let volume = parse_optional(data.volume.as_deref()).map_or(0, |v| v.max(0.0) as u64);
        let quote = Quote::new(
            req.symbol.clone(),
            req.market,
            price,
            ProviderId::Alphavantage,
            as_of,
        )?
        .with_session(
            parse_optional(data.open.as_deref()),
            parse_optional(data.high.as_deref()),
            parse_optional(data.low.as_deref()),
        )?
        .with_volume(volume);

        let change = parse_optional(data.change.as_deref());
        let percent = data
            .change_percent
            .as_deref()
            .and_then(|value| parse_optional(Some(value.trim_end_matches('%'))));
        match (change, percent) {
            (Some(change), Some(percent)) => Ok(quote.with_change(change, percent)?),
            _ => Ok(quote.with_previous_close(
                parse_optional(data.previous_close.as_deref()).unwrap_or(0.0),
            )),
        }
    }

    async fn fetch_daily(&self, req: &SeriesRequest) -> Result<BarSeries, SourceError> {
        let output_size = if req.range_days > COMPACT_MAX_DAYS { "full" } else { "compact" };
        let params = format!(
            "function=TIME_SERIES_DAILY&symbol={}&outputsize={output_size}",
            urlencoding::encode(req.symbol.as_str())
        );
        let body = self.query(&params, req.timeout).await?;
        let payload: AlphaVantageDailyResponse = parse_json(ProviderId::Alphavantage, &body)?;

        let Some(series) = payload.series.filter(|series| !series.is_empty()) else {
            return Err(SourceError::not_found(format!(
                "alphavantage returned no daily series for {}",
                req.symbol
            )));
        };

        let cutoff = self
            .clock
            .now()
            .saturating_sub(time::Duration::days(i64::from(req.range_days)))
            .start_of_day();

        let mut bars = Vec::new();
        for (day, row) in series {
            let ts = UtcDateTime::parse_date(&day)?;
            if ts < cutoff {
                continue;
            }
            bars.push(Bar::new(
                ts,
                parse_number("1. open", Some(&row.open))?,
                parse_number("2. high", Some(&row.high))?,
                parse_number("3. low", Some(&row.low))?,
                parse_number("4. close", Some(&row.close))?,
                parse_optional(Some(&row.volume)).map_or(0, |v| v.max(0.0) as u64),
            )?);
        }

        if bars.is_empty() {
            return Err(SourceError::not_found(format!(
                "alphavantage has no daily bars for {} in the last {} days",
                req.symbol, req.range_days
            )));
        }

        Ok(BarSeries::from_unsorted(req.symbol.clone(), Interval::Daily, bars))
    }
}

impl DataSource for AlphaVantageAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Alphavantage
    }

    fn coverage(&self) -> Coverage {
        COVERAGE
    }

    fn quote<'a>(&'a self, req: QuoteRequest) -> SourceFuture<'a, Quote> {
        Box::pin(async move {
            ensure_covered(ProviderId::Alphavantage, COVERAGE, Endpoint::Quote, req.market)?;
            self.fetch_quote(&req).await
        })
    }

    fn daily_series<'a>(&'a self, req: SeriesRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            ensure_covered(ProviderId::Alphavantage, COVERAGE, Endpoint::DailySeries, req.market)?;
            self.fetch_daily(&req).await
        })
    }
}

fn parse_optional(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|number| number.is_finite())
}

fn parse_number(field: &str, value: Option<&str>) -> Result<f64, SourceError> {
    parse_optional(value).ok_or_else(|| {
        SourceError::malformed(format!("alphavantage field '{field}' is not a number"))
    })
}

/// Top-level informational keys Alpha Vantage uses instead of HTTP statuses.
#[derive(Debug, Deserialize)]
struct AlphaVantageNotice {
    #[serde(rename = "Error Message", default)]
    error_message: Option<String>,
    #[serde(rename = "Note", default)]
    note: Option<String>,
    #[serde(rename = "Information", default)]
    information: Option<String>,
}

impl AlphaVantageNotice {
    fn check(self) -> Result<(), SourceError> {
        if let Some(message) = self.error_message {
            return Err(if message.to_ascii_lowercase().contains("apikey") {
                SourceError::unauthenticated(format!("alphavantage: {message}"))
            } else {
                SourceError::not_found(format!("alphavantage: {message}"))
            });
        }

        for message in [self.note, self.information].into_iter().flatten() {
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("call frequency") || lowered.contains("rate limit") {
                return Err(SourceError::rate_limited(format!("alphavantage: {message}")));
            }
            if lowered.contains("api key") || lowered.contains("apikey") {
                return Err(SourceError::unauthenticated(format!("alphavantage: {message}")));
            }
            warn!(provider = %ProviderId::Alphavantage, notice = %message, "provider notice");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AlphaVantageQuoteResponse {
    #[serde(rename = "Global Quote", default)]
    quote: Option<AlphaVantageQuoteData>,
}

#[derive(Debug, Deserialize)]
struct AlphaVantageQuoteData {
    #[serde(rename = "02. open", default)]
    open: Option<String>,
    #[serde(rename = "03. high", default)]
    high: Option<String>,
    #[serde(rename = "04. low", default)]
    low: Option<String>,
    #[serde(rename = "05. price", default)]
    price: Option<String>,
    #[serde(rename = "06. volume", default)]
    volume: Option<String>,
    #[serde(rename = "07. latest trading day", default)]
    latest_trading_day: Option<String>,
    #[serde(rename = "08. previous close", default)]
    previous_close: Option<String>,
    #[serde(rename = "09. change", default)]
    change: Option<String>,
    #[serde(rename = "10. change percent", default)]
    change_percent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlphaVantageDailyResponse {
    #[serde(rename = "Time Series (Daily)", default)]
    series: Option<BTreeMap<String, AlphaVantageDailyRow>>,
}

#[derive(Debug, Deserialize)]
struct AlphaVantageDailyRow {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume", default)]
    volume: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::RecordingHttpClient;
    use crate::clock::ManualClock;
    use crate::data_source::SourceErrorKind;
    use crate::Symbol;

    fn adapter(client: Arc<RecordingHttpClient>) -> AlphaVantageAdapter {
        let clock = ManualClock::new(UtcDateTime::parse("2024-01-06T12:00:00Z").expect("ts"));
        AlphaVantageAdapter::new(client, "alpha-key").with_clock(Arc::new(clock))
    }

    fn quote_request() -> QuoteRequest {
        QuoteRequest::new(Symbol::parse("IBM").expect("symbol"), MarketClass::Equity)
    }

    #[tokio::test]
    async fn quote_request_appends_api_key_query_parameter() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"Global Quote":{"01. symbol":"IBM","02. open":"160.0","03. high":"162.5",
            "04. low":"159.2","05. price":"161.8","06. volume":"3200000",
            "07. latest trading day":"2024-01-05","08. previous close":"160.1",
            "09. change":"1.7","10. change percent":"1.0618%"}}"#,
        ));
        let quote = adapter(client.clone()).quote(quote_request()).await.expect("quote");

        assert_eq!(quote.price, 161.8);
        assert_eq!(quote.change_percent, 1.0618);
        assert_eq!(quote.volume, 3_200_000);
        assert_eq!(quote.as_of.format_rfc3339(), "2024-01-05T00:00:00Z");

        let url = &client.recorded_requests()[0].url;
        assert!(url.contains("function=GLOBAL_QUOTE&symbol=IBM"));
        assert!(url.ends_with("&apikey=alpha-key"));
    }

    #[tokio::test]
    async fn frequency_note_in_success_body_is_rate_limited() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"Note":"Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#,
        ));
        let error = adapter(client).quote(quote_request()).await.expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn invalid_key_message_is_unauthenticated() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"Error Message":"the parameter apikey is invalid or missing."}"#,
        ));
        let error = adapter(client).quote(quote_request()).await.expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn empty_global_quote_is_not_found() {
        let client = Arc::new(RecordingHttpClient::json(r#"{"Global Quote":{}}"#));
        let error = adapter(client).quote(quote_request()).await.expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn daily_series_is_trimmed_and_ascending() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"Meta Data":{},"Time Series (Daily)":{
              "2024-01-05":{"1. open":"12","2. high":"13","3. low":"11","4. close":"12.5","5. volume":"300"},
              "2024-01-04":{"1. open":"11","2. high":"12","3. low":"10","4. close":"11.5","5. volume":"200"},
              "2023-12-01":{"1. open":"9","2. high":"10","3. low":"8","4. close":"9.5","5. volume":"100"}}}"#,
        ));
        let series = adapter(client.clone())
            .daily_series(
                SeriesRequest::new(Symbol::parse("IBM").expect("symbol"), MarketClass::Equity, 7)
                    .expect("req"),
            )
            .await
            .expect("series");

        let dates = series.bars.iter().map(|bar| bar.ts.format_date()).collect::<Vec<_>>();
        assert_eq!(dates, vec!["2024-01-04", "2024-01-05"]);
        assert!(client.recorded_requests()[0].url.contains("outputsize=compact"));
    }

    #[tokio::test]
    async fn series_outside_range_is_not_found() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"Meta Data":{},"Time Series (Daily)":{
              "2023-12-01":{"1. open":"9","2. high":"10","3. low":"8","4. close":"9.5","5. volume":"100"}}}"#,
        ));
        let error = adapter(client)
            .daily_series(
                SeriesRequest::new(Symbol::parse("IBM").expect("symbol"), MarketClass::Equity, 1)
                    .expect("req"),
            )
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::NotFound);
    }
}
