use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use super::{
    acquire_quota, check_status, ensure_covered, history_window, parse_json, send,
    volume_from_f64,
};
use crate::clock::{Clock, SystemClock};
use crate::data_source::{
    Coverage, DataSource, Endpoint, QuoteRequest, SeriesRequest, SourceError, SourceFuture,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::QuotaGate;
use crate::{Bar, BarSeries, Interval, MarketClass, ProviderId, Quote, Symbol, UtcDateTime};

const BASE_URL: &str = "https://api.binance.com";

const COVERAGE: Coverage = Coverage::uniform(&[MarketClass::Crypto]);

/// Klines per request accepted by the exchange.
const KLINE_PAGE: i64 = 1_000;
const DAY_MS: i64 = 86_400_000;

/// Binance spot adapter. Crypto symbols are quoted against USDT.
#[derive(Clone)]
pub struct BinanceAdapter {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    throttling: QuotaGate,
    base_url: String,
}

impl BinanceAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            clock: Arc::new(SystemClock),
            throttling: QuotaGate::from_policy(&ProviderPolicy::binance_default()),
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
        acquire_quota(ProviderId::Binance, &self.throttling)?;
        let request =
            HttpRequest::get(format!("{}{}", self.base_url, path_and_query)).with_timeout(timeout);
        let response = send(ProviderId::Binance, self.http_client.as_ref(), request).await?;

        // Unknown pairs are a 400 with exchange code -1121.
        if response.status == 400 {
            if let Ok(error) = serde_json::from_str::<BinanceError>(&response.body) {
                if error.code == -1121 {
                    return Err(SourceError::not_found(format!("binance: {}", error.msg)));
                }
            }
        }
        check_status(ProviderId::Binance, &response)?;
        Ok(response.body)
    }

    async fn fetch_quote(&self, req: &QuoteRequest) -> Result<Quote, SourceError> {
        let pair = binance_pair(&req.symbol);
        let path = format!("/api/v3/ticker/24hr?symbol={}", urlencoding::encode(&pair));
        let body = self.get(path, req.timeout).await?;
        let ticker: BinanceTicker = parse_json(ProviderId::Binance, &body)?;

        let as_of = match ticker.close_time {
            Some(millis) => UtcDateTime::from_unix_millis(millis)?,
            None => self.clock.now(),
        };

        Quote::new(
            req.symbol.clone(),
            req.market,
            number("lastPrice", &ticker.last_price)?,
            ProviderId::Binance,
            as_of,
        )?
        .with_session(
            ticker.open_price.as_deref().map(str::parse::<f64>).and_then(Result::ok),
            ticker.high_price.as_deref().map(str::parse::<f64>).and_then(Result::ok),
            ticker.low_price.as_deref().map(str::parse::<f64>).and_then(Result::ok),
        )?
        .with_volume(
            ticker
                .volume
                .as_deref()
                .and_then(|v| v.parse().ok())
                .map_or(0, volume_from_f64),
        )
        .with_change(
            number("priceChange", &ticker.price_change)?,
            number("priceChangePercent", &ticker.price_change_percent)?,
        )
        .map_err(SourceError::from)
    }

    async fn fetch_daily(&self, req: &SeriesRequest) -> Result<BarSeries, SourceError> {
        let pair = binance_pair(&req.symbol);
        let (start, end) = history_window(self.clock.now(), req.range_days);
        let end_ms = end.unix_timestamp().saturating_mul(1_000);
        let mut cursor = start.unix_timestamp().saturating_mul(1_000);
        let mut bars = Vec::new();

        while cursor <= end_ms {
            let path = format!(
                "/api/v3/klines?symbol={}&interval=1d&startTime={cursor}&endTime={end_ms}&limit={KLINE_PAGE}",
                urlencoding::encode(&pair)
            );
            let body = self.get(path, req.timeout).await?;
            let rows: Vec<Vec<Value>> = parse_json(ProviderId::Binance, &body)?;
            let Some(last_open) = rows
                .last()
                .and_then(|row| row.first())
                .and_then(Value::as_i64)
            else {
                break;
            };

            for row in &rows {
                bars.push(kline_to_bar(row)?);
            }

            if (rows.len() as i64) < KLINE_PAGE {
                break;
            }
            cursor = last_open.saturating_add(DAY_MS);
        }

        if bars.is_empty() {
            return Err(SourceError::not_found(format!("binance returned no klines for {pair}")));
        }

        Ok(BarSeries::from_unsorted(req.symbol.clone(), Interval::Daily, bars))
    }
}

impl DataSource for BinanceAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Binance
    }

    fn coverage(&self) -> Coverage {
        COVERAGE
    }

    fn quote<'a>(&'a self, req: QuoteRequest) -> SourceFuture<'a, Quote> {
        Box::pin(async move {
            ensure_covered(ProviderId::Binance, COVERAGE, Endpoint::Quote, req.market)?;
            self.fetch_quote(&req).await
        })
    }

    fn daily_series<'a>(&'a self, req: SeriesRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            ensure_covered(ProviderId::Binance, COVERAGE, Endpoint::DailySeries, req.market)?;
            self.fetch_daily(&req).await
        })
    }
}

fn binance_pair(symbol: &Symbol) -> String {
    format!("{}USDT", symbol.crypto_base())
}

fn number(field: &str, raw: &Option<String>) -> Result<f64, SourceError> {
    raw.as_deref()
        .and_then(|value| value.parse::<f64>().ok())
        .ok_or_else(|| {
            SourceError::malformed(format!("binance field '{field}' is missing or not a number"))
        })
}

/// `[openTime, open, high, low, close, volume, closeTime, ...]`
fn kline_to_bar(row: &[Value]) -> Result<Bar, SourceError> {
    let field = |index: usize| -> Result<f64, SourceError> {
        row.get(index)
            .and_then(|value| match value {
                Value::String(text) => text.parse::<f64>().ok(),
                other => other.as_f64(),
            })
            .ok_or_else(|| {
                SourceError::malformed(format!("binance kline column {index} is invalid"))
            })
    };
    let open_time = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| SourceError::malformed("binance kline lacks an open time"))?;

    Bar::new(
        UtcDateTime::from_unix_millis(open_time)?,
        field(1)?,
        field(2)?,
        field(3)?,
        field(4)?,
        volume_from_f64(field(5)?),
    )
    .map_err(SourceError::from)
}

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTicker {
    #[serde(default)]
    last_price: Option<String>,
    #[serde(default)]
    price_change: Option<String>,
    #[serde(default)]
    price_change_percent: Option<String>,
    #[serde(default)]
    open_price: Option<String>,
    #[serde(default)]
    high_price: Option<String>,
    #[serde(default)]
    low_price: Option<String>,
    #[serde(default)]
    volume: Option<String>,
    #[serde(default)]
    close_time: Option<i64>,
}
