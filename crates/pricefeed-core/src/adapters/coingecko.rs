use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::{acquire_quota, ensure_covered, fetch_body, parse_json, volume_from_f64};
use crate::clock::{Clock, SystemClock};
use crate::data_source::{
    Coverage, DataSource, Endpoint, QuoteRequest, SeriesRequest, SourceError, SourceFuture,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::QuotaGate;
use crate::{Bar, BarSeries, Interval, MarketClass, ProviderId, Quote, Symbol, UtcDateTime};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

const COVERAGE: Coverage = Coverage::uniform(&[MarketClass::Crypto]);

/// `days` values the OHLC endpoint accepts, ascending.
const OHLC_DAYS: [u32; 6] = [7, 14, 30, 90, 180, 365];

/// CoinGecko adapter. Works keyless; a demo key raises the quota.
#[derive(Clone)]
pub struct CoinGeckoAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    clock: Arc<dyn Clock>,
    throttling: QuotaGate,
    base_url: String,
}

impl CoinGeckoAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            auth: HttpAuth::None,
            clock: Arc::new(SystemClock),
            throttling: QuotaGate::from_policy(&ProviderPolicy::coingecko_default()),
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.auth = HttpAuth::Header {
            name: String::from("x-cg-demo-api-key"),
            value: api_key.into(),
        };
        self
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
        acquire_quota(ProviderId::Coingecko, &self.throttling)?;
        let request = HttpRequest::get(format!("{}{}", self.base_url, path_and_query))
            .with_auth(&self.auth)
            .with_timeout(timeout);
        fetch_body(ProviderId::Coingecko, self.http_client.as_ref(), request).await
    }

    async fn fetch_quote(&self, req: &QuoteRequest) -> Result<Quote, SourceError> {
        let id = coin_id(&req.symbol);
        let path = format!(
            "/simple/price?ids={}&vs_currencies=usd&include_24hr_vol=true&include_24hr_change=true&include_last_updated_at=true",
            urlencoding::encode(&id)
        );
        let body = self.get(path, req.timeout).await?;
        let mut prices: HashMap<String, CoinGeckoPrice> = parse_json(ProviderId::Coingecko, &body)?;

        let Some(price) = prices.remove(&id) else {
            return Err(SourceError::not_found(format!("coingecko has no coin '{id}'")));
        };
        let usd = price.usd.ok_or_else(|| {
            SourceError::malformed(format!("coingecko price for '{id}' lacks usd"))
        })?;

        let as_of = match price.last_updated_at {
            Some(seconds) => UtcDateTime::from_unix_timestamp(seconds)?,
            None => self.clock.now(),
        };

        let mut quote =
            Quote::new(req.symbol.clone(), req.market, usd, ProviderId::Coingecko, as_of)?
                .with_volume(price.usd_24h_vol.map_or(0, volume_from_f64));
        if let Some(percent) = price.usd_24h_change.filter(|value| value.is_finite()) {
            // Back out the absolute change from the percentage.
            let previous = usd / (1.0 + percent / 100.0);
            quote = quote.with_change(usd - previous, percent)?;
        }
        Ok(quote)
    }

    async fn fetch_daily(&self, req: &SeriesRequest) -> Result<BarSeries, SourceError> {
        let id = coin_id(&req.symbol);
        let days = OHLC_DAYS
            .iter()
            .find(|days| **days >= req.range_days)
            .map_or_else(|| String::from("max"), u32::to_string);
        let path = format!("/coins/{}/ohlc?vs_currency=usd&days={days}", urlencoding::encode(&id));
        let body = self.get(path, req.timeout).await?;
        let candles: Vec<[f64; 5]> = parse_json(ProviderId::Coingecko, &body)?;

        if candles.is_empty() {
            return Err(SourceError::not_found(format!("coingecko returned no candles for '{id}'")));
        }

        let cutoff = self
            .clock
            .now()
            .saturating_sub(time::Duration::days(i64::from(req.range_days)))
            .start_of_day();
        let bars: Vec<Bar> = candles_to_daily(&candles)?
            .into_iter()
            .filter(|bar| bar.ts >= cutoff)
            .collect();
        if bars.is_empty() {
            return Err(SourceError::not_found(format!(
                "coingecko has no candles for '{id}' in the last {} days",
                req.range_days
            )));
        }

        Ok(BarSeries::from_unsorted(req.symbol.clone(), Interval::Daily, bars))
    }
}

impl DataSource for CoinGeckoAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Coingecko
    }

    fn coverage(&self) -> Coverage {
        COVERAGE
    }

    fn quote<'a>(&'a self, req: QuoteRequest) -> SourceFuture<'a, Quote> {
        Box::pin(async move {
            ensure_covered(ProviderId::Coingecko, COVERAGE, Endpoint::Quote, req.market)?;
            self.fetch_quote(&req).await
        })
    }

    fn daily_series<'a>(&'a self, req: SeriesRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            ensure_covered(ProviderId::Coingecko, COVERAGE, Endpoint::DailySeries, req.market)?;
            self.fetch_daily(&req).await
        })
    }
}

/// CoinGecko addresses coins by slug, not ticker.
fn coin_id(symbol: &Symbol) -> String {
    let base = symbol.crypto_base();
    let known = match base {
        "BTC" => "bitcoin",
        "ETH" => "ethereum",
        "SOL" => "solana",
        "XRP" => "ripple",
        "ADA" => "cardano",
        "DOGE" => "dogecoin",
        "DOT" => "polkadot",
        "BNB" => "binancecoin",
        "LTC" => "litecoin",
        "AVAX" => "avalanche-2",
        "MATIC" => "matic-network",
        "LINK" => "chainlink",
        "TRX" => "tron",
        "SHIB" => "shiba-inu",
        "BCH" => "bitcoin-cash",
        "XLM" => "stellar",
        "ATOM" => "cosmos",
        "UNI" => "uniswap",
        "USDT" => "tether",
        "USDC" => "usd-coin",
        other => return other.to_ascii_lowercase(),
    };
    known.to_owned()
}

/// Merge intraday candles `[ms, o, h, l, c]` into one bar per UTC day.
fn candles_to_daily(candles: &[[f64; 5]]) -> Result<Vec<Bar>, SourceError> {
    let mut sorted = candles.to_vec();
    sorted.sort_by(|left, right| left[0].total_cmp(&right[0]));

    let mut bars: Vec<Bar> = Vec::new();
    for [millis, open, high, low, close] in sorted {
        let day = UtcDateTime::from_unix_millis(millis as i64)?.start_of_day();
        match bars.last_mut() {
            Some(bar) if bar.ts == day => {
                bar.high = bar.high.max(high);
                bar.low = bar.low.min(low);
                bar.close = close;
            }
            _ => bars.push(Bar::new(day, open, high, low, close, 0)?),
        }
    }
    Ok(bars)
}

#[derive(Debug, Deserialize)]
struct CoinGeckoPrice {
    #[serde(default)]
    usd: Option<f64>,
    #[serde(default)]
    usd_24h_vol: Option<f64>,
    #[serde(default)]
    usd_24h_change: Option<f64>,
    #[serde(default)]
    last_updated_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::RecordingHttpClient;
    use crate::clock::ManualClock;
    use crate::data_source::SourceErrorKind;

    fn adapter(client: Arc<RecordingHttpClient>) -> CoinGeckoAdapter {
        let clock = ManualClock::new(UtcDateTime::parse("2024-01-04T00:00:00Z").expect("ts"));
        CoinGeckoAdapter::new(client).with_clock(Arc::new(clock))
    }

    fn eth() -> Symbol {
        Symbol::parse("ETH").expect("symbol")
    }

    #[tokio::test]
    async fn simple_price_becomes_quote() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"ethereum":{"usd":2250.0,"usd_24h_vol":9876543210.4,"usd_24h_change":12.5,"last_updated_at":1704326400}}"#,
        ));
        let quote = adapter(client.clone())
            .with_api_key("cg-key")
            .quote(QuoteRequest::new(eth(), MarketClass::Crypto))
            .await
            .expect("quote");

        assert_eq!(quote.price, 2250.0);
        assert_eq!(quote.change_percent, 12.5);
        assert!((quote.change - 250.0).abs() < 1e-9);
        assert_eq!(quote.volume, 9_876_543_210);

        let request = &client.recorded_requests()[0];
        assert!(request.url.contains("/simple/price?ids=ethereum&vs_currencies=usd"));
        assert_eq!(
            request.headers.get("x-cg-demo-api-key").map(String::as_str),
            Some("cg-key")
        );
    }

    #[tokio::test]
    async fn unknown_coin_is_not_found() {
        let client = Arc::new(RecordingHttpClient::json("{}"));
        let error = adapter(client)
            .quote(QuoteRequest::new(
                Symbol::parse("NOPECOIN").expect("symbol"),
                MarketClass::Crypto,
            ))
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn four_hour_candles_merge_into_days() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"[[1704153600000,100,110,95,105],[1704168000000,105,120,100,118],
               [1704240000000,118,119,90,91]]"#,
        ));
        let series = adapter(client.clone())
            .daily_series(SeriesRequest::new(eth(), MarketClass::Crypto, 3).expect("req"))
            .await
            .expect("series");

        assert_eq!(series.len(), 2);
        let first = &series.bars[0];
        assert_eq!((first.open, first.high, first.low, first.close), (100.0, 120.0, 95.0, 118.0));
        assert!(client.recorded_requests()[0]
            .url
            .ends_with("/coins/ethereum/ohlc?vs_currency=usd&days=7"));
    }

    #[tokio::test]
    async fn candles_older_than_range_are_not_found() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"[[1704067200000,100,110,95,105],[1704081600000,105,120,100,118]]"#,
        ));
        let error = adapter(client)
            .daily_series(SeriesRequest::new(eth(), MarketClass::Crypto, 1).expect("req"))
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::NotFound);
    }
}
