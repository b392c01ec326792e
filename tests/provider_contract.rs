//! Contract every adapter honours, checked over a recording HTTP client.

use std::sync::Arc;
use std::time::Duration;

use pricefeed_core::{
    AlphaVantageAdapter, BinanceAdapter, CoinGeckoAdapter, FinnhubAdapter, MarketDataConfig,
    PolygonAdapter, YahooAdapter,
};
use pricefeed_tests::*;

fn adapter(provider: ProviderId, http: Arc<RecordingHttpClient>) -> Arc<dyn DataSource> {
    let clock = clock();
    match provider {
        ProviderId::Yahoo => Arc::new(YahooAdapter::new(http).with_clock(clock)),
        ProviderId::Finnhub => Arc::new(FinnhubAdapter::new(http, "fh-key").with_clock(clock)),
        ProviderId::Polygon => Arc::new(PolygonAdapter::new(http, "pg-key").with_clock(clock)),
        ProviderId::Alphavantage => {
            Arc::new(AlphaVantageAdapter::new(http, "av-key").with_clock(clock))
        }
        ProviderId::Binance => Arc::new(BinanceAdapter::new(http).with_clock(clock)),
        ProviderId::Coingecko => Arc::new(CoinGeckoAdapter::new(http).with_clock(clock)),
    }
}

fn symbol_for(market: MarketClass) -> Symbol {
    match market {
        MarketClass::Equity => symbol("AAPL"),
        MarketClass::Crypto => symbol("BTC"),
        MarketClass::Forex => symbol("EURUSD"),
        MarketClass::Index => symbol("^GSPC"),
    }
}

#[tokio::test]
async fn when_market_is_outside_coverage_then_adapter_refuses_without_network() {
    for provider in ProviderId::ALL {
        let http = Arc::new(RecordingHttpClient::default());
        let source = adapter(provider, http.clone());
        assert_eq!(source.id(), provider);

        for market in MarketClass::ALL {
            if source.coverage().supports(Endpoint::Quote, market) {
                continue;
            }
            // When
            let error = source
                .quote(QuoteRequest::new(symbol_for(market), market))
                .await
                .expect_err("uncovered market");

            // Then
            assert_eq!(error.kind(), SourceErrorKind::UnsupportedMarket, "{provider} {market}");
        }
        assert!(http.recorded_requests().is_empty(), "{provider} made a request");
    }
}

#[tokio::test]
async fn when_provider_answers_429_then_error_is_rate_limited() {
    for provider in ProviderId::ALL {
        // Given: The provider throttles
        let http = Arc::new(RecordingHttpClient::status(429, "slow down"));
        let source = adapter(provider, http.clone());
        let market = source.coverage().quote[0];

        // When
        let error = source
            .quote(QuoteRequest::new(symbol_for(market), market))
            .await
            .expect_err("throttled");

        // Then: Classified for cool-down, not retry
        assert_eq!(error.kind(), SourceErrorKind::RateLimited, "{provider}");
        assert!(!error.retryable());
        assert_eq!(http.recorded_requests().len(), 1);
    }
}

#[tokio::test]
async fn when_keyed_provider_rejects_credentials_then_error_is_unauthenticated() {
    for provider in [ProviderId::Finnhub, ProviderId::Polygon, ProviderId::Alphavantage] {
        let http = Arc::new(RecordingHttpClient::status(401, r#"{"error":"invalid key"}"#));
        let source = adapter(provider, http.clone());

        let error = source
            .daily_series(
                SeriesRequest::new(symbol("AAPL"), MarketClass::Equity, 30).expect("request"),
            )
            .await
            .expect_err("rejected");

        assert_eq!(error.kind(), SourceErrorKind::Unauthenticated, "{provider}");
    }
}

#[tokio::test]
async fn when_transport_times_out_then_error_is_retryable_timeout() {
    let http = Arc::new(RecordingHttpClient::replying(vec![Err(HttpError::timeout("deadline"))]));
    let source = adapter(ProviderId::Yahoo, http);

    let error = source
        .quote(QuoteRequest::new(symbol("AAPL"), MarketClass::Equity))
        .await
        .expect_err("timeout");

    assert_eq!(error.kind(), SourceErrorKind::Timeout);
    assert!(error.retryable());
}

// =============================================================================
// Configured facade over HTTP
// =============================================================================

const BINANCE_TICKER: &str = r#"{"symbol":"BTCUSDT","priceChange":"-94.99000000",
    "priceChangePercent":"-0.218","lastPrice":"43567.89123400","openPrice":"43662.88",
    "highPrice":"44100.00","lowPrice":"43100.50","volume":"25123.456","closeTime":1704067199999}"#;

const COINGECKO_PRICE: &str = r#"{"bitcoin":{"usd":43550.25,"usd_24h_vol":1234567.8,
    "usd_24h_change":-0.5,"last_updated_at":1704067200}}"#;

#[tokio::test]
async fn when_keyless_defaults_are_used_then_crypto_quote_comes_from_binance() {
    // Given: No API keys, so only keyless providers are registered
    let http = Arc::new(RecordingHttpClient::json(BINANCE_TICKER));
    let facade = MarketDataFacade::builder()
        .with_config(MarketDataConfig::default())
        .with_http_client(http.clone())
        .with_clock(clock())
        .build();
    assert_eq!(
        facade.router().registered(),
        vec![ProviderId::Yahoo, ProviderId::Binance, ProviderId::Coingecko]
    );

    // When
    let quote = facade.get_quote_str("BTC", "crypto").await.expect("quote");

    // Then
    assert_eq!(quote.source, ProviderId::Binance);
    assert_eq!(quote.price, 43_567.891_234);
    let requests = http.recorded_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url.ends_with("/api/v3/ticker/24hr?symbol=BTCUSDT"));
}

#[tokio::test]
async fn when_binance_throttles_then_coingecko_serves_and_binance_cools_down() {
    // Given: Binance answers 429, CoinGecko has a price
    let http = Arc::new(RecordingHttpClient::replying(vec![
        Ok(HttpResponse::with_status(429, "")),
        Ok(HttpResponse::ok_json(COINGECKO_PRICE)),
    ]));
    let facade = MarketDataFacade::builder()
        .with_http_client(http.clone())
        .with_clock(clock())
        .build();

    // When
    let served = facade
        .quote_served(&symbol("BTC"), MarketClass::Crypto)
        .await
        .expect("coingecko should serve");

    // Then
    assert_eq!(served.data.source, ProviderId::Coingecko);
    assert_eq!(served.source_chain, vec![ProviderId::Binance, ProviderId::Coingecko]);
    assert!(http.recorded_requests()[1].url.contains("/simple/price?ids=bitcoin"));
    let binance = facade
        .sources()
        .into_iter()
        .find(|snapshot| snapshot.id == ProviderId::Binance)
        .expect("binance registered");
    assert!(binance.state.rate_limited);
}

#[tokio::test]
async fn when_request_timeout_is_configured_then_it_reaches_the_http_request() {
    // Given: A 30s request timeout from the environment
    let config = MarketDataConfig::from_lookup(|name| {
        (name == "PRICEFEED_REQUEST_TIMEOUT_MS").then(|| String::from("30000"))
    })
    .expect("config");
    let http = Arc::new(RecordingHttpClient::json(BINANCE_TICKER));
    let facade = MarketDataFacade::builder()
        .with_config(config)
        .with_http_client(http.clone())
        .with_clock(clock())
        .build();

    // When
    facade.get_quote_str("BTC", "crypto").await.expect("quote");

    // Then
    assert_eq!(http.recorded_requests()[0].timeout_ms, 30_000);
}

#[tokio::test]
async fn when_a_call_is_retried_then_its_http_timeout_grows_per_attempt() {
    // Given: Binance fails once with a 502, then answers
    let http = Arc::new(RecordingHttpClient::replying(vec![
        Ok(HttpResponse::with_status(502, "bad gateway")),
        Ok(HttpResponse::ok_json(BINANCE_TICKER)),
    ]));
    let retry = RetryConfig {
        timeout_step: Duration::from_secs(2),
        ..RetryConfig::fixed(Duration::ZERO, 3).with_attempt_timeout(Duration::from_secs(5))
    };
    let facade = MarketDataFacade::builder()
        .with_http_client(http.clone())
        .with_clock(clock())
        .with_retry(retry)
        .build();

    // When
    let served = facade
        .quote_served(&symbol("BTC"), MarketClass::Crypto)
        .await
        .expect("second attempt serves");

    // Then
    assert_eq!(served.data.source, ProviderId::Binance);
    let timeouts = http
        .recorded_requests()
        .iter()
        .map(|request| request.timeout_ms)
        .collect::<Vec<_>>();
    assert_eq!(timeouts, vec![5_000, 7_000]);
}
