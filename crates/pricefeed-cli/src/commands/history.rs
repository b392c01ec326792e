use std::str::FromStr;

use pricefeed_core::{BarSeries, Interval, MarketClass, MarketDataFacade, Symbol};
use serde::Serialize;
use serde_json::Value;

use crate::cli::HistoryArgs;
use crate::error::CliError;

use super::{recoverable, CommandResult};

#[derive(Debug, Serialize)]
struct HistoryResponseData {
    symbol: Symbol,
    market: MarketClass,
    range_days: u32,
    series: Vec<BarSeries>,
}

/// Intervals run in order against one facade, so weekly and monthly reuse
/// the daily series fetched for the first.
pub async fn run(args: &HistoryArgs, facade: &MarketDataFacade) -> Result<CommandResult, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let market = MarketClass::from_str(&args.market)?;
    let intervals = args
        .intervals
        .iter()
        .map(|raw| Interval::from_str(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut series = Vec::with_capacity(intervals.len());
    let mut source_chain = Vec::new();
    let mut failures = Vec::new();
    let mut latency_ms = 0;
    let mut cache_hit = true;

    for interval in intervals {
        match facade
            .historical_served(&symbol, market, args.range_days, interval)
            .await
        {
            Ok(served) => {
                for provider in served.source_chain {
                    if !source_chain.contains(&provider) {
                        source_chain.push(provider);
                    }
                }
                failures.extend(served.failures);
                latency_ms += served.latency_ms;
                cache_hit &= served.cache_hit;
                series.push(served.data);
            }
            Err(error) => {
                // Later intervals derive from the same daily series and would fail identically.
                return recoverable(error).map(|result| result.with_latency(latency_ms));
            }
        }
    }

    let data: Value = serde_json::to_value(HistoryResponseData {
        symbol,
        market,
        range_days: args.range_days,
        series,
    })?;

    Ok(CommandResult::ok(data, source_chain)
        .with_fallbacks(&failures)
        .with_cache_hit(cache_hit)
        .with_latency(latency_ms))
}
