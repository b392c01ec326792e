use std::str::FromStr;

use pricefeed_core::{MarketClass, MarketDataFacade, Symbol};

use crate::cli::QuoteArgs;
use crate::error::CliError;

use super::{recoverable, CommandResult};

pub async fn run(args: &QuoteArgs, facade: &MarketDataFacade) -> Result<CommandResult, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let market = MarketClass::from_str(&args.market)?;

    match facade.quote_served(&symbol, market).await {
        Ok(served) => Ok(CommandResult::ok(serde_json::to_value(&served.data)?, served.source_chain)
            .with_fallbacks(&served.failures)
            .with_cache_hit(served.cache_hit)
            .with_latency(served.latency_ms)),
        Err(error) => recoverable(error),
    }
}
