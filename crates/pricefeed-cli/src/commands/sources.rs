use std::str::FromStr;

use pricefeed_core::{
    Coverage, Endpoint, MarketClass, MarketDataFacade, ProviderId, ProviderPolicy, ProviderState,
};
use serde::Serialize;

use crate::cli::SourcesArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SourceStatus {
    id: ProviderId,
    status: &'static str,
    coverage: Coverage,
    policy: ProviderPolicy,
    state: ProviderState,
}

#[derive(Debug, Serialize)]
struct FallbackChain {
    market: MarketClass,
    endpoint: Endpoint,
    providers: Vec<ProviderId>,
}

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    sources: Vec<SourceStatus>,
    chains: Vec<FallbackChain>,
}

pub fn run(args: &SourcesArgs, facade: &MarketDataFacade) -> Result<CommandResult, CliError> {
    let markets = match args.market.as_deref() {
        Some(raw) => vec![MarketClass::from_str(raw)?],
        None => MarketClass::ALL.to_vec(),
    };

    let sources = facade
        .sources()
        .into_iter()
        .map(|snapshot| SourceStatus {
            id: snapshot.id,
            status: snapshot.status_label(),
            coverage: snapshot.coverage,
            policy: snapshot.policy,
            state: snapshot.state,
        })
        .collect::<Vec<_>>();

    let mut chains = Vec::new();
    for market in markets {
        for endpoint in Endpoint::ALL {
            chains.push(FallbackChain {
                market,
                endpoint,
                providers: facade.router().source_chain(endpoint, market),
            });
        }
    }

    let mut result = CommandResult::ok(
        serde_json::to_value(SourcesResponseData { sources, chains })?,
        Vec::new(),
    );
    if facade.sources().is_empty() {
        result = result.with_warning(
            "no providers are configured; set PRICEFEED_*_API_KEY or enable keyless providers",
        );
    }
    Ok(result)
}
