mod history;
mod quote;
mod sources;

use pricefeed_core::{
    Envelope, EnvelopeError, EnvelopeMeta, MarketDataConfig, MarketDataError, MarketDataFacade,
    ProviderFailure, ProviderId, UtcDateTime,
};
use serde_json::Value;
use uuid::Uuid;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub source_chain: Vec<ProviderId>,
}

impl CommandResult {
    pub fn ok(data: Value, source_chain: Vec<ProviderId>) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            latency_ms: 0,
            cache_hit: false,
            source_chain,
        }
    }

    /// Null data with one error per failed provider.
    pub fn failed(error: &MarketDataError) -> Self {
        Self::ok(Value::Null, Vec::new()).with_errors(EnvelopeError::from_market_data_error(error))
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    /// Fallback failures that preceded a successful provider.
    pub fn with_fallbacks(mut self, failures: &[ProviderFailure]) -> Self {
        if let Some(last) = failures.last() {
            self.warnings.push(format!(
                "{} provider(s) failed before a fallback served the request (last: {})",
                failures.len(),
                last.provider
            ));
        }
        self.errors.extend(failures.iter().map(EnvelopeError::from_failure));
        self
    }
}

/// Provider exhaustion is reported in the envelope; anything else aborts.
pub fn recoverable(error: MarketDataError) -> Result<CommandResult, CliError> {
    match error {
        MarketDataError::AllProvidersFailed { .. } | MarketDataError::NoProviders { .. } => {
            Ok(CommandResult::failed(&error))
        }
        other => Err(other.into()),
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    let config = MarketDataConfig::from_env()?;
    tracing::debug!(?config, "loaded configuration");
    let facade = MarketDataFacade::builder().with_config(config).build();

    let command_result = match &cli.command {
        Command::Quote(args) => quote::run(args, &facade).await?,
        Command::History(args) => history::run(args, &facade).await?,
        Command::Sources(args) => sources::run(args, &facade)?,
    };

    let CommandResult {
        data,
        warnings,
        errors,
        latency_ms,
        cache_hit,
        source_chain,
    } = command_result;

    let mut meta = EnvelopeMeta::new(
        Uuid::new_v4().to_string(),
        UtcDateTime::now(),
        source_chain,
        latency_ms,
        cache_hit,
    )?;
    for warning in warnings {
        meta.push_warning(warning);
    }

    Ok(Envelope::with_errors(meta, data, errors))
}

#[cfg(test)]
mod tests {
    use pricefeed_core::{ProviderFailure, SourceError};

    use super::*;

    #[test]
    fn exhausted_chain_becomes_null_envelope_data() {
        let error = MarketDataError::AllProvidersFailed {
            failures: vec![
                ProviderFailure::skipped(ProviderId::Binance, "cooling down"),
                ProviderFailure::from_source_error(
                    ProviderId::Coingecko,
                    &SourceError::timeout("slow"),
                    3,
                ),
            ],
        };

        let result = recoverable(error).expect("reported in envelope");

        assert!(result.data.is_null());
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn aggregation_errors_abort_the_command() {
        let error = MarketDataError::Aggregation(String::from("input must be daily"));
        assert!(recoverable(error).is_err());
    }

    #[test]
    fn fallbacks_are_reported_as_warning_and_errors() {
        let failures = vec![ProviderFailure::skipped(ProviderId::Yahoo, "cooling down")];
        let result = CommandResult::ok(Value::Null, vec![ProviderId::Yahoo, ProviderId::Polygon])
            .with_fallbacks(&failures);

        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("yahoo"));
        assert_eq!(result.errors[0].source, Some(ProviderId::Yahoo));
    }
}
