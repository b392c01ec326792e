use serde::{Deserialize, Serialize};

use crate::error::{MarketDataError, ProviderFailure};
use crate::{ProviderId, UtcDateTime, ValidationError};

pub const SCHEMA_VERSION: &str = "v1";

/// Standard response envelope for machine-readable output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub meta: EnvelopeMeta,
    pub data: T,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EnvelopeError>,
}

impl<T> Envelope<T> {
    pub fn success(meta: EnvelopeMeta, data: T) -> Self {
        Self {
            meta,
            data,
            errors: Vec::new(),
        }
    }

    pub fn with_errors(meta: EnvelopeMeta, data: T, errors: Vec<EnvelopeError>) -> Self {
        Self { meta, data, errors }
    }
}

/// Metadata attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub request_id: String,
    pub schema_version: String,
    pub generated_at: UtcDateTime,
    /// Providers visited, in order. Empty when served from cache.
    pub source_chain: Vec<ProviderId>,
    pub latency_ms: u64,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl EnvelopeMeta {
    pub fn new(
        request_id: impl Into<String>,
        generated_at: UtcDateTime,
        source_chain: Vec<ProviderId>,
        latency_ms: u64,
        cache_hit: bool,
    ) -> Result<Self, ValidationError> {
        let request_id = request_id.into();
        if request_id.trim().len() < 8 {
            return Err(ValidationError::InvalidRequestId);
        }

        Ok(Self {
            request_id,
            schema_version: String::from(SCHEMA_VERSION),
            generated_at,
            source_chain,
            latency_ms,
            cache_hit,
            warnings: Vec::new(),
        })
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Structured error payload for partial or failed responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ProviderId>,
}

impl EnvelopeError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let code = code.into();
        let message = message.into();
        if code.trim().is_empty() || message.trim().is_empty() {
            return Err(ValidationError::EmptyErrorPayload);
        }

        Ok(Self {
            code,
            message,
            source: None,
        })
    }

    pub fn with_source(mut self, source: ProviderId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn from_failure(failure: &ProviderFailure) -> Self {
        Self {
            code: failure.code.to_owned(),
            message: failure.message.clone(),
            source: Some(failure.provider),
        }
    }

    /// One entry per provider for exhausted chains, otherwise a single entry.
    pub fn from_market_data_error(error: &MarketDataError) -> Vec<Self> {
        match error {
            MarketDataError::AllProvidersFailed { failures } => {
                failures.iter().map(Self::from_failure).collect()
            }
            other => vec![Self {
                code: other.code().to_owned(),
                message: other.to_string(),
                source: None,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceError;

    fn now() -> UtcDateTime {
        UtcDateTime::parse("2024-01-02T00:00:00Z").expect("ts")
    }

    #[test]
    fn meta_rejects_short_request_ids() {
        assert_eq!(
            EnvelopeMeta::new("abc", now(), Vec::new(), 0, false),
            Err(ValidationError::InvalidRequestId)
        );
    }

    #[test]
    fn exhausted_chain_expands_to_one_error_per_provider() {
        let error = MarketDataError::AllProvidersFailed {
            failures: vec![
                ProviderFailure::skipped(ProviderId::Binance, "cooling down"),
                ProviderFailure::from_source_error(
                    ProviderId::Coingecko,
                    &SourceError::not_found("no coin"),
                    1,
                ),
            ],
        };

        let errors = EnvelopeError::from_market_data_error(&error);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].source, Some(ProviderId::Binance));
        assert_eq!(errors[1].code, "provider.not_found");
    }

    #[test]
    fn empty_errors_are_omitted_from_json() {
        let meta = EnvelopeMeta::new("req-12345678", now(), vec![ProviderId::Yahoo], 12, false)
            .expect("meta");
        let json = serde_json::to_value(Envelope::success(meta, 1)).expect("json");

        assert!(json.get("errors").is_none());
        assert_eq!(json["meta"]["schema_version"], "v1");
        assert_eq!(json["meta"]["source_chain"][0], "yahoo");
    }
}
