use pricefeed_core::{ConfigError, MarketDataError, ValidationError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    #[error("request failed: {error_count} error(s) reported")]
    RequestFailed { error_count: usize },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) | Self::MarketData(MarketDataError::Validation(_)) => 2,
            Self::Config(_) => 3,
            Self::RequestFailed { .. } => 4,
            Self::MarketData(_) | Self::Serialization(_) | Self::Io(_) => 10,
        }
    }
}
