use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical provider identifiers used for routing, rate-limit state and the
/// `source` tag on every quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Yahoo,
    Finnhub,
    Polygon,
    Alphavantage,
    Binance,
    Coingecko,
}

impl ProviderId {
    pub const ALL: [Self; 6] = [
        Self::Yahoo,
        Self::Finnhub,
        Self::Polygon,
        Self::Alphavantage,
        Self::Binance,
        Self::Coingecko,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::Finnhub => "finnhub",
            Self::Polygon => "polygon",
            Self::Alphavantage => "alphavantage",
            Self::Binance => "binance",
            Self::Coingecko => "coingecko",
        }
    }

    /// Whether the provider refuses anonymous requests.
    pub const fn requires_api_key(self) -> bool {
        matches!(self, Self::Finnhub | Self::Polygon | Self::Alphavantage)
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yahoo" => Ok(Self::Yahoo),
            "finnhub" => Ok(Self::Finnhub),
            "polygon" => Ok(Self::Polygon),
            "alphavantage" | "alpha_vantage" => Ok(Self::Alphavantage),
            "binance" => Ok(Self::Binance),
            "coingecko" => Ok(Self::Coingecko),
            other => Err(ValidationError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}
