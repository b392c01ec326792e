use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 20;

/// Normalized market symbol/ticker.
///
/// Accepts the provider-neutral spellings the facade receives from callers:
/// plain tickers (`AAPL`), exchange-suffixed tickers (`005930.KS`), index
/// carets (`^GSPC`), crypto pairs (`BTC-USD`) and Yahoo forex codes
/// (`EURUSD=X`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a symbol to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len,
                max: MAX_SYMBOL_LEN,
            });
        }

        if let Some(first) = normalized.chars().next() {
            if !(first.is_ascii_alphanumeric() || first == '^') {
                return Err(ValidationError::SymbolInvalidStart { ch: first });
            }
        }

        for (index, ch) in normalized.chars().enumerate().skip(1) {
            let valid = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '=' | ':');
            if !valid {
                return Err(ValidationError::SymbolInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ticker without any exchange suffix (`005930.KS` -> `005930`).
    pub fn root(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Exchange suffix including the dot, if present.
    pub fn exchange_suffix(&self) -> Option<&str> {
        self.0.find('.').map(|index| &self.0[index..])
    }

    /// Base asset for crypto pairs (`BTC-USD`, `BTCUSDT`, `BTC`) -> `BTC`.
    pub fn crypto_base(&self) -> &str {
        let value = self.0.split('-').next().unwrap_or(&self.0);
        for quote in ["USDT", "USDC", "BUSD"] {
            if let Some(base) = value.strip_suffix(quote) {
                if !base.is_empty() {
                    return base;
                }
            }
        }
        value
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_symbol() {
        let parsed = Symbol::parse(" aapl ").expect("symbol should parse");
        assert_eq!(parsed.as_str(), "AAPL");
    }

    #[test]
    fn accepts_numeric_exchange_tickers() {
        let parsed = Symbol::parse("005930.ks").expect("korean ticker");
        assert_eq!(parsed.root(), "005930");
        assert_eq!(parsed.exchange_suffix(), Some(".KS"));
    }

    #[test]
    fn accepts_index_and_forex_spellings() {
        assert!(Symbol::parse("^GSPC").is_ok());
        assert!(Symbol::parse("EURUSD=X").is_ok());
    }

    #[test]
    fn extracts_crypto_base() {
        assert_eq!(Symbol::parse("btc-usd").expect("pair").crypto_base(), "BTC");
        assert_eq!(Symbol::parse("ETHUSDT").expect("pair").crypto_base(), "ETH");
        assert_eq!(Symbol::parse("SOL").expect("bare").crypto_base(), "SOL");
    }

    #[test]
    fn rejects_invalid_start() {
        let err = Symbol::parse("-AAPL").expect_err("must fail");
        assert!(matches!(err, ValidationError::SymbolInvalidStart { .. }));
    }

    #[test]
    fn rejects_invalid_chars() {
        let err = Symbol::parse("AAPL$").expect_err("must fail");
        assert!(matches!(err, ValidationError::SymbolInvalidChar { .. }));
    }
}
