use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Interval, ProviderId, Symbol, UtcDateTime, ValidationError};

/// Instrument class driving provider coverage and display precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketClass {
    Equity,
    Crypto,
    Forex,
    Index,
}

impl MarketClass {
    pub const ALL: [Self; 4] = [Self::Equity, Self::Crypto, Self::Forex, Self::Index];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Crypto => "crypto",
            Self::Forex => "forex",
            Self::Index => "index",
        }
    }
}

impl Display for MarketClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketClass {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "equity" | "stock" => Ok(Self::Equity),
            "crypto" => Ok(Self::Crypto),
            "forex" | "fx" => Ok(Self::Forex),
            "index" => Ok(Self::Index),
            other => Err(ValidationError::InvalidMarketClass {
                value: other.to_owned(),
            }),
        }
    }
}

/// Canonical quote as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: Symbol,
    pub market_class: MarketClass,
    pub price: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: u64,
    pub change: f64,
    pub change_percent: f64,
    pub source: ProviderId,
    #[serde(rename = "timestamp")]
    pub as_of: UtcDateTime,
}

impl Quote {
    /// Build a quote with only the mandatory fields. Price must be finite and positive.
    pub fn new(
        symbol: Symbol,
        market_class: MarketClass,
        price: f64,
        source: ProviderId,
        as_of: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_positive("price", price)?;

        Ok(Self {
            symbol,
            market_class,
            price,
            open: None,
            high: None,
            low: None,
            volume: 0,
            change: 0.0,
            change_percent: 0.0,
            source,
            as_of,
        })
    }

    /// Attach the session open/high/low. Zero values are treated as "not reported".
    pub fn with_session(
        mut self,
        open: Option<f64>,
        high: Option<f64>,
        low: Option<f64>,
    ) -> Result<Self, ValidationError> {
        validate_optional_non_negative("open", open)?;
        validate_optional_non_negative("high", high)?;
        validate_optional_non_negative("low", low)?;

        self.open = open.filter(|value| *value > 0.0);
        self.high = high.filter(|value| *value > 0.0);
        self.low = low.filter(|value| *value > 0.0);
        Ok(self)
    }

    pub fn with_volume(mut self, volume: u64) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_change(
        mut self,
        change: f64,
        change_percent: f64,
    ) -> Result<Self, ValidationError> {
        validate_finite("change", change)?;
        validate_finite("change_percent", change_percent)?;
        self.change = change;
        self.change_percent = change_percent;
        Ok(self)
    }

    /// Derive change and percent change from a previous close.
    pub fn with_previous_close(mut self, previous_close: f64) -> Self {
        if previous_close.is_finite() && previous_close > 0.0 {
            self.change = self.price - previous_close;
            self.change_percent = self.change / previous_close * 100.0;
        }
        self
    }
}

/// OHLCV bar. The timestamp marks the start of the period in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(rename = "timestamp")]
    pub ts: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    pub fn new(
        ts: UtcDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Bars for one (symbol, interval) pair in strictly increasing time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    pub symbol: Symbol,
    pub interval: Interval,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    /// Validating constructor: rejects unordered or duplicate timestamps.
    pub fn new(
        symbol: Symbol,
        interval: Interval,
        bars: Vec<Bar>,
    ) -> Result<Self, ValidationError> {
        for (index, pair) in bars.windows(2).enumerate() {
            if pair[1].ts <= pair[0].ts {
                return Err(ValidationError::UnorderedSeries { index: index + 1 });
            }
        }

        Ok(Self {
            symbol,
            interval,
            bars,
        })
    }

    /// Normalize provider output: sort ascending and drop duplicate
    /// timestamps, keeping the bar that appeared last.
    pub fn from_unsorted(symbol: Symbol, interval: Interval, bars: Vec<Bar>) -> Self {
        let mut indexed = bars.into_iter().enumerate().collect::<Vec<_>>();
        // Stable on (ts, arrival) so the later duplicate ends up last in its run.
        indexed.sort_by(|(left_pos, left), (right_pos, right)| {
            left.ts.cmp(&right.ts).then(left_pos.cmp(right_pos))
        });

        let mut normalized: Vec<Bar> = Vec::with_capacity(indexed.len());
        for (_, bar) in indexed {
            match normalized.last_mut() {
                Some(last) if last.ts == bar.ts => *last = bar,
                _ => normalized.push(bar),
            }
        }

        Self {
            symbol,
            interval,
            bars: normalized,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Copy of the series restricted to bars at or after `start`.
    pub fn trimmed_from(&self, start: UtcDateTime) -> Self {
        Self {
            symbol: self.symbol.clone(),
            interval: self.interval,
            bars: self
                .bars
                .iter()
                .filter(|bar| bar.ts >= start)
                .cloned()
                .collect(),
        }
    }
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

fn validate_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok(())
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(value) = value {
        validate_non_negative(field, value)?;
    }
    Ok(())
}
