//! Display precision for prices, percentages and volumes.
//!
//! Rounding is half-up (midpoint away from zero) on the shortest decimal
//! rendering of each `f64`, so `1.005` becomes `1.01` rather than the `1.00`
//! binary rounding would give.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{BarSeries, MarketClass, Quote, Symbol};

pub const PERCENT_DECIMALS: u32 = 4;

/// Ceiling for the extra places granted to sub-unit prices.
pub const MAX_PRICE_DECIMALS: u32 = 12;

/// Round `value` half-up to `dp` decimal places.
///
/// Values that do not fit a [`Decimal`] (non-finite or beyond its range)
/// come back unchanged.
pub fn round_half_up(value: f64, dp: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    Decimal::from_str(&value.to_string())
        .ok()
        .map(|decimal| decimal.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|rounded| rounded.to_f64())
        .unwrap_or(value)
}

/// Smallest place count at or above `dp` that keeps a positive `price`
/// from rounding to zero, capped at [`MAX_PRICE_DECIMALS`].
fn decimals_keeping_nonzero(price: f64, dp: u32) -> u32 {
    let mut dp = dp;
    while dp < MAX_PRICE_DECIMALS && price > 0.0 && round_half_up(price, dp) == 0.0 {
        dp += 1;
    }
    dp
}

/// Price decimal places, resolved as: symbol override, then exchange
/// suffix, then market class default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecisionRules {
    symbol_overrides: HashMap<Symbol, u32>,
    suffix_rules: Vec<(String, u32)>,
    market_defaults: HashMap<MarketClass, u32>,
}

impl Default for PrecisionRules {
    fn default() -> Self {
        Self {
            symbol_overrides: HashMap::new(),
            // KRX (KOSPI/KOSDAQ) and Tokyo trade in whole currency units.
            suffix_rules: vec![
                (String::from(".KS"), 0),
                (String::from(".KQ"), 0),
                (String::from(".T"), 0),
            ],
            market_defaults: HashMap::from([
                (MarketClass::Equity, 2),
                (MarketClass::Index, 2),
                (MarketClass::Forex, 5),
                (MarketClass::Crypto, 8),
            ]),
        }
    }
}

impl PrecisionRules {
    pub fn with_symbol_override(mut self, symbol: Symbol, decimals: u32) -> Self {
        self.symbol_overrides.insert(symbol, decimals);
        self
    }

    /// `suffix` includes the dot, e.g. `.L`.
    pub fn with_suffix_rule(mut self, suffix: impl Into<String>, decimals: u32) -> Self {
        let suffix = suffix.into().to_ascii_uppercase();
        self.suffix_rules.retain(|(existing, _)| *existing != suffix);
        self.suffix_rules.push((suffix, decimals));
        self
    }

    pub fn with_market_default(mut self, market: MarketClass, decimals: u32) -> Self {
        self.market_defaults.insert(market, decimals);
        self
    }

    pub fn price_decimals(&self, symbol: &Symbol, market: MarketClass) -> u32 {
        if let Some(decimals) = self.symbol_overrides.get(symbol) {
            return *decimals;
        }

        let suffix_rule = symbol.exchange_suffix().and_then(|suffix| {
            self.suffix_rules
                .iter()
                .find(|(rule, _)| rule == suffix)
                .map(|(_, decimals)| *decimals)
        });
        if let Some(decimals) = suffix_rule {
            return decimals;
        }

        self.market_defaults.get(&market).copied().unwrap_or(2)
    }
}

/// Applies [`PrecisionRules`] to quotes and series.
#[derive(Debug, Clone, Default)]
pub struct PrecisionFormatter {
    rules: PrecisionRules,
}

impl PrecisionFormatter {
    pub fn new(rules: PrecisionRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &PrecisionRules {
        &self.rules
    }

    /// A positive price never rounds to zero; its places are widened instead.
    pub fn format_quote(&self, mut quote: Quote) -> Quote {
        let configured = self.rules.price_decimals(&quote.symbol, quote.market_class);
        let dp = decimals_keeping_nonzero(quote.price, configured);
        quote.price = round_half_up(quote.price, dp);
        quote.open = quote.open.map(|value| round_half_up(value, dp));
        quote.high = quote.high.map(|value| round_half_up(value, dp));
        quote.low = quote.low.map(|value| round_half_up(value, dp));
        quote.change = round_half_up(quote.change, dp);
        quote.change_percent = round_half_up(quote.change_percent, PERCENT_DECIMALS);
        quote
    }

    /// Volumes are already whole numbers; only prices are touched.
    pub fn format_series(&self, mut series: BarSeries, market: MarketClass) -> BarSeries {
        let configured = self.rules.price_decimals(&series.symbol, market);
        let lowest = series
            .bars
            .iter()
            .map(|bar| bar.low)
            .filter(|low| *low > 0.0)
            .fold(f64::INFINITY, f64::min);
        let dp = if lowest.is_finite() {
            decimals_keeping_nonzero(lowest, configured)
        } else {
            configured
        };
        for bar in &mut series.bars {
            bar.open = round_half_up(bar.open, dp);
            bar.high = round_half_up(bar.high, dp);
            bar.low = round_half_up(bar.low, dp);
            bar.close = round_half_up(bar.close, dp);
        }
        series
    }
}
