//! # Domain Models
//!
//! Canonical market data types shared by adapters, the router and callers.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Quote`] | Latest price with session range, change and serving provider |
//! | [`Bar`] | OHLCV bar keyed by its period start |
//! | [`BarSeries`] | Strictly ascending bars for one symbol/interval |
//! | [`MarketClass`] | equity, crypto, forex or index |
//! | [`Symbol`] | Validated, uppercased ticker |
//! | [`Interval`] | `1d`, `1w`, `1M` or intraday `Nm` |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Construction validates invariants. Malformed provider data is rejected here
//! and surfaces as a malformed-response error from the adapter.

mod interval;
mod models;
mod symbol;
mod timestamp;

pub use interval::Interval;
pub use models::{Bar, BarSeries, MarketClass, Quote};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
