//! CLI argument definitions for pricefeed.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quote` | Latest quote for one symbol |
//! | `history` | Daily, weekly or monthly bars for one symbol |
//! | `sources` | Registered providers, fallback chains and cool-downs |
//!
//! Provider keys and budgets come from `PRICEFEED_*` environment variables.
//!
//! ```bash
//! pricefeed quote AAPL --market equity --pretty
//! pricefeed history BTC --market crypto --range-days 90 --interval 1d --interval 1w
//! pricefeed sources --market crypto
//! ```

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "pricefeed",
    author,
    version,
    about = "Multi-provider quotes and OHLC history with fallback and caching"
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log filter used when RUST_LOG is unset (e.g. `info`, `pricefeed_core=debug`).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch the latest quote for a symbol.
    Quote(QuoteArgs),
    /// Fetch historical bars; weekly and monthly are derived from daily data.
    History(HistoryArgs),
    /// List registered providers with coverage, chains and cool-down state.
    Sources(SourcesArgs),
}

#[derive(Debug, Args)]
pub struct QuoteArgs {
    /// Ticker, e.g. AAPL, BTC, EURUSD, ^GSPC.
    pub symbol: String,

    /// Market class: equity, crypto, forex or index.
    #[arg(long, default_value = "equity")]
    pub market: String,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub symbol: String,

    #[arg(long, default_value = "equity")]
    pub market: String,

    /// Calendar days of history to return.
    #[arg(long, default_value_t = 30)]
    pub range_days: u32,

    /// Bar interval: 1d, 1w or 1M. Repeat to request several at once.
    #[arg(long = "interval", default_value = "1d")]
    pub intervals: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// Only show chains for this market class.
    #[arg(long)]
    pub market: Option<String>,
}
