//! BTC/USD price fetching with multi-source failover
//!
//! Features:
//! - Binance, Coinbase and Kraken public ticker sources
//! - Strict priority order, first success wins
//! - Per-source failures are logged and swallowed
//! - One aggregate error when every source fails

pub mod feeds;
pub mod fetcher;

pub use feeds::{parse_price, HttpSource, QuoteSource};
pub use fetcher::PriceFetcher;
