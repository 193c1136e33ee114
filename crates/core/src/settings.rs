//! Configuration types
//!
//! Layering, lowest precedence first: built-in defaults, an optional TOML
//! file, `RORACLE__SECTION__KEY` environment variables, and finally the two
//! deployment settings `PRIMARY_RPC` / `FALLBACK_RPC`.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{CoreError, CoreResult};

pub const DEFAULT_PRIMARY_RPC: &str = "wss://rpc.polkadot.io";
pub const DEFAULT_FALLBACK_RPC: &str = "wss://rpc.ibp.network/polkadot";

pub const BINANCE_API: &str = "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT";
pub const COINBASE_API: &str = "https://api.coinbase.com/v2/exchange-rates?currency=BTC";
pub const KRAKEN_API: &str = "https://api.kraken.com/0/public/Ticker?pair=XBTUSD";

/// Chain node endpoints and pallet layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    pub primary_rpc: String,
    pub fallback_rpc: String,
    /// Pallet name as registered in the runtime (storage prefix)
    pub pallet_name: String,
    /// Pallet index in the runtime's `construct_runtime!` (call encoding)
    pub pallet_index: u8,
    pub probe_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            primary_rpc: DEFAULT_PRIMARY_RPC.to_string(),
            fallback_rpc: DEFAULT_FALLBACK_RPC.to_string(),
            pallet_name: "Roracle".to_string(),
            pallet_index: 8,
            probe_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl ChainSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Public price API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceFeedSettings {
    pub binance_url: String,
    pub coinbase_url: String,
    pub kraken_url: String,
    pub request_timeout_ms: u64,
}

impl Default for PriceFeedSettings {
    fn default() -> Self {
        Self {
            binance_url: BINANCE_API.to_string(),
            coinbase_url: COINBASE_API.to_string(),
            kraken_url: KRAKEN_API.to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl PriceFeedSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Dashboard behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub history_limit: u64,
    /// Delay before reloading chain data after a submission
    pub reload_delay_ms: u64,
    /// External signing service used by `submit`
    pub signer_url: Option<String>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            history_limit: 20,
            reload_delay_ms: 2_000,
            signer_url: None,
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chain: ChainSettings,
    pub price_feed: PriceFeedSettings,
    pub dashboard: DashboardSettings,
}

impl Settings {
    /// Load settings; `path` is required to exist when given, otherwise
    /// `roracle.toml` in the working directory is used if present.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("roracle").required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("RORACLE").separator("__"))
            .set_override_option("chain.primary_rpc", std::env::var("PRIMARY_RPC").ok())?
            .set_override_option("chain.fallback_rpc", std::env::var("FALLBACK_RPC").ok())?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let urls = [
            ("chain.primary_rpc", &self.chain.primary_rpc),
            ("chain.fallback_rpc", &self.chain.fallback_rpc),
            ("price_feed.binance_url", &self.price_feed.binance_url),
            ("price_feed.coinbase_url", &self.price_feed.coinbase_url),
            ("price_feed.kraken_url", &self.price_feed.kraken_url),
        ];
        for (key, url) in urls {
            if url.trim().is_empty() {
                return Err(CoreError::InvalidConfig(format!("{key} must not be empty")));
            }
        }

        if self.chain.pallet_name.is_empty() {
            return Err(CoreError::InvalidConfig("chain.pallet_name must not be empty".into()));
        }

        let timeouts = [
            ("chain.probe_timeout_ms", self.chain.probe_timeout_ms),
            ("chain.request_timeout_ms", self.chain.request_timeout_ms),
            ("price_feed.request_timeout_ms", self.price_feed.request_timeout_ms),
        ];
        for (key, ms) in timeouts {
            if ms == 0 {
                return Err(CoreError::InvalidConfig(format!("{key} must be positive")));
            }
        }

        if self.dashboard.history_limit == 0 {
            return Err(CoreError::InvalidConfig("dashboard.history_limit must be positive".into()));
        }

        Ok(())
    }
}
