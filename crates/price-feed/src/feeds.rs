//! Public ticker REST sources

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use roracle_core::{PriceFeedError, PriceFeedResult, PriceSource};

/// One provider in the failover cascade
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn source(&self) -> PriceSource;

    /// Perform a single request and return the BTC/USD price
    async fn fetch_price(&self) -> PriceFeedResult<f64>;
}

#[derive(Debug, Deserialize)]
struct BinanceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
struct CoinbaseExchangeRates {
    data: CoinbaseRates,
}

#[derive(Debug, Deserialize)]
struct CoinbaseRates {
    rates: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct KrakenTicker {
    result: HashMap<String, KrakenPair>,
}

#[derive(Debug, Deserialize)]
struct KrakenPair {
    /// Last trade closed: [price, lot volume]
    c: Vec<String>,
}

const KRAKEN_PAIR: &str = "XXBTZUSD";

/// REST ticker source backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpSource {
    provider: PriceSource,
    url: String,
    client: Client,
}

impl HttpSource {
    pub fn new(provider: PriceSource, url: impl Into<String>, client: Client) -> Self {
        Self {
            provider,
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl QuoteSource for HttpSource {
    fn source(&self) -> PriceSource {
        self.provider
    }

    async fn fetch_price(&self) -> PriceFeedResult<f64> {
        debug!("Requesting {} ticker from {}", self.provider, self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PriceFeedError::Http {
                provider: self.provider,
                message: e.to_string(),
            })?;

        // Error bodies are never parsed
        let status = response.status();
        if !status.is_success() {
            return Err(PriceFeedError::Status {
                provider: self.provider,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| PriceFeedError::Http {
            provider: self.provider,
            message: e.to_string(),
        })?;

        parse_price(self.provider, &body)
    }
}

/// Extract the price from a provider-specific ticker payload
pub fn parse_price(provider: PriceSource, body: &str) -> PriceFeedResult<f64> {
    let decode = |message: String| PriceFeedError::Decode { provider, message };

    let raw = match provider {
        PriceSource::Binance => {
            let ticker: BinanceTicker =
                serde_json::from_str(body).map_err(|e| decode(e.to_string()))?;
            ticker.price
        }
        PriceSource::Coinbase => {
            let mut rates: CoinbaseExchangeRates =
                serde_json::from_str(body).map_err(|e| decode(e.to_string()))?;
            rates
                .data
                .rates
                .remove("USD")
                .ok_or_else(|| decode("missing data.rates.USD".to_string()))?
        }
        PriceSource::Kraken => {
            let mut ticker: KrakenTicker =
                serde_json::from_str(body).map_err(|e| decode(e.to_string()))?;
            ticker
                .result
                .remove(KRAKEN_PAIR)
                .and_then(|pair| pair.c.into_iter().next())
                .ok_or_else(|| decode(format!("missing result.{KRAKEN_PAIR}.c[0]")))?
        }
    };

    parse_decimal(&raw).ok_or_else(|| decode(format!("not a price: {raw:?}")))
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|price| price.is_finite() && *price >= 0.0)
}
