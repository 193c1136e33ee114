//! Failover price cascade - coordinates the ticker sources

use reqwest::Client;
use tracing::{error, info, warn};

use roracle_core::{PriceFeedError, PriceFeedResult, PriceFeedSettings, PriceQuote, PriceSource};
use crate::feeds::{HttpSource, QuoteSource};

/// Ordered list of price sources, tried one after another
pub struct PriceFetcher {
    sources: Vec<Box<dyn QuoteSource>>,
}

impl PriceFetcher {
    /// Sources are tried in the given order
    pub fn new(sources: Vec<Box<dyn QuoteSource>>) -> Self {
        Self { sources }
    }

    /// Binance, then Coinbase, then Kraken
    pub fn from_settings(settings: &PriceFeedSettings) -> PriceFeedResult<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| PriceFeedError::Client(e.to_string()))?;

        Ok(Self::with_client(settings, client))
    }

    pub fn with_client(settings: &PriceFeedSettings, client: Client) -> Self {
        let sources: Vec<Box<dyn QuoteSource>> = PriceSource::ALL
            .iter()
            .map(|&provider| {
                let url = match provider {
                    PriceSource::Binance => &settings.binance_url,
                    PriceSource::Coinbase => &settings.coinbase_url,
                    PriceSource::Kraken => &settings.kraken_url,
                };
                Box::new(HttpSource::new(provider, url.clone(), client.clone())) as Box<dyn QuoteSource>
            })
            .collect();

        Self::new(sources)
    }

    pub fn sources(&self) -> Vec<PriceSource> {
        self.sources.iter().map(|s| s.source()).collect()
    }

    /// Fetch a price, falling through to the next source on any failure.
    ///
    /// Every call starts again from the first source; nothing is cached and
    /// a failing source is not retried within one call.
    pub async fn fetch_price(&self) -> PriceFeedResult<PriceQuote> {
        for source in &self.sources {
            match source.fetch_price().await {
                Ok(price) => {
                    info!("Successfully fetched price from {}: {}", source.source(), price);
                    return Ok(PriceQuote::new(price, source.source()));
                }
                Err(e) => {
                    warn!("{} failed, trying next source: {}", source.source(), e);
                }
            }
        }

        error!("All {} oracle sources failed", self.sources.len());
        Err(PriceFeedError::AllSourcesFailed)
    }
}
