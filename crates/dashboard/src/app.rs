//! Dashboard flows: loading chain data and submitting fresh prices

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use roracle_chain::{OracleApi, Signer};
use roracle_core::{ChainResult, OracleValue, PriceQuote};
use roracle_price_feed::PriceFetcher;

/// Everything the status view shows
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardData {
    pub last: Option<OracleValue>,
    pub history: Vec<OracleValue>,
}

/// Result of a successful submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub quote: PriceQuote,
    pub status: String,
    pub block_hash: String,
}

/// Read the last value and the newest `limit` history entries concurrently
pub async fn load_data(api: &dyn OracleApi, limit: u64) -> ChainResult<DashboardData> {
    let (last, history) = tokio::try_join!(api.read_last(), api.history(limit))?;
    Ok(DashboardData { last, history })
}

/// Fetch a price through the source cascade and submit it on-chain.
///
/// Nothing is submitted when every source fails.
pub async fn fetch_and_submit(
    fetcher: &PriceFetcher,
    api: &dyn OracleApi,
    signer: &dyn Signer,
    status: &str,
) -> Result<SubmitOutcome> {
    let quote = fetcher
        .fetch_price()
        .await
        .context("Failed to fetch oracle price")?;

    info!("Submitting {} from {} with status {}", quote.price(), quote.source(), status);

    let block_hash = api
        .submit(quote.price(), quote.source().name(), status, signer)
        .await?;

    info!("Transaction included in block {}", block_hash);

    Ok(SubmitOutcome {
        quote,
        status: status.to_string(),
        block_hash,
    })
}

/// Submit, then give the chain `reload_delay` before re-reading the data
pub async fn submit_and_reload(
    fetcher: &PriceFetcher,
    api: &dyn OracleApi,
    signer: &dyn Signer,
    status: &str,
    reload_delay: Duration,
    history_limit: u64,
) -> Result<(SubmitOutcome, DashboardData)> {
    let outcome = fetch_and_submit(fetcher, api, signer, status).await?;

    tokio::time::sleep(reload_delay).await;

    let data = match load_data(api, history_limit).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Reload after submission failed: {}", e);
            return Err(e.into());
        }
    };

    Ok((outcome, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roracle_core::{ChainError, PriceFeedError, PriceFeedResult, PriceSource};
    use roracle_price_feed::QuoteSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    struct StubOracle {
        last: Option<OracleValue>,
        history: Vec<OracleValue>,
        fail_reads: bool,
        submissions: Mutex<Vec<(f64, String, String)>>,
        reads: AtomicUsize,
    }

    impl StubOracle {
        fn new(history: Vec<OracleValue>) -> Self {
            Self {
                last: history.last().cloned(),
                history,
                fail_reads: false,
                submissions: Mutex::new(Vec::new()),
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OracleApi for StubOracle {
        async fn read_last(&self) -> ChainResult<Option<OracleValue>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(ChainError::during("get last value", ChainError::Disconnected));
            }
            Ok(self.last.clone())
        }

        async fn read_history_index(&self) -> ChainResult<u64> {
            Ok(self.history.len() as u64)
        }

        async fn read_history_at(&self, index: u64) -> ChainResult<Option<OracleValue>> {
            Ok(self.history.get(index as usize).cloned())
        }

        async fn submit(
            &self,
            price: f64,
            source: &str,
            status: &str,
            _signer: &dyn Signer,
        ) -> ChainResult<String> {
            self.submissions
                .lock()
                .push((price, source.to_string(), status.to_string()));
            Ok("0xabc".to_string())
        }
    }

    struct NoopSigner;

    #[async_trait]
    impl Signer for NoopSigner {
        async fn sign(&self, call: &[u8]) -> ChainResult<Vec<u8>> {
            Ok(call.to_vec())
        }
    }

    struct FixedSource {
        source: PriceSource,
        price: Option<f64>,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QuoteSource for FixedSource {
        fn source(&self) -> PriceSource {
            self.source
        }

        async fn fetch_price(&self) -> PriceFeedResult<f64> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.price.ok_or_else(|| PriceFeedError::Http {
                provider: self.source,
                message: "unreachable".to_string(),
            })
        }
    }

    fn fetcher(prices: [Option<f64>; 3]) -> (PriceFetcher, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let sources = PriceSource::ALL
            .iter()
            .zip(prices)
            .map(|(&source, price)| {
                Box::new(FixedSource {
                    source,
                    price,
                    attempts: Arc::clone(&attempts),
                }) as Box<dyn QuoteSource>
            })
            .collect();
        (PriceFetcher::new(sources), attempts)
    }

    fn value(raw: u128, updated_at: u64) -> OracleValue {
        OracleValue {
            value: raw,
            source: "Binance".to_string(),
            updated_at,
            status: "success".to_string(),
        }
    }

    #[tokio::test]
    async fn test_load_data_empty_chain() {
        let oracle = StubOracle::new(Vec::new());
        let data = assert_ok!(load_data(&oracle, 20).await);

        assert!(data.last.is_none());
        assert!(data.history.is_empty());
    }

    #[tokio::test]
    async fn test_load_data_limits_history() {
        let history: Vec<_> = (0..30).map(|i| value(i as u128, i)).collect();
        let oracle = StubOracle::new(history);

        let data = assert_ok!(load_data(&oracle, 20).await);

        assert_eq!(data.history.len(), 20);
        assert_eq!(data.history[0].updated_at, 29);
        assert_eq!(data.history[19].updated_at, 10);
        assert_eq!(data.last.unwrap().updated_at, 29);
    }

    #[tokio::test]
    async fn test_load_data_surfaces_read_errors() {
        let mut oracle = StubOracle::new(vec![value(1, 1)]);
        oracle.fail_reads = true;

        let err = assert_err!(load_data(&oracle, 20).await);
        assert_eq!(err.to_string(), "Failed to get last value: Connection closed");
    }

    #[tokio::test]
    async fn test_submit_uses_first_healthy_source() {
        let oracle = StubOracle::new(Vec::new());
        let (fetcher, attempts) = fetcher([None, Some(50_000.5), Some(1.0)]);

        let outcome = fetch_and_submit(&fetcher, &oracle, &NoopSigner, "warning")
            .await
            .unwrap();

        assert_eq!(outcome.block_hash, "0xabc");
        assert_eq!(outcome.quote.source(), PriceSource::Coinbase);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(
            oracle.submissions.lock().as_slice(),
            &[(50_000.5, "Coinbase".to_string(), "warning".to_string())]
        );
    }

    #[tokio::test]
    async fn test_nothing_submitted_when_all_sources_fail() {
        let oracle = StubOracle::new(Vec::new());
        let (fetcher, attempts) = fetcher([None, None, None]);

        let err = assert_err!(fetch_and_submit(&fetcher, &oracle, &NoopSigner, "success").await);

        assert!(format!("{err:#}").contains("All oracle sources failed"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(oracle.submissions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_submit_reloads_after_delay() {
        let oracle = StubOracle::new(vec![value(1, 1)]);
        let (fetcher, _) = fetcher([Some(2.0), None, None]);

        let started = std::time::Instant::now();
        let (outcome, data) = submit_and_reload(
            &fetcher,
            &oracle,
            &NoopSigner,
            "success",
            Duration::from_millis(50),
            20,
        )
        .await
        .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(outcome.status, "success");
        assert_eq!(data.history.len(), 1);
        assert_eq!(oracle.reads.load(Ordering::SeqCst), 1);
    }
}
