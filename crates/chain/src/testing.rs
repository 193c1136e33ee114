//! In-memory chain node for unit tests

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use roracle_core::{ChainError, ChainResult};
use crate::client::{ChainClient, Connector, ExtrinsicStatus};

/// Shared node state; every client opened by a [`FakeConnector`] sees it
#[derive(Default)]
pub struct FakeChain {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub storage_reads: AtomicUsize,
    unreachable: Mutex<HashSet<String>>,
    broken: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    storage: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    statuses: Mutex<Vec<ExtrinsicStatus>>,
    pub submitted: Mutex<Vec<Vec<u8>>>,
}

impl FakeChain {
    pub fn unreachable(&self, url: &str) {
        self.unreachable.lock().insert(url.to_string());
    }

    pub fn reachable(&self, url: &str) {
        self.unreachable.lock().remove(url);
    }

    /// Clients opened to `url` fail every request
    pub fn broken_reads(&self, url: &str) {
        self.broken.lock().insert(url.to_string());
    }

    pub fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().insert(url.to_string(), delay);
    }

    pub fn put_storage(&self, key: Vec<u8>, value: Vec<u8>) {
        self.storage.lock().insert(key, value);
    }

    /// Status updates replayed for the next submission
    pub fn set_statuses(&self, statuses: Vec<ExtrinsicStatus>) {
        *self.statuses.lock() = statuses;
    }
}

pub struct FakeConnector {
    chain: Arc<FakeChain>,
}

impl FakeConnector {
    pub fn new(chain: Arc<FakeChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Client = FakeClient;

    async fn connect(&self, url: &str) -> ChainResult<FakeClient> {
        self.chain.connects.fetch_add(1, Ordering::SeqCst);

        let delay = self.chain.delays.lock().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.chain.unreachable.lock().contains(url) {
            return Err(ChainError::ConnectionFailed(format!("{url}: connection refused")));
        }

        Ok(FakeClient {
            chain: Arc::clone(&self.chain),
            url: url.to_string(),
            connected: AtomicBool::new(true),
            broken: AtomicBool::new(self.chain.broken.lock().contains(url)),
        })
    }
}

pub struct FakeClient {
    chain: Arc<FakeChain>,
    url: String,
    connected: AtomicBool,
    broken: AtomicBool,
}

impl FakeClient {
    /// Requests start failing while the transport still looks alive
    pub fn break_reads(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// The socket went away underneath the client
    pub fn drop_transport(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> ChainResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ChainError::Disconnected);
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for FakeClient {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn block_number(&self) -> ChainResult<u64> {
        self.check()?;
        Ok(12345)
    }

    async fn storage(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        self.check()?;
        self.chain.storage_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain.storage.lock().get(key).cloned())
    }

    async fn submit_and_watch(
        &self,
        extrinsic: &[u8],
    ) -> ChainResult<BoxStream<'static, ExtrinsicStatus>> {
        self.check()?;
        self.chain.submitted.lock().push(extrinsic.to_vec());
        let statuses = std::mem::take(&mut *self.chain.statuses.lock());
        Ok(stream::iter(statuses).boxed())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.chain.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
