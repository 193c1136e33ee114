//! Shared chain connection with primary/fallback failover
//!
//! One handle is cached and handed to every caller while its transport is
//! alive. Acquiring a new one is single-flight: the first caller stores a
//! shared future in the state and every concurrent caller awaits that same
//! future instead of starting another connect sequence.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use roracle_core::{ChainError, ChainResult, ChainSettings};
use crate::client::{ChainClient, Connector, Endpoint};
use crate::rpc::WsConnector;

/// Primary and fallback node URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub primary: String,
    pub fallback: String,
}

impl Endpoints {
    pub fn url(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Primary => &self.primary,
            Endpoint::Fallback => &self.fallback,
        }
    }
}

/// A connected client and the endpoint it is bound to
pub struct ConnectionHandle<T> {
    client: Arc<T>,
    endpoint: Endpoint,
}

impl<T: ChainClient> ConnectionHandle<T> {
    fn new(client: T, endpoint: Endpoint) -> Self {
        Self {
            client: Arc::new(client),
            endpoint,
        }
    }

    pub fn client(&self) -> &T {
        &self.client
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn url(&self) -> &str {
        self.client.url()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Both handles share the same underlying client
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.client, &other.client)
    }
}

impl<T> Clone for ConnectionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            endpoint: self.endpoint,
        }
    }
}

impl<T: ChainClient> fmt::Debug for ConnectionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("endpoint", &self.endpoint)
            .field("url", &self.url())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected(Endpoint),
}

type ConnectAttempt<T> = Shared<BoxFuture<'static, ChainResult<ConnectionHandle<T>>>>;

struct ConnectionState<T> {
    handle: Option<ConnectionHandle<T>>,
    in_flight: Option<ConnectAttempt<T>>,
}

/// Process-wide connection manager
pub struct ChainConnection<C: Connector> {
    connector: Arc<C>,
    endpoints: Endpoints,
    probe_timeout: Duration,
    state: Mutex<ConnectionState<C::Client>>,
}

impl ChainConnection<WsConnector> {
    pub fn from_settings(settings: &ChainSettings) -> Self {
        Self::new(
            WsConnector::new(settings.request_timeout()),
            Endpoints {
                primary: settings.primary_rpc.clone(),
                fallback: settings.fallback_rpc.clone(),
            },
            settings.probe_timeout(),
        )
    }
}

impl<C: Connector> ChainConnection<C> {
    pub fn new(connector: C, endpoints: Endpoints, probe_timeout: Duration) -> Self {
        Self {
            connector: Arc::new(connector),
            endpoints,
            probe_timeout,
            state: Mutex::new(ConnectionState {
                handle: None,
                in_flight: None,
            }),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = self.state.lock();
        match (&state.handle, &state.in_flight) {
            (Some(handle), _) if handle.is_connected() => ConnectionStatus::Connected(handle.endpoint),
            (_, Some(_)) => ConnectionStatus::Connecting,
            _ => ConnectionStatus::Disconnected,
        }
    }

    /// Cached handle, if any, without connecting
    pub fn current(&self) -> Option<ConnectionHandle<C::Client>> {
        self.state.lock().handle.clone()
    }

    /// Return the live handle, connecting first if there is none
    pub async fn get_connection(&self) -> ChainResult<ConnectionHandle<C::Client>> {
        let attempt = {
            let mut state = self.state.lock();

            if let Some(handle) = &state.handle {
                if handle.is_connected() {
                    return Ok(handle.clone());
                }
                debug!("Cached connection to {} is closed", handle.url());
                state.handle = None;
            }

            match &state.in_flight {
                Some(attempt) => attempt.clone(),
                None => {
                    let attempt = Self::establish(
                        Arc::clone(&self.connector),
                        self.endpoints.clone(),
                        self.probe_timeout,
                    )
                    .boxed()
                    .shared();
                    state.in_flight = Some(attempt.clone());
                    attempt
                }
            }
        };

        let result = attempt.clone().await;

        // Whichever waiter gets here first settles the attempt
        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|f| f.ptr_eq(&attempt)) {
            state.in_flight = None;
            if let Ok(handle) = &result {
                state.handle = Some(handle.clone());
            }
        }

        result
    }

    /// Like [`get_connection`](Self::get_connection), but verifies the cached
    /// handle with a round trip and reconnects if it fails
    pub async fn ensure_connection(&self) -> ChainResult<ConnectionHandle<C::Client>> {
        if let Some(handle) = self.current() {
            if handle.is_connected() {
                match handle.client().block_number().await {
                    Ok(_) => return Ok(handle),
                    Err(e) => {
                        warn!("Connection lost, reconnecting... ({})", e);
                        self.release(&handle).await;
                    }
                }
            }
        }

        self.get_connection().await
    }

    /// Release the transport and forget the cached handle.
    ///
    /// A pending connect attempt is abandoned too, so the next call starts a
    /// fresh one. If that attempt already produced a client it is closed.
    pub async fn disconnect(&self) {
        let (handle, attempt) = {
            let mut state = self.state.lock();
            (state.handle.take(), state.in_flight.take())
        };

        let orphan = attempt
            .and_then(|attempt| attempt.peek().cloned())
            .and_then(Result::ok)
            .filter(|orphan| handle.as_ref().map_or(true, |h| !h.ptr_eq(orphan)));

        if let Some(handle) = handle {
            info!("Disconnecting from {} RPC {}", handle.endpoint, handle.url());
            handle.client().disconnect().await;
        }
        if let Some(orphan) = orphan {
            debug!("Closing unclaimed connection to {}", orphan.url());
            orphan.client().disconnect().await;
        }
    }

    /// Tear down `stale` only if it is still the cached handle
    async fn release(&self, stale: &ConnectionHandle<C::Client>) {
        let taken = {
            let mut state = self.state.lock();
            match &state.handle {
                Some(current) if current.ptr_eq(stale) => state.handle.take(),
                _ => None,
            }
        };
        if let Some(handle) = taken {
            handle.client().disconnect().await;
        }
    }

    async fn establish(
        connector: Arc<C>,
        endpoints: Endpoints,
        probe_timeout: Duration,
    ) -> ChainResult<ConnectionHandle<C::Client>> {
        if Self::probe(&connector, &endpoints.primary, probe_timeout).await {
            let client = connector
                .connect(&endpoints.primary)
                .await
                .map_err(connect_failed)?;
            info!("Connected to primary RPC {}", endpoints.primary);
            return Ok(ConnectionHandle::new(client, Endpoint::Primary));
        }

        // The fallback is trusted without a probe
        warn!("Primary RPC failed, switching to fallback {}", endpoints.fallback);
        let client = connector
            .connect(&endpoints.fallback)
            .await
            .map_err(connect_failed)?;
        info!("Connected to fallback RPC {}", endpoints.fallback);
        Ok(ConnectionHandle::new(client, Endpoint::Fallback))
    }

    /// Open a throwaway connection and read the block number through it
    async fn probe(connector: &C, url: &str, timeout: Duration) -> bool {
        let check = async {
            let client = connector.connect(url).await?;
            let block = client.block_number().await;
            client.disconnect().await;
            block
        };

        match tokio::time::timeout(timeout, check).await {
            Ok(Ok(block)) => {
                debug!("RPC {} healthy at block {}", url, block);
                true
            }
            Ok(Err(e)) => {
                error!("RPC health check failed for {}: {}", url, e);
                false
            }
            Err(_) => {
                error!("RPC health check for {} timed out after {:?}", url, timeout);
                false
            }
        }
    }
}

fn connect_failed(err: ChainError) -> ChainError {
    match err {
        ChainError::ConnectionFailed(_) => err,
        other => ChainError::ConnectionFailed(other.to_string()),
    }
}
