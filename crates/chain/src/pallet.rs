//! Oracle pallet access: storage reads and value submission

use async_trait::async_trait;
use futures::StreamExt;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use roracle_core::{scale_price, ChainError, ChainResult, OracleRecord, OracleValue};
use crate::client::{ChainClient, Connector};
use crate::connection::{ChainConnection, ConnectionHandle};
use crate::storage::{storage_map_key, storage_value_key};

const LAST_VALUE: &str = "LastValue";
const HISTORY: &str = "History";
const HISTORY_INDEX: &str = "HistoryIndex";

/// `submit_oracle_value` is the pallet's first call
pub const SUBMIT_ORACLE_VALUE_CALL_INDEX: u8 = 0;

/// Produces signed extrinsics for encoded calls
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, call: &[u8]) -> ChainResult<Vec<u8>>;
}

/// The oracle operations the client relies on
#[async_trait]
pub trait OracleApi: Send + Sync {
    async fn read_last(&self) -> ChainResult<Option<OracleValue>>;

    /// Number of entries ever written to history
    async fn read_history_index(&self) -> ChainResult<u64>;

    async fn read_history_at(&self, index: u64) -> ChainResult<Option<OracleValue>>;

    /// Submit a price; resolves with the hash of the including block
    async fn submit(
        &self,
        price: f64,
        source: &str,
        status: &str,
        signer: &dyn Signer,
    ) -> ChainResult<String>;

    /// The newest `limit` entries, most recent first
    async fn history(&self, limit: u64) -> ChainResult<Vec<OracleValue>> {
        let read = async {
            let count = self.read_history_index().await?;
            let start = count.saturating_sub(limit);

            let mut history = Vec::with_capacity((count - start) as usize);
            for index in start..count {
                if let Some(value) = self.read_history_at(index).await? {
                    history.push(value);
                }
            }

            history.reverse();
            Ok::<_, ChainError>(history)
        };

        read.await.map_err(|e| ChainError::during("get history", e))
    }
}

/// SCALE-encoded `submit_oracle_value(value, source, status)` call
pub fn encode_submit_call(pallet_index: u8, value: u128, source: &str, status: &str) -> Vec<u8> {
    let mut call = vec![pallet_index, SUBMIT_ORACLE_VALUE_CALL_INDEX];
    (value, source.as_bytes().to_vec(), status.as_bytes().to_vec()).encode_to(&mut call);
    call
}

fn decode_record(bytes: &[u8]) -> ChainResult<OracleValue> {
    OracleRecord::decode(&mut &bytes[..])
        .map(OracleValue::from)
        .map_err(|e| ChainError::Decode(format!("oracle record: {e}")))
}

/// Oracle pallet client on top of the shared connection
pub struct PalletClient<C: Connector> {
    connection: Arc<ChainConnection<C>>,
    pallet_name: String,
    pallet_index: u8,
}

impl<C: Connector> PalletClient<C> {
    /// Connect and verify the node runs the oracle pallet.
    ///
    /// Genesis always writes `HistoryIndex`, so its absence means the
    /// runtime has no such pallet under `pallet_name`.
    pub async fn connect(
        connection: Arc<ChainConnection<C>>,
        pallet_name: impl Into<String>,
        pallet_index: u8,
    ) -> ChainResult<Self> {
        let client = Self {
            connection,
            pallet_name: pallet_name.into(),
            pallet_index,
        };

        let handle = client.connection.get_connection().await?;
        let key = storage_value_key(&client.pallet_name, HISTORY_INDEX);
        if handle.client().storage(&key).await?.is_none() {
            error!("{}.{} missing on {}", client.pallet_name, HISTORY_INDEX, handle.url());
            return Err(ChainError::PalletMissing(format!(
                "no {}.{} storage on {}",
                client.pallet_name,
                HISTORY_INDEX,
                handle.url()
            )));
        }

        info!("Oracle pallet {} found on {}", client.pallet_name, handle.url());
        Ok(client)
    }

    pub fn connection(&self) -> &Arc<ChainConnection<C>> {
        &self.connection
    }

    async fn handle(&self) -> ChainResult<ConnectionHandle<C::Client>> {
        self.connection.get_connection().await
    }

    async fn read_raw(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        self.handle().await?.client().storage(key).await
    }
}

#[async_trait]
impl<C: Connector> OracleApi for PalletClient<C> {
    async fn read_last(&self) -> ChainResult<Option<OracleValue>> {
        let key = storage_value_key(&self.pallet_name, LAST_VALUE);
        let read = async {
            match self.read_raw(&key).await? {
                Some(bytes) => decode_record(&bytes).map(Some),
                None => Ok(None),
            }
        };

        read.await.map_err(|e| ChainError::during("get last value", e))
    }

    async fn read_history_index(&self) -> ChainResult<u64> {
        let key = storage_value_key(&self.pallet_name, HISTORY_INDEX);
        match self.read_raw(&key).await? {
            Some(bytes) => u64::decode(&mut &bytes[..])
                .map_err(|e| ChainError::Decode(format!("history index: {e}"))),
            None => Ok(0),
        }
    }

    async fn read_history_at(&self, index: u64) -> ChainResult<Option<OracleValue>> {
        let key = storage_map_key(&self.pallet_name, HISTORY, &index);
        match self.read_raw(&key).await? {
            Some(bytes) => decode_record(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn submit(
        &self,
        price: f64,
        source: &str,
        status: &str,
        signer: &dyn Signer,
    ) -> ChainResult<String> {
        let submit = async {
            let value = scale_price(price)?;
            let call = encode_submit_call(self.pallet_index, value, source, status);
            let extrinsic = signer.sign(&call).await?;

            let handle = self.handle().await?;
            let mut updates = handle.client().submit_and_watch(&extrinsic).await?;
            info!("Submitted oracle value {} from {} ({})", value, source, status);

            while let Some(update) = updates.next().await {
                if let Some(hash) = update.inclusion_hash() {
                    info!("Oracle value included in block {}", hash);
                    return Ok(hash.to_string());
                }
                if update.is_terminal_failure() {
                    return Err(ChainError::Extrinsic(format!("rejected: {update:?}")));
                }
                debug!("Extrinsic status: {:?}", update);
            }

            Err(ChainError::Extrinsic("status stream ended before inclusion".to_string()))
        };

        submit.await.map_err(|e| {
            error!("Error submitting oracle value: {}", e);
            ChainError::during("submit oracle value", e)
        })
    }
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    call: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    extrinsic: String,
}

/// Delegates signing to an external service holding the account keys.
///
/// Protocol: `POST {url}` with `{"call": "0x…"}`, answered by
/// `{"extrinsic": "0x…"}`.
#[derive(Debug, Clone)]
pub struct RemoteSigner {
    url: String,
    client: reqwest::Client,
}

impl RemoteSigner {
    pub fn new(url: impl Into<String>, timeout: Duration) -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    async fn sign(&self, call: &[u8]) -> ChainResult<Vec<u8>> {
        let call = format!("0x{}", hex::encode(call));
        let response = self
            .client
            .post(&self.url)
            .json(&SignRequest { call: &call })
            .send()
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Signing(format!("signer returned status {status}")));
        }

        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        hex::decode(signed.extrinsic.trim_start_matches("0x"))
            .map_err(|e| ChainError::Signing(format!("invalid extrinsic hex: {e}")))
    }
}
