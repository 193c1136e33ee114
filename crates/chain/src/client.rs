//! Transport seams between the connection manager and a chain node

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use roracle_core::ChainResult;

/// Which configured endpoint a connection is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Primary,
    Fallback,
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Primary => "primary",
            Endpoint::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lifecycle notifications for a submitted extrinsic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtrinsicStatus {
    Future,
    Ready,
    Broadcast(Vec<String>),
    InBlock(String),
    Retracted(String),
    FinalityTimeout(String),
    Finalized(String),
    Usurped(String),
    Dropped,
    Invalid,
}

impl ExtrinsicStatus {
    /// Parse an `author_extrinsicUpdate` payload
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(status) = value.as_str() {
            return match status {
                "future" => Some(ExtrinsicStatus::Future),
                "ready" => Some(ExtrinsicStatus::Ready),
                "dropped" => Some(ExtrinsicStatus::Dropped),
                "invalid" => Some(ExtrinsicStatus::Invalid),
                _ => None,
            };
        }

        let (kind, payload) = value.as_object()?.iter().next()?;
        let hash = || payload.as_str().map(str::to_string);

        match kind.as_str() {
            "broadcast" => {
                let peers = payload
                    .as_array()?
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect();
                Some(ExtrinsicStatus::Broadcast(peers))
            }
            "inBlock" => hash().map(ExtrinsicStatus::InBlock),
            "retracted" => hash().map(ExtrinsicStatus::Retracted),
            "finalityTimeout" => hash().map(ExtrinsicStatus::FinalityTimeout),
            "finalized" => hash().map(ExtrinsicStatus::Finalized),
            "usurped" => hash().map(ExtrinsicStatus::Usurped),
            _ => None,
        }
    }

    /// Block hash once the extrinsic is included
    pub fn inclusion_hash(&self) -> Option<&str> {
        match self {
            ExtrinsicStatus::InBlock(hash) | ExtrinsicStatus::Finalized(hash) => Some(hash),
            _ => None,
        }
    }

    /// The node will send nothing further and the extrinsic was not included
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            ExtrinsicStatus::Dropped
                | ExtrinsicStatus::Invalid
                | ExtrinsicStatus::Usurped(_)
                | ExtrinsicStatus::FinalityTimeout(_)
        )
    }
}

/// A live connection to a chain node
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    fn url(&self) -> &str;

    /// Transport-level liveness, no round trip
    fn is_connected(&self) -> bool;

    /// Current best block number
    async fn block_number(&self) -> ChainResult<u64>;

    /// Raw storage value at `key`, `None` when the key is absent
    async fn storage(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>>;

    /// Submit a signed extrinsic and stream its status updates
    async fn submit_and_watch(
        &self,
        extrinsic: &[u8],
    ) -> ChainResult<BoxStream<'static, ExtrinsicStatus>>;

    /// Release the underlying transport
    async fn disconnect(&self);
}

/// Opens clients; resolves once the node is ready for requests
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: ChainClient;

    async fn connect(&self, url: &str) -> ChainResult<Self::Client>;
}
