//! Chain access for the R-Oracle client
//!
//! Features:
//! - JSON-RPC over WebSocket with request/subscription routing
//! - Single shared connection, primary endpoint with trusted fallback
//! - Health probe before committing to the primary, reconnect on loss
//! - Oracle pallet reads and signed value submission

pub mod client;
pub mod connection;
pub mod pallet;
pub mod rpc;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ChainClient, Connector, Endpoint, ExtrinsicStatus};
pub use connection::{ChainConnection, ConnectionHandle, ConnectionStatus, Endpoints};
pub use pallet::{encode_submit_call, OracleApi, PalletClient, RemoteSigner, Signer};
pub use rpc::{WsConnector, WsRpcClient};
