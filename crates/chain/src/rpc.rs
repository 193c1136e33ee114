//! JSON-RPC 2.0 client over a WebSocket
//!
//! A reader task owns the receiving half of the socket and routes every
//! message: responses go to the caller waiting on that request id,
//! notifications go to the subscription they belong to.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{BoxStream, Stream};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use roracle_core::{ChainError, ChainResult};
use crate::client::{ChainClient, Connector, ExtrinsicStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Server-assigned subscription id and its notification receiver
pub type Subscription = (String, mpsc::UnboundedReceiver<Value>);

enum Pending {
    Call(oneshot::Sender<ChainResult<Value>>),
    Subscribe(oneshot::Sender<ChainResult<Subscription>>),
}

#[derive(Debug, Deserialize)]
struct RpcMessage {
    id: Option<u64>,
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorObject>,
    method: Option<String>,
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcErrorObject {
    fn into_error(self) -> ChainError {
        match self.data {
            Some(data) => ChainError::Rpc(format!("{} ({}): {}", self.message, self.code, data)),
            None => ChainError::Rpc(format!("{} ({})", self.message, self.code)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: Value,
    #[serde(default)]
    result: Value,
}

/// Subscription ids are strings on current nodes, numbers on older ones
fn subscription_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a `0x`-prefixed hex quantity
fn parse_hex_u64(raw: &str) -> ChainResult<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16).map_err(|e| ChainError::Decode(format!("{raw:?}: {e}")))
}

fn decode_hex(raw: &str) -> ChainResult<Vec<u8>> {
    hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
        .map_err(|e| ChainError::Decode(format!("invalid hex: {e}")))
}

#[derive(Clone)]
struct Router {
    pending: Arc<DashMap<u64, Pending>>,
    subscriptions: Arc<DashMap<String, mpsc::UnboundedSender<Value>>>,
}

impl Router {
    fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            subscriptions: Arc::new(DashMap::new()),
        }
    }

    fn dispatch(&self, text: &str) {
        let message: RpcMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed RPC message: {}", e);
                return;
            }
        };

        if let Some(id) = message.id {
            let Some((_, pending)) = self.pending.remove(&id) else {
                debug!("Response for unknown request id {}", id);
                return;
            };
            let outcome = match message.error {
                Some(err) => Err(err.into_error()),
                None => Ok(message.result),
            };

            match pending {
                Pending::Call(tx) => {
                    let _ = tx.send(outcome);
                }
                Pending::Subscribe(tx) => {
                    // Register before handing back the id so no notification
                    // can arrive for an unknown subscription
                    let subscription = outcome.map(|id| {
                        let key = subscription_key(&id);
                        let (sub_tx, sub_rx) = mpsc::unbounded_channel();
                        self.subscriptions.insert(key.clone(), sub_tx);
                        (key, sub_rx)
                    });
                    let _ = tx.send(subscription);
                }
            }
            return;
        }

        if let (Some(method), Some(params)) = (message.method, message.params) {
            let key = subscription_key(&params.subscription);
            let delivered = self
                .subscriptions
                .get(&key)
                .map(|sub| sub.send(params.result).is_ok());

            match delivered {
                Some(true) => {}
                Some(false) => {
                    self.subscriptions.remove(&key);
                }
                None => debug!("{} notification for unknown subscription {}", method, key),
            }
        }
    }

    /// Fail everything still waiting; dropped senders surface as `Disconnected`
    fn close(&self) {
        self.pending.clear();
        self.subscriptions.clear();
    }
}

/// Chain node client speaking JSON-RPC over a WebSocket
pub struct WsRpcClient {
    url: String,
    next_id: Arc<AtomicU64>,
    sink: Arc<Mutex<WsSink>>,
    router: Router,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    request_timeout: Duration,
}

impl WsRpcClient {
    pub async fn connect(url: &str, request_timeout: Duration) -> ChainResult<Self> {
        info!("Connecting to {}", url);

        let (stream, _) = tokio::time::timeout(request_timeout, connect_async(url))
            .await
            .map_err(|_| ChainError::Timeout(format!("connection to {url}")))?
            .map_err(|e| ChainError::ConnectionFailed(format!("{url}: {e}")))?;

        let (sink, stream) = stream.split();
        let sink = Arc::new(Mutex::new(sink));
        let router = Router::new();
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(Self::read_loop(
            url.to_string(),
            stream,
            Arc::clone(&sink),
            router.clone(),
            Arc::clone(&connected),
        ));

        info!("Connected to {}", url);

        Ok(Self {
            url: url.to_string(),
            next_id: Arc::new(AtomicU64::new(1)),
            sink,
            router,
            connected,
            reader,
            request_timeout,
        })
    }

    async fn read_loop(
        url: String,
        mut stream: SplitStream<WsStream>,
        sink: Arc<Mutex<WsSink>>,
        router: Router,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => router.dispatch(&text),
                Ok(Message::Ping(data)) => {
                    let _ = sink.lock().await.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket {} closed by server", url);
                    break;
                }
                Err(e) => {
                    error!("WebSocket {} error: {}", url, e);
                    break;
                }
                _ => {}
            }
        }

        connected.store(false, Ordering::SeqCst);
        router.close();
    }

    async fn send(&self, id: u64, method: &str, params: Value) -> ChainResult<()> {
        if !self.is_connected() {
            return Err(ChainError::Disconnected);
        }

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("RPC -> {} #{}", method, id);

        self.sink
            .lock()
            .await
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| ChainError::Rpc(format!("{method}: {e}")))
    }

    async fn await_reply<T>(
        &self,
        id: u64,
        method: &str,
        rx: oneshot::Receiver<ChainResult<T>>,
    ) -> ChainResult<T> {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ChainError::Disconnected),
            Err(_) => {
                self.router.pending.remove(&id);
                Err(ChainError::Timeout(method.to_string()))
            }
        }
    }

    /// Plain request/response call
    pub async fn request(&self, method: &str, params: Value) -> ChainResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.router.pending.insert(id, Pending::Call(tx));

        if let Err(e) = self.send(id, method, params).await {
            self.router.pending.remove(&id);
            return Err(e);
        }

        self.await_reply(id, method, rx).await
    }

    /// Open a subscription; the receiver yields each notification's `result`
    pub async fn subscribe(&self, method: &str, params: Value) -> ChainResult<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.router.pending.insert(id, Pending::Subscribe(tx));

        if let Err(e) = self.send(id, method, params).await {
            self.router.pending.remove(&id);
            return Err(e);
        }

        let (key, notifications) = self.await_reply(id, method, rx).await?;
        debug!("{} subscribed as {}", method, key);
        Ok((key, notifications))
    }

    /// Guard that cancels subscription `key` with `method` when dropped
    fn unsubscribe_on_drop(&self, method: &'static str, key: String) -> Unsubscribe {
        Unsubscribe {
            method,
            key,
            router: self.router.clone(),
            sink: Arc::clone(&self.sink),
            next_id: Arc::clone(&self.next_id),
            connected: Arc::clone(&self.connected),
        }
    }
}

struct Unsubscribe {
    method: &'static str,
    key: String,
    router: Router,
    sink: Arc<Mutex<WsSink>>,
    next_id: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.router.subscriptions.remove(&self.key);

        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": self.method,
            "params": [self.key],
        });
        let sink = Arc::clone(&self.sink);
        let method = self.method;
        debug!("RPC -> {} #{}", method, id);

        runtime.spawn(async move {
            if let Err(e) = sink.lock().await.send(Message::Text(request.to_string())).await {
                debug!("{} failed: {}", method, e);
            }
        });
    }
}

/// Notification stream that holds its subscription open while alive
struct Watched<S> {
    inner: S,
    _unsubscribe: Unsubscribe,
}

impl<S: Stream + Unpin> Stream for Watched<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[async_trait]
impl ChainClient for WsRpcClient {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn block_number(&self) -> ChainResult<u64> {
        let header = self.request("chain_getHeader", json!([])).await?;
        let number = header
            .get("number")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Rpc("chain_getHeader returned no block number".into()))?;
        parse_hex_u64(number)
    }

    async fn storage(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        let key = format!("0x{}", hex::encode(key));
        match self.request("state_getStorage", json!([key])).await? {
            Value::Null => Ok(None),
            Value::String(data) => decode_hex(&data).map(Some),
            other => Err(ChainError::Decode(format!("unexpected storage payload: {other}"))),
        }
    }

    async fn submit_and_watch(
        &self,
        extrinsic: &[u8],
    ) -> ChainResult<BoxStream<'static, ExtrinsicStatus>> {
        let extrinsic = format!("0x{}", hex::encode(extrinsic));
        let (key, updates) = self
            .subscribe("author_submitAndWatchExtrinsic", json!([extrinsic]))
            .await?;
        let unsubscribe = self.unsubscribe_on_drop("author_unwatchExtrinsic", key);

        let statuses = UnboundedReceiverStream::new(updates).filter_map(|update| async move {
            let status = ExtrinsicStatus::from_value(&update);
            if status.is_none() {
                debug!("Unrecognised extrinsic status: {}", update);
            }
            status
        });

        Ok(Watched {
            inner: statuses.boxed(),
            _unsubscribe: unsubscribe,
        }
        .boxed())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("Closing {} failed: {}", self.url, e);
        }
        self.reader.abort();
        self.router.close();
        info!("Disconnected from {}", self.url);
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Opens [`WsRpcClient`]s with a shared request timeout
#[derive(Debug, Clone)]
pub struct WsConnector {
    request_timeout: Duration,
}

impl WsConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Client = WsRpcClient;

    async fn connect(&self, url: &str) -> ChainResult<WsRpcClient> {
        WsRpcClient::connect(url, self.request_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x1a").unwrap(), 26);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[tokio::test]
    async fn test_router_delivers_responses() {
        let router = Router::new();
        let (tx, rx) = oneshot::channel();
        router.pending.insert(7, Pending::Call(tx));

        router.dispatch(r#"{"jsonrpc":"2.0","id":7,"result":"0x2a"}"#);

        assert_eq!(rx.await.unwrap().unwrap(), json!("0x2a"));
        assert!(router.pending.is_empty());
    }

    #[tokio::test]
    async fn test_router_null_result() {
        let router = Router::new();
        let (tx, rx) = oneshot::channel();
        router.pending.insert(1, Pending::Call(tx));

        router.dispatch(r#"{"jsonrpc":"2.0","id":1,"result":null}"#);

        assert_eq!(rx.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_router_errors() {
        let router = Router::new();
        let (tx, rx) = oneshot::channel();
        router.pending.insert(3, Pending::Call(tx));

        router.dispatch(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":1010,"message":"Invalid Transaction","data":"Inability to pay some fees"}}"#,
        );

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("Invalid Transaction (1010)"));
    }

    #[tokio::test]
    async fn test_router_subscription_flow() {
        let router = Router::new();
        let (tx, rx) = oneshot::channel();
        router.pending.insert(5, Pending::Subscribe(tx));

        router.dispatch(r#"{"jsonrpc":"2.0","id":5,"result":"sub-1"}"#);
        router.dispatch(
            r#"{"jsonrpc":"2.0","method":"author_extrinsicUpdate","params":{"subscription":"sub-1","result":"ready"}}"#,
        );
        router.dispatch(
            r#"{"jsonrpc":"2.0","method":"author_extrinsicUpdate","params":{"subscription":"sub-1","result":{"inBlock":"0xbeef"}}}"#,
        );

        let (key, mut notifications) = rx.await.unwrap().unwrap();
        assert_eq!(key, "sub-1");
        assert_eq!(notifications.recv().await.unwrap(), json!("ready"));
        assert_eq!(notifications.recv().await.unwrap(), json!({"inBlock": "0xbeef"}));
    }

    #[tokio::test]
    async fn test_dropped_watch_unsubscribes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();

            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else {
                    continue;
                };
                let request: Value = serde_json::from_str(&text).unwrap();
                let id = request["id"].clone();
                let watch = request["method"] == "author_submitAndWatchExtrinsic";
                let _ = seen_tx.send(request);

                let reply = if watch { json!("sub-1") } else { json!(true) };
                ws.send(Message::Text(json!({"jsonrpc": "2.0", "id": id, "result": reply}).to_string()))
                    .await
                    .unwrap();
                if watch {
                    let update = json!({
                        "jsonrpc": "2.0",
                        "method": "author_extrinsicUpdate",
                        "params": {"subscription": "sub-1", "result": {"inBlock": "0xbeef"}},
                    });
                    ws.send(Message::Text(update.to_string())).await.unwrap();
                }
            }
        });

        let client = WsRpcClient::connect(&url, Duration::from_secs(5)).await.unwrap();
        let mut updates = client.submit_and_watch(&[0x01, 0x02]).await.unwrap();

        let first = updates.next().await.unwrap();
        assert_eq!(first.inclusion_hash(), Some("0xbeef"));
        assert_eq!(client.router.subscriptions.len(), 1);

        drop(updates);
        assert!(client.router.subscriptions.is_empty());

        let submitted = seen_rx.recv().await.unwrap();
        assert_eq!(submitted["params"], json!(["0x0102"]));

        let unwatch = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unwatch["method"], "author_unwatchExtrinsic");
        assert_eq!(unwatch["params"], json!(["sub-1"]));

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_router_close_fails_pending() {
        let router = Router::new();
        let (tx, rx) = oneshot::channel::<ChainResult<Value>>();
        router.pending.insert(9, Pending::Call(tx));

        router.close();

        assert!(rx.await.is_err());
    }
}
