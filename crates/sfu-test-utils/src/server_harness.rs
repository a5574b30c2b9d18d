//! Test server harness for E2E testing
//!
//! Provides `TestSfuServer` for spawning a real signaling server in tests and
//! `SignalClient` for talking JSON-RPC to it over a WebSocket.

use crate::crypto_fixtures::TestAccount;
use common::chain::mock::MockChainClient;
use common::chain::ChainClient;
use common::types::ConferenceUser;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sfu_service::auth::SignatureAuthenticator;
use sfu_service::config::DEFAULT_MAX_PEERS;
use sfu_service::lifecycle::ConferenceLifecycle;
use sfu_service::media::{LoopbackEngine, MediaEngine};
use sfu_service::notifier::mock::RecordingNotifier;
use sfu_service::notifier::BillingNotifier;
use sfu_service::registry::ConferenceRegistry;
use sfu_service::routes::{build_routes, AppState};
use sfu_service::signaling::SignalContext;
use sfu_service::watchdog::WatchdogConfig;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// How long `SignalClient` waits for a response by default.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Knobs for `TestSfuServer::spawn_with`.
pub struct TestSfuOptions {
    pub max_peers: usize,
    pub watchdog: WatchdogConfig,
    /// Billing sink; a fresh `RecordingNotifier` when `None`.
    pub notifier: Option<Arc<dyn BillingNotifier>>,
}

impl Default for TestSfuOptions {
    fn default() -> Self {
        Self {
            max_peers: DEFAULT_MAX_PEERS,
            watchdog: WatchdogConfig {
                poll_interval: Duration::from_millis(50),
                max_lifetime: Duration::from_secs(1800),
            },
            notifier: None,
        }
    }
}

/// Test harness for spawning the SFU signaling server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_join_e2e() -> anyhow::Result<()> {
///     let account = TestAccount::new("client.near", 1)?;
///     let server = TestSfuServer::spawn(account.chain()).await?;
///     let mut client = SignalClient::connect(&server.ws_url()).await?;
///     // ...
///     Ok(())
/// }
/// ```
pub struct TestSfuServer {
    addr: SocketAddr,
    chain: Arc<MockChainClient>,
    recorder: Arc<RecordingNotifier>,
    registry: Arc<ConferenceRegistry>,
    engine: Arc<LoopbackEngine>,
    shutdown: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestSfuServer {
    /// Spawn a server with default options on a random local port.
    pub async fn spawn(chain: MockChainClient) -> Result<Self, anyhow::Error> {
        Self::spawn_with(chain, TestSfuOptions::default()).await
    }

    /// Spawn a server with custom options.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Authenticate joins against `chain`
    /// - Use the loopback media engine
    pub async fn spawn_with(
        chain: MockChainClient,
        options: TestSfuOptions,
    ) -> Result<Self, anyhow::Error> {
        let chain = Arc::new(chain);
        let recorder = Arc::new(RecordingNotifier::new());
        let notifier: Arc<dyn BillingNotifier> = match options.notifier {
            Some(notifier) => notifier,
            None => Arc::clone(&recorder) as Arc<dyn BillingNotifier>,
        };

        let shutdown = CancellationToken::new();
        let registry = Arc::new(ConferenceRegistry::new());
        let engine = Arc::new(LoopbackEngine::new());
        let lifecycle = Arc::new(ConferenceLifecycle::new(
            Arc::clone(&registry),
            notifier,
            options.watchdog,
            shutdown.child_token(),
        ));
        let chain_client: Arc<dyn ChainClient> = Arc::clone(&chain) as Arc<dyn ChainClient>;
        let media: Arc<dyn MediaEngine> = Arc::clone(&engine) as Arc<dyn MediaEngine>;
        let signal = Arc::new(SignalContext {
            authenticator: Arc::new(SignatureAuthenticator::new(chain_client)),
            engine: media,
            lifecycle,
            max_peers: options.max_peers,
        });

        let app = build_routes(AppState {
            signal,
            shutdown: shutdown.child_token(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let server_shutdown = shutdown.child_token();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
            if let Err(e) = server.await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            chain,
            recorder,
            registry,
            engine,
            shutdown,
            _handle: handle,
        })
    }

    /// WebSocket URL of the signaling endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn chain(&self) -> &Arc<MockChainClient> {
        &self.chain
    }

    /// Events seen by the default notifier. Empty when a custom one was given.
    pub fn recorder(&self) -> &Arc<RecordingNotifier> {
        &self.recorder
    }

    pub fn registry(&self) -> &Arc<ConferenceRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<LoopbackEngine> {
        &self.engine
    }

    /// Trigger service shutdown: every connection is closed.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestSfuServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self._handle.abort();
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON-RPC client over a signaling WebSocket.
///
/// Frames read while waiting for something else are buffered, so responses
/// and server pushes can be consumed in any order.
pub struct SignalClient {
    stream: WsStream,
    pending: VecDeque<Value>,
    next_id: u64,
    closed: bool,
}

impl SignalClient {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", url, e))?;
        Ok(Self {
            stream,
            pending: VecDeque::new(),
            next_id: 1,
            closed: false,
        })
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send frame: {}", e))
    }

    /// Send a request and wait for the response carrying its id.
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value, anyhow::Error> {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.send_text(&frame.to_string()).await?;

        if let Some(position) = self.pending.iter().position(|f| f["id"] == json!(id)) {
            if let Some(frame) = self.pending.remove(position) {
                return Ok(frame);
            }
        }
        loop {
            match self.read_frame(DEFAULT_REPLY_TIMEOUT).await? {
                Some(frame) if frame["id"] == json!(id) => return Ok(frame),
                Some(frame) => self.pending.push_back(frame),
                None => anyhow::bail!("connection closed before response to {method}"),
            }
        }
    }

    /// Send a notification (no id, no response on success).
    pub async fn notify(&mut self, method: &str, params: Value) -> Result<(), anyhow::Error> {
        let frame = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.send_text(&frame.to_string()).await
    }

    /// Sign `user` with `account` and send `join` with `sdp` as the offer.
    pub async fn join(
        &mut self,
        account: &TestAccount,
        user: &ConferenceUser,
        sdp: &str,
    ) -> Result<Value, anyhow::Error> {
        let params = account.join_params(user, sdp)?;
        self.request("join", params).await
    }

    /// Wait for the next server push of `method`.
    pub async fn next_notification(
        &mut self,
        method: &str,
        timeout: Duration,
    ) -> Result<Value, anyhow::Error> {
        if let Some(position) = self
            .pending
            .iter()
            .position(|f| f["method"] == method && f.get("id").is_none())
        {
            if let Some(frame) = self.pending.remove(position) {
                return Ok(frame);
            }
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.read_frame(remaining).await? {
                Some(frame) if frame["method"] == method && frame.get("id").is_none() => {
                    return Ok(frame)
                }
                Some(frame) => self.pending.push_back(frame),
                None => anyhow::bail!("connection closed while waiting for {method}"),
            }
        }
    }

    /// Next frame of any kind, buffered first.
    pub async fn next_frame(&mut self, timeout: Duration) -> Result<Option<Value>, anyhow::Error> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        self.read_frame(timeout).await
    }

    /// Wait until the server closes the connection. Frames read meanwhile
    /// stay buffered.
    pub async fn wait_closed(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.closed {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.read_frame(remaining).await {
                Ok(Some(frame)) => self.pending.push_back(frame),
                Ok(None) => return true,
                Err(_) => return self.closed,
            }
        }
        true
    }

    /// Close from the client side.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }

    /// Read one text frame. `Ok(None)` once the connection is closed.
    async fn read_frame(&mut self, timeout: Duration) -> Result<Option<Value>, anyhow::Error> {
        if self.closed {
            return Ok(None);
        }
        loop {
            let message = tokio::time::timeout(timeout, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for a frame"))?;
            match message {
                Some(Ok(Message::Text(text))) => {
                    let frame = serde_json::from_str(&text)
                        .map_err(|e| anyhow::anyhow!("Server sent invalid JSON: {}", e))?;
                    return Ok(Some(frame));
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    self.closed = true;
                    return Ok(None);
                }
                Some(Ok(_)) => {}
            }
        }
    }
}
