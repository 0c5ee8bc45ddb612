use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::select;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::RelayError;
use crate::models::{Action, ResponseMessage};
use crate::responder::Responder;
use crate::websocket::connection::normalize_websocket_url;
use crate::websocket::message_handler::Dispatcher;
use crate::websocket::processor::{run_session, send_action, Session, SessionEnd};

/// Callback receiving every forwarded frame as the raw JSON string
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Counters for one client, across reconnects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub messages_received: u64,
    pub messages_forwarded: u64,
    pub reconnects: u64,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Connected,
    Stopped,
}

#[derive(Debug, Default)]
struct ConnectionState {
    connecting: bool,
    connected: bool,
    manual_disconnect: bool,
    /// Bumped for every supervisor spawned by `connect()`
    generation: u64,
    /// Cancels the running supervisor, its socket and its liveness timer
    shutdown: Option<CancellationToken>,
}

impl ConnectionState {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.shutdown.is_some()
    }
}

struct Inner {
    config: ClientConfig,
    dispatcher: Dispatcher,
    handler: MessageHandler,
    responder: Responder,
    state: Mutex<ConnectionState>,
    stats: Mutex<ConnectionStats>,
    phase: watch::Sender<Phase>,
}

/// Long-lived, auto-reconnecting subscription to the relay.
///
/// Cloning is cheap and clones share one connection. Call [`disconnect`]
/// to stop the background reconnect loop.
///
/// [`disconnect`]: RelayClient::disconnect
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<Inner>,
}

impl RelayClient {
    pub fn new<F>(config: ClientConfig, handler: F) -> Result<Self, RelayError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let responder = Responder::new(&config.api_url, &config.key, &config.secret)?;
        let dispatcher = Dispatcher::new(&config.key, config.buckets.clone(), config.unauthorized_policy);
        let (phase, _) = watch::channel(Phase::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                dispatcher,
                handler: Arc::new(handler),
                responder,
                state: Mutex::new(ConnectionState::default()),
                stats: Mutex::new(ConnectionStats::default()),
                phase,
            }),
        })
    }

    /// A client that drops every frame, useful when only `respond` is needed
    pub fn without_handler(config: ClientConfig) -> Result<Self, RelayError> {
        Self::new(config, |_| {})
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open the relay connection.
    ///
    /// Returns once the socket is open and the auth frame has been sent, or
    /// once the client is stopped. The relay's confirmation arrives later as
    /// an `authenticated` status. Only an unusable socket URL is an error;
    /// failed handshakes are retried every `reconnect_interval`.
    pub async fn connect(&self) -> Result<(), RelayError> {
        let url = normalize_websocket_url(&self.inner.config.socket_url)?;
        let mut phase = self.inner.phase.subscribe();

        {
            let mut state = self.inner.state.lock().await;
            if state.connected {
                return Ok(());
            }

            state.manual_disconnect = false;
            if state.shutdown.is_none() {
                state.generation += 1;
                state.connecting = true;
                let shutdown = CancellationToken::new();
                state.shutdown = Some(shutdown.clone());
                self.inner.phase.send_replace(Phase::Connecting);
                tokio::spawn(supervise(self.inner.clone(), url, state.generation, shutdown));
            }
        }

        let _ = phase
            .wait_for(|p| matches!(p, Phase::Connected | Phase::Stopped))
            .await;
        Ok(())
    }

    /// Close the connection and suppress reconnection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let mut state = self.inner.state.lock().await;
        state.manual_disconnect = true;
        state.connected = false;
        state.connecting = false;

        if let Some(shutdown) = state.shutdown.take() {
            info!("Manual disconnect");
            shutdown.cancel();
        }
        self.inner.phase.send_replace(Phase::Stopped);
    }

    pub async fn is_connecting(&self) -> bool {
        self.inner.state.lock().await.connecting
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.connected
    }

    pub async fn stats(&self) -> ConnectionStats {
        self.inner.stats.lock().await.clone()
    }

    /// Submit a response for a relayed request; failures are logged
    pub async fn respond(&self, response: &ResponseMessage) {
        self.inner.responder.respond(response).await;
    }

    pub fn responder(&self) -> Responder {
        self.inner.responder.clone()
    }
}

impl Inner {
    fn session(&self) -> Session<'_> {
        Session {
            dispatcher: &self.dispatcher,
            handler: &self.handler,
            stats: &self.stats,
            missing_ping_threshold: self.config.missing_ping_threshold,
        }
    }

    async fn mark_connected(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if !state.is_current(generation) {
            return;
        }
        state.connected = true;
        state.connecting = false;
        self.stats.lock().await.connected_since = Some(Utc::now());
        self.phase.send_replace(Phase::Connected);
    }

    async fn mark_closed(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if !state.is_current(generation) {
            return;
        }
        state.connected = false;
        state.connecting = false;
        self.stats.lock().await.connected_since = None;
        // callers of connect() now wait for the next open
        self.phase.send_replace(Phase::Connecting);
    }

    /// Returns false when this supervisor must not open another socket
    async fn mark_reconnecting(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        if !state.is_current(generation) || state.manual_disconnect {
            return false;
        }
        state.connecting = true;
        self.stats.lock().await.reconnects += 1;
        self.phase.send_replace(Phase::Connecting);
        true
    }

    async fn mark_stopped(&self, generation: u64, manual: bool) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return;
        }
        state.connected = false;
        state.connecting = false;
        state.shutdown = None;
        if manual {
            state.manual_disconnect = true;
        }
        self.stats.lock().await.connected_since = None;
        self.phase.send_replace(Phase::Stopped);
    }
}

/// Reconnect loop owning at most one socket at a time.
///
/// Each pass opens a socket, authenticates, runs the session to its end and
/// then waits `reconnect_interval` before the next pass. Cancelling
/// `shutdown` ends the loop from any of those points.
async fn supervise(inner: Arc<Inner>, url: Url, generation: u64, shutdown: CancellationToken) {
    let mut rejected = false;

    loop {
        // Open the socket, unless disconnect() wins the race
        info!("Connecting to relay at {}", url);
        let opened = select! {
            _ = shutdown.cancelled() => break,
            result = connect_async(url.clone()) => result,
        };

        match opened {
            Ok((ws_stream, response)) => {
                info!("WebSocket connected with status: {}", response.status());
                let (mut write, read) = ws_stream.split();

                // Authenticate before anything else goes out
                let auth = Action::Auth {
                    key: inner.config.key.clone(),
                    secret: inner.config.secret.clone(),
                };
                match send_action(&mut write, &auth).await {
                    Ok(()) => {
                        // connect() callers are released here
                        inner.mark_connected(generation).await;
                        let end = run_session(write, read, inner.session(), &shutdown).await;
                        inner.mark_closed(generation).await;

                        match end {
                            SessionEnd::Cancelled => break,
                            SessionEnd::Rejected => {
                                rejected = true;
                                break;
                            }
                            SessionEnd::Closed | SessionEnd::LivenessTimeout => {}
                        }
                    }
                    Err(e) => {
                        error!("Failed to send auth message: {}", e);
                        inner.mark_closed(generation).await;
                    }
                }
            }
            Err(e) => {
                error!("Failed to connect to relay: {}", e);
                inner.mark_closed(generation).await;
            }
        }

        // Wait out the reconnect interval, then try again
        info!("Connection closed, reconnecting in {:?}...", inner.config.reconnect_interval);
        select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(inner.config.reconnect_interval) => {}
        }
        if !inner.mark_reconnecting(generation).await {
            info!("Reconnect suppressed after manual disconnect");
            break;
        }
    }

    if rejected {
        warn!("Not reconnecting after rejected credentials for key {}", inner.config.key);
    }
    inner.mark_stopped(generation, rejected).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> ClientConfig {
        ClientConfig::new("key", "secret")
    }

    #[tokio::test]
    async fn new_client_is_idle() {
        let client = RelayClient::without_handler(config()).unwrap();
        assert!(!client.is_connected().await);
        assert!(!client.is_connecting().await);
        assert_eq!(client.stats().await, ConnectionStats::default());
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_harmless() {
        let client = RelayClient::without_handler(config()).unwrap();
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn invalid_socket_url_fails_connect() {
        let client = RelayClient::without_handler(config().with_socket_url("https://example.com/socket")).unwrap();
        assert!(matches!(client.connect().await, Err(RelayError::InvalidUrl(_))));
        assert!(!client.is_connecting().await);
    }

    #[tokio::test]
    async fn manual_disconnect_blocks_pending_reconnect() {
        let client = RelayClient::without_handler(config()).unwrap();
        {
            let mut state = client.inner.state.lock().await;
            state.generation = 1;
            state.shutdown = Some(CancellationToken::new());
        }
        assert!(client.inner.mark_reconnecting(1).await);
        assert_eq!(client.stats().await.reconnects, 1);

        client.inner.state.lock().await.manual_disconnect = true;
        assert!(!client.inner.mark_reconnecting(1).await);
        assert_eq!(client.stats().await.reconnects, 1);

        // a stale supervisor is refused too
        client.inner.state.lock().await.manual_disconnect = false;
        assert!(!client.inner.mark_reconnecting(0).await);
    }

    #[tokio::test]
    async fn disconnect_releases_pending_connect() {
        // Nothing listens here, so the supervisor keeps retrying
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = RelayClient::without_handler(
            config()
                .with_socket_url(format!("ws://127.0.0.1:{}/v1/socket", port))
                .with_reconnect_interval(Duration::from_millis(20)),
        )
        .unwrap();

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!client.is_connected().await);

        client.disconnect().await;
        let result = tokio::time::timeout(Duration::from_secs(5), pending).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert!(!client.is_connecting().await);
    }
}
