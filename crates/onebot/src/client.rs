//! Maintains one logical connection to the upstream OneBot WebSocket and
//! exposes event emission plus request/response RPC.
//!
//! Grounded in the teacher's `OneBotClient` (`mneme_onebot::client`):
//! the `tokio::select!` read/write loop and the access-token handling carry
//! over, but the reconnect policy is generalized from a fixed-then-
//! exponential backoff with a `MAX_RETRIES` circuit breaker to a uniform
//! random delay in `[reconnect_min_ms, reconnect_max_ms]` that never gives
//! up while `reconnect` stays enabled, and the pending-message queue is
//! replaced by a pending RPC table keyed by `echo`.

use broker_core::UpstreamError;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

use crate::wire::{UpstreamEvent, UpstreamFrame, UpstreamResponse};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub access_token: Option<String>,
    pub reconnect: bool,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub request_timeout_ms: u64,
    pub auto_wait_open: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:6700".to_string(),
            access_token: None,
            reconnect: true,
            reconnect_min_ms: 1000,
            reconnect_max_ms: 15000,
            request_timeout_ms: 15000,
            auto_wait_open: true,
        }
    }
}

enum Command {
    Call {
        action: String,
        params: Value,
        timeout: Duration,
        respond_to: oneshot::Sender<Result<UpstreamResponse, UpstreamError>>,
    },
    Timeout(String),
    Close,
}

/// One logical upstream connection, auto-reconnecting while `reconnect` is
/// enabled on the config it was built with.
pub struct UpstreamClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
    open_notify: Arc<Notify>,
    auto_wait_open: bool,
    default_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> (Self, mpsc::Receiver<UpstreamEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(256);
        let connected = Arc::new(AtomicBool::new(false));
        let open_notify = Arc::new(Notify::new());
        let default_timeout = Duration::from_millis(config.request_timeout_ms);
        let auto_wait_open = config.auto_wait_open;

        let task_connected = connected.clone();
        let task_notify = open_notify.clone();
        let task_cmd_tx = cmd_tx.clone();
        tokio::spawn(run_connection_loop(
            config,
            cmd_rx,
            event_tx,
            task_connected,
            task_notify,
            task_cmd_tx,
        ));

        (
            Self {
                cmd_tx,
                connected,
                open_notify,
                auto_wait_open,
                default_timeout,
            },
            event_rx,
        )
    }

    pub fn is_open(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Suspends until the connection is open or `timeout` elapses.
    pub async fn wait_open(&self, timeout: Duration) -> Result<(), UpstreamError> {
        if self.is_open() {
            return Ok(());
        }
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.open_notify.notified();
                if self.is_open() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .map_err(|_| UpstreamError::Timeout {
            action: "wait_open".to_string(),
        })
    }

    /// Issue a request/response action call. Fails with `NotOpen` if the
    /// socket is closed and `auto_wait_open` is disabled on this client's
    /// config; fails with `Timeout` if no response arrives in time.
    pub async fn call(
        &self,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        if !self.is_open() {
            if self.auto_wait_open {
                self.wait_open(timeout).await?;
            } else {
                return Err(UpstreamError::NotOpen);
            }
        }

        let (respond_to, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Call {
                action: action.to_string(),
                params,
                timeout,
                respond_to,
            })
            .map_err(|_| UpstreamError::NotOpen)?;

        rx.await.unwrap_or(Err(UpstreamError::Closed {
            code: None,
            reason: "connection task stopped".to_string(),
        }))
    }

    /// Suppresses reconnect and terminates the socket.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

enum ConnectionEnd {
    ManualClose,
    PeerClosed { code: Option<u16>, reason: String },
    TransportError,
}

async fn run_connection_loop(
    config: UpstreamConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    connected: Arc<AtomicBool>,
    open_notify: Arc<Notify>,
    cmd_tx: mpsc::UnboundedSender<Command>,
) {
    loop {
        let url = match build_request_url(&config) {
            Ok(u) => u,
            Err(e) => {
                tracing::error!("invalid upstream url {}: {e}", config.url);
                return;
            }
        };

        tracing::info!("connecting to upstream at {}", mask_query(&url));
        let request = match build_client_request(&url, config.access_token.as_deref()) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("failed to build upstream handshake request: {e}");
                return;
            }
        };

        let end = match connect_async(request).await {
            Ok((stream, _)) => {
                tracing::info!("connected to upstream");
                connected.store(true, Ordering::Relaxed);
                open_notify.notify_waiters();
                let end = handle_open_connection(stream, &mut cmd_rx, &event_tx, &cmd_tx).await;
                connected.store(false, Ordering::Relaxed);
                open_notify.notify_waiters();
                end
            }
            Err(e) => {
                tracing::warn!("failed to connect to upstream: {e}");
                ConnectionEnd::TransportError
            }
        };

        if matches!(end, ConnectionEnd::ManualClose) || !config.reconnect {
            return;
        }

        let delay = reconnect_delay(config.reconnect_min_ms, config.reconnect_max_ms);
        tracing::info!("reconnecting to upstream in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Close) | None => return,
                    Some(Command::Call { respond_to, .. }) => {
                        let _ = respond_to.send(Err(UpstreamError::NotOpen));
                    }
                    Some(Command::Timeout(_)) => {}
                }
            }
        }
    }
}

type PendingTable = HashMap<String, (String, oneshot::Sender<Result<UpstreamResponse, UpstreamError>>)>;

async fn handle_open_connection(
    stream: WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::Sender<UpstreamEvent>,
    cmd_tx: &mpsc::UnboundedSender<Command>,
) -> ConnectionEnd {
    let (mut write, mut read) = stream.split();
    let mut pending: PendingTable = HashMap::new();
    let mut ping_interval = tokio::time::interval(Duration::from_secs(30));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.tick().await;

    let end = loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    break ConnectionEnd::TransportError;
                }
            }

            maybe_msg = read.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_incoming_text(&text, &mut pending, event_tx).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                            None => (None, String::new()),
                        };
                        break ConnectionEnd::PeerClosed { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("upstream transport error: {e}");
                        break ConnectionEnd::TransportError;
                    }
                    None => break ConnectionEnd::TransportError,
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Call { action, params, timeout, respond_to }) => {
                        let echo = Uuid::new_v4().to_string();
                        let frame = UpstreamFrame { action: action.clone(), params, echo: echo.clone() };
                        let payload = match serde_json::to_string(&frame) {
                            Ok(p) => p,
                            Err(e) => {
                                let _ = respond_to.send(Err(UpstreamError::Transport(e.to_string())));
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(payload)).await {
                            let _ = respond_to.send(Err(UpstreamError::Transport(e.to_string())));
                            continue;
                        }
                        pending.insert(echo.clone(), (action, respond_to));
                        let timer_tx = cmd_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(timeout).await;
                            let _ = timer_tx.send(Command::Timeout(echo));
                        });
                    }
                    Some(Command::Timeout(echo)) => {
                        if let Some((action, sender)) = pending.remove(&echo) {
                            let _ = sender.send(Err(UpstreamError::Timeout { action }));
                        }
                    }
                    Some(Command::Close) => {
                        let _ = write.send(Message::Close(None)).await;
                        break ConnectionEnd::ManualClose;
                    }
                    None => break ConnectionEnd::ManualClose,
                }
            }
        }
    };

    let (code, reason) = match &end {
        ConnectionEnd::PeerClosed { code, reason } => (*code, reason.clone()),
        ConnectionEnd::ManualClose => (None, "manual close".to_string()),
        ConnectionEnd::TransportError => (None, "transport error".to_string()),
    };
    for (_, (_, sender)) in pending.drain() {
        let _ = sender.send(Err(UpstreamError::Closed {
            code,
            reason: reason.clone(),
        }));
    }

    end
}

async fn handle_incoming_text(
    text: &str,
    pending: &mut PendingTable,
    event_tx: &mpsc::Sender<UpstreamEvent>,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            tracing::debug!("unparseable upstream frame, discarding: {text}");
            return;
        }
    };

    if let Some(echo) = value.get("echo").and_then(Value::as_str) {
        let Some((_, sender)) = pending.remove(echo) else {
            tracing::debug!("response with unknown echo {echo}, discarding");
            return;
        };
        match serde_json::from_value::<UpstreamResponse>(value) {
            Ok(resp) if resp.is_ok() => {
                let _ = sender.send(Ok(resp));
            }
            Ok(resp) => {
                let message = resp
                    .message
                    .filter(|m| !m.is_empty())
                    .or(resp.wording)
                    .unwrap_or_else(|| "upstream action failed".to_string());
                let _ = sender.send(Err(UpstreamError::Application {
                    retcode: resp.retcode,
                    message,
                }));
            }
            Err(e) => {
                let _ = sender.send(Err(UpstreamError::Transport(e.to_string())));
            }
        }
        return;
    }

    if value.get("post_type").is_some() {
        match serde_json::from_value::<UpstreamEvent>(value) {
            Ok(event) => {
                let _ = event_tx.send(event).await;
            }
            Err(e) => {
                tracing::debug!("failed to decode upstream event: {e}");
            }
        }
        return;
    }

    // Heartbeat-shaped frames with nonstandard fields fail both parses;
    // downgraded to debug so they don't drown real protocol errors.
    tracing::debug!("unrecognized upstream frame: {text}");
}

fn build_request_url(config: &UpstreamConfig) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&config.url)?;
    if let Some(token) = &config.access_token {
        if !url.query_pairs().any(|(k, _)| k == "access_token") {
            url.query_pairs_mut().append_pair("access_token", token);
        }
    }
    Ok(url)
}

fn build_client_request(
    url: &Url,
    access_token: Option<&str>,
) -> anyhow::Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url.as_str().into_client_request()?;
    if let Some(token) = access_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        request.headers_mut().insert("Authorization", value);
    }
    Ok(request)
}

fn mask_query(url: &Url) -> String {
    let mut masked = url.clone();
    masked.set_query(None);
    masked.to_string()
}

fn reconnect_delay(min_ms: u64, max_ms: u64) -> Duration {
    let min_ms = min_ms.min(max_ms);
    let delay_ms = if min_ms >= max_ms {
        min_ms
    } else {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    };
    Duration::from_millis(delay_ms)
}
