use crate::facade::{self, WhitelistArg};
use crate::types::{encode_envelope, WireClientEnvelope};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use broker_core::{CallKind, ClientEnvelope, Envelope, RpcRetryConfig, Whitelist};
use enrich::UpstreamCaller;
use futures_util::{SinkExt, StreamExt};
use onebot::{RetryClassifier, RetryConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct AppState {
    upstream: Arc<dyn UpstreamCaller>,
    whitelist: Arc<Whitelist>,
    broadcast_tx: broadcast::Sender<String>,
    retry: Arc<RetryConfig>,
    retry_enabled: bool,
    active_clients: Arc<AtomicUsize>,
    shutdown_notify: Arc<Notify>,
}

/// Downstream WebSocket server.
///
/// Accepts connections on `/ws`, sends a `welcome` envelope, tracks each
/// client's writer task, and fans broadcast envelopes out to all of them.
/// RPC (`invoke`/`sdk`) requests are whitelist-checked and proxied to the
/// upstream caller, with the result returned only to the requesting client.
///
/// Grounded in the teacher's `mneme_gateway::server` `AppState`-sharing +
/// split-socket axum-ws pattern, generalized from single-client
/// request/response to a tracked client set with broadcast fan-out.
///
/// Every field is a cheap handle (`Sender`/`Arc`/`String`), so the type is
/// `Clone`: a composition root keeps one clone for `broadcast`/`subscribe`
/// and consumes another with `start`.
#[derive(Clone)]
pub struct StreamServer {
    broadcast_tx: broadcast::Sender<String>,
    active_clients: Arc<AtomicUsize>,
    state: AppState,
    host: String,
    port: u16,
    server_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StreamServer {
    pub fn new(
        upstream: Arc<dyn UpstreamCaller>,
        whitelist: Whitelist,
        retry_config: RpcRetryConfig,
        host: &str,
        port: u16,
    ) -> Self {
        let (broadcast_tx, _rx) = broadcast::channel(256);
        let active_clients = Arc::new(AtomicUsize::new(0));
        let state = AppState {
            upstream,
            whitelist: Arc::new(whitelist),
            broadcast_tx: broadcast_tx.clone(),
            retry: Arc::new(RetryConfig {
                max_attempts: retry_config.max_attempts,
                interval: Duration::from_millis(retry_config.interval_ms),
            }),
            retry_enabled: retry_config.enabled,
            active_clients: active_clients.clone(),
            shutdown_notify: Arc::new(Notify::new()),
        };
        Self {
            broadcast_tx,
            active_clients,
            state,
            host: host.to_string(),
            port,
            server_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Number of currently-connected downstream clients.
    pub fn active_connections(&self) -> usize {
        self.active_clients.load(Ordering::Relaxed)
    }

    /// Subscribe to the raw broadcast stream of encoded envelopes. Exposed
    /// so a composition root (or a test) can observe what downstream
    /// clients would receive without opening a real WebSocket connection.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast_tx.subscribe()
    }

    /// Serialize `envelope` once and fan it out to every open client.
    /// Clients with no one listening (lagging/closed) are silently skipped;
    /// per-client send failures are the writer task's concern, not this
    /// call's.
    pub fn broadcast(&self, envelope: Envelope) {
        let frame = encode_envelope(envelope);
        let _ = self.broadcast_tx.send(frame);
    }

    /// Broadcasts a `shutdown` envelope to every connected client, waits for
    /// each connection's read loop to close (bounded by a short grace
    /// period), then stops the listener.
    pub async fn shutdown(&self, message: impl Into<String>) {
        self.broadcast(Envelope::Shutdown {
            message: message.into(),
        });
        self.state.shutdown_notify.notify_waiters();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.active_connections() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        if let Some(handle) = self.server_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Binds the listener and serves it in a spawned task. The task's
    /// `JoinHandle` is kept in `server_handle` (shared via `Arc` with any
    /// clone of this `StreamServer`), so a later call to `shutdown` on a
    /// clone held by the composition root can still abort it.
    pub fn start(self) {
        let app = Router::new()
            .route("/ws", get(ws_upgrade))
            .layer(CorsLayer::permissive())
            .with_state(self.state);
        let addr = format!("{}:{}", self.host, self.port);
        let server_handle = self.server_handle.clone();

        let handle = tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("stream server failed to bind {addr}: {e}");
                    return;
                }
            };
            tracing::info!("stream server listening on {addr}");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("stream server error: {e}");
            }
        });
        *server_handle.lock().unwrap() = Some(handle);
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    state.active_clients.fetch_add(1, Ordering::Relaxed);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(128);

    let welcome = encode_envelope(Envelope::Welcome {
        message: "connected".to_string(),
        time: unix_now(),
    });
    let _ = out_tx.send(welcome).await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let forward_out = out_tx.clone();
    let mut broadcast_rx = state.broadcast_tx.subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(frame) => {
                    if forward_out.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("downstream client lagged, skipped {skipped} broadcast frames");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    loop {
        tokio::select! {
            _ = state.shutdown_notify.notified() => {
                // give the forwarder a moment to deliver the shutdown
                // envelope that triggered this wakeup before tearing down.
                tokio::time::sleep(Duration::from_millis(50)).await;
                break;
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let state = state.clone();
                        let reply_tx = out_tx.clone();
                        tokio::spawn(async move {
                            handle_client_frame(&text, state, reply_tx).await;
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    state.active_clients.fetch_sub(1, Ordering::Relaxed);
}

async fn handle_client_frame(text: &str, state: AppState, reply_tx: mpsc::Sender<String>) {
    let wire: WireClientEnvelope = match serde_json::from_str(text) {
        Ok(w) => w,
        Err(e) => {
            let frame = encode_envelope(Envelope::Error {
                message: format!("invalid frame: {e}"),
            });
            let _ = reply_tx.send(frame).await;
            return;
        }
    };

    match ClientEnvelope::from(wire) {
        ClientEnvelope::Ping => {
            let frame = encode_envelope(Envelope::Pong { time: unix_now() });
            let _ = reply_tx.send(frame).await;
        }
        ClientEnvelope::Invoke {
            request_id,
            call,
            action,
            params,
        } => {
            if let Err(denial) = check_invoke_whitelist(&state.whitelist, &params) {
                let frame = encode_envelope(Envelope::result_err(request_id, denial));
                let _ = reply_tx.send(frame).await;
                return;
            }
            let result = dispatch(&state, call, &action, params).await;
            let frame = encode_envelope(result_envelope(request_id, result));
            let _ = reply_tx.send(frame).await;
        }
        ClientEnvelope::Sdk {
            request_id,
            path,
            args,
        } => {
            let Some((action, params, whitelist_arg)) = facade::resolve(&path, &args) else {
                let frame = encode_envelope(Envelope::result_err(
                    request_id,
                    format!("unknown_sdk_path: {path}"),
                ));
                let _ = reply_tx.send(frame).await;
                return;
            };
            if let Some((arg, id)) = whitelist_arg {
                if let Err(denial) = check_whitelist_arg(&state.whitelist, arg, id) {
                    let frame = encode_envelope(Envelope::result_err(request_id, denial));
                    let _ = reply_tx.send(frame).await;
                    return;
                }
            }
            let result = dispatch(&state, CallKind::Data, &action, params).await;
            let frame = encode_envelope(result_envelope(request_id, result));
            let _ = reply_tx.send(frame).await;
        }
    }
}

fn check_invoke_whitelist(
    whitelist: &Whitelist,
    params: &serde_json::Value,
) -> Result<(), String> {
    if let Some(group_id) = params.get("group_id").and_then(serde_json::Value::as_i64) {
        whitelist
            .check_group(group_id)
            .map_err(|e| e.to_string())?;
    }
    if let Some(user_id) = params.get("user_id").and_then(serde_json::Value::as_i64) {
        whitelist.check_user(user_id).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn check_whitelist_arg(whitelist: &Whitelist, arg: WhitelistArg, id: i64) -> Result<(), String> {
    match arg {
        WhitelistArg::Group(_) => whitelist.check_group(id).map_err(|e| e.to_string()),
        WhitelistArg::User(_) => whitelist.check_user(id).map_err(|e| e.to_string()),
    }
}

/// Runs the requested invoker facade (`call|data|ok|retry`) against the
/// upstream caller and returns the JSON payload to place in the result
/// envelope's `data` field, or an error string.
async fn dispatch(
    state: &AppState,
    call: CallKind,
    action: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, String> {
    match call {
        CallKind::Call => state
            .upstream
            .call(action, params, None)
            .await
            .map(|resp| serde_json::to_value(&resp).unwrap_or(serde_json::Value::Null))
            .map_err(|e| e.to_string()),
        CallKind::Data => {
            let resp = state
                .upstream
                .call(action, params, None)
                .await
                .map_err(|e| e.to_string())?;
            if !resp.is_ok() {
                return Err(resp
                    .message
                    .or(resp.wording)
                    .unwrap_or_else(|| format!("upstream returned status {}", resp.status)));
            }
            Ok(resp.data.unwrap_or(serde_json::Value::Null))
        }
        CallKind::Ok => state
            .upstream
            .call(action, params, None)
            .await
            .map(|resp| serde_json::Value::Bool(resp.is_ok()))
            .map_err(|e| e.to_string()),
        CallKind::Retry => {
            if !state.retry_enabled {
                let resp = state
                    .upstream
                    .call(action, params, None)
                    .await
                    .map_err(|e| e.to_string())?;
                return Ok(resp.data.unwrap_or(serde_json::Value::Null));
            }
            let classifier = RetryClassifier;
            let retry = state.retry.clone();
            let upstream = state.upstream.clone();
            let action = action.to_string();
            let result = onebot::with_retry(&retry, &classifier, || {
                let upstream = upstream.clone();
                let action = action.clone();
                let params = params.clone();
                async move { upstream.call(&action, params, None).await }
            })
            .await
            .map_err(|e| e.to_string())?;
            Ok(result.data.unwrap_or(serde_json::Value::Null))
        }
    }
}

fn result_envelope(request_id: String, result: Result<serde_json::Value, String>) -> Envelope {
    match result {
        Ok(data) => Envelope::result_ok(request_id, data),
        Err(err) => Envelope::result_err(request_id, err),
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker_core::UpstreamError;
    use onebot::UpstreamResponse;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    struct FakeUpstream {
        response: serde_json::Value,
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl UpstreamCaller for FakeUpstream {
        async fn call(
            &self,
            action: &str,
            _params: serde_json::Value,
            _timeout: Option<Duration>,
        ) -> Result<UpstreamResponse, UpstreamError> {
            self.calls.lock().unwrap().push(action.to_string());
            Ok(UpstreamResponse {
                status: "ok".to_string(),
                retcode: 0,
                data: Some(self.response.clone()),
                message: None,
                wording: None,
                echo: Some("e".to_string()),
            })
        }
    }

    fn test_state(upstream: Arc<dyn UpstreamCaller>, whitelist: Whitelist) -> AppState {
        let (tx, _rx) = broadcast::channel(16);
        AppState {
            upstream,
            whitelist: Arc::new(whitelist),
            broadcast_tx: tx,
            retry: Arc::new(RetryConfig::default()),
            retry_enabled: true,
            active_clients: Arc::new(AtomicUsize::new(0)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    #[tokio::test]
    async fn test_dispatch_data_unwraps_payload() {
        let upstream = Arc::new(FakeUpstream {
            response: serde_json::json!({"nickname": "A"}),
            calls: StdMutex::new(Vec::new()),
        });
        let state = test_state(upstream, Whitelist::default());
        let result = dispatch(&state, CallKind::Data, "get_stranger_info", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result["nickname"], "A");
    }

    #[tokio::test]
    async fn test_dispatch_ok_returns_bool() {
        let upstream = Arc::new(FakeUpstream {
            response: serde_json::json!({}),
            calls: StdMutex::new(Vec::new()),
        });
        let state = test_state(upstream, Whitelist::default());
        let result = dispatch(&state, CallKind::Ok, "send_group_msg", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(true));
    }

    #[test]
    fn test_check_invoke_whitelist_denies_absent_group() {
        let whitelist = Whitelist::new(HashSet::from([200]), HashSet::new());
        let params = serde_json::json!({"group_id": 100});
        assert!(check_invoke_whitelist(&whitelist, &params).is_err());
    }

    #[test]
    fn test_check_invoke_whitelist_allows_when_no_ids_present() {
        let whitelist = Whitelist::new(HashSet::from([200]), HashSet::new());
        let params = serde_json::json!({"message": "hi"});
        assert!(check_invoke_whitelist(&whitelist, &params).is_ok());
    }

    #[tokio::test]
    async fn test_sdk_unknown_path_rejected() {
        let upstream = Arc::new(FakeUpstream {
            response: serde_json::json!({}),
            calls: StdMutex::new(Vec::new()),
        });
        let state = test_state(upstream, Whitelist::default());
        let (tx, mut rx) = mpsc::channel(4);
        handle_client_frame(
            r#"{"type":"sdk","requestId":"r1","path":"nonsense","args":[]}"#,
            state,
            tx,
        )
        .await;
        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["requestId"], "r1");
    }

    #[tokio::test]
    async fn test_sdk_whitelist_denial_short_circuits_dispatch() {
        let upstream = Arc::new(FakeUpstream {
            response: serde_json::json!({}),
            calls: StdMutex::new(Vec::new()),
        });
        let whitelist = Whitelist::new(HashSet::from([200]), HashSet::new());
        let state = test_state(upstream.clone(), whitelist);
        let (tx, mut rx) = mpsc::channel(4);
        handle_client_frame(
            r#"{"type":"sdk","requestId":"r1","path":"send.group","args":[100,"hi"]}"#,
            state,
            tx,
        )
        .await;
        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"], "group_not_in_whitelist");
        assert!(upstream.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ping_replies_with_pong() {
        let upstream = Arc::new(FakeUpstream {
            response: serde_json::json!({}),
            calls: StdMutex::new(Vec::new()),
        });
        let state = test_state(upstream, Whitelist::default());
        let (tx, mut rx) = mpsc::channel(4);
        handle_client_frame(r#"{"type":"ping"}"#, state, tx).await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"pong\""));
    }

    #[test]
    fn test_broadcast_reaches_subscribed_clients() {
        let upstream = Arc::new(FakeUpstream {
            response: serde_json::json!({}),
            calls: StdMutex::new(Vec::new()),
        });
        let server = StreamServer::new(
            upstream,
            Whitelist::default(),
            RpcRetryConfig::default(),
            "127.0.0.1",
            0,
        );
        let mut rx = server.broadcast_tx.subscribe();
        server.broadcast(Envelope::Shutdown {
            message: "bye".into(),
        });
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"type\":\"shutdown\""));
    }

    #[tokio::test]
    async fn test_shutdown_broadcasts_envelope_and_returns_with_no_clients() {
        let upstream = Arc::new(FakeUpstream {
            response: serde_json::json!({}),
            calls: StdMutex::new(Vec::new()),
        });
        let server = StreamServer::new(
            upstream,
            Whitelist::default(),
            RpcRetryConfig::default(),
            "127.0.0.1",
            0,
        );
        let mut rx = server.broadcast_tx.subscribe();

        server.shutdown("bye").await;

        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"type\":\"shutdown\""));
        assert_eq!(server.active_connections(), 0);
    }
}
