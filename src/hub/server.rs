//! WebSocket broadcast hub.
//!
//! One accept loop, one long-lived task per client. Clients authenticate
//! inside a bounded window (or immediately when no token is configured),
//! then receive snapshot pushes, alerts, and command results. Inbound
//! frames decode into [`ClientCommand`] and dispatch to the injected
//! collaborators.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::analysis::AnalysisService;
use crate::models::{GrowthAlert, Snapshot};
use crate::stores::{ClosedPositionStore, PortfolioStore};

use super::protocol::{ClientCommand, ServerMessage};
use super::PositionSource;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listener address
    pub bind_addr: String,

    /// Shared token clients must present; `None` disables authentication
    pub auth_token: Option<String>,

    /// How long a client may take to authenticate
    pub auth_timeout: Duration,

    /// Grace period between the shutdown signal and forced disposal
    pub shutdown_grace: Duration,

    /// Maximum number of concurrent clients
    pub max_clients: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8765".to_string(),
            auth_token: None,
            auth_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(500),
            max_clients: 100,
        }
    }
}

struct ClientHandle {
    tx: mpsc::UnboundedSender<Message>,
    authenticated: Arc<AtomicBool>,
}

/// The broadcast hub. Owns the client registry and the latest-snapshot
/// cell; everything else is reached through the injected collaborators.
pub struct BroadcastHub {
    config: HubConfig,
    source: Arc<dyn PositionSource>,
    portfolio: Arc<PortfolioStore>,
    closed: Arc<ClosedPositionStore>,
    analysis: Arc<dyn AnalysisService>,
    clients: DashMap<u64, ClientHandle>,
    latest: RwLock<Option<Arc<Snapshot>>>,
    next_client_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl BroadcastHub {
    pub fn new(
        config: HubConfig,
        source: Arc<dyn PositionSource>,
        portfolio: Arc<PortfolioStore>,
        closed: Arc<ClosedPositionStore>,
        analysis: Arc<dyn AnalysisService>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            source,
            portfolio,
            closed,
            analysis,
            clients: DashMap::new(),
            latest: RwLock::new(None),
            next_client_id: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Trigger graceful shutdown: every client gets a close frame, then the
    /// accept loop exits after the configured grace period.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.len()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;

        info!(
            addr = %self.config.bind_addr,
            requires_auth = self.config.auth_token.is_some(),
            "Broadcast hub listening"
        );

        self.serve(listener).await
    }

    /// Serve an already-bound listener (lets tests use an ephemeral port).
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let hub = self.clone();
                            tokio::spawn(async move {
                                hub.handle_connection(stream, addr).await;
                            });
                        }
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Hub shutting down");
                    break;
                }
            }
        }

        for entry in self.clients.iter() {
            let _ = entry.value().tx.send(Message::Close(None));
        }
        tokio::time::sleep(self.config.shutdown_grace).await;
        self.clients.clear();

        info!("Hub stopped");
        Ok(())
    }

    /// Store the snapshot and push it to every authenticated client.
    pub async fn publish_snapshot(&self, snapshot: Arc<Snapshot>) {
        {
            let mut latest = self.latest.write().await;
            *latest = Some(snapshot.clone());
        }
        self.broadcast(&ServerMessage::positions(&snapshot));
    }

    /// Push a tracker alert: the structured frame plus a banner for
    /// display-only clients.
    pub fn publish_alert(&self, alert: &GrowthAlert) {
        self.broadcast(&ServerMessage::growth_alert(alert));
        self.broadcast(&ServerMessage::alert_banner(alert));
    }

    /// Serialize once, fan out to authenticated clients, purge the dead.
    fn broadcast(&self, message: &ServerMessage) {
        let frame = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize broadcast");
                return;
            }
        };

        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            if !entry.value().authenticated.load(Ordering::SeqCst) {
                continue;
            }
            if entry.value().tx.send(Message::Text(frame.clone())).is_err() {
                dead.push(*entry.key());
            }
        }

        if !dead.is_empty() {
            for id in dead {
                self.clients.remove(&id);
            }
            info!(clients = self.clients.len(), "Purged dead clients after broadcast");
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if self.clients.len() >= self.config.max_clients {
            warn!(addr = %addr, max = self.config.max_clients, "Rejecting connection: client limit reached");
            return;
        }

        // Plain HTTP requests to the listener get the status document.
        match is_websocket_upgrade(&stream).await {
            Ok(true) => {}
            Ok(false) => {
                self.serve_status(stream).await;
                return;
            }
            Err(e) => {
                debug!(addr = %addr, error = %e, "Connection dropped before handshake");
                return;
            }
        }

        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(addr = %addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        info!(client_id, addr = %addr, "Client connected");

        self.client_task(client_id, ws).await;
    }

    async fn serve_status(&self, mut stream: TcpStream) {
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await;

        let positions = self
            .latest
            .read()
            .await
            .as_ref()
            .map(|s| s.len())
            .unwrap_or(0);

        let body = json!({
            "status": "ok",
            "clients": self.clients.len(),
            "positions": positions,
            "requiresAuth": self.config.auth_token.is_some(),
            "timestamp": Utc::now(),
        })
        .to_string();

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );

        if let Err(e) = stream.write_all(response.as_bytes()).await {
            debug!(error = %e, "Failed to write status response");
        }
        let _ = stream.shutdown().await;
    }

    async fn client_task(self: Arc<Self>, client_id: u64, ws: WebSocketStream<TcpStream>) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let authenticated = Arc::new(AtomicBool::new(self.config.auth_token.is_none()));
        self.clients.insert(
            client_id,
            ClientHandle {
                tx: tx.clone(),
                authenticated: authenticated.clone(),
            },
        );

        if let Some(token) = self.config.auth_token.clone() {
            let passed = tokio::time::timeout(
                self.config.auth_timeout,
                await_auth(&mut ws_rx, &token),
            )
            .await
            .unwrap_or(false);

            if !passed {
                let _ = ws_tx
                    .send(text_frame(&ServerMessage::AuthFailed {
                        reason: Some("invalid or missing token".to_string()),
                    }))
                    .await;
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Policy,
                        reason: "authentication failed".into(),
                    })))
                    .await;
                self.clients.remove(&client_id);
                info!(client_id, "Client failed authentication");
                return;
            }

            authenticated.store(true, Ordering::SeqCst);
            let _ = tx.send(text_frame(&ServerMessage::AuthSuccess));
            info!(client_id, "Client authenticated");
        }

        // Entering Authenticated: this client alone gets the current state.
        if let Some(snapshot) = self.latest.read().await.clone() {
            let _ = tx.send(text_frame(&ServerMessage::positions(&snapshot)));
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let closing = matches!(msg, Message::Close(_));
                    if ws_tx.send(msg).await.is_err() {
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(client_id, &tx, &text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if ws_tx.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(client_id, error = %e, "WebSocket error");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        self.clients.remove(&client_id);
        info!(client_id, clients = self.clients.len(), "Client disconnected");
    }

    async fn handle_text(
        self: &Arc<Self>,
        client_id: u64,
        tx: &mpsc::UnboundedSender<Message>,
        text: &str,
    ) {
        let command = match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => command,
            Err(e) => {
                warn!(client_id, error = %e, "Ignoring malformed or unknown command");
                return;
            }
        };

        self.dispatch(client_id, tx, command).await;
    }

    async fn dispatch(
        self: &Arc<Self>,
        client_id: u64,
        tx: &mpsc::UnboundedSender<Message>,
        command: ClientCommand,
    ) {
        match command {
            ClientCommand::Ping => {
                send(tx, &ServerMessage::Pong { timestamp: Utc::now() });
            }

            ClientCommand::GetPositions => {
                let message = match self.latest.read().await.clone() {
                    Some(snapshot) => ServerMessage::positions(&snapshot),
                    None => ServerMessage::positions(&Snapshot::from_positions(Vec::new())),
                };
                send(tx, &message);
            }

            ClientCommand::Refresh => {
                let hub = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let success = hub.source.request_refresh().await;
                    send(&tx, &ServerMessage::RefreshStarted { success });
                });
            }

            ClientCommand::Restart => {
                let hub = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let success = hub.source.restart().await;
                    send(&tx, &ServerMessage::RestartStarted { success });
                });
            }

            ClientCommand::Analyze { symbol } => {
                send(
                    tx,
                    &ServerMessage::AnalysisStarted {
                        target: symbol.clone(),
                    },
                );
                let hub = self.clone();
                tokio::spawn(async move {
                    let snapshot = hub.latest.read().await.clone();
                    match hub.analysis.analyze_symbol(snapshot, &symbol).await {
                        Ok(text) => {
                            let title = format!("Analysis: {}", symbol);
                            hub.broadcast(&ServerMessage::notice(&title, text, true));
                        }
                        Err(e) => warn!(error = %e, symbol = %symbol, "Symbol analysis failed"),
                    }
                });
            }

            ClientCommand::PortfolioAnalysis => {
                send(
                    tx,
                    &ServerMessage::AnalysisStarted {
                        target: "portfolio".to_string(),
                    },
                );
                let hub = self.clone();
                tokio::spawn(async move {
                    let snapshot = hub.latest.read().await.clone();
                    match hub.analysis.analyze_portfolio(snapshot).await {
                        Ok(text) => {
                            hub.broadcast(&ServerMessage::notice("Portfolio analysis", text, true));
                        }
                        Err(e) => warn!(error = %e, "Portfolio analysis failed"),
                    }
                });
            }

            ClientCommand::ClickTpsl {
                trader,
                symbol,
                size,
            } => {
                debug!(client_id, trader = %trader, symbol = %symbol, size = %size, "TP/SL click requested");
                let hub = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let success = hub.source.click_tpsl(&trader, &symbol).await;
                    send(&tx, &ServerMessage::TpslClickResult { success });
                });
            }

            ClientCommand::ClosePosition {
                trader,
                symbol,
                size,
            } => {
                debug!(client_id, trader = %trader, symbol = %symbol, size = %size, "Close position requested");
                let hub = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let success = hub.source.close_position(&trader, &symbol).await;
                    send(&tx, &ServerMessage::ClosePositionResult { success });
                });
            }

            ClientCommand::CloseModal { trader } => {
                let hub = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let success = hub.source.close_modal(&trader).await;
                    send(&tx, &ServerMessage::CloseModalResult { success });
                });
            }

            ClientCommand::GetAvgPnl { unique_key } => {
                let (avg_pnl, count) = self.closed.average_pnl(&unique_key).await;
                send(
                    tx,
                    &ServerMessage::AvgPnlResult {
                        unique_key,
                        avg_pnl,
                        count,
                        success: avg_pnl.is_some(),
                    },
                );
            }

            ClientCommand::GetPortfolio => {
                let data = self.portfolio.get().await;
                send(tx, &ServerMessage::Portfolio { data });
            }

            ClientCommand::UpdateInitialValue { value, date } => {
                let success = self.portfolio.update_initial_value(value, date).await;
                send_portfolio_result(tx, "update_initial_value", success);
            }

            ClientCommand::AddGrowthUpdate { value, notes, date } => {
                let success = self.portfolio.add_growth_update(value, notes, date).await;
                send_portfolio_result(tx, "add_growth_update", success);
            }

            ClientCommand::UpdateCurrentValue { value } => {
                let success = self.portfolio.update_current_value(value).await;
                send_portfolio_result(tx, "update_current_value", success);
            }

            ClientCommand::AddWithdrawal {
                amount,
                category,
                description,
                currency,
            } => {
                let success = self
                    .portfolio
                    .add_withdrawal(amount, category, description, currency)
                    .await;
                send_portfolio_result(tx, "add_withdrawal", success);
            }

            ClientCommand::UpdateWithdrawal {
                id,
                amount,
                category,
                description,
                currency,
            } => {
                let success = self
                    .portfolio
                    .update_withdrawal(&id, amount, category, description, currency)
                    .await;
                send_portfolio_result(tx, "update_withdrawal", success);
            }

            ClientCommand::DeleteWithdrawal { id } => {
                let success = self.portfolio.delete_withdrawal(&id).await;
                send_portfolio_result(tx, "delete_withdrawal", success);
            }

            ClientCommand::ScrapeGrowth => {
                let hub = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let value = hub.source.scrape_growth().await;
                    if let Some(v) = value {
                        hub.portfolio.update_current_value(v).await;
                    }
                    send(
                        &tx,
                        &ServerMessage::GrowthScraped {
                            value,
                            success: value.is_some(),
                        },
                    );
                });
            }

            ClientCommand::Auth { .. } => {
                debug!(client_id, "Auth message outside the auth window ignored");
            }
        }
    }
}

/// Wait for a valid auth frame; a wrong token fails immediately, anything
/// unparseable is ignored and the window keeps running.
async fn await_auth(ws_rx: &mut SplitStream<WebSocketStream<TcpStream>>, token: &str) -> bool {
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return false,
            _ => continue,
        };

        match serde_json::from_str::<ClientCommand>(&text) {
            Ok(ClientCommand::Auth { token: offered }) => return offered == token,
            Ok(_) => debug!("Command before authentication ignored"),
            Err(e) => debug!(error = %e, "Unparseable frame during auth window"),
        }
    }
    false
}

/// Best-effort check whether the incoming request is a WebSocket upgrade,
/// without consuming bytes from the stream.
async fn is_websocket_upgrade(stream: &TcpStream) -> Result<bool> {
    let mut buf = [0u8; 1024];
    let n = stream.peek(&mut buf).await?;
    if n == 0 {
        anyhow::bail!("connection closed");
    }

    let head = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
    Ok(head.contains("upgrade: websocket") || head.contains("sec-websocket-key"))
}

fn text_frame(message: &ServerMessage) -> Message {
    Message::Text(serde_json::to_string(message).unwrap_or_default())
}

fn send(tx: &mpsc::UnboundedSender<Message>, message: &ServerMessage) {
    let _ = tx.send(text_frame(message));
}

fn send_portfolio_result(tx: &mpsc::UnboundedSender<Message>, action: &str, success: bool) {
    send(
        tx,
        &ServerMessage::PortfolioUpdateResult {
            action: action.to_string(),
            success,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::HeuristicAnalysis;
    use crate::models::Position;
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

    struct FakeSource;

    #[async_trait]
    impl PositionSource for FakeSource {
        async fn request_refresh(&self) -> bool {
            true
        }
        async fn restart(&self) -> bool {
            true
        }
        async fn click_tpsl(&self, _trader: &str, _symbol: &str) -> bool {
            true
        }
        async fn close_position(&self, _trader: &str, _symbol: &str) -> bool {
            false
        }
        async fn close_modal(&self, _trader: &str) -> bool {
            true
        }
        async fn scrape_growth(&self) -> Option<f64> {
            Some(123.45)
        }
    }

    async fn start_hub(
        auth_token: Option<&str>,
        auth_timeout: Duration,
    ) -> (Arc<BroadcastHub>, SocketAddr, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let portfolio = Arc::new(PortfolioStore::load(dir.path().join("portfolio.json")).await);
        let closed = Arc::new(ClosedPositionStore::load(dir.path().join("closed.json")).await);

        let config = HubConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            auth_token: auth_token.map(str::to_string),
            auth_timeout,
            ..HubConfig::default()
        };

        let hub = Arc::new(BroadcastHub::new(
            config,
            Arc::new(FakeSource),
            portfolio,
            closed,
            Arc::new(HeuristicAnalysis::default()),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(hub.clone().serve(listener));

        (hub, addr, dir)
    }

    fn sample_snapshot() -> Arc<Snapshot> {
        let cells = ["BTCUSDT", "Long 10x", "0.5", "120.00", "2.20 USDT22.00%"];
        let position = Position::from_row("trader-a", &cells).unwrap();
        Arc::new(Snapshot::from_positions(vec![position]))
    }

    async fn ws_connect(
        addr: SocketAddr,
    ) -> WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>> {
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws
    }

    async fn send_json(
        ws: &mut WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
        json: &str,
    ) {
        ws.send(WsMessage::Text(json.to_string())).await.unwrap();
    }

    async fn recv_json(
        ws: &mut WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    ) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("websocket error");
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_open_client_receives_snapshot_on_connect() {
        let (hub, addr, _dir) = start_hub(None, Duration::from_secs(5)).await;
        hub.publish_snapshot(sample_snapshot()).await;

        let mut ws = ws_connect(addr).await;
        let frame = recv_json(&mut ws).await;

        assert_eq!(frame["type"], "positions");
        assert_eq!(frame["count"], 1);
        assert_eq!(frame["data"][0]["symbol"], "BTCUSDT");
        assert_eq!(frame["totalPnL"], 2.2);
    }

    #[tokio::test]
    async fn test_auth_success_then_snapshot() {
        let (hub, addr, _dir) = start_hub(Some("secret"), Duration::from_secs(5)).await;
        hub.publish_snapshot(sample_snapshot()).await;

        let mut ws = ws_connect(addr).await;
        send_json(&mut ws, r#"{"type":"auth","token":"secret"}"#).await;

        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "auth_success");

        // The current snapshot arrives unprompted right after.
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "positions");
        assert_eq!(frame["count"], 1);
    }

    #[tokio::test]
    async fn test_wrong_token_is_rejected() {
        let (_hub, addr, _dir) = start_hub(Some("secret"), Duration::from_secs(5)).await;

        let mut ws = ws_connect(addr).await;
        send_json(&mut ws, r#"{"type":"auth","token":"wrong"}"#).await;

        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "auth_failed");

        // Connection is closed with a policy violation.
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap();
        assert!(matches!(next, Some(Ok(WsMessage::Close(_))) | None));
    }

    #[tokio::test]
    async fn test_auth_timeout_disconnects() {
        let (_hub, addr, _dir) = start_hub(Some("secret"), Duration::from_millis(200)).await;

        let mut ws = ws_connect(addr).await;
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "auth_failed");
    }

    #[tokio::test]
    async fn test_broadcast_excludes_pending_clients() {
        let (hub, addr, _dir) = start_hub(Some("secret"), Duration::from_secs(5)).await;

        let mut pending = ws_connect(addr).await;
        let mut authed = ws_connect(addr).await;
        send_json(&mut authed, r#"{"type":"auth","token":"secret"}"#).await;
        let frame = recv_json(&mut authed).await;
        assert_eq!(frame["type"], "auth_success");

        hub.publish_snapshot(sample_snapshot()).await;

        let frame = recv_json(&mut authed).await;
        assert_eq!(frame["type"], "positions");

        // The pending client sees nothing for the same broadcast.
        let silence =
            tokio::time::timeout(Duration::from_millis(300), pending.next()).await;
        assert!(silence.is_err());
    }

    #[tokio::test]
    async fn test_ping_and_get_positions() {
        let (_hub, addr, _dir) = start_hub(None, Duration::from_secs(5)).await;

        let mut ws = ws_connect(addr).await;
        send_json(&mut ws, r#"{"type":"ping"}"#).await;
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "pong");

        send_json(&mut ws, r#"{"type":"get_positions"}"#).await;
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "positions");
        assert_eq!(frame["count"], 0);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_ignored() {
        let (_hub, addr, _dir) = start_hub(None, Duration::from_secs(5)).await;

        let mut ws = ws_connect(addr).await;
        send_json(&mut ws, "this is not json").await;
        send_json(&mut ws, r#"{"type":"no_such_command"}"#).await;
        send_json(&mut ws, r#"{"type":"ping"}"#).await;

        // The connection survived both bad frames.
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "pong");
    }

    #[tokio::test]
    async fn test_collaborator_commands() {
        let (_hub, addr, _dir) = start_hub(None, Duration::from_secs(5)).await;
        let mut ws = ws_connect(addr).await;

        send_json(
            &mut ws,
            r#"{"type":"click_tpsl","trader":"a","symbol":"BTCUSDT","size":"0.5"}"#,
        )
        .await;
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "tpsl_click_result");
        assert_eq!(frame["success"], true);

        send_json(
            &mut ws,
            r#"{"type":"close_position","trader":"a","symbol":"BTCUSDT","size":"0.5"}"#,
        )
        .await;
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "close_position_result");
        assert_eq!(frame["success"], false);

        send_json(&mut ws, r#"{"type":"scrape_growth"}"#).await;
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "growth_scraped");
        assert_eq!(frame["value"], 123.45);
    }

    #[tokio::test]
    async fn test_portfolio_commands_roundtrip() {
        let (_hub, addr, _dir) = start_hub(None, Duration::from_secs(5)).await;
        let mut ws = ws_connect(addr).await;

        send_json(
            &mut ws,
            r#"{"type":"update_initial_value","value":1000.0,"date":"2026-01-01"}"#,
        )
        .await;
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "portfolio_update_result");
        assert_eq!(frame["action"], "update_initial_value");
        assert_eq!(frame["success"], true);

        send_json(&mut ws, r#"{"type":"get_portfolio"}"#).await;
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "portfolio_data");
        assert_eq!(frame["data"]["initialValue"], 1000.0);
    }

    #[tokio::test]
    async fn test_http_status_on_same_listener() {
        let (hub, addr, _dir) = start_hub(None, Duration::from_secs(5)).await;
        hub.publish_snapshot(sample_snapshot()).await;

        let body: Value = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["status"], "ok");
        assert_eq!(body["positions"], 1);
        assert_eq!(body["requiresAuth"], false);
    }
}
