// src/connectors/streaming.rs

use crate::error::MonitorError;
use crate::models::{Asset, DeltaWsMessage, InstrumentSymbol, Quote};
use crate::snapshot::{ApplyOutcome, SnapshotStore};
use crate::state::AssetHealth;
use crate::traits::IngestionAdapter;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

pub const DELTA_WS_URL: &str = "wss://socket.india.delta.exchange";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

const L1_CHANNEL: &str = "l1_orderbook";

/// `subscribe` / `unsubscribe` frame for the level-1 channel.
pub fn channel_request(kind: &str, symbols: &[String]) -> Value {
    json!({
        "type": kind,
        "payload": {
            "channels": [
                {
                    "name": L1_CHANNEL,
                    "symbols": symbols
                }
            ]
        }
    })
}

struct RunningActor {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Push-streamed quotes over one long-lived WebSocket.
pub struct DeltaStream {
    asset: Asset,
    url: Url,
    store: Arc<SnapshotStore>,
    health: Arc<AssetHealth>,
    reconnect_delay: Duration,
    symbols: watch::Sender<Vec<String>>,
    running: Mutex<Option<RunningActor>>,
}

impl DeltaStream {
    pub fn new(
        url: Url,
        store: Arc<SnapshotStore>,
        health: Arc<AssetHealth>,
        reconnect_delay: Duration,
    ) -> Self {
        let (symbols, _) = watch::channel(Vec::new());
        Self {
            asset: store.asset(),
            url,
            store,
            health,
            reconnect_delay,
            symbols,
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl IngestionAdapter for DeltaStream {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    async fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(actor) = running.as_ref() {
            if !actor.handle.is_finished() {
                return;
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let actor = DeltaActor {
            asset: self.asset,
            url: self.url.clone(),
            store: self.store.clone(),
            health: self.health.clone(),
            reconnect_delay: self.reconnect_delay,
            symbols: self.symbols.subscribe(),
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(actor.run());
        *running = Some(RunningActor {
            handle,
            shutdown: shutdown_tx,
        });
        info!("DeltaStream[{}]: Actor started", self.asset);
    }

    async fn stop(&self) {
        let actor = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(actor) = actor {
            let _ = actor.shutdown.send(true);
            if let Err(e) = actor.handle.await {
                warn!("DeltaStream[{}]: Actor ended abnormally: {}", self.asset, e);
            }
            self.health.set_connected(false);
            info!("DeltaStream[{}]: Stopped", self.asset);
        }
    }

    async fn resubscribe(&self, symbols: Vec<String>) {
        debug!(
            "DeltaStream[{}]: Symbol set replaced ({} symbols)",
            self.asset,
            symbols.len()
        );
        self.symbols.send_replace(symbols);
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.borrow().clone()
    }

    fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|a| !a.handle.is_finished())
            .unwrap_or(false)
    }

    fn is_connected(&self) -> bool {
        self.health.is_connected()
    }
}

// --- The Private Actor (Background Task) ---
// Owns the socket: connects, (re)subscribes, writes quotes through, reconnects.

enum SessionEnd {
    Dropped(MonitorError),
    Shutdown,
}

struct DeltaActor {
    asset: Asset,
    url: Url,
    store: Arc<SnapshotStore>,
    health: Arc<AssetHealth>,
    reconnect_delay: Duration,
    symbols: watch::Receiver<Vec<String>>,
    shutdown: watch::Receiver<bool>,
}

impl DeltaActor {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            info!("DeltaStream[{}]: Connecting to {}...", self.asset, self.url);
            let connected = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                _ = self.shutdown.changed() => break,
            };

            match connected {
                Ok((ws_stream, _)) => {
                    info!("DeltaStream[{}]: Connected.", self.asset);
                    self.health.set_connected(true);
                    let end = self.session(ws_stream).await;
                    self.health.set_connected(false);
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Dropped(e) => error!("DeltaStream[{}]: {}", self.asset, e),
                    }
                }
                Err(e) => {
                    let e = MonitorError::ConnectionLost(format!("connect failed: {}", e));
                    error!("DeltaStream[{}]: {}", self.asset, e);
                }
            }

            warn!(
                "DeltaStream[{}]: Disconnected. Reconnecting in {}s...",
                self.asset,
                self.reconnect_delay.as_secs()
            );
            tokio::select! {
                _ = sleep(self.reconnect_delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        self.health.set_connected(false);
        info!("DeltaStream[{}]: Actor exited", self.asset);
    }

    async fn session(&mut self, ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        // Subscribe with whatever set is current at (re)connect time.
        let mut subscribed = self.symbols.borrow_and_update().clone();
        if subscribed.is_empty() {
            warn!("DeltaStream[{}]: No symbols to subscribe yet", self.asset);
        } else {
            let request = channel_request("subscribe", &subscribed);
            if let Err(e) = write.send(Message::Text(request.to_string().into())).await {
                return dropped(format!("failed to send subscription: {}", e));
            }
            info!(
                "DeltaStream[{}]: Subscribed to {} symbols",
                self.asset,
                subscribed.len()
            );
        }

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Message::Close(frame))) => {
                        return dropped(format!("server closed connection: {:?}", frame));
                    }
                    Some(Ok(_)) => {
                        // Ping/pong frames are answered by tungstenite.
                    }
                    Some(Err(e)) => return dropped(format!("websocket error: {}", e)),
                    None => return dropped("stream ended".to_string()),
                },
                changed = self.symbols.changed() => {
                    if changed.is_err() {
                        return SessionEnd::Shutdown;
                    }
                    let next = self.symbols.borrow_and_update().clone();
                    if !subscribed.is_empty() {
                        let request = channel_request("unsubscribe", &subscribed);
                        if let Err(e) = write.send(Message::Text(request.to_string().into())).await {
                            return dropped(format!("failed to unsubscribe: {}", e));
                        }
                    }
                    if !next.is_empty() {
                        let request = channel_request("subscribe", &next);
                        if let Err(e) = write.send(Message::Text(request.to_string().into())).await {
                            return dropped(format!("failed to resubscribe: {}", e));
                        }
                    }
                    info!(
                        "DeltaStream[{}]: Resubscribed {} -> {} symbols",
                        self.asset,
                        subscribed.len(),
                        next.len()
                    );
                    subscribed = next;
                },
                _ = self.shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        let count = self.health.record_message();
        if count % 100 == 0 {
            debug!("DeltaStream[{}]: Message {}", self.asset, count);
        }

        let msg: DeltaWsMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!("DeltaStream[{}]: Unparseable frame: {}", self.asset, e);
                return;
            }
        };
        apply_message(&self.store, &self.health, &msg).await;
    }
}

fn dropped(reason: String) -> SessionEnd {
    SessionEnd::Dropped(MonitorError::ConnectionLost(reason))
}

/// Routes one decoded frame. Returns the store outcome for quote frames.
pub(crate) async fn apply_message(
    store: &SnapshotStore,
    health: &AssetHealth,
    msg: &DeltaWsMessage,
) -> Option<ApplyOutcome> {
    match msg.kind.as_deref() {
        Some(L1_CHANNEL) => {
            let symbol = msg.symbol.as_deref()?;
            match InstrumentSymbol::parse(symbol) {
                Ok(parsed) => {
                    let outcome = store
                        .apply_quote(&parsed, Quote::new(msg.best_bid, msg.best_ask))
                        .await;
                    if outcome == ApplyOutcome::StaleExpiry {
                        debug!("DeltaStream[{}]: Dropped stale quote {}", store.asset(), symbol);
                    }
                    Some(outcome)
                }
                Err(e) => {
                    health.record_malformed();
                    debug!("DeltaStream[{}]: {}", store.asset(), e);
                    None
                }
            }
        }
        Some("subscriptions") => {
            info!("DeltaStream[{}]: Subscriptions confirmed", store.asset());
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExpiryCode, OptionSide};
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    fn frame(json: &str) -> DeltaWsMessage {
        serde_json::from_str(json).unwrap()
    }

    async fn store_on(expiry: &str) -> Arc<SnapshotStore> {
        let store = Arc::new(SnapshotStore::new(Asset::Eth));
        let expiry: ExpiryCode = expiry.parse().unwrap();
        store.lock_for_transition().await.reset(expiry);
        store
    }

    #[test]
    fn test_channel_request_shape() {
        let req = channel_request("subscribe", &["C-ETH-3000-010125".to_string()]);
        assert_eq!(req["type"], "subscribe");
        assert_eq!(req["payload"]["channels"][0]["name"], "l1_orderbook");
        assert_eq!(req["payload"]["channels"][0]["symbols"][0], "C-ETH-3000-010125");
    }

    #[tokio::test]
    async fn test_l1_frame_writes_through() {
        let store = store_on("010125").await;
        let health = AssetHealth::default();
        let outcome = apply_message(
            &store,
            &health,
            &frame(r#"{"type":"l1_orderbook","symbol":"C-ETH-3000-010125","best_bid":"10.5","best_ask":"11"}"#),
        )
        .await;
        assert_eq!(outcome, Some(ApplyOutcome::Applied));
        let snap = store.snapshot().await;
        assert_eq!(snap.quote(OptionSide::Call, 3000).best_bid, 10.5);
    }

    #[tokio::test]
    async fn test_stale_and_foreign_frames_are_discarded() {
        let store = store_on("020125").await;
        let health = AssetHealth::default();

        let stale = apply_message(
            &store,
            &health,
            &frame(r#"{"type":"l1_orderbook","symbol":"C-ETH-3000-010125","best_bid":"1","best_ask":"2"}"#),
        )
        .await;
        assert_eq!(stale, Some(ApplyOutcome::StaleExpiry));

        let foreign = apply_message(
            &store,
            &health,
            &frame(r#"{"type":"l1_orderbook","symbol":"C-BTC-90000-020125","best_bid":"1","best_ask":"2"}"#),
        )
        .await;
        assert_eq!(foreign, Some(ApplyOutcome::WrongAsset));
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_symbol_is_counted() {
        let store = store_on("010125").await;
        let health = AssetHealth::default();
        let outcome = apply_message(
            &store,
            &health,
            &frame(r#"{"type":"l1_orderbook","symbol":"ETHUSD","best_bid":"1","best_ask":"2"}"#),
        )
        .await;
        assert_eq!(outcome, None);
        assert_eq!(health.snapshot().malformed_symbols, 1);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_symbol_set_without_running() {
        let store = Arc::new(SnapshotStore::new(Asset::Eth));
        let stream = DeltaStream::new(
            Url::parse(DELTA_WS_URL).unwrap(),
            store,
            Arc::new(AssetHealth::default()),
            DEFAULT_RECONNECT_DELAY,
        );
        stream.resubscribe(vec!["C-ETH-3000-010125".into()]).await;
        stream.resubscribe(vec!["C-ETH-3000-020125".into()]).await;
        assert_eq!(stream.symbols(), vec!["C-ETH-3000-020125".to_string()]);
        assert!(!stream.is_running());
        stream.stop().await;
    }

    // --- Live socket against a local server ---

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        tokio_tungstenite::accept_async(tcp).await.unwrap()
    }

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("no frame within 5s")
                .expect("client closed the socket")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_reconnect_and_live_resubscribe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();
        let delay = Duration::from_millis(200);
        let stream = DeltaStream::new(
            url,
            Arc::new(SnapshotStore::new(Asset::Eth)),
            Arc::new(AssetHealth::default()),
            delay,
        );

        let first = vec!["C-ETH-3000-010125".to_string()];
        let second = vec!["C-ETH-3000-020125".to_string(), "P-ETH-3000-020125".to_string()];
        let third = vec!["C-ETH-3100-030125".to_string()];

        stream.resubscribe(first.clone()).await;
        stream.start().await;

        let mut ws = accept(&listener).await;
        let frame = next_text(&mut ws).await;
        assert_eq!(frame["type"], "subscribe");
        assert_eq!(frame["payload"]["channels"][0]["symbols"], json!(first));

        // Drop the session, then change the symbol set during the backoff.
        let _ = ws.close(None).await;
        drop(ws);
        let dropped_at = Instant::now();
        stream.resubscribe(second.clone()).await;

        let mut ws = accept(&listener).await;
        assert!(dropped_at.elapsed() >= delay - Duration::from_millis(50));
        let frame = next_text(&mut ws).await;
        assert_eq!(frame["type"], "subscribe");
        assert_eq!(frame["payload"]["channels"][0]["symbols"], json!(second));
        assert!(stream.is_running());

        // A change on a live connection swaps the subscription in place.
        stream.resubscribe(third.clone()).await;
        let frame = next_text(&mut ws).await;
        assert_eq!(frame["type"], "unsubscribe");
        assert_eq!(frame["payload"]["channels"][0]["symbols"], json!(second));
        let frame = next_text(&mut ws).await;
        assert_eq!(frame["type"], "subscribe");
        assert_eq!(frame["payload"]["channels"][0]["symbols"], json!(third));

        stream.stop().await;
        assert!(!stream.is_running());
        assert!(!stream.is_connected());
    }
}
