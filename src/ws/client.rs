// =============================================================================
// Market data WebSocket client — connecting, authenticating, reconnecting (C5)
// =============================================================================
//
// Grounded on polygon_api/websocket.py's `PolygonWebSocketClient`, generalized
// from the teacher's single-purpose `tokio_tungstenite::connect_async` read
// loops (market_data/trade_stream.rs) into a full bidirectional client: one
// connection, a send queue that survives reconnects, dynamic subscribe churn
// under a single lock, and per-channel handler dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::symbol::Symbol;
use crate::types::ChannelTag;
use crate::ws::wire;

type Handler = Box<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Connection lifecycle, tracked lock-free so health reporting can poll it
/// without contending with the runner task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Disconnected = 0,
    Connecting = 1,
    OpenUnauth = 2,
    OpenAuth = 3,
    Closing = 4,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::OpenUnauth,
            3 => Self::OpenAuth,
            _ => Self::Closing,
        }
    }
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::OpenUnauth => "open_unauth",
            Self::OpenAuth => "open_auth",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Keepalive ping cadence (§5): a `Ping` frame is sent on this interval.
const PING_INTERVAL: Duration = Duration::from_secs(20);
/// If no frame at all (data, pong, or otherwise) is observed within this
/// long after a ping was due, the connection is considered dead and the
/// runner tears it down to trigger a reconnect (§5 pong timeout).
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// One reconnecting, authenticating WebSocket connection to the upstream
/// market data feed, with dynamic per-channel subscription management.
pub struct MarketDataWsClient {
    url: String,
    api_key: String,
    max_backoff: Duration,
    state: AtomicU8,
    just_authenticated: AtomicBool,
    subs: Mutex<HashMap<ChannelTag, HashSet<Symbol>>>,
    handlers: RwLock<HashMap<ChannelTag, Vec<Handler>>>,
    wildcard_handlers: RwLock<Vec<Handler>>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: Mutex<Option<mpsc::Receiver<String>>>,
    shutdown: CancellationToken,
}

impl MarketDataWsClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, max_backoff: Duration, send_queue_bound: usize) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(send_queue_bound.max(1));
        Arc::new(Self {
            url: url.into(),
            api_key: api_key.into(),
            max_backoff,
            state: AtomicU8::new(ConnState::Disconnected as u8),
            just_authenticated: AtomicBool::new(false),
            subs: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            wildcard_handlers: RwLock::new(Vec::new()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Spawn the runner task that owns the connection for the lifetime of
    /// this client. Call once; a second call would steal the outbound
    /// receiver out from under the first runner.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn register_handler<F>(&self, channel: ChannelTag, handler: F)
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(channel)
            .or_default()
            .push(Box::new(handler));
    }

    pub fn register_wildcard_handler<F>(&self, handler: F)
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.wildcard_handlers.write().push(Box::new(handler));
    }

    /// Add `symbols` to `channel`'s subscription set, enqueuing a subscribe
    /// frame only for the ones not already subscribed.
    pub fn subscribe(&self, channel: ChannelTag, symbols: &[Symbol]) {
        if symbols.is_empty() {
            return;
        }
        let fresh: Vec<Symbol> = {
            let mut subs = self.subs.lock();
            let set = subs.entry(channel).or_default();
            let fresh: Vec<Symbol> = symbols.iter().filter(|s| !set.contains(*s)).cloned().collect();
            set.extend(fresh.iter().cloned());
            fresh
        };
        if fresh.is_empty() {
            return;
        }
        tracing::info!(%channel, count = fresh.len(), "subscribing");
        self.enqueue(wire::build_action_message("subscribe", channel, &fresh));
    }

    /// Remove `symbols` from `channel`'s subscription set, enqueuing an
    /// unsubscribe frame only for the ones actually present.
    pub fn unsubscribe(&self, channel: ChannelTag, symbols: &[Symbol]) {
        if symbols.is_empty() {
            return;
        }
        let removed: Vec<Symbol> = {
            let mut subs = self.subs.lock();
            let set = subs.entry(channel).or_default();
            let removed: Vec<Symbol> = symbols.iter().filter(|s| set.contains(*s)).cloned().collect();
            for s in &removed {
                set.remove(s);
            }
            removed
        };
        if removed.is_empty() {
            return;
        }
        tracing::info!(%channel, count = removed.len(), "unsubscribing");
        self.enqueue(wire::build_action_message("unsubscribe", channel, &removed));
    }

    /// Replace `channel`'s subscription set with exactly `symbols`, diffing
    /// under the same lock the mutation uses so a concurrent subscribe or
    /// unsubscribe can never interleave with the replace.
    pub fn replace(&self, channel: ChannelTag, symbols: &[Symbol]) {
        let target: std::collections::BTreeSet<Symbol> = symbols.iter().cloned().collect();
        let (add, remove) = {
            let mut subs = self.subs.lock();
            let current = subs.entry(channel).or_default();
            let current_set: std::collections::BTreeSet<Symbol> = current.iter().cloned().collect();
            let add: Vec<Symbol> = target.difference(&current_set).cloned().collect();
            let remove: Vec<Symbol> = current_set.difference(&target).cloned().collect();
            *current = target.iter().cloned().collect();
            (add, remove)
        };
        if !remove.is_empty() {
            self.enqueue(wire::build_action_message("unsubscribe", channel, &remove));
        }
        if !add.is_empty() {
            self.enqueue(wire::build_action_message("subscribe", channel, &add));
        }
        tracing::info!(%channel, added = add.len(), removed = remove.len(), "replaced subscription set");
    }

    pub fn subscribed(&self, channel: ChannelTag) -> HashSet<Symbol> {
        self.subs.lock().get(&channel).cloned().unwrap_or_default()
    }

    fn enqueue(&self, text: String) {
        match self.outbound_tx.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::error!(frame = %truncate(&dropped), "outbound queue full; dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("outbound queue closed; client is shutting down");
            }
        }
    }

    fn resub_all(&self) {
        let snapshot: Vec<(ChannelTag, Vec<Symbol>)> = {
            let subs = self.subs.lock();
            subs.iter()
                .filter(|(_, set)| !set.is_empty())
                .map(|(ch, set)| (*ch, set.iter().cloned().collect()))
                .collect()
        };
        for (channel, symbols) in snapshot {
            tracing::info!(%channel, count = symbols.len(), "re-subscribing after authentication");
            self.enqueue(wire::build_action_message("subscribe", channel, &symbols));
        }
    }

    fn dispatch(&self, text: &str) {
        let events = match wire::parse_events(text) {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!(error = %e, "non-JSON or malformed frame");
                return;
            }
        };
        for event in events {
            if wire::is_status_frame(&event) {
                if wire::is_auth_success_status(&event) {
                    self.set_state(ConnState::OpenAuth);
                    self.just_authenticated.store(true, Ordering::SeqCst);
                    self.resub_all();
                }
                continue;
            }

            let tag = wire::event_tag(&event).and_then(ChannelTag::from_wire_code);
            if let Some(tag) = tag {
                let handlers = self.handlers.read();
                if let Some(list) = handlers.get(&tag) {
                    for handler in list {
                        call_guarded(handler, &event);
                    }
                }
            }
            for handler in self.wildcard_handlers.read().iter() {
                call_guarded(handler, &event);
            }
        }
    }

    async fn run(self: Arc<Self>) {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .expect("MarketDataWsClient::start called more than once");
        let mut backoff_secs: f64 = 1.0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnState::Connecting);
            tracing::info!(url = %self.url, "connecting to market data feed");
            let stream = match tokio_tungstenite::connect_async(&self.url).await {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "connect failed");
                    self.set_state(ConnState::Disconnected);
                    reconnect_delay(&mut backoff_secs, self.max_backoff).await;
                    continue;
                }
            };
            let (mut sink, mut stream) = stream.split();

            self.set_state(ConnState::OpenUnauth);
            if let Err(e) = sink.send(WsMessage::Text(wire::build_auth_message(&self.api_key))).await {
                tracing::warn!(error = %e, "failed to send auth frame");
                self.set_state(ConnState::Disconnected);
                reconnect_delay(&mut backoff_secs, self.max_backoff).await;
                continue;
            }

            let mut pending: Option<String> = None;
            let mut last_activity = std::time::Instant::now();
            let mut keepalive = tokio::time::interval(PING_INTERVAL);
            keepalive.tick().await; // first tick fires immediately; consume it
            let result: anyhow::Result<()> = loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break Ok(()),
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Text(text))) => {
                                last_activity = std::time::Instant::now();
                                self.dispatch(&text);
                                if self.just_authenticated.swap(false, Ordering::SeqCst) {
                                    backoff_secs = 1.0;
                                }
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                                last_activity = std::time::Instant::now();
                            }
                            Some(Ok(WsMessage::Close(frame))) => break Err(anyhow::anyhow!("server closed connection: {frame:?}")),
                            Some(Ok(_)) => {
                                last_activity = std::time::Instant::now();
                            }
                            Some(Err(e)) => break Err(e.into()),
                            None => break Err(anyhow::anyhow!("stream ended")),
                        }
                    }
                    outbound = next_outbound(&mut pending, &mut outbound_rx) => {
                        if let Some(text) = outbound {
                            if let Err(e) = sink.send(WsMessage::Text(text.clone())).await {
                                pending = Some(text);
                                break Err(e.into());
                            }
                        }
                    }
                    _ = keepalive.tick() => {
                        if last_activity.elapsed() > PING_INTERVAL + PONG_TIMEOUT {
                            break Err(anyhow::anyhow!("no pong within {PONG_TIMEOUT:?} of last ping; connection presumed dead"));
                        }
                        if let Err(e) = sink.send(WsMessage::Ping(Vec::new())).await {
                            break Err(e.into());
                        }
                    }
                }
            };

            if let Err(e) = result {
                tracing::warn!(error = %e, "market data connection lost");
            }
            self.set_state(ConnState::Closing);
            let _ = sink.close().await;
            self.set_state(ConnState::Disconnected);

            if self.shutdown.is_cancelled() {
                break;
            }
            reconnect_delay(&mut backoff_secs, self.max_backoff).await;
        }

        tracing::info!("market data client stopped");
    }
}

async fn next_outbound(pending: &mut Option<String>, rx: &mut mpsc::Receiver<String>) -> Option<String> {
    if let Some(text) = pending.take() {
        Some(text)
    } else {
        rx.recv().await
    }
}

async fn reconnect_delay(backoff_secs: &mut f64, max_backoff: Duration) {
    let max = max_backoff.as_secs_f64().max(1.0);
    let capped = backoff_secs.min(max);
    let jitter = rand::random::<f64>() * capped * 0.2;
    let delay = capped + jitter;
    tracing::warn!(delay_secs = delay, "reconnecting to market data feed");
    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    *backoff_secs = (*backoff_secs * 2.0).min(max);
}

fn call_guarded(handler: &Handler, event: &serde_json::Value) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
    if let Err(panic) = result {
        tracing::error!(?panic, "event handler panicked");
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(256).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn client() -> Arc<MarketDataWsClient> {
        MarketDataWsClient::new("wss://example.invalid/stocks", "key", Duration::from_secs(60), 16)
    }

    /// Drain every frame currently sitting in the outbound send queue
    /// without starting the runner task.
    fn drain_outbound(c: &MarketDataWsClient) -> Vec<String> {
        let mut guard = c.outbound_rx.lock();
        let rx = guard.as_mut().expect("outbound receiver already taken by start()");
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn subscribe_is_idempotent() {
        let c = client();
        c.subscribe(ChannelTag::Trade, &[sym("AAPL")]);
        c.subscribe(ChannelTag::Trade, &[sym("AAPL")]);
        assert_eq!(c.subscribed(ChannelTag::Trade).len(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_present_symbols() {
        let c = client();
        c.subscribe(ChannelTag::Trade, &[sym("AAPL"), sym("MSFT")]);
        c.unsubscribe(ChannelTag::Trade, &[sym("AAPL"), sym("GOOG")]);
        let remaining = c.subscribed(ChannelTag::Trade);
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains(&sym("MSFT")));
    }

    #[test]
    fn replace_computes_add_and_remove_diff() {
        let c = client();
        c.subscribe(ChannelTag::Quote, &[sym("AAPL"), sym("MSFT")]);
        c.replace(ChannelTag::Quote, &[sym("MSFT"), sym("GOOG")]);
        let now = c.subscribed(ChannelTag::Quote);
        assert_eq!(now, [sym("MSFT"), sym("GOOG")].into_iter().collect());
    }

    #[test]
    fn repeated_replace_with_same_set_is_idempotent() {
        let c = client();
        c.subscribe(ChannelTag::Trade, &[sym("AAPL")]);
        c.replace(ChannelTag::Trade, &[sym("AAPL")]);
        assert_eq!(c.subscribed(ChannelTag::Trade), [sym("AAPL")].into_iter().collect());
    }

    #[test]
    fn repeated_replace_with_same_set_emits_no_frame_the_second_time() {
        let c = client();
        c.subscribe(ChannelTag::Trade, &[sym("AAPL")]);
        drain_outbound(&c);
        c.replace(ChannelTag::Trade, &[sym("AAPL")]);
        assert!(drain_outbound(&c).is_empty(), "replace with an unchanged set must not enqueue any frame");
    }

    #[test]
    fn dispatch_routes_by_channel_and_wildcard() {
        let c = client();
        let typed = Arc::new(AtomicUsize::new(0));
        let wild = Arc::new(AtomicUsize::new(0));
        let t2 = typed.clone();
        let w2 = wild.clone();
        c.register_handler(ChannelTag::Trade, move |_| {
            t2.fetch_add(1, Ordering::SeqCst);
        });
        c.register_wildcard_handler(move |_| {
            w2.fetch_add(1, Ordering::SeqCst);
        });
        c.dispatch(r#"{"ev":"T","sym":"AAPL"}"#);
        c.dispatch(r#"{"ev":"Q","sym":"AAPL"}"#);
        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(wild.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn status_auth_success_triggers_resub_and_skips_handlers() {
        let c = client();
        c.subscribe(ChannelTag::Trade, &[sym("AAPL")]);
        let hits = Arc::new(AtomicUsize::new(0));
        let h2 = hits.clone();
        c.register_wildcard_handler(move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        });
        c.dispatch(r#"{"status":"success","message":"authenticated"}"#);
        assert_eq!(c.state(), ConnState::OpenAuth);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(c.just_authenticated.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let c = client();
        let hits = Arc::new(AtomicUsize::new(0));
        let h2 = hits.clone();
        c.register_handler(ChannelTag::Trade, |_| panic!("boom"));
        c.register_handler(ChannelTag::Trade, move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        });
        c.dispatch(r#"{"ev":"T"}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
