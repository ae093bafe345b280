// =============================================================================
// Ingestion process — owns one WS connection, parses, publishes, reports (C6)
// =============================================================================
//
// Grounded on ingestion/tick_stream.py::TradeProcess (and its unseen quote
// sibling, same shape). Generalized over `ChannelTag` rather than
// duplicated per channel, since nothing else about the class differs
// between "T" and "Q" besides which channel tag it owns and which
// normalize function it calls — the same kind of generalization the
// teacher applies in its single parameterized `CandleBuffer`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::buffers::SymbolBuffers;
use crate::bus::{self, MessageBus};
use crate::health::{HealthRecord, HealthRegistry, ProcessHealth};
use crate::ingestion::normalize;
use crate::registry::SymbolRegistry;
use crate::snapshot;
use crate::types::{ChannelTag, ControlMessage};
use crate::ws::MarketDataWsClient;

/// Default bounded queue depth for the trade-tagged process (§4.6).
pub const DEFAULT_TRADE_QUEUE_CAPACITY: usize = 200_000;
/// Default bounded queue depth for the quote-tagged process (§4.6).
pub const DEFAULT_QUOTE_QUEUE_CAPACITY: usize = 500_000;
/// Default worker task count per process (§4.6).
pub const DEFAULT_WORKERS: usize = 2;

/// One channel's ingestion pipeline: a WS connection, a bounded work
/// queue with evict-oldest backpressure, N parsing workers, a
/// control-plane subscription, and periodic health reporting.
pub struct IngestionProcess {
    channel: ChannelTag,
    ws: Arc<MarketDataWsClient>,
    bus: Arc<MessageBus>,
    health: Arc<HealthRegistry>,
    registry: Arc<SymbolRegistry>,
    buffers: Arc<SymbolBuffers>,
    queue: Mutex<VecDeque<serde_json::Value>>,
    queue_notify: Notify,
    capacity: usize,
    workers: usize,
    processed: AtomicU64,
    dropped: AtomicU64,
    shutdown: CancellationToken,
}

impl IngestionProcess {
    pub fn new(
        channel: ChannelTag,
        ws: Arc<MarketDataWsClient>,
        bus: Arc<MessageBus>,
        health: Arc<HealthRegistry>,
        registry: Arc<SymbolRegistry>,
        buffers: Arc<SymbolBuffers>,
        capacity: usize,
        workers: usize,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            channel,
            ws: Arc::clone(&ws),
            bus,
            health,
            registry,
            buffers,
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            capacity: capacity.max(1),
            workers: workers.max(1),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });

        let enqueue_target = Arc::clone(&this);
        ws.register_handler(channel, move |event| enqueue_target.enqueue(event.clone()));
        this
    }

    fn proc_name(&self) -> &'static str {
        match self.channel {
            ChannelTag::Trade => "tick",
            ChannelTag::Quote => "quote",
            ChannelTag::Aggregate => "aggregate",
        }
    }

    fn control_topic(&self) -> String {
        match self.channel {
            ChannelTag::Trade => bus::topics::WSCTL_TICKS.to_string(),
            ChannelTag::Quote => bus::topics::WSCTL_QUOTES.to_string(),
            ChannelTag::Aggregate => "wsctl:aggregates".to_string(),
        }
    }

    /// Start the WS connection, worker pool, control-plane subscription,
    /// and health loop. Call once.
    pub fn start(self: &Arc<Self>) {
        self.ws.start();

        for id in 0..self.workers {
            let worker = Arc::clone(self);
            tokio::spawn(async move { worker.worker_loop(id).await });
        }

        let control_target = Arc::clone(self);
        self.bus.subscribe::<ControlMessage, _>(&self.control_topic(), move |msg| {
            control_target.apply_control(msg);
        });

        let health_target = Arc::clone(self);
        tokio::spawn(async move { health_target.health_loop().await });
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.ws.shutdown();
    }

    /// Push a raw event onto the work queue, evicting the oldest queued
    /// event when at capacity rather than blocking the WS handler thread.
    fn enqueue(&self, event: serde_json::Value) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 10_000 == 1 {
                tracing::warn!(channel = %self.channel, dropped, "ingestion queue saturated; evicting oldest");
            }
        }
        queue.push_back(event);
        drop(queue);
        self.queue_notify.notify_one();
    }

    fn apply_control(&self, msg: &ControlMessage) {
        if msg.channel() != self.channel {
            return;
        }
        match msg {
            ControlMessage::Subscribe { symbols, .. } => self.ws.subscribe(self.channel, symbols),
            ControlMessage::Unsubscribe { symbols, .. } => self.ws.unsubscribe(self.channel, symbols),
            ControlMessage::Replace { symbols, .. } => self.ws.replace(self.channel, symbols),
        }
    }

    /// Normalize one raw event, land it in the shared buffers/registry
    /// (§2's `C3 updates C2 via quotes; trades land in C1`), then publish
    /// the normalized form on the external bus.
    fn process_event(&self, event: &serde_json::Value) {
        match self.channel {
            ChannelTag::Trade => {
                if let Some(trade) = normalize::normalize_trade(event) {
                    self.buffers.get_or_create(&trade.symbol).trades.append(trade.clone());
                    let summary = format!("{} {}x{}", trade.symbol, trade.price, trade.size);
                    self.bus.publish(bus::topics::BUS_TRADES, trade, summary);
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
            }
            ChannelTag::Quote => {
                if let Some(quote) = normalize::normalize_quote(event) {
                    self.buffers.get_or_create(&quote.symbol).quotes.append(quote.clone());
                    if let Some(snap) = snapshot::derive(&quote) {
                        self.registry.apply_snapshot(&quote.symbol, snap);
                    }
                    let summary = format!("{} {}/{}", quote.symbol, quote.bid, quote.ask);
                    self.bus.publish(bus::topics::BUS_QUOTES, quote, summary);
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
            }
            ChannelTag::Aggregate => {}
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let next = self.queue.lock().pop_front();
            match next {
                Some(event) => self.process_event(&event),
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.queue_notify.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                    }
                }
            }
        }
        tracing::debug!(worker_id, channel = %self.channel, "ingestion worker stopped");
    }

    fn build_health(&self) -> HealthRecord {
        let snapshot = ProcessHealth {
            channel: self.channel,
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            qsize: self.queue.lock().len(),
            subscribed: self.ws.subscribed(self.channel).len(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
        };
        match self.channel {
            ChannelTag::Trade => HealthRecord::Tick(snapshot),
            _ => HealthRecord::Quote(snapshot),
        }
    }

    async fn health_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let record = self.build_health();
                    self.health.set(record.clone());
                    self.bus.publish(&bus::topics::health(self.proc_name()), record, self.proc_name());
                }
            }
        }
    }
}
