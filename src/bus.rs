// =============================================================================
// Message bus — in-process publish/subscribe with bounded recent-history (C4)
// =============================================================================
//
// Grounded on pubsub/bus.py's EventBus: a dict of subscriber lists plus a
// bounded recent-history deque, synchronous fan-out on `publish`. Rust adds a
// type key alongside the topic string so one bus instance can carry
// heterogeneous payload types (ControlMessage, TradeEvent, HealthRecord, ...)
// without every subscriber having to downcast by hand.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};

use parking_lot::{Mutex, RwLock};

/// Well-known topic names used by the ingestion/bridge wiring (§6).
pub mod topics {
    pub const WSCTL_TICKS: &str = "wsctl:ticks";
    pub const WSCTL_QUOTES: &str = "wsctl:quotes";
    pub const STATE_EVALUATOR: &str = "state:evaluator";
    pub const STATE_OVERRIDE: &str = "state:override";
    pub const STATE_CHART: &str = "state:chart";
    pub const BUS_TRADES: &str = "bus:trades";
    pub const BUS_QUOTES: &str = "bus:quotes";

    pub fn health(proc: &str) -> String {
        format!("health:{proc}")
    }
}

/// A short diagnostic record of a single publish, independent of the
/// concrete payload type. Kept cheap deliberately: `recent()` is a
/// diagnostics surface, not a replay log, so the bus does not pay to
/// serialize every trade/quote it fans out.
#[derive(Debug, Clone)]
pub struct BusRecord {
    pub topic: String,
    pub summary: String,
}

type Subscriber = Box<dyn Fn(&dyn Any) + Send + Sync>;

#[derive(Default)]
struct TopicSubscribers {
    by_type: HashMap<TypeId, Vec<Subscriber>>,
}

/// In-process publish/subscribe bus with topic fan-out and bounded recent
/// history, matching the ordering and failure-isolation guarantees in §4.4:
/// within one topic, a given subscriber sees messages in publish order; a
/// panicking subscriber is isolated and does not stop fan-out to others.
pub struct MessageBus {
    subscribers: RwLock<HashMap<String, TopicSubscribers>>,
    recent: Mutex<VecDeque<BusRecord>>,
    recent_capacity: usize,
}

impl MessageBus {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            recent: Mutex::new(VecDeque::with_capacity(recent_capacity.min(1024))),
            recent_capacity: recent_capacity.max(1),
        }
    }

    /// Register a callback for every message of type `T` published on
    /// `topic`. Subscribers for the same `(topic, T)` pair are invoked in
    /// registration order.
    pub fn subscribe<T, F>(&self, topic: &str, callback: F)
    where
        T: Any + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let boxed: Subscriber = Box::new(move |msg: &dyn Any| {
            if let Some(typed) = msg.downcast_ref::<T>() {
                callback(typed);
            }
        });
        let mut subs = self.subscribers.write();
        subs.entry(topic.to_string())
            .or_default()
            .by_type
            .entry(TypeId::of::<T>())
            .or_default()
            .push(boxed);
    }

    /// Publish `message` on `topic`, fanning out synchronously to every
    /// `T`-typed subscriber of `topic`, then appending a diagnostic record
    /// to the recent-history ring. A subscriber that panics is caught and
    /// logged; the remaining subscribers still run.
    pub fn publish<T>(&self, topic: &str, message: T, summary: impl Into<String>)
    where
        T: Any + 'static,
    {
        let type_id = TypeId::of::<T>();
        let guard = self.subscribers.read();
        if let Some(topic_subs) = guard.get(topic) {
            if let Some(handlers) = topic_subs.by_type.get(&type_id) {
                for handler in handlers {
                    let msg_ref: &dyn Any = &message;
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        handler(msg_ref);
                    }));
                    if let Err(panic) = result {
                        tracing::error!(topic, ?panic, "bus subscriber panicked");
                    }
                }
            }
        }
        drop(guard);

        let mut recent = self.recent.lock();
        if recent.len() >= self.recent_capacity {
            recent.pop_front();
        }
        recent.push_back(BusRecord {
            topic: topic.to_string(),
            summary: summary.into(),
        });
    }

    /// The last `limit` published (topic, summary) records, oldest-first.
    pub fn recent(&self, limit: usize) -> Vec<BusRecord> {
        let recent = self.recent.lock();
        let start = recent.len().saturating_sub(limit);
        recent.iter().skip(start).cloned().collect()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn delivers_in_publish_order_to_same_subscriber() {
        let bus = MessageBus::default();
        let seen: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe::<i32, _>("nums", move |v| seen2.lock().push(*v));
        for i in 0..5 {
            bus.publish("nums", i, format!("{i}"));
        }
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn only_matching_type_and_topic_receive() {
        let bus = MessageBus::default();
        let int_hits = Arc::new(AtomicUsize::new(0));
        let str_hits = Arc::new(AtomicUsize::new(0));
        let i2 = int_hits.clone();
        let s2 = str_hits.clone();
        bus.subscribe::<i32, _>("a", move |_| {
            i2.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe::<String, _>("a", move |_| {
            s2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish("a", 7_i32, "seven");
        bus.publish("b", 7_i32, "seven-on-b");
        assert_eq!(int_hits.load(Ordering::SeqCst), 1);
        assert_eq!(str_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = MessageBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h2 = hits.clone();
        bus.subscribe::<i32, _>("x", |_| panic!("boom"));
        bus.subscribe::<i32, _>("x", move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish("x", 1, "one");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recent_is_bounded() {
        let bus = MessageBus::new(3);
        for i in 0..10 {
            bus.publish("t", i, format!("{i}"));
        }
        let recent = bus.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent.last().unwrap().summary, "9");
    }
}
