// =============================================================================
// Ring buffer pair — per-symbol double-buffered bounded queues (C1)
// =============================================================================
//
// Grounded on shared_mem/buffers.py's DoubleRingBuffer: writers append to an
// `active` deque; a consumer calls `drain()` which atomically swaps `active`
// and `drain`, handing the caller exclusive ownership of everything that was
// in `active` at the moment of the swap. Python's `deque(maxlen=...)` evicts
// the oldest item automatically; `VecDeque` has no such bound, so capacity is
// enforced by hand in `append`.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::symbol::Symbol;
use crate::types::{QuoteEvent, TradeEvent};

/// Default capacity for the trades ring buffer (§3).
pub const DEFAULT_TRADE_CAPACITY: usize = 200_000;
/// Default capacity for the quotes ring buffer (§3).
pub const DEFAULT_QUOTE_CAPACITY: usize = 300_000;

/// A bounded, lock-protected double deque: `append` is O(1) and never
/// blocks or fails; `drain()` swaps the active/drain halves and returns
/// everything that was active, leaving the buffer empty for new writers.
pub struct DoubleRingBuffer<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

struct Inner<T> {
    active: VecDeque<T>,
    drain: VecDeque<T>,
}

impl<T> DoubleRingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                active: VecDeque::with_capacity(capacity.min(1024)),
                drain: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Append an item, evicting the oldest active item if at capacity.
    /// Never blocks and never fails.
    pub fn append(&self, item: T) {
        let mut inner = self.inner.lock();
        if inner.active.len() >= self.capacity {
            inner.active.pop_front();
        }
        inner.active.push_back(item);
    }

    /// Atomically swap `active` and `drain`, returning everything that was
    /// in `active`. The previously-drained half becomes the new `active`
    /// (it is guaranteed empty, since the previous `drain()` call cleared
    /// it before returning).
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        std::mem::swap(&mut inner.active, &mut inner.drain);
        inner.drain.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> DoubleRingBuffer<T> {
    /// A read-only view of the most recent `n` items, oldest-first. Does
    /// not mutate the buffer.
    pub fn snapshot(&self, n: usize) -> Vec<T> {
        let inner = self.inner.lock();
        let len = inner.active.len();
        let start = len.saturating_sub(n);
        inner.active.iter().skip(start).cloned().collect()
    }
}

/// Per-symbol pair of ring buffers: trades and quotes.
pub struct RingBufferPair {
    pub trades: DoubleRingBuffer<TradeEvent>,
    pub quotes: DoubleRingBuffer<QuoteEvent>,
}

impl RingBufferPair {
    pub fn new(trade_capacity: usize, quote_capacity: usize) -> Self {
        Self {
            trades: DoubleRingBuffer::new(trade_capacity),
            quotes: DoubleRingBuffer::new(quote_capacity),
        }
    }
}

impl Default for RingBufferPair {
    fn default() -> Self {
        Self::new(DEFAULT_TRADE_CAPACITY, DEFAULT_QUOTE_CAPACITY)
    }
}

/// The process-wide `symbol -> RingBufferPair` map (§3's "module-level
/// globals... become an explicit application context"). Lazily creates one
/// pair per symbol on first reference, mirroring `registry::SymbolRegistry`'s
/// own lazy-creation contract; pairs are never removed.
pub struct SymbolBuffers {
    pairs: RwLock<HashMap<Symbol, Arc<RingBufferPair>>>,
    trade_capacity: usize,
    quote_capacity: usize,
}

impl SymbolBuffers {
    pub fn new(trade_capacity: usize, quote_capacity: usize) -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            trade_capacity,
            quote_capacity,
        }
    }

    /// Return the ring buffer pair for `symbol`, creating it with this
    /// registry's configured capacities on first reference.
    pub fn get_or_create(&self, symbol: &Symbol) -> Arc<RingBufferPair> {
        if let Some(existing) = self.pairs.read().get(symbol) {
            return existing.clone();
        }
        let mut write = self.pairs.write();
        write
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(RingBufferPair::new(self.trade_capacity, self.quote_capacity)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.pairs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolBuffers {
    fn default() -> Self {
        Self::new(DEFAULT_TRADE_CAPACITY, DEFAULT_QUOTE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_drain_is_suffix_of_input() {
        let buf: DoubleRingBuffer<i32> = DoubleRingBuffer::new(10);
        for i in 0..5 {
            buf.append(i);
        }
        let drained = buf.drain();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drain_leaves_buffer_empty_and_reusable() {
        let buf: DoubleRingBuffer<i32> = DoubleRingBuffer::new(10);
        buf.append(1);
        let _ = buf.drain();
        assert_eq!(buf.len(), 0);
        buf.append(2);
        assert_eq!(buf.drain(), vec![2]);
    }

    #[test]
    fn no_item_observed_twice_across_drains() {
        let buf: DoubleRingBuffer<i32> = DoubleRingBuffer::new(10);
        buf.append(1);
        let first = buf.drain();
        buf.append(2);
        let second = buf.drain();
        assert_eq!(first, vec![1]);
        assert_eq!(second, vec![2]);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let buf: DoubleRingBuffer<i32> = DoubleRingBuffer::new(3);
        for i in 0..5 {
            buf.append(i);
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.drain(), vec![2, 3, 4]);
    }

    #[test]
    fn capacity_one_never_grows() {
        let buf: DoubleRingBuffer<i32> = DoubleRingBuffer::new(1);
        buf.append(1);
        buf.append(2);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.drain(), vec![2]);
    }

    #[test]
    fn snapshot_does_not_mutate() {
        let buf: DoubleRingBuffer<i32> = DoubleRingBuffer::new(10);
        for i in 0..5 {
            buf.append(i);
        }
        assert_eq!(buf.snapshot(3), vec![2, 3, 4]);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn empty_drain_returns_empty() {
        let buf: DoubleRingBuffer<i32> = DoubleRingBuffer::new(10);
        assert!(buf.drain().is_empty());
    }

    fn trade(symbol: &str, price: f64) -> TradeEvent {
        TradeEvent {
            symbol: Symbol::parse(symbol).unwrap(),
            price,
            size: 1,
            ts_ns: 0,
            exchange: None,
            trade_id: None,
            conditions: None,
        }
    }

    #[test]
    fn symbol_buffers_lazily_creates_per_symbol_pair() {
        let bufs = SymbolBuffers::new(10, 10);
        let sym = Symbol::parse("AAPL").unwrap();
        assert!(bufs.is_empty());
        let pair = bufs.get_or_create(&sym);
        pair.trades.append(trade("AAPL", 1.0));
        assert_eq!(bufs.len(), 1);
        let same = bufs.get_or_create(&sym);
        assert_eq!(same.trades.len(), 1);
    }

    #[test]
    fn symbol_buffers_keeps_symbols_independent() {
        let bufs = SymbolBuffers::new(10, 10);
        bufs.get_or_create(&Symbol::parse("AAPL").unwrap()).trades.append(trade("AAPL", 1.0));
        bufs.get_or_create(&Symbol::parse("MSFT").unwrap()).trades.append(trade("MSFT", 2.0));
        assert_eq!(bufs.len(), 2);
        let drained = bufs.get_or_create(&Symbol::parse("AAPL").unwrap()).trades.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].price, 1.0);
    }
}
