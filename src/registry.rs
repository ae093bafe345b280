// =============================================================================
// Symbol registry — thread-safe symbol -> live state map (C2)
// =============================================================================
//
// Grounded on shared_mem/registry.py's `_Registry` (lazy dict-of-dicts with a
// single lock) but with a per-record inner lock nested under the map lock, so
// hydrating one symbol's snapshot doesn't contend with a `modes()` scan of
// every other symbol. Mirrors the two-tier locking in app_state.rs's
// `RwLock<HashMap<String, Arc<...>>>` fields.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::snapshot::Snapshot;
use crate::symbol::Symbol;
use crate::types::SymbolMode;

/// Live per-symbol state: mode, operator flags, and the latest derived
/// snapshot. Created lazily on first reference, never removed.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub symbol: Symbol,
    pub mode: SymbolMode,
    pub flags: HashMap<String, Value>,
    pub snapshot: Snapshot,
    pub last_price: Option<f64>,
}

impl SymbolRecord {
    fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            mode: SymbolMode::Cold,
            flags: HashMap::new(),
            snapshot: Snapshot::default(),
            last_price: None,
        }
    }
}

/// Thread-safe map from symbol to its live record. Keys are always
/// upper-cased (via `Symbol`'s own normalization).
pub struct SymbolRegistry {
    records: RwLock<HashMap<Symbol, Arc<RwLock<SymbolRecord>>>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Return the record for `symbol`, creating it with defaults
    /// (`mode = COLD`, zeroed snapshot) if this is the first reference.
    pub fn get_or_create(&self, symbol: &Symbol) -> Arc<RwLock<SymbolRecord>> {
        if let Some(existing) = self.records.read().get(symbol) {
            return existing.clone();
        }
        let mut write = self.records.write();
        write
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SymbolRecord::new(symbol.clone()))))
            .clone()
    }

    /// Atomically update a symbol's mode.
    pub fn set_mode(&self, symbol: &Symbol, mode: SymbolMode) {
        let record = self.get_or_create(symbol);
        record.write().mode = mode;
    }

    /// Apply a freshly derived snapshot to a symbol, also updating
    /// `last_price` to the snapshot's mid, matching the original's
    /// "keep last_price aligned if mid moves."
    pub fn apply_snapshot(&self, symbol: &Symbol, snapshot: Snapshot) {
        let record = self.get_or_create(symbol);
        let mut guard = record.write();
        guard.last_price = Some(snapshot.mid);
        guard.snapshot = snapshot;
    }

    /// A point-in-time copy of every symbol's current mode.
    pub fn modes(&self) -> HashMap<Symbol, SymbolMode> {
        self.records
            .read()
            .iter()
            .map(|(sym, rec)| (sym.clone(), rec.read().mode))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
