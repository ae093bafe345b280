// =============================================================================
// Source maps — per-source symbol state and priority resolution (C7 model)
// =============================================================================
//
// Grounded on control/state_subscription_bridge.py's `state_by_source`
// dict-of-dicts, `chart_ts`, `SOURCE_PRIORITY`, and `_effective_state_for`.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;
use crate::types::SymbolMode;

/// Default chart-assertion TTL, overridable via `EngineConfig`.
pub const DEFAULT_CHART_TTL: Duration = Duration::from_secs(45);
/// Default time to coalesce a burst of source updates into a single push,
/// overridable via `EngineConfig`.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// One of the four inputs the bridge resolves between. `SOURCE_PRIORITY`
/// in the original is exactly this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Override,
    Evaluator,
    Chart,
    Db,
}

impl Source {
    pub const PRIORITY: [Source; 4] = [Source::Override, Source::Evaluator, Source::Chart, Source::Db];
}

/// One `{symbol, state}` pair as it arrives from an upstream source,
/// wire-compatible with `{"symbol": "...", "state": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolState {
    pub symbol: String,
    pub state: String,
}

/// A source update: either a single symbol/state pair or a batch,
/// matching `_apply_source_payload`'s `"batch" in payload` check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceUpdate {
    Batch { batch: Vec<SymbolState> },
    Single(SymbolState),
}

impl SourceUpdate {
    /// Validated, parsed (symbol, mode) pairs. Invalid entries are
    /// dropped individually rather than failing the whole update,
    /// matching the original's per-item `continue`.
    pub fn items(&self) -> Vec<(Symbol, SymbolMode)> {
        let raw: Vec<&SymbolState> = match self {
            SourceUpdate::Batch { batch } => batch.iter().collect(),
            SourceUpdate::Single(item) => vec![item],
        };
        raw.into_iter()
            .filter_map(|item| {
                let symbol = Symbol::parse(&item.symbol).ok()?;
                let mode = SymbolMode::parse(&item.state)?;
                Some((symbol, mode))
            })
            .collect()
    }
}

/// The four priority maps plus the chart TTL clock.
pub struct SourceMaps {
    pub db: HashMap<Symbol, SymbolMode>,
    pub evaluator: HashMap<Symbol, SymbolMode>,
    pub override_: HashMap<Symbol, SymbolMode>,
    pub chart: HashMap<Symbol, SymbolMode>,
    pub chart_ts: HashMap<Symbol, Instant>,
    chart_ttl: Duration,
}

impl Default for SourceMaps {
    fn default() -> Self {
        Self::new(DEFAULT_CHART_TTL)
    }
}

impl SourceMaps {
    pub fn new(chart_ttl: Duration) -> Self {
        Self {
            db: HashMap::new(),
            evaluator: HashMap::new(),
            override_: HashMap::new(),
            chart: HashMap::new(),
            chart_ts: HashMap::new(),
            chart_ttl,
        }
    }

    fn map_for(&self, source: Source) -> &HashMap<Symbol, SymbolMode> {
        match source {
            Source::Override => &self.override_,
            Source::Evaluator => &self.evaluator,
            Source::Chart => &self.chart,
            Source::Db => &self.db,
        }
    }

    fn map_for_mut(&mut self, source: Source) -> &mut HashMap<Symbol, SymbolMode> {
        match source {
            Source::Override => &mut self.override_,
            Source::Evaluator => &mut self.evaluator,
            Source::Chart => &mut self.chart,
            Source::Db => &mut self.db,
        }
    }

    /// Apply an update from any non-chart source. Chart updates go
    /// through `apply_chart_update`, which also stamps `chart_ts`.
    pub fn apply_update(&mut self, source: Source, symbol: Symbol, mode: SymbolMode) {
        debug_assert!(source != Source::Chart, "chart updates must go through apply_chart_update");
        self.map_for_mut(source).insert(symbol, mode);
    }

    pub fn apply_chart_update(&mut self, symbol: Symbol, mode: SymbolMode, now: Instant) {
        self.chart_ts.insert(symbol.clone(), now);
        self.chart.insert(symbol, mode);
    }

    /// Evict chart entries older than this registry's configured TTL,
    /// returning the symbols removed.
    pub fn expire_chart(&mut self, now: Instant) -> Vec<Symbol> {
        let chart_ttl = self.chart_ttl;
        let expired: Vec<Symbol> = self
            .chart_ts
            .iter()
            .filter(|(_, ts)| now.saturating_duration_since(**ts) > chart_ttl)
            .map(|(symbol, _)| symbol.clone())
            .collect();
        for symbol in &expired {
            self.chart_ts.remove(symbol);
            self.chart.remove(symbol);
        }
        expired
    }

    /// Priority-resolved effective mode for one symbol: walk
    /// override -> evaluator -> chart -> db, skipping a chart hit whose
    /// entry has aged out, defaulting to `COLD`.
    pub fn effective_state_for(&self, symbol: &Symbol, now: Instant) -> SymbolMode {
        for source in Source::PRIORITY {
            let Some(mode) = self.map_for(source).get(symbol) else {
                continue;
            };
            if source == Source::Chart {
                let fresh = self
                    .chart_ts
                    .get(symbol)
                    .map(|ts| now.saturating_duration_since(*ts) <= self.chart_ttl)
                    .unwrap_or(false);
                if !fresh {
                    continue;
                }
            }
            return *mode;
        }
        SymbolMode::Cold
    }

    /// Every symbol asserted by any source, regardless of current mode.
    pub fn all_symbols(&self) -> BTreeSet<Symbol> {
        self.override_
            .keys()
            .chain(self.evaluator.keys())
            .chain(self.chart.keys())
            .chain(self.db.keys())
            .cloned()
            .collect()
    }

    /// `(eff_warm, eff_hot)`, sorted by construction via `BTreeSet`.
    pub fn compute_effective(&self, now: Instant) -> (BTreeSet<Symbol>, BTreeSet<Symbol>) {
        let mut warm = BTreeSet::new();
        let mut hot = BTreeSet::new();
        for symbol in self.all_symbols() {
            match self.effective_state_for(&symbol, now) {
                SymbolMode::Hot => {
                    hot.insert(symbol);
                }
                SymbolMode::Warm => {
                    warm.insert(symbol);
                }
                SymbolMode::Cold => {}
            }
        }
        (warm, hot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn override_wins_over_every_other_source() {
        let mut maps = SourceMaps::default();
        let now = Instant::now();
        maps.apply_update(Source::Db, sym("AAPL"), SymbolMode::Hot);
        maps.apply_update(Source::Evaluator, sym("AAPL"), SymbolMode::Warm);
        maps.apply_update(Source::Override, sym("AAPL"), SymbolMode::Cold);
        assert_eq!(maps.effective_state_for(&sym("AAPL"), now), SymbolMode::Cold);
    }

    #[test]
    fn missing_symbol_defaults_to_cold() {
        let maps = SourceMaps::default();
        assert_eq!(maps.effective_state_for(&sym("GHOST"), Instant::now()), SymbolMode::Cold);
    }

    #[test]
    fn stale_chart_entry_is_skipped_in_favor_of_lower_priority_source() {
        let mut maps = SourceMaps::default();
        let start = Instant::now();
        maps.apply_chart_update(sym("TSLA"), SymbolMode::Hot, start);
        maps.apply_update(Source::Db, sym("TSLA"), SymbolMode::Warm);
        let later = start + DEFAULT_CHART_TTL + Duration::from_secs(1);
        assert_eq!(maps.effective_state_for(&sym("TSLA"), later), SymbolMode::Warm);
    }

    #[test]
    fn expire_chart_removes_stale_entries_only() {
        let mut maps = SourceMaps::default();
        let start = Instant::now();
        maps.apply_chart_update(sym("OLD"), SymbolMode::Hot, start);
        maps.apply_chart_update(sym("FRESH"), SymbolMode::Hot, start + Duration::from_secs(40));
        let now = start + DEFAULT_CHART_TTL + Duration::from_secs(1);
        let expired = maps.expire_chart(now);
        assert_eq!(expired, vec![sym("OLD")]);
        assert!(maps.chart.contains_key(&sym("FRESH")));
        assert!(!maps.chart.contains_key(&sym("OLD")));
    }

    #[test]
    fn compute_effective_partitions_warm_and_hot() {
        let mut maps = SourceMaps::default();
        maps.apply_update(Source::Db, sym("AAPL"), SymbolMode::Hot);
        maps.apply_update(Source::Db, sym("MSFT"), SymbolMode::Warm);
        let (warm, hot) = maps.compute_effective(Instant::now());
        assert_eq!(hot, [sym("AAPL")].into_iter().collect());
        assert_eq!(warm, [sym("MSFT")].into_iter().collect());
    }

    #[test]
    fn source_update_items_skips_invalid_entries() {
        let update = SourceUpdate::Batch {
            batch: vec![
                SymbolState { symbol: "AAPL".to_string(), state: "HOT".to_string() },
                SymbolState { symbol: "".to_string(), state: "HOT".to_string() },
                SymbolState { symbol: "MSFT".to_string(), state: "LUKEWARM".to_string() },
            ],
        };
        assert_eq!(update.items(), vec![(sym("AAPL"), SymbolMode::Hot)]);
    }

    #[test]
    fn single_source_update_parses_as_one_item() {
        let update = SourceUpdate::Single(SymbolState { symbol: "nvda".to_string(), state: "warm".to_string() });
        assert_eq!(update.items(), vec![(sym("NVDA"), SymbolMode::Warm)]);
    }
}
