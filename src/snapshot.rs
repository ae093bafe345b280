// =============================================================================
// Snapshot hydrator — derives microstructure fields from incoming quotes (C3)
// =============================================================================
//
// Grounded on shared_mem/hydrator.py::hydrate_snapshot, with the bps/ratio
// math style of market_data::orderbook::OrderBookManager::update.

use crate::types::QuoteEvent;

/// Guard against division by (near-)zero total size.
const EPSILON: f64 = 1e-9;

/// Per-symbol derived microstructure state, recomputed on every quote tick.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub spread: f64,
    pub mid: f64,
    pub bid_sz: f64,
    pub ask_sz: f64,
    pub imbalance: f64,
    /// Reserved for an alternate weighting of the same signal as
    /// `imbalance`; currently computed with the identical formula (§3).
    pub pressure: f64,
    pub last_update_ts_ns: i64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            spread: 0.0,
            mid: 0.0,
            bid_sz: 0.0,
            ask_sz: 0.0,
            imbalance: 0.0,
            pressure: 0.0,
            last_update_ts_ns: 0,
        }
    }
}

/// Derive a fresh `Snapshot` from a single quote. Pure function of the
/// quote — no cross-symbol state, no mutation of the input.
///
/// If `bid` or `ask` is missing (non-positive), returns `None` and the
/// caller should leave the symbol's existing snapshot untouched (§4.3
/// edge case: "quote is ignored").
pub fn derive(quote: &QuoteEvent) -> Option<Snapshot> {
    if quote.bid <= 0.0 || quote.ask <= 0.0 {
        return None;
    }

    let spread = (quote.ask - quote.bid).max(0.0);
    let mid = if spread > 0.0 {
        (quote.ask + quote.bid) / 2.0
    } else {
        quote.bid
    };

    let bid_sz = quote.bid_size as f64;
    let ask_sz = quote.ask_size as f64;
    let total = bid_sz + ask_sz;
    let imbalance = if total > EPSILON {
        (bid_sz - ask_sz) / total
    } else {
        0.0
    };

    Some(Snapshot {
        spread,
        mid,
        bid_sz,
        ask_sz,
        imbalance,
        pressure: imbalance,
        last_update_ts_ns: quote.ts_ns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;

    fn quote(bid: f64, ask: f64, bid_size: u32, ask_size: u32) -> QuoteEvent {
        QuoteEvent {
            symbol: Symbol::parse("AAPL").unwrap(),
            bid,
            ask,
            bid_size,
            ask_size,
            ts_ns: 42,
            exchange: None,
            conditions: None,
        }
    }

    #[test]
    fn derives_spread_mid_and_imbalance() {
        let q = quote(100.0, 100.10, 50, 150);
        let snap = derive(&q).unwrap();
        assert!((snap.spread - 0.10).abs() < 1e-9);
        assert!((snap.mid - 100.05).abs() < 1e-9);
        assert!((snap.imbalance - (-0.5)).abs() < 1e-9);
        assert_eq!(snap.last_update_ts_ns, 42);
    }

    #[test]
    fn zero_total_size_gives_zero_imbalance() {
        let q = quote(100.0, 100.10, 0, 0);
        let snap = derive(&q).unwrap();
        assert_eq!(snap.imbalance, 0.0);
    }

    #[test]
    fn missing_side_is_ignored() {
        let q = quote(0.0, 100.10, 10, 10);
        assert!(derive(&q).is_none());
    }

    #[test]
    fn zero_spread_mid_is_bid() {
        let q = quote(100.0, 100.0, 10, 10);
        let snap = derive(&q).unwrap();
        assert_eq!(snap.spread, 0.0);
        assert_eq!(snap.mid, 100.0);
    }
}
