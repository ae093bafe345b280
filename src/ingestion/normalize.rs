// =============================================================================
// Raw event normalization — wire JSON -> TradeEvent/QuoteEvent
// =============================================================================
//
// Grounded on ingestion/tick_stream.py::_normalize_trade's field mapping
// (`sym`/`p`/`s`/`t`/`x`/`i`/`c`), extended with the matching NBBO quote
// fields (`bp`/`ap`/`bs`/`as`) the original's quote-stream sibling uses.

use crate::symbol::Symbol;
use crate::types::{QuoteEvent, TradeEvent, TradeId};

/// Parse a raw trade event. Returns `None` on any missing/malformed
/// required field — the caller drops the event rather than propagating
/// a parse error, matching the original's `except Exception: return None`.
pub fn normalize_trade(event: &serde_json::Value) -> Option<TradeEvent> {
    let symbol = Symbol::parse(event.get("sym")?.as_str()?).ok()?;
    let price = event.get("p")?.as_f64()?;
    let size = event.get("s")?.as_u64()? as u32;
    let ts_ns = event.get("t")?.as_i64()?;
    let exchange = event.get("x").and_then(|v| v.as_u64()).map(|v| v as u16);
    let trade_id = event.get("i").and_then(trade_id_from);
    let conditions = event.get("c").and_then(conditions_from);

    Some(TradeEvent {
        symbol,
        price,
        size,
        ts_ns,
        exchange,
        trade_id,
        conditions,
    })
}

/// Parse a raw NBBO quote event. Returns `None` on malformed input or a
/// crossed/invalid quote (`QuoteEvent::is_valid` gate), matching §4.3's
/// "quote is ignored" edge case.
pub fn normalize_quote(event: &serde_json::Value) -> Option<QuoteEvent> {
    let symbol = Symbol::parse(event.get("sym")?.as_str()?).ok()?;
    let bid = event.get("bp")?.as_f64()?;
    let ask = event.get("ap")?.as_f64()?;
    let bid_size = event.get("bs")?.as_u64()? as u32;
    let ask_size = event.get("as")?.as_u64()? as u32;
    let ts_ns = event.get("t")?.as_i64()?;
    let exchange = event.get("x").and_then(|v| v.as_u64()).map(|v| v as u16);
    let conditions = event.get("c").and_then(conditions_from);

    let quote = QuoteEvent {
        symbol,
        bid,
        ask,
        bid_size,
        ask_size,
        ts_ns,
        exchange,
        conditions,
    };
    quote.is_valid().then_some(quote)
}

fn trade_id_from(value: &serde_json::Value) -> Option<TradeId> {
    if let Some(n) = value.as_u64() {
        Some(TradeId::Numeric(n))
    } else {
        value.as_str().map(|s| TradeId::Text(s.to_string()))
    }
}

fn conditions_from(value: &serde_json::Value) -> Option<Vec<u16>> {
    value
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|n| n as u16)).collect())
}
