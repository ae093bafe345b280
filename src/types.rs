// =============================================================================
// Core wire/domain types shared across the ingestion and bridge subsystems
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;

/// Upstream stream category. Only `Trade` and `Quote` have an ingestion
/// process wired up; `Aggregate` is modeled and dispatchable (the upstream
/// feed and the WS client both support it) but nothing subscribes to it,
/// per the distilled spec's "only T and Q are required."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelTag {
    #[serde(rename = "T")]
    Trade,
    #[serde(rename = "Q")]
    Quote,
    #[serde(rename = "A")]
    Aggregate,
}

impl ChannelTag {
    /// The single-character wire code used in `"<channel>.<symbol>"` subscribe
    /// params and in the `ev` field of inbound events.
    pub fn wire_code(self) -> &'static str {
        match self {
            Self::Trade => "T",
            Self::Quote => "Q",
            Self::Aggregate => "A",
        }
    }

    pub fn from_wire_code(code: &str) -> Option<Self> {
        match code {
            "T" => Some(Self::Trade),
            "Q" => Some(Self::Quote),
            "A" => Some(Self::Aggregate),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_code())
    }
}

/// A trade or point lookup identifier: Polygon-style feeds send this as
/// either a JSON number or a JSON string depending on venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TradeId {
    Numeric(u64),
    Text(String),
}

/// A single normalized trade print. Immutable after construction — every
/// field is set once by `ingestion::normalize::normalize_trade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: Symbol,
    pub price: f64,
    pub size: u32,
    pub ts_ns: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<TradeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<u16>>,
}

/// A single normalized NBBO quote. `QuoteEvent::validate` is the only
/// gate for the "ask >= bid" invariant — callers should not construct an
/// invalid quote and expect it to be silently accepted downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteEvent {
    pub symbol: Symbol,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: u32,
    pub ask_size: u32,
    pub ts_ns: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<u16>>,
}

impl QuoteEvent {
    /// A valid NBBO quote has `ask >= bid` whenever both sides are present
    /// (i.e. nonzero/positive). Crossed or locked-inverted quotes are
    /// rejected at the ingestion boundary.
    pub fn is_valid(&self) -> bool {
        if self.bid > 0.0 && self.ask > 0.0 {
            self.ask >= self.bid
        } else {
            true
        }
    }
}

/// Per-symbol subscription tier, priority-resolved by the bridge and acted
/// on by the ingestion processes' control-plane listener. Matches
/// `STATE_ORDER = {COLD: 0, WARM: 1, HOT: 2}` exactly — there is no
/// intermediate tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SymbolMode {
    Cold,
    Warm,
    Hot,
}

impl Default for SymbolMode {
    fn default() -> Self {
        Self::Cold
    }
}

impl SymbolMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "COLD" => Some(Self::Cold),
            "WARM" => Some(Self::Warm),
            "HOT" => Some(Self::Hot),
            _ => None,
        }
    }
}

impl std::fmt::Display for SymbolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cold => write!(f, "COLD"),
            Self::Warm => write!(f, "WARM"),
            Self::Hot => write!(f, "HOT"),
        }
    }
}

/// A control-plane instruction delivered over `wsctl:ticks`/`wsctl:quotes`,
/// consumed by an `ingestion::process::IngestionProcess` to drive its
/// `ws::client::MarketDataWsClient` subscription set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ControlMessage {
    Subscribe { channel: ChannelTag, symbols: Vec<Symbol> },
    Unsubscribe { channel: ChannelTag, symbols: Vec<Symbol> },
    Replace { channel: ChannelTag, symbols: Vec<Symbol> },
}

impl ControlMessage {
    pub fn channel(&self) -> ChannelTag {
        match self {
            Self::Subscribe { channel, .. }
            | Self::Unsubscribe { channel, .. }
            | Self::Replace { channel, .. } => *channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_tag_wire_round_trip() {
        for tag in [ChannelTag::Trade, ChannelTag::Quote, ChannelTag::Aggregate] {
            assert_eq!(ChannelTag::from_wire_code(tag.wire_code()), Some(tag));
        }
    }

    #[test]
    fn quote_validity() {
        let sym = Symbol::parse("AAPL").unwrap();
        let valid = QuoteEvent {
            symbol: sym.clone(),
            bid: 100.0,
            ask: 100.1,
            bid_size: 1,
            ask_size: 1,
            ts_ns: 0,
            exchange: None,
            conditions: None,
        };
        assert!(valid.is_valid());

        let crossed = QuoteEvent {
            bid: 100.2,
            ask: 100.0,
            ..valid
        };
        assert!(!crossed.is_valid());
    }

    #[test]
    fn symbol_mode_parse_rejects_unknown() {
        assert_eq!(SymbolMode::parse("hot"), Some(SymbolMode::Hot));
        assert_eq!(SymbolMode::parse("scalding"), None);
    }

    #[test]
    fn control_message_replace_round_trips_wire_tag() {
        let msg = ControlMessage::Replace {
            channel: ChannelTag::Trade,
            symbols: vec![Symbol::parse("AAPL").unwrap()],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["op"], "replace");
        assert_eq!(json["channel"], "T");
        let back: ControlMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.channel(), ChannelTag::Trade);
    }
}
