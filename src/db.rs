// =============================================================================
// Postgres state source — bootstrap query plus LISTEN/NOTIFY (C7 dependency)
// =============================================================================
//
// Grounded on control/state_subscription_bridge.py's `_bootstrap_from_db`,
// `_column_exists`, and `_apply_db_notification`. The original talks to
// Postgres with psycopg2 in autocommit mode and polls `conn.notifies`;
// here `sqlx::postgres::PgListener` owns a dedicated LISTEN connection and
// the bridge awaits `recv()` directly instead of polling.

use std::collections::HashMap;

use sqlx::postgres::{PgListener, PgPool};
use sqlx::Row;

use crate::symbol::Symbol;
use crate::types::SymbolMode;

/// Table/column names are operator-supplied configuration, not request
/// input, so they are interpolated into the query text rather than bound
/// as parameters (Postgres has no placeholder syntax for identifiers).
#[derive(Debug, Clone)]
pub struct DbSchema {
    pub table: String,
    pub col_symbol: String,
    pub col_state: String,
    pub col_dnt: String,
    pub notify_channel: String,
}

impl Default for DbSchema {
    fn default() -> Self {
        Self {
            table: "symbol_state".to_string(),
            col_symbol: "symbol".to_string(),
            col_state: "state".to_string(),
            col_dnt: "do_not_trade".to_string(),
            notify_channel: "reflex_state_changes".to_string(),
        }
    }
}

/// Probe `information_schema.columns` for an optional column. Any query
/// failure is treated as "column missing," matching `_column_exists`'s
/// blanket `except Exception: return False`.
pub async fn column_exists(pool: &PgPool, table: &str, column: &str) -> bool {
    let result = sqlx::query(
        "SELECT 1 FROM information_schema.columns WHERE table_name = $1 AND column_name = $2 LIMIT 1",
    )
    .bind(table)
    .bind(column)
    .fetch_optional(pool)
    .await;
    matches!(result, Ok(Some(_)))
}

/// One-shot load of every WARM/HOT symbol at startup, excluding rows
/// flagged `do_not_trade` when that column exists.
pub async fn bootstrap(pool: &PgPool, schema: &DbSchema) -> anyhow::Result<HashMap<Symbol, SymbolMode>> {
    let has_dnt = column_exists(pool, &schema.table, &schema.col_dnt).await;
    let sql = if has_dnt {
        format!(
            "SELECT {sym} AS symbol, {state} AS state FROM {table} \
             WHERE {state} IN ('WARM','HOT') AND COALESCE({dnt}, FALSE) = FALSE",
            sym = schema.col_symbol,
            state = schema.col_state,
            table = schema.table,
            dnt = schema.col_dnt,
        )
    } else {
        format!(
            "SELECT {sym} AS symbol, {state} AS state FROM {table} WHERE {state} IN ('WARM','HOT')",
            sym = schema.col_symbol,
            state = schema.col_state,
            table = schema.table,
        )
    };

    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let mut out = HashMap::new();
    for row in rows {
        let symbol: String = row.try_get("symbol")?;
        let state: String = row.try_get("state")?;
        if let (Ok(symbol), Some(mode)) = (Symbol::parse(&symbol), SymbolMode::parse(&state)) {
            out.insert(symbol, mode);
        }
    }
    tracing::info!(count = out.len(), "db bootstrap loaded WARM/HOT symbols");
    Ok(out)
}

/// Open a dedicated LISTEN connection on `schema.notify_channel`.
pub async fn listen(database_url: &str, schema: &DbSchema) -> anyhow::Result<PgListener> {
    let mut listener = PgListener::connect(database_url).await?;
    listener.listen(&schema.notify_channel).await?;
    tracing::info!(channel = %schema.notify_channel, "listening on postgres notify channel");
    Ok(listener)
}

/// The decoded shape of a single NOTIFY payload, matching
/// `_apply_db_notification`'s three cases: a `{"batch": [...]}` envelope,
/// a bare `{"symbol", "state"}` object, or (when the payload isn't JSON at
/// all) a bare symbol triggering a point lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyPayload {
    Batch(Vec<(Symbol, SymbolMode)>),
    BareSymbol(Symbol),
    /// Valid JSON but neither a batch nor a `{symbol, state}` object.
    Unrecognized,
    Invalid,
}

pub fn parse_notify_payload(payload: &str) -> NotifyPayload {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => {
            if let Some(batch) = value.get("batch").and_then(|v| v.as_array()) {
                NotifyPayload::Batch(batch.iter().filter_map(item_to_pair).collect())
            } else if value.get("symbol").is_some() && value.get("state").is_some() {
                match item_to_pair(&value) {
                    Some(pair) => NotifyPayload::Batch(vec![pair]),
                    None => NotifyPayload::Invalid,
                }
            } else {
                NotifyPayload::Unrecognized
            }
        }
        Err(_) => {
            let trimmed = payload.trim();
            if trimmed.is_empty() {
                NotifyPayload::Invalid
            } else {
                Symbol::parse(trimmed).map(NotifyPayload::BareSymbol).unwrap_or(NotifyPayload::Invalid)
            }
        }
    }
}

fn item_to_pair(value: &serde_json::Value) -> Option<(Symbol, SymbolMode)> {
    let symbol = Symbol::parse(value.get("symbol")?.as_str()?).ok()?;
    let mode = SymbolMode::parse(value.get("state")?.as_str()?)?;
    Some((symbol, mode))
}
