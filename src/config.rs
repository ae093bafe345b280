// =============================================================================
// Engine configuration — environment-driven, with a JSON-reloadable tunables
// slice for the bridge's table/column mapping (C7 dependency)
// =============================================================================
//
// Grounded on runtime_config.rs's serde-default pattern (every field has a
// default so a partial or missing file still loads) and on the teacher's
// `main.rs` for how `RUST_LOG`/`tracing_subscriber::EnvFilter` are wired.
// Unlike `RuntimeConfig`, most of this crate's settings are read once from
// the process environment at startup rather than hot-reloaded from disk —
// an API key or a DB URL has no sensible "reload while running" story. The
// one piece that benefits from the teacher's load/save pattern, the bridge's
// table/column names, gets its own small `BridgeSchemaConfig` below.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bridge::sources::{DEFAULT_CHART_TTL, DEFAULT_DEBOUNCE};
use crate::buffers::{DEFAULT_QUOTE_CAPACITY, DEFAULT_TRADE_CAPACITY};
use crate::db::DbSchema;

fn default_ws_url() -> String {
    "wss://market-feed.example.com/stream".to_string()
}

fn default_trade_queue_capacity() -> usize {
    200_000
}

fn default_quote_queue_capacity() -> usize {
    500_000
}

fn default_trade_buffer_capacity() -> usize {
    DEFAULT_TRADE_CAPACITY
}

fn default_quote_buffer_capacity() -> usize {
    DEFAULT_QUOTE_CAPACITY
}

fn default_workers_per_channel() -> usize {
    2
}

fn default_bus_recent_capacity() -> usize {
    1000
}

fn default_send_queue_bound() -> usize {
    1024
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_chart_ttl_secs() -> u64 {
    DEFAULT_CHART_TTL.as_secs()
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE.as_millis() as u64
}

/// Everything the engine needs to start, assembled once from the process
/// environment. Does not derive `Serialize` — `api_key`/`database_url`
/// are secrets and have no business round-tripping through JSON; the
/// startup log line below logs only non-secret fields by hand.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ws_url: String,
    pub api_key: String,
    pub database_url: String,
    pub trade_queue_capacity: usize,
    pub quote_queue_capacity: usize,
    /// Per-symbol trade ring buffer capacity (§3; C1), distinct from the
    /// ingestion work-queue capacity above.
    pub trade_buffer_capacity: usize,
    /// Per-symbol quote ring buffer capacity (§3; C1).
    pub quote_buffer_capacity: usize,
    pub workers_per_channel: usize,
    pub bus_recent_capacity: usize,
    pub send_queue_bound: usize,
    pub max_backoff: Duration,
    /// How long a chart assertion stays authoritative before the bridge's
    /// TTL expirer evicts it (§4.7).
    pub chart_ttl: Duration,
    /// How long the bridge coalesces a burst of source updates before
    /// recomputing and pushing (§4.7).
    pub debounce: Duration,
    pub db_schema: DbSchema,
}

impl EngineConfig {
    /// Load configuration from the process environment. `MARKET_WS_API_KEY`
    /// and `DATABASE_URL` are required; everything else has a sane default,
    /// mirroring the teacher's `#[serde(default = "...")]` philosophy even
    /// though these values come from `env::var` rather than JSON.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("MARKET_WS_API_KEY")
            .context("MARKET_WS_API_KEY is required (upstream market data API key)")?;
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL is required (postgres connection string)")?;

        let ws_url = std::env::var("MARKET_WS_URL").unwrap_or_else(|_| default_ws_url());
        let trade_queue_capacity = env_usize("TRADE_QUEUE_CAPACITY", default_trade_queue_capacity());
        let quote_queue_capacity = env_usize("QUOTE_QUEUE_CAPACITY", default_quote_queue_capacity());
        let trade_buffer_capacity = env_usize("TRADE_BUFFER_CAPACITY", default_trade_buffer_capacity());
        let quote_buffer_capacity = env_usize("QUOTE_BUFFER_CAPACITY", default_quote_buffer_capacity());
        let workers_per_channel = env_usize("WORKERS_PER_CHANNEL", default_workers_per_channel());
        let bus_recent_capacity = env_usize("BUS_RECENT_CAPACITY", default_bus_recent_capacity());
        let send_queue_bound = env_usize("WS_SEND_QUEUE_BOUND", default_send_queue_bound());
        let max_backoff_secs = env_u64("WS_MAX_BACKOFF_SECS", default_max_backoff_secs());
        let chart_ttl_secs = env_u64("CHART_TTL_SECS", default_chart_ttl_secs());
        let debounce_ms = env_u64("DEBOUNCE_MS", default_debounce_ms());

        let db_schema = DbSchema {
            table: std::env::var("STATE_TABLE").unwrap_or_else(|_| DbSchema::default().table),
            col_symbol: std::env::var("STATE_COL_SYMBOL").unwrap_or_else(|_| DbSchema::default().col_symbol),
            col_state: std::env::var("STATE_COL_STATE").unwrap_or_else(|_| DbSchema::default().col_state),
            col_dnt: std::env::var("STATE_COL_DNT").unwrap_or_else(|_| DbSchema::default().col_dnt),
            notify_channel: std::env::var("STATE_NOTIFY_CHANNEL")
                .unwrap_or_else(|_| DbSchema::default().notify_channel),
        };

        let config = Self {
            ws_url,
            api_key,
            database_url,
            trade_queue_capacity,
            quote_queue_capacity,
            trade_buffer_capacity,
            quote_buffer_capacity,
            workers_per_channel,
            bus_recent_capacity,
            send_queue_bound,
            max_backoff: Duration::from_secs(max_backoff_secs),
            chart_ttl: Duration::from_secs(chart_ttl_secs),
            debounce: Duration::from_millis(debounce_ms),
            db_schema,
        };

        info!(
            ws_url = %config.ws_url,
            trade_queue_capacity,
            quote_queue_capacity,
            workers_per_channel,
            table = %config.db_schema.table,
            "engine config loaded from environment"
        );

        Ok(config)
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn default_table() -> String {
    DbSchema::default().table
}

fn default_col_symbol() -> String {
    DbSchema::default().col_symbol
}

fn default_col_state() -> String {
    DbSchema::default().col_state
}

fn default_col_dnt() -> String {
    DbSchema::default().col_dnt
}

fn default_notify_channel() -> String {
    DbSchema::default().notify_channel
}

/// Reloadable subset of the bridge's schema mapping, for operators who want
/// to repoint the bridge at a differently-named table without restarting.
/// Loaded once at startup alongside `EngineConfig`; not watched for changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSchemaConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_col_symbol")]
    pub col_symbol: String,
    #[serde(default = "default_col_state")]
    pub col_state: String,
    #[serde(default = "default_col_dnt")]
    pub col_dnt: String,
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,
}

impl Default for BridgeSchemaConfig {
    fn default() -> Self {
        let schema = DbSchema::default();
        Self {
            table: schema.table,
            col_symbol: schema.col_symbol,
            col_state: schema.col_state,
            col_dnt: schema.col_dnt,
            notify_channel: schema.notify_channel,
        }
    }
}

impl BridgeSchemaConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bridge schema config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse bridge schema config from {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialise bridge schema config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        Ok(())
    }

    pub fn into_schema(self) -> DbSchema {
        DbSchema {
            table: self.table,
            col_symbol: self.col_symbol,
            col_state: self.col_state,
            col_dnt: self.col_dnt,
            notify_channel: self.notify_channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_schema_config_defaults_match_db_schema_defaults() {
        let cfg = BridgeSchemaConfig::default();
        let schema = DbSchema::default();
        assert_eq!(cfg.table, schema.table);
        assert_eq!(cfg.col_state, schema.col_state);
        assert_eq!(cfg.notify_channel, schema.notify_channel);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let cfg: BridgeSchemaConfig = serde_json::from_str(r#"{"table": "custom_state"}"#).unwrap();
        assert_eq!(cfg.table, "custom_state");
        assert_eq!(cfg.col_symbol, DbSchema::default().col_symbol);
    }

    #[test]
    fn roundtrip_into_schema() {
        let cfg = BridgeSchemaConfig::default();
        let schema = cfg.into_schema();
        assert_eq!(schema.table, DbSchema::default().table);
    }
}
