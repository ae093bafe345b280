// =============================================================================
// Health/metrics — per-process status, published and polled (C8)
// =============================================================================
//
// Grounded on ingestion/tick_stream.py::_health_loop and
// control/state_subscription_bridge.py::_health_loop: a small JSON blob
// published every 2s. `HealthRegistry` adds an in-memory "overwritten, not
// appended" slot per process so the latest health can be read without
// replaying the bus.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::ChannelTag;

/// One ingestion process's health, published under `health:tick` or
/// `health:quote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessHealth {
    pub channel: ChannelTag,
    pub processed: u64,
    pub dropped: u64,
    pub qsize: usize,
    pub subscribed: usize,
    pub ts_ms: i64,
}

/// The state→subscription bridge's health, published under `health:bridge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub source_sizes: HashMap<String, usize>,
    pub eff_warm: usize,
    pub eff_hot: usize,
    pub updates_in: u64,
    pub db_boot_count: u64,
    pub db_notify_in: u64,
    pub push_out: u64,
    pub chart_expired: u64,
    pub ts_ms: i64,
}

/// A tagged union covering every process that reports health, matching the
/// original's flat `{"proc": "tick", ...}` / `{"proc": "bridge", ...}` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "proc", rename_all = "snake_case")]
pub enum HealthRecord {
    Tick(ProcessHealth),
    Quote(ProcessHealth),
    Bridge(BridgeHealth),
}

impl HealthRecord {
    pub fn proc_name(&self) -> &'static str {
        match self {
            Self::Tick(_) => "tick",
            Self::Quote(_) => "quote",
            Self::Bridge(_) => "bridge",
        }
    }
}

/// Latest health record per named process, overwritten on every publish.
#[derive(Default)]
pub struct HealthRegistry {
    slots: RwLock<HashMap<String, HealthRecord>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, record: HealthRecord) {
        self.slots.write().insert(record.proc_name().to_string(), record);
    }

    pub fn latest(&self, proc: &str) -> Option<HealthRecord> {
        self.slots.read().get(proc).cloned()
    }

    pub fn all(&self) -> HashMap<String, HealthRecord> {
        self.slots.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_rather_than_appends() {
        let reg = HealthRegistry::new();
        reg.set(HealthRecord::Tick(ProcessHealth {
            channel: ChannelTag::Trade,
            processed: 1,
            dropped: 0,
            qsize: 0,
            subscribed: 1,
            ts_ms: 1,
        }));
        reg.set(HealthRecord::Tick(ProcessHealth {
            channel: ChannelTag::Trade,
            processed: 2,
            dropped: 0,
            qsize: 0,
            subscribed: 1,
            ts_ms: 2,
        }));
        assert_eq!(reg.all().len(), 1);
        match reg.latest("tick").unwrap() {
            HealthRecord::Tick(h) => assert_eq!(h.processed, 2),
            _ => panic!("expected tick health"),
        }
    }

    #[test]
    fn proc_tag_matches_original_lowercase_names() {
        let json = serde_json::to_value(HealthRecord::Bridge(BridgeHealth {
            source_sizes: HashMap::new(),
            eff_warm: 0,
            eff_hot: 0,
            updates_in: 0,
            db_boot_count: 0,
            db_notify_in: 0,
            push_out: 0,
            chart_expired: 0,
            ts_ms: 0,
        }))
        .unwrap();
        assert_eq!(json["proc"], "bridge");
    }
}
