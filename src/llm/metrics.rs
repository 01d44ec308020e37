//! JSON stats export, grounded on the kernel's own incident-bundle export
//! (`trace_decision::export`): serde derives on the plain stats structs
//! plus a single `to_json` entry point, rather than hand-rolled formatting.

use alloc::string::String;
use alloc::vec::Vec;
use serde::Serialize;

use super::kv_cache::{KvCache, LayerStats};
use super::realtime::{LatencyTracker, RealtimeReport};
use super::scheduler::{Scheduler, WorkerStats};

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub uptime_ms: u64,
    pub kv_cache: KvCacheSnapshot,
    pub scheduler: Vec<WorkerStats>,
    pub realtime: RealtimeReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct KvCacheSnapshot {
    pub aggregate: LayerStats,
    pub peak_seq_len: usize,
    pub memory_bytes: usize,
    pub reset_count: u64,
}

impl EngineSnapshot {
    pub fn capture(cache: &KvCache, scheduler: &Scheduler, tracker: &LatencyTracker) -> Self {
        Self {
            uptime_ms: crate::time::get_uptime_ms(),
            kv_cache: KvCacheSnapshot {
                aggregate: cache.aggregate_stats(),
                peak_seq_len: cache.peak_seq_len(),
                memory_bytes: cache.memory_bytes(),
                reset_count: cache.reset_count(),
            },
            scheduler: scheduler.all_worker_stats(),
            realtime: tracker.report(),
        }
    }

    /// Renders this snapshot as a JSON line, for the `structured-logging`
    /// export path (§4.G) or an out-of-band stats-polling collaborator.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::kv_cache::EvictionPolicy;

    #[test]
    fn snapshot_serializes_to_valid_json_object() {
        let cache = KvCache::new(1, 4, 2, EvictionPolicy::None).unwrap();
        let scheduler = Scheduler::new(1, false, false).unwrap();
        let tracker = LatencyTracker::new();
        tracker.record(42, 500);

        let snapshot = EngineSnapshot::capture(&cache, &scheduler, &tracker);
        let json = snapshot.to_json().unwrap();
        assert!(json.starts_with('{'));
        assert!(json.ends_with('}'));
        assert!(json.contains("\"realtime\""));
    }
}
