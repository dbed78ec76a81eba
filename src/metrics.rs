//! Per-opcode counters exposed by the Engine façade
//!
//! Grounded on `sem_os_core/src/authoring/metrics.rs`'s pattern of emitting
//! one `tracing::info!` event per completed operation; this module adds the
//! aggregation that component was missing, kept serializable to JSON the
//! way `authoring::dto` structures are.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;

#[derive(Default)]
struct Counter {
    calls: u64,
    errors: u64,
    total: Duration,
}

/// Aggregated counts for one opcode: call count, error count, and timing.
#[derive(Clone, Debug, Serialize)]
pub struct OpcodeStats {
    pub calls: u64,
    pub errors: u64,
    pub total_seconds: f64,
    pub avg_seconds: f64,
}

/// Thread-safe (well, single-Runtime-but-shared-across-forked-tasks)
/// per-opcode counters. One `Metrics` instance per `Engine::run()` call.
pub struct Metrics {
    counters: RwLock<HashMap<String, Counter>>,
    enabled: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            counters: RwLock::new(HashMap::new()),
            enabled: true,
        }
    }

    /// A `Metrics` that silently drops every `record()` call, for
    /// `EngineConfig { metrics_enabled: false, .. }`.
    pub fn disabled() -> Self {
        Metrics {
            counters: RwLock::new(HashMap::new()),
            enabled: false,
        }
    }

    /// Record one dispatch of `opcode`, called by the Executor after every
    /// statement regardless of outcome.
    pub fn record(&self, opcode: &str, elapsed: Duration, ok: bool) {
        if !self.enabled {
            return;
        }
        let mut counters = self.counters.write().unwrap();
        let entry = counters.entry(opcode.to_string()).or_default();
        entry.calls += 1;
        entry.total += elapsed;
        if !ok {
            entry.errors += 1;
        }
        tracing::trace!(opcode, elapsed_us = elapsed.as_micros() as u64, ok, "opcode dispatched");
    }

    pub fn snapshot(&self) -> HashMap<String, OpcodeStats> {
        let counters = self.counters.read().unwrap();
        counters
            .iter()
            .map(|(name, c)| {
                let avg = if c.calls > 0 {
                    c.total.as_secs_f64() / c.calls as f64
                } else {
                    0.0
                };
                (
                    name.clone(),
                    OpcodeStats {
                        calls: c.calls,
                        errors: c.errors,
                        total_seconds: c.total.as_secs_f64(),
                        avg_seconds: avg,
                    },
                )
            })
            .collect()
    }

    pub fn total_calls(&self) -> u64 {
        self.counters.read().unwrap().values().map(|c| c.calls).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_and_errors_separately() {
        let metrics = Metrics::new();
        metrics.record("operator_add", Duration::from_millis(1), true);
        metrics.record("operator_add", Duration::from_millis(2), false);

        let snapshot = metrics.snapshot();
        let stats = snapshot.get("operator_add").unwrap();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.errors, 1);
        assert!(stats.avg_seconds > 0.0);
    }

    #[test]
    fn total_calls_sums_across_opcodes() {
        let metrics = Metrics::new();
        metrics.record("a", Duration::from_millis(1), true);
        metrics.record("b", Duration::from_millis(1), true);
        assert_eq!(metrics.total_calls(), 2);
    }
}
