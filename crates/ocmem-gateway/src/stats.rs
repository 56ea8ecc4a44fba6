// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process per-route latency and error accounting.
//!
//! Keeps a fixed-size sample ring per route; p50/p95 are computed on
//! demand from the ring, so long-running servers report recent behavior
//! rather than lifetime aggregates.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

/// Samples retained per route.
const RING_CAPACITY: usize = 512;

#[derive(Default)]
struct RouteSample {
    samples: Mutex<VecDeque<u64>>,
    count: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot of one route's latency profile.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteLatency {
    pub route: String,
    pub count: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub error_rate: f64,
}

/// Records request latencies keyed by route template.
#[derive(Default)]
pub struct LatencyRecorder {
    routes: DashMap<String, RouteSample>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request.
    pub fn record(&self, route: &str, elapsed_ms: u64, is_error: bool) {
        let entry = self.routes.entry(route.to_string()).or_default();
        entry.count.fetch_add(1, Ordering::Relaxed);
        if is_error {
            entry.errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut samples = entry.samples.lock().expect("latency ring poisoned");
        if samples.len() == RING_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(elapsed_ms);
    }

    /// Current per-route snapshot, sorted by route.
    pub fn snapshot(&self) -> Vec<RouteLatency> {
        let mut out: Vec<RouteLatency> = self
            .routes
            .iter()
            .map(|entry| {
                let samples = entry.value().samples.lock().expect("latency ring poisoned");
                let mut sorted: Vec<u64> = samples.iter().copied().collect();
                sorted.sort_unstable();
                let count = entry.value().count.load(Ordering::Relaxed);
                let errors = entry.value().errors.load(Ordering::Relaxed);
                RouteLatency {
                    route: entry.key().clone(),
                    count,
                    p50_ms: percentile(&sorted, 50),
                    p95_ms: percentile(&sorted, 95),
                    error_rate: if count == 0 {
                        0.0
                    } else {
                        errors as f64 / count as f64
                    },
                }
            })
            .collect();
        out.sort_by(|a, b| a.route.cmp(&b.route));
        out
    }
}

/// Nearest-rank percentile over an already sorted slice.
fn percentile(sorted: &[u64], p: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_nearest_rank() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&sorted, 50), 50);
        assert_eq!(percentile(&sorted, 95), 95);
        assert_eq!(percentile(&[7], 95), 7);
        assert_eq!(percentile(&[], 50), 0);
    }

    #[test]
    fn records_and_snapshots() {
        let recorder = LatencyRecorder::new();
        for ms in [10, 20, 30, 40, 50] {
            recorder.record("/api/search", ms, false);
        }
        recorder.record("/api/search", 500, true);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.len(), 1);
        let route = &snapshot[0];
        assert_eq!(route.route, "/api/search");
        assert_eq!(route.count, 6);
        assert!(route.p50_ms <= route.p95_ms);
        assert!((route.error_rate - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn ring_caps_sample_count() {
        let recorder = LatencyRecorder::new();
        for i in 0..(RING_CAPACITY as u64 + 100) {
            recorder.record("/api/health", i, false);
        }
        let snapshot = recorder.snapshot();
        // Count keeps the lifetime total; the ring holds only recent samples.
        assert_eq!(snapshot[0].count, RING_CAPACITY as u64 + 100);
        assert!(snapshot[0].p50_ms >= 100);
    }
}
