//! Load latency and outcome counters.
//!
//! The coordinator records every finished request here; `snapshot` feeds diagnostics
//! alongside the per-tier cache statistics.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

const DEFAULT_SAMPLE_CAPACITY: usize = 240;

#[derive(Debug, Default)]
struct SampleWindow {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl SampleWindow {
    fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    fn push(&mut self, value: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn percentile(&self, percentile: f32) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f32> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let rank = percentile.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
        sorted.get(rank.round() as usize).copied().unwrap_or(0.0)
    }
}

#[derive(Debug)]
struct StatsInner {
    started_at: Instant,
    load_times_ms: SampleWindow,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

impl Default for StatsInner {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            load_times_ms: SampleWindow::new(DEFAULT_SAMPLE_CAPACITY),
            completed: 0,
            failed: 0,
            cancelled: 0,
        }
    }
}

/// How a request ended, for accounting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Completed,
    Failed,
    Cancelled,
}

/// Thread-safe counter collection.
#[derive(Debug, Default)]
pub struct StatsCollector {
    inner: parking_lot::Mutex<StatsInner>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished request. Latency samples only cover completed loads.
    pub fn record_load(&self, kind: LoadKind, duration: Duration) {
        let mut guard = self.inner.lock();
        match kind {
            LoadKind::Completed => {
                guard.completed = guard.completed.saturating_add(1);
                guard.load_times_ms.push(duration.as_secs_f64() as f32 * 1_000.0);
            }
            LoadKind::Failed => guard.failed = guard.failed.saturating_add(1),
            LoadKind::Cancelled => guard.cancelled = guard.cancelled.saturating_add(1),
        }
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        let guard = self.inner.lock();
        LoadSnapshot {
            uptime_ms: guard.started_at.elapsed().as_millis() as u64,
            completed: guard.completed,
            failed: guard.failed,
            cancelled: guard.cancelled,
            load_time_ms_p50: guard.load_times_ms.percentile(0.50),
            load_time_ms_p95: guard.load_times_ms.percentile(0.95),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSnapshot {
    pub uptime_ms: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub load_time_ms_p50: f32,
    pub load_time_ms_p95: f32,
}
