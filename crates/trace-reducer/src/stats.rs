// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline counters shared across partition workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    ReceivedSpans,
    LateSpans,
    OversizedRecords,
    ReconstructedTraces,
    ReducedTraces,
    ReductionFallbacks,
    PersistedTraces,
    FailedPersists,
    DiscardedWindows,
}

impl Counter {
    const COUNT: usize = 9;

    fn slot(self) -> usize {
        self as usize
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received_spans: u64,
    pub late_spans: u64,
    pub oversized_records: u64,
    pub reconstructed_traces: u64,
    pub reduced_traces: u64,
    pub reduction_fallbacks: u64,
    pub persisted_traces: u64,
    pub failed_persists: u64,
    pub discarded_windows: u64,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    counters: [AtomicU64; Counter::COUNT],
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.slot()].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.slot()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.collect(|c| c.load(Ordering::Relaxed))
    }

    /// Returns the counters and resets them to zero.
    pub fn take(&self) -> StatsSnapshot {
        self.collect(|c| c.swap(0, Ordering::Relaxed))
    }

    fn collect(&self, read: impl Fn(&AtomicU64) -> u64) -> StatsSnapshot {
        let value = |counter: Counter| read(&self.counters[counter.slot()]);
        StatsSnapshot {
            received_spans: value(Counter::ReceivedSpans),
            late_spans: value(Counter::LateSpans),
            oversized_records: value(Counter::OversizedRecords),
            reconstructed_traces: value(Counter::ReconstructedTraces),
            reduced_traces: value(Counter::ReducedTraces),
            reduction_fallbacks: value(Counter::ReductionFallbacks),
            persisted_traces: value(Counter::PersistedTraces),
            failed_persists: value(Counter::FailedPersists),
            discarded_windows: value(Counter::DiscardedWindows),
        }
    }
}

/// Logs and resets the counters every `period` until `cancel` fires.
pub fn spawn_status_reporter(
    stats: Arc<PipelineStats>,
    period: Duration,
    window_size_ms: i64,
    discard: bool,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.tick().await; // discard first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => log_status(&stats.take(), window_size_ms, discard),
                _ = cancel.cancelled() => {
                    debug!("Status reporter stopped");
                    break;
                }
            }
        }
    })
}

fn log_status(snapshot: &StatsSnapshot, window_size_ms: i64, discard: bool) {
    if discard {
        debug!("Received and discarded {} spans.", snapshot.received_spans);
        return;
    }
    debug!(
        "Received {} spans: {} traces reconstructed in {} ms time window, the spans of {} traces have been reduced.",
        snapshot.received_spans,
        snapshot.reconstructed_traces,
        window_size_ms,
        snapshot.reduced_traces
    );
    if snapshot.late_spans > 0 || snapshot.oversized_records > 0 || snapshot.failed_persists > 0 {
        debug!(
            "Dropped {} late spans and {} oversized records, {} traces failed to persist.",
            snapshot.late_spans, snapshot.oversized_records, snapshot.failed_persists
        );
    }
}
