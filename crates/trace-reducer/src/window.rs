// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event-time tumbling windows over the span stream.
//!
//! Spans are grouped by window key and by the window their start time falls
//! into. Each (key, window) pair owns one [`Trace`] accumulator. The
//! watermark is the highest span start time observed so far; a window moves
//! through [`WindowPhase::Open`] and [`WindowPhase::Closing`] and is emitted
//! once, in full, when it becomes [`WindowPhase::Closed`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::errors::ConfigError;
use crate::span::Span;
use crate::stats::{Counter, PipelineStats};
use crate::trace::Trace;
use crate::trace_aggregator::TraceAggregator;

pub const DEFAULT_WINDOW_SIZE_MS: i64 = 10_000;
pub const DEFAULT_GRACE_MS: i64 = 2_000;
pub const DEFAULT_MAX_RECORD_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub size_ms: i64,
    pub grace_ms: i64,
    /// Largest serialized trace that is handed downstream.
    pub max_record_size: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size_ms: DEFAULT_WINDOW_SIZE_MS,
            grace_ms: DEFAULT_GRACE_MS,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size_ms <= 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be positive, got {}",
                self.size_ms
            )));
        }
        if self.grace_ms < 0 {
            return Err(ConfigError::Invalid(format!(
                "grace period must not be negative, got {}",
                self.grace_ms
            )));
        }
        if self.max_record_size == 0 {
            return Err(ConfigError::Invalid(
                "max record size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Half-open event-time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    /// Watermark is before the window end.
    Open,
    /// Window ended, grace period still running. Spans are still accepted.
    Closing,
    /// Grace period over. The window has been emitted and rejects spans.
    Closed,
}

#[derive(Debug)]
struct WindowState {
    trace: Trace,
    approx_size: usize,
    overflowed: bool,
}

pub struct WindowedTraceAssembler {
    config: WindowConfig,
    stats: Arc<PipelineStats>,
    aggregator: TraceAggregator,
    watermark: Option<i64>,
    // Keyed by window start. Closed windows always form a prefix.
    windows: BTreeMap<i64, HashMap<String, WindowState>>,
}

impl WindowedTraceAssembler {
    pub fn new(config: WindowConfig, stats: Arc<PipelineStats>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            stats,
            aggregator: TraceAggregator,
            watermark: None,
            windows: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn watermark(&self) -> Option<i64> {
        self.watermark
    }

    /// Number of in-flight accumulators that can still emit a trace.
    pub fn open_windows(&self) -> usize {
        self.windows
            .values()
            .flat_map(HashMap::values)
            .filter(|state| !state.overflowed)
            .count()
    }

    /// Accumulators dropped for size that still wait for their window to close.
    pub fn overflowed_windows(&self) -> usize {
        self.windows
            .values()
            .flat_map(HashMap::values)
            .filter(|state| state.overflowed)
            .count()
    }

    pub fn window_for(&self, timestamp: i64) -> Window {
        // The first and last windows of the i64 range are clamped.
        let offset = timestamp.rem_euclid(self.config.size_ms);
        Window {
            start: timestamp.saturating_sub(offset),
            end: timestamp.saturating_add(self.config.size_ms - offset),
        }
    }

    pub fn phase(&self, window: Window) -> WindowPhase {
        match self.watermark {
            Some(w) if w >= window.end.saturating_add(self.config.grace_ms) => WindowPhase::Closed,
            Some(w) if w >= window.end => WindowPhase::Closing,
            _ => WindowPhase::Open,
        }
    }

    /// Adds a span and returns every trace whose window closed as a result.
    ///
    /// A span whose own window is already closed is dropped and counted;
    /// the trace emitted for that window is not touched.
    pub fn push(&mut self, span: Span) -> Vec<Trace> {
        let window = self.window_for(span.start_time);
        if self.phase(window) == WindowPhase::Closed {
            trace!(
                "Dropping late span {} of {} for window [{}, {})",
                span.span_id,
                span.window_key(),
                window.start,
                window.end
            );
            self.stats.incr(Counter::LateSpans);
            return Vec::new();
        }

        self.watermark = Some(
            self.watermark
                .map_or(span.start_time, |w| w.max(span.start_time)),
        );
        self.accumulate(window, span);
        self.close_windows()
    }

    /// Moves event time forward without new data. Never moves it back.
    pub fn advance_watermark(&mut self, timestamp: i64) -> Vec<Trace> {
        self.watermark = Some(self.watermark.map_or(timestamp, |w| w.max(timestamp)));
        self.close_windows()
    }

    /// Drops every in-flight accumulator without emitting it.
    pub fn discard(&mut self) -> usize {
        let dropped = self.open_windows();
        self.windows.clear();
        if dropped > 0 {
            self.stats.add(Counter::DiscardedWindows, dropped as u64);
        }
        dropped
    }

    fn accumulate(&mut self, window: Window, span: Span) {
        let max_record_size = self.config.max_record_size;
        let key = span.window_key();
        let states = self.windows.entry(window.start).or_default();

        match states.get_mut(&key) {
            Some(state) if state.overflowed => {}
            Some(state) => {
                state.approx_size = state
                    .approx_size
                    .saturating_add(json_len(&span).saturating_add(1));
                let current = std::mem::take(&mut state.trace);
                state.trace = self.aggregator.aggregate(current, span);
                if state.approx_size > max_record_size {
                    warn!(
                        "Dropping trace {} in window [{}, {}): record exceeds {} bytes",
                        key, window.start, window.end, max_record_size
                    );
                    state.overflowed = true;
                    state.trace = Trace::default();
                    self.stats.incr(Counter::OversizedRecords);
                }
            }
            None => {
                let trace = self.aggregator.aggregate(Trace::default(), span);
                let approx_size = trace.serialized_size().unwrap_or(usize::MAX);
                let overflowed = approx_size > max_record_size;
                if overflowed {
                    warn!(
                        "Dropping trace {} in window [{}, {}): record exceeds {} bytes",
                        key, window.start, window.end, max_record_size
                    );
                    self.stats.incr(Counter::OversizedRecords);
                }
                states.insert(
                    key,
                    WindowState {
                        trace: if overflowed { Trace::default() } else { trace },
                        approx_size,
                        overflowed,
                    },
                );
            }
        }
    }

    fn close_windows(&mut self) -> Vec<Trace> {
        let mut emitted = Vec::new();
        while let Some(start) = self.windows.keys().next().copied() {
            let window = self.window_for(start);
            if self.phase(window) != WindowPhase::Closed {
                break;
            }
            let Some(states) = self.windows.remove(&start) else {
                break;
            };

            let mut states: Vec<(String, WindowState)> = states.into_iter().collect();
            states.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, state) in states {
                if state.overflowed {
                    continue;
                }
                match state.trace.serialized_size() {
                    Ok(size) if size <= self.config.max_record_size => {
                        self.stats.incr(Counter::ReconstructedTraces);
                        emitted.push(state.trace);
                    }
                    _ => {
                        warn!(
                            "Dropping trace {} in window [{}, {}): record exceeds {} bytes",
                            key, window.start, window.end, self.config.max_record_size
                        );
                        self.stats.incr(Counter::OversizedRecords);
                    }
                }
            }
        }
        emitted
    }
}

fn json_len(span: &Span) -> usize {
    serde_json::to_vec(span)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace_id: &str, id: &str, start: i64) -> Span {
        Span {
            landscape_token: "token".to_string(),
            trace_id: trace_id.to_string(),
            span_id: id.to_string(),
            parent_span_id: if id == "root" {
                String::new()
            } else {
                "root".to_string()
            },
            start_time: start,
            end_time: start + 5,
            ..Default::default()
        }
    }

    fn assembler(config: WindowConfig) -> (WindowedTraceAssembler, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        let assembler =
            WindowedTraceAssembler::new(config, Arc::clone(&stats)).expect("valid config");
        (assembler, stats)
    }

    #[test]
    fn test_invalid_config() {
        let stats = Arc::new(PipelineStats::new());
        let config = WindowConfig {
            size_ms: 0,
            ..Default::default()
        };
        assert!(WindowedTraceAssembler::new(config, Arc::clone(&stats)).is_err());
        let config = WindowConfig {
            grace_ms: -1,
            ..Default::default()
        };
        assert!(WindowedTraceAssembler::new(config, stats).is_err());
    }

    #[test]
    fn test_window_assignment() {
        let (assembler, _) = assembler(WindowConfig::default());
        assert_eq!(
            assembler.window_for(0),
            Window {
                start: 0,
                end: 10_000
            }
        );
        assert_eq!(assembler.window_for(19_999).start, 10_000);
        assert_eq!(assembler.window_for(-1).start, -10_000);
    }

    #[test]
    fn test_phase_transitions() {
        let (mut assembler, _) = assembler(WindowConfig::default());
        let window = assembler.window_for(0);
        assert_eq!(assembler.phase(window), WindowPhase::Open);
        assembler.advance_watermark(10_000);
        assert_eq!(assembler.phase(window), WindowPhase::Closing);
        assembler.advance_watermark(11_999);
        assert_eq!(assembler.phase(window), WindowPhase::Closing);
        assembler.advance_watermark(12_000);
        assert_eq!(assembler.phase(window), WindowPhase::Closed);
    }

    #[test]
    fn test_emits_once_at_close() {
        let (mut assembler, stats) = assembler(WindowConfig::default());
        assert!(assembler.push(span("t1", "root", 100)).is_empty());
        assert!(assembler.push(span("t1", "a", 9_000)).is_empty());
        // Within grace: still accepted.
        assert!(assembler.push(span("t2", "root", 11_000)).is_empty());
        assert!(assembler.push(span("t1", "b", 200)).is_empty());

        let emitted = assembler.advance_watermark(12_000);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].trace_id, "t1");
        assert_eq!(emitted[0].span_list.len(), 3);
        assert_eq!(emitted[0].start_time, 100);
        assert_eq!(emitted[0].end_time, 9_005);

        assert!(assembler.advance_watermark(12_500).is_empty());
        assert_eq!(assembler.open_windows(), 1);
        assert_eq!(stats.get(Counter::ReconstructedTraces), 1);
    }

    #[test]
    fn test_late_span_is_dropped() {
        let (mut assembler, stats) = assembler(WindowConfig::default());
        assembler.push(span("t1", "root", 100));
        let emitted = assembler.push(span("t9", "root", 12_001));
        assert_eq!(emitted.len(), 1);

        assert!(assembler.push(span("t1", "late", 500)).is_empty());
        assert_eq!(stats.get(Counter::LateSpans), 1);
        // Nothing for the closed window was reopened.
        assert_eq!(assembler.open_windows(), 1);
        assert_eq!(assembler.watermark(), Some(12_001));
    }

    #[test]
    fn test_same_trace_in_two_windows() {
        let (mut assembler, _) = assembler(WindowConfig::default());
        assembler.push(span("t1", "root", 9_999));
        assembler.push(span("t1", "a", 10_000));
        let emitted = assembler.advance_watermark(22_000);
        assert_eq!(emitted.len(), 2);
        assert!(emitted.iter().all(|t| t.span_list.len() == 1));
    }

    #[test]
    fn test_oversized_record_is_dropped() {
        let (mut assembler, stats) = assembler(WindowConfig {
            max_record_size: 600,
            ..Default::default()
        });
        for i in 0..10 {
            assembler.push(span("big", &format!("span-{i}"), 100 + i));
        }
        assembler.push(span("small", "root", 100));
        let emitted = assembler.advance_watermark(50_000);

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].trace_id, "small");
        assert_eq!(stats.get(Counter::OversizedRecords), 1);
    }

    #[test]
    fn test_overflowed_accumulator_is_not_open() {
        let (mut assembler, _) = assembler(WindowConfig {
            max_record_size: 600,
            ..Default::default()
        });
        for i in 0..10 {
            assembler.push(span("big", &format!("span-{i}"), 100 + i));
        }
        assert_eq!(assembler.open_windows(), 0);
        assert_eq!(assembler.overflowed_windows(), 1);

        assembler.push(span("small", "root", 100));
        assert_eq!(assembler.open_windows(), 1);

        assert_eq!(assembler.advance_watermark(50_000).len(), 1);
        assert_eq!(assembler.overflowed_windows(), 0);
    }

    #[test]
    fn test_extreme_timestamps() {
        let (mut assembler, stats) = assembler(WindowConfig::default());
        let first = assembler.window_for(i64::MIN);
        assert_eq!(first.start, i64::MIN);
        assert_eq!(first.end.rem_euclid(10_000), 0);
        assert_eq!(assembler.window_for(first.end).start, first.end);
        assert_eq!(assembler.window_for(first.end - 1), first);

        let last = assembler.window_for(i64::MAX);
        assert_eq!(last.start.rem_euclid(10_000), 0);
        assert_eq!(last.end, i64::MAX);

        let mut oldest = span("t1", "root", i64::MIN);
        oldest.end_time = i64::MIN;
        assert!(assembler.push(oldest).is_empty());
        let emitted = assembler.push(span("t2", "root", 0));
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].trace_id, "t1");
        assert_eq!(emitted[0].duration, 0);
        assert_eq!(stats.get(Counter::ReconstructedTraces), 1);
        assert_eq!(assembler.open_windows(), 1);
    }

    #[test]
    fn test_discard_drops_open_windows() {
        let (mut assembler, stats) = assembler(WindowConfig::default());
        assembler.push(span("t1", "root", 100));
        assembler.push(span("t2", "root", 200));
        assert_eq!(assembler.discard(), 2);
        assert_eq!(assembler.open_windows(), 0);
        assert_eq!(stats.get(Counter::DiscardedWindows), 2);
        assert!(assembler.advance_watermark(i64::MAX).is_empty());
    }
}
