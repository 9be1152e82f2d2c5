// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Folds spans of one trace into a growing [`Trace`] accumulator.

use crate::span::Span;
use crate::trace::Trace;

/// Stateless span folder used by window aggregation and by tree flattening.
///
/// The resulting start, end and duration do not depend on the order spans
/// are folded in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceAggregator;

impl TraceAggregator {
    /// Adds a span to the accumulator and returns it for chaining.
    ///
    /// An empty accumulator is initialized from the span. Mismatching trace
    /// ids are not rejected here; grouping by window key guarantees them.
    #[must_use]
    pub fn aggregate(&self, mut aggregate: Trace, span: Span) -> Trace {
        if aggregate.is_empty() {
            return init_trace(aggregate, span);
        }

        if span.start_time < aggregate.start_time {
            aggregate.start_time = span.start_time;
            aggregate.duration = duration_ms(aggregate.start_time, aggregate.end_time);
        }
        if span.end_time > aggregate.end_time {
            aggregate.end_time = span.end_time;
            aggregate.duration = duration_ms(aggregate.start_time, aggregate.end_time);
        }
        aggregate.span_list.push(span);
        aggregate
    }

    /// Folds a whole span collection into a fresh trace.
    pub fn aggregate_all(&self, spans: impl IntoIterator<Item = Span>) -> Trace {
        spans
            .into_iter()
            .fold(Trace::default(), |trace, span| self.aggregate(trace, span))
    }
}

fn init_trace(mut fresh: Trace, first: Span) -> Trace {
    fresh.landscape_token = first.landscape_token.clone();
    fresh.trace_id = first.trace_id.clone();
    fresh.start_time = first.start_time;
    fresh.end_time = first.end_time;
    fresh.duration = duration_ms(first.start_time, first.end_time);
    fresh.overall_request_count = 1;
    fresh.trace_count = 1;
    fresh.span_list = vec![first];
    fresh
}

pub(crate) fn duration_ms(start: i64, end: i64) -> i64 {
    end.saturating_sub(start)
}
