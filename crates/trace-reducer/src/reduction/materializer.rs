// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::reduction::call_tree::CallTree;
use crate::trace::Trace;
use crate::trace_aggregator::TraceAggregator;

/// Turns a call tree back into a flat [`Trace`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceMaterializer;

impl TraceMaterializer {
    /// Feeds every span, breadth-first, into a fresh accumulator. Bounds and
    /// duration are recomputed from the retained spans.
    pub fn flatten(&self, tree: &CallTree) -> Trace {
        TraceAggregator.aggregate_all(tree.spans().cloned())
    }
}
