// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Call tree reconstruction and reduction.
//!
//! A finalized [`Trace`] runs through [`CallTreeBuilder`], [`DepthReducer`],
//! [`LoopReducer`] and [`TraceMaterializer`]. Every stage produces a new
//! tree. If any stage fails the trace is kept as it was.

pub mod call_tree;
pub mod depth_reducer;
pub mod loop_reducer;
pub mod materializer;
pub mod tree_builder;

use tracing::{trace, warn};

pub use call_tree::{CallTree, CallTreeNode, NodeId};
pub use depth_reducer::DepthReducer;
pub use loop_reducer::LoopReducer;
pub use materializer::TraceMaterializer;
pub use tree_builder::CallTreeBuilder;

use crate::errors::{ConfigError, InvalidTraceError};
use crate::trace::Trace;

/// A pure transformation from one call tree into a smaller one.
pub trait SpanReducer {
    fn reduce(&self, tree: &CallTree) -> Result<CallTree, InvalidTraceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReductionOutcome {
    Reduced { trace: Trace, removed_spans: usize },
    /// Reduction failed; carries the trace unchanged.
    Fallback(Trace),
}

impl ReductionOutcome {
    pub fn into_trace(self) -> Trace {
        match self {
            ReductionOutcome::Reduced { trace, .. } => trace,
            ReductionOutcome::Fallback(trace) => trace,
        }
    }
}

/// Depth reduction followed by loop collapsing.
#[derive(Debug, Clone, Copy)]
pub struct TraceReducer {
    depth_reducer: DepthReducer,
    loop_reducer: LoopReducer,
}

impl TraceReducer {
    pub fn new(depth_limit: i64) -> Result<Self, ConfigError> {
        Ok(Self {
            depth_reducer: DepthReducer::new(depth_limit)?,
            loop_reducer: LoopReducer,
        })
    }

    pub fn depth_limit(&self) -> usize {
        self.depth_reducer.depth_limit()
    }

    pub fn try_reduce(&self, trace: &Trace) -> Result<Trace, InvalidTraceError> {
        let tree = CallTreeBuilder::build(trace.span_list.iter().cloned())?;
        let tree = self.depth_reducer.reduce(&tree)?;
        let tree = self.loop_reducer.reduce(&tree)?;
        Ok(TraceMaterializer.flatten(&tree))
    }

    pub fn reduce(&self, trace: Trace) -> ReductionOutcome {
        match self.try_reduce(&trace) {
            Ok(reduced) => {
                let removed_spans = trace.span_list.len().saturating_sub(reduced.span_list.len());
                trace!(
                    "Reduced trace {} by {} spans",
                    trace.window_key(),
                    removed_spans
                );
                ReductionOutcome::Reduced {
                    trace: reduced,
                    removed_spans,
                }
            }
            Err(e) => {
                warn!("Could not perform reduction: {e}");
                ReductionOutcome::Fallback(trace)
            }
        }
    }
}
