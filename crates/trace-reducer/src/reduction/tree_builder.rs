// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use crate::errors::InvalidTraceError;
use crate::reduction::call_tree::{CallTree, NodeId, TreeArena};
use crate::span::Span;

/// Reconstructs a [`CallTree`] from an unordered span collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallTreeBuilder;

impl CallTreeBuilder {
    /// Single pass over the spans. Children whose parent has not been seen
    /// yet wait in an index keyed by the missing parent id and are attached
    /// as soon as that parent arrives.
    pub fn build(spans: impl IntoIterator<Item = Span>) -> Result<CallTree, InvalidTraceError> {
        let spans = spans.into_iter();
        let mut arena = TreeArena::with_capacity(spans.size_hint().0);
        let mut known: HashMap<String, NodeId> = HashMap::new();
        let mut waiting: HashMap<String, Vec<NodeId>> = HashMap::new();
        let mut root: Option<NodeId> = None;

        for span in spans {
            if span.span_id == span.parent_span_id {
                return Err(InvalidTraceError::SelfParent {
                    span_id: span.span_id,
                });
            }
            if known.contains_key(&span.span_id) {
                return Err(InvalidTraceError::DuplicateSpanId {
                    span_id: span.span_id,
                });
            }

            let span_id = span.span_id.clone();
            let parent_span_id = span.parent_span_id.clone();
            let node = arena.add(span);

            if let Some(children) = waiting.remove(&span_id) {
                for child in children {
                    arena.attach(node, child);
                }
            }
            known.insert(span_id, node);

            if parent_span_id.is_empty() {
                if root.replace(node).is_some() {
                    return Err(InvalidTraceError::MultipleRoots);
                }
                continue;
            }
            match known.get(&parent_span_id) {
                Some(parent) => arena.attach(*parent, node),
                None => waiting.entry(parent_span_id).or_default().push(node),
            }
        }

        let root = root.ok_or(InvalidTraceError::NoRoot)?;
        let orphans: usize = waiting.values().map(Vec::len).sum();
        if orphans > 0 {
            return Err(InvalidTraceError::Disconnected { orphans });
        }
        arena.finish(root)
    }
}
