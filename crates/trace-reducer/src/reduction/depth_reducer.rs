// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::{ConfigError, InvalidTraceError};
use crate::reduction::call_tree::{CallTree, NodeId, TreeArena};
use crate::reduction::SpanReducer;

/// Cuts every subtree below a fixed depth.
#[derive(Debug, Clone, Copy)]
pub struct DepthReducer {
    depth_limit: usize,
}

impl DepthReducer {
    pub fn new(depth_limit: i64) -> Result<Self, ConfigError> {
        let depth_limit = usize::try_from(depth_limit)
            .map_err(|_| ConfigError::NegativeDepthLimit(depth_limit))?;
        Ok(Self { depth_limit })
    }

    pub fn depth_limit(&self) -> usize {
        self.depth_limit
    }
}

impl SpanReducer for DepthReducer {
    /// Copies all nodes with `level <= depth_limit` into a new tree.
    ///
    /// Traversal is breadth-first, so a node's parent copy always exists
    /// before the node itself is copied, and the traversal can stop at the
    /// first node past the limit.
    fn reduce(&self, tree: &CallTree) -> Result<CallTree, InvalidTraceError> {
        let mut arena = TreeArena::with_capacity(tree.size());
        let mut copies: Vec<Option<NodeId>> = vec![None; tree.size()];
        let mut new_root = None;

        for id in tree
            .bfs()
            .take_while(|id| tree.level(*id) <= self.depth_limit)
        {
            let copy = arena.add(tree.span(id).clone());
            copies[id.index()] = Some(copy);
            match tree.parent(id) {
                None => new_root = Some(copy),
                Some(parent) => {
                    let parent_copy =
                        copies[parent.index()].ok_or(InvalidTraceError::Disconnected { orphans: 1 })?;
                    arena.attach(parent_copy, copy);
                }
            }
        }

        arena.finish(new_root.ok_or(InvalidTraceError::NoRoot)?)
    }
}
