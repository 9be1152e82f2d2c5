// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Arena-backed call tree over the spans of one trace.
//!
//! Nodes are addressed by [`NodeId`]. Each node owns the ids of its children
//! and keeps a non-owning parent id, so there is no pointer aliasing between
//! nodes. Trees are immutable once built; reducers read one tree and
//! assemble a new one through [`TreeArena`].

use std::collections::VecDeque;

use crate::errors::InvalidTraceError;
use crate::span::Span;

/// Index of a node inside its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct CallTreeNode {
    span: Span,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    level: usize,
}

impl CallTreeNode {
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Distance from the root. The root is on level 0.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A rooted tree of spans in which every node is reachable from the root.
#[derive(Debug, Clone)]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
    root: NodeId,
}

impl CallTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Looks up a node. Ids handed out by another tree may not resolve.
    pub fn node(&self, id: NodeId) -> Option<&CallTreeNode> {
        self.nodes.get(id.0)
    }

    pub fn root_span(&self) -> &Span {
        &self.nodes[self.root.0].span
    }

    // The accessors below take ids produced by this tree only.

    pub(crate) fn span(&self, id: NodeId) -> &Span {
        &self.nodes[id.0].span
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub(crate) fn level(&self, id: NodeId) -> usize {
        self.nodes[id.0].level
    }

    pub(crate) fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id.0].children.is_empty()
    }

    /// Breadth-first traversal starting at the root. Levels never decrease
    /// along the iteration.
    pub fn bfs(&self) -> Bfs<'_> {
        Bfs {
            tree: self,
            queue: VecDeque::from([self.root]),
        }
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Highest level of any node.
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.level).max().unwrap_or(0)
    }

    /// Spans in breadth-first order.
    pub fn spans(&self) -> impl Iterator<Item = &Span> + '_ {
        self.bfs().map(move |id| self.span(id))
    }
}

pub struct Bfs<'a> {
    tree: &'a CallTree,
    queue: VecDeque<NodeId>,
}

impl Iterator for Bfs<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.queue.pop_front()?;
        self.queue
            .extend(self.tree.nodes[current.0].children.iter().copied());
        Some(current)
    }
}

#[derive(Debug)]
struct ArenaNode {
    span: Span,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Mutable node storage used while a tree is assembled.
#[derive(Debug, Default)]
pub(crate) struct TreeArena {
    nodes: Vec<ArenaNode>,
}

impl TreeArena {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn add(&mut self, span: Span) -> NodeId {
        self.nodes.push(ArenaNode {
            span,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    pub(crate) fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Freezes the arena into a tree, assigning levels.
    ///
    /// Fails with [`InvalidTraceError::Cycle`] if some node cannot be reached
    /// from `root` or is reached twice.
    pub(crate) fn finish(self, root: NodeId) -> Result<CallTree, InvalidTraceError> {
        if self.nodes[root.0].parent.is_some() {
            return Err(InvalidTraceError::Cycle);
        }

        let mut levels: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut queue = VecDeque::from([(root, 0)]);
        let mut reached = 0;
        while let Some((id, level)) = queue.pop_front() {
            if levels[id.0].is_some() {
                return Err(InvalidTraceError::Cycle);
            }
            levels[id.0] = Some(level);
            reached += 1;
            queue.extend(self.nodes[id.0].children.iter().map(|c| (*c, level + 1)));
        }
        if reached != self.nodes.len() {
            return Err(InvalidTraceError::Cycle);
        }

        let nodes = self
            .nodes
            .into_iter()
            .zip(levels)
            .map(|(node, level)| CallTreeNode {
                span: node.span,
                parent: node.parent,
                children: node.children,
                level: level.unwrap_or_default(),
            })
            .collect();

        Ok(CallTree { nodes, root })
    }
}
