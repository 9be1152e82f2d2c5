// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collapses loop iterations and recursive calls.
//!
//! Two leaves `u` and `v` on the same level are copies of each other if the
//! operation hashes on the path from `u` up to `lca(u, v)` match the hashes
//! on the path from `v` up to the same ancestor, element for element. Of
//! every group of equivalent leaves only the first one (in breadth-first
//! order) is kept, together with all of its ancestors.

use std::collections::BTreeMap;

use crate::errors::InvalidTraceError;
use crate::reduction::call_tree::{CallTree, NodeId, TreeArena};
use crate::reduction::SpanReducer;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopReducer;

impl SpanReducer for LoopReducer {
    fn reduce(&self, tree: &CallTree) -> Result<CallTree, InvalidTraceError> {
        let leaves = leaves_per_level(tree);
        let reducible = find_reducible_leaves(tree, &leaves)?;

        let mut arena = TreeArena::with_capacity(tree.size());
        // Original node index -> copy in the reduced tree.
        let mut copies: Vec<Option<NodeId>> = vec![None; tree.size()];
        let mut new_root = None;

        for leaf in leaves.values().flatten() {
            if reducible[leaf.index()] {
                continue;
            }

            let mut child = arena.add(tree.span(*leaf).clone());
            copies[leaf.index()] = Some(child);
            let mut current = tree.parent(*leaf);
            loop {
                let Some(original) = current else {
                    new_root = Some(child);
                    break;
                };
                if let Some(existing) = copies[original.index()] {
                    arena.attach(existing, child);
                    break;
                }
                let parent = arena.add(tree.span(original).clone());
                copies[original.index()] = Some(parent);
                arena.attach(parent, child);
                child = parent;
                current = tree.parent(original);
            }
        }

        arena.finish(new_root.ok_or(InvalidTraceError::NoRoot)?)
    }
}

/// Leaves grouped by level, each group in breadth-first order.
fn leaves_per_level(tree: &CallTree) -> BTreeMap<usize, Vec<NodeId>> {
    let mut leaves: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for id in tree.bfs().filter(|id| tree.is_leaf(*id)) {
        leaves.entry(tree.level(id)).or_default().push(id);
    }
    leaves
}

/// Marks every leaf that is equivalent to an earlier, retained leaf on the
/// same level. Indexed by original node index.
fn find_reducible_leaves(
    tree: &CallTree,
    leaves: &BTreeMap<usize, Vec<NodeId>>,
) -> Result<Vec<bool>, InvalidTraceError> {
    let mut reducible = vec![false; tree.size()];
    for nodes in leaves.values() {
        for (i, u) in nodes.iter().enumerate() {
            if reducible[u.index()] {
                continue;
            }
            for v in &nodes[i + 1..] {
                if reducible[v.index()] {
                    continue;
                }
                if same_hash_path(tree, *u, *v)? {
                    reducible[v.index()] = true;
                }
            }
        }
    }
    Ok(reducible)
}

fn same_hash_path(tree: &CallTree, u: NodeId, v: NodeId) -> Result<bool, InvalidTraceError> {
    let (u_path, v_path) = same_level_paths_to_lca(tree, u, v)?;
    Ok(u_path
        .iter()
        .zip(&v_path)
        .all(|(a, b)| tree.span(*a).operation_hash == tree.span(*b).operation_hash))
}

/// Ascends from `u` and `v` in lockstep until both reach the same node.
/// The returned paths start at `u` and `v` and exclude the common ancestor.
fn same_level_paths_to_lca(
    tree: &CallTree,
    u: NodeId,
    v: NodeId,
) -> Result<(Vec<NodeId>, Vec<NodeId>), InvalidTraceError> {
    let (left, right) = (tree.level(u), tree.level(v));
    if left != right {
        return Err(InvalidTraceError::LevelMismatch { left, right });
    }

    let mut u_path = Vec::new();
    let mut v_path = Vec::new();
    let (mut cu, mut cv) = (u, v);
    loop {
        u_path.push(cu);
        v_path.push(cv);
        match (tree.parent(cu), tree.parent(cv)) {
            (Some(pu), Some(pv)) => {
                if pu == pv {
                    return Ok((u_path, v_path));
                }
                cu = pu;
                cv = pv;
            }
            _ => return Err(InvalidTraceError::NoCommonAncestor),
        }
    }
}
