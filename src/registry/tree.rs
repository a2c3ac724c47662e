//! Forest materialization over a registry snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use crate::documents::{Document, TreeNode};

use super::store::RegistryState;

/// Build the document forest.
///
/// Roots are documents without a parent or whose parent is absent. Nodes
/// that no root reaches (parent cycles and everything below them) are
/// attached as extra roots, each cycle anchored at its smallest id. Children
/// and roots are ordered by id. Every document appears exactly once.
pub(super) fn build_forest(state: &RegistryState) -> Vec<TreeNode> {
    let mut ids: Vec<&str> = state.by_id.keys().map(String::as_str).collect();
    ids.sort_unstable();

    let mut visited: HashSet<&str> = HashSet::with_capacity(ids.len());
    let mut roots = Vec::new();

    for &id in &ids {
        let doc = &state.by_id[id];
        let is_root = doc
            .parent_id()
            .is_none_or(|parent| !state.by_id.contains_key(parent));
        if is_root {
            roots.push(build_node(state, id, &mut visited));
        }
    }

    if visited.len() < ids.len() {
        let mut anchored = Vec::new();
        for &id in &ids {
            if visited.contains(id) {
                continue;
            }
            let anchor = cycle_anchor(state, id);
            if !visited.contains(anchor) {
                tracing::debug!(target: "registry", "anchoring parent cycle at {anchor}");
                anchored.push(build_node(state, anchor, &mut visited));
            }
        }
        roots.extend(anchored);
        roots.sort_by(|a, b| a.id().cmp(b.id()));
    }

    roots
}

fn build_node<'a>(
    state: &'a RegistryState,
    id: &'a str,
    visited: &mut HashSet<&'a str>,
) -> TreeNode {
    visited.insert(id);
    let document: Arc<Document> = Arc::clone(&state.by_id[id]);
    let orphan = document
        .parent_id()
        .is_some_and(|parent| !state.by_id.contains_key(parent));

    let mut children = Vec::new();
    if let Some(child_ids) = state.children_of.get(id) {
        for child in child_ids {
            // A child may have moved under a cycle anchor already visited
            if state.by_id.contains_key(child.as_str()) && !visited.contains(child.as_str()) {
                children.push(build_node(state, child, visited));
            }
        }
    }

    TreeNode {
        document,
        orphan,
        children,
    }
}

/// Smallest id on the parent cycle above `start`.
///
/// `start` must be unreachable from every root, which means its parent chain
/// never ends and therefore loops back on itself.
fn cycle_anchor<'a>(state: &'a RegistryState, start: &'a str) -> &'a str {
    let mut chain: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut current = start;

    loop {
        if !seen.insert(current) {
            let cycle_start = chain.iter().position(|&id| id == current).unwrap_or(0);
            return chain[cycle_start..]
                .iter()
                .copied()
                .min()
                .unwrap_or(current);
        }
        chain.push(current);
        match state
            .by_id
            .get(current)
            .and_then(|doc| doc.parent_id())
            .and_then(|parent| state.by_id.get_key_value(parent))
        {
            Some((key, _)) => current = key.as_str(),
            None => return current,
        }
    }
}
