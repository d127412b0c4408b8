use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use super::{MigrationGraph, MigrationNode};
use crate::error::{ChainError, Result};
use crate::types::RevisionId;

/// One `down_revision` rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentEdit {
    pub id: RevisionId,
    pub path: PathBuf,
    pub old_parent: Option<RevisionId>,
    pub new_parent: RevisionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Linearization {
    /// The single resulting chain, root first.
    pub order: Vec<RevisionId>,
    /// Only parents that actually change, in chain order.
    pub edits: Vec<ParentEdit>,
}

impl Linearization {
    pub fn is_noop(&self) -> bool {
        self.edits.is_empty()
    }
}

/// Compute the single chain for a graph without cycles or orphans.
///
/// Roots are ordered by `(order_hint, id)` and every root tree is walked in
/// pre-order with siblings in the same order. Each node's new parent is its
/// predecessor in the resulting sequence, so existing root-to-head paths keep
/// their internal order and only the joins between branches change.
pub fn linearize(graph: &MigrationGraph) -> Result<Linearization> {
    if let Some(orphan) = graph.orphans().first() {
        return Err(ChainError::Unrepairable(format!(
            "revision `{}` references missing parent `{}`",
            orphan.id,
            orphan.parent_id.as_deref().unwrap_or_default()
        )));
    }

    let mut roots = graph.roots();
    roots.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut order: Vec<&MigrationNode> = Vec::with_capacity(graph.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(graph.len());
    for root in roots {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.id.as_str()) {
                continue;
            }
            order.push(node);

            let mut kids: Vec<&MigrationNode> = graph
                .children(&node.id)
                .iter()
                .filter_map(|id| graph.node(id))
                .collect();
            kids.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
            // Reverse so the lowest-ordered branch is walked first.
            stack.extend(kids.into_iter().rev());
        }
    }

    if order.len() != graph.len() {
        let stranded: Vec<&str> = graph
            .nodes()
            .map(|n| n.id.as_str())
            .filter(|id| !seen.contains(id))
            .collect();
        return Err(ChainError::Unrepairable(format!(
            "revisions unreachable from any root (cycle): {}",
            stranded.join(", ")
        )));
    }

    let mut edits = Vec::new();
    for pair in order.windows(2) {
        let (prev, node) = (pair[0], pair[1]);
        if node.parent_id.as_deref() != Some(prev.id.as_str()) {
            edits.push(ParentEdit {
                id: node.id.clone(),
                path: node.source.path.clone(),
                old_parent: node.parent_id.clone(),
                new_parent: prev.id.clone(),
            });
        }
    }

    debug!(
        chain_len = order.len(),
        edits = edits.len(),
        "linearized revision graph"
    );

    Ok(Linearization {
        order: order.into_iter().map(|n| n.id.clone()).collect(),
        edits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::analyze::{ChainHealth, analyze};
    use crate::graph::test_support::{graph, node};
    use crate::types::OrderHint;

    fn edit_pairs(lin: &Linearization) -> Vec<(&str, Option<&str>, &str)> {
        lin.edits
            .iter()
            .map(|e| (e.id.as_str(), e.old_parent.as_deref(), e.new_parent.as_str()))
            .collect()
    }

    #[test]
    fn test_multiple_roots_chain_by_id() {
        let g = graph(&[("C", None), ("A", None), ("B", None)]);
        let lin = linearize(&g).unwrap();
        assert_eq!(lin.order, vec!["A", "B", "C"]);
        assert_eq!(
            edit_pairs(&lin),
            vec![("B", None, "A"), ("C", None, "B")]
        );
    }

    #[test]
    fn test_diverged_heads_chain_lower_branch_first() {
        let g = graph(&[("A", None), ("B", Some("A")), ("C", Some("A"))]);
        let lin = linearize(&g).unwrap();
        assert_eq!(lin.order, vec!["A", "B", "C"]);
        assert_eq!(edit_pairs(&lin), vec![("C", Some("A"), "B")]);
    }

    #[test]
    fn test_branch_internal_order_is_preserved() {
        // a -> b -> c and a -> x -> y: second branch hangs off c.
        let g = graph(&[
            ("a", None),
            ("b", Some("a")),
            ("c", Some("b")),
            ("x", Some("a")),
            ("y", Some("x")),
        ]);
        let lin = linearize(&g).unwrap();
        assert_eq!(lin.order, vec!["a", "b", "c", "x", "y"]);
        assert_eq!(edit_pairs(&lin), vec![("x", Some("a"), "c")]);
    }

    #[test]
    fn test_roots_merge_onto_head_of_previous_tree() {
        let g = graph(&[
            ("r1", None),
            ("r1a", Some("r1")),
            ("r1b", Some("r1")),
            ("r2", None),
            ("r2a", Some("r2")),
        ]);
        let lin = linearize(&g).unwrap();
        assert_eq!(lin.order, vec!["r1", "r1a", "r1b", "r2", "r2a"]);
        assert_eq!(
            edit_pairs(&lin),
            vec![("r1b", Some("r1"), "r1a"), ("r2", None, "r1b")]
        );
    }

    #[test]
    fn test_order_hint_beats_id() {
        let mut late = node("a_late", None);
        late.order_hint = OrderHint::derive(Some("2026-01-01"), "x");
        let mut early = node("z_early", None);
        early.order_hint = OrderHint::derive(Some("2024-01-01"), "x");
        let undated = node("m_undated", None);
        let g = MigrationGraph::new(vec![late, early, undated]);

        let lin = linearize(&g).unwrap();
        assert_eq!(lin.order, vec!["z_early", "a_late", "m_undated"]);
    }

    #[test]
    fn test_healthy_chain_is_noop_and_idempotent() {
        let g = graph(&[("a", None), ("b", Some("a")), ("c", Some("b"))]);
        assert!(linearize(&g).unwrap().is_noop());

        let broken = graph(&[
            ("a", None),
            ("b", Some("a")),
            ("c", Some("a")),
            ("d", None),
            ("e", Some("d")),
        ]);
        let first = linearize(&broken).unwrap();
        let repaired = broken.with_edits(&first.edits);
        assert_eq!(analyze(&repaired).health, ChainHealth::Healthy);
        let second = linearize(&repaired).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.order, first.order);
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        let ids: Vec<String> = (0..20_000).map(|i| format!("r{:05}", i)).collect();
        let mut nodes = vec![node(&ids[0], None)];
        for pair in ids.windows(2) {
            nodes.push(node(&pair[1], Some(pair[0].as_str())));
        }
        nodes.push(node("zz_second_root", None));
        let g = MigrationGraph::new(nodes);
        let lin = linearize(&g).unwrap();
        assert_eq!(lin.edits.len(), 1);
        assert_eq!(lin.edits[0].new_parent, "r19999");
    }

    #[test]
    fn test_rejects_cycles_and_orphans() {
        let cyc = graph(&[("root", None), ("a", Some("b")), ("b", Some("a"))]);
        assert!(matches!(linearize(&cyc), Err(ChainError::Unrepairable(_))));

        let orphan = graph(&[("root", None), ("x", Some("gone"))]);
        assert!(matches!(
            linearize(&orphan),
            Err(ChainError::Unrepairable(_))
        ));
    }
}
