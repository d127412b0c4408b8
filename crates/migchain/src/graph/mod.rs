//! In-memory revision graph.
//!
//! Every node has at most one parent, so the graph is a forest of revision
//! trees plus, when something is broken, parent cycles and dangling parent
//! references. The graph is immutable; repairs are computed as edit sets.

pub mod analyze;
pub mod linearize;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{OrderHint, RevisionId, SourceRef};

pub use analyze::{ChainHealth, GraphDiagnosis, HealthKind, OrphanRef, analyze};
pub use linearize::{Linearization, ParentEdit, linearize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationNode {
    pub id: RevisionId,
    pub parent_id: Option<RevisionId>,
    pub source: SourceRef,
    pub order_hint: OrderHint,
}

impl MigrationNode {
    /// Deterministic ordering key: hint first, then id.
    pub fn sort_key(&self) -> (&OrderHint, &str) {
        (&self.order_hint, self.id.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
    nodes: BTreeMap<RevisionId, MigrationNode>,
    /// parent id -> child ids, only for parents that exist. Sorted by id.
    children: BTreeMap<RevisionId, Vec<RevisionId>>,
}

impl MigrationGraph {
    /// Build from nodes with unique ids; a later duplicate replaces an
    /// earlier one, so callers must reject duplicates first.
    pub fn new(nodes: impl IntoIterator<Item = MigrationNode>) -> Self {
        let nodes: BTreeMap<RevisionId, MigrationNode> =
            nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        let mut children: BTreeMap<RevisionId, Vec<RevisionId>> = BTreeMap::new();
        for node in nodes.values() {
            if let Some(parent) = &node.parent_id {
                if nodes.contains_key(parent) {
                    children
                        .entry(parent.clone())
                        .or_default()
                        .push(node.id.clone());
                }
            }
        }

        Self { nodes, children }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&MigrationNode> {
        self.nodes.get(id)
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &MigrationNode> {
        self.nodes.values()
    }

    /// Nodes without a parent reference.
    pub fn roots(&self) -> Vec<&MigrationNode> {
        self.nodes().filter(|n| n.parent_id.is_none()).collect()
    }

    /// Nodes that no other node names as its parent.
    pub fn heads(&self) -> Vec<&MigrationNode> {
        self.nodes()
            .filter(|n| !self.children.contains_key(&n.id))
            .collect()
    }

    pub fn children(&self, id: &str) -> &[RevisionId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes whose parent reference does not resolve.
    pub fn orphans(&self) -> Vec<&MigrationNode> {
        self.nodes()
            .filter(|n| {
                n.parent_id
                    .as_ref()
                    .is_some_and(|p| !self.nodes.contains_key(p))
            })
            .collect()
    }

    /// Walk parent references upward from `id` (exclusive).
    pub fn ancestors(&self, id: &str) -> Ancestors<'_> {
        Ancestors {
            graph: self,
            current: self.nodes.get(id),
            steps: 0,
            cycle_detected: false,
            dangling_parent: None,
        }
    }

    /// Every maximal root-to-head path, roots and branches in id order.
    /// Nodes that cannot reach a root (cycles, orphans) appear in no chain.
    pub fn chains(&self) -> Vec<Vec<RevisionId>> {
        let mut chains = Vec::new();
        for root in self.roots() {
            // (node, depth): `path` is truncated back to `depth` before each
            // push, so only complete chains are cloned.
            let mut stack: Vec<(&str, usize)> = vec![(root.id.as_str(), 0)];
            let mut path: Vec<&str> = Vec::new();
            while let Some((id, depth)) = stack.pop() {
                path.truncate(depth);
                path.push(id);
                let kids = self.children(id);
                if kids.is_empty() {
                    chains.push(path.iter().map(|s| s.to_string()).collect());
                    continue;
                }
                stack.extend(kids.iter().rev().map(|kid| (kid.as_str(), depth + 1)));
            }
        }
        chains
    }

    /// A new graph with the given parent edits applied.
    pub fn with_edits(&self, edits: &[ParentEdit]) -> MigrationGraph {
        let mut nodes = self.nodes.clone();
        for edit in edits {
            if let Some(node) = nodes.get_mut(&edit.id) {
                node.parent_id = Some(edit.new_parent.clone());
            }
        }
        MigrationGraph::new(nodes.into_values())
    }
}

/// Lazy parent walk, bounded to the node count.
pub struct Ancestors<'a> {
    graph: &'a MigrationGraph,
    current: Option<&'a MigrationNode>,
    steps: usize,
    cycle_detected: bool,
    dangling_parent: Option<RevisionId>,
}

impl Ancestors<'_> {
    /// True when the walk exceeded the node count without reaching a root.
    pub fn cycle_detected(&self) -> bool {
        self.cycle_detected
    }

    /// The unresolved parent id the walk stopped at, if any.
    pub fn dangling_parent(&self) -> Option<&str> {
        self.dangling_parent.as_deref()
    }
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a MigrationNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current.take()?;
        let parent_id = node.parent_id.as_ref()?;
        if self.steps >= self.graph.len() {
            self.cycle_detected = true;
            return None;
        }
        match self.graph.nodes.get(parent_id) {
            Some(parent) => {
                self.steps += 1;
                self.current = Some(parent);
                Some(parent)
            }
            None => {
                self.dangling_parent = Some(parent_id.clone());
                None
            }
        }
    }
}
