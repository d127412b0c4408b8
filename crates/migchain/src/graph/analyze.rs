use serde::Serialize;
use tracing::debug;

use super::MigrationGraph;
use crate::types::RevisionId;

/// A parent reference that does not resolve to any known revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanRef {
    pub id: RevisionId,
    pub missing_parent: RevisionId,
}

/// Health class of a revision graph. When several defects are present the
/// most severe wins: cycle, orphan, multiple roots, diverged heads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainHealth {
    Healthy,
    /// Cycles in parent -> child order; the first entry is the minimal one.
    CyclePresent { cycles: Vec<Vec<RevisionId>> },
    Orphan { orphans: Vec<OrphanRef> },
    MultipleRoots { roots: Vec<RevisionId> },
    DivergedHeads { heads: Vec<RevisionId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthKind {
    Healthy,
    CyclePresent,
    Orphan,
    MultipleRoots,
    DivergedHeads,
}

impl HealthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthKind::Healthy => "healthy",
            HealthKind::CyclePresent => "cycle_present",
            HealthKind::Orphan => "orphan",
            HealthKind::MultipleRoots => "multiple_roots",
            HealthKind::DivergedHeads => "diverged_heads",
        }
    }
}

impl ChainHealth {
    pub fn kind(&self) -> HealthKind {
        match self {
            ChainHealth::Healthy => HealthKind::Healthy,
            ChainHealth::CyclePresent { .. } => HealthKind::CyclePresent,
            ChainHealth::Orphan { .. } => HealthKind::Orphan,
            ChainHealth::MultipleRoots { .. } => HealthKind::MultipleRoots,
            ChainHealth::DivergedHeads { .. } => HealthKind::DivergedHeads,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ChainHealth::Healthy)
    }

    /// Only root and head defects can be fixed without guessing intent.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            ChainHealth::MultipleRoots { .. } | ChainHealth::DivergedHeads { .. }
        )
    }
}

/// Full analysis result: the winning class plus every defect found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDiagnosis {
    pub health: ChainHealth,
    pub roots: Vec<RevisionId>,
    pub heads: Vec<RevisionId>,
    pub cycles: Vec<Vec<RevisionId>>,
    pub orphans: Vec<OrphanRef>,
}

pub fn analyze(graph: &MigrationGraph) -> GraphDiagnosis {
    let roots: Vec<RevisionId> = graph.roots().iter().map(|n| n.id.clone()).collect();
    let heads: Vec<RevisionId> = graph.heads().iter().map(|n| n.id.clone()).collect();
    let cycles = find_cycles(graph);
    let orphans: Vec<OrphanRef> = graph
        .orphans()
        .iter()
        .map(|n| OrphanRef {
            id: n.id.clone(),
            missing_parent: n.parent_id.clone().unwrap_or_default(),
        })
        .collect();

    let health = if !cycles.is_empty() {
        ChainHealth::CyclePresent {
            cycles: cycles.clone(),
        }
    } else if !orphans.is_empty() {
        ChainHealth::Orphan {
            orphans: orphans.clone(),
        }
    } else if roots.len() > 1 {
        ChainHealth::MultipleRoots {
            roots: roots.clone(),
        }
    } else if heads.len() > 1 {
        ChainHealth::DivergedHeads {
            heads: heads.clone(),
        }
    } else {
        ChainHealth::Healthy
    };

    debug!(
        health = health.kind().as_str(),
        roots = roots.len(),
        heads = heads.len(),
        cycles = cycles.len(),
        orphans = orphans.len(),
        "analyzed revision graph"
    );

    GraphDiagnosis {
        health,
        roots,
        heads,
        cycles,
        orphans,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    OnPath,
    Done,
}

/// Each node has one parent, so every cycle is found by walking parent links
/// from unvisited nodes until the walk meets its own path.
fn find_cycles(graph: &MigrationGraph) -> Vec<Vec<RevisionId>> {
    let ids: Vec<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
    let mut state: std::collections::HashMap<&str, Visit> =
        ids.iter().map(|id| (*id, Visit::Unseen)).collect();

    let mut cycles = Vec::new();
    for start in &ids {
        if state[start] != Visit::Unseen {
            continue;
        }

        let mut path: Vec<&str> = Vec::new();
        let mut cursor = Some(*start);
        while let Some(id) = cursor {
            match state.get(id).copied() {
                Some(Visit::Unseen) => {
                    state.insert(id, Visit::OnPath);
                    path.push(id);
                    cursor = graph.node(id).and_then(|n| n.parent_id.as_deref());
                }
                Some(Visit::OnPath) => {
                    if let Some(pos) = path.iter().position(|p| *p == id) {
                        cycles.push(canonical_cycle(&path[pos..]));
                    }
                    break;
                }
                // Finished node, or a parent that does not exist.
                Some(Visit::Done) | None => break,
            }
        }
        for id in path {
            state.insert(id, Visit::Done);
        }
    }

    cycles.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    cycles
}

/// `walk` runs child -> parent; report parent -> child starting at the
/// smallest id.
fn canonical_cycle(walk: &[&str]) -> Vec<RevisionId> {
    let mut cycle: Vec<RevisionId> = walk.iter().rev().map(|s| s.to_string()).collect();
    if let Some(min_pos) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(min_pos);
    }
    cycle
}
