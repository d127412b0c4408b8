use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ChainError, Result};
use crate::graph::{GraphDiagnosis, HealthKind, OrphanRef, ParentEdit};
use crate::repair::{RepairStatus, RunMode};
use crate::types::RevisionId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub roots_found: usize,
    pub heads_found: usize,
    pub cycles_found: usize,
    pub orphans_found: usize,
    pub edits_planned: usize,
    pub edits_applied: usize,
    pub roots_fixed: usize,
    pub heads_fixed: usize,
    /// Cycles and orphans are never repaired automatically; always zero.
    pub cycles_fixed: usize,
    pub orphans_fixed: usize,
}

impl RepairSummary {
    /// `key=value` pairs on one line.
    pub fn to_line(&self) -> String {
        format!(
            "roots={} heads={} cycles={} orphans={} edits_planned={} edits_applied={} roots_fixed={} heads_fixed={} cycles_fixed={} orphans_fixed={}",
            self.roots_found,
            self.heads_found,
            self.cycles_found,
            self.orphans_found,
            self.edits_planned,
            self.edits_applied,
            self.roots_fixed,
            self.heads_fixed,
            self.cycles_fixed,
            self.orphans_fixed
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub migrations_dir: PathBuf,
    pub versions_dir: PathBuf,
    pub mode: RunMode,
    pub status: RepairStatus,
    pub descriptors: usize,
    pub health: HealthKind,
    pub roots: Vec<RevisionId>,
    pub heads: Vec<RevisionId>,
    pub cycles: Vec<Vec<RevisionId>>,
    pub orphans: Vec<OrphanRef>,
    pub chains_before: Vec<Vec<RevisionId>>,
    pub chain_after: Option<Vec<RevisionId>>,
    pub edits: Vec<ParentEdit>,
    pub diff: Option<String>,
    pub warnings: Vec<String>,
    pub summary: RepairSummary,
}

impl RepairReport {
    pub(crate) fn new(
        migrations_dir: &Path,
        versions_dir: &Path,
        mode: RunMode,
        descriptors: usize,
        diagnosis: &GraphDiagnosis,
        chains_before: Vec<Vec<RevisionId>>,
    ) -> Self {
        Self {
            migrations_dir: migrations_dir.to_path_buf(),
            versions_dir: versions_dir.to_path_buf(),
            mode,
            status: RepairStatus::Healthy,
            descriptors,
            health: diagnosis.health.kind(),
            roots: diagnosis.roots.clone(),
            heads: diagnosis.heads.clone(),
            cycles: diagnosis.cycles.clone(),
            orphans: diagnosis.orphans.clone(),
            chains_before,
            chain_after: None,
            edits: Vec::new(),
            diff: None,
            warnings: Vec::new(),
            summary: RepairSummary {
                roots_found: diagnosis.roots.len(),
                heads_found: diagnosis.heads.len(),
                cycles_found: diagnosis.cycles.len(),
                orphans_found: diagnosis.orphans.len(),
                ..RepairSummary::default()
            },
        }
    }

    /// Record the outcome and derive the edit counters from it.
    pub(crate) fn finish(&mut self, status: RepairStatus, edits_applied: usize) {
        self.status = status;
        self.summary.edits_planned = self.edits.len();
        self.summary.edits_applied = edits_applied;
        if status == RepairStatus::Fixed {
            self.summary.roots_fixed = self
                .edits
                .iter()
                .filter(|e| e.old_parent.is_none())
                .count();
            self.summary.heads_fixed = self.heads.len().saturating_sub(1);
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ChainError::Io(std::io::Error::other(format!("serialize report: {}", e))))
    }

    /// Human-readable rendering ending in a single `summary:` line.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Migration Chain Report");
        let _ = writeln!(out, "  Directory: {}", self.migrations_dir.display());
        let _ = writeln!(out, "  Versions: {}", self.versions_dir.display());
        let _ = writeln!(out, "  Mode: {}", self.mode.as_str());
        let _ = writeln!(out, "  Descriptors: {}", self.descriptors);
        let _ = writeln!(out, "  Health: {}", self.health.as_str());
        let _ = writeln!(out, "  Status: {}", self.status.as_str());
        let _ = writeln!(out);

        let _ = writeln!(out, "Roots: {}", join_or_none(&self.roots, ", "));
        let _ = writeln!(out, "Heads: {}", join_or_none(&self.heads, ", "));

        if !self.cycles.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Cycles:");
            for cycle in &self.cycles {
                let closing = cycle.first().map(String::as_str).unwrap_or_default();
                let _ = writeln!(out, "- {} -> {}", cycle.join(" -> "), closing);
            }
        }
        if !self.orphans.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Orphans:");
            for orphan in &self.orphans {
                let _ = writeln!(
                    out,
                    "- {} (missing parent {})",
                    orphan.id, orphan.missing_parent
                );
            }
        }

        if !self.chains_before.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Chains:");
            for chain in &self.chains_before {
                let _ = writeln!(out, "  {}", chain.join(" -> "));
            }
        }

        if !self.edits.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{:<24} {:<24} {}", "REVISION", "OLD PARENT", "NEW PARENT");
            for edit in &self.edits {
                let _ = writeln!(
                    out,
                    "{:<24} {:<24} {}",
                    edit.id,
                    edit.old_parent.as_deref().unwrap_or("(none)"),
                    edit.new_parent
                );
            }
        }
        if let Some(chain) = &self.chain_after {
            if !self.edits.is_empty() {
                let _ = writeln!(out);
                let _ = writeln!(out, "Chain after repair:");
                let _ = writeln!(out, "  {}", chain.join(" -> "));
            }
        }

        if let Some(diff) = self.diff.as_deref().filter(|d| !d.is_empty()) {
            let _ = writeln!(out);
            out.push_str(diff);
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Warnings:");
            for w in &self.warnings {
                let _ = writeln!(out, "- {}", w);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "summary: status={} health={} {}",
            self.status.as_str(),
            self.health.as_str(),
            self.summary.to_line()
        );
        out
    }
}

fn join_or_none(ids: &[RevisionId], sep: &str) -> String {
    if ids.is_empty() {
        "(none)".to_string()
    } else {
        ids.join(sep)
    }
}
