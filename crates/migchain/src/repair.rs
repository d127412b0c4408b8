//! End-to-end pipeline: scan, analyze, linearize, rewrite, verify.

use std::path::Path;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::RepairConfig;
use crate::descriptor::{DescriptorSet, resolve_versions_dir};
use crate::error::Result;
use crate::graph::{analyze, linearize};
use crate::report::RepairReport;
use crate::store::{
    RecoveryReport, RewriteMode, Rewriter, inspect_sidecars, reconcile_sidecars, recover,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Check,
    DryRun,
    Fix,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Check => "check",
            RunMode::DryRun => "dry-run",
            RunMode::Fix => "fix",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Healthy,
    Fixed,
    /// Repairable, but the run did not write.
    NeedsFix,
    /// Cycle or orphan; never auto-fixed.
    Unfixable,
}

impl RepairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStatus::Healthy => "healthy",
            RepairStatus::Fixed => "fixed",
            RepairStatus::NeedsFix => "needs_fix",
            RepairStatus::Unfixable => "unfixable",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RepairStatus::Healthy | RepairStatus::Fixed => 0,
            RepairStatus::NeedsFix => 1,
            RepairStatus::Unfixable => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepairExecution {
    pub status: RepairStatus,
    pub report: RepairReport,
}

#[instrument(skip(config), fields(migrations_dir = %migrations_dir.display(), mode = mode.as_str()))]
pub async fn execute_repair(
    migrations_dir: &Path,
    mode: RunMode,
    config: &RepairConfig,
) -> Result<RepairExecution> {
    let versions_dir = resolve_versions_dir(migrations_dir, config);
    let mut warnings = Vec::new();
    if versions_dir.is_dir() {
        match mode {
            RunMode::Fix => reconcile_sidecars(&versions_dir)?,
            RunMode::Check | RunMode::DryRun => warnings.extend(inspect_sidecars(&versions_dir)),
        }
    }

    let set = DescriptorSet::scan(migrations_dir, config).await?;
    warnings.extend(set.header_warnings());
    if set.is_empty() {
        warnings.push(format!(
            "no migration descriptors found in {}",
            set.versions_dir.display()
        ));
    }

    let graph = set.graph();
    let diagnosis = analyze(&graph);
    let mut report = RepairReport::new(
        migrations_dir,
        &set.versions_dir,
        mode,
        set.len(),
        &diagnosis,
        graph.chains(),
    );
    report.warnings = warnings;

    if diagnosis.health.is_healthy() {
        report.chain_after = report.chains_before.first().cloned();
        report.finish(RepairStatus::Healthy, 0);
        info!(descriptors = set.len(), "migration chain is healthy");
        return Ok(RepairExecution {
            status: RepairStatus::Healthy,
            report,
        });
    }

    if !diagnosis.health.is_repairable() {
        report.finish(RepairStatus::Unfixable, 0);
        warn!(
            health = diagnosis.health.kind().as_str(),
            "migration chain cannot be repaired automatically"
        );
        return Ok(RepairExecution {
            status: RepairStatus::Unfixable,
            report,
        });
    }

    let linearization = linearize(&graph)?;
    report.chain_after = Some(linearization.order.clone());
    report.edits = linearization.edits.clone();

    let rewriter = Rewriter::new(&set.versions_dir, config);
    let status = match mode {
        RunMode::Check => {
            report.finish(RepairStatus::NeedsFix, 0);
            RepairStatus::NeedsFix
        }
        RunMode::DryRun => {
            let outcome = rewriter.run(&set, &linearization.edits, RewriteMode::Report)?;
            report.diff = Some(outcome.diff());
            report.finish(RepairStatus::NeedsFix, 0);
            RepairStatus::NeedsFix
        }
        RunMode::Fix => {
            let outcome = rewriter.run(&set, &linearization.edits, RewriteMode::Apply)?;
            report.diff = Some(outcome.diff());
            report.finish(RepairStatus::Fixed, outcome.applied.len());

            let rescanned = DescriptorSet::scan(migrations_dir, config).await?;
            let after = analyze(&rescanned.graph());
            if !after.health.is_healthy() {
                warn!(health = after.health.kind().as_str(), "post-repair verification failed");
                report.warnings.push(format!(
                    "post-repair verification classified the graph as {}",
                    after.health.kind().as_str()
                ));
            }
            RepairStatus::Fixed
        }
    };

    info!(
        status = status.as_str(),
        edits = report.edits.len(),
        "repair run complete"
    );
    Ok(RepairExecution { status, report })
}

/// Roll back an interrupted `fix` under `migrations_dir`.
#[instrument(skip(config), fields(migrations_dir = %migrations_dir.display()))]
pub async fn recover_repair(migrations_dir: &Path, config: &RepairConfig) -> Result<RecoveryReport> {
    let versions_dir = resolve_versions_dir(migrations_dir, config);
    recover(&versions_dir)
}
