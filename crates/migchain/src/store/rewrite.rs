use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use super::journal::{
    JournalEntry, JournalState, RewriteJournal, acquire_lock, new_backup_dir, sidecar_paths,
    write_journal, write_replace,
};
use crate::config::RepairConfig;
use crate::descriptor::ast::AssignedValue;
use crate::descriptor::{Descriptor, DescriptorSet, build_node};
use crate::error::{ChainError, Result, SourceSpan};
use crate::graph::ParentEdit;
use crate::types::content_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    /// Render diffs only; nothing on disk changes.
    Report,
    /// Write every planned rewrite as one all-or-nothing batch.
    Apply,
}

/// A span of the original source and the text that replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub span: SourceSpan,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PlannedRewrite {
    pub edit: ParentEdit,
    pub original_hash: String,
    pub rewritten: String,
    pub diff: String,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    pub planned: Vec<PlannedRewrite>,
    /// Sources written, empty in report mode.
    pub applied: Vec<PathBuf>,
}

impl RewriteOutcome {
    /// Concatenated diff of every planned rewrite.
    pub fn diff(&self) -> String {
        self.planned.iter().map(|p| p.diff.as_str()).collect()
    }
}

pub struct Rewriter {
    versions_dir: PathBuf,
    update_revises_header: bool,
}

impl Rewriter {
    pub fn new(versions_dir: &Path, config: &RepairConfig) -> Self {
        Self {
            versions_dir: versions_dir.to_path_buf(),
            update_revises_header: config.update_revises_header,
        }
    }

    #[instrument(skip_all, fields(edits = edits.len(), mode = ?mode))]
    pub fn run(
        &self,
        set: &DescriptorSet,
        edits: &[ParentEdit],
        mode: RewriteMode,
    ) -> Result<RewriteOutcome> {
        let planned = self.plan(set, edits)?;
        let applied = match mode {
            RewriteMode::Report => Vec::new(),
            RewriteMode::Apply => self.apply(&planned)?,
        };
        Ok(RewriteOutcome { planned, applied })
    }

    /// Render every edit against the scanned sources and confirm each result
    /// parses back to the intended parent.
    pub fn plan(&self, set: &DescriptorSet, edits: &[ParentEdit]) -> Result<Vec<PlannedRewrite>> {
        let mut planned = Vec::with_capacity(edits.len());
        for edit in edits {
            let descriptor = set.get(&edit.id).ok_or_else(|| {
                ChainError::Unrepairable(format!("no descriptor for revision `{}`", edit.id))
            })?;
            let replacements =
                plan_replacements(descriptor, &edit.new_parent, self.update_revises_header)?;
            let rewritten = splice(&descriptor.source, &replacements);

            let reparsed = build_node(descriptor.path(), &rewritten)?;
            if reparsed.node.id != edit.id
                || reparsed.node.parent_id.as_deref() != Some(edit.new_parent.as_str())
            {
                return Err(ChainError::Unrepairable(format!(
                    "rewrite of {} does not round-trip to parent `{}`",
                    descriptor.path().display(),
                    edit.new_parent
                )));
            }

            planned.push(PlannedRewrite {
                edit: edit.clone(),
                original_hash: descriptor.node.source.content_hash.clone(),
                diff: render_diff(descriptor.path(), &descriptor.source, &replacements),
                rewritten,
            });
        }
        Ok(planned)
    }

    /// Write the batch. On any failure every already-written source is
    /// restored from its backup before the error is returned.
    pub fn apply(&self, planned: &[PlannedRewrite]) -> Result<Vec<PathBuf>> {
        if planned.is_empty() {
            return Ok(Vec::new());
        }

        let _lock = acquire_lock(&self.versions_dir)?;
        let paths = sidecar_paths(&self.versions_dir);
        if paths.journal_path.exists() {
            return Err(ChainError::Journal(format!(
                "rewrite journal already exists at {}; run `migchain recover`",
                paths.journal_path.display()
            )));
        }

        let backup_dir = new_backup_dir(&self.versions_dir);
        let mut journal = RewriteJournal::new(&self.versions_dir, &backup_dir);
        if let Err(err) = prepare_batch(planned, &backup_dir, &paths.journal_path, &mut journal) {
            let _ = std::fs::remove_dir_all(&backup_dir);
            let _ = std::fs::remove_file(&paths.journal_path);
            return Err(ChainError::WriteFailure {
                message: format!("failed to prepare rewrite batch: {}", err),
                reverted: Vec::new(),
            });
        }

        let mut applied: Vec<JournalEntry> = Vec::with_capacity(planned.len());
        for (plan, entry) in planned.iter().zip(journal.entries.clone()) {
            if let Err(err) = apply_one(plan) {
                warn!(path = %entry.path.display(), error = %err, "rewrite failed; rolling back batch");
                return Err(rollback(&mut journal, &paths.journal_path, &applied, err));
            }
            applied.push(entry);
        }

        journal.state = JournalState::Committed;
        if let Err(err) = write_journal(&paths.journal_path, &journal) {
            return Err(rollback(&mut journal, &paths.journal_path, &applied, err));
        }
        if let Err(err) = std::fs::remove_dir_all(&backup_dir) {
            warn!(path = %backup_dir.display(), error = %err, "failed to remove rewrite backup");
        }
        if let Err(err) = std::fs::remove_file(&paths.journal_path) {
            warn!(path = %paths.journal_path.display(), error = %err, "failed to remove committed journal");
        }

        info!(files = applied.len(), "applied rewrite batch");
        Ok(applied.into_iter().map(|e| e.path).collect())
    }
}

fn prepare_batch(
    planned: &[PlannedRewrite],
    backup_dir: &Path,
    journal_path: &Path,
    journal: &mut RewriteJournal,
) -> Result<()> {
    std::fs::create_dir_all(backup_dir)?;
    for (index, plan) in planned.iter().enumerate() {
        let current = read_unchanged(&plan.edit.path, &plan.original_hash)?;
        let file_name = plan
            .edit
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("descriptor");
        let backup_path = backup_dir.join(format!("{:04}-{}", index, file_name));
        write_replace(&backup_path, current.as_bytes())?;
        journal.entries.push(JournalEntry {
            path: plan.edit.path.clone(),
            backup_path,
            original_hash: plan.original_hash.clone(),
            new_hash: content_hash(&plan.rewritten),
        });
    }
    write_journal(journal_path, journal)?;
    journal.state = JournalState::Applying;
    write_journal(journal_path, journal)
}

fn read_unchanged(path: &Path, expected_hash: &str) -> Result<String> {
    let current = std::fs::read_to_string(path)?;
    if content_hash(&current) != expected_hash {
        return Err(ChainError::Io(std::io::Error::other(format!(
            "{} changed on disk since it was scanned",
            path.display()
        ))));
    }
    Ok(current)
}

fn apply_one(plan: &PlannedRewrite) -> Result<()> {
    read_unchanged(&plan.edit.path, &plan.original_hash)?;
    write_replace(&plan.edit.path, plan.rewritten.as_bytes())
}

fn rollback(
    journal: &mut RewriteJournal,
    journal_path: &Path,
    applied: &[JournalEntry],
    cause: ChainError,
) -> ChainError {
    let mut reverted = Vec::with_capacity(applied.len());
    let mut failures = Vec::new();
    for entry in applied.iter().rev() {
        let restored = std::fs::read(&entry.backup_path)
            .map_err(ChainError::from)
            .and_then(|bytes| write_replace(&entry.path, &bytes));
        match restored {
            Ok(()) => reverted.push(entry.path.clone()),
            Err(err) => failures.push(format!("{}: {}", entry.path.display(), err)),
        }
    }
    reverted.reverse();

    journal.state = JournalState::Aborted;
    let message = if failures.is_empty() {
        let _ = write_journal(journal_path, journal);
        let _ = std::fs::remove_dir_all(&journal.backup_dir);
        let _ = std::fs::remove_file(journal_path);
        cause.to_string()
    } else {
        // Leave journal and backups for `recover`.
        let _ = write_journal(journal_path, journal);
        format!(
            "{}; rollback incomplete ({}); run `migchain recover`",
            cause,
            failures.join("; ")
        )
    };
    ChainError::WriteFailure { message, reverted }
}

/// Replacements that point `descriptor` at `new_parent`.
pub fn plan_replacements(
    descriptor: &Descriptor,
    new_parent: &str,
    update_revises_header: bool,
) -> Result<Vec<Replacement>> {
    let parent = descriptor.file.down_revision.as_ref().ok_or_else(|| {
        ChainError::Unrepairable(format!(
            "{} has no `down_revision` to rewrite",
            descriptor.path().display()
        ))
    })?;

    let quote = choose_quote(descriptor, new_parent);
    let mut replacements = vec![Replacement {
        span: parent.value_span,
        text: format!("{quote}{new_parent}{quote}"),
    }];

    if update_revises_header {
        if let Some(header) = &descriptor.file.revises_header {
            let glued = header.span.start == header.span.end
                && descriptor.source[..header.span.start].ends_with(':');
            let text = if glued {
                format!(" {}", new_parent)
            } else {
                new_parent.to_string()
            };
            replacements.push(Replacement {
                span: header.span,
                text,
            });
        }
    }

    replacements.sort_by_key(|r| r.span.start);
    Ok(replacements)
}

/// Keep the existing quote style of the parent, else of `revision`.
fn choose_quote(descriptor: &Descriptor, new_parent: &str) -> char {
    let from_parent = descriptor
        .file
        .down_revision
        .as_ref()
        .and_then(|a| match &a.value {
            AssignedValue::Str(lit) => Some(lit.quote),
            AssignedValue::Tuple(items) => items.first().map(|lit| lit.quote),
            _ => None,
        });
    let from_revision = descriptor
        .file
        .revision
        .as_ref()
        .and_then(|a| match &a.value {
            AssignedValue::Str(lit) => Some(lit.quote),
            _ => None,
        });
    let quote = from_parent.or(from_revision).unwrap_or('"');
    if new_parent.contains(quote) {
        if quote == '"' { '\'' } else { '"' }
    } else {
        quote
    }
}

/// Apply non-overlapping replacements sorted by start offset.
pub fn splice(source: &str, replacements: &[Replacement]) -> String {
    let mut out = String::with_capacity(source.len() + 32);
    let mut cursor = 0;
    for r in replacements {
        out.push_str(&source[cursor..r.span.start]);
        out.push_str(&r.text);
        cursor = r.span.end;
    }
    out.push_str(&source[cursor..]);
    out
}

/// Unified-style diff with one hunk per replaced region.
pub fn render_diff(path: &Path, source: &str, replacements: &[Replacement]) -> String {
    let mut out = format!("--- {}\n+++ {}\n", path.display(), path.display());
    let mut line_delta: isize = 0;

    for r in replacements {
        let region_start = source[..r.span.start].rfind('\n').map_or(0, |i| i + 1);
        let region_end = source[r.span.end..]
            .find('\n')
            .map_or(source.len(), |i| r.span.end + i);
        let old_region = &source[region_start..region_end];
        let new_region = format!(
            "{}{}{}",
            &source[region_start..r.span.start],
            r.text,
            &source[r.span.end..region_end]
        );

        let old_lines: Vec<&str> = old_region.lines().collect();
        let new_lines: Vec<&str> = new_region.lines().collect();
        let old_start = source[..region_start].matches('\n').count() + 1;
        let new_start = (old_start as isize + line_delta).max(1);

        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old_start,
            old_lines.len(),
            new_start,
            new_lines.len()
        ));
        for line in &old_lines {
            out.push_str(&format!("-{}\n", line));
        }
        for line in &new_lines {
            out.push_str(&format!("+{}\n", line));
        }
        line_delta += new_lines.len() as isize - old_lines.len() as isize;
    }
    out
}
