//! Sidecar files of an in-flight `fix`: lock, journal and source backups.
//!
//! The journal is written before the first descriptor is touched and removed
//! only after the batch committed or was fully reverted, so its presence
//! always means the directory may hold a partially applied batch.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ChainError, Result};
use crate::types::content_hash;

const LOCK_FILENAME: &str = ".migchain.lock";
const JOURNAL_FILENAME: &str = ".migchain.journal.json";
const BACKUP_PREFIX: &str = ".migchain.backup.";
const TMP_SUFFIX: &str = "migchain.tmp";
const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum JournalState {
    Prepared,
    Applying,
    Committed,
    Aborted,
}

impl JournalState {
    fn name(&self) -> &'static str {
        match self {
            JournalState::Prepared => "PREPARED",
            JournalState::Applying => "APPLYING",
            JournalState::Committed => "COMMITTED",
            JournalState::Aborted => "ABORTED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JournalEntry {
    pub(crate) path: PathBuf,
    pub(crate) backup_path: PathBuf,
    pub(crate) original_hash: String,
    pub(crate) new_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RewriteJournal {
    pub(crate) version: u32,
    pub(crate) state: JournalState,
    pub(crate) versions_dir: PathBuf,
    pub(crate) backup_dir: PathBuf,
    pub(crate) created_at_unix: u64,
    pub(crate) entries: Vec<JournalEntry>,
}

impl RewriteJournal {
    pub(crate) fn new(versions_dir: &Path, backup_dir: &Path) -> Self {
        RewriteJournal {
            version: JOURNAL_VERSION,
            state: JournalState::Prepared,
            versions_dir: versions_dir.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
            created_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            entries: Vec::new(),
        }
    }
}

pub(crate) struct SidecarPaths {
    pub(crate) lock_path: PathBuf,
    pub(crate) journal_path: PathBuf,
}

pub(crate) fn sidecar_paths(versions_dir: &Path) -> SidecarPaths {
    SidecarPaths {
        lock_path: versions_dir.join(LOCK_FILENAME),
        journal_path: versions_dir.join(JOURNAL_FILENAME),
    }
}

/// Fresh backup directory name for one batch.
pub(crate) fn new_backup_dir(versions_dir: &Path) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    versions_dir.join(format!("{}{}-{}", BACKUP_PREFIX, nonce, std::process::id()))
}

fn existing_backup_dirs(versions_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(versions_dir)? {
        let entry = entry?;
        let is_backup = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(BACKUP_PREFIX));
        if is_backup && entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub(crate) struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub(crate) fn acquire_lock(versions_dir: &Path) -> Result<LockGuard> {
    let path = sidecar_paths(versions_dir).lock_path;
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .map_err(|e| {
            ChainError::Journal(format!(
                "rewrite lock already held or cannot be created at {}: {}",
                path.display(),
                e
            ))
        })?;
    let _ = writeln!(file, "{}", std::process::id());
    Ok(LockGuard { path })
}

pub(crate) fn write_journal(path: &Path, journal: &RewriteJournal) -> Result<()> {
    let json = serde_json::to_string_pretty(journal)
        .map_err(|e| ChainError::Journal(format!("serialize rewrite journal: {}", e)))?;
    write_replace(path, json.as_bytes())
}

fn read_journal(path: &Path) -> Result<RewriteJournal> {
    let raw = std::fs::read_to_string(path)?;
    let journal: RewriteJournal = serde_json::from_str(&raw)
        .map_err(|e| ChainError::Journal(format!("parse rewrite journal: {}", e)))?;
    if journal.version != JOURNAL_VERSION {
        return Err(ChainError::Journal(format!(
            "unsupported rewrite journal version {} (expected {})",
            journal.version, JOURNAL_VERSION
        )));
    }
    Ok(journal)
}

/// Replace `target` with `bytes`: write a temp sibling, fsync, read it back to
/// confirm the write is complete, then rename over the target.
pub(crate) fn write_replace(target: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ChainError::Journal(format!("invalid path: {}", target.display())))?;
    let tmp_path = target.with_file_name(format!("{}.{}", file_name, TMP_SUFFIX));

    let result = (|| -> Result<()> {
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        let written = std::fs::read(&tmp_path)?;
        if written != bytes {
            return Err(ChainError::Io(std::io::Error::other(format!(
                "short write to {} ({} of {} bytes)",
                tmp_path.display(),
                written.len(),
                bytes.len()
            ))));
        }
        std::fs::rename(&tmp_path, target)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

/// Cleanup before a `fix`: a committed journal is finished work, anything else
/// needs `recover`.
pub fn reconcile_sidecars(versions_dir: &Path) -> Result<()> {
    let paths = sidecar_paths(versions_dir);

    if !paths.journal_path.exists() {
        if let Some(orphan) = existing_backup_dirs(versions_dir)?.first() {
            return Err(ChainError::Journal(format!(
                "found rewrite backup at {} without a journal; run `migchain recover` before proceeding",
                orphan.display()
            )));
        }
        return Ok(());
    }

    let journal = read_journal(&paths.journal_path)?;
    match journal.state {
        JournalState::Committed => {
            if journal.backup_dir.exists() {
                std::fs::remove_dir_all(&journal.backup_dir)?;
            }
            std::fs::remove_file(&paths.journal_path)?;
            info!(journal = %paths.journal_path.display(), "cleaned up committed rewrite journal");
            Ok(())
        }
        state => Err(ChainError::Journal(format!(
            "incomplete rewrite journal at {} (state {}); run `migchain recover`",
            paths.journal_path.display(),
            state.name()
        ))),
    }
}

/// Read-only description of leftover sidecars, for runs that must not mutate.
pub fn inspect_sidecars(versions_dir: &Path) -> Vec<String> {
    let paths = sidecar_paths(versions_dir);
    let mut notes = Vec::new();
    if paths.journal_path.exists() {
        let state = read_journal(&paths.journal_path)
            .map(|j| j.state.name().to_string())
            .unwrap_or_else(|e| format!("unreadable: {}", e));
        notes.push(format!(
            "rewrite journal present at {} (state {}); run `migchain recover`",
            paths.journal_path.display(),
            state
        ));
    }
    if paths.lock_path.exists() {
        notes.push(format!(
            "rewrite lock present at {}",
            paths.lock_path.display()
        ));
    }
    notes
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Journal state found, if there was a journal.
    pub journal_state: Option<String>,
    /// Sources restored from backup.
    pub restored: Vec<PathBuf>,
    /// Sidecar files and directories removed.
    pub removed: Vec<PathBuf>,
}

/// Roll back an interrupted batch and clear its sidecars.
///
/// A source is restored only when it holds the journaled rewrite, or when a
/// batch that reached `APPLYING` left it missing. Any other content is
/// someone else's edit: recovery stops with an error and keeps the sidecars.
///
/// Must not run while another `fix` is active on the same directory.
pub fn recover(versions_dir: &Path) -> Result<RecoveryReport> {
    let paths = sidecar_paths(versions_dir);
    let mut report = RecoveryReport::default();

    if paths.journal_path.exists() {
        let journal = read_journal(&paths.journal_path)?;
        report.journal_state = Some(journal.state.name().to_string());

        if journal.state != JournalState::Committed {
            // Decide every entry before writing any, so a conflict leaves the
            // directory and its sidecars exactly as found.
            let mut to_restore = Vec::new();
            for entry in &journal.entries {
                let current_hash = std::fs::read_to_string(&entry.path)
                    .ok()
                    .map(|s| content_hash(&s));
                match current_hash.as_deref() {
                    Some(hash) if hash == entry.original_hash => {}
                    Some(hash) if hash == entry.new_hash => to_restore.push(entry),
                    None if matches!(
                        journal.state,
                        JournalState::Applying | JournalState::Aborted
                    ) =>
                    {
                        to_restore.push(entry)
                    }
                    Some(_) => {
                        return Err(ChainError::Journal(format!(
                            "{} matches neither its original nor its rewritten content; \
                             resolve it by hand, then remove {}",
                            entry.path.display(),
                            paths.journal_path.display()
                        )));
                    }
                    None => {
                        return Err(ChainError::Journal(format!(
                            "{} is missing but journal state {} never wrote it",
                            entry.path.display(),
                            journal.state.name()
                        )));
                    }
                }
            }

            for entry in to_restore {
                let backup = std::fs::read_to_string(&entry.backup_path).map_err(|e| {
                    ChainError::Journal(format!(
                        "cannot restore {}: backup {} unreadable: {}",
                        entry.path.display(),
                        entry.backup_path.display(),
                        e
                    ))
                })?;
                if content_hash(&backup) != entry.original_hash {
                    return Err(ChainError::Journal(format!(
                        "backup {} does not match the journaled original of {}",
                        entry.backup_path.display(),
                        entry.path.display()
                    )));
                }
                write_replace(&entry.path, backup.as_bytes())?;
                warn!(path = %entry.path.display(), "restored descriptor from backup");
                report.restored.push(entry.path.clone());
            }
        }

        if journal.backup_dir.exists() {
            std::fs::remove_dir_all(&journal.backup_dir)?;
            report.removed.push(journal.backup_dir.clone());
        }
        std::fs::remove_file(&paths.journal_path)?;
        report.removed.push(paths.journal_path.clone());
    }

    // Backups without a journal predate the first write; originals are intact.
    for dir in existing_backup_dirs(versions_dir)? {
        std::fs::remove_dir_all(&dir)?;
        report.removed.push(dir);
    }
    if paths.lock_path.exists() {
        std::fs::remove_file(&paths.lock_path)?;
        report.removed.push(paths.lock_path.clone());
    }

    info!(
        restored = report.restored.len(),
        removed = report.removed.len(),
        "recovery complete"
    );
    Ok(report)
}
