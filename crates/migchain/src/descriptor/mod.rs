//! Migration descriptor discovery and parsing.
//!
//! A descriptor is one Alembic revision script. Parsing keeps the byte spans
//! of the `down_revision` value and the `Revises:` header so the rewriter can
//! replace them without touching anything else.

pub mod ast;
pub mod parser;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, instrument};

use crate::config::RepairConfig;
use crate::error::{ChainError, ParseDiagnostic, ParseFailure, Result};
use crate::graph::{MigrationGraph, MigrationNode};
use crate::types::{OrderHint, RevisionId, SourceRef, content_hash};

use self::ast::{AssignedValue, DescriptorFile};
use self::parser::parse_descriptor;

/// One parsed descriptor together with the text it was parsed from.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub node: MigrationNode,
    pub file: DescriptorFile,
    pub source: String,
}

impl Descriptor {
    pub fn path(&self) -> &Path {
        &self.node.source.path
    }

    /// Warnings that do not block parsing, e.g. a stale docstring header.
    pub fn header_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(header) = &self.file.revision_id_header {
            if !header.value.is_empty() && header.value != self.node.id {
                warnings.push(format!(
                    "{}: `Revision ID: {}` does not match revision `{}`",
                    self.path().display(),
                    header.value,
                    self.node.id
                ));
            }
        }
        warnings
    }
}

/// Parse one descriptor into a migration node.
pub fn build_node(path: &Path, source: &str) -> Result<Descriptor> {
    let file = parse_descriptor(source).map_err(|diag| diag.into_error(path))?;

    let revision = file
        .revision
        .as_ref()
        .ok_or_else(|| ChainError::parse(path, ParseFailure::MissingRevision))?;
    let id = match &revision.value {
        AssignedValue::Str(lit) if is_valid_revision_id(&lit.value) => lit.value.clone(),
        _ => {
            let raw = &source[revision.value_span.start..revision.value_span.end];
            return Err(ParseDiagnostic::new(
                ParseFailure::MalformedRevision(raw.to_string()),
                Some(revision.value_span),
            )
            .into_error(path));
        }
    };

    let parent = file
        .down_revision
        .as_ref()
        .ok_or_else(|| ChainError::parse(path, ParseFailure::MissingParent))?;
    let malformed = || {
        let raw = &source[parent.value_span.start..parent.value_span.end];
        ParseDiagnostic::new(
            ParseFailure::MalformedParent(raw.to_string()),
            Some(parent.value_span),
        )
        .into_error(path)
    };
    let parent_id = match &parent.value {
        AssignedValue::None => None,
        AssignedValue::Str(lit) if is_valid_revision_id(&lit.value) => Some(lit.value.clone()),
        AssignedValue::Tuple(items) if items.len() == 1 => {
            if !is_valid_revision_id(&items[0].value) {
                return Err(malformed());
            }
            Some(items[0].value.clone())
        }
        AssignedValue::Tuple(items) if items.len() > 1 => {
            return Err(ParseDiagnostic::new(
                ParseFailure::MergeRevision(items.len()),
                Some(parent.value_span),
            )
            .into_error(path));
        }
        _ => return Err(malformed()),
    };

    if parent_id.as_deref() == Some(id.as_str()) {
        return Err(ParseDiagnostic::new(
            ParseFailure::SelfParent(id),
            Some(parent.value_span),
        )
        .into_error(path));
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let order_hint = OrderHint::derive(
        file.create_date_header.as_ref().map(|h| h.value.as_str()),
        stem,
    );

    Ok(Descriptor {
        node: MigrationNode {
            id,
            parent_id,
            source: SourceRef {
                path: path.to_path_buf(),
                content_hash: content_hash(source),
            },
            order_hint,
        },
        file,
        source: source.to_string(),
    })
}

fn is_valid_revision_id(value: &str) -> bool {
    !value.trim().is_empty() && value.trim() == value
}

/// Every descriptor of one run, keyed by revision id.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    pub versions_dir: PathBuf,
    descriptors: BTreeMap<RevisionId, Descriptor>,
}

impl DescriptorSet {
    /// Parse already-read sources. Sources are processed in path order so the
    /// reported duplicate is deterministic.
    pub fn from_sources(versions_dir: &Path, mut sources: Vec<(PathBuf, String)>) -> Result<Self> {
        sources.sort_by(|a, b| a.0.cmp(&b.0));

        let mut descriptors: BTreeMap<RevisionId, Descriptor> = BTreeMap::new();
        for (path, source) in sources {
            let descriptor = build_node(&path, &source)?;
            if let Some(existing) = descriptors.get(&descriptor.node.id) {
                let span = descriptor.file.revision.as_ref().map(|r| r.value_span);
                return Err(ParseDiagnostic::new(
                    ParseFailure::DuplicateRevision {
                        id: descriptor.node.id.clone(),
                        other: existing.path().to_path_buf(),
                    },
                    span,
                )
                .into_error(path));
            }
            debug!(revision = %descriptor.node.id, path = %path.display(), "parsed descriptor");
            descriptors.insert(descriptor.node.id.clone(), descriptor);
        }

        Ok(Self {
            versions_dir: versions_dir.to_path_buf(),
            descriptors,
        })
    }

    /// Read and parse every descriptor under `migrations_dir`.
    #[instrument(skip(config), fields(migrations_dir = %migrations_dir.display()))]
    pub async fn scan(migrations_dir: &Path, config: &RepairConfig) -> Result<Self> {
        let versions_dir = resolve_versions_dir(migrations_dir, config);
        let paths = list_descriptor_paths(&versions_dir, config)?;

        let sources: Vec<(PathBuf, String)> = futures::stream::iter(paths)
            .map(|path| async move {
                let source = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    ChainError::Io(std::io::Error::new(
                        e.kind(),
                        format!("failed to read {}: {}", path.display(), e),
                    ))
                })?;
                Ok::<_, ChainError>((path, source))
            })
            .buffered(config.read_concurrency.max(1))
            .try_collect()
            .await?;

        let set = Self::from_sources(&versions_dir, sources)?;
        info!(
            versions_dir = %versions_dir.display(),
            descriptors = set.len(),
            "scanned migration descriptors"
        );
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Descriptor> {
        self.descriptors.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.values()
    }

    pub fn graph(&self) -> MigrationGraph {
        MigrationGraph::new(self.descriptors.values().map(|d| d.node.clone()))
    }

    pub fn header_warnings(&self) -> Vec<String> {
        self.iter().flat_map(Descriptor::header_warnings).collect()
    }
}

/// Flask-Migrate keeps scripts in `<dir>/versions`; plain Alembic trees may
/// point straight at the scripts directory.
pub fn resolve_versions_dir(migrations_dir: &Path, config: &RepairConfig) -> PathBuf {
    if !config.versions_subdir.is_empty() {
        let candidate = migrations_dir.join(&config.versions_subdir);
        if candidate.is_dir() {
            return candidate;
        }
    }
    migrations_dir.to_path_buf()
}

fn list_descriptor_paths(versions_dir: &Path, config: &RepairConfig) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(versions_dir).map_err(|e| {
        ChainError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read {}: {}", versions_dir.display(), e),
        ))
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if name.starts_with('.') || config.exclude.iter().any(|ex| ex == name) {
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) != Some(config.extension.as_str()) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}
