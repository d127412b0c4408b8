use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Byte range into a descriptor source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A descriptor-level parse failure, located in the source when possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    pub reason: ParseFailure,
    pub span: Option<SourceSpan>,
}

impl ParseDiagnostic {
    pub fn new(reason: ParseFailure, span: Option<SourceSpan>) -> Self {
        Self { reason, span }
    }

    pub fn into_error(self, path: impl Into<PathBuf>) -> ChainError {
        ChainError::Parse {
            path: path.into(),
            reason: self.reason,
            span: self.span,
        }
    }
}

impl std::fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Why a single descriptor could not be turned into a migration node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("missing `revision` assignment")]
    MissingRevision,

    #[error("malformed `revision` value `{0}`")]
    MalformedRevision(String),

    #[error("missing `down_revision` assignment")]
    MissingParent,

    #[error("malformed `down_revision` value `{0}`")]
    MalformedParent(String),

    #[error("merge revision lists {0} parents; only single-parent revisions can be linearized")]
    MergeRevision(usize),

    #[error("revision `{0}` lists itself as its parent")]
    SelfParent(String),

    #[error("`{0}` is assigned more than once")]
    RepeatedField(&'static str),

    #[error("duplicate revision `{id}` (already declared in {})", .other.display())]
    DuplicateRevision { id: String, other: PathBuf },

    #[error("{0}")]
    Syntax(String),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("parse error in {}: {reason}", .path.display())]
    Parse {
        path: PathBuf,
        reason: ParseFailure,
        span: Option<SourceSpan>,
    },

    #[error("graph cannot be repaired automatically: {0}")]
    Unrepairable(String),

    #[error("write failure: {message} (reverted {} source(s))", .reverted.len())]
    WriteFailure {
        message: String,
        reverted: Vec<PathBuf>,
    },

    #[error("journal error: {0}")]
    Journal(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChainError {
    pub(crate) fn parse(path: impl Into<PathBuf>, reason: ParseFailure) -> Self {
        ChainError::Parse {
            path: path.into(),
            reason,
            span: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
