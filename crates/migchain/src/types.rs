use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

pub type RevisionId = String;

const CREATE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Tie-break key for otherwise unordered revisions.
///
/// Dated hints sort before undated ones. Never used for correctness, only to
/// make root and branch ordering deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderHint {
    Dated(NaiveDateTime),
    Undated,
}

impl OrderHint {
    /// Derive a hint from a `Create Date:` header, falling back to a leading
    /// `YYYYMMDD` stamp in the file stem.
    pub fn derive(create_date: Option<&str>, file_stem: &str) -> Self {
        if let Some(ts) = create_date.and_then(parse_create_date) {
            return OrderHint::Dated(ts);
        }
        match parse_stem_date(file_stem) {
            Some(ts) => OrderHint::Dated(ts),
            None => OrderHint::Undated,
        }
    }
}

fn parse_create_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in CREATE_DATE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_stem_date(stem: &str) -> Option<NaiveDateTime> {
    let digits = stem.get(..8)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // `20251118abc` is an id, not a stamp.
    if stem[8..].starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return None;
    }
    NaiveDate::parse_from_str(digits, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Handle back to the descriptor a node was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub path: PathBuf,
    pub content_hash: String,
}

/// FNV-1a hash of descriptor content -> hex.
pub(crate) fn content_hash(s: &str) -> String {
    let mut hash: u64 = 14695981039346656037;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    format!("{:016x}", hash)
}
