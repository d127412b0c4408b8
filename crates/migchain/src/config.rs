use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{ChainError, Result};

pub const CONFIG_FILENAME: &str = "migchain.toml";

const DEFAULT_VERSIONS_SUBDIR: &str = "versions";
const DEFAULT_EXTENSION: &str = "py";
const DEFAULT_READ_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepairConfig {
    /// Subdirectory holding the revision scripts, if present.
    pub versions_subdir: String,
    /// File extension of revision scripts, without the dot.
    pub extension: String,
    /// File names to skip.
    pub exclude: Vec<String>,
    /// Upper bound on concurrent descriptor reads.
    pub read_concurrency: usize,
    /// Rewrite the docstring `Revises:` header alongside `down_revision`.
    pub update_revises_header: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            versions_subdir: DEFAULT_VERSIONS_SUBDIR.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            exclude: vec!["__init__.py".to_string()],
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            update_revises_header: true,
        }
    }
}

impl RepairConfig {
    /// Load `explicit`, else `<migrations_dir>/migchain.toml` when present,
    /// else defaults; then apply `MIGCHAIN_*` environment overrides.
    pub fn load(migrations_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path: Option<PathBuf> = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let candidate = migrations_dir.join(CONFIG_FILENAME);
                candidate.is_file().then_some(candidate)
            }
        };

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    ChainError::Config(format!("failed to read {}: {}", path.display(), e))
                })?;
                debug!(path = %path.display(), "loaded config file");
                Self::from_toml(&raw)
                    .map_err(|e| ChainError::Config(format!("{}: {}", path.display(), e)))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(subdir) = env_string("MIGCHAIN_VERSIONS_SUBDIR") {
            self.versions_subdir = subdir;
        }
        self.read_concurrency = parse_env_usize("MIGCHAIN_READ_CONCURRENCY", self.read_concurrency);
        if let Some(flag) = env_flag("MIGCHAIN_UPDATE_REVISES_HEADER") {
            self.update_revises_header = flag;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.read_concurrency == 0 {
            return Err(ChainError::Config(
                "read_concurrency must be at least 1".to_string(),
            ));
        }
        if self.extension.is_empty() || self.extension.starts_with('.') {
            return Err(ChainError::Config(format!(
                "extension must be non-empty and given without a dot (got `{}`)",
                self.extension
            )));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
