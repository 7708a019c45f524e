#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::TaskweaveError;

pub const CONFIG_ENV_VAR: &str = "TASKWEAVE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub tree: TreeConfig,
    pub mutations: MutationConfig,
    pub transactions: TransactionConfig,
    pub tags: TagConfig,
    pub comments: CommentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TreeConfig {
    pub max_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MutationConfig {
    pub rollback_on_failure: bool,
    pub bulk_write_concurrency: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            rollback_on_failure: false,
            bulk_write_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransactionConfig {
    pub max_attempts: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TagConfig {
    pub default_color: String,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            default_color: "bg-zinc-500/20 text-zinc-700 border border-zinc-500/30".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommentConfig {
    pub page_size: usize,
}

impl Default for CommentConfig {
    fn default() -> Self {
        Self { page_size: 10 }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), TaskweaveError> {
        if self.tree.max_depth == 0 {
            return Err(TaskweaveError::Config(
                "tree.max_depth must be >= 1".to_owned(),
            ));
        }
        if self.mutations.bulk_write_concurrency == 0 {
            return Err(TaskweaveError::Config(
                "mutations.bulk_write_concurrency must be >= 1".to_owned(),
            ));
        }
        if self.transactions.max_attempts == 0 {
            return Err(TaskweaveError::Config(
                "transactions.max_attempts must be >= 1".to_owned(),
            ));
        }
        if self.tags.default_color.trim().is_empty() {
            return Err(TaskweaveError::Config(
                "tags.default_color must not be empty".to_owned(),
            ));
        }
        if self.comments.page_size == 0 {
            return Err(TaskweaveError::Config(
                "comments.page_size must be >= 1".to_owned(),
            ));
        }
        Ok(())
    }
}

pub fn default_path() -> anyhow::Result<PathBuf> {
    if let Some(v) = std::env::var_os(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("com", "taskweave", "taskweave")
        .context("failed to determine platform config directory")?;
    Ok(proj.config_dir().join("config.toml"))
}

pub fn load() -> anyhow::Result<SyncConfig> {
    let path = default_path()?;
    load_from_file(&path)
}

pub fn load_from_file(path: &Path) -> anyhow::Result<SyncConfig> {
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let cfg = parse(&raw).with_context(|| format!("invalid config in {}", path.display()))?;
    Ok(cfg)
}

pub fn parse(raw: &str) -> anyhow::Result<SyncConfig> {
    let cfg: SyncConfig = toml::from_str(raw).context("failed to deserialize TOML")?;
    cfg.validate()?;
    Ok(cfg)
}
