//! Configuration module.
//!
//! Handles loading, validating, and merging `promptvault.toml`. Stock defaults
//! are the base layer; a user file overrides any subset of keys, and command
//! line flags override the file.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! store_dir = ".promptvault"          # Where root snapshots are persisted
//!
//! [scan]
//! extensions = ["png", "jpg", "jpeg", "webp"]
//!
//! [processing]
//! max_workers = 8                     # Parallel parse workers (omit for auto = CPU cores)
//! batch_size = 32                     # Files per committed batch (omit for auto = workers * 4)
//! pause_poll_ms = 100                 # How often a paused run checks for resume
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse, so override just the values you want:
//!
//! ```toml
//! [processing]
//! max_workers = 2
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "promptvault.toml";

/// Hard ceiling on parse workers, whatever the machine or the file says.
pub const MAX_WORKERS: usize = 16;

/// Hard ceiling on files per batch.
pub const MAX_BATCH_SIZE: usize = 256;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `promptvault.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding persisted root snapshots.
    pub store_dir: String,
    /// Which files count as candidate images.
    pub scan: ScanConfig,
    /// Parallelism and batching of the indexing loop.
    pub processing: ProcessingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: ".promptvault".to_string(),
            scan: ScanConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_dir.trim().is_empty() {
            return Err(ConfigError::Validation("store_dir must not be empty".into()));
        }
        if self.scan.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "scan.extensions must not be empty".into(),
            ));
        }
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        if self.processing.batch_size == Some(0) {
            return Err(ConfigError::Validation(
                "processing.batch_size must be at least 1".into(),
            ));
        }
        if !(1..=10_000).contains(&self.processing.pause_poll_ms) {
            return Err(ConfigError::Validation(
                "processing.pause_poll_ms must be 1-10000".into(),
            ));
        }
        Ok(())
    }
}

/// Candidate file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// File extensions (case-insensitive, without the dot) to list.
    pub extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: ["png", "jpg", "jpeg", "webp"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel parse workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count (or [`MAX_WORKERS`]) are clamped down.
    pub max_workers: Option<usize>,
    /// Files parsed per batch. Each batch is merged and published as a unit.
    /// When absent, four files per worker.
    pub batch_size: Option<usize>,
    /// Polling interval of a paused run, in milliseconds.
    pub pause_poll_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            batch_size: None,
            pause_poll_ms: 100,
        }
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → all available cores
/// - `Some(n)` → `min(n, cores)` (user can constrain down, not up)
///
/// Either way no more than [`MAX_WORKERS`].
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_workers
        .map(|n| n.min(cores))
        .unwrap_or(cores)
        .clamp(1, MAX_WORKERS)
}

/// Resolve the effective batch size for `workers` parse workers.
pub fn effective_batch_size(config: &ProcessingConfig, workers: usize) -> usize {
    config
        .batch_size
        .unwrap_or(workers * 4)
        .clamp(1, MAX_BATCH_SIZE)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] in the
/// working directory is used when present and stock defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let overlay = match path {
        Some(path) => Some(toml::from_str(&fs::read_to_string(path)?)?),
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    resolve_config(stock_defaults_value()?, overlay)
}

/// Returns a fully-commented stock `promptvault.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# promptvault configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Directory where per-root index snapshots are stored.
store_dir = ".promptvault"

# ---------------------------------------------------------------------------
# Scanning
# ---------------------------------------------------------------------------
[scan]
# File extensions (case-insensitive) treated as candidate images.
# The container is still detected by signature, not by extension.
extensions = ["png", "jpg", "jpeg", "webp"]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel parse workers.
# Omit or comment out to auto-detect (= number of CPU cores, at most 16).
# max_workers = 8

# Files parsed per batch. Results are merged and published after each batch,
# and pause requests take effect between batches.
# Omit or comment out for four files per worker (at most 256).
# batch_size = 32

# How often a paused run checks whether it was resumed, in milliseconds.
pause_poll_ms = 100
"##
}
