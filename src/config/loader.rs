// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::consts::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DIR, DEFAULT_MAX_ATTEMPTS, FALLBACK_MAX_WORKERS,
};
use crate::errors::{ConfigError, FailureStrategy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for the execution engine.
///
/// Describes where working directories live, how the scheduler behaves, how the cache
/// decides whether a node must run again, and how external tools are launched. Pipeline
/// graphs themselves are built in code; this file only tunes how they run.
///
/// # Example
/// ```yaml
/// base_dir: /scratch/preproc
/// executor:
///   max_workers: 4
///   timeout_seconds: 7200
///   failure_strategy: continue_on_error
///   retry:
///     max_attempts: 2
///     backoff_ms: 500
/// cache:
///   hash_method: timestamp
///   on_corruption: fail
/// tools:
///   commands:
///     matlab: "matlab -nodesktop -nosplash"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub executor: ExecutorOptions,
    #[serde(default)]
    pub cache: CacheOptions,
    #[serde(default)]
    pub tools: ToolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            executor: ExecutorOptions::default(),
            cache: CacheOptions::default(),
            tools: ToolConfig::default(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DIR)
}

/// Scheduler options.
///
/// # Fields
/// * `max_workers` - Maximum number of node instances executing at once (defaults to CPU count)
/// * `timeout_seconds` - Wall-clock limit for a single invocation (optional, no limit by default)
/// * `failure_strategy` - Whether unrelated branches keep running after a failure
/// * `retry` - Retry policy applied to every node without its own override
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorOptions {
    pub max_workers: Option<usize>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ExecutorOptions {
    pub fn max_workers(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(FALLBACK_MAX_WORKERS)
            })
            .max(1)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

/// How often a failing node is re-invoked and how long to wait in between.
///
/// `max_attempts` counts the first invocation, so `1` means no retries. The delay before
/// attempt `n` (n >= 2) is `backoff_ms * multiplier^(n - 2)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: 0,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ms: backoff.as_millis() as u64,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.backoff_ms == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(0.0).powi(attempt as i32 - 2);
        Duration::from_millis((self.backoff_ms as f64 * factor) as u64)
    }
}

/// How file inputs are fingerprinted for cache keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashMethod {
    /// File size and modification time.
    #[default]
    Timestamp,
    /// SHA-256 of the file contents.
    Content,
}

/// What to do when a completed working directory is missing recorded outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionPolicy {
    #[default]
    Fail,
    Rerun,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheOptions {
    #[serde(default)]
    pub hash_method: HashMethod,
    #[serde(default)]
    pub on_corruption: CorruptionPolicy,
    /// Ignore every cache record and execute all nodes again.
    #[serde(default)]
    pub force_rerun: bool,
}

/// Explicit configuration of the external tools operations launch.
///
/// Commands map a logical tool name (as used by `CommandOperation`) to the command line
/// that starts it; `env` is added to the environment of every launched tool.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ToolConfig {
    pub fn with_command(mut self, tool: &str, command_line: &str) -> Self {
        self.commands.insert(tool.to_string(), command_line.to_string());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Program and leading arguments for a tool. Unconfigured tools run under their own name.
    pub fn resolve(&self, tool: &str) -> Vec<String> {
        match self.commands.get(tool) {
            Some(command_line) => command_line.split_whitespace().map(str::to_string).collect(),
            None => vec![tool.to_string()],
        }
    }
}

/// Load a config from a YAML or TOML file, chosen by extension
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
        "toml" => Ok(toml::from_str(&content)?),
        _ => Err(ConfigError::UnsupportedFormat { extension }),
    }
}

/// Load a config and reject values the engine cannot work with.
pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let cfg = load_config(path)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn validate_config(cfg: &EngineConfig) -> Result<(), ConfigError> {
    let mut problems = Vec::new();

    if cfg.executor.max_workers == Some(0) {
        problems.push("executor.max_workers must be at least 1".to_string());
    }
    if cfg.executor.timeout_seconds == Some(0) {
        problems.push("executor.timeout_seconds must be positive".to_string());
    }
    if cfg.executor.retry.max_attempts == 0 {
        problems.push("executor.retry.max_attempts must be at least 1".to_string());
    }
    let multiplier = cfg.executor.retry.multiplier;
    if !multiplier.is_finite() || multiplier < 0.0 {
        problems.push(format!(
            "executor.retry.multiplier must be a non-negative number, got {}",
            multiplier
        ));
    }
    for (tool, command_line) in &cfg.tools.commands {
        if command_line.trim().is_empty() {
            problems.push(format!("tools.commands.{} is empty", tool));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems))
    }
}
