//! # Configuration Module
//!
//! Process-wide settings for asynchronous processing, loaded once at startup
//! and turned into the [`AsyncDefaults`] every [`AsyncManager`](crate::AsyncManager)
//! is built from.
//!
//! ## Sources
//!
//! - [`AsyncConfig::from_env`] reads `WEBASYNC_*` environment variables
//! - [`AsyncConfig::load`] / [`AsyncConfig::from_yaml_str`] read YAML
//!
//! Missing keys fall back to their defaults.
//!
//! ## Environment Variables
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `WEBASYNC_DEFAULT_TIMEOUT_MS` | request timeout when the task or slot sets none | unset |
//! | `WEBASYNC_EXECUTOR` | `coroutine`, `worker_pool` or `inline` | `coroutine` |
//! | `WEBASYNC_STACK_SIZE` | coroutine stack size, decimal or `0x` hex | `0x10000` |
//! | `WEBASYNC_CONCURRENCY_LIMIT` | max running coroutine tasks | unlimited |
//! | `WEBASYNC_DISCONNECT_PHRASES` | comma-separated extra disconnect phrases | none |
//!
//! Worker pool variables are documented on [`WorkerPoolConfig`].
//!
//! ## Example
//!
//! ```yaml
//! default_timeout_ms: 30000
//! executor: worker_pool
//! worker_pool:
//!   num_workers: 8
//!   queue_bound: 256
//!   backpressure_mode: shed
//! disconnect_phrases:
//!   - "stream closed"
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::disconnect::DisconnectedClientDetector;
use crate::executor::{
    CoroutineExecutor, CoroutineExecutorConfig, InlineExecutor, TaskExecutor, WorkerPoolConfig,
    WorkerPoolExecutor,
};
use crate::manager::AsyncDefaults;

/// Which executor runs callable tasks by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    #[default]
    Coroutine,
    WorkerPool,
    Inline,
}

impl ExecutorKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "coroutine" => Some(Self::Coroutine),
            "worker_pool" | "pool" => Some(Self::WorkerPool),
            "inline" => Some(Self::Inline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncConfig {
    pub default_timeout_ms: Option<u64>,
    pub executor: ExecutorKind,
    pub coroutine: CoroutineExecutorConfig,
    pub worker_pool: WorkerPoolConfig,
    /// Extra message phrases that identify a disconnected client
    pub disconnect_phrases: Vec<String>,
}

impl AsyncConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_timeout_ms = std::env::var("WEBASYNC_DEFAULT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok());

        let executor = std::env::var("WEBASYNC_EXECUTOR")
            .ok()
            .and_then(|s| ExecutorKind::parse(&s))
            .unwrap_or_default();

        let mut coroutine = defaults.coroutine;
        if let Some(stack_size) = std::env::var("WEBASYNC_STACK_SIZE")
            .ok()
            .and_then(|s| parse_stack_size(&s))
        {
            coroutine.stack_size = stack_size;
        }
        coroutine.concurrency_limit = std::env::var("WEBASYNC_CONCURRENCY_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok());

        let disconnect_phrases = std::env::var("WEBASYNC_DISCONNECT_PHRASES")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            default_timeout_ms,
            executor,
            coroutine,
            worker_pool: WorkerPoolConfig::from_env(),
            disconnect_phrases,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse async configuration YAML")
    }

    /// Load a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize async configuration")
    }

    /// Instantiate the configured default executor.
    ///
    /// A worker pool spawns its workers here, so call this once per process.
    #[must_use]
    pub fn build_executor(&self) -> Arc<dyn TaskExecutor> {
        match self.executor {
            ExecutorKind::Coroutine => Arc::new(CoroutineExecutor::new(self.coroutine.clone())),
            ExecutorKind::WorkerPool => Arc::new(WorkerPoolExecutor::new(
                "webasync-pool",
                self.worker_pool.clone(),
            )),
            ExecutorKind::Inline => Arc::new(InlineExecutor),
        }
    }

    #[must_use]
    pub fn build_defaults(&self) -> AsyncDefaults {
        AsyncDefaults {
            executor: self.build_executor(),
            default_timeout_ms: self.default_timeout_ms,
            disconnect_detector: Arc::new(
                DisconnectedClientDetector::new().with_phrases(self.disconnect_phrases.iter().cloned()),
            ),
            ..AsyncDefaults::default()
        }
    }
}

/// Parse a stack size given in decimal or `0x` hex.
pub fn parse_stack_size(value: &str) -> Option<usize> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
