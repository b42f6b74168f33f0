//! Configuration module for the mediagraph runtime
//!
//! Runtime settings are read from a TOML file:
//!
//! ```toml
//! [scheduler]
//! worker_threads = 4
//! buffer_acquire_timeout_ms = 200
//!
//! [node]
//! max_in_scheduling = 1
//! max_batch_size = 4
//! max_input_queue_size = 16
//! ```
//!
//! Missing keys fall back to their defaults, so an empty file is valid.
//!
//! # Config Location
//!
//! Without an explicit path the runner looks in the platform config
//! directory:
//! - **Linux**: `~/.config/mediagraph-rs/mediagraph.toml`
//! - **macOS**: `~/Library/Application Support/mediagraph-rs/mediagraph.toml`
//! - **Windows**: `%APPDATA%\mediagraph-rs\mediagraph.toml`

use crate::error::{GraphError, Result, ResultExt};
use crate::task::context::DEFAULT_MAX_BATCH_SIZE;
use crate::task::options::{NodeOptions, KEY_MAX_BATCH_SIZE, KEY_MAX_IN_SCHEDULING};
use crate::task::stream::DEFAULT_MAX_QUEUE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "mediagraph-rs";

/// Config filename
pub const CONFIG_FILE: &str = "mediagraph.toml";

/// Default number of worker threads
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default wait for a pooled output buffer in milliseconds
pub const DEFAULT_BUFFER_ACQUIRE_TIMEOUT_MS: u64 = 200;

/// Path of the default config file, if the platform has a config directory
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Scheduler ====================

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Threads running scheduling passes and invocations
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// How long a blocking `deque_output_buffer` may wait on a buffer pool
    #[serde(default = "default_buffer_acquire_timeout_ms")]
    pub buffer_acquire_timeout_ms: u64,
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

fn default_buffer_acquire_timeout_ms() -> u64 {
    DEFAULT_BUFFER_ACQUIRE_TIMEOUT_MS
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            buffer_acquire_timeout_ms: DEFAULT_BUFFER_ACQUIRE_TIMEOUT_MS,
        }
    }
}

impl SchedulerSettings {
    pub fn buffer_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_acquire_timeout_ms)
    }
}

// ==================== Node Defaults ====================

/// Defaults applied to every node unless its options override them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    #[serde(default = "default_max_in_scheduling")]
    pub max_in_scheduling: usize,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_max_input_queue_size")]
    pub max_input_queue_size: usize,
}

fn default_max_in_scheduling() -> usize {
    1
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_max_input_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            max_in_scheduling: default_max_in_scheduling(),
            max_batch_size: default_max_batch_size(),
            max_input_queue_size: default_max_input_queue_size(),
        }
    }
}

impl NodeSettings {
    /// Options blob carrying these defaults, ready for `prepare_for_run`.
    pub fn to_options(&self) -> NodeOptions {
        NodeOptions::new()
            .with(KEY_MAX_IN_SCHEDULING, self.max_in_scheduling as i64)
            .with(KEY_MAX_BATCH_SIZE, self.max_batch_size as i64)
    }
}

// ==================== Graph Config ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub node: NodeSettings,
}

impl GraphConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(GraphError::from)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: GraphConfig = toml::from_str(&content)
            .map_err(GraphError::from)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default config: {}", e);
                Self::default()
            }
        }
    }

    /// Save the config as TOML, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(GraphError::from)
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(GraphError::from)
            .with_context(|| format!("Failed to write config file {:?}", path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.worker_threads < 1 {
            return Err(GraphError::Config(
                "scheduler.worker_threads must be >= 1".to_string(),
            ));
        }
        if self.node.max_in_scheduling < 1 {
            return Err(GraphError::Config(
                "node.max_in_scheduling must be >= 1".to_string(),
            ));
        }
        if self.node.max_batch_size < 1 {
            return Err(GraphError::Config(
                "node.max_batch_size must be >= 1".to_string(),
            ));
        }
        if self.node.max_input_queue_size < 1 {
            return Err(GraphError::Config(
                "node.max_input_queue_size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.scheduler.worker_threads, DEFAULT_WORKER_THREADS);
        assert_eq!(config.node.max_in_scheduling, 1);
        assert_eq!(config.node.max_batch_size, 4);
        assert_eq!(config.node.max_input_queue_size, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: GraphConfig = toml::from_str("[scheduler]\nworker_threads = 2\n").unwrap();
        assert_eq!(config.scheduler.worker_threads, 2);
        assert_eq!(
            config.scheduler.buffer_acquire_timeout_ms,
            DEFAULT_BUFFER_ACQUIRE_TIMEOUT_MS
        );
        assert_eq!(config.node, NodeSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = GraphConfig::default();
        config.scheduler.worker_threads = 8;
        config.node.max_in_scheduling = 3;
        config.save(&path).unwrap();

        let loaded = GraphConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[node]\nmax_in_scheduling = 0\n").unwrap();

        let err = GraphConfig::load(&path).unwrap_err();
        assert!(matches!(err, GraphError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let dir = TempDir::new().unwrap();
        let err = GraphConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
        assert!(GraphConfig::load_or_default(dir.path().join("absent.toml")) == GraphConfig::default());
    }

    #[test]
    fn test_node_settings_to_options() {
        let opts = NodeSettings {
            max_in_scheduling: 2,
            max_batch_size: 8,
            max_input_queue_size: 16,
        }
        .to_options();
        assert_eq!(opts.get_int(KEY_MAX_IN_SCHEDULING), Some(2));
        assert_eq!(opts.get_int(KEY_MAX_BATCH_SIZE), Some(8));
    }
}
