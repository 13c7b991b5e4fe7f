//! Request queue configuration structures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where fully-durable request records live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "backend")]
pub enum RequestStoreConfig {
    /// In-memory store for development/testing.
    InMemory,
    /// JSON-lines file.
    File {
        /// Path of the file.
        path: PathBuf,
    },
}

/// Request starter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarterConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// How long the selector sleeps when nothing is runnable (ms).
    pub idle_wait_ms: u64,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
    /// Capacity of the selector-to-worker channel.
    pub channel_depth: usize,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            idle_wait_ms: 100,
            thread_stack_size: 2 * 1024 * 1024,
            channel_depth: 16,
        }
    }
}

impl StarterConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the idle wait.
    #[must_use]
    pub const fn with_idle_wait_ms(mut self, idle_wait_ms: u64) -> Self {
        self.idle_wait_ms = idle_wait_ms;
        self
    }

    /// Set the channel depth.
    #[must_use]
    pub const fn with_channel_depth(mut self, channel_depth: usize) -> Self {
        self.channel_depth = channel_depth;
        self
    }

    /// Validate starter values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.idle_wait_ms == 0 {
            return Err("idle_wait_ms must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.channel_depth == 0 {
            return Err("channel_depth must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Node directory holding the completed lists.
    pub node_dir: PathBuf,
    /// Durable request store.
    pub request_store: RequestStoreConfig,
    /// Request starter.
    #[serde(default)]
    pub starter: StarterConfig,
}

impl QueueConfig {
    /// Config with an in-memory store and default starter settings.
    pub fn new(node_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_dir: node_dir.into(),
            request_store: RequestStoreConfig::InMemory,
            starter: StarterConfig::default(),
        }
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        if self.node_dir.as_os_str().is_empty() {
            return Err("node_dir must not be empty".into());
        }
        if let RequestStoreConfig::File { path } = &self.request_store {
            if path.as_os_str().is_empty() {
                return Err("request_store.path must not be empty".into());
            }
        }
        self.starter
            .validate()
            .map_err(|e| format!("starter invalid: {e}"))
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the environment, loading `.env` first if one
    /// exists. Reads `REQUEST_QUEUE_NODE_DIR` (required),
    /// `REQUEST_QUEUE_STORE_PATH`, `REQUEST_QUEUE_WORKERS` and
    /// `REQUEST_QUEUE_IDLE_WAIT_MS`.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let node_dir = std::env::var("REQUEST_QUEUE_NODE_DIR")
            .map_err(|_| "REQUEST_QUEUE_NODE_DIR is not set".to_string())?;
        let mut cfg = Self::new(node_dir);
        if let Ok(path) = std::env::var("REQUEST_QUEUE_STORE_PATH") {
            cfg.request_store = RequestStoreConfig::File { path: path.into() };
        }
        if let Ok(workers) = std::env::var("REQUEST_QUEUE_WORKERS") {
            cfg.starter.worker_count = workers
                .parse()
                .map_err(|e| format!("REQUEST_QUEUE_WORKERS: {e}"))?;
        }
        if let Ok(wait) = std::env::var("REQUEST_QUEUE_IDLE_WAIT_MS") {
            cfg.starter.idle_wait_ms = wait
                .parse()
                .map_err(|e| format!("REQUEST_QUEUE_IDLE_WAIT_MS: {e}"))?;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
