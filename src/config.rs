//! Pipeline configuration.
//!
//! Every field has a serde default so a partial JSON file (or none at all)
//! yields a usable configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default text polling rate in milliseconds.
fn default_poll_interval_ms() -> u64 {
    100
}

/// Default settle time before a burst of edits triggers a regeneration.
fn default_debounce_ms() -> u64 {
    1000
}

/// Default rate at which in-flight workers are checked for completion.
fn default_worker_poll_interval_ms() -> u64 {
    100
}

/// Linear tessellation tolerance, decided from a standard of `1u = 1m`.
fn default_tolerance() -> f64 {
    0.01
}

/// Angular tessellation tolerance in radians.
fn default_angular_tolerance() -> f64 {
    0.01
}

fn default_offload() -> bool {
    true
}

/// Upper bound on Rhai operations per evaluation (stops runaway loops).
fn default_max_operations() -> u64 {
    5_000_000
}

/// Maximum number of script log messages per evaluation.
fn default_max_script_logs() -> u32 {
    100
}

/// Tunables for the regeneration pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    #[serde(default = "default_angular_tolerance")]
    pub angular_tolerance: f64,

    /// Run evaluation + tessellation on a worker thread instead of inline.
    #[serde(default = "default_offload")]
    pub offload: bool,

    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    #[serde(default = "default_max_script_logs")]
    pub max_script_logs: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            tolerance: default_tolerance(),
            angular_tolerance: default_angular_tolerance(),
            offload: default_offload(),
            max_operations: default_max_operations(),
            max_script_logs: default_max_script_logs(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        serde_json::from_str(contents).context("Failed to parse pipeline config")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}
