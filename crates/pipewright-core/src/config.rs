//! Pipeline configuration: JSON file, environment overrides, validation.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields a runnable configuration. Environment variables win over the file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{PipelineError, PipelineResult};

pub const ENV_MAX_ITERATIONS: &str = "PIPEWRIGHT_MAX_ITERATIONS";
pub const ENV_STOP_THRESHOLD: &str = "PIPEWRIGHT_STOP_THRESHOLD";
pub const ENV_RECURSIVE: &str = "PIPEWRIGHT_RECURSIVE";
pub const ENV_EXPERIMENT_ROOT: &str = "PIPEWRIGHT_EXPERIMENT_ROOT";

pub const QUEUE_FILE_NAME: &str = "pending_queue.json";

/// When the shortened work queue is written back to disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDurability {
    /// Persist right after popping, before the file's rounds run. A crash
    /// mid-file loses that file.
    #[default]
    AtMostOnce,
    /// Persist after the file's rounds finish. A crash mid-file re-runs it.
    AtLeastOnce,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub experiment_id: String,
    pub run_id: String,
    pub system: String,
    pub description: String,
    pub max_iterations: u32,
    pub stop_threshold: f64,
    pub recursive: bool,
    pub exclude_patterns: Vec<String>,
    pub experiment_root: PathBuf,
    pub queue_path: Option<PathBuf>,
    pub durability: QueueDurability,
    pub halt_on_handler_error: bool,
    pub max_files_per_run: Option<usize>,
    pub pass_threshold: f64,
    pub graph_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            experiment_id: "exp".to_string(),
            run_id: "run-1".to_string(),
            system: "Preprocessing".to_string(),
            description: String::new(),
            max_iterations: 3,
            stop_threshold: 1.0,
            recursive: false,
            exclude_patterns: Vec::new(),
            experiment_root: PathBuf::from("experiments"),
            queue_path: None,
            durability: QueueDurability::AtMostOnce,
            halt_on_handler_error: false,
            max_files_per_run: None,
            pass_threshold: 0.95,
            graph_workers: crate::indexer::pipeline::DEFAULT_GRAPH_WORKERS,
        }
    }
}

// ---------------------------------------------------------------------------
// Helper: env parsing
// ---------------------------------------------------------------------------

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

impl PipelineConfig {
    pub fn from_json_str(raw: &str) -> PipelineResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput(path.to_path_buf()));
        }
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Overlay `PIPEWRIGHT_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`. Unparsable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            match raw.trim().parse::<u32>() {
                Ok(v) => self.max_iterations = v,
                Err(_) => warn!("Ignoring {ENV_MAX_ITERATIONS}={raw:?}: not an integer"),
            }
        }
        if let Some(raw) = lookup(ENV_STOP_THRESHOLD) {
            match raw.trim().parse::<f64>() {
                Ok(v) => self.stop_threshold = v,
                Err(_) => warn!("Ignoring {ENV_STOP_THRESHOLD}={raw:?}: not a number"),
            }
        }
        if let Some(raw) = lookup(ENV_RECURSIVE) {
            match parse_flag(&raw) {
                Some(v) => self.recursive = v,
                None => warn!("Ignoring {ENV_RECURSIVE}={raw:?}: not a boolean"),
            }
        }
        if let Some(raw) = lookup(ENV_EXPERIMENT_ROOT) {
            if raw.trim().is_empty() {
                warn!("Ignoring empty {ENV_EXPERIMENT_ROOT}");
            } else {
                self.experiment_root = expand_tilde(raw.trim());
            }
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.max_iterations < 1 {
            return Err(PipelineError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !self.stop_threshold.is_finite() {
            return Err(PipelineError::Config(format!(
                "stop_threshold must be finite, got {}",
                self.stop_threshold
            )));
        }
        if !self.pass_threshold.is_finite() {
            return Err(PipelineError::Config(format!(
                "pass_threshold must be finite, got {}",
                self.pass_threshold
            )));
        }
        if self.experiment_id.trim().is_empty() || self.run_id.trim().is_empty() {
            return Err(PipelineError::Config(
                "experiment_id and run_id must be non-empty".to_string(),
            ));
        }
        if self.max_files_per_run == Some(0) {
            return Err(PipelineError::Config(
                "max_files_per_run must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// `<experiment_root>/<experiment_id>/<run_id>`
    pub fn run_dir(&self) -> PathBuf {
        self.experiment_root
            .join(&self.experiment_id)
            .join(&self.run_id)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.run_dir().join("logs")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.run_dir().join("snapshots")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.queue_path
            .clone()
            .unwrap_or_else(|| self.log_dir().join(QUEUE_FILE_NAME))
    }
}
