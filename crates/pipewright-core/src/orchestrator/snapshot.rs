//! On-disk snapshots of each round's output next to the original source.
//!
//! Layout under the snapshot root:
//!
//! ```text
//! round_<n>/<symbol>/{original.py, annotated.py, metadata.json}
//! final/<symbol>/{original.py, annotated.py, metadata.json}
//! ```
//!
//! A later write to the same round and symbol replaces the earlier one.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::PipelineResult;
use crate::models::{PipelineState, Timestamp};
use crate::orchestrator::evaluator::Evaluation;

pub const ORIGINAL_FILE: &str = "original.py";
pub const ANNOTATED_FILE: &str = "annotated.py";
pub const METADATA_FILE: &str = "metadata.json";
pub const FINAL_DIR: &str = "final";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub experiment_id: String,
    pub run_id: String,
    pub round: u32,
    pub state: PipelineState,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub timestamp: Timestamp,
    /// Evaluator output for the annotated code, when an evaluator ran.
    pub evaluation: Option<Evaluation>,
}

#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a snapshot with this metadata lands in.
    pub fn dir_for(&self, meta: &SnapshotMetadata, symbol: &str) -> PathBuf {
        let bucket = if meta.is_final {
            FINAL_DIR.to_string()
        } else {
            format!("round_{}", meta.round)
        };
        self.root.join(bucket).join(symbol)
    }

    /// Write one snapshot and return its directory.
    pub fn write(
        &self,
        symbol: &str,
        original: &str,
        annotated: &str,
        meta: &SnapshotMetadata,
    ) -> PipelineResult<PathBuf> {
        let dir = self.dir_for(meta, symbol);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(ORIGINAL_FILE), original)?;
        fs::write(dir.join(ANNOTATED_FILE), annotated)?;
        fs::write(dir.join(METADATA_FILE), serde_json::to_string_pretty(meta)?)?;
        debug!("Snapshot for {} written to {}", symbol, dir.display());
        Ok(dir)
    }

    pub fn read_metadata(dir: &Path) -> PipelineResult<SnapshotMetadata> {
        let raw = fs::read_to_string(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }
}
