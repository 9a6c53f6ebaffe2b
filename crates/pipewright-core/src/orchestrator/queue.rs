//! Durable FIFO of pending (source, destination) pairs.
//!
//! On disk the queue is a JSON list of `[source, destination]` string pairs.
//! Every write goes to a sibling temp file that is then renamed over the
//! queue file, so a crash mid-write leaves either the old or the new list.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::QueueEntry;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkQueue {
    path: PathBuf,
    entries: VecDeque<QueueEntry>,
}

fn encode(entries: &VecDeque<QueueEntry>) -> PipelineResult<String> {
    let pairs: Vec<(String, String)> = entries
        .iter()
        .map(|e| {
            (
                e.source_path.to_string_lossy().into_owned(),
                e.destination_path.to_string_lossy().into_owned(),
            )
        })
        .collect();
    Ok(serde_json::to_string_pretty(&pairs)?)
}

fn decode(raw: &str) -> PipelineResult<VecDeque<QueueEntry>> {
    let pairs: Vec<(String, String)> = serde_json::from_str(raw)?;
    Ok(pairs
        .into_iter()
        .map(|(src, dst)| QueueEntry::new(src, dst))
        .collect())
}

impl WorkQueue {
    /// New queue at `path`, persisted immediately.
    pub fn create(path: impl Into<PathBuf>, entries: Vec<QueueEntry>) -> PipelineResult<Self> {
        let queue = Self {
            path: path.into(),
            entries: entries.into(),
        };
        queue.persist()?;
        Ok(queue)
    }

    /// Load the queue file verbatim.
    pub fn load(path: impl Into<PathBuf>) -> PipelineResult<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(PipelineError::MissingInput(path));
        }
        let entries = decode(&fs::read_to_string(&path)?)?;
        debug!("Loaded {} queued entries from {}", entries.len(), path.display());
        Ok(Self { path, entries })
    }

    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Remove the head entry in memory. Call [`Self::persist`] to make it durable.
    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Rewrite the queue file with the entries still pending.
    pub fn persist(&self) -> PipelineResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        fs::write(&tmp, encode(&self.entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Delete the queue file. A missing file is not an error.
    pub fn remove_file(&self) -> PipelineResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<QueueEntry> {
        (0..n)
            .map(|i| QueueEntry::new(format!("in/f{i}.py"), format!("out/f{i}.py")))
            .collect()
    }

    #[test]
    fn test_create_persists_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("pending_queue.json");
        WorkQueue::create(&path, entries(2)).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0][0], "in/f0.py");
        assert_eq!(raw[1][1], "out/f1.py");
        assert!(!dir.path().join("logs").join("pending_queue.json.tmp").exists());
    }

    #[test]
    fn test_pop_is_durable_only_after_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        let mut queue = WorkQueue::create(&path, entries(3)).unwrap();

        let head = queue.pop_front().unwrap();
        assert_eq!(head.symbol(), "f0");
        assert_eq!(WorkQueue::load(&path).unwrap().len(), 3);

        queue.persist().unwrap();
        let reloaded = WorkQueue::load(&path).unwrap();
        let symbols: Vec<_> = reloaded.entries().map(QueueEntry::symbol).collect();
        assert_eq!(symbols, vec!["f1", "f2"]);
    }

    #[test]
    fn test_load_missing_and_remove_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        assert!(matches!(WorkQueue::load(&path), Err(PipelineError::MissingInput(_))));

        let queue = WorkQueue::create(&path, Vec::new()).unwrap();
        assert!(WorkQueue::exists(&path));
        queue.remove_file().unwrap();
        assert!(!WorkQueue::exists(&path));
        queue.remove_file().unwrap();
    }

    #[test]
    fn test_corrupt_queue_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(WorkQueue::load(&path), Err(PipelineError::Json(_))));
    }
}
