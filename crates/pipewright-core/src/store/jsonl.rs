//! Append-only JSON Lines sink, one file per record kind.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::errors::PipelineResult;
use crate::models::{LogKind, LogRecord};
use crate::store::LogSink;

/// Writes `<dir>/<kind>.jsonl`, e.g. `state_transition.jsonl`.
#[derive(Debug)]
pub struct JsonlLogSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> PipelineResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: LogKind) -> PathBuf {
        self.dir.join(format!("{}.jsonl", kind.as_str()))
    }

    /// Read back every record of `kind`. Missing files read as empty.
    pub fn read_kind(&self, kind: LogKind) -> PipelineResult<Vec<LogRecord>> {
        let path = self.path_for(kind);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl LogSink for JsonlLogSink {
    fn record(&self, record: &LogRecord) -> PipelineResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(record.kind()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
