//! Filesystem scanning helpers for graph builds and work-queue enumeration.

use std::path::{Component, Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::warn;
use walkdir::WalkDir;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::QueueEntry;

const SOURCE_EXTENSION: &str = "py";

const IMPLICIT_IGNORED_DIRS: &[&str] = &[".git", "__pycache__", ".venv", ".pipewright"];

/// Per-directory ignore file honoured by work-queue enumeration, on top of `.gitignore`.
pub const IGNORE_FILE_NAME: &str = ".pipewrightignore";

pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(SOURCE_EXTENSION))
        .unwrap_or(false)
}

/// Convert a relative file path to a dotted module name.
///
/// Strips the extension and joins normal path components with dots.
pub fn to_module_name(path: &Path) -> String {
    let without_ext = path.with_extension("");
    let parts: Vec<String> = without_ext
        .components()
        .filter_map(|c| match c {
            Component::Normal(os) => Some(os.to_string_lossy().into_owned()),
            _ => None,
        })
        .filter(|s| !s.is_empty() && s != ".")
        .collect();
    parts.join(".")
}

/// Module name of `file` relative to the build `root`: the file stem for a
/// single-file root, the dotted relative path for a directory root.
pub fn module_name_for(root: &Path, file: &Path) -> String {
    if root.is_file() || root == file {
        return file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    let relative = file.strip_prefix(root).unwrap_or(file);
    to_module_name(relative)
}

/// All source files under `root`, recursively, in file-name order.
///
/// A file root yields itself. Implicitly ignored directories (`.git`,
/// `__pycache__`, virtualenvs) are pruned.
pub fn iter_source_files(root: &Path) -> PipelineResult<Vec<PathBuf>> {
    if !root.exists() {
        return Err(PipelineError::MissingInput(root.to_path_buf()));
    }
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry.depth() > 0
                && IMPLICIT_IGNORED_DIRS
                    .iter()
                    .any(|d| entry.file_name().to_string_lossy() == *d))
        });
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };
        if entry.file_type().is_file() && is_source_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Build the initial work queue: every matching source file under `input`
/// paired with its mirrored path under `output`.
///
/// Directory inputs honour `.gitignore`, [`IGNORE_FILE_NAME`], and the given
/// gitignore-style `exclude_patterns`. Without `recursive` only direct
/// children of `input` are considered.
pub fn enumerate_queue_entries(
    input: &Path,
    output: &Path,
    recursive: bool,
    exclude_patterns: &[String],
) -> PipelineResult<Vec<QueueEntry>> {
    if input.is_file() {
        let file_name = input
            .file_name()
            .ok_or_else(|| PipelineError::MissingInput(input.to_path_buf()))?;
        return Ok(vec![QueueEntry::new(input, output.join(file_name))]);
    }
    if !input.is_dir() {
        return Err(PipelineError::MissingInput(input.to_path_buf()));
    }

    let mut overrides = OverrideBuilder::new(input);
    for pattern in exclude_patterns {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            continue;
        }
        overrides
            .add(&format!("!{trimmed}"))
            .map_err(|e| PipelineError::Config(format!("invalid exclude pattern {trimmed:?}: {e}")))?;
    }
    let overrides = overrides
        .build()
        .map_err(|e| PipelineError::Config(format!("invalid exclude patterns: {e}")))?;

    let walker = WalkBuilder::new(input)
        .max_depth(if recursive { None } else { Some(1) })
        .require_git(false)
        .add_custom_ignore_filename(IGNORE_FILE_NAME)
        .overrides(overrides)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut entries = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping entry while enumerating {}: {e}", input.display());
                continue;
            }
        };
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file || !is_source_file(entry.path()) {
            continue;
        }
        let relative = entry.path().strip_prefix(input).unwrap_or(entry.path());
        entries.push(QueueEntry::new(entry.path(), output.join(relative)));
    }
    Ok(entries)
}

/// SHA-256 hex digest of a file's bytes.
pub fn compute_content_hash(path: &Path) -> PipelineResult<String> {
    let data = std::fs::read(path)?;
    Ok(hash_bytes(&data))
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
