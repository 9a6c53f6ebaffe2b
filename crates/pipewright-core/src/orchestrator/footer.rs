//! Metadata footer on generated output files.
//!
//! Output written for a round ends with a comment block identifying the run
//! that produced it. A fresh footer always replaces the previous one so the
//! block never accumulates across rounds.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::PipelineResult;
use crate::models::Timestamp;

pub const FOOTER_MARKER: &str = "# === PIPEWRIGHT METADATA ===";

static FOOTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\n*^# === PIPEWRIGHT METADATA ===[ \t]*$(?:\n#[^\n]*)*\n*\z").unwrap()
});

#[derive(Clone, Debug, PartialEq)]
pub struct FooterMetadata {
    pub system: String,
    pub experiment_id: String,
    pub run_id: String,
    pub file_path: String,
    pub date: Timestamp,
}

impl FooterMetadata {
    fn lines(&self) -> [(&'static str, String); 5] {
        [
            ("system", self.system.clone()),
            ("experiment_id", self.experiment_id.clone()),
            ("run_id", self.run_id.clone()),
            ("file_path", self.file_path.clone()),
            ("date", self.date.to_rfc3339()),
        ]
    }
}

/// `content` without a trailing metadata footer.
pub fn strip_footer(content: &str) -> &str {
    match FOOTER_RE.find(content) {
        Some(m) => &content[..m.start()],
        None => content,
    }
}

/// `content` with any old footer replaced by one built from `meta`.
pub fn apply_footer(content: &str, meta: &FooterMetadata) -> String {
    let body = strip_footer(content).trim_end();
    let mut out = String::with_capacity(body.len() + 256);
    out.push_str(body);
    out.push_str("\n\n");
    out.push_str(FOOTER_MARKER);
    out.push('\n');
    for (key, value) in meta.lines() {
        out.push_str(&format!("# {key}: {value}\n"));
    }
    out
}

/// Apply the footer and write the result to `path`, creating parent dirs.
/// Returns the text written.
pub fn write_with_footer(path: &Path, content: &str, meta: &FooterMetadata) -> PipelineResult<String> {
    let text = apply_footer(content, meta);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &text)?;
    Ok(text)
}
