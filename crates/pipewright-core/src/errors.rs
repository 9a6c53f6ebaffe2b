//! Error types for the pipewright core library.

use std::path::PathBuf;

use crate::models::PipelineState;

/// Error returned by a stage handler. Handlers are external capabilities, so
/// their failures are carried as opaque boxed errors.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error enum for the pipewright core library.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Transition {from} -> {to} rejected by scoring gate in round {round} (score {score})")]
    GateRejected {
        from: PipelineState,
        to: PipelineState,
        round: u32,
        score: f64,
    },

    #[error("Stage handler for {state} failed on {symbol}: {message}")]
    Handler {
        state: PipelineState,
        symbol: String,
        message: String,
    },

    #[error("Input path not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// True for failures that abandon the current file's rounds but leave the
    /// rest of the work queue runnable.
    pub fn is_round_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::GateRejected { .. } | PipelineError::Handler { .. }
        )
    }

    /// Short tag stored in `ErrorLog.error_type`.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Parse { .. } => "ParseError",
            PipelineError::GateRejected { .. } => "GateRejected",
            PipelineError::Handler { .. } => "StageHandlerError",
            PipelineError::MissingInput(_) => "MissingInput",
            PipelineError::Config(_) => "ConfigError",
            PipelineError::Io(_) => "IoError",
            PipelineError::Sqlite(_) => "SqliteError",
            PipelineError::Json(_) => "JsonError",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_fatal_classification() {
        let gate = PipelineError::GateRejected {
            from: PipelineState::Generate,
            to: PipelineState::Analyze,
            round: 2,
            score: -0.1,
        };
        assert!(gate.is_round_fatal());
        assert_eq!(gate.kind(), "GateRejected");

        let io = PipelineError::Io(std::io::Error::other("disk gone"));
        assert!(!io.is_round_fatal());
    }

    #[test]
    fn test_gate_rejection_message_names_states() {
        let err = PipelineError::GateRejected {
            from: PipelineState::Start,
            to: PipelineState::Generate,
            round: 1,
            score: -0.5,
        };
        let message = err.to_string();
        assert!(message.contains("START -> GENERATE"));
        assert!(message.contains("-0.5"));
    }
}
