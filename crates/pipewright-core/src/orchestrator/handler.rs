//! Stage handlers and their per-state registry.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::errors::{HandlerError, PipelineError, PipelineResult};
use crate::models::{PipelineState, RoundResult};

/// Round-scoped metadata passed to a stage handler.
#[derive(Clone, Debug, PartialEq)]
pub struct StageContext {
    pub symbol: String,
    /// Source file of the queue entry.
    pub file_path: PathBuf,
    /// Where post-processed output is written.
    pub output_path: PathBuf,
    pub experiment_id: String,
    pub run_id: String,
    pub round: u32,
    pub system: String,
    pub state: PipelineState,
}

/// External capability invoked once per pipeline state. Handlers see the
/// context read-only; every effect flows back through the returned result.
pub trait StageHandler: Send + Sync {
    fn run(&self, context: &StageContext) -> Result<RoundResult, HandlerError>;
}

impl<F> StageHandler for F
where
    F: Fn(&StageContext) -> Result<RoundResult, HandlerError> + Send + Sync,
{
    fn run(&self, context: &StageContext) -> Result<RoundResult, HandlerError> {
        self(context)
    }
}

/// Handlers bound to stage states. Unbound stages pass through.
#[derive(Default)]
pub struct StageRegistry {
    handlers: BTreeMap<PipelineState, Box<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `state`, replacing any earlier binding.
    pub fn bind(
        &mut self,
        state: PipelineState,
        handler: impl StageHandler + 'static,
    ) -> PipelineResult<()> {
        if !state.is_stage() {
            return Err(PipelineError::Config(format!(
                "cannot bind a stage handler to {state}"
            )));
        }
        self.handlers.insert(state, Box::new(handler));
        Ok(())
    }

    pub fn with(mut self, state: PipelineState, handler: impl StageHandler + 'static) -> PipelineResult<Self> {
        self.bind(state, handler)?;
        Ok(self)
    }

    pub fn get(&self, state: PipelineState) -> Option<&dyn StageHandler> {
        self.handlers.get(&state).map(|h| h.as_ref())
    }

    pub fn is_bound(&self, state: PipelineState) -> bool {
        self.handlers.contains_key(&state)
    }

    /// Bound states in pipeline order.
    pub fn bound_states(&self) -> Vec<PipelineState> {
        self.handlers.keys().copied().collect()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("bound", &self.bound_states())
            .finish()
    }
}
