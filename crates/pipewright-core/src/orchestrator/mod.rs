pub mod evaluator;
pub mod footer;
pub mod gate;
pub mod handler;
pub mod queue;
pub mod runner;
pub mod snapshot;
pub mod state_machine;
