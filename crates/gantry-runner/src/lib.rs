//! Action invocation for Gantry.
//!
//! Steps name an action and a parameter set; the [`ActionRegistry`] maps
//! action names to implementations and is the orchestrator's invoker.

pub mod runner;
pub mod shell;

pub use runner::{Action, ActionRegistry, OutputLine, OutputStream, RunnerConfig};
pub use shell::ShellAction;
