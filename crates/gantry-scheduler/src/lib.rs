//! Run orchestration for Gantry.
//!
//! Resolves which workflows an event activates, expands job matrices into
//! instances, evaluates step gates and drives each instance to completion.

pub mod gates;
pub mod matrix;
pub mod scheduler;
pub mod triggers;

pub use gates::{GateEvaluator, GatePlan};
pub use matrix::MatrixExpander;
pub use scheduler::{Orchestrator, OrchestratorConfig};
pub use triggers::{ResolvedWorkflow, TriggerResolver};
