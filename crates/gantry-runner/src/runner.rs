//! Action trait, configuration and the registry dispatching by action name.

use crate::shell::ShellAction;
use async_trait::async_trait;
use gantry_core::ports::{ActionInvoker, ActionOutcome, ActionRequest};
use gantry_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Output line from an action.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A named external collaborator.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Execute the action, streaming output to the provided channel.
    async fn execute(
        &self,
        request: &ActionRequest,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<ActionOutcome>;
}

/// Configuration for action execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Guard against hung actions. No retries are attempted after it fires.
    pub timeout_seconds: Option<u64>,
    /// Shell program used by the `shell` action.
    pub shell: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: Some(3600), // 1 hour default
            shell: "sh".to_string(),
        }
    }
}

/// Registry of available actions, implementing [`ActionInvoker`].
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in actions.
    pub fn with_builtins(config: RunnerConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ShellAction::new(config)));
        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ActionInvoker for ActionRegistry {
    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        let action = self
            .get(&request.action.name)
            .ok_or_else(|| Error::ActionNotFound(request.action.name.clone()))?;

        let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
        let instance = request.instance_name.clone();
        let step = request.step_name.clone();
        let printer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                match line.stream {
                    OutputStream::Stdout => {
                        info!(instance = %instance, step = %step, line = line.line_number, "{}", line.content)
                    }
                    OutputStream::Stderr => {
                        warn!(instance = %instance, step = %step, line = line.line_number, "{}", line.content)
                    }
                }
            }
        });

        let outcome = action.execute(request, tx).await;
        let _ = printer.await;
        outcome
    }
}
