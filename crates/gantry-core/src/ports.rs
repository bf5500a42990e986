//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestration core and the
//! external collaborators it invokes but does not implement.

use crate::Result;
use crate::artifact::{ArchiveFile, Release, ReleaseAsset};
use crate::ids::JobInstanceId;
use crate::run::AxisAssignment;
use crate::workflow::ActionSpec;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A single invocation of an external action on behalf of one step.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRequest {
    pub workflow: String,
    pub job_name: String,
    pub instance_id: JobInstanceId,
    pub instance_name: String,
    pub step_name: String,
    pub platform: String,
    pub matrix: AxisAssignment,
    /// Ref of the triggering event.
    pub event_ref: String,
    /// Action with parameters already interpolated for this instance.
    pub action: ActionSpec,
    pub workspace: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// What an action reported back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl ActionOutcome {
    pub fn success(duration_ms: u64) -> Self {
        Self {
            success: true,
            exit_code: 0,
            duration_ms,
            message: None,
        }
    }

    pub fn failure(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            duration_ms: 0,
            message: Some(message.into()),
        }
    }
}

/// Invoker for external collaborators (installers, test runners, packagers).
///
/// An `Err` and an outcome with `success == false` are both step failures.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutcome>;
}

/// Shared, append-only release storage.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Attach an archive to the release for `tag`, creating the release if needed.
    async fn attach(&self, tag: &str, archive: &ArchiveFile) -> Result<ReleaseAsset>;

    /// Get a release by tag.
    async fn get(&self, tag: &str) -> Result<Option<Release>>;

    /// List all releases.
    async fn list(&self) -> Result<Vec<Release>>;
}
