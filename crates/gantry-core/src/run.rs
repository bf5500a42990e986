//! Job instances and run reports.

use crate::event::Event;
use crate::ids::{JobInstanceId, RunId};
use crate::workflow::StepSpec;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// One value per declared axis, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AxisAssignment(Vec<(String, String)>);

impl AxisAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((axis.into(), value.into()));
        self
    }

    pub fn get(&self, axis: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for AxisAssignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (axis, value) in &self.0 {
            map.serialize_entry(axis, value)?;
        }
        map.end()
    }
}

/// One concrete execution of a job bound to one axis assignment.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub workflow: String,
    pub job_name: String,
    pub index: usize,
    pub platform: String,
    pub axis_assignment: AxisAssignment,
    pub steps: Arc<[StepSpec]>,
}

impl JobInstance {
    pub fn display_name(&self) -> String {
        if self.axis_assignment.is_empty() {
            return self.job_name.clone();
        }
        let parts: Vec<String> = self
            .axis_assignment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{} ({})", self.job_name, parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Succeeded,
    Failed,
    SkippedByTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    SkippedByGate,
    Failed,
    NotRun,
}

impl StepStatus {
    /// Whether later steps of the instance may still run.
    pub fn allows_continuation(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::SkippedByGate)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub action: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl StepReport {
    pub fn new(name: impl Into<String>, action: impl Into<String>, status: StepStatus) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            status,
            exit_code: None,
            message: None,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStage {
    Package,
    Compress,
    Upload,
    Publish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    SkippedByGate,
    Failed,
    NotRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: PromotionStage,
    pub status: StageStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PromotionReport {
    pub artifact: Option<String>,
    pub archive: Option<String>,
    pub release_tag: Option<String>,
    pub stages: Vec<StageReport>,
}

impl PromotionReport {
    pub fn stage(&self, stage: PromotionStage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn status_of(&self, stage: PromotionStage) -> Option<StageStatus> {
        self.stage(stage).map(|s| s.status)
    }

    pub fn failed(&self) -> bool {
        self.stages.iter().any(|s| s.status == StageStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub instance_id: JobInstanceId,
    pub workflow: String,
    pub job_name: String,
    pub index: usize,
    pub display_name: String,
    pub axis_assignment: AxisAssignment,
    pub status: InstanceStatus,
    pub steps: Vec<StepReport>,
    pub promotion: Option<PromotionReport>,
    /// Instance-level failure outside any step, such as workspace setup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl InstanceReport {
    /// Report for an instance that never ran because its workflow did not match.
    pub fn skipped(instance: &JobInstance) -> Self {
        Self {
            instance_id: instance.id,
            workflow: instance.workflow.clone(),
            job_name: instance.job_name.clone(),
            index: instance.index,
            display_name: instance.display_name(),
            axis_assignment: instance.axis_assignment.clone(),
            status: InstanceStatus::SkippedByTrigger,
            steps: Vec::new(),
            promotion: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: 0,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub name: String,
    pub matched: bool,
    pub matched_by: Option<String>,
    pub instances: Vec<InstanceReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub event: Event,
    pub workflows: Vec<WorkflowReport>,
}

impl RunReport {
    pub fn instances(&self) -> impl Iterator<Item = &InstanceReport> {
        self.workflows.iter().flat_map(|w| w.instances.iter())
    }

    pub fn count(&self, status: InstanceStatus) -> usize {
        self.instances().filter(|i| i.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(InstanceStatus::Failed) > 0
    }

    pub fn workflow(&self, name: &str) -> Option<&WorkflowReport> {
        self.workflows.iter().find(|w| w.name == name)
    }
}
