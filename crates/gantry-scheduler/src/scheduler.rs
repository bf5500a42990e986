//! Run orchestration.
//!
//! One run handles one event: matched workflows are expanded into job
//! instances, and every instance runs as an independent task with its own
//! workspace. Steps inside an instance run strictly in order and stop at the
//! first failure; sibling instances are never affected.

use crate::gates::{GateEvaluator, GatePlan};
use crate::matrix::MatrixExpander;
use crate::triggers::TriggerResolver;
use chrono::Utc;
use gantry_core::Result;
use gantry_core::event::Event;
use gantry_core::ids::RunId;
use gantry_core::interpolation::InterpolationContext;
use gantry_core::ports::{ActionInvoker, ActionRequest, ReleaseStore};
use gantry_core::run::{
    InstanceReport, InstanceStatus, JobInstance, RunReport, StepReport, StepStatus, WorkflowReport,
};
use gantry_core::workflow::{PromotionSpec, StepSpec, WorkflowDefinition};
use gantry_promote::{PromotionPipeline, PromotionRequest, sanitize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root of the per-run instance workspaces.
    pub work_dir: PathBuf,
    /// Upper bound on concurrently running instances. `None` is unbounded.
    pub max_parallel: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(".gantry/work"),
            max_parallel: None,
        }
    }
}

pub struct Orchestrator {
    invoker: Arc<dyn ActionInvoker>,
    promoter: Arc<PromotionPipeline>,
    config: OrchestratorConfig,
    resolver: TriggerResolver,
    expander: MatrixExpander,
    gates: GateEvaluator,
}

impl Orchestrator {
    pub fn new(
        invoker: Arc<dyn ActionInvoker>,
        releases: Arc<dyn ReleaseStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let promoter = PromotionPipeline::new(releases).with_invoker(invoker.clone());
        Self {
            invoker,
            promoter: Arc::new(promoter),
            config,
            resolver: TriggerResolver::new(),
            expander: MatrixExpander::new(),
            gates: GateEvaluator::new(),
        }
    }

    /// Handle one event against a set of workflow definitions.
    ///
    /// Only malformed input is an error. Trigger mismatches, gated skips and
    /// instance failures are all reported in the returned [`RunReport`].
    pub async fn run(&self, event: &Event, workflows: &[WorkflowDefinition]) -> Result<RunReport> {
        event.validate()?;
        for workflow in workflows {
            workflow.validate()?;
        }

        let run_id = RunId::new();
        info!(
            run_id = %run_id,
            event_type = %event.event_type(),
            git_ref = %event.git_ref(),
            workflows = workflows.len(),
            "Starting run"
        );

        let shared_event = Arc::new(event.clone());
        let limiter = self
            .config
            .max_parallel
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        let mut join_set = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, (usize, InstanceReport)> = HashMap::new();
        let mut workflow_reports = Vec::with_capacity(workflows.len());

        for (position, workflow) in workflows.iter().enumerate() {
            let resolved = self.resolver.matches(workflow, event);
            let mut report = WorkflowReport {
                name: workflow.name.clone(),
                matched: resolved.is_some(),
                matched_by: resolved.as_ref().map(|r| r.matched_by.to_string()),
                instances: Vec::new(),
            };

            let Some(resolved) = resolved else {
                for (job_name, job) in &workflow.jobs {
                    for instance in self.expander.expand(&workflow.name, job_name, job) {
                        report.instances.push(InstanceReport::skipped(&instance));
                    }
                }
                workflow_reports.push(report);
                continue;
            };

            info!(workflow = %workflow.name, trigger = %resolved.matched_by, "Workflow matched");
            let env = Arc::new(workflow.env.clone());
            let inputs = Arc::new(resolved.inputs);

            for (job_name, job) in &workflow.jobs {
                let plan = Arc::new(self.gates.plan(job, event));
                let promotion = job.promotion.clone().map(Arc::new);
                let instances = self.expander.expand(&workflow.name, job_name, job);
                info!(
                    workflow = %workflow.name,
                    job = %job_name,
                    instances = instances.len(),
                    "Expanded job matrix"
                );

                for instance in instances {
                    let slot = format!("{}-{}", sanitize(job_name), instance.index);
                    let base = self
                        .config
                        .work_dir
                        .join(run_id.to_string())
                        .join(sanitize(&workflow.name));

                    let mut fallback = InstanceReport::skipped(&instance);
                    fallback.status = InstanceStatus::Failed;

                    let task = InstanceTask {
                        instance,
                        plan: plan.clone(),
                        promotion: promotion.clone(),
                        event: shared_event.clone(),
                        env: env.clone(),
                        inputs: inputs.clone(),
                        workspace: base.join(&slot),
                        archive_dir: base.join(format!("{}-archives", slot)),
                        invoker: self.invoker.clone(),
                        promoter: self.promoter.clone(),
                        limiter: limiter.clone(),
                    };
                    let handle = join_set.spawn(task.run());
                    pending.insert(handle.id(), (position, fallback));
                }
            }
            workflow_reports.push(report);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((id, instance_report)) => {
                    if let Some((position, _)) = pending.remove(&id) {
                        workflow_reports[position].instances.push(instance_report);
                    }
                }
                Err(e) => {
                    if let Some((position, mut fallback)) = pending.remove(&e.id()) {
                        error!(
                            workflow = %fallback.workflow,
                            instance = %fallback.display_name,
                            error = %e,
                            "Instance task aborted"
                        );
                        fallback.error = Some(e.to_string());
                        workflow_reports[position].instances.push(fallback);
                    }
                }
            }
        }

        for report in &mut workflow_reports {
            report
                .instances
                .sort_by(|a, b| (&a.job_name, a.index).cmp(&(&b.job_name, b.index)));
        }
        workflow_reports.sort_by(|a, b| a.name.cmp(&b.name));

        let report = RunReport {
            run_id,
            event: event.clone(),
            workflows: workflow_reports,
        };
        info!(
            run_id = %run_id,
            succeeded = report.count(InstanceStatus::Succeeded),
            failed = report.count(InstanceStatus::Failed),
            skipped = report.count(InstanceStatus::SkippedByTrigger),
            "Run completed"
        );
        Ok(report)
    }
}

/// Everything one instance needs, owned so it can run on its own task.
struct InstanceTask {
    instance: JobInstance,
    plan: Arc<GatePlan>,
    promotion: Option<Arc<PromotionSpec>>,
    event: Arc<Event>,
    env: Arc<BTreeMap<String, String>>,
    inputs: Arc<BTreeMap<String, String>>,
    workspace: PathBuf,
    archive_dir: PathBuf,
    invoker: Arc<dyn ActionInvoker>,
    promoter: Arc<PromotionPipeline>,
    limiter: Option<Arc<Semaphore>>,
}

impl InstanceTask {
    async fn run(self) -> InstanceReport {
        let _permit = match &self.limiter {
            Some(limiter) => limiter.clone().acquire_owned().await.ok(),
            None => None,
        };

        let instance = &self.instance;
        let display_name = instance.display_name();
        let start = Instant::now();
        let mut report = InstanceReport::skipped(instance);
        report.status = InstanceStatus::Succeeded;
        report.started_at = Some(Utc::now());

        info!(workflow = %instance.workflow, instance = %display_name, "Instance started");

        if let Err(e) = tokio::fs::create_dir_all(&self.workspace).await {
            error!(instance = %display_name, error = %e, "Failed to create workspace");
            report.status = InstanceStatus::Failed;
            report.error = Some(format!("workspace {}: {}", self.workspace.display(), e));
            report.steps = instance
                .steps
                .iter()
                .map(|s| StepReport::new(&s.name, &s.action.name, StepStatus::NotRun))
                .collect();
            report.promotion = self.promotion.as_deref().map(PromotionPipeline::not_run);
            return self.finish(report, start);
        }

        let context = InterpolationContext::for_instance(
            &self.event,
            &instance.axis_assignment,
            &self.env,
            &self.inputs,
        );
        let env = context.interpolate_map(&self.env);

        let mut failed = false;
        for (index, step) in instance.steps.iter().enumerate() {
            if failed {
                report
                    .steps
                    .push(StepReport::new(&step.name, &step.action.name, StepStatus::NotRun));
                continue;
            }
            if !self.plan.step(index) {
                info!(instance = %display_name, step = %step.name, "Step skipped by gate");
                report.steps.push(StepReport::new(
                    &step.name,
                    &step.action.name,
                    StepStatus::SkippedByGate,
                ));
                continue;
            }

            let step_report = self.run_step(step, &context, &env).await;
            failed = !step_report.status.allows_continuation();
            report.steps.push(step_report);
        }

        if let (Some(spec), Some(gates)) = (self.promotion.as_deref(), self.plan.promotion) {
            report.promotion = Some(if failed {
                PromotionPipeline::not_run(spec)
            } else {
                let request = PromotionRequest {
                    instance,
                    spec,
                    gates,
                    event: &self.event,
                    workspace: &self.workspace,
                    archive_dir: &self.archive_dir,
                    context: &context,
                    env: &self.env,
                };
                self.promoter.run(&request).await
            });
        }

        if failed || report.promotion.as_ref().is_some_and(|p| p.failed()) {
            report.status = InstanceStatus::Failed;
        }
        self.finish(report, start)
    }

    async fn run_step(
        &self,
        step: &StepSpec,
        context: &InterpolationContext,
        env: &BTreeMap<String, String>,
    ) -> StepReport {
        let instance = &self.instance;
        let start = Instant::now();

        let mut action = step.action.clone();
        action.params = context.interpolate_map(&step.action.params);

        let request = ActionRequest {
            workflow: instance.workflow.clone(),
            job_name: instance.job_name.clone(),
            instance_id: instance.id,
            instance_name: instance.display_name(),
            step_name: step.name.clone(),
            platform: instance.platform.clone(),
            matrix: instance.axis_assignment.clone(),
            event_ref: self.event.git_ref().to_string(),
            action,
            workspace: self.workspace.clone(),
            env: env.clone(),
        };

        info!(
            instance = %request.instance_name,
            step = %step.name,
            action = %step.action.name,
            "Running step"
        );

        let mut report = StepReport::new(&step.name, &step.action.name, StepStatus::Succeeded);
        match self.invoker.invoke(&request).await {
            Ok(outcome) if outcome.success => {
                report.exit_code = Some(outcome.exit_code);
                report.message = outcome.message;
            }
            Ok(outcome) => {
                warn!(
                    instance = %request.instance_name,
                    step = %step.name,
                    exit_code = outcome.exit_code,
                    "Step failed"
                );
                report.status = StepStatus::Failed;
                report.exit_code = Some(outcome.exit_code);
                report.message = outcome.message;
            }
            Err(e) => {
                warn!(instance = %request.instance_name, step = %step.name, error = %e, "Step failed");
                report.status = StepStatus::Failed;
                report.message = Some(e.to_string());
            }
        }
        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }

    fn finish(&self, mut report: InstanceReport, start: Instant) -> InstanceReport {
        report.completed_at = Some(Utc::now());
        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            workflow = %report.workflow,
            instance = %report.display_name,
            status = ?report.status,
            duration_ms = report.duration_ms,
            "Instance finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gantry_core::ports::ActionOutcome;
    use gantry_promote::InMemoryReleaseStore;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every invocation; fails steps whose `fail` param names the instance.
    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ActionInvoker for RecordingInvoker {
        async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((request.instance_name.clone(), request.step_name.clone()));
            match request.action.params.get("fail") {
                Some(target) if request.instance_name.contains(target.as_str()) => {
                    Ok(ActionOutcome::failure(1, "boom"))
                }
                _ => Ok(ActionOutcome::success(0)),
            }
        }
    }

    const CI: &str = r#"
name: ci
trigger:
  branches: [master, devel]
jobs:
  linux:
    platform: ubuntu-latest
    matrix:
      python_version: ["3.7", "3.8"]
    steps:
      - name: install
        action: { name: shell, params: { fail: "python_version=3.7" } }
      - name: test
        action: { name: shell }
      - name: deploy
        condition: { message_contains: "[deploy]" }
        action: { name: shell }
"#;

    fn orchestrator(temp: &TempDir, invoker: Arc<RecordingInvoker>) -> Orchestrator {
        Orchestrator::new(
            invoker,
            Arc::new(InMemoryReleaseStore::new()),
            OrchestratorConfig {
                work_dir: temp.path().to_path_buf(),
                max_parallel: Some(2),
            },
        )
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_instance() {
        let temp = TempDir::new().unwrap();
        let invoker = Arc::new(RecordingInvoker::default());
        let workflows = vec![WorkflowDefinition::from_yaml(CI).unwrap()];

        let report = orchestrator(&temp, invoker.clone())
            .run(&Event::push("refs/heads/devel", "fix"), &workflows)
            .await
            .unwrap();

        let instances: Vec<&InstanceReport> = report.instances().collect();
        assert_eq!(instances.len(), 2);

        let failed = instances[0];
        assert_eq!(failed.display_name, "linux (python_version=3.7)");
        assert_eq!(failed.status, InstanceStatus::Failed);
        let statuses: Vec<StepStatus> = failed.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Failed, StepStatus::NotRun, StepStatus::NotRun]
        );

        let sibling = instances[1];
        assert_eq!(sibling.status, InstanceStatus::Succeeded);
        let statuses: Vec<StepStatus> = sibling.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Succeeded, StepStatus::Succeeded, StepStatus::SkippedByGate]
        );

        let calls = invoker.calls.lock().unwrap();
        assert!(!calls.iter().any(|(i, s)| i.contains("3.7") && s == "test"));
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_unmatched_workflow_reports_skipped_instances() {
        let temp = TempDir::new().unwrap();
        let invoker = Arc::new(RecordingInvoker::default());
        let workflows = vec![WorkflowDefinition::from_yaml(CI).unwrap()];

        let report = orchestrator(&temp, invoker.clone())
            .run(&Event::push("refs/heads/feature", "wip"), &workflows)
            .await
            .unwrap();

        let ci = report.workflow("ci").unwrap();
        assert!(!ci.matched);
        assert_eq!(ci.instances.len(), 2);
        assert_eq!(report.count(InstanceStatus::SkippedByTrigger), 2);
        assert!(invoker.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gate_identical_across_matrix() {
        let temp = TempDir::new().unwrap();
        let invoker = Arc::new(RecordingInvoker::default());
        let workflows = vec![WorkflowDefinition::from_yaml(&CI.replace("python_version=3.7", "nobody")).unwrap()];

        let report = orchestrator(&temp, invoker)
            .run(&Event::push("refs/heads/master", "ship [deploy]"), &workflows)
            .await
            .unwrap();

        let deploy: Vec<StepStatus> = report
            .instances()
            .map(|i| i.step("deploy").unwrap().status)
            .collect();
        assert_eq!(deploy, vec![StepStatus::Succeeded, StepStatus::Succeeded]);
    }

    #[tokio::test]
    async fn test_instances_get_distinct_workspaces() {
        let temp = TempDir::new().unwrap();
        let invoker = Arc::new(RecordingInvoker::default());
        let workflows = vec![WorkflowDefinition::from_yaml(CI).unwrap()];

        let report = orchestrator(&temp, invoker)
            .run(&Event::push("refs/heads/master", ""), &workflows)
            .await
            .unwrap();

        let run_dir = temp.path().join(report.run_id.to_string()).join("ci");
        assert!(run_dir.join("linux-0").is_dir());
        assert!(run_dir.join("linux-1").is_dir());
    }

    #[tokio::test]
    async fn test_invalid_workflow_rejected_before_running() {
        let temp = TempDir::new().unwrap();
        let invoker = Arc::new(RecordingInvoker::default());
        let workflows = vec![WorkflowDefinition::from_yaml("name: empty\njobs: {}\n").unwrap()];

        let result = orchestrator(&temp, invoker.clone())
            .run(&Event::push("refs/heads/master", ""), &workflows)
            .await;

        assert!(result.is_err());
        assert!(invoker.calls.lock().unwrap().is_empty());
    }
}
