//! End-to-end runs of the release and ci workflows against fake actions.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::event::Event;
use gantry_core::ports::{ActionInvoker, ActionOutcome, ActionRequest, ReleaseStore};
use gantry_core::run::{InstanceStatus, PromotionStage, StageStatus, StepStatus};
use gantry_core::workflow::WorkflowDefinition;
use gantry_promote::InMemoryReleaseStore;
use gantry_scheduler::{Orchestrator, OrchestratorConfig};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const RELEASE: &str = r#"
name: release
trigger:
  tags: ["v*"]
jobs:
  windows:
    platform: windows-latest
    matrix:
      architecture: [x64, x86]
    steps:
      - name: install
        action: { name: fake }
      - name: build
        action:
          name: fake
          params:
            output: dist/${{ matrix.architecture }}
    promotion:
      product: cutevariant
      output_dir: dist/${{ matrix.architecture }}
      name_axes: [architecture]
"#;

const CI: &str = r#"
name: ci
trigger:
  branches: [master, devel]
  event_types: [pull_request]
jobs:
  linux:
    platform: ubuntu-latest
    matrix:
      python_version: ["3.7", "3.8"]
    steps:
      - name: test
        action: { name: fake }
  windows:
    platform: windows-latest
    matrix:
      architecture: [x64, x86]
    steps:
      - name: binary
        condition: { message_contains: "[deploy]" }
        action:
          name: fake
          params:
            output: dist/${{ matrix.architecture }}
    promotion:
      product: cutevariant
      output_dir: dist/${{ matrix.architecture }}
      name_axes: [architecture]
      package_if: { message_contains: "[deploy]" }
      upload:
        action: { name: fake }
        condition:
          any:
            - ref_equals: refs/heads/master
            - message_contains: "[deploy]"
"#;

/// Stands in for installers, packagers and uploaders. A step with an
/// `output` param writes a build output directory into the workspace.
#[derive(Default)]
struct FakeActions {
    invocations: Mutex<Vec<String>>,
}

#[async_trait]
impl ActionInvoker for FakeActions {
    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        self.invocations
            .lock()
            .unwrap()
            .push(format!("{}:{}", request.instance_name, request.step_name));

        if let Some(output) = request.action.params.get("output") {
            let dir = request.workspace.join(output);
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join("cutevariant.exe"), output.as_bytes())?;
        }
        Ok(ActionOutcome::success(1))
    }
}

fn orchestrator(
    temp: &TempDir,
    actions: Arc<FakeActions>,
    releases: Arc<InMemoryReleaseStore>,
) -> Orchestrator {
    Orchestrator::new(
        actions,
        releases,
        OrchestratorConfig {
            work_dir: temp.path().join("work"),
            max_parallel: None,
        },
    )
}

fn workflows() -> Vec<WorkflowDefinition> {
    vec![
        WorkflowDefinition::from_yaml(CI).unwrap(),
        WorkflowDefinition::from_yaml(RELEASE).unwrap(),
    ]
}

#[tokio::test]
async fn test_tag_push_publishes_one_asset_per_architecture() {
    let temp = TempDir::new().unwrap();
    let actions = Arc::new(FakeActions::default());
    let releases = Arc::new(InMemoryReleaseStore::new());

    let event = Event::tag_push("refs/tags/v1.0.0", "release v1.0.0");
    let report = orchestrator(&temp, actions, releases.clone())
        .run(&event, &workflows())
        .await
        .unwrap();

    let release_report = report.workflow("release").unwrap();
    assert!(release_report.matched);
    assert_eq!(release_report.instances.len(), 2);
    assert!(!report.workflow("ci").unwrap().matched);

    for instance in &release_report.instances {
        assert_eq!(instance.status, InstanceStatus::Succeeded);
        let promotion = instance.promotion.as_ref().unwrap();
        assert_eq!(
            promotion.status_of(PromotionStage::Publish),
            Some(StageStatus::Succeeded)
        );
        assert_eq!(promotion.release_tag.as_deref(), Some("v1.0.0"));
    }

    let release = releases.get("v1.0.0").await.unwrap().unwrap();
    assert_eq!(
        release.asset_names(),
        vec!["cutevariant-standalone-x64.zip", "cutevariant-standalone-x86.zip"]
    );
    assert_eq!(releases.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rerun_attaches_identical_assets() {
    let temp = TempDir::new().unwrap();
    let releases = Arc::new(InMemoryReleaseStore::new());
    let event = Event::tag_push("refs/tags/v1.0.0", "release v1.0.0");

    for _ in 0..2 {
        let report = orchestrator(&temp, Arc::new(FakeActions::default()), releases.clone())
            .run(&event, &workflows())
            .await
            .unwrap();
        assert!(!report.has_failures());
    }

    let release = releases.get("v1.0.0").await.unwrap().unwrap();
    assert_eq!(release.len(), 2);
}

#[tokio::test]
async fn test_master_push_with_deploy_uploads_but_never_publishes() {
    let temp = TempDir::new().unwrap();
    let actions = Arc::new(FakeActions::default());
    let releases = Arc::new(InMemoryReleaseStore::new());

    let event = Event::push("refs/heads/master", "bump version [deploy]");
    let report = orchestrator(&temp, actions.clone(), releases.clone())
        .run(&event, &workflows())
        .await
        .unwrap();

    assert!(!report.workflow("release").unwrap().matched);
    let ci = report.workflow("ci").unwrap();
    assert_eq!(ci.instances.len(), 4);

    for instance in ci.instances.iter().filter(|i| i.job_name == "windows") {
        assert_eq!(instance.status, InstanceStatus::Succeeded);
        assert_eq!(instance.step("binary").unwrap().status, StepStatus::Succeeded);
        let promotion = instance.promotion.as_ref().unwrap();
        assert_eq!(
            promotion.status_of(PromotionStage::Upload),
            Some(StageStatus::Succeeded)
        );
        assert_eq!(
            promotion.status_of(PromotionStage::Publish),
            Some(StageStatus::SkippedByGate)
        );
    }
    assert!(releases.list().await.unwrap().is_empty());

    let uploads = actions
        .invocations
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.ends_with(":upload"))
        .count();
    assert_eq!(uploads, 2);
}

#[tokio::test]
async fn test_devel_push_without_marker_skips_packaging() {
    let temp = TempDir::new().unwrap();
    let releases = Arc::new(InMemoryReleaseStore::new());

    let event = Event::push("refs/heads/devel", "fix tests");
    let report = orchestrator(&temp, Arc::new(FakeActions::default()), releases)
        .run(&event, &workflows())
        .await
        .unwrap();

    let ci = report.workflow("ci").unwrap();
    for instance in ci.instances.iter().filter(|i| i.job_name == "windows") {
        assert_eq!(instance.status, InstanceStatus::Succeeded);
        assert_eq!(
            instance.step("binary").unwrap().status,
            StepStatus::SkippedByGate
        );
        let promotion = instance.promotion.as_ref().unwrap();
        assert_eq!(
            promotion.status_of(PromotionStage::Package),
            Some(StageStatus::SkippedByGate)
        );
        assert_eq!(
            promotion.status_of(PromotionStage::Publish),
            Some(StageStatus::NotRun)
        );
    }
}

#[tokio::test]
async fn test_feature_branch_push_runs_nothing() {
    let temp = TempDir::new().unwrap();
    let actions = Arc::new(FakeActions::default());

    let event = Event::push("refs/heads/feature/x", "wip [deploy]");
    let report = orchestrator(&temp, actions.clone(), Arc::new(InMemoryReleaseStore::new()))
        .run(&event, &workflows())
        .await
        .unwrap();

    assert_eq!(report.count(InstanceStatus::SkippedByTrigger), 6);
    assert!(actions.invocations.lock().unwrap().is_empty());
}
