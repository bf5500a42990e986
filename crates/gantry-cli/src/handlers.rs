//! Command handlers.

use crate::commands::EventArgs;
use crate::config::{CliConfig, OutputFormat};
use crate::loader;
use anyhow::{Context, bail};
use console::style;
use gantry_core::event::Event;
use gantry_core::run::{InstanceReport, InstanceStatus, PromotionStage, RunReport, StageStatus, StepStatus};
use gantry_core::workflow::WorkflowDefinition;
use gantry_promote::FilesystemReleaseStore;
use gantry_runner::ActionRegistry;
use gantry_scheduler::{GateEvaluator, MatrixExpander, Orchestrator, OrchestratorConfig, TriggerResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Validate every workflow file under `path`.
pub fn validate(path: &Path) -> anyhow::Result<()> {
    let files = loader::workflow_files(path)?;
    if files.is_empty() {
        bail!("no workflow definitions found in {}", path.display());
    }

    let mut invalid = 0;
    for file in &files {
        let workflow = match WorkflowDefinition::from_path(file) {
            Ok(workflow) => workflow,
            Err(e) => {
                invalid += 1;
                println!("{} {}", style("✗").red(), e);
                continue;
            }
        };

        let problems = workflow.problems();
        if problems.is_empty() {
            println!(
                "{} Workflow \"{}\" is valid ({})",
                style("✓").green(),
                workflow.name,
                style(file.display()).dim()
            );
            println!("  Triggers: {}", workflow.triggers().len());
            for (name, job) in &workflow.jobs {
                println!(
                    "    - {} on {} ({} steps, {} instances)",
                    name,
                    job.platform,
                    job.steps.len(),
                    job.matrix.cardinality()
                );
            }
        } else {
            invalid += 1;
            println!(
                "{} Workflow \"{}\" is invalid ({})",
                style("✗").red(),
                workflow.name,
                style(file.display()).dim()
            );
            for problem in problems {
                println!("    - {}", problem);
            }
        }
    }

    if invalid > 0 {
        bail!("{} of {} workflow files are invalid", invalid, files.len());
    }
    Ok(())
}

/// Show which workflows an event activates and, with `expand`, what would run.
pub fn resolve(workflows_dir: &Path, event_args: &EventArgs, expand: bool) -> anyhow::Result<()> {
    let workflows = loader::load_workflows(workflows_dir)?;
    let event = loader::build_event(event_args)?;
    print_event(&event);

    let resolved = TriggerResolver::new().resolve(&event, &workflows);
    if resolved.is_empty() {
        println!("{} No workflow matches this event", style("i").blue());
        return Ok(());
    }

    let expander = MatrixExpander::new();
    let gates = GateEvaluator::new();

    for workflow in &resolved {
        println!(
            "{} {} (matched by {})",
            style("▶").cyan(),
            style(&workflow.definition.name).bold(),
            workflow.matched_by
        );
        for (key, value) in &workflow.inputs {
            println!("    input {} = {}", key, value);
        }
        if !expand {
            continue;
        }

        for (job_name, job) in &workflow.definition.jobs {
            let plan = gates.plan(job, &event);
            for instance in expander.expand(&workflow.definition.name, job_name, job) {
                println!("    {}", instance.display_name());
            }
            for gate in &plan.steps {
                println!("      step {:<20} {}", gate.name, gate_label(gate.execute));
            }
            if let Some(promotion) = plan.promotion {
                println!("      {:<25} {}", "package", gate_label(promotion.package));
                println!("      {:<25} {}", "upload", gate_label(promotion.upload));
                println!("      {:<25} {}", "publish", gate_label(promotion.publish));
            }
        }
    }

    let skipped = workflows.len() - resolved.len();
    if skipped > 0 {
        println!("{} {} workflow(s) not triggered", style("i").blue(), skipped);
    }
    Ok(())
}

/// Overrides for `gantry run` on top of the saved configuration.
pub struct RunOverrides {
    pub work_dir: Option<PathBuf>,
    pub release_dir: Option<PathBuf>,
    pub max_parallel: Option<usize>,
}

/// Run every activated workflow. Returns whether any instance failed.
pub async fn run(
    config: &CliConfig,
    workflows_dir: &Path,
    event_args: &EventArgs,
    overrides: RunOverrides,
) -> anyhow::Result<bool> {
    let workflows = loader::load_workflows(workflows_dir)?;
    let event = loader::build_event(event_args)?;

    let release_dir = overrides.release_dir.unwrap_or_else(|| config.release_dir.clone());
    let orchestrator = Orchestrator::new(
        Arc::new(ActionRegistry::with_builtins(config.runner_config())),
        Arc::new(FilesystemReleaseStore::new(release_dir)),
        OrchestratorConfig {
            work_dir: overrides.work_dir.unwrap_or_else(|| config.work_dir.clone()),
            max_parallel: overrides.max_parallel.or(config.max_parallel),
        },
    );

    let report = orchestrator
        .run(&event, &workflows)
        .await
        .context("run rejected")?;

    match config.output_format {
        OutputFormat::Table => print_report(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
    }

    Ok(report.has_failures())
}

fn print_event(event: &Event) {
    println!(
        "Event {} on {}",
        style(event.event_type()).bold(),
        style(event.git_ref()).dim()
    );
}

fn gate_label(open: bool) -> console::StyledObject<&'static str> {
    if open {
        style("run").green()
    } else {
        style("skip").yellow()
    }
}

fn print_report(report: &RunReport) {
    println!("Run {}", style(&report.run_id).bold());
    print_event(&report.event);

    for workflow in &report.workflows {
        if !workflow.matched {
            println!(
                "{} {} not triggered",
                style("-").dim(),
                style(&workflow.name).dim()
            );
            continue;
        }
        println!("{} {}", style("▶").cyan(), style(&workflow.name).bold());
        for instance in &workflow.instances {
            print_instance(instance);
        }
    }

    println!(
        "\n{} succeeded, {} failed, {} not triggered",
        style(report.count(InstanceStatus::Succeeded)).green(),
        style(report.count(InstanceStatus::Failed)).red(),
        report.count(InstanceStatus::SkippedByTrigger)
    );
}

fn print_instance(instance: &InstanceReport) {
    let marker = match instance.status {
        InstanceStatus::Succeeded => style("✓").green(),
        InstanceStatus::Failed => style("✗").red(),
        InstanceStatus::SkippedByTrigger => style("-").dim(),
    };
    println!(
        "  {} {} ({}ms)",
        marker,
        instance.display_name,
        instance.duration_ms
    );
    if let Some(error) = &instance.error {
        println!("      {}", style(error).red());
    }

    for step in &instance.steps {
        let status = match step.status {
            StepStatus::Succeeded => style("ok").green(),
            StepStatus::SkippedByGate => style("skipped").yellow(),
            StepStatus::Failed => style("failed").red(),
            StepStatus::NotRun => style("not run").dim(),
        };
        print!("      {:<20} {}", step.name, status);
        match &step.message {
            Some(message) if step.status == StepStatus::Failed => println!(": {}", message),
            _ => println!(),
        }
    }

    if let Some(promotion) = &instance.promotion {
        for stage in &promotion.stages {
            let status = match stage.status {
                StageStatus::Succeeded => style("ok").green(),
                StageStatus::SkippedByGate => style("skipped").yellow(),
                StageStatus::Failed => style("failed").red(),
                StageStatus::NotRun => style("not run").dim(),
            };
            let name = format!("{:?}", stage.stage).to_lowercase();
            match &stage.detail {
                Some(detail) => println!("      {:<20} {} ({})", name, status, detail),
                None => println!("      {:<20} {}", name, status),
            }
        }
        let published = promotion.status_of(PromotionStage::Publish) == Some(StageStatus::Succeeded);
        if let (true, Some(archive), Some(tag)) = (published, &promotion.archive, &promotion.release_tag) {
            println!("      published {} to {}", style(archive).bold(), tag);
        }
    }
}

/// Show current configuration.
pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("Configuration:");
    println!("  workflows_dir: {}", config.workflows_dir.display());
    println!("  work_dir: {}", config.work_dir.display());
    println!("  release_dir: {}", config.release_dir.display());
    println!(
        "  max_parallel: {}",
        config
            .max_parallel
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string())
    );
    println!(
        "  timeout_seconds: {}",
        config
            .timeout_seconds
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  shell: {}", config.shell);
    println!("  output_format: {:?}", config.output_format);
    println!();
    println!("Config file: {}", CliConfig::config_path()?.display());
    Ok(())
}

/// Set configuration value.
pub fn set_config(key: &str, value: &str) -> anyhow::Result<()> {
    let mut config = CliConfig::load()?;
    config.set(key, value).map_err(anyhow::Error::msg)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}
