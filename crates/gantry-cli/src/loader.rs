//! Workflow discovery and event construction.

use crate::commands::EventArgs;
use anyhow::{Context, bail};
use gantry_core::event::{Event, EventType, TAG_REF_PREFIX};
use gantry_core::workflow::WorkflowDefinition;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Workflow files under `path`, in file-name order. A file path is returned as is.
pub fn workflow_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("workflow path {} does not exist", path.display());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).with_context(|| format!("reading {}", path.display()))? {
        let file = entry?.path();
        let is_yaml = matches!(
            file.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );
        if file.is_file() && is_yaml {
            files.push(file);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Parse every workflow under `path`. Names must be unique across files.
pub fn load_workflows(path: &Path) -> anyhow::Result<Vec<WorkflowDefinition>> {
    let mut workflows = Vec::new();
    let mut names = HashSet::new();

    for file in workflow_files(path)? {
        let workflow = WorkflowDefinition::from_path(&file)?;
        if !names.insert(workflow.name.clone()) {
            bail!(
                "duplicate workflow name \"{}\" in {}",
                workflow.name,
                file.display()
            );
        }
        workflows.push(workflow);
    }

    if workflows.is_empty() {
        bail!("no workflow definitions found in {}", path.display());
    }
    Ok(workflows)
}

/// Build the triggering event from a file or from individual flags.
///
/// Without `--type`, refs under `refs/tags/` are tag pushes and every other
/// ref is a push.
pub fn build_event(args: &EventArgs) -> anyhow::Result<Event> {
    if let Some(path) = &args.event {
        return Event::from_path(path).with_context(|| format!("loading event {}", path.display()));
    }

    let Some(git_ref) = args.git_ref.as_deref() else {
        bail!("an event is required: pass --event FILE or --ref REF");
    };

    let event_type = match args.event_type.as_deref() {
        Some(value) => value.parse::<EventType>()?,
        None if git_ref.starts_with(TAG_REF_PREFIX) => EventType::TagPush,
        None => EventType::Push,
    };

    let inputs = parse_inputs(&args.inputs)?;
    Ok(Event::new(
        event_type,
        git_ref,
        args.message.clone().unwrap_or_default(),
        inputs,
    )?)
}

fn parse_inputs(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut inputs = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid input \"{}\", expected KEY=VALUE", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid input \"{}\", key is empty", pair);
        }
        inputs.insert(key.to_string(), value.to_string());
    }
    Ok(inputs)
}
