//! Trigger matching and evaluation.

use gantry_core::event::{Event, EventType};
use gantry_core::workflow::{DispatchInput, Trigger, WorkflowDefinition};
use std::collections::BTreeMap;
use tracing::debug;

/// A workflow activated by an event.
#[derive(Debug, Clone)]
pub struct ResolvedWorkflow<'a> {
    pub definition: &'a WorkflowDefinition,
    /// First declared predicate that matched.
    pub matched_by: Trigger,
    /// Dispatch inputs exposed downstream; empty unless manually dispatched.
    pub inputs: BTreeMap<String, String>,
}

/// Resolver deciding which workflows an event activates.
pub struct TriggerResolver;

impl TriggerResolver {
    pub fn new() -> Self {
        Self
    }

    /// Workflows activated by `event`, in the order given.
    ///
    /// An empty result is a valid outcome: nothing runs.
    pub fn resolve<'a>(
        &self,
        event: &Event,
        workflows: &'a [WorkflowDefinition],
    ) -> Vec<ResolvedWorkflow<'a>> {
        workflows
            .iter()
            .filter_map(|workflow| self.matches(workflow, event))
            .collect()
    }

    /// Match one workflow: any declared predicate matching is enough.
    pub fn matches<'a>(
        &self,
        workflow: &'a WorkflowDefinition,
        event: &Event,
    ) -> Option<ResolvedWorkflow<'a>> {
        let triggers = workflow.triggers();

        let dispatch_inputs = triggers.iter().find_map(|t| match t {
            Trigger::ManualWithInput(declared) => self.dispatch_matches(declared, event),
            _ => None,
        });

        let Some(matched_by) = triggers
            .iter()
            .find(|t| self.trigger_matches(t, event))
            .cloned()
        else {
            debug!(
                workflow = %workflow.name,
                event_type = %event.event_type(),
                git_ref = %event.git_ref(),
                "Workflow not triggered"
            );
            return None;
        };

        let inputs = match dispatch_inputs {
            Some(inputs) => inputs,
            None if event.event_type() == EventType::ManualDispatch => {
                event.dispatch_inputs().clone()
            }
            None => BTreeMap::new(),
        };

        debug!(workflow = %workflow.name, trigger = %matched_by, "Workflow triggered");
        Some(ResolvedWorkflow {
            definition: workflow,
            matched_by,
            inputs,
        })
    }

    /// Evaluate a single predicate against an event.
    pub fn trigger_matches(&self, trigger: &Trigger, event: &Event) -> bool {
        match trigger {
            Trigger::BranchIn(patterns) => {
                matches!(event.event_type(), EventType::Push | EventType::PullRequest)
                    && event
                        .branch()
                        .is_some_and(|branch| patterns.iter().any(|p| glob_match(p, branch)))
            }
            Trigger::TagGlob(pattern) => {
                event.event_type() == EventType::TagPush
                    && event.tag().is_some_and(|tag| glob_match(pattern, tag))
            }
            Trigger::EventTypeIs(event_type) => event.event_type() == *event_type,
            Trigger::ManualWithInput(declared) => self.dispatch_matches(declared, event).is_some(),
        }
    }

    /// Resolved inputs when a manual dispatch satisfies the declared inputs.
    ///
    /// Declared defaults are overlaid with the event's inputs. A required input
    /// that is neither supplied nor defaulted prevents the match.
    fn dispatch_matches(
        &self,
        declared: &BTreeMap<String, DispatchInput>,
        event: &Event,
    ) -> Option<BTreeMap<String, String>> {
        if event.event_type() != EventType::ManualDispatch {
            return None;
        }

        let mut resolved: BTreeMap<String, String> = declared
            .iter()
            .filter_map(|(name, input)| input.default.clone().map(|d| (name.clone(), d)))
            .collect();
        resolved.extend(
            event
                .dispatch_inputs()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let missing: Vec<&str> = declared
            .iter()
            .filter(|(name, input)| input.required && !resolved.contains_key(*name))
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() {
            debug!(missing = ?missing, "Manual dispatch lacks required inputs");
            return None;
        }

        Some(resolved)
    }
}

impl Default for TriggerResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Wildcard match: `*` matches any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::workflow::TriggerConfig;
    use pretty_assertions::assert_eq;

    fn workflow(name: &str, trigger: TriggerConfig) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.into(),
            trigger,
            env: BTreeMap::new(),
            jobs: BTreeMap::new(),
        }
    }

    fn ci() -> WorkflowDefinition {
        workflow(
            "ci",
            TriggerConfig {
                branches: Some(vec!["master".into(), "devel".into()]),
                event_types: Some(vec![EventType::PullRequest]),
                ..Default::default()
            },
        )
    }

    fn release() -> WorkflowDefinition {
        workflow(
            "release",
            TriggerConfig {
                tags: Some(vec!["v*".into()]),
                ..Default::default()
            },
        )
    }

    fn dispatchable(required: bool, default: Option<&str>) -> WorkflowDefinition {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "channel".to_string(),
            DispatchInput {
                description: None,
                required,
                default: default.map(String::from),
            },
        );
        workflow(
            "manual",
            TriggerConfig {
                workflow_dispatch: Some(gantry_core::workflow::DispatchConfig { inputs }),
                ..Default::default()
            },
        )
    }

    fn names(resolved: &[ResolvedWorkflow<'_>]) -> Vec<String> {
        resolved.iter().map(|r| r.definition.name.clone()).collect()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("v*", "v1.0.0"));
        assert!(glob_match("*", ""));
        assert!(glob_match("release-?.?", "release-1.2"));
        assert!(glob_match("feature/*/wip", "feature/x/y/wip"));
        assert!(glob_match("master", "master"));
        assert!(!glob_match("v*", "1.0.0"));
        assert!(!glob_match("release-?", "release-10"));
        assert!(!glob_match("master", "master2"));
    }

    #[test]
    fn test_push_to_listed_branch() {
        let workflows = vec![ci(), release()];
        let resolver = TriggerResolver::new();
        let resolved = resolver.resolve(&Event::push("refs/heads/devel", "fix"), &workflows);
        assert_eq!(names(&resolved), vec!["ci"]);
        assert_eq!(
            resolved[0].matched_by,
            Trigger::BranchIn(vec!["master".into(), "devel".into()])
        );
    }

    #[test]
    fn test_push_to_unlisted_branch_matches_nothing() {
        let workflows = vec![ci(), release()];
        let resolved =
            TriggerResolver::new().resolve(&Event::push("refs/heads/feature-x", "wip"), &workflows);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_pull_request_matches_by_event_type() {
        let workflows = vec![ci()];
        let resolved = TriggerResolver::new()
            .resolve(&Event::pull_request("refs/pull/7/merge", "pr"), &workflows);
        assert_eq!(names(&resolved), vec!["ci"]);
        assert_eq!(resolved[0].matched_by, Trigger::EventTypeIs(EventType::PullRequest));
    }

    #[test]
    fn test_tag_push() {
        let workflows = vec![ci(), release()];
        let resolver = TriggerResolver::new();

        let resolved = resolver.resolve(&Event::tag_push("refs/tags/v1.0.0", "release"), &workflows);
        assert_eq!(names(&resolved), vec!["release"]);

        let resolved = resolver.resolve(&Event::tag_push("refs/tags/nightly", "n"), &workflows);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_push_of_tag_ref_does_not_match_tag_glob() {
        let workflows = vec![release()];
        let resolved = TriggerResolver::new().resolve(&Event::push("refs/tags/v1.0.0", ""), &workflows);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_manual_dispatch_overlays_defaults() {
        let workflows = vec![dispatchable(false, Some("stable"))];
        let resolver = TriggerResolver::new();

        let resolved =
            resolver.resolve(&Event::manual_dispatch("refs/heads/master", BTreeMap::new()), &workflows);
        assert_eq!(resolved[0].inputs.get("channel").map(String::as_str), Some("stable"));

        let mut supplied = BTreeMap::new();
        supplied.insert("channel".to_string(), "beta".to_string());
        let resolved = resolver.resolve(&Event::manual_dispatch("refs/heads/master", supplied), &workflows);
        assert_eq!(resolved[0].inputs.get("channel").map(String::as_str), Some("beta"));
    }

    #[test]
    fn test_manual_dispatch_missing_required_input() {
        let workflows = vec![dispatchable(true, None)];
        let resolved = TriggerResolver::new()
            .resolve(&Event::manual_dispatch("refs/heads/master", BTreeMap::new()), &workflows);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_workflow_matches_any_declared_kind() {
        let mixed = workflow(
            "mixed",
            TriggerConfig {
                branches: Some(vec!["master".into()]),
                tags: Some(vec!["v*".into()]),
                ..Default::default()
            },
        );
        let workflows = vec![mixed];
        let resolver = TriggerResolver::new();
        assert_eq!(resolver.resolve(&Event::push("refs/heads/master", ""), &workflows).len(), 1);
        assert_eq!(resolver.resolve(&Event::tag_push("refs/tags/v2", ""), &workflows).len(), 1);
        assert!(resolver.resolve(&Event::push("refs/heads/devel", ""), &workflows).is_empty());
        assert!(
            resolver
                .resolve(&Event::pull_request("refs/pull/1/merge", ""), &workflows)
                .is_empty()
        );
    }
}
