//! Parameter interpolation for action invocations.

use crate::event::Event;
use crate::run::AxisAssignment;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("expression pattern is valid"));

/// Immutable context for one job instance.
///
/// Everything an action parameter may reference is captured here up front;
/// nothing is read from the process environment.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Workflow `env` variables
    pub variables: BTreeMap<String, String>,
    /// Matrix values for the current instance
    pub matrix: HashMap<String, String>,
    /// Resolved dispatch inputs
    pub inputs: BTreeMap<String, String>,
    /// Event fields: `ref`, `type`, `branch`, `tag`, `commit_message`
    pub event: HashMap<&'static str, String>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_instance(
        event: &Event,
        assignment: &AxisAssignment,
        variables: &BTreeMap<String, String>,
        inputs: &BTreeMap<String, String>,
    ) -> Self {
        let mut fields = HashMap::new();
        fields.insert("ref", event.git_ref().to_string());
        fields.insert("type", event.event_type().to_string());
        fields.insert("commit_message", event.commit_message().to_string());
        if let Some(branch) = event.branch() {
            fields.insert("branch", branch.to_string());
        }
        if let Some(tag) = event.tag() {
            fields.insert("tag", tag.to_string());
        }

        Self {
            variables: variables.clone(),
            matrix: assignment
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            inputs: inputs.clone(),
            event: fields,
        }
    }

    /// Interpolate `${{ ... }}` expressions in a string.
    ///
    /// Supports:
    /// - `${{ matrix.key }}` - matrix value
    /// - `${{ inputs.name }}` - dispatch input
    /// - `${{ env.NAME }}` / `${{ NAME }}` - workflow variable
    /// - `${{ event.ref }}` and the other event fields
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
            })
            .into_owned()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        let found = if let Some(key) = expr.strip_prefix("matrix.") {
            self.matrix.get(key)
        } else if let Some(key) = expr.strip_prefix("inputs.") {
            self.inputs.get(key)
        } else if let Some(key) = expr.strip_prefix("env.") {
            self.variables.get(key)
        } else if let Some(key) = expr.strip_prefix("event.") {
            self.event.get(key)
        } else {
            self.variables.get(expr)
        };
        found.cloned().unwrap_or_default()
    }

    /// Interpolate every value of a parameter map.
    pub fn interpolate_map(&self, params: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        params
            .iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }
}
