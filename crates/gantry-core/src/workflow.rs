//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML configuration.
//! Definitions are loaded once and never mutated while a run is in flight.

use crate::condition::Condition;
use crate::event::EventType;
use crate::{Error, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, alias = "on")]
    pub trigger: TriggerConfig,
    /// Variables exposed to actions as `${{ env.NAME }}` and process environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub jobs: BTreeMap<String, JobSpec>,
}

impl WorkflowDefinition {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| Error::InvalidWorkflow(format!("{}: {}", path.display(), e)))
    }

    /// Trigger predicates declared by this workflow.
    pub fn triggers(&self) -> Vec<Trigger> {
        self.trigger.predicates()
    }

    /// Collect every structural problem with this definition.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("workflow name must not be empty".to_string());
        }
        if self.trigger.predicates().is_empty() {
            problems.push("workflow declares no trigger predicates".to_string());
        }
        if self.jobs.is_empty() {
            problems.push("workflow declares no jobs".to_string());
        }

        for (job_name, job) in &self.jobs {
            for axis in job.matrix.axes() {
                if axis.values.is_empty() {
                    problems.push(format!("job {}: axis {} has no values", job_name, axis.name));
                }
                let mut seen = HashSet::new();
                for value in &axis.values {
                    if !seen.insert(value) {
                        problems.push(format!(
                            "job {}: axis {} repeats value {}",
                            job_name, axis.name, value
                        ));
                    }
                }
            }

            let mut step_names = HashSet::new();
            for step in &job.steps {
                if !step_names.insert(step.name.as_str()) {
                    problems.push(format!("job {}: duplicate step name {}", job_name, step.name));
                }
                if step.action.name.trim().is_empty() {
                    problems.push(format!("job {}: step {} has no action", job_name, step.name));
                }
            }

            if let Some(promotion) = &job.promotion {
                if promotion.product.trim().is_empty() {
                    problems.push(format!("job {}: promotion product must not be empty", job_name));
                }
                if let Some(name_axes) = &promotion.name_axes {
                    for axis in name_axes {
                        if job.matrix.axis(axis).is_none() {
                            problems.push(format!(
                                "job {}: promotion names undeclared axis {}",
                                job_name, axis
                            ));
                        }
                    }
                    // Archive names must stay unique across the matrix.
                    for axis in job.matrix.axes() {
                        if axis.values.len() > 1 && !name_axes.contains(&axis.name) {
                            problems.push(format!(
                                "job {}: promotion name_axes omits varying axis {}",
                                job_name, axis.name
                            ));
                        }
                    }
                }
            }
        }

        problems
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::WorkflowValidation {
                workflow: self.name.clone(),
                problems,
            })
        }
    }
}

/// Declarative trigger surface. Every declared entry becomes one predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_types: Option<Vec<EventType>>,
    /// A bare `workflow_dispatch:` key declares dispatch without inputs.
    #[serde(
        default,
        deserialize_with = "deserialize_dispatch",
        skip_serializing_if = "Option::is_none"
    )]
    pub workflow_dispatch: Option<DispatchConfig>,
}

fn deserialize_dispatch<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<DispatchConfig>, D::Error> {
    Ok(Some(Option::<DispatchConfig>::deserialize(deserializer)?.unwrap_or_default()))
}

impl TriggerConfig {
    pub fn predicates(&self) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        if let Some(branches) = self.branches.as_ref().filter(|b| !b.is_empty()) {
            triggers.push(Trigger::BranchIn(branches.clone()));
        }
        for pattern in self.tags.iter().flatten() {
            triggers.push(Trigger::TagGlob(pattern.clone()));
        }
        for event_type in self.event_types.iter().flatten() {
            triggers.push(Trigger::EventTypeIs(*event_type));
        }
        if let Some(dispatch) = &self.workflow_dispatch {
            triggers.push(Trigger::ManualWithInput(dispatch.inputs.clone()));
        }
        triggers
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub inputs: BTreeMap<String, DispatchInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchInput {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

/// A predicate over an event deciding whether a workflow activates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    BranchIn(Vec<String>),
    TagGlob(String),
    EventTypeIs(EventType),
    ManualWithInput(BTreeMap<String, DispatchInput>),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::BranchIn(branches) => write!(f, "branch in [{}]", branches.join(", ")),
            Trigger::TagGlob(pattern) => write!(f, "tag matches {}", pattern),
            Trigger::EventTypeIs(t) => write!(f, "event type {}", t),
            Trigger::ManualWithInput(inputs) => {
                let names: Vec<&str> = inputs.keys().map(String::as_str).collect();
                write!(f, "manual dispatch with inputs [{}]", names.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub platform: String,
    #[serde(default)]
    pub matrix: Matrix,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub promotion: Option<PromotionSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub action: ActionSpec,
    #[serde(default, alias = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

/// Opaque invocation descriptor for an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionSpec {
    pub product: String,
    #[serde(default = "default_classifier")]
    pub classifier: String,
    /// Build output directory, relative to the instance workspace.
    pub output_dir: String,
    /// Axes contributing to the artifact name. Defaults to all axes in order.
    #[serde(default)]
    pub name_axes: Option<Vec<String>>,
    #[serde(default)]
    pub format: ArchiveFormat,
    #[serde(default)]
    pub package_if: Option<Condition>,
    #[serde(default)]
    pub upload: Option<UploadSpec>,
    #[serde(default = "Condition::publish_gate")]
    pub publish_if: Condition,
}

fn default_classifier() -> String {
    "standalone".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSpec {
    pub action: ActionSpec,
    #[serde(default, alias = "if")]
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    #[default]
    Zip,
    TarZst,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarZst => "tar.zst",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

/// Named axes in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matrix {
    axes: Vec<MatrixAxis>,
}

impl Matrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an axis, replacing any earlier axis of the same name in place.
    pub fn with_axis<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let axis = MatrixAxis {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        };
        match self.axes.iter_mut().find(|a| a.name == axis.name) {
            Some(existing) => *existing = axis,
            None => self.axes.push(axis),
        }
        self
    }

    pub fn axes(&self) -> &[MatrixAxis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&MatrixAxis> {
        self.axes.iter().find(|a| a.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of combinations the matrix expands to.
    pub fn cardinality(&self) -> usize {
        self.axes.iter().map(|a| a.values.len()).product()
    }
}

impl Serialize for Matrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.axes.len()))?;
        for axis in &self.axes {
            map.serialize_entry(&axis.name, &axis.values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Matrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MatrixVisitor;

        impl<'de> Visitor<'de> for MatrixVisitor {
            type Value = Matrix;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of axis names to lists of values")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Matrix, E> {
                Ok(Matrix::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Matrix, A::Error> {
                let mut axes: Vec<MatrixAxis> = Vec::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<ScalarString>>()? {
                    if axes.iter().any(|a| a.name == name) {
                        return Err(de::Error::custom(format!("duplicate matrix axis: {}", name)));
                    }
                    axes.push(MatrixAxis {
                        name,
                        values: values.into_iter().map(|v| v.0).collect(),
                    });
                }
                Ok(Matrix { axes })
            }
        }

        deserializer.deserialize_any(MatrixVisitor)
    }
}

/// Scalar YAML value kept in its string form.
struct ScalarString(String);

impl<'de> Deserialize<'de> for ScalarString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ScalarVisitor;

        impl Visitor<'_> for ScalarVisitor {
            type Value = ScalarString;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, number or boolean")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<ScalarString, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<ScalarString, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<ScalarString, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<ScalarString, E> {
                Ok(ScalarString(v.to_string()))
            }

            // 3.10 would silently become "3.1".
            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<ScalarString, E> {
                Err(E::custom(format!(
                    "matrix value {} is a float, quote it to keep its exact spelling",
                    v
                )))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}
