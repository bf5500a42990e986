//! Matrix expansion for parallel job generation.

use gantry_core::ids::JobInstanceId;
use gantry_core::run::{AxisAssignment, JobInstance};
use gantry_core::workflow::{JobSpec, Matrix};
use std::sync::Arc;

/// Expander for job matrices.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand one job into one instance per combination of axis values.
    ///
    /// The first declared axis is the outermost loop. Every instance shares
    /// the job's step list.
    pub fn expand(&self, workflow: &str, job_name: &str, job: &JobSpec) -> Vec<JobInstance> {
        let steps: Arc<[_]> = Arc::from(job.steps.as_slice());

        self.combinations(&job.matrix)
            .into_iter()
            .enumerate()
            .map(|(index, axis_assignment)| JobInstance {
                id: JobInstanceId::new(),
                workflow: workflow.to_string(),
                job_name: job_name.to_string(),
                index,
                platform: job.platform.clone(),
                axis_assignment,
                steps: Arc::clone(&steps),
            })
            .collect()
    }

    /// Cartesian product of all axes in declaration order.
    pub fn combinations(&self, matrix: &Matrix) -> Vec<AxisAssignment> {
        let mut result = vec![AxisAssignment::new()];

        for axis in matrix.axes() {
            let mut next = Vec::with_capacity(result.len() * axis.values.len());
            for combo in &result {
                for value in &axis.values {
                    next.push(combo.clone().with(axis.name.clone(), value.clone()));
                }
            }
            result = next;
        }

        result
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}
