//! Gate evaluation for optional steps and promotion stages.
//!
//! Gates are pure functions of the triggering event. A predicate that needs
//! context the event does not carry evaluates to `false`, so a gate can only
//! ever fail towards skipping.

use gantry_core::condition::Condition;
use gantry_core::event::{Event, TAG_REF_PREFIX};
use gantry_core::workflow::JobSpec;
use gantry_promote::PromotionGates;
use serde::Serialize;
use tracing::debug;

pub struct GateEvaluator;

impl GateEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, condition: &Condition, event: &Event) -> bool {
        match condition {
            Condition::MessageContains(marker) => {
                if marker.is_empty() || event.commit_message().is_empty() {
                    debug!(predicate = %condition, "No commit message context");
                    return false;
                }
                event.commit_message().contains(marker.as_str())
            }
            Condition::RefEquals(value) => {
                self.ref_context(value, event).is_some_and(|r| r == value)
            }
            Condition::RefStartsWith(prefix) => self
                .ref_context(prefix, event)
                .is_some_and(|r| r.starts_with(prefix.as_str())),
            Condition::EventTypeIs(event_type) => event.event_type() == *event_type,
            Condition::All(terms) => terms.iter().all(|t| self.evaluate(t, event)),
            Condition::Any(terms) => terms.iter().any(|t| self.evaluate(t, event)),
        }
    }

    /// A missing condition always passes.
    pub fn evaluate_optional(&self, condition: Option<&Condition>, event: &Event) -> bool {
        condition.is_none_or(|c| self.evaluate(c, event))
    }

    /// The ref a ref predicate may inspect, if the event carries that context.
    ///
    /// Operands in the tag namespace need a tag push; everything else needs
    /// a non-empty ref.
    fn ref_context<'e>(&self, operand: &str, event: &'e Event) -> Option<&'e str> {
        let git_ref = event.git_ref();
        if operand.starts_with(TAG_REF_PREFIX) && event.tag().is_none() {
            debug!(
                operand = %operand,
                event_type = %event.event_type(),
                "Tag predicate evaluated without tag context"
            );
            return None;
        }
        if git_ref.is_empty() {
            debug!(operand = %operand, "Ref predicate evaluated without ref");
            return None;
        }
        Some(git_ref)
    }

    /// Evaluate every gate of a job once for the whole run.
    pub fn plan(&self, job: &JobSpec, event: &Event) -> GatePlan {
        GatePlan {
            steps: job
                .steps
                .iter()
                .map(|step| StepGate {
                    name: step.name.clone(),
                    execute: self.evaluate_optional(step.condition.as_ref(), event),
                })
                .collect(),
            promotion: job.promotion.as_ref().map(|promotion| PromotionGates {
                package: self.evaluate_optional(promotion.package_if.as_ref(), event),
                upload: promotion
                    .upload
                    .as_ref()
                    .is_some_and(|u| self.evaluate_optional(u.condition.as_ref(), event)),
                publish: self.evaluate(&promotion.publish_if, event),
            }),
        }
    }
}

impl Default for GateEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepGate {
    pub name: String,
    pub execute: bool,
}

/// Gate outcomes for one job, shared by every instance of its matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatePlan {
    /// One entry per step, in step order.
    pub steps: Vec<StepGate>,
    pub promotion: Option<PromotionGates>,
}

impl GatePlan {
    pub fn step(&self, index: usize) -> bool {
        self.steps.get(index).is_some_and(|g| g.execute)
    }

    pub fn step_named(&self, name: &str) -> Option<bool> {
        self.steps.iter().find(|g| g.name == name).map(|g| g.execute)
    }
}
