//! Gate predicates guarding optional steps.
//!
//! Conditions form a closed set of primitive predicates over the triggering
//! [`Event`](crate::event::Event), combined with explicit `all` / `any`
//! combinators. There is no expression language: every gate a workflow can
//! declare is one of these variants.
//!
//! ```yaml
//! condition:
//!   any:
//!     - ref_equals: refs/heads/master
//!     - message_contains: "[deploy]"
//! ```

use crate::event::{EventType, TAG_REF_PREFIX};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    MessageContains(String),
    RefEquals(String),
    RefStartsWith(String),
    EventTypeIs(EventType),
    /// Logical AND. Empty is true.
    All(Vec<Condition>),
    /// Logical OR. Empty is false.
    Any(Vec<Condition>),
}

impl Condition {
    pub fn message_contains(marker: impl Into<String>) -> Self {
        Condition::MessageContains(marker.into())
    }

    pub fn ref_equals(value: impl Into<String>) -> Self {
        Condition::RefEquals(value.into())
    }

    pub fn ref_starts_with(prefix: impl Into<String>) -> Self {
        Condition::RefStartsWith(prefix.into())
    }

    pub fn event_type_is(event_type: EventType) -> Self {
        Condition::EventTypeIs(event_type)
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::All(mut terms) => {
                terms.push(other);
                Condition::All(terms)
            }
            first => Condition::All(vec![first, other]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Any(mut terms) => {
                terms.push(other);
                Condition::Any(terms)
            }
            first => Condition::Any(vec![first, other]),
        }
    }

    /// Default gate of the publish stage.
    pub fn publish_gate() -> Self {
        Condition::event_type_is(EventType::TagPush).and(Condition::ref_starts_with(TAG_REF_PREFIX))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::MessageContains(m) => write!(f, "message_contains({:?})", m),
            Condition::RefEquals(v) => write!(f, "ref_equals({:?})", v),
            Condition::RefStartsWith(p) => write!(f, "ref_starts_with({:?})", p),
            Condition::EventTypeIs(t) => write!(f, "event_type_is({})", t),
            Condition::All(terms) => write_joined(f, terms, " AND ", "true"),
            Condition::Any(terms) => write_joined(f, terms, " OR ", "false"),
        }
    }
}

fn write_joined(
    f: &mut fmt::Formatter<'_>,
    terms: &[Condition],
    sep: &str,
    empty: &str,
) -> fmt::Result {
    if terms.is_empty() {
        return f.write_str(empty);
    }
    f.write_str("(")?;
    for (idx, term) in terms.iter().enumerate() {
        if idx > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", term)?;
    }
    f.write_str(")")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_and_flattens() {
        let cond = Condition::ref_equals("a")
            .and(Condition::ref_equals("b"))
            .and(Condition::ref_equals("c"));
        match cond {
            Condition::All(terms) => assert_eq!(terms.len(), 3),
            other => panic!("expected All, got {:?}", other),
        }
    }

    #[test]
    fn test_yaml_singleton_map_form() {
        let yaml = r#"
any:
  - ref_equals: refs/heads/master
  - message_contains: "[deploy]"
"#;
        let cond: Condition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cond,
            Condition::ref_equals("refs/heads/master").or(Condition::message_contains("[deploy]"))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Condition::publish_gate().to_string(),
            "(event_type_is(tag_push) AND ref_starts_with(\"refs/tags/\"))"
        );
    }
}
