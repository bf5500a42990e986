//! Repository events that start an orchestration run.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const BRANCH_REF_PREFIX: &str = "refs/heads/";
pub const TAG_REF_PREFIX: &str = "refs/tags/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    TagPush,
    PullRequest,
    #[serde(alias = "workflow_dispatch")]
    ManualDispatch,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Push => "push",
            EventType::TagPush => "tag_push",
            EventType::PullRequest => "pull_request",
            EventType::ManualDispatch => "manual_dispatch",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "push" => Ok(EventType::Push),
            "tag_push" => Ok(EventType::TagPush),
            "pull_request" => Ok(EventType::PullRequest),
            "manual_dispatch" | "workflow_dispatch" => Ok(EventType::ManualDispatch),
            other => Err(Error::InvalidEvent(format!("unknown event type: {}", other))),
        }
    }
}

/// A single occurrence from source control capable of starting a run.
///
/// Fields are private so an event cannot change once a run holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    commit_message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    dispatch_inputs: BTreeMap<String, String>,
}

impl Event {
    /// Build and validate an event.
    pub fn new(
        event_type: EventType,
        git_ref: impl Into<String>,
        commit_message: impl Into<String>,
        dispatch_inputs: BTreeMap<String, String>,
    ) -> Result<Self> {
        let event = Self {
            event_type,
            git_ref: git_ref.into(),
            commit_message: commit_message.into(),
            dispatch_inputs,
        };
        event.validate()?;
        Ok(event)
    }

    pub fn push(git_ref: impl Into<String>, commit_message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Push,
            git_ref: git_ref.into(),
            commit_message: commit_message.into(),
            dispatch_inputs: BTreeMap::new(),
        }
    }

    pub fn tag_push(git_ref: impl Into<String>, commit_message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::TagPush,
            git_ref: git_ref.into(),
            commit_message: commit_message.into(),
            dispatch_inputs: BTreeMap::new(),
        }
    }

    pub fn pull_request(git_ref: impl Into<String>, commit_message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::PullRequest,
            git_ref: git_ref.into(),
            commit_message: commit_message.into(),
            dispatch_inputs: BTreeMap::new(),
        }
    }

    pub fn manual_dispatch(
        git_ref: impl Into<String>,
        dispatch_inputs: BTreeMap<String, String>,
    ) -> Self {
        Self {
            event_type: EventType::ManualDispatch,
            git_ref: git_ref.into(),
            commit_message: String::new(),
            dispatch_inputs,
        }
    }

    /// Load an event from a JSON or YAML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let event: Event = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        event.validate()?;
        Ok(event)
    }

    /// Check the boundary schema rules that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.git_ref.trim().is_empty() {
            return Err(Error::InvalidEvent("ref must not be empty".into()));
        }
        if !self.dispatch_inputs.is_empty() && self.event_type != EventType::ManualDispatch {
            return Err(Error::InvalidEvent(format!(
                "dispatch_inputs are only allowed on manual_dispatch events, got {}",
                self.event_type
            )));
        }
        Ok(())
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    pub fn commit_message(&self) -> &str {
        &self.commit_message
    }

    pub fn dispatch_inputs(&self) -> &BTreeMap<String, String> {
        &self.dispatch_inputs
    }

    /// Branch name, present for events that run on a branch head.
    pub fn branch(&self) -> Option<&str> {
        match self.event_type {
            EventType::Push | EventType::PullRequest | EventType::ManualDispatch => self
                .git_ref
                .strip_prefix(BRANCH_REF_PREFIX)
                .filter(|b| !b.is_empty()),
            EventType::TagPush => None,
        }
    }

    /// Tag name, present only for tag pushes.
    pub fn tag(&self) -> Option<&str> {
        match self.event_type {
            EventType::TagPush => self
                .git_ref
                .strip_prefix(TAG_REF_PREFIX)
                .filter(|t| !t.is_empty()),
            _ => None,
        }
    }
}
