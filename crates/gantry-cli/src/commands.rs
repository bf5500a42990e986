//! CLI command definitions.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate workflow definitions
    Validate {
        /// Workflow file or directory (defaults to the configured workflows dir)
        path: Option<PathBuf>,
    },

    /// Show which workflows an event activates
    Resolve {
        #[command(flatten)]
        event: EventArgs,

        /// Also list matrix instances and gate outcomes
        #[arg(long)]
        expand: bool,
    },

    /// Run every workflow the event activates
    Run {
        #[command(flatten)]
        event: EventArgs,

        /// Root directory for instance workspaces
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Directory releases are published to
        #[arg(long)]
        release_dir: Option<PathBuf>,

        /// Maximum number of instances running at once
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// The triggering event, from a file or assembled from flags.
#[derive(Args, Debug, Clone, Default)]
pub struct EventArgs {
    /// Event file (JSON or YAML)
    #[arg(long, conflicts_with_all = ["event_type", "git_ref", "message", "inputs"])]
    pub event: Option<PathBuf>,

    /// Event type: push, tag_push, pull_request or manual_dispatch
    #[arg(long = "type")]
    pub event_type: Option<String>,

    /// Git ref, e.g. refs/heads/master or refs/tags/v1.0.0
    #[arg(long = "ref")]
    pub git_ref: Option<String>,

    /// Commit message
    #[arg(short, long)]
    pub message: Option<String>,

    /// Dispatch input as KEY=VALUE (repeatable)
    #[arg(long = "input", value_name = "KEY=VALUE")]
    pub inputs: Vec<String>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
