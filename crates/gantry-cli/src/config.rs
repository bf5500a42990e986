//! CLI configuration management.

use anyhow::{Context, anyhow};
use gantry_runner::RunnerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory scanned for workflow definitions.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,
    /// Root of the per-run instance workspaces.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Filesystem release store root.
    #[serde(default = "default_release_dir")]
    pub release_dir: PathBuf,
    /// Concurrency limit for instances.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Timeout guard for a single action. `None` disables it.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: Option<u64>,
    /// Shell program used by the `shell` action.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_timeout_seconds() -> Option<u64> {
    RunnerConfig::default().timeout_seconds
}

fn default_shell() -> String {
    RunnerConfig::default().shell
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from(".gantry/workflows")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".gantry/work")
}

fn default_release_dir() -> PathBuf {
    PathBuf::from(".gantry/releases")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            workflows_dir: default_workflows_dir(),
            work_dir: default_work_dir(),
            release_dir: default_release_dir(),
            max_parallel: None,
            timeout_seconds: default_timeout_seconds(),
            shell: default_shell(),
            output_format: OutputFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::from_yaml(&content).with_context(|| format!("parsing {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Save configuration to file.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "gantry", "gantry")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            timeout_seconds: self.timeout_seconds,
            shell: self.shell.clone(),
        }
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "workflows_dir" => self.workflows_dir = PathBuf::from(value),
            "work_dir" => self.work_dir = PathBuf::from(value),
            "release_dir" => self.release_dir = PathBuf::from(value),
            "max_parallel" => {
                self.max_parallel = match value {
                    "" | "none" => None,
                    n => match n.parse::<usize>() {
                        Ok(0) | Err(_) => return Err(format!("Invalid max_parallel: {}", value)),
                        Ok(n) => Some(n),
                    },
                };
            }
            "timeout_seconds" => {
                self.timeout_seconds = match value {
                    "" | "none" => None,
                    n => match n.parse::<u64>() {
                        Ok(0) | Err(_) => return Err(format!("Invalid timeout_seconds: {}", value)),
                        Ok(n) => Some(n),
                    },
                };
            }
            "shell" => {
                if value.trim().is_empty() {
                    return Err("shell must not be empty".to_string());
                }
                self.shell = value.to_string();
            }
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_keys_use_defaults() {
        let config = CliConfig::from_yaml("max_parallel: 2\n").unwrap();
        assert_eq!(config.workflows_dir, PathBuf::from(".gantry/workflows"));
        assert_eq!(config.release_dir, PathBuf::from(".gantry/releases"));
        assert_eq!(config.max_parallel, Some(2));
        assert_eq!(config.output_format, OutputFormat::Table);
        assert_eq!(config.timeout_seconds, Some(3600));
        assert_eq!(config.shell, "sh");
    }

    #[test]
    fn test_runner_settings() {
        let mut config = CliConfig::from_yaml("timeout_seconds: 120\nshell: bash\n").unwrap();
        let runner = config.runner_config();
        assert_eq!(runner.timeout_seconds, Some(120));
        assert_eq!(runner.shell, "bash");

        config.set("timeout_seconds", "none").unwrap();
        config.set("shell", "zsh").unwrap();
        assert_eq!(config.runner_config().timeout_seconds, None);
        assert_eq!(config.runner_config().shell, "zsh");

        assert!(config.set("timeout_seconds", "0").is_err());
        assert!(config.set("shell", " ").is_err());
    }

    #[test]
    fn test_set_values() {
        let mut config = CliConfig::default();
        config.set("work_dir", "/tmp/gantry").unwrap();
        config.set("max_parallel", "4").unwrap();
        config.set("output_format", "json").unwrap();

        assert_eq!(config.work_dir, PathBuf::from("/tmp/gantry"));
        assert_eq!(config.max_parallel, Some(4));
        assert_eq!(config.output_format, OutputFormat::Json);

        config.set("max_parallel", "none").unwrap();
        assert_eq!(config.max_parallel, None);
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let mut config = CliConfig::default();
        assert!(config.set("api_url", "http://localhost").is_err());
        assert!(config.set("max_parallel", "0").is_err());
        assert!(config.set("output_format", "xml").is_err());
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = CliConfig::default();
        config.set("output_format", "yaml").unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(CliConfig::from_yaml(&yaml).unwrap(), config);
    }
}
