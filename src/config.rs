use anyhow::{Context, Result};
use declarative::{ExecuteOptions, FailurePolicy, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings from `terrace.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub state: StateSettings,
    pub apply: ApplySettings,
    pub retry: RetrySettings,
    pub provider: ProviderSettings,
    /// Per-type schema hints, keyed by resource type
    pub schema: BTreeMap<String, TypeSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateSettings {
    pub path: String,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            path: "terrace.state.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplySettings {
    pub jobs: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            jobs: 4,
            failure_policy: FailurePolicy::Halt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Local,
    Exec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Program to run for the `exec` provider
    pub command: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypeSchema {
    /// Attributes that cannot change in place
    pub replace_on: Vec<String>,
}

impl Settings {
    /// Load settings; a missing file gives the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read settings file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// State file location, with `~` expanded
    pub fn state_path(&self, overridden: Option<&Path>) -> PathBuf {
        match overridden {
            Some(path) => expand(&path.to_string_lossy()),
            None => expand(&self.state.path),
        }
    }

    /// Execution options after CLI overrides
    pub fn execute_options(&self, jobs: Option<usize>, continue_on_error: bool) -> ExecuteOptions {
        ExecuteOptions {
            jobs: jobs.unwrap_or(self.apply.jobs).max(1),
            failure_policy: if continue_on_error {
                FailurePolicy::Continue
            } else {
                self.apply.failure_policy
            },
            retry: self.retry.to_config(),
        }
    }

    /// Replace triggers from `[schema.<type>]`
    pub fn replace_on(&self) -> BTreeMap<String, Vec<String>> {
        self.schema
            .iter()
            .map(|(t, schema)| (t.clone(), schema.replace_on.clone()))
            .collect()
    }
}

/// Expand `~` in a configured path
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
