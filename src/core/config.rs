//! Component configuration, and the workflow file loaded by the binary

use crate::core::{
    error::{CoreError, CoreResult},
    filter::MetadataFilter,
};
use crate::events::MatchType;
use crate::execution::coordinator::ExceptionStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// How often, and how far apart, connection attempts are made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts; -1 retries forever
    pub max_attempts: i32,
    /// Fixed delay between attempts
    pub retry_interval_ms: u64,
}

impl RetryPolicy {
    pub const UNLIMITED: i32 = -1;

    pub fn new(max_attempts: i32, retry_interval: Duration) -> Self {
        Self {
            max_attempts,
            retry_interval_ms: retry_interval.as_millis() as u64,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_attempts == Self::UNLIMITED
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn validate(&self, component: &str) -> CoreResult<()> {
        if self.max_attempts == 0 || self.max_attempts < Self::UNLIMITED {
            return Err(CoreError::configuration(
                component,
                format!("max_attempts must be positive or -1, got {}", self.max_attempts),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::UNLIMITED,
            retry_interval_ms: 60_000,
        }
    }
}

/// Whether a chain works on the caller's message or on a copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainMode {
    #[default]
    Direct,
    Clone,
}

/// Which metadata keys a clone-mode chain copies back to the original
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MetadataFilterConfig {
    #[default]
    RemoveAll,
    PassAll,
    Regex {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub mode: ChainMode,
    /// Reset a step's lifecycle after it fails
    pub restart_on_exception: bool,
    /// Give the clone a fresh id (clone mode only)
    pub new_unique_id_per_message: bool,
    pub override_metadata_filter: MetadataFilterConfig,
}

/// Per-step failure policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepOptions {
    pub continue_on_fail: bool,
}

/// Worker pool sizing for fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_workers: usize,
    /// Join deadline; none waits forever
    pub timeout_ms: Option<u64>,
}

impl CoordinatorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self, component: &str) -> CoreResult<()> {
        if self.max_workers == 0 {
            return Err(CoreError::configuration(component, "max_workers must be at least 1"));
        }
        if self.max_workers > u32::MAX as usize {
            return Err(CoreError::configuration(component, "max_workers is too large"));
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            timeout_ms: None,
        }
    }
}

/// A step as written in a workflow file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,

    #[serde(flatten)]
    pub options: StepOptions,

    #[serde(flatten)]
    pub service: ServiceConfig,
}

/// Built-in services a workflow file can name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "kebab-case")]
pub enum ServiceConfig {
    AddMetadata {
        metadata: BTreeMap<String, String>,
    },
    UniqueId {
        /// Assign this id instead of generating one
        #[serde(default)]
        fixed: Option<String>,
    },
    StopProcessing,
    SplitJoin {
        #[serde(default = "default_delimiter")]
        delimiter: String,
        #[serde(default)]
        coordinator: CoordinatorConfig,
        #[serde(default)]
        strategy: ExceptionStrategy,
        /// Service applied to every part
        worker: Box<ServiceConfig>,
    },
}

fn default_delimiter() -> String {
    "\n".to_string()
}

impl ServiceConfig {
    fn validate(&self, component: &str) -> CoreResult<()> {
        match self {
            ServiceConfig::AddMetadata { metadata } => {
                if metadata.keys().any(|k| k.is_empty()) {
                    return Err(CoreError::configuration(component, "metadata keys must not be empty"));
                }
                Ok(())
            }
            ServiceConfig::UniqueId { fixed } => match fixed {
                Some(id) if id.trim().is_empty() => {
                    Err(CoreError::configuration(component, "fixed id must not be empty"))
                }
                _ => Ok(()),
            },
            ServiceConfig::StopProcessing => Ok(()),
            ServiceConfig::SplitJoin {
                delimiter,
                coordinator,
                strategy,
                worker,
            } => {
                if delimiter.is_empty() {
                    return Err(CoreError::configuration(component, "delimiter must not be empty"));
                }
                coordinator.validate(component)?;
                strategy.validate(component)?;
                worker.validate(component)
            }
        }
    }
}

/// Where routed events end up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SenderKind {
    #[default]
    Log,
    Null,
    /// The workflow's own producer
    Producer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    #[serde(rename = "match")]
    pub match_on: Vec<MatchType>,
    pub sender: SenderKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub rules: Vec<RuleConfig>,
    pub default_sender: SenderKind,
}

/// How the stdout producer renders messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Payload,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub retry: RetryPolicy,
}

/// Top-level workflow file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub steps: Vec<StepConfig>,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub output: OutputFormat,
}

impl WorkflowConfig {
    /// Load a workflow from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a workflow from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml).context("Invalid workflow YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that would otherwise fail while building components
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Workflow name must not be empty");
        }

        self.connection.retry.validate(&format!("{}-connection", self.name))?;
        MetadataFilter::from_config(&self.chain.override_metadata_filter, &self.name)?;

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                anyhow::bail!("Step name must not be empty");
            }
            if !seen.insert(step.name.as_str()) {
                anyhow::bail!("Duplicate step name: {}", step.name);
            }
            step.service
                .validate(&step.name)
                .with_context(|| format!("Step '{}' is invalid", step.name))?;
        }

        for (index, rule) in self.events.rules.iter().enumerate() {
            if rule.match_on.is_empty() {
                anyhow::bail!("Event rule {} selects no attributes", index);
            }
            regex::Regex::new(&rule.pattern)
                .with_context(|| format!("Event rule {} has an invalid pattern", index))?;
        }

        Ok(())
    }
}
