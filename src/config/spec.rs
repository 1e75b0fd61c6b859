//! Configuration types for the reconciler.
//!
//! This module defines the structs that map to the `runstack.yaml` file.
//! The `stack` section is the desired state; the other sections tune how a
//! run reaches it.

use serde::{Deserialize, Serialize};

/// Default Cloud SQL machine tier.
pub const DEFAULT_DB_TIER: &str = "db-f1-micro";

/// The root configuration structure for a runstack deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Desired stack options.
    pub stack: StackOptions,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider endpoint configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Run execution tuning.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// The fixed set of options describing the desired stack.
///
/// Unknown keys are rejected so that a typo never silently falls back to a
/// default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StackOptions {
    /// Cloud project that owns every resource.
    pub project_id: String,
    /// Region for the database and the container service.
    pub region: String,
    /// Serve the image built from this repository instead of the prebuilt one.
    #[serde(default)]
    pub use_custom_image: bool,
    /// Database machine tier.
    #[serde(default = "default_db_tier")]
    pub db_tier: String,
    /// Custom domain mapped onto the service; empty disables the mapping.
    #[serde(default)]
    pub custom_domain: String,
    /// Minimum number of container instances.
    #[serde(default)]
    pub min_instances: u32,
    /// Maximum number of container instances.
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory holding the state and lock files.
    ///
    /// Relative paths resolve against the configuration file's directory.
    #[serde(default)]
    pub path: Option<String>,
}

/// Provider API configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Base URL of the provisioning API.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Execution tuning for apply and destroy runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Wall-clock budget for a whole run, in seconds.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Retries per op for transient provider errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl StackOptions {
    /// Creates options for a project and region with every other key defaulted.
    #[must_use]
    pub fn new(project_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
            use_custom_image: false,
            db_tier: default_db_tier(),
            custom_domain: String::new(),
            min_instances: 0,
            max_instances: default_max_instances(),
        }
    }
}

impl DeployConfig {
    /// Wraps stack options with default state, provider and execution sections.
    #[must_use]
    pub fn from_stack(stack: StackOptions) -> Self {
        Self {
            stack,
            state: StateConfig::default(),
            provider: ProviderConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

// Default value functions

fn default_db_tier() -> String {
    String::from(DEFAULT_DB_TIER)
}

const fn default_max_instances() -> u32 {
    1
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_run_timeout() -> u64 {
    900
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_base_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_defaults() {
        let yaml = "project_id: acme\nregion: us-central1\n";
        let stack: StackOptions = serde_yaml::from_str(yaml).expect("parse");

        assert!(!stack.use_custom_image);
        assert_eq!(stack.db_tier, "db-f1-micro");
        assert_eq!(stack.custom_domain, "");
        assert_eq!(stack.min_instances, 0);
        assert_eq!(stack.max_instances, 1);
        assert_eq!(stack, StackOptions::new("acme", "us-central1"));
    }

    #[test]
    fn test_unknown_stack_key_rejected() {
        let yaml = "project_id: acme\nregion: us-central1\nuse_custom_img: true\n";
        let result: std::result::Result<StackOptions, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_execution_defaults() {
        let exec = ExecutionConfig::default();
        assert_eq!(exec.max_retries, 3);
        assert_eq!(exec.backoff_base_ms, 1000);
        assert_eq!(exec.run_timeout_secs, 900);
    }
}
