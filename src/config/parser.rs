//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files, environment
//! variables and command-line overrides, applied in that order.

use crate::error::{ConfigError, Result, RunstackError};
use std::path::Path;
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Environment variable holding the provider API token.
pub const PROVIDER_TOKEN_VAR: &str = "RUNSTACK_PROVIDER_TOKEN";

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(RunstackError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            RunstackError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            RunstackError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed configuration for project: {}", config.stack.project_id);
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Recognized variables: `RUNSTACK_PROJECT_ID`, `RUNSTACK_REGION` and
    /// `RUNSTACK_PROVIDER_ENDPOINT`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut DeployConfig) {
        if let Ok(project_id) = std::env::var("RUNSTACK_PROJECT_ID") {
            debug!("Overriding stack.project_id from environment");
            config.stack.project_id = project_id;
        }

        if let Ok(region) = std::env::var("RUNSTACK_REGION") {
            debug!("Overriding stack.region from environment");
            config.stack.region = region;
        }

        if let Ok(endpoint) = std::env::var("RUNSTACK_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }
    }

    /// Applies `key=value` overrides to the stack options.
    ///
    /// Only the stack's recognized keys can be set this way.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed assignment, an unknown key, or a
    /// value that does not parse for its key.
    pub fn apply_overrides(config: &mut DeployConfig, assignments: &[String]) -> Result<()> {
        for assignment in assignments {
            let invalid = |message: &str| {
                RunstackError::Config(ConfigError::InvalidOverride {
                    assignment: assignment.clone(),
                    message: message.to_string(),
                })
            };

            let (key, value) = assignment
                .split_once('=')
                .ok_or_else(|| invalid("expected key=value"))?;
            let (key, value) = (key.trim(), value.trim());
            let stack = &mut config.stack;

            match key {
                "project_id" => stack.project_id = value.to_string(),
                "region" => stack.region = value.to_string(),
                "db_tier" => stack.db_tier = value.to_string(),
                "custom_domain" => stack.custom_domain = value.to_string(),
                "use_custom_image" => {
                    stack.use_custom_image = value
                        .parse()
                        .map_err(|_| invalid("expected true or false"))?;
                }
                "min_instances" => {
                    stack.min_instances = value
                        .parse()
                        .map_err(|_| invalid("expected a non-negative integer"))?;
                }
                "max_instances" => {
                    stack.max_instances = value
                        .parse()
                        .map_err(|_| invalid("expected a non-negative integer"))?;
                }
                _ => return Err(invalid("unknown stack option")),
            }

            debug!("Override applied: stack.{key}");
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                RunstackError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the provider API token from the environment, if set.
    #[must_use]
    pub fn get_provider_token() -> Option<String> {
        std::env::var(PROVIDER_TOKEN_VAR).ok().filter(|t| !t.is_empty())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["runstack.yaml", "runstack.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(RunstackError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
stack:
  project_id: acme-dev
  region: us-central1
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("minimal config parses");

        assert_eq!(config.stack.project_id, "acme-dev");
        assert_eq!(config.stack.db_tier, "db-f1-micro");
        assert!(config.provider.endpoint.is_none());
        assert_eq!(config.execution.max_retries, 3);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
stack:
  project_id: acme-prod
  region: europe-west1
  use_custom_image: true
  db_tier: db-g1-small
  custom_domain: app.acme.dev
  min_instances: 1
  max_instances: 1

state:
  path: .state

provider:
  endpoint: https://provision.example.com
  request_timeout_secs: 10

execution:
  run_timeout_secs: 120
  max_retries: 2
  backoff_base_ms: 250
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("full config parses");

        assert!(config.stack.use_custom_image);
        assert_eq!(config.stack.custom_domain, "app.acme.dev");
        assert_eq!(config.state.path.as_deref(), Some(".state"));
        assert_eq!(config.provider.request_timeout_secs, 10);
        assert_eq!(config.execution.backoff_base_ms, 250);
    }

    #[test]
    fn test_missing_stack_section_fails() {
        let parser = ConfigParser::new();
        assert!(parser.parse_yaml("state: {}\n", None).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let parser = ConfigParser::new();
        let mut config = parser
            .parse_yaml("stack:\n  project_id: acme\n  region: us-east1\n", None)
            .expect("parse");

        let sets = vec![
            String::from("use_custom_image=true"),
            String::from("max_instances = 3"),
            String::from("db_tier=db-custom-1-3840"),
        ];
        ConfigParser::apply_overrides(&mut config, &sets).expect("overrides apply");

        assert!(config.stack.use_custom_image);
        assert_eq!(config.stack.max_instances, 3);
        assert_eq!(config.stack.db_tier, "db-custom-1-3840");
    }

    #[test]
    fn test_apply_overrides_rejects_bad_input() {
        let parser = ConfigParser::new();
        let mut config = parser
            .parse_yaml("stack:\n  project_id: acme\n  region: us-east1\n", None)
            .expect("parse");

        for bad in ["region", "colour=blue", "use_custom_image=yes", "min_instances=-1"] {
            let result = ConfigParser::apply_overrides(&mut config, &[bad.to_string()]);
            assert!(
                matches!(
                    result,
                    Err(RunstackError::Config(ConfigError::InvalidOverride { .. }))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("runstack.yaml"), "stack: {}\n").expect("write");

        let found = find_config_file(&nested).expect("config found");
        assert_eq!(found, dir.path().join("runstack.yaml"));
    }
}
