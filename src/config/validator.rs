//! Configuration validation for stack definitions.
//!
//! Validation runs before any provider call. It collects every error and
//! warning in one pass and reports the first error to the caller.

use crate::error::{ConfigError, Result, RunstackError};
use tracing::debug;

use super::spec::{DeployConfig, ExecutionConfig, ProviderConfig, StackOptions};

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(RunstackError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Runs every check and returns all findings without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_stack(&config.stack, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_execution(&config.execution, &mut result);

        result
    }

    /// Validates the stack options.
    fn validate_stack(stack: &StackOptions, result: &mut ValidationResult) {
        if stack.project_id.is_empty() {
            result.error("stack.project_id", "Project id cannot be empty");
        } else if !is_valid_project_id(&stack.project_id) {
            result.error(
                "stack.project_id",
                format!(
                    "Project id '{}' is invalid. Must be 6-30 characters of lowercase letters, digits and hyphens, starting with a letter.",
                    stack.project_id
                ),
            );
        }

        if !is_valid_region(&stack.region) {
            result.error(
                "stack.region",
                format!("Region '{}' is invalid (expected e.g. 'us-central1')", stack.region),
            );
        }

        if !stack.db_tier.starts_with("db-") || stack.db_tier.len() <= 3 {
            result.error(
                "stack.db_tier",
                format!("Database tier '{}' must look like 'db-f1-micro'", stack.db_tier),
            );
        }

        if !stack.custom_domain.is_empty() && !is_valid_domain(&stack.custom_domain) {
            result.error(
                "stack.custom_domain",
                format!("Custom domain '{}' is not a valid host name", stack.custom_domain),
            );
        }

        if stack.max_instances == 0 {
            result.error("stack.max_instances", "Max instances must be at least 1");
        } else if stack.min_instances > stack.max_instances {
            result.error(
                "stack.min_instances",
                format!(
                    "Min instances ({}) cannot exceed max instances ({})",
                    stack.min_instances, stack.max_instances
                ),
            );
        }

        if stack.max_instances > 1 {
            result.warnings.push(format!(
                "max_instances is {}: several instances may write to the database concurrently",
                stack.max_instances
            ));
        }
    }

    /// Validates provider configuration.
    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        if let Some(endpoint) = &provider.endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            result.error(
                "provider.endpoint",
                format!("Endpoint '{endpoint}' must start with http:// or https://"),
            );
        }

        if provider.request_timeout_secs == 0 {
            result.error("provider.request_timeout_secs", "Request timeout must be at least 1 second");
        }
    }

    /// Validates execution tuning.
    fn validate_execution(execution: &ExecutionConfig, result: &mut ValidationResult) {
        if execution.run_timeout_secs == 0 {
            result.error("execution.run_timeout_secs", "Run timeout must be at least 1 second");
        }

        if execution.max_retries > 10 {
            result.warnings.push(format!(
                "max_retries is {}: a failing op may hold the run for a long time",
                execution.max_retries
            ));
        }
    }
}

/// Validates a cloud project id: 6-30 chars, lowercase letters, digits and
/// hyphens, starting with a letter and not ending with a hyphen.
fn is_valid_project_id(id: &str) -> bool {
    if !(6..=30).contains(&id.len()) {
        return false;
    }

    let mut chars = id.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') && !id.ends_with('-')
}

/// Validates a region name such as `us-central1` or `europe-west4`.
fn is_valid_region(region: &str) -> bool {
    let Some((area, rest)) = region.split_once('-') else {
        return false;
    };

    !area.is_empty()
        && area.chars().all(|c| c.is_ascii_lowercase())
        && rest.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && rest.chars().last().is_some_and(|c| c.is_ascii_digit())
}

/// Validates a bare host name (no scheme, no path).
fn is_valid_domain(domain: &str) -> bool {
    domain.contains('.')
        && domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

impl ValidationResult {
    /// Records an error for a field.
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
