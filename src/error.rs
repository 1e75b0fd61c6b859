//! Error types for the runstack reconciler.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, resource graph, state storage, provider calls,
//! planning, and execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the runstack reconciler.
#[derive(Debug, Error)]
pub enum RunstackError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A `--set key=value` override could not be applied.
    #[error("Invalid override '{assignment}': {message}")]
    InvalidOverride {
        /// The raw assignment as given on the command line.
        assignment: String,
        /// Why it was rejected.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Writing the state to its backend failed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error(
        "State is locked by another process (lock holder: {holder}, since: {since}, expires in {expires_in_secs}s)"
    )]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
        /// Seconds until the lock expires.
        expires_in_secs: i64,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// State belongs to a different project.
    #[error("State belongs to project '{found}', configuration targets '{expected}'")]
    ProjectMismatch {
        /// Project id from the configuration.
        expected: String,
        /// Project id recorded in the state.
        found: String,
    },
}

/// Errors returned by a provider client.
///
/// Variants split into transient ones, which the executor retries, and
/// permanent ones, which halt the run on the first occurrence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider throttled the request.
    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds the provider asked us to wait.
        retry_after_secs: u64,
    },

    /// The request timed out.
    #[error("request timed out: {message}")]
    Timeout {
        /// Description of the timeout.
        message: String,
    },

    /// The provider is temporarily unavailable (5xx, transport failure).
    #[error("provider unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The provider rejected the request payload.
    #[error("request rejected: {message}")]
    Validation {
        /// Provider message.
        message: String,
    },

    /// The caller lacks permission.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Provider message.
        message: String,
    },

    /// The resource conflicts with existing remote state.
    #[error("conflict: {message}")]
    Conflict {
        /// Provider message.
        message: String,
    },

    /// The remote resource does not exist.
    #[error("remote resource not found: {remote_id}")]
    NotFound {
        /// Remote identifier that was looked up.
        remote_id: String,
    },

    /// The provider answered with something we could not interpret.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    /// The resource graph contains a dependency cycle.
    #[error("Dependency cycle detected between: {}", .resources.join(", "))]
    Cycle {
        /// Resources that could not be ordered.
        resources: Vec<String>,
    },

    /// A resource depends on an id that is not part of the graph.
    #[error("Resource '{resource}' depends on unknown resource '{dependency}'")]
    UnknownDependency {
        /// The dependent resource.
        resource: String,
        /// The missing dependency.
        dependency: String,
    },

    /// The same resource id was declared twice.
    #[error("Duplicate resource id: {id}")]
    DuplicateResource {
        /// The duplicated id.
        id: String,
    },

    /// The recorded state changed between showing a plan and applying it.
    #[error("State changed since the plan was computed ({previewed} ops previewed, {current} now); run plan again")]
    StateChanged {
        /// Ops in the plan that was shown.
        previewed: usize,
        /// Ops in the plan computed under the lock.
        current: usize,
    },
}

/// Errors raised while applying a plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// A provider call failed for a specific resource.
    #[error("Failed to {action} {resource}: {source}")]
    ResourceFailed {
        /// Action that was attempted.
        action: String,
        /// Resource id.
        resource: String,
        /// Underlying provider error.
        #[source]
        source: ProviderError,
    },

    /// The run exceeded its wall-clock budget.
    #[error("Run timed out after {elapsed_secs}s (budget {budget_secs}s) before {resource} could proceed")]
    Timeout {
        /// Resource that was about to be processed.
        resource: String,
        /// Seconds elapsed when the budget check failed.
        elapsed_secs: u64,
        /// Configured budget in seconds.
        budget_secs: u64,
    },

    /// An illegal lifecycle transition was requested.
    #[error("Illegal lifecycle transition for {resource}: {from} -> {to}")]
    IllegalTransition {
        /// Resource id.
        resource: String,
        /// Current phase.
        from: String,
        /// Requested phase.
        to: String,
    },

    /// Applied changes could not be written to the state store.
    #[error("Failed to persist state after {after}: {message}")]
    StateNotSaved {
        /// Resource whose change was not persisted, or the run as a whole.
        after: String,
        /// Underlying store error.
        message: String,
    },

    /// An op could not be executed because its inputs are incomplete.
    #[error("Cannot execute {action} for {resource}: {reason}")]
    MalformedOp {
        /// Action of the op.
        action: String,
        /// Resource id.
        resource: String,
        /// What is missing.
        reason: String,
    },
}

/// Result type alias for runstack operations.
pub type Result<T> = std::result::Result<T, RunstackError>;

impl RunstackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Returns true for errors worth retrying (rate limit, timeout, unavailable).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Unavailable { .. }
        )
    }

    /// Returns the provider's suggested retry delay in seconds, if any.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a permission-denied error.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(remote_id: impl Into<String>) -> Self {
        Self::NotFound {
            remote_id: remote_id.into(),
        }
    }
}
