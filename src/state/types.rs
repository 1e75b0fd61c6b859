//! State types for tracking applied resources.
//!
//! These types record what the reconciler last applied successfully,
//! and are the sole source of "what exists now" between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StateError;
use crate::graph::{Attributes, Resource, ResourceId, ResourceKind};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Maximum number of history entries kept in the state document.
pub const MAX_HISTORY: usize = 100;

/// The complete persisted state of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Project the resources belong to.
    pub project_id: String,
    /// Hash of the last applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Applied resources by id.
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, AppliedState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Last-applied record of a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedState {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Identifier assigned by the provider.
    pub remote_id: String,
    /// Attributes as last applied, without sensitive keys.
    pub attributes: Attributes,
    /// Dependencies recorded at apply time, used to order deletes.
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
    /// When the resource was last created or updated.
    pub applied_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Configuration hash the run was planned from.
    pub config_hash: String,
    /// Resources the run touched.
    pub resources: Vec<String>,
    /// Whether every op succeeded.
    pub success: bool,
    /// Error that halted the run.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of runs recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Converge to the desired configuration.
    Apply,
    /// Delete every recorded resource.
    Destroy,
    /// Undo the ops of a previous run.
    Rollback,
}

impl StackState {
    /// Creates a new empty state for a project.
    #[must_use]
    pub fn new(project_id: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project_id: project_id.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets the applied record of a resource.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&AppliedState> {
        self.resources.get(id)
    }

    /// Records a resource as applied.
    pub fn record(&mut self, id: ResourceId, applied: AppliedState) {
        self.resources.insert(id, applied);
        self.last_updated = Utc::now();
    }

    /// Removes a resource record.
    pub fn remove(&mut self, id: &ResourceId) -> Option<AppliedState> {
        let removed = self.resources.remove(id);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Returns true if the id has a record.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    /// Returns the number of recorded resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }

    /// Checks that the state belongs to the expected project.
    ///
    /// # Errors
    ///
    /// Returns `ProjectMismatch` for a state recorded under another project,
    /// and `VersionMismatch` for an unknown format version.
    pub fn check_compatible(&self, project_id: &str) -> Result<(), StateError> {
        if self.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            });
        }
        if self.project_id != project_id {
            return Err(StateError::ProjectMismatch {
                expected: project_id.to_string(),
                found: self.project_id.clone(),
            });
        }
        Ok(())
    }
}

impl AppliedState {
    /// Builds the record of a resource that was just applied.
    ///
    /// Sensitive attributes are stripped.
    #[must_use]
    pub fn from_resource(resource: &Resource, remote_id: &str) -> Self {
        Self {
            kind: resource.kind(),
            remote_id: remote_id.to_string(),
            attributes: resource.diffable_attributes(),
            depends_on: resource.depends_on.clone(),
            applied_at: Utc::now(),
        }
    }
}

impl RunHistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(
        operation: RunOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: error.is_none(),
            error,
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Rollback => "rollback",
        };
        write!(f, "{op}")
    }
}
