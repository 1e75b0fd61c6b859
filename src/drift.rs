//! Drift detection against live resources.
//!
//! Drift is any divergence between what the last run applied and what the
//! provider reports now. Detection is read-only.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ReconcileError, Result};
use crate::graph::ResourceId;
use crate::planner::{FieldChange, compare_recorded};
use crate::provider::ProviderClient;
use crate::state::StackState;

/// Detects drift between applied state and live resources.
pub struct DriftDetector<'a> {
    /// Provider client used to read live attributes.
    provider: &'a dyn ProviderClient,
}

/// Kind of drift found on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftKind {
    /// The provider no longer has the resource.
    Missing,
    /// Last-applied attributes differ from live ones.
    Changed {
        /// Differing fields: `old` is last-applied, `new` is live.
        fields: Vec<FieldChange>,
    },
}

/// Drift found on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Resource id.
    pub id: ResourceId,
    /// Remote identifier that was read.
    pub remote_id: String,
    /// What drifted.
    #[serde(flatten)]
    pub kind: DriftKind,
}

impl<'a> DriftDetector<'a> {
    /// Creates a new drift detector.
    #[must_use]
    pub const fn new(provider: &'a dyn ProviderClient) -> Self {
        Self { provider }
    }

    /// Reads every recorded resource and reports the ones that drifted.
    ///
    /// Reports follow the state's resource order. An empty result means no
    /// drift.
    ///
    /// # Errors
    ///
    /// Returns the first provider error other than not-found, tagged with
    /// the resource it occurred on.
    pub async fn detect(&self, state: &StackState) -> Result<Vec<DriftReport>> {
        info!("Checking {} resources for drift", state.len());
        let mut reports = Vec::new();

        for (id, applied) in &state.resources {
            let live = match self.provider.read(&applied.remote_id).await {
                Ok(live) => live,
                Err(ProviderError::NotFound { .. }) => {
                    warn!("{id} is missing remotely");
                    reports.push(DriftReport {
                        id: id.clone(),
                        remote_id: applied.remote_id.clone(),
                        kind: DriftKind::Missing,
                    });
                    continue;
                }
                Err(source) => {
                    return Err(ReconcileError::ResourceFailed {
                        action: String::from("read"),
                        resource: id.to_string(),
                        source,
                    }
                    .into());
                }
            };

            let fields = compare_recorded(&applied.attributes, &live);
            if fields.is_empty() {
                debug!("{id} matches live state");
                continue;
            }

            warn!("{id} drifted on {} fields", fields.len());
            reports.push(DriftReport {
                id: id.clone(),
                remote_id: applied.remote_id.clone(),
                kind: DriftKind::Changed { fields },
            });
        }

        info!("Drift check found {} drifted resources", reports.len());
        Ok(reports)
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            DriftKind::Missing => write!(f, "{} is missing ({})", self.id, self.remote_id),
            DriftKind::Changed { fields } => {
                write!(f, "{} changed:", self.id)?;
                for field in fields {
                    write!(f, "\n    {field}")?;
                }
                Ok(())
            }
        }
    }
}
