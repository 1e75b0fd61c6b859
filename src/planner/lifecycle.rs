//! Per-resource lifecycle during a run.
//!
//! ```text
//! absent -> pending-create -> created -> pending-update -> created
//!                                     -> pending-delete -> absent
//! ```
//!
//! Every change passes through a pending phase; a retry re-enters the same
//! pending phase. `absent` and `created` are the only resting phases.

use serde::Serialize;

use crate::error::ReconcileError;
use crate::graph::ResourceId;

use super::plan::ChangeAction;

/// Lifecycle phase of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourcePhase {
    /// Not present remotely.
    Absent,
    /// Create in flight.
    PendingCreate,
    /// Present remotely and recorded.
    Created,
    /// Update in flight.
    PendingUpdate,
    /// Delete in flight.
    PendingDelete,
}

impl ResourcePhase {
    /// Returns the pending phase an action passes through.
    #[must_use]
    pub const fn pending_for(action: ChangeAction) -> Option<Self> {
        match action {
            ChangeAction::Create => Some(Self::PendingCreate),
            ChangeAction::Update => Some(Self::PendingUpdate),
            ChangeAction::Delete => Some(Self::PendingDelete),
            ChangeAction::NoOp => None,
        }
    }

    /// Returns the resting phase a pending phase settles into on success.
    #[must_use]
    pub const fn settled(self) -> Self {
        match self {
            Self::PendingCreate | Self::PendingUpdate | Self::Created => Self::Created,
            Self::PendingDelete | Self::Absent => Self::Absent,
        }
    }

    /// Returns true if the lifecycle allows moving from `self` to `to`.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Absent, Self::PendingCreate)
                | (Self::PendingCreate, Self::PendingCreate | Self::Created)
                | (Self::Created, Self::PendingUpdate | Self::PendingDelete)
                | (Self::PendingUpdate, Self::PendingUpdate | Self::Created)
                | (Self::PendingDelete, Self::PendingDelete | Self::Absent)
        )
    }

    /// Moves to `to`, or fails with `IllegalTransition`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransition` if the move skips or reverses a phase.
    pub fn transition(self, to: Self, resource: &ResourceId) -> Result<Self, ReconcileError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(ReconcileError::IllegalTransition {
                resource: resource.to_string(),
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl std::fmt::Display for ResourcePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::PendingCreate => "pending-create",
            Self::Created => "created",
            Self::PendingUpdate => "pending-update",
            Self::PendingDelete => "pending-delete",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceKind;

    fn id() -> ResourceId {
        ResourceId::new(ResourceKind::Secret, "db-password")
    }

    #[test]
    fn test_full_lifecycle() {
        let id = id();
        let phase = ResourcePhase::Absent
            .transition(ResourcePhase::PendingCreate, &id)
            .and_then(|p| p.transition(ResourcePhase::PendingCreate, &id))
            .and_then(|p| p.transition(ResourcePhase::Created, &id))
            .and_then(|p| p.transition(ResourcePhase::PendingUpdate, &id))
            .and_then(|p| p.transition(ResourcePhase::Created, &id))
            .and_then(|p| p.transition(ResourcePhase::PendingDelete, &id))
            .and_then(|p| p.transition(ResourcePhase::Absent, &id))
            .expect("legal lifecycle");

        assert_eq!(phase, ResourcePhase::Absent);
    }

    #[test]
    fn test_pending_phase_cannot_be_skipped() {
        let id = id();
        let err = ResourcePhase::Absent
            .transition(ResourcePhase::Created, &id)
            .expect_err("skips pending-create");

        assert_eq!(
            err,
            ReconcileError::IllegalTransition {
                resource: String::from("secret/db-password"),
                from: String::from("absent"),
                to: String::from("created"),
            }
        );
        assert!(!ResourcePhase::Created.can_transition(ResourcePhase::Absent));
        assert!(!ResourcePhase::Absent.can_transition(ResourcePhase::PendingDelete));
        assert!(!ResourcePhase::Created.can_transition(ResourcePhase::PendingCreate));
    }

    #[test]
    fn test_settled_phase() {
        assert_eq!(ResourcePhase::PendingUpdate.settled(), ResourcePhase::Created);
        assert_eq!(ResourcePhase::PendingDelete.settled(), ResourcePhase::Absent);
        assert_eq!(
            ResourcePhase::pending_for(ChangeAction::Delete),
            Some(ResourcePhase::PendingDelete)
        );
        assert_eq!(ResourcePhase::pending_for(ChangeAction::NoOp), None);
    }
}
