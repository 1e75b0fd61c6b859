//! Change plan types and construction.
//!
//! A plan is the ordered list of ops that converges applied state to the
//! desired graph. It holds only actionable ops; unchanged resources are
//! listed separately for display.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::error::PlanError;
use crate::graph::{Attributes, Resource, ResourceGraph, ResourceId, ResourceKind};
use crate::state::{AppliedState, RunOperation, StackState};

use super::diff::{
    DiffEngine, DiffResult, DiffType, FieldChange, compare_attributes, reverse_dependency_order,
};
use super::executor::{ExecutionResult, OpStatus};

/// A complete change plan.
#[derive(Debug, Clone)]
pub struct ChangePlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Kind of run the plan belongs to.
    pub operation: RunOperation,
    /// Ops in execution order.
    pub ops: Vec<ChangeOp>,
    /// Desired resources that already match their applied state.
    pub unchanged: Vec<ResourceId>,
}

/// A single planned change to one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeOp {
    /// Target resource.
    pub id: ResourceId,
    /// What to do.
    pub action: ChangeAction,
    /// Why.
    pub reason: String,
    /// Desired resource (create and update).
    pub desired: Option<Resource>,
    /// Remote identifier (update and delete).
    pub remote_id: Option<String>,
    /// Field-level changes (update).
    pub changes: Vec<FieldChange>,
}

/// Types of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// Leave the resource alone.
    NoOp,
}

/// Counts of ops per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update.
    pub update: usize,
    /// Resources to delete.
    pub delete: usize,
    /// Resources left as they are.
    pub unchanged: usize,
}

/// Plans the changes that converge `current` to `desired`.
///
/// # Errors
///
/// Returns a `PlanError` if the desired graph is cyclic or has dangling
/// dependencies, or if recorded dependencies are cyclic.
pub fn plan(
    desired: &ResourceGraph,
    current: &StackState,
    config_hash: &str,
) -> Result<ChangePlan, PlanError> {
    let diff = DiffEngine::new().compute_diff(desired, current)?;
    Ok(ChangePlan::from_diff(diff, config_hash))
}

/// Plans the deletion of every recorded resource, dependents first.
///
/// # Errors
///
/// Returns `Cycle` if the recorded dependencies are cyclic.
pub fn plan_destroy(current: &StackState, config_hash: &str) -> Result<ChangePlan, PlanError> {
    let records: Vec<_> = current.resources.iter().collect();
    let ops = reverse_dependency_order(&records)?
        .into_iter()
        .map(|pos| {
            let (id, applied) = records[pos];
            ChangeOp::delete(id, applied, "destroy requested")
        })
        .collect();

    Ok(ChangePlan {
        operation: RunOperation::Destroy,
        ops,
        ..ChangePlan::empty(config_hash)
    })
}

impl ChangePlan {
    /// Creates a plan from a diff result.
    #[must_use]
    pub fn from_diff(diff: DiffResult, config_hash: &str) -> Self {
        let mut plan = Self::empty(config_hash);

        for resource_diff in diff.diffs {
            let id = resource_diff.id;
            match (resource_diff.diff_type, resource_diff.desired, resource_diff.applied) {
                (DiffType::Create, Some(desired), _) => {
                    plan.ops.push(ChangeOp {
                        id,
                        action: ChangeAction::Create,
                        reason: String::from("not present in state"),
                        desired: Some(desired),
                        remote_id: None,
                        changes: vec![],
                    });
                }
                (DiffType::Update, Some(desired), Some(applied)) => {
                    let fields: Vec<_> = resource_diff.changes.iter().map(|c| c.field.as_str()).collect();
                    plan.ops.push(ChangeOp {
                        id,
                        action: ChangeAction::Update,
                        reason: format!("changed: {}", fields.join(", ")),
                        desired: Some(desired),
                        remote_id: Some(applied.remote_id),
                        changes: resource_diff.changes,
                    });
                }
                (DiffType::Delete, _, Some(applied)) => {
                    plan.ops.push(ChangeOp::delete(&id, &applied, "no longer in configuration"));
                }
                _ => plan.unchanged.push(id),
            }
        }

        plan
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            operation: RunOperation::Apply,
            ops: vec![],
            unchanged: vec![],
        }
    }

    /// Builds the plan that undoes the ops `result` applied.
    ///
    /// `before` is the state as it was before the run. Applied ops are
    /// reversed in reverse order: a create becomes a delete, an update goes
    /// back to the previous attributes, a delete recreates the resource from
    /// its previous attributes. Sensitive attributes were never recorded, so
    /// recreated secrets get a fresh value from the provider.
    #[must_use]
    pub fn rollback(result: &ExecutionResult, before: &StackState) -> Self {
        let mut plan = Self {
            operation: RunOperation::Rollback,
            ..Self::empty(&before.config_hash)
        };

        for outcome in result.outcomes.iter().rev() {
            if outcome.status != OpStatus::Applied {
                continue;
            }
            let id = &outcome.op.id;
            let previous = before.get(id);

            let op = match (outcome.op.action, previous) {
                (ChangeAction::Create, _) => outcome.remote_id.clone().map(|remote_id| ChangeOp {
                    id: id.clone(),
                    action: ChangeAction::Delete,
                    reason: String::from("rollback of create"),
                    desired: None,
                    remote_id: Some(remote_id),
                    changes: vec![],
                }),
                (ChangeAction::Update, Some(previous)) => {
                    let current = outcome
                        .op
                        .desired
                        .as_ref()
                        .map(Resource::diffable_attributes)
                        .unwrap_or_default();
                    Some(ChangeOp {
                        id: id.clone(),
                        action: ChangeAction::Update,
                        reason: String::from("rollback of update"),
                        desired: Some(resource_from_record(id, previous)),
                        remote_id: outcome.remote_id.clone(),
                        changes: compare_attributes(&current, &previous.attributes),
                    })
                }
                (ChangeAction::Delete, Some(previous)) => Some(ChangeOp {
                    id: id.clone(),
                    action: ChangeAction::Create,
                    reason: String::from("rollback of delete"),
                    desired: Some(resource_from_record(id, previous)),
                    remote_id: None,
                    changes: vec![],
                }),
                _ => None,
            };

            plan.ops.extend(op);
        }

        plan
    }

    /// Returns true if the plan has no ops.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns true if any op changes a resource.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actionable().next().is_some()
    }

    /// Iterates over ops that call the provider.
    pub fn actionable(&self) -> impl Iterator<Item = &ChangeOp> {
        self.ops.iter().filter(|op| op.action != ChangeAction::NoOp)
    }

    /// Returns the number of ops with the given action.
    #[must_use]
    pub fn count(&self, action: ChangeAction) -> usize {
        self.ops.iter().filter(|op| op.action == action).count()
    }

    /// Returns per-action counts.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.count(ChangeAction::Create),
            update: self.count(ChangeAction::Update),
            delete: self.count(ChangeAction::Delete),
            unchanged: self.unchanged.len() + self.count(ChangeAction::NoOp),
        }
    }

    /// Returns the ids of every resource the plan touches.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<String> {
        self.ops.iter().map(|op| op.id.to_string()).collect()
    }
}

/// Rebuilds a desired resource from its applied record.
fn resource_from_record(id: &ResourceId, applied: &AppliedState) -> Resource {
    Resource {
        id: id.clone(),
        attributes: applied.attributes.clone(),
        depends_on: applied.depends_on.clone(),
        sensitive: BTreeSet::new(),
    }
}

impl ChangeOp {
    /// Creates a delete op for a recorded resource.
    #[must_use]
    pub fn delete(id: &ResourceId, applied: &AppliedState, reason: &str) -> Self {
        Self {
            id: id.clone(),
            action: ChangeAction::Delete,
            reason: reason.to_string(),
            desired: None,
            remote_id: Some(applied.remote_id.clone()),
            changes: vec![],
        }
    }

    /// Returns the kind of the target resource.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    /// Returns the attributes sent to the provider, if any.
    #[must_use]
    pub fn attributes(&self) -> Option<&Attributes> {
        self.desired.as_ref().map(|r| &r.attributes)
    }

    /// Returns a human-readable description of the op.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            ChangeAction::Create => format!("Create {}", self.id),
            ChangeAction::Update => format!("Update {}", self.id),
            ChangeAction::Delete => format!("Delete {}", self.id),
            ChangeAction::NoOp => format!("No change for {}", self.id),
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ChangePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ops.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Change plan ({} ops):", self.ops.len())?;
        for (i, op) in self.ops.iter().enumerate() {
            writeln!(f, "  {}. {op}", i + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackOptions;
    use crate::graph::{build_stack_graph, ids};

    fn stack() -> StackOptions {
        StackOptions::new("acme-prod", "us-central1")
    }

    /// State as a fully successful apply of `graph` would leave it.
    fn applied_state(graph: &ResourceGraph) -> StackState {
        let mut state = StackState::new("acme-prod");
        for resource in graph.iter() {
            state.record(
                resource.id.clone(),
                AppliedState::from_resource(resource, &format!("{}#1", resource.id)),
            );
        }
        state
    }

    #[test]
    fn test_empty_state_plans_seven_creates_in_order() {
        let graph = build_stack_graph(&stack()).expect("graph");
        let plan = plan(&graph, &StackState::new("acme-prod"), "h1").expect("plan");

        assert_eq!(plan.ops.len(), 7);
        assert!(plan.ops.iter().all(|op| op.action == ChangeAction::Create));
        assert_eq!(plan.ops[0].id, ids::service_account());
        assert_eq!(plan.ops[3].id, ids::database());
        assert_eq!(plan.ops[6].id, ids::compute_service());
        assert_eq!(plan.summary().create, 7);
    }

    #[test]
    fn test_plan_after_apply_is_empty() {
        let graph = build_stack_graph(&stack()).expect("graph");
        let state = applied_state(&graph);

        let plan = plan(&graph, &state, "h1").expect("plan");
        assert!(plan.is_empty());
        assert!(!plan.has_changes());
        assert_eq!(plan.unchanged.len(), 7);
    }

    #[test]
    fn test_toggling_custom_image_updates_only_the_service() {
        let graph = build_stack_graph(&stack()).expect("graph");
        let state = applied_state(&graph);

        let mut custom = stack();
        custom.use_custom_image = true;
        let custom_graph = build_stack_graph(&custom).expect("graph");

        let plan = plan(&custom_graph, &state, "h2").expect("plan");
        assert_eq!(plan.ops.len(), 1);
        let op = &plan.ops[0];
        assert_eq!(op.action, ChangeAction::Update);
        assert_eq!(op.id, ids::compute_service());
        assert_eq!(op.remote_id.as_deref(), Some("compute-service/app#1"));

        let fields: Vec<_> = op.changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["image", "image_source"]);
    }

    #[test]
    fn test_removed_resources_deleted_after_creates() {
        let graph = build_stack_graph(&stack()).expect("graph");
        let mut state = StackState::new("acme-prod");
        let legacy = Resource::new(ResourceKind::Secret, "legacy-token");
        state.record(
            legacy.id.clone(),
            AppliedState::from_resource(&legacy, "legacy#1"),
        );

        let plan = plan(&graph, &state, "h1").expect("plan");
        assert_eq!(plan.ops.len(), 8);
        let last = plan.ops.last().expect("op");
        assert_eq!(last.action, ChangeAction::Delete);
        assert_eq!(last.id, legacy.id);
        assert_eq!(last.remote_id.as_deref(), Some("legacy#1"));
    }

    #[test]
    fn test_destroy_plan_reverses_dependencies() {
        let graph = build_stack_graph(&stack()).expect("graph");
        let state = applied_state(&graph);

        let plan = plan_destroy(&state, "h1").expect("plan");
        assert_eq!(plan.operation, RunOperation::Destroy);
        assert_eq!(plan.ops.len(), 7);
        assert_eq!(plan.ops[0].id, ids::compute_service());

        let position = |id: &ResourceId| plan.ops.iter().position(|op| &op.id == id).expect("op");
        for resource in graph.iter() {
            for dep in &resource.depends_on {
                assert!(position(&resource.id) < position(dep));
            }
        }
    }

    #[test]
    fn test_plan_rejects_cycle() {
        let mut graph = ResourceGraph::new();
        let a = Resource::new(ResourceKind::Secret, "a");
        let b = Resource::new(ResourceKind::Secret, "b").depends_on(&a.id);
        graph.insert(a.clone()).expect("insert");
        graph.insert(b.clone()).expect("insert");
        graph.add_dependency(&a.id, &b.id).expect("edge");

        assert!(matches!(
            plan(&graph, &StackState::new("acme-prod"), "h"),
            Err(PlanError::Cycle { .. })
        ));
    }
}
